pub mod error;
pub mod models;
pub mod store;

pub use error::{OverlayError, OverlayResult};
pub use models::{NewOverlay, Overlay, OverlayPatch};
pub use store::{SqliteOverlayStore, SqliteOverlayStoreBuilder};
