pub mod config;
pub mod error;
pub mod overlay;
pub mod sqlite;
pub mod stream;

pub use config::{load_livecast_config, LivecastConfig};
pub use error::{ConfigError, Result};
pub use overlay::{
    NewOverlay, Overlay, OverlayError, OverlayPatch, OverlayResult, SqliteOverlayStore,
    SqliteOverlayStoreBuilder,
};
pub use stream::{
    FallbackDecision, FallbackPolicy, FfmpegLauncher, LaunchError, LifecycleState,
    OutputDescriptor, ProcessLauncher, SourceDescriptor, SourceError, StartReport, StopReport,
    StreamStatus, StreamSupervisor, SupervisorError, SupervisorSettings, TranscoderCommand,
    TranscoderProcess,
};
