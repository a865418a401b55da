use std::path::{Path, PathBuf};

use chrono::Utc;
use rusqlite::{params, Connection, ErrorCode, OpenFlags, OptionalExtension};

use crate::sqlite::configure_connection;

use super::models::{NewOverlay, Overlay, OverlayPatch};
use super::{OverlayError, OverlayResult};

const OVERLAY_SCHEMA: &str = include_str!("../../../sql/overlays.sql");

#[derive(Debug, Clone)]
pub struct SqliteOverlayStoreBuilder {
    path: Option<PathBuf>,
    read_only: bool,
    create_if_missing: bool,
}

impl Default for SqliteOverlayStoreBuilder {
    fn default() -> Self {
        Self {
            path: None,
            read_only: false,
            create_if_missing: true,
        }
    }
}

impl SqliteOverlayStoreBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn path(mut self, path: impl AsRef<Path>) -> Self {
        self.path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn read_only(mut self, value: bool) -> Self {
        self.read_only = value;
        self
    }

    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    pub fn build(self) -> OverlayResult<SqliteOverlayStore> {
        let path = self.path.ok_or(OverlayError::MissingStore)?;
        let mut flags = if self.read_only {
            OpenFlags::SQLITE_OPEN_READ_ONLY
        } else {
            OpenFlags::SQLITE_OPEN_READ_WRITE
        };

        if !self.read_only && self.create_if_missing {
            flags |= OpenFlags::SQLITE_OPEN_CREATE;
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
        }

        Ok(SqliteOverlayStore { path, flags })
    }
}

/// Overlay records keyed by name. Each call opens its own connection, so
/// the store is cheap to clone into request handlers.
#[derive(Debug, Clone)]
pub struct SqliteOverlayStore {
    path: PathBuf,
    flags: OpenFlags,
}

impl SqliteOverlayStore {
    pub fn builder() -> SqliteOverlayStoreBuilder {
        SqliteOverlayStoreBuilder::new()
    }

    pub fn new(path: impl AsRef<Path>) -> OverlayResult<Self> {
        SqliteOverlayStoreBuilder::new().path(path).build()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_read_only(&self) -> bool {
        self.flags.contains(OpenFlags::SQLITE_OPEN_READ_ONLY)
    }

    fn open(&self) -> OverlayResult<Connection> {
        let conn = Connection::open_with_flags(&self.path, self.flags).map_err(|source| {
            OverlayError::OpenDatabase {
                path: self.path.clone(),
                source,
            }
        })?;
        configure_connection(&conn, self.is_read_only()).map_err(|source| {
            OverlayError::OpenDatabase {
                path: self.path.clone(),
                source,
            }
        })?;
        Ok(conn)
    }

    pub fn initialize(&self) -> OverlayResult<()> {
        let conn = self.open()?;
        conn.execute_batch(OVERLAY_SCHEMA)?;
        Ok(())
    }

    /// Round-trips a trivial query; backs the health endpoint.
    pub fn ping(&self) -> OverlayResult<()> {
        let conn = self.open()?;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
        Ok(())
    }

    pub fn create(&self, payload: NewOverlay) -> OverlayResult<Overlay> {
        let mut overlay = payload.into_overlay()?;
        let now = Utc::now();
        overlay.created_at = Some(now);
        overlay.updated_at = Some(now);

        let conn = self.open()?;
        let inserted = conn.execute(
            "INSERT INTO overlays (
                name, text, x, y, font_size, color, enabled, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                &overlay.name,
                &overlay.text,
                overlay.x,
                overlay.y,
                overlay.font_size,
                &overlay.color,
                overlay.enabled,
                now,
                now,
            ],
        );
        match inserted {
            Ok(_) => Ok(overlay),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == ErrorCode::ConstraintViolation =>
            {
                Err(OverlayError::AlreadyExists { name: overlay.name })
            }
            Err(err) => Err(err.into()),
        }
    }

    pub fn list(&self) -> OverlayResult<Vec<Overlay>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare("SELECT * FROM overlays ORDER BY created_at ASC, name ASC")?;
        let overlays = stmt
            .query_map([], |row| Overlay::from_row(row))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(overlays)
    }

    pub fn get(&self, name: &str) -> OverlayResult<Option<Overlay>> {
        let conn = self.open()?;
        let overlay = conn
            .query_row("SELECT * FROM overlays WHERE name = ?1", [name], |row| {
                Overlay::from_row(row)
            })
            .optional()?;
        Ok(overlay)
    }

    pub fn update(&self, name: &str, patch: OverlayPatch) -> OverlayResult<Overlay> {
        let mut conn = self.open()?;
        let tx = conn.transaction()?;
        let mut overlay = tx
            .query_row("SELECT * FROM overlays WHERE name = ?1", [name], |row| {
                Overlay::from_row(row)
            })
            .optional()?
            .ok_or_else(|| OverlayError::NotFound {
                name: name.to_string(),
            })?;

        patch.apply(&mut overlay);
        overlay.validate()?;
        let now = Utc::now();
        overlay.updated_at = Some(now);
        tx.execute(
            "UPDATE overlays SET
                text = ?2, x = ?3, y = ?4, font_size = ?5, color = ?6, enabled = ?7,
                updated_at = ?8
             WHERE name = ?1",
            params![
                &overlay.name,
                &overlay.text,
                overlay.x,
                overlay.y,
                overlay.font_size,
                &overlay.color,
                overlay.enabled,
                now,
            ],
        )?;
        tx.commit()?;
        Ok(overlay)
    }

    pub fn delete(&self, name: &str) -> OverlayResult<()> {
        let conn = self.open()?;
        let deleted = conn.execute("DELETE FROM overlays WHERE name = ?1", [name])?;
        if deleted == 0 {
            return Err(OverlayError::NotFound {
                name: name.to_string(),
            });
        }
        Ok(())
    }
}
