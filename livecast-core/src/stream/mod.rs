//! Live conversion of an RTSP source (or a synthetic test pattern) into a
//! rolling HLS playlist by a single supervised transcoder process.

pub mod fallback;
pub mod launcher;
pub mod supervisor;

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

use crate::config::LivecastConfig;

pub use fallback::{FallbackDecision, FallbackPolicy};
pub use launcher::{
    FfmpegLauncher, LaunchError, ProcessLauncher, TranscoderCommand, TranscoderProcess,
};
pub use supervisor::{
    StartReport, StopReport, StreamStatus, StreamSupervisor, SupervisorError, SupervisorSettings,
};

const TEST_PATTERN_ALIASES: [&str; 3] = ["test", "test_pattern", "testsrc"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SourceError {
    #[error("source is required")]
    Empty,
    #[error("invalid stream url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
}

/// What the transcoder reads from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceDescriptor {
    Rtsp(String),
    LocalFile(PathBuf),
    TestPattern,
}

impl SourceDescriptor {
    pub fn parse(raw: &str) -> Result<Self, SourceError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(SourceError::Empty);
        }
        if TEST_PATTERN_ALIASES
            .iter()
            .any(|alias| raw.eq_ignore_ascii_case(alias))
        {
            return Ok(SourceDescriptor::TestPattern);
        }
        let lowered = raw.to_ascii_lowercase();
        if lowered.starts_with("rtsp://") || lowered.starts_with("rtsps://") {
            let parsed = url::Url::parse(raw).map_err(|err| SourceError::InvalidUrl {
                url: raw.to_string(),
                reason: err.to_string(),
            })?;
            if parsed.host_str().map(str::is_empty).unwrap_or(true) {
                return Err(SourceError::InvalidUrl {
                    url: raw.to_string(),
                    reason: "missing host".into(),
                });
            }
            return Ok(SourceDescriptor::Rtsp(raw.to_string()));
        }
        Ok(SourceDescriptor::LocalFile(PathBuf::from(raw)))
    }

    pub fn is_test_pattern(&self) -> bool {
        matches!(self, SourceDescriptor::TestPattern)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SourceDescriptor::Rtsp(_) => "rtsp",
            SourceDescriptor::LocalFile(_) => "file",
            SourceDescriptor::TestPattern => "test_pattern",
        }
    }
}

impl fmt::Display for SourceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceDescriptor::Rtsp(url) => f.write_str(url),
            SourceDescriptor::LocalFile(path) => write!(f, "{}", path.display()),
            SourceDescriptor::TestPattern => f.write_str("test_pattern"),
        }
    }
}

impl Serialize for SourceDescriptor {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Fixed destination shared by every session for the lifetime of the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputDescriptor {
    pub dir: PathBuf,
    pub playlist_name: String,
    pub segment_pattern: String,
}

impl OutputDescriptor {
    pub fn new(
        dir: impl AsRef<Path>,
        playlist_name: impl Into<String>,
        segment_pattern: impl Into<String>,
    ) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            playlist_name: playlist_name.into(),
            segment_pattern: segment_pattern.into(),
        }
    }

    pub fn from_config(config: &LivecastConfig) -> Self {
        Self::new(
            config.output_dir(),
            config.stream.playlist_name.clone(),
            config.stream.segment_pattern.clone(),
        )
    }

    pub fn playlist_path(&self) -> PathBuf {
        self.dir.join(&self.playlist_name)
    }

    pub fn segment_path(&self) -> PathBuf {
        self.dir.join(&self.segment_pattern)
    }

    /// Path under which the HTTP layer exposes the playlist.
    pub fn public_playlist_url(&self) -> String {
        format!("/static/{}", self.playlist_name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleState {
    Idle,
    Starting,
    Running,
    Stopping,
    Failed(String),
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Idle => "idle",
            LifecycleState::Starting => "starting",
            LifecycleState::Running => "running",
            LifecycleState::Stopping => "stopping",
            LifecycleState::Failed(_) => "failed",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleState::Failed(reason) => write!(f, "failed: {reason}"),
            other => f.write_str(other.as_str()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_recognizes_each_variant() {
        assert_eq!(
            SourceDescriptor::parse("rtsp://cam.local:8554/live").unwrap(),
            SourceDescriptor::Rtsp("rtsp://cam.local:8554/live".into())
        );
        assert_eq!(
            SourceDescriptor::parse(" /media/clip.mp4 ").unwrap(),
            SourceDescriptor::LocalFile(PathBuf::from("/media/clip.mp4"))
        );
        assert_eq!(
            SourceDescriptor::parse("Test_Pattern").unwrap(),
            SourceDescriptor::TestPattern
        );
    }

    #[test]
    fn parse_rejects_empty_and_hostless_urls() {
        assert_eq!(SourceDescriptor::parse("   "), Err(SourceError::Empty));
        assert!(matches!(
            SourceDescriptor::parse("rtsp://"),
            Err(SourceError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn output_paths_share_directory() {
        let output = OutputDescriptor::new("/srv/static", "stream.m3u8", "segment_%03d.ts");
        assert_eq!(
            output.playlist_path(),
            PathBuf::from("/srv/static/stream.m3u8")
        );
        assert_eq!(
            output.segment_path(),
            PathBuf::from("/srv/static/segment_%03d.ts")
        );
        assert_eq!(output.public_playlist_url(), "/static/stream.m3u8");
    }

    #[test]
    fn lifecycle_state_display_includes_reason() {
        assert_eq!(LifecycleState::Running.to_string(), "running");
        assert_eq!(
            LifecycleState::Failed("exit status: 1".into()).to_string(),
            "failed: exit status: 1"
        );
        assert_eq!(LifecycleState::Failed(String::new()).as_str(), "failed");
    }
}
