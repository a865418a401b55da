use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct LivecastConfig {
    pub server: ServerSection,
    pub paths: PathsSection,
    pub stream: StreamSection,
    pub encode: EncodeSection,
    pub test_pattern: TestPatternSection,
    pub fallback: FallbackSection,
}

impl LivecastConfig {
    pub fn resolve_path<P: AsRef<Path>>(&self, candidate: P) -> PathBuf {
        let path = candidate.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            Path::new(&self.paths.base_dir).join(path)
        }
    }

    pub fn output_dir(&self) -> PathBuf {
        self.resolve_path(&self.paths.output_dir)
    }

    pub fn database_path(&self) -> PathBuf {
        self.resolve_path(&self.paths.database)
    }

    pub fn bind_addr(&self) -> Result<SocketAddr> {
        self.server
            .bind
            .parse()
            .map_err(|err: std::net::AddrParseError| ConfigError::Invalid {
                field: "server.bind",
                reason: err.to_string(),
            })
    }

    /// Rejects values that would make the transcoder invocation meaningless.
    pub fn validate(&self) -> Result<()> {
        self.bind_addr()?;
        if self.stream.ffmpeg.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "stream.ffmpeg",
                reason: "binary path is empty".into(),
            });
        }
        if !self.stream.segment_pattern.contains('%') {
            return Err(ConfigError::Invalid {
                field: "stream.segment_pattern",
                reason: format!(
                    "pattern {} has no sequence placeholder",
                    self.stream.segment_pattern
                ),
            });
        }
        if self.stream.hls_time == 0 || self.stream.hls_list_size == 0 {
            return Err(ConfigError::Invalid {
                field: "stream.hls_time",
                reason: "segment duration and window size must be positive".into(),
            });
        }
        if self.test_pattern.rate == 0 {
            return Err(ConfigError::Invalid {
                field: "test_pattern.rate",
                reason: "frame rate must be positive".into(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub bind: String,
    pub cors_permissive: bool,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:5000".into(),
            cors_permissive: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsSection {
    pub base_dir: String,
    pub output_dir: String,
    pub database: String,
}

impl Default for PathsSection {
    fn default() -> Self {
        Self {
            base_dir: ".".into(),
            output_dir: "static".into(),
            database: "data/overlays.sqlite".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StreamSection {
    pub ffmpeg: String,
    pub log_level: String,
    pub playlist_name: String,
    pub segment_pattern: String,
    pub hls_time: u32,
    pub hls_list_size: u32,
    pub hls_flags: String,
    pub grace_ms: u64,
    pub test_pattern_grace_ms: u64,
    pub stop_timeout_secs: u64,
    pub kill_timeout_secs: u64,
}

impl StreamSection {
    pub fn grace_interval(&self) -> Duration {
        Duration::from_millis(self.grace_ms)
    }

    pub fn test_pattern_grace_interval(&self) -> Duration {
        Duration::from_millis(self.test_pattern_grace_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    pub fn kill_timeout(&self) -> Duration {
        Duration::from_secs(self.kill_timeout_secs)
    }
}

impl Default for StreamSection {
    fn default() -> Self {
        Self {
            ffmpeg: "ffmpeg".into(),
            log_level: "error".into(),
            playlist_name: "stream.m3u8".into(),
            segment_pattern: "segment_%03d.ts".into(),
            hls_time: 2,
            hls_list_size: 3,
            hls_flags: "delete_segments+append_list".into(),
            grace_ms: 1_000,
            test_pattern_grace_ms: 2_000,
            stop_timeout_secs: 5,
            kill_timeout_secs: 2,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EncodeSection {
    pub video_codec: String,
    pub preset: String,
    pub tune: String,
    pub audio_codec: String,
}

impl Default for EncodeSection {
    fn default() -> Self {
        Self {
            video_codec: "libx264".into(),
            preset: "ultrafast".into(),
            tune: "zerolatency".into(),
            audio_codec: "aac".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TestPatternSection {
    pub size: String,
    pub rate: u32,
}

impl Default for TestPatternSection {
    fn default() -> Self {
        Self {
            size: "640x480".into(),
            rate: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FallbackSection {
    pub enabled: bool,
    pub signatures: Vec<String>,
}

impl Default for FallbackSection {
    fn default() -> Self {
        Self {
            enabled: true,
            signatures: vec![
                "Failed to resolve hostname".into(),
                "Error opening input".into(),
            ],
        }
    }
}

pub fn load_livecast_config<P: AsRef<Path>>(path: P) -> Result<LivecastConfig> {
    load_toml(path)
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_fixture_config() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../configs/livecast.toml");
        let config = load_livecast_config(path).expect("config should parse");
        assert_eq!(config.stream.playlist_name, "stream.m3u8");
        assert_eq!(config.stream.hls_list_size, 3);
        assert_eq!(config.fallback.signatures.len(), 2);
        config.validate().expect("fixture config is valid");
    }

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let config: LivecastConfig = toml::from_str(
            r#"
            [stream]
            grace_ms = 250
            "#,
        )
        .unwrap();
        assert_eq!(config.stream.grace_interval(), Duration::from_millis(250));
        assert_eq!(config.stream.ffmpeg, "ffmpeg");
        assert_eq!(config.encode.preset, "ultrafast");
        assert!(config.fallback.enabled);
    }

    #[test]
    fn resolve_path_keeps_absolute_paths() {
        let mut config = LivecastConfig::default();
        config.paths.base_dir = "/srv/livecast".into();
        assert_eq!(
            config.output_dir(),
            PathBuf::from("/srv/livecast").join("static")
        );
        assert_eq!(config.resolve_path("/tmp/x"), PathBuf::from("/tmp/x"));
    }

    #[test]
    fn validate_rejects_pattern_without_placeholder() {
        let mut config = LivecastConfig::default();
        config.stream.segment_pattern = "segment.ts".into();
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "stream.segment_pattern",
                ..
            }
        ));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = load_livecast_config("/nonexistent/livecast.toml").unwrap_err();
        match err {
            ConfigError::Io { path, .. } => {
                assert_eq!(path, PathBuf::from("/nonexistent/livecast.toml"))
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
