pub mod web;

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use livecast_core::{
    load_livecast_config, LivecastConfig, OutputDescriptor, SourceDescriptor, SqliteOverlayStore,
    StreamSupervisor, TranscoderCommand,
};

use crate::web::WebState;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] livecast_core::ConfigError),
    #[error("overlay store error: {0}")]
    Overlay(#[from] livecast_core::OverlayError),
    #[error("invalid source: {0}")]
    Source(#[from] livecast_core::SourceError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("{0}")]
    CheckFailed(String),
}

#[derive(Parser, Debug)]
#[command(author, version, about = "RTSP to HLS live conversion service", long_about = None)]
pub struct Cli {
    /// Path to livecast.toml
    #[arg(long, env = "LIVECAST_CONFIG", default_value = "configs/livecast.toml")]
    pub config: PathBuf,
    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "info,livecast_core=debug")]
    pub log_level: String,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Runs the HTTP control plane
    Serve(ServeArgs),
    /// Prints the transcoder invocation for a source without launching it
    Command(CommandArgs),
    /// Validates configuration, transcoder binary, database and output directory
    Check,
}

#[derive(Args, Debug, Default)]
pub struct ServeArgs {
    /// Socket address to listen on (overrides server.bind)
    #[arg(long)]
    pub bind: Option<String>,
    /// Directory receiving playlist and segments (overrides paths.output_dir)
    #[arg(long)]
    pub output_dir: Option<PathBuf>,
    /// Overlay SQLite file (overrides paths.database)
    #[arg(long)]
    pub database: Option<PathBuf>,
    /// Transcoder binary (overrides stream.ffmpeg)
    #[arg(long)]
    pub ffmpeg: Option<String>,
}

#[derive(Args, Debug)]
pub struct CommandArgs {
    /// RTSP url, local file or "test_pattern"
    pub source: String,
}

pub fn run(cli: Cli) -> Result<()> {
    init_tracing(&cli.log_level);
    let mut context = AppContext::new(&cli.config)?;

    match &cli.command {
        Commands::Serve(args) => {
            context.apply_overrides(args);
            context.serve()?;
        }
        Commands::Command(args) => {
            let invocation = context.invocation(&args.source)?;
            render(&invocation, cli.format)?;
        }
        Commands::Check => {
            let report = context.check();
            render(&report, cli.format)?;
            if report
                .iter()
                .any(|entry| matches!(entry.status, CheckStatus::Error))
            {
                return Err(AppError::CheckFailed(
                    "one or more checks failed".to_string(),
                ));
            }
        }
    }

    Ok(())
}

/// Installs the global subscriber; `RUST_LOG` wins over `default_filter`.
pub fn init_tracing(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + TextReport,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.text());
            Ok(())
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{}", json);
            Ok(())
        }
    }
}

trait TextReport {
    fn text(&self) -> String;
}

#[derive(Debug)]
struct AppContext {
    config: LivecastConfig,
    config_path: PathBuf,
    config_found: bool,
}

impl AppContext {
    fn new(config_path: &Path) -> Result<Self> {
        let config_found = config_path.exists();
        let config = if config_found {
            load_livecast_config(config_path)?
        } else {
            warn!(path = %config_path.display(), "config file not found; using defaults");
            LivecastConfig::default()
        };
        Ok(Self {
            config,
            config_path: config_path.to_path_buf(),
            config_found,
        })
    }

    fn apply_overrides(&mut self, args: &ServeArgs) {
        if let Some(bind) = &args.bind {
            self.config.server.bind = bind.clone();
        }
        if let Some(dir) = &args.output_dir {
            self.config.paths.output_dir = dir.to_string_lossy().into_owned();
        }
        if let Some(database) = &args.database {
            self.config.paths.database = database.to_string_lossy().into_owned();
        }
        if let Some(ffmpeg) = &args.ffmpeg {
            self.config.stream.ffmpeg = ffmpeg.clone();
        }
    }

    fn serve(&self) -> Result<()> {
        self.config.validate()?;
        let addr = self.config.bind_addr()?;
        let output_dir = self.config.output_dir();
        fs::create_dir_all(&output_dir)?;

        let overlays = SqliteOverlayStore::new(self.config.database_path())?;
        overlays.initialize()?;
        info!(
            database = %overlays.path().display(),
            output_dir = %output_dir.display(),
            "storage ready"
        );

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?;
        let config = self.config.clone();
        runtime.block_on(async move {
            let supervisor = Arc::new(StreamSupervisor::from_config(&config));
            let state = WebState::new(supervisor, overlays);
            web::serve(addr, state, config.server.cors_permissive).await
        })?;
        Ok(())
    }

    fn invocation(&self, raw: &str) -> Result<Invocation> {
        let source = SourceDescriptor::parse(raw)?;
        let command = TranscoderCommand::from_config(&self.config);
        let output = OutputDescriptor::from_config(&self.config);
        Ok(Invocation {
            program: command.program().to_string(),
            args: command.args(&source, &output),
            rendered: command.render(&source, &output),
            source,
        })
    }

    fn check(&self) -> Vec<HealthEntry> {
        vec![
            self.check_config(),
            self.check_transcoder(),
            self.check_output_dir(),
            self.check_database(),
        ]
    }

    fn check_config(&self) -> HealthEntry {
        let name = "config";
        match self.config.validate() {
            Ok(()) if self.config_found => {
                HealthEntry::ok(name, format!("{} is valid", self.config_path.display()))
            }
            Ok(()) => HealthEntry::warn(
                name,
                format!("{} not found; defaults in use", self.config_path.display()),
            ),
            Err(err) => HealthEntry::error(name, err.to_string()),
        }
    }

    fn check_transcoder(&self) -> HealthEntry {
        let name = "ffmpeg";
        let program = &self.config.stream.ffmpeg;
        let output = Command::new(program)
            .arg("-version")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .output();
        match output {
            Ok(output) if output.status.success() => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                let version = stdout.lines().next().unwrap_or(program.as_str()).to_string();
                HealthEntry::ok(name, version)
            }
            Ok(output) => HealthEntry::error(
                name,
                format!("{program} -version exited with {}", output.status),
            ),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                HealthEntry::error(name, format!("{program} not found on PATH"))
            }
            Err(err) => HealthEntry::error(name, format!("failed to run {program}: {err}")),
        }
    }

    fn check_output_dir(&self) -> HealthEntry {
        let name = "output_dir";
        let dir = self.config.output_dir();
        match fs::metadata(&dir) {
            Ok(meta) if !meta.is_dir() => {
                HealthEntry::error(name, format!("{} is not a directory", dir.display()))
            }
            Ok(meta) if meta.permissions().readonly() => {
                HealthEntry::error(name, format!("{} is read-only", dir.display()))
            }
            Ok(_) => HealthEntry::ok(name, dir.display().to_string()),
            Err(_) => HealthEntry::warn(
                name,
                format!("{} will be created on first start", dir.display()),
            ),
        }
    }

    fn check_database(&self) -> HealthEntry {
        let name = "database";
        let path = self.config.database_path();
        let store = match SqliteOverlayStore::new(&path) {
            Ok(store) => store,
            Err(err) => return HealthEntry::error(name, err.to_string()),
        };
        match store.initialize().and_then(|_| store.ping()) {
            Ok(()) => HealthEntry::ok(name, path.display().to_string()),
            Err(err) => HealthEntry::error(name, err.to_string()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct Invocation {
    pub source: SourceDescriptor,
    pub program: String,
    pub args: Vec<String>,
    #[serde(skip)]
    pub rendered: String,
}

impl TextReport for Invocation {
    fn text(&self) -> String {
        self.rendered.clone()
    }
}

#[derive(Debug, Serialize)]
pub struct HealthEntry {
    pub name: String,
    pub status: CheckStatus,
    pub detail: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Ok,
    Warn,
    Error,
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CheckStatus::Ok => "OK",
            CheckStatus::Warn => "WARN",
            CheckStatus::Error => "ERROR",
        };
        write!(f, "{}", label)
    }
}

impl HealthEntry {
    fn ok(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Ok,
            detail: detail.into(),
        }
    }

    fn warn(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Warn,
            detail: detail.into(),
        }
    }

    fn error(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Error,
            detail: detail.into(),
        }
    }
}

impl TextReport for Vec<HealthEntry> {
    fn text(&self) -> String {
        self.iter()
            .map(|entry| format!("[{}] {}: {}", entry.status, entry.name, entry.detail))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_config(dir: &TempDir, ffmpeg: &str) -> PathBuf {
        let path = dir.path().join("livecast.toml");
        let body = format!(
            r#"
[paths]
base_dir = "{base}"
output_dir = "static"
database = "data/overlays.sqlite"

[stream]
ffmpeg = "{ffmpeg}"
"#,
            base = dir.path().display(),
        );
        fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn missing_config_falls_back_to_defaults() {
        let dir = TempDir::new().unwrap();
        let context = AppContext::new(&dir.path().join("absent.toml")).unwrap();
        assert!(!context.config_found);
        assert_eq!(context.config.server.bind, "0.0.0.0:5000");
        assert!(matches!(context.check_config().status, CheckStatus::Warn));
    }

    #[test]
    fn invocation_follows_configured_paths() {
        let dir = TempDir::new().unwrap();
        let context = AppContext::new(&write_config(&dir, "ffmpeg")).unwrap();
        let invocation = context.invocation("rtsp://cam.local/live").unwrap();
        assert_eq!(invocation.program, "ffmpeg");
        let playlist = dir.path().join("static").join("stream.m3u8");
        assert_eq!(
            invocation.args.last().map(String::as_str),
            Some(playlist.to_str().unwrap())
        );
        assert!(invocation.rendered.starts_with("ffmpeg "));
        assert!(context.invocation("").is_err());
    }

    #[test]
    fn overrides_replace_file_values() {
        let dir = TempDir::new().unwrap();
        let mut context = AppContext::new(&write_config(&dir, "ffmpeg")).unwrap();
        context.apply_overrides(&ServeArgs {
            bind: Some("127.0.0.1:8080".into()),
            ffmpeg: Some("/opt/ffmpeg/bin/ffmpeg".into()),
            ..ServeArgs::default()
        });
        assert_eq!(context.config.bind_addr().unwrap().port(), 8080);
        assert_eq!(context.config.stream.ffmpeg, "/opt/ffmpeg/bin/ffmpeg");
    }

    #[test]
    fn check_reports_missing_transcoder_and_initializes_database() {
        let dir = TempDir::new().unwrap();
        let context =
            AppContext::new(&write_config(&dir, "/nonexistent/livecast-ffmpeg")).unwrap();
        let report = context.check();
        let status = |name: &str| {
            report
                .iter()
                .find(|entry| entry.name == name)
                .map(|entry| entry.status.to_string())
                .unwrap()
        };
        assert_eq!(status("config"), "OK");
        assert_eq!(status("ffmpeg"), "ERROR");
        assert_eq!(status("output_dir"), "WARN");
        assert_eq!(status("database"), "OK");
        assert!(dir.path().join("data/overlays.sqlite").exists());
    }
}
