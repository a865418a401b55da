use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard};
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use crate::config::{LivecastConfig, StreamSection};

use super::fallback::{FallbackDecision, FallbackPolicy};
use super::launcher::{FfmpegLauncher, LaunchError, ProcessLauncher, TranscoderProcess};
use super::{LifecycleState, OutputDescriptor, SourceDescriptor};

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error(transparent)]
    Launch(#[from] LaunchError),
    #[error("failed to prepare output directory {path}: {source}")]
    OutputDir { path: PathBuf, source: io::Error },
    #[error("transcoder failed to start for {input}: {output}")]
    EarlyExit { input: String, output: String },
    #[error("test pattern failed: {output}")]
    FallbackFailed { output: String },
    #[error("transcoder {pid} did not exit after termination and kill")]
    StopTimedOut { pid: u32 },
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub grace_interval: Duration,
    pub test_pattern_grace: Duration,
    pub stop_timeout: Duration,
    pub kill_timeout: Duration,
}

impl SupervisorSettings {
    pub fn from_config(section: &StreamSection) -> Self {
        Self {
            grace_interval: section.grace_interval(),
            test_pattern_grace: section.test_pattern_grace_interval(),
            stop_timeout: section.stop_timeout(),
            kill_timeout: section.kill_timeout(),
        }
    }
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self::from_config(&StreamSection::default())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StartReport {
    pub status: &'static str,
    pub pid: u32,
    pub source: SourceDescriptor,
    pub output: OutputDescriptor,
    pub hls_url: String,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl StartReport {
    pub fn fallback_used(&self) -> bool {
        self.note.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StopReport {
    Stopped {
        pid: u32,
        escalated: bool,
        message: String,
    },
    #[serde(rename = "info")]
    NoActiveSession { message: String },
}

impl StopReport {
    fn stopped(pid: u32, escalated: bool) -> Self {
        let message = if escalated {
            "Stream conversion killed after graceful stop timed out"
        } else {
            "Stream conversion stopped successfully"
        };
        StopReport::Stopped {
            pid,
            escalated,
            message: message.to_string(),
        }
    }

    fn no_active_session() -> Self {
        StopReport::NoActiveSession {
            message: "no active stream".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamStatus {
    pub running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceDescriptor>,
    pub state: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

struct ConversionSession {
    source: SourceDescriptor,
    process: Box<dyn TranscoderProcess>,
    pid: u32,
    started_at: DateTime<Utc>,
}

struct SupervisorInner {
    session: Option<ConversionSession>,
    /// Launched but not yet past its liveness check.
    pending: Option<Box<dyn TranscoderProcess>>,
    state: LifecycleState,
}

impl SupervisorInner {
    /// Restores a consistent state after a start or stop future was dropped
    /// mid-flight. Anything left half-launched or half-stopped is killed.
    fn recover_interrupted(&mut self) {
        match self.state {
            LifecycleState::Starting => {
                if let Some(mut process) = self.pending.take() {
                    let pid = process.pid();
                    if let Err(err) = process.kill() {
                        warn!(pid, error = %err, "failed to kill transcoder after interrupted start");
                    }
                    warn!(pid, "start interrupted; launched transcoder killed");
                }
                self.state = LifecycleState::Failed(
                    "start interrupted before the liveness check completed".to_string(),
                );
            }
            LifecycleState::Stopping => {
                if let Some(mut session) = self.session.take() {
                    if let Err(err) = session.process.kill() {
                        warn!(pid = session.pid, error = %err, "failed to kill transcoder after interrupted stop");
                    }
                    warn!(pid = session.pid, "stop interrupted; transcoder killed");
                }
                self.state = LifecycleState::Idle;
            }
            _ => {}
        }
    }
}

/// Lock held for the duration of a start or stop. Dropping it early (the
/// caller's future was cancelled) runs [`SupervisorInner::recover_interrupted`].
struct InFlight<'a>(MutexGuard<'a, SupervisorInner>);

impl InFlight<'_> {
    fn inner(&mut self) -> &mut SupervisorInner {
        &mut self.0
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.recover_interrupted();
    }
}

enum Liveness {
    Alive(ConversionSession),
    Exited(String),
}

/// Owns the single transcoder process. Every operation runs inside one
/// critical section, so at most one process is ever live.
pub struct StreamSupervisor {
    launcher: Arc<dyn ProcessLauncher>,
    fallback: FallbackPolicy,
    output: OutputDescriptor,
    settings: SupervisorSettings,
    inner: Mutex<SupervisorInner>,
}

impl fmt::Debug for StreamSupervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamSupervisor")
            .field("fallback", &self.fallback)
            .field("output", &self.output)
            .field("settings", &self.settings)
            .finish()
    }
}

impl StreamSupervisor {
    pub fn new(
        launcher: Arc<dyn ProcessLauncher>,
        output: OutputDescriptor,
        settings: SupervisorSettings,
    ) -> Self {
        Self {
            launcher,
            fallback: FallbackPolicy::default(),
            output,
            settings,
            inner: Mutex::new(SupervisorInner {
                session: None,
                pending: None,
                state: LifecycleState::Idle,
            }),
        }
    }

    pub fn from_config(config: &LivecastConfig) -> Self {
        Self::new(
            Arc::new(FfmpegLauncher::from_config(config)),
            OutputDescriptor::from_config(config),
            SupervisorSettings::from_config(&config.stream),
        )
        .with_fallback(FallbackPolicy::from_config(&config.fallback))
    }

    pub fn with_fallback(mut self, fallback: FallbackPolicy) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn output(&self) -> &OutputDescriptor {
        &self.output
    }

    pub async fn start(&self, source: SourceDescriptor) -> Result<StartReport, SupervisorError> {
        let mut guard = InFlight(self.inner.lock().await);
        self.start_locked(guard.inner(), source).await
    }

    pub async fn start_test_pattern(&self) -> Result<StartReport, SupervisorError> {
        self.start(SourceDescriptor::TestPattern).await
    }

    pub async fn stop(&self) -> Result<StopReport, SupervisorError> {
        let mut guard = InFlight(self.inner.lock().await);
        self.stop_locked(guard.inner()).await
    }

    /// Polls the live handle; a process that exited since the last call is
    /// discarded here.
    pub async fn status(&self) -> StreamStatus {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        if let Some(session) = inner.session.as_mut() {
            match session.process.try_wait() {
                Ok(None) => {
                    return StreamStatus {
                        running: true,
                        pid: Some(session.pid),
                        source: Some(session.source.clone()),
                        state: inner.state.as_str(),
                        last_error: None,
                    };
                }
                Ok(Some(status)) => {
                    info!(pid = session.pid, %status, "transcoder exited");
                    inner.state = if status.success() {
                        LifecycleState::Idle
                    } else {
                        LifecycleState::Failed(format!("transcoder exited with {status}"))
                    };
                }
                Err(err) => {
                    warn!(pid = session.pid, error = %err, "failed to poll transcoder; discarding handle");
                    if let Err(kill_err) = session.process.kill() {
                        debug!(pid = session.pid, error = %kill_err, "kill after failed poll");
                    }
                    inner.state = LifecycleState::Failed(err.to_string());
                }
            }
            inner.session = None;
        }
        let last_error = match &inner.state {
            LifecycleState::Failed(reason) => Some(reason.clone()),
            _ => None,
        };
        StreamStatus {
            running: false,
            pid: None,
            source: None,
            state: inner.state.as_str(),
            last_error,
        }
    }

    /// Last recorded lifecycle state, without re-validating the process.
    pub async fn state(&self) -> LifecycleState {
        self.inner.lock().await.state.clone()
    }

    /// Stops any running conversion; used when the service exits.
    pub async fn shutdown(&self) {
        match self.stop().await {
            Ok(StopReport::Stopped { pid, .. }) => info!(pid, "transcoder stopped on shutdown"),
            Ok(StopReport::NoActiveSession { .. }) => {}
            Err(err) => error!(error = %err, "failed to stop transcoder on shutdown"),
        }
    }

    async fn start_locked(
        &self,
        inner: &mut SupervisorInner,
        source: SourceDescriptor,
    ) -> Result<StartReport, SupervisorError> {
        self.stop_locked(inner).await?;

        inner.state = LifecycleState::Starting;
        if let Err(source_err) = tokio::fs::create_dir_all(&self.output.dir).await {
            inner.state = LifecycleState::Failed(source_err.to_string());
            return Err(SupervisorError::OutputDir {
                path: self.output.dir.clone(),
                source: source_err,
            });
        }

        let output = match self
            .launch_checked(inner, &source, self.settings.grace_interval)
            .await
        {
            Ok(Liveness::Alive(session)) => return Ok(self.promote(inner, session, None)),
            Ok(Liveness::Exited(output)) => output,
            Err(err) => {
                inner.state = LifecycleState::Failed(err.to_string());
                return Err(err);
            }
        };

        if source.is_test_pattern() {
            inner.state = LifecycleState::Failed(output.clone());
            return Err(SupervisorError::FallbackFailed { output });
        }

        match self.fallback.decide(&output) {
            FallbackDecision::RetryWithTestPattern => {
                warn!(source = %source, diagnostics = %output, "source unreachable; falling back to test pattern");
                self.start_fallback(inner, &source).await
            }
            FallbackDecision::PropagateFailure(message) => {
                error!(source = %source, diagnostics = %message, "transcoder exited during grace interval");
                inner.state = LifecycleState::Failed(message.clone());
                Err(SupervisorError::EarlyExit {
                    input: source.to_string(),
                    output: message,
                })
            }
        }
    }

    /// Launches and waits out the grace interval. The handle sits in
    /// `inner.pending` while waiting so an interrupted start can reap it.
    async fn launch_checked(
        &self,
        inner: &mut SupervisorInner,
        source: &SourceDescriptor,
        grace: Duration,
    ) -> Result<Liveness, SupervisorError> {
        let process = self.launcher.launch(source, &self.output)?;
        let pid = process.pid();
        inner.pending = Some(process);
        sleep(grace).await;

        let Some(mut process) = inner.pending.take() else {
            return Err(LaunchError::SpawnFailed(format!(
                "handle for transcoder {pid} lost during grace interval"
            ))
            .into());
        };
        match process.try_wait() {
            Ok(None) => Ok(Liveness::Alive(ConversionSession {
                source: source.clone(),
                process,
                pid,
                started_at: Utc::now(),
            })),
            Ok(Some(status)) => {
                let output = process.diagnostics().await;
                debug!(pid, %status, "transcoder exited during grace interval");
                if output.trim().is_empty() {
                    Ok(Liveness::Exited(format!("transcoder exited with {status}")))
                } else {
                    Ok(Liveness::Exited(output))
                }
            }
            Err(err) => {
                if let Err(kill_err) = process.kill() {
                    debug!(pid, error = %kill_err, "kill after failed liveness check");
                }
                Err(SupervisorError::Io(err))
            }
        }
    }

    async fn start_fallback(
        &self,
        inner: &mut SupervisorInner,
        requested: &SourceDescriptor,
    ) -> Result<StartReport, SupervisorError> {
        let test_pattern = SourceDescriptor::TestPattern;
        match self
            .launch_checked(inner, &test_pattern, self.settings.test_pattern_grace)
            .await
        {
            Ok(Liveness::Alive(session)) => {
                let note = format!("Using test pattern ({requested} was not accessible)");
                Ok(self.promote(inner, session, Some(note)))
            }
            Ok(Liveness::Exited(output)) => {
                error!(diagnostics = %output, "test pattern exited during grace interval");
                inner.state = LifecycleState::Failed(output.clone());
                Err(SupervisorError::FallbackFailed { output })
            }
            Err(err) => {
                inner.state = LifecycleState::Failed(err.to_string());
                Err(err)
            }
        }
    }

    fn promote(
        &self,
        inner: &mut SupervisorInner,
        session: ConversionSession,
        note: Option<String>,
    ) -> StartReport {
        let report = StartReport {
            status: "started",
            pid: session.pid,
            source: session.source.clone(),
            output: self.output.clone(),
            hls_url: self.output.public_playlist_url(),
            started_at: session.started_at,
            note,
        };
        info!(pid = session.pid, source = %session.source, "transcoder running");
        inner.session = Some(session);
        inner.state = LifecycleState::Running;
        report
    }

    /// The session stays in `inner.session` until it is reaped so an
    /// interrupted stop can still kill it.
    async fn stop_locked(
        &self,
        inner: &mut SupervisorInner,
    ) -> Result<StopReport, SupervisorError> {
        let Some(session) = inner.session.as_mut() else {
            return Ok(StopReport::no_active_session());
        };
        let pid = session.pid;
        inner.state = LifecycleState::Stopping;
        info!(pid, source = %session.source, "stopping transcoder");

        let outcome = self.reap(session).await;
        inner.session = None;
        inner.state = LifecycleState::Idle;
        match outcome {
            Some(escalated) => Ok(StopReport::stopped(pid, escalated)),
            None => {
                error!(pid, "transcoder survived kill; handle released");
                Err(SupervisorError::StopTimedOut { pid })
            }
        }
    }

    /// Terminate, then kill on timeout. `Some(escalated)` once the process
    /// has exited, `None` if it survived both.
    async fn reap(&self, session: &mut ConversionSession) -> Option<bool> {
        let pid = session.pid;
        if let Err(err) = session.process.terminate() {
            warn!(pid, error = %err, "failed to signal transcoder process group");
        }
        match timeout(self.settings.stop_timeout, session.process.wait()).await {
            Ok(Ok(status)) => {
                debug!(pid, %status, "transcoder exited after termination request");
                return Some(false);
            }
            Ok(Err(err)) => warn!(pid, error = %err, "waiting for transcoder failed; escalating"),
            Err(_) => warn!(
                pid,
                timeout_ms = self.settings.stop_timeout.as_millis() as u64,
                "graceful stop timed out; killing process group"
            ),
        }

        if let Err(err) = session.process.kill() {
            warn!(pid, error = %err, "failed to kill transcoder process group");
        }
        matches!(
            timeout(self.settings.kill_timeout, session.process.wait()).await,
            Ok(Ok(_))
        )
        .then_some(true)
    }
}
