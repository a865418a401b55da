use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::config::{EncodeSection, LivecastConfig, StreamSection, TestPatternSection};

use super::{OutputDescriptor, SourceDescriptor};

const DIAGNOSTIC_LINES: usize = 64;
const DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("transcoder binary {program} not found; install ffmpeg to enable streaming")]
    BinaryNotFound { program: String },
    #[error("failed to spawn transcoder: {0}")]
    SpawnFailed(String),
}

/// A running transcoder owned by the supervisor.
#[async_trait::async_trait]
pub trait TranscoderProcess: Send {
    fn pid(&self) -> u32;

    /// Non-blocking exit check.
    fn try_wait(&mut self) -> io::Result<Option<ExitStatus>>;

    async fn wait(&mut self) -> io::Result<ExitStatus>;

    /// Graceful termination request sent to the whole process group.
    fn terminate(&mut self) -> io::Result<()>;

    /// Forced termination of the whole process group.
    fn kill(&mut self) -> io::Result<()>;

    /// Trailing stdout/stderr captured so far, oldest line first.
    async fn diagnostics(&mut self) -> String;
}

pub trait ProcessLauncher: Send + Sync {
    fn launch(
        &self,
        source: &SourceDescriptor,
        output: &OutputDescriptor,
    ) -> Result<Box<dyn TranscoderProcess>, LaunchError>;
}

/// Deterministic ffmpeg invocation for each source kind.
#[derive(Debug, Clone)]
pub struct TranscoderCommand {
    stream: StreamSection,
    encode: EncodeSection,
    test_pattern: TestPatternSection,
}

impl TranscoderCommand {
    pub fn new(
        stream: StreamSection,
        encode: EncodeSection,
        test_pattern: TestPatternSection,
    ) -> Self {
        Self {
            stream,
            encode,
            test_pattern,
        }
    }

    pub fn from_config(config: &LivecastConfig) -> Self {
        Self::new(
            config.stream.clone(),
            config.encode.clone(),
            config.test_pattern.clone(),
        )
    }

    pub fn program(&self) -> &str {
        &self.stream.ffmpeg
    }

    pub fn args(&self, source: &SourceDescriptor, output: &OutputDescriptor) -> Vec<String> {
        let mut args = vec![
            "-hide_banner".to_string(),
            "-nostats".to_string(),
            "-loglevel".to_string(),
            self.stream.log_level.clone(),
        ];

        match source {
            SourceDescriptor::Rtsp(url) => {
                args.push("-rtsp_transport".to_string());
                args.push("tcp".to_string());
                args.push("-i".to_string());
                args.push(url.clone());
            }
            SourceDescriptor::LocalFile(path) => {
                args.push("-i".to_string());
                args.push(path.to_string_lossy().to_string());
            }
            SourceDescriptor::TestPattern => {
                // lavfi has no clock of its own
                args.push("-re".to_string());
                args.push("-f".to_string());
                args.push("lavfi".to_string());
                args.push("-i".to_string());
                args.push(format!(
                    "testsrc=size={}:rate={}",
                    self.test_pattern.size, self.test_pattern.rate
                ));
            }
        }

        args.push("-c:v".to_string());
        args.push(self.encode.video_codec.clone());
        args.push("-preset".to_string());
        args.push(self.encode.preset.clone());
        args.push("-tune".to_string());
        args.push(self.encode.tune.clone());
        if source.is_test_pattern() {
            args.push("-an".to_string());
        } else {
            args.push("-c:a".to_string());
            args.push(self.encode.audio_codec.clone());
        }

        args.push("-f".to_string());
        args.push("hls".to_string());
        args.push("-hls_time".to_string());
        args.push(self.stream.hls_time.to_string());
        args.push("-hls_list_size".to_string());
        args.push(self.stream.hls_list_size.to_string());
        args.push("-hls_flags".to_string());
        args.push(self.stream.hls_flags.clone());
        args.push("-hls_segment_filename".to_string());
        args.push(output.segment_path().to_string_lossy().to_string());
        args.push(output.playlist_path().to_string_lossy().to_string());
        args
    }

    /// Shell-like rendering for logs and diagnostics.
    pub fn render(&self, source: &SourceDescriptor, output: &OutputDescriptor) -> String {
        let mut rendered = self.program().to_string();
        for arg in self.args(source, output) {
            rendered.push(' ');
            if arg.contains(' ') {
                rendered.push_str(&format!("'{arg}'"));
            } else {
                rendered.push_str(&arg);
            }
        }
        rendered
    }
}

#[derive(Debug, Clone)]
pub struct FfmpegLauncher {
    command: TranscoderCommand,
}

impl FfmpegLauncher {
    pub fn new(command: TranscoderCommand) -> Self {
        Self { command }
    }

    pub fn from_config(config: &LivecastConfig) -> Self {
        Self::new(TranscoderCommand::from_config(config))
    }

    pub fn command(&self) -> &TranscoderCommand {
        &self.command
    }
}

impl ProcessLauncher for FfmpegLauncher {
    fn launch(
        &self,
        source: &SourceDescriptor,
        output: &OutputDescriptor,
    ) -> Result<Box<dyn TranscoderProcess>, LaunchError> {
        let program = self.command.program();
        let args = self.command.args(source, output);
        debug!(command = %self.command.render(source, output), "spawning transcoder");

        let mut command = Command::new(program);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn().map_err(|err| {
            if err.kind() == io::ErrorKind::NotFound {
                LaunchError::BinaryNotFound {
                    program: program.to_string(),
                }
            } else {
                LaunchError::SpawnFailed(err.to_string())
            }
        })?;
        let pid = child.id().ok_or_else(|| {
            LaunchError::SpawnFailed("process exited before a pid was assigned".into())
        })?;

        let tail = DiagnosticTail::new(DIAGNOSTIC_LINES);
        let mut drains = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            drains.push(tokio::spawn(drain_lines(stdout, tail.clone())));
        }
        if let Some(stderr) = child.stderr.take() {
            drains.push(tokio::spawn(drain_lines(stderr, tail.clone())));
        }

        info!(pid, source = %source, kind = source.kind(), "transcoder launched");
        Ok(Box::new(ChildProcess {
            child,
            pid,
            tail,
            drains,
        }))
    }
}

/// Bounded buffer of the most recent output lines.
#[derive(Clone)]
pub struct DiagnosticTail {
    lines: Arc<Mutex<VecDeque<String>>>,
    capacity: usize,
}

impl fmt::Debug for DiagnosticTail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiagnosticTail")
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl DiagnosticTail {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    pub fn push(&self, line: impl Into<String>) {
        let Ok(mut lines) = self.lines.lock() else {
            return;
        };
        if lines.len() == self.capacity {
            lines.pop_front();
        }
        lines.push_back(line.into());
    }

    pub fn snapshot(&self) -> String {
        match self.lines.lock() {
            Ok(lines) => lines.iter().cloned().collect::<Vec<_>>().join("\n"),
            Err(_) => String::new(),
        }
    }
}

async fn drain_lines<R>(reader: R, tail: DiagnosticTail)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end();
                if !line.is_empty() {
                    tail.push(line);
                }
            }
            Err(error) => {
                debug!(%error, "transcoder output stream closed");
                break;
            }
        }
    }
}

struct ChildProcess {
    child: Child,
    pid: u32,
    tail: DiagnosticTail,
    drains: Vec<JoinHandle<()>>,
}

#[async_trait::async_trait]
impl TranscoderProcess for ChildProcess {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn try_wait(&mut self) -> io::Result<Option<ExitStatus>> {
        self.child.try_wait()
    }

    async fn wait(&mut self) -> io::Result<ExitStatus> {
        self.child.wait().await
    }

    fn terminate(&mut self) -> io::Result<()> {
        #[cfg(unix)]
        {
            signal_group(self.pid, nix::sys::signal::Signal::SIGTERM)
        }
        #[cfg(not(unix))]
        {
            self.child.start_kill()
        }
    }

    fn kill(&mut self) -> io::Result<()> {
        #[cfg(unix)]
        signal_group(self.pid, nix::sys::signal::Signal::SIGKILL)?;
        match self.child.start_kill() {
            Err(err) if err.kind() != io::ErrorKind::InvalidInput => Err(err),
            _ => Ok(()),
        }
    }

    async fn diagnostics(&mut self) -> String {
        for handle in std::mem::take(&mut self.drains) {
            if timeout(DRAIN_TIMEOUT, handle).await.is_err() {
                debug!(pid = self.pid, "output drain still running; using partial output");
            }
        }
        self.tail.snapshot()
    }
}

#[cfg(unix)]
fn signal_group(pid: u32, signal: nix::sys::signal::Signal) -> io::Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::killpg;
    use nix::unistd::Pid;

    let pgid = i32::try_from(pid)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
    match killpg(Pid::from_raw(pgid), signal) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(errno) => Err(io::Error::from(errno)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn command() -> TranscoderCommand {
        TranscoderCommand::new(
            StreamSection::default(),
            EncodeSection::default(),
            TestPatternSection::default(),
        )
    }

    fn output() -> OutputDescriptor {
        OutputDescriptor::new("/srv/static", "stream.m3u8", "segment_%03d.ts")
    }

    fn position(args: &[String], flag: &str) -> Option<usize> {
        args.iter().position(|arg| arg == flag)
    }

    #[test]
    fn rtsp_forces_tcp_transport_before_input() {
        let args = command().args(
            &SourceDescriptor::Rtsp("rtsp://cam.local/live".into()),
            &output(),
        );
        let transport = position(&args, "-rtsp_transport").unwrap();
        assert_eq!(args[transport + 1], "tcp");
        let input = position(&args, "-i").unwrap();
        assert!(transport < input);
        assert_eq!(args[input + 1], "rtsp://cam.local/live");
        assert_eq!(args[position(&args, "-tune").unwrap() + 1], "zerolatency");
        assert_eq!(args[position(&args, "-c:a").unwrap() + 1], "aac");
    }

    #[test]
    fn local_file_omits_transport_flags() {
        let args = command().args(
            &SourceDescriptor::LocalFile(PathBuf::from("/media/clip.mp4")),
            &output(),
        );
        assert!(position(&args, "-rtsp_transport").is_none());
        assert_eq!(args[position(&args, "-i").unwrap() + 1], "/media/clip.mp4");
        assert!(position(&args, "-c:a").is_some());
    }

    #[test]
    fn test_pattern_uses_lavfi_without_audio() {
        let args = command().args(&SourceDescriptor::TestPattern, &output());
        assert_eq!(args[position(&args, "-f").unwrap() + 1], "lavfi");
        assert_eq!(
            args[position(&args, "-i").unwrap() + 1],
            "testsrc=size=640x480:rate=30"
        );
        assert!(position(&args, "-an").is_some());
        assert!(position(&args, "-c:a").is_none());
    }

    #[test]
    fn every_variant_writes_the_same_rolling_playlist() {
        let sources = [
            SourceDescriptor::Rtsp("rtsp://cam.local/live".into()),
            SourceDescriptor::LocalFile(PathBuf::from("/media/clip.mp4")),
            SourceDescriptor::TestPattern,
        ];
        for source in &sources {
            let args = command().args(source, &output());
            let tail: Vec<&str> = args[args.len() - 11..].iter().map(String::as_str).collect();
            assert_eq!(
                tail,
                vec![
                    "-f",
                    "hls",
                    "-hls_time",
                    "2",
                    "-hls_list_size",
                    "3",
                    "-hls_flags",
                    "delete_segments+append_list",
                    "-hls_segment_filename",
                    "/srv/static/segment_%03d.ts",
                    "/srv/static/stream.m3u8",
                ],
                "source {source}"
            );
        }
    }

    #[test]
    fn render_quotes_arguments_with_spaces() {
        let rendered = command().render(
            &SourceDescriptor::LocalFile(PathBuf::from("/media/my clip.mp4")),
            &output(),
        );
        assert!(rendered.starts_with("ffmpeg -hide_banner"));
        assert!(rendered.contains("'/media/my clip.mp4'"));
    }

    #[test]
    fn diagnostic_tail_keeps_most_recent_lines() {
        let tail = DiagnosticTail::new(2);
        tail.push("one");
        tail.push("two");
        tail.push("three");
        assert_eq!(tail.snapshot(), "two\nthree");
    }

    #[tokio::test]
    async fn missing_binary_maps_to_binary_not_found() {
        let mut stream = StreamSection::default();
        stream.ffmpeg = "/nonexistent/livecast-ffmpeg".into();
        let launcher = FfmpegLauncher::new(TranscoderCommand::new(
            stream,
            EncodeSection::default(),
            TestPatternSection::default(),
        ));
        let result = launcher.launch(&SourceDescriptor::TestPattern, &output());
        assert!(matches!(
            result,
            Err(LaunchError::BinaryNotFound { ref program }) if program == "/nonexistent/livecast-ffmpeg"
        ));
    }
}
