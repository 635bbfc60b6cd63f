#![allow(clippy::result_large_err)]

//! Controller for one long-running, stdin-driven external process.
//!
//! Output is drained by one reader task per pipe into unbounded channels.
//! The controlling side never blocks on a read: it writes menu selections,
//! then polls the stdout line count until it stops growing (quiescence) or
//! the session deadline passes.

pub mod tree;

use crate::core::error::AppError;
use crate::core::types::ErrorCategory;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::instrument::WithSubscriber;
use tracing::{debug, info, warn, Dispatch};

/// Menu selection that makes the tool exit.
pub const QUIT_COMMAND: &str = "0";

const LINE_ENDING: &str = if cfg!(windows) { "\r\n" } else { "\n" };

/// Time allowed for the child to exit after SIGTERM before escalating.
const EXIT_WAIT: Duration = Duration::from_millis(200);

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("executable {0} does not exist")]
    MissingExecutable(PathBuf),
    #[error("executable {0} lacks execute permission")]
    NotExecutable(PathBuf),
    #[error("failed to prepare working directory {path}: {source}")]
    WorkingDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to spawn {executable}: {source}")]
    Spawn {
        executable: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("child {0} pipe was not captured")]
    MissingPipe(&'static str),
    #[error("failed to write to process stdin: {0}")]
    Write(#[source] std::io::Error),
    #[error("process has not been started")]
    NotStarted,
    #[error("process was already terminated")]
    Terminated,
}

impl From<ProcessError> for AppError {
    fn from(err: ProcessError) -> Self {
        let code = match &err {
            ProcessError::MissingExecutable(_) | ProcessError::NotExecutable(_) => "PROC-001",
            ProcessError::WorkingDirectory { .. } => "PROC-002",
            ProcessError::Spawn { .. } | ProcessError::MissingPipe(_) => "PROC-003",
            ProcessError::Write(_) => "PROC-004",
            ProcessError::NotStarted | ProcessError::Terminated => "PROC-005",
        };
        let message = err.to_string();
        AppError::with_source(ErrorCategory::ProcessError, message, Box::new(err)).with_code(code)
    }
}

/// Settings for one process session.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessConfig {
    pub executable: PathBuf,
    /// Absolute budget measured from spawn.
    pub timeout: Duration,
    /// Interval between quiescence checks.
    pub poll_interval: Duration,
    /// Pause between spawn and the initial arguments.
    pub settle_delay: Duration,
    /// Pause after the quit command before signalling.
    pub grace_period: Duration,
    /// Name fragment of descendants killed on teardown; `None` kills all.
    pub descendant_pattern: Option<String>,
}

impl ProcessConfig {
    pub fn new<P: Into<PathBuf>>(executable: P) -> Self {
        Self {
            executable: executable.into(),
            timeout: Duration::from_secs(60),
            poll_interval: Duration::from_secs(1),
            settle_delay: Duration::from_millis(500),
            grace_period: Duration::from_millis(500),
            descendant_pattern: Some("alpha".to_string()),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Created,
    Running,
    Quiescent,
    Terminated,
}

struct Session {
    child: Child,
    pid: Option<u32>,
    stdin: Option<ChildStdin>,
    stdout: UnboundedReceiver<String>,
    stderr: UnboundedReceiver<String>,
    stdout_lines: Arc<AtomicUsize>,
    readers: Vec<JoinHandle<()>>,
    started: Instant,
}

impl Drop for Session {
    fn drop(&mut self) {
        for reader in &self.readers {
            reader.abort();
        }
    }
}

pub struct InteractiveProcess {
    config: ProcessConfig,
    working_dir: PathBuf,
    meltsfile: Option<String>,
    environment_file: Option<String>,
    dispatch: Dispatch,
    state: ProcessState,
    timed_out: bool,
    session: Option<Session>,
}

impl std::fmt::Debug for InteractiveProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InteractiveProcess")
            .field("callstring", &self.callstring())
            .field("state", &self.state)
            .field("timed_out", &self.timed_out)
            .finish()
    }
}

impl InteractiveProcess {
    /// Prepare a session; nothing is spawned until [`InteractiveProcess::start`].
    pub fn new<P: Into<PathBuf>>(config: ProcessConfig, working_dir: P, dispatch: Dispatch) -> Self {
        Self {
            config,
            working_dir: working_dir.into(),
            meltsfile: None,
            environment_file: None,
            dispatch,
            state: ProcessState::Created,
            timed_out: false,
            session: None,
        }
    }

    /// Input file passed as `-m` and entered as the first menu selection.
    pub fn meltsfile<S: Into<String>>(mut self, file: S) -> Self {
        self.meltsfile = Some(file.into());
        self
    }

    /// Environment file passed as `-f`.
    pub fn environment_file<S: Into<String>>(mut self, file: S) -> Self {
        self.environment_file = Some(file.into());
        self
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    /// Whether the session deadline forced termination.
    pub fn timed_out(&self) -> bool {
        self.timed_out
    }

    pub fn pid(&self) -> Option<u32> {
        self.session.as_ref().and_then(|session| session.pid)
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub fn elapsed(&self) -> Duration {
        self.session
            .as_ref()
            .map(|session| session.started.elapsed())
            .unwrap_or_default()
    }

    fn args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(meltsfile) = &self.meltsfile {
            args.push("-m".to_string());
            args.push(meltsfile.clone());
        }
        if let Some(environment_file) = &self.environment_file {
            args.push("-f".to_string());
            args.push(environment_file.clone());
        }
        args
    }

    fn init_args(&self) -> Vec<String> {
        match &self.meltsfile {
            Some(meltsfile) => vec!["1".to_string(), meltsfile.clone()],
            None => Vec::new(),
        }
    }

    /// Shell line that reproduces the invocation by hand.
    pub fn callstring(&self) -> String {
        let mut parts = vec![
            "cd".to_string(),
            self.working_dir.display().to_string(),
            "&&".to_string(),
            self.config.executable.display().to_string(),
        ];
        parts.extend(self.args());
        parts.join(" ")
    }

    /// Whether the child is still running.
    pub fn is_alive(&mut self) -> bool {
        match self.session.as_mut() {
            Some(session) => matches!(session.child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// Spawn the executable, start the reader tasks, then after the settle
    /// delay send the initial arguments.
    pub async fn start(&mut self) -> Result<(), ProcessError> {
        let dispatch = self.dispatch.clone();
        self.start_inner().with_subscriber(dispatch).await
    }

    async fn start_inner(&mut self) -> Result<(), ProcessError> {
        match self.state {
            ProcessState::Created => {}
            ProcessState::Terminated => return Err(ProcessError::Terminated),
            _ => return Ok(()),
        }
        let executable = resolve_executable(&self.config.executable)?;
        if !self.working_dir.is_dir() {
            debug!("Creating working directory {}", self.working_dir.display());
            std::fs::create_dir_all(&self.working_dir).map_err(|source| {
                ProcessError::WorkingDirectory {
                    path: self.working_dir.clone(),
                    source,
                }
            })?;
        }

        let mut command = Command::new(&executable);
        command
            .args(self.args())
            .current_dir(&self.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn().map_err(|source| ProcessError::Spawn {
            executable: executable.clone(),
            source,
        })?;
        let pid = child.id();
        let stdin = child.stdin.take().ok_or(ProcessError::MissingPipe("stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or(ProcessError::MissingPipe("stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or(ProcessError::MissingPipe("stderr"))?;

        let stdout_lines = Arc::new(AtomicUsize::new(0));
        let (stdout_tx, stdout_rx) = mpsc::unbounded_channel();
        let (stderr_tx, stderr_rx) = mpsc::unbounded_channel();
        let readers = vec![
            spawn_reader(stdout, stdout_tx, Some(stdout_lines.clone()), &self.dispatch),
            spawn_reader(stderr, stderr_tx, None, &self.dispatch),
        ];

        self.session = Some(Session {
            child,
            pid,
            stdin: Some(stdin),
            stdout: stdout_rx,
            stderr: stderr_rx,
            stdout_lines,
            readers,
            started: Instant::now(),
        });
        self.state = ProcessState::Running;
        debug!("Process started with ID {:?}", pid);
        debug!("Reproduce using: {}", self.callstring());

        tokio::time::sleep(self.config.settle_delay).await;
        let init_args = self.init_args();
        if !init_args.is_empty() {
            debug!("Passing initial variables: {}", init_args.join(" "));
            if let Err(err) = self.write_inner(&init_args, true, false).await {
                self.terminate_inner().await;
                return Err(err);
            }
        }
        Ok(())
    }

    /// Send each message as one line, optionally waiting for quiescence
    /// after each and echoing it with the drained output.
    ///
    /// Stops early, without error, when a wait hits the deadline.
    pub async fn write<I, M>(&mut self, messages: I, wait: bool, log: bool) -> Result<(), ProcessError>
    where
        I: IntoIterator<Item = M>,
        M: ToString,
    {
        let messages: Vec<String> = messages.into_iter().map(|m| m.to_string()).collect();
        let dispatch = self.dispatch.clone();
        self.write_inner(&messages, wait, log)
            .with_subscriber(dispatch)
            .await
    }

    async fn write_inner(&mut self, messages: &[String], wait: bool, log: bool) -> Result<(), ProcessError> {
        for message in messages {
            if self.state == ProcessState::Terminated {
                if self.timed_out {
                    debug!("Skipping '{}' after timeout", message.trim());
                    return Ok(());
                }
                return Err(ProcessError::Terminated);
            }
            self.send_line(message).await?;
            self.state = ProcessState::Running;
            if wait {
                self.wait_inner(self.config.poll_interval).await;
            }
            if log {
                info!("{}", message.trim());
                let output = self.read();
                if !output.is_empty() {
                    info!("\n{}", output);
                }
            }
        }
        Ok(())
    }

    async fn send_line(&mut self, message: &str) -> Result<(), ProcessError> {
        let session = self.session.as_mut().ok_or(ProcessError::NotStarted)?;
        let stdin = session.stdin.as_mut().ok_or(ProcessError::Terminated)?;
        let line = format!("{}{}", message.trim(), LINE_ENDING);
        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(ProcessError::Write)?;
        stdin.flush().await.map_err(ProcessError::Write)
    }

    /// Poll every `step` until stdout stops growing between two polls, or
    /// terminate once the session deadline has passed.
    pub async fn wait(&mut self, step: Duration) -> ProcessState {
        let dispatch = self.dispatch.clone();
        self.wait_inner(step).with_subscriber(dispatch).await
    }

    async fn wait_inner(&mut self, step: Duration) -> ProcessState {
        let (counter, started) = match &self.session {
            Some(session) if self.state != ProcessState::Terminated => {
                (session.stdout_lines.clone(), session.started)
            }
            _ => return self.state,
        };
        loop {
            let before = counter.load(Ordering::SeqCst);
            tokio::time::sleep(step).await;
            if started.elapsed() > self.config.timeout {
                warn!(
                    "Process timed out after {:.1} s: {}",
                    started.elapsed().as_secs_f64(),
                    self.callstring()
                );
                self.timed_out = true;
                self.terminate_inner().await;
                return self.state;
            }
            if counter.load(Ordering::SeqCst) == before {
                self.state = ProcessState::Quiescent;
                return self.state;
            }
        }
    }

    /// Drain queued stdout lines without blocking.
    pub fn read(&mut self) -> String {
        match self.session.as_mut() {
            Some(session) => drain(&mut session.stdout),
            None => String::new(),
        }
    }

    /// Drain queued stderr lines without blocking.
    pub fn read_errors(&mut self) -> String {
        match self.session.as_mut() {
            Some(session) => drain(&mut session.stderr),
            None => String::new(),
        }
    }

    /// Best-effort teardown of the child and the descendants it spawned.
    ///
    /// Quits through the menu, closes stdin, signals the process group and
    /// escalates to SIGKILL if it survives, then kills recorded descendants.
    /// Processes that are already gone count as success.
    pub async fn terminate(&mut self) {
        let dispatch = self.dispatch.clone();
        self.terminate_inner().with_subscriber(dispatch).await
    }

    async fn terminate_inner(&mut self) {
        if self.state == ProcessState::Terminated {
            return;
        }
        self.state = ProcessState::Terminated;
        let pattern = self.config.descendant_pattern.clone();
        let grace_period = self.config.grace_period;
        let Some(session) = self.session.as_mut() else {
            return;
        };

        let descendants = session
            .pid
            .map(|pid| tree::matching_descendants(pid, pattern.as_deref()))
            .unwrap_or_default();
        if !descendants.is_empty() {
            debug!(
                "Recorded descendants: {}",
                descendants
                    .iter()
                    .map(|p| format!("{}({})", p.name, p.pid))
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }

        if let Some(stdin) = session.stdin.as_mut() {
            let quit = format!("{}{}", QUIT_COMMAND, LINE_ENDING);
            let sent = match stdin.write_all(quit.as_bytes()).await {
                Ok(()) => stdin.flush().await,
                Err(err) => Err(err),
            };
            if let Err(err) = sent {
                debug!("Quit command not delivered: {}", err);
            }
            tokio::time::sleep(grace_period).await;
        }
        session.stdin = None;

        if !stop_child(session).await {
            warn!("Process {:?} did not exit after SIGKILL", session.pid);
        }

        for process in descendants {
            kill_descendant(&process);
        }
        for reader in &session.readers {
            reader.abort();
        }
        debug!("Process terminated after {:.1} s", session.started.elapsed().as_secs_f64());
    }
}

/// Bare command names are looked up on `PATH`, the way the spawn itself
/// would find them; anything else is checked where it points.
fn resolve_executable(executable: &Path) -> Result<PathBuf, ProcessError> {
    if executable.components().count() != 1 || executable.is_absolute() {
        validate_executable(executable)?;
        return Ok(executable.to_path_buf());
    }
    let paths = std::env::var_os("PATH").unwrap_or_default();
    std::env::split_paths(&paths)
        .filter(|dir| !dir.as_os_str().is_empty())
        .map(|dir| dir.join(executable))
        .find(|candidate| validate_executable(candidate).is_ok())
        .ok_or_else(|| ProcessError::MissingExecutable(executable.to_path_buf()))
}

fn validate_executable(executable: &Path) -> Result<(), ProcessError> {
    let metadata = std::fs::metadata(executable)
        .map_err(|_| ProcessError::MissingExecutable(executable.to_path_buf()))?;
    if !metadata.is_file() {
        return Err(ProcessError::MissingExecutable(executable.to_path_buf()));
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if metadata.permissions().mode() & 0o111 == 0 {
            return Err(ProcessError::NotExecutable(executable.to_path_buf()));
        }
    }
    Ok(())
}

fn spawn_reader<R>(
    stream: R,
    sender: UnboundedSender<String>,
    counter: Option<Arc<AtomicUsize>>,
    dispatch: &Dispatch,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let task = async move {
        let mut reader = BufReader::new(stream);
        let mut buffer = Vec::new();
        loop {
            buffer.clear();
            match reader.read_until(b'\n', &mut buffer).await {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buffer)
                        .trim_end_matches(['\n', '\r'])
                        .to_string();
                    if sender.send(line).is_err() {
                        break;
                    }
                    // Counted only once queued, so a quiescent read sees it.
                    if let Some(counter) = &counter {
                        counter.fetch_add(1, Ordering::SeqCst);
                    }
                }
                Err(err) => {
                    debug!("Output reader stopped: {}", err);
                    break;
                }
            }
        }
    };
    tokio::spawn(task.with_subscriber(dispatch.clone()))
}

fn drain(receiver: &mut UnboundedReceiver<String>) -> String {
    let mut output = String::new();
    while let Ok(line) = receiver.try_recv() {
        output.push_str(&line);
        output.push('\n');
    }
    output
}

/// Close out the direct child; returns false if it is still running.
async fn stop_child(session: &mut Session) -> bool {
    if matches!(session.child.try_wait(), Ok(Some(_))) {
        return true;
    }

    #[cfg(unix)]
    if let Some(pid) = session.pid {
        match tree::signals::signal_group(pid, tree::signals::SIGTERM) {
            Ok(tree::SignalOutcome::AlreadyGone) => debug!("Process group {} already gone", pid),
            Ok(tree::SignalOutcome::Delivered) => {}
            Err(err) => debug!("SIGTERM to process group {} failed: {}", pid, err),
        }
    }
    #[cfg(not(unix))]
    let _ = session.child.start_kill();

    if tokio::time::timeout(EXIT_WAIT, session.child.wait()).await.is_ok() {
        return true;
    }

    #[cfg(unix)]
    if let Some(pid) = session.pid {
        if let Err(err) = tree::signals::signal_group(pid, tree::signals::SIGKILL) {
            debug!("SIGKILL to process group {} failed: {}", pid, err);
        }
    }
    let _ = session.child.start_kill();
    tokio::time::timeout(EXIT_WAIT * 5, session.child.wait())
        .await
        .is_ok()
}

fn kill_descendant(process: &tree::ProcessInfo) {
    // The pid may have been reused since discovery.
    match tree::read_process(process.pid) {
        Some(current) if current.name == process.name => {}
        _ => return,
    }
    #[cfg(unix)]
    match tree::signals::signal_process(process.pid, tree::signals::SIGKILL) {
        Ok(tree::SignalOutcome::Delivered) => debug!("Killed {} ({})", process.name, process.pid),
        Ok(tree::SignalOutcome::AlreadyGone) => {}
        Err(err) => debug!("Could not kill {} ({}): {}", process.name, process.pid, err),
    }
}
