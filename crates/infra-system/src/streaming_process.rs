// Streaming process handle
// reason: tokio::process for async pipes, one reader task per stream (hexagonal adapter)
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use procline_core::application::constants::STREAM_DRAIN_TIMEOUT;
use procline_core::application::{ExitSignal, LineSignal, Subscription, WaitTimeout};
use procline_core::domain::{
    exit_code_from_status, CommandSpec, ExitWait, LaunchConfig, LifecycleState, ProcessState,
    UNKNOWN_EXIT_CODE,
};
use procline_core::port::ProcessProbe;
use procline_core::{ProcessError, Result};

use crate::line_stream::LineStream;
use crate::process_probe_impl::SysinfoProcessProbe;
use crate::standard_input::StandardInput;

/// Reply channel for a kill request handled by the exit watcher
type KillRequest = oneshot::Sender<std::io::Result<()>>;

/// What waiters observe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExitState {
    Running,
    Exited(i32),
    Disposed,
}

/// Exit bookkeeping shared by the handle and its exit watcher
///
/// Updated as soon as the OS reports the exit, independently of the exit
/// event, which waits for the output streams to drain first.
struct ExitTracker {
    has_exited: AtomicBool,
    state: watch::Sender<ExitState>,
}

impl ExitTracker {
    fn new() -> (Self, watch::Receiver<ExitState>) {
        let (state, rx) = watch::channel(ExitState::Running);
        let tracker = Self {
            has_exited: AtomicBool::new(false),
            state,
        };
        (tracker, rx)
    }

    /// has_exited is set before any waiter wakes
    fn record_exit(&self, exit_code: i32) {
        self.has_exited.store(true, Ordering::SeqCst);
        self.leave_running(ExitState::Exited(exit_code));
    }

    fn record_dispose(&self) {
        self.leave_running(ExitState::Disposed);
    }

    fn leave_running(&self, next: ExitState) {
        self.state.send_if_modified(|state| {
            if *state == ExitState::Running {
                *state = next;
                true
            } else {
                false
            }
        });
    }
}

/// Resources that only exist between start and dispose
struct Running {
    pid: Option<u32>,
    stdin: StandardInput,
    kill_tx: mpsc::UnboundedSender<KillRequest>,
    tasks: Vec<AbortHandle>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Handle to one external program with line-oriented output events
///
/// The handle owns the OS process exclusively. Output and error lines are
/// read by background tasks and published to subscribers as they arrive;
/// nothing blocks the caller until it asks to wait.
///
/// State transitions:
/// - Configured -> Started (start)
/// - Started -> Exited (OS exit, possibly caused by kill)
/// - any -> Disposed (dispose / drop)
///
/// # Example
/// ```ignore
/// let process = StreamingProcess::new(CommandSpec::new("sh").args(["-c", "echo hi"]))?;
/// process.on_output_line(|line| println!("{line:?}")).persist();
/// process.start().await?;
/// let exit_code = process.wait_for_exit().await?;
/// ```
pub struct StreamingProcess {
    config: LaunchConfig,
    probe: Arc<dyn ProcessProbe>,
    output: LineSignal,
    error: LineSignal,
    exit: ExitSignal,
    has_started: AtomicBool,
    disposed: AtomicBool,
    tracker: Arc<ExitTracker>,
    exit_rx: watch::Receiver<ExitState>,
    running: Mutex<Option<Running>>,
}

impl StreamingProcess {
    /// Configure a handle with the sysinfo-backed state probe
    ///
    /// # Errors
    /// - ProcessError::InvalidConfiguration if the command cannot be launched
    pub fn new(spec: CommandSpec) -> Result<Self> {
        Self::with_probe(spec, Arc::new(SysinfoProcessProbe::new()))
    }

    /// Configure a handle with a custom state probe
    ///
    /// # Arguments
    /// * `spec` - Program, arguments, working directory and environment
    /// * `probe` - Source of `current_state` snapshots
    pub fn with_probe(spec: CommandSpec, probe: Arc<dyn ProcessProbe>) -> Result<Self> {
        let config = LaunchConfig::from_spec(&spec)?;
        let (tracker, exit_rx) = ExitTracker::new();

        debug!(program = %config.program(), "Process handle configured");

        Ok(Self {
            config,
            probe,
            output: LineSignal::new("stdout"),
            error: LineSignal::new("stderr"),
            exit: ExitSignal::new(),
            has_started: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
            tracker: Arc::new(tracker),
            exit_rx,
            running: Mutex::new(None),
        })
    }

    pub fn has_started(&self) -> bool {
        self.has_started.load(Ordering::SeqCst)
    }

    pub fn has_exited(&self) -> bool {
        self.tracker.has_exited.load(Ordering::SeqCst)
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    pub fn lifecycle_state(&self) -> LifecycleState {
        if self.is_disposed() {
            LifecycleState::Disposed
        } else if self.has_exited() {
            LifecycleState::Exited
        } else if self.has_started() {
            LifecycleState::Started
        } else {
            LifecycleState::Configured
        }
    }

    /// OS process id, once started
    pub fn pid(&self) -> Option<u32> {
        lock(&self.running).as_ref().and_then(|r| r.pid)
    }

    /// Exit code of a process that has exited
    ///
    /// # Errors
    /// - ProcessError::NotStarted before start
    /// - ProcessError::NotExited while the process is still running
    /// - ProcessError::Disposed if disposed before the exit was observed
    pub fn exit_code(&self) -> Result<i32> {
        self.ensure_started("determine the exit code")?;

        match *self.exit_rx.borrow() {
            ExitState::Exited(code) => Ok(code),
            ExitState::Running => Err(ProcessError::NotExited),
            ExitState::Disposed => Err(ProcessError::Disposed),
        }
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Launch the process
    ///
    /// Returns `Ok(true)` on the first successful launch and `Ok(false)` for
    /// every later call (including after dispose), without side effects.
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    /// - ProcessError::Spawn if the OS refuses to launch the program
    pub async fn start(&self) -> Result<bool> {
        if !self.lifecycle_state().can_start() {
            return Ok(false);
        }

        let mut running = lock(&self.running);
        // Lost a race against a concurrent start or dispose
        if !self.lifecycle_state().can_start() {
            return Ok(false);
        }

        let mut child = build_command(&self.config)
            .spawn()
            .map_err(|source| ProcessError::Spawn {
                program: self.config.program().to_string(),
                source,
            })?;

        let pid = child.id();
        let stdin = StandardInput::new(child.stdin.take());

        let stdout_reader = child
            .stdout
            .take()
            .map(|stdout| tokio::spawn(pump_lines(stdout, self.output.clone())));
        let stderr_reader = child
            .stderr
            .take()
            .map(|stderr| tokio::spawn(pump_lines(stderr, self.error.clone())));

        let (kill_tx, kill_rx) = mpsc::unbounded_channel();

        let readers: Vec<JoinHandle<()>> = [stdout_reader, stderr_reader]
            .into_iter()
            .flatten()
            .collect();
        let mut tasks: Vec<AbortHandle> = readers.iter().map(JoinHandle::abort_handle).collect();

        let watcher = tokio::spawn(watch_exit(
            child,
            kill_rx,
            readers,
            self.tracker.clone(),
            self.exit.clone(),
            pid,
        ));
        tasks.push(watcher.abort_handle());

        *running = Some(Running {
            pid,
            stdin,
            kill_tx,
            tasks,
        });

        self.has_started.store(true, Ordering::SeqCst);

        info!(
            program = %self.config.program(),
            args = ?self.config.spec().args,
            pid = ?pid,
            "Process started"
        );

        Ok(true)
    }

    /// Forcibly terminate the process
    ///
    /// Returns once the kill signal has been delivered; the exit itself is
    /// observed through the exit event and the wait operations. Killing a
    /// process that already exited is a no-op.
    ///
    /// # Errors
    /// - ProcessError::NotStarted before start
    /// - ProcessError::Disposed after dispose
    /// - ProcessError::Kill if the OS rejects the signal
    pub async fn kill(&self) -> Result<()> {
        self.ensure_started("kill it")?;

        let kill_tx = lock(&self.running)
            .as_ref()
            .map(|r| r.kill_tx.clone())
            .ok_or(ProcessError::Disposed)?;

        let (reply_tx, reply_rx) = oneshot::channel();
        if kill_tx.send(reply_tx).is_err() {
            debug!(pid = ?self.pid(), "Kill requested after exit; nothing to do");
            return Ok(());
        }

        match reply_rx.await {
            Ok(result) => {
                result.map_err(ProcessError::Kill)?;
                info!(pid = ?self.pid(), "Kill signal sent");
                Ok(())
            }
            // Child was reaped before the request was handled
            Err(_) => Ok(()),
        }
    }

    /// Release pipes, background tasks and the OS handle
    ///
    /// Idempotent. Does not kill a running process and does not change
    /// `has_started` / `has_exited`. Pending and later waits fail with
    /// `ProcessError::Disposed` unless the exit was already observed.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Some(running) = lock(&self.running).take() {
            for task in &running.tasks {
                task.abort();
            }
            debug!(pid = ?running.pid, "Process handle disposed");
        }

        self.tracker.record_dispose();
    }

    // ------------------------------------------------------------------
    // Input / state
    // ------------------------------------------------------------------

    /// Writable standard input of the started process
    ///
    /// # Errors
    /// - ProcessError::NotStarted before start
    /// - ProcessError::Disposed after dispose
    pub fn standard_input(&self) -> Result<StandardInput> {
        self.ensure_started("write standard input")?;

        lock(&self.running)
            .as_ref()
            .map(|r| r.stdin.clone())
            .ok_or(ProcessError::Disposed)
    }

    /// Snapshot of live OS attributes
    ///
    /// # Errors
    /// - ProcessError::NotStarted before start
    /// - ProcessError::ProcessUnavailable once the process has exited
    pub async fn current_state(&self) -> Result<ProcessState> {
        self.ensure_started("determine the current state")?;

        let pid = self.pid().ok_or(ProcessError::Disposed)?;

        // The pid may already belong to someone else after reaping
        if self.has_exited() {
            return Err(ProcessError::ProcessUnavailable(pid));
        }

        self.probe.snapshot(pid).await
    }

    // ------------------------------------------------------------------
    // Waiting
    // ------------------------------------------------------------------

    /// Wait until the process exits and return its exit code
    ///
    /// Returns as soon as the OS reports the exit. Lines still buffered in the
    /// pipes may be delivered afterwards; the exit event (`on_exited`) and the
    /// end of the line streams come after the last line.
    ///
    /// # Errors
    /// - ProcessError::NotStarted before start
    /// - ProcessError::Disposed if the handle is disposed before the exit
    pub async fn wait_for_exit(&self) -> Result<i32> {
        self.ensure_started("wait for the exit")?;

        let mut rx = self.exit_rx.clone();
        let state = *rx
            .wait_for(|state| *state != ExitState::Running)
            .await
            .map_err(|_| ProcessError::Disposed)?;

        match state {
            ExitState::Exited(code) => Ok(code),
            _ => Err(ProcessError::Disposed),
        }
    }

    /// Wait at most `milliseconds` for the exit
    ///
    /// Never fails on expiry: returns `ExitWait { exited: false, exit_code: 0 }`.
    /// Convert the result with `.into()` for an `(exited, exit_code)` tuple.
    pub async fn wait_for_exit_millis(&self, milliseconds: u32) -> Result<ExitWait> {
        self.wait_for_exit_timeout(milliseconds).await
    }

    /// Wait at most `timeout` for the exit
    ///
    /// The timeout is clamped into `[0, i32::MAX]` milliseconds first, so
    /// `Duration::MAX` or a negative `chrono::Duration` are both accepted.
    pub async fn wait_for_exit_timeout<T: WaitTimeout>(&self, timeout_value: T) -> Result<ExitWait> {
        let millis = timeout_value.to_wait_millis();
        self.ensure_started("wait for the exit")?;

        match timeout(Duration::from_millis(u64::from(millis)), self.wait_for_exit()).await {
            Ok(result) => result.map(ExitWait::exited),
            Err(_) => {
                debug!(pid = ?self.pid(), timeout_ms = %millis, "Bounded wait elapsed");
                Ok(ExitWait::pending())
            }
        }
    }

    // ------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------

    /// Call `handler` for every stdout line, then once with `None`
    pub fn on_output_line<F>(&self, handler: F) -> Subscription
    where
        F: Fn(Option<&str>) + Send + Sync + 'static,
    {
        self.output.subscribe(handler)
    }

    /// Call `handler` for every stderr line, then once with `None`
    pub fn on_error_line<F>(&self, handler: F) -> Subscription
    where
        F: Fn(Option<&str>) + Send + Sync + 'static,
    {
        self.error.subscribe(handler)
    }

    /// Call `handler` with the exit code, exactly once
    pub fn on_exited<F>(&self, handler: F) -> Subscription
    where
        F: Fn(i32) + Send + Sync + 'static,
    {
        self.exit.subscribe(handler)
    }

    /// Stdout lines as an async stream
    pub fn output_lines(&self) -> LineStream {
        LineStream::subscribe(&self.output)
    }

    /// Stderr lines as an async stream
    pub fn error_lines(&self) -> LineStream {
        LineStream::subscribe(&self.error)
    }

    pub fn output_signal(&self) -> &LineSignal {
        &self.output
    }

    pub fn error_signal(&self) -> &LineSignal {
        &self.error
    }

    pub fn exit_signal(&self) -> &ExitSignal {
        &self.exit
    }

    fn ensure_started(&self, operation: &'static str) -> Result<()> {
        if self.has_started() {
            Ok(())
        } else if self.is_disposed() {
            Err(ProcessError::Disposed)
        } else {
            Err(ProcessError::NotStarted(operation))
        }
    }
}

impl Drop for StreamingProcess {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for StreamingProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingProcess")
            .field("program", &self.config.program())
            .field("state", &self.lifecycle_state())
            .field("pid", &self.pid())
            .finish()
    }
}

/// Translate the normalized config into a tokio Command
fn build_command(config: &LaunchConfig) -> Command {
    let spec = config.spec();
    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args);

    if let Some(ref dir) = spec.working_dir {
        cmd.current_dir(dir);
    }

    if spec.env_clear {
        cmd.env_clear();
    }

    for key in &spec.env_remove {
        cmd.env_remove(key);
    }

    cmd.envs(&spec.env);

    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    // Dispose releases the handle; it never terminates the child
    cmd.kill_on_drop(false);

    // CREATE_NO_WINDOW
    #[cfg(windows)]
    cmd.creation_flags(0x0800_0000);

    cmd
}

/// Read one stream to end-of-file, publishing each line and then `None`
///
/// Bytes are decoded lossily, so invalid UTF-8 never ends the stream early.
async fn pump_lines<R>(reader: R, signal: LineSignal)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    let mut count: u64 = 0;

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(trim_line_ending(&buf));
                signal.publish(Some(line.as_ref()));
                count += 1;
            }
            Err(e) => {
                warn!(stream = %signal.name(), error = %e, "Failed to read from child stream");
                break;
            }
        }
    }

    signal.publish(None);
    debug!(stream = %signal.name(), lines = %count, "Stream reached end-of-file");
}

fn trim_line_ending(buf: &[u8]) -> &[u8] {
    let buf = buf.strip_suffix(b"\n").unwrap_or(buf);
    buf.strip_suffix(b"\r").unwrap_or(buf)
}

/// Own the child until it exits and serve kill requests
///
/// The exit is recorded for waiters as soon as the child is reaped. The exit
/// event follows once both readers hit end-of-file, or after
/// `STREAM_DRAIN_TIMEOUT` when something else still holds a pipe open.
async fn watch_exit(
    mut child: Child,
    mut kill_rx: mpsc::UnboundedReceiver<KillRequest>,
    readers: Vec<JoinHandle<()>>,
    tracker: Arc<ExitTracker>,
    exit: ExitSignal,
    pid: Option<u32>,
) {
    let status = loop {
        tokio::select! {
            status = child.wait() => break status,
            Some(reply) = kill_rx.recv() => {
                let _ = reply.send(child.start_kill());
            }
        }
    };

    let exit_code = match status {
        Ok(status) => exit_code_from_status(&status),
        Err(e) => {
            warn!(pid = ?pid, error = %e, "Failed to wait for process");
            UNKNOWN_EXIT_CODE
        }
    };

    // Nothing left to signal: queued and later kill requests resolve at once
    drop(kill_rx);

    tracker.record_exit(exit_code);
    info!(pid = ?pid, exit_code = %exit_code, "Process exited");

    // Let buffered lines reach subscribers before the exit event
    let drain = futures::future::join_all(readers);
    if timeout(STREAM_DRAIN_TIMEOUT, drain).await.is_err() {
        warn!(
            pid = ?pid,
            "Output streams still open after exit (inherited by a child?); publishing exit"
        );
    }

    exit.publish(exit_code);
    debug!(pid = ?pid, "Exit event published");
}
