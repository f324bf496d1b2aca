//! External operation execution with timeouts and captured output.
//!
//! Nothing here returns an error for a failed command: spawn failures,
//! non-zero exits, and timeouts all come back as a [`CommandResult`]. Stages
//! decide what a failure means through [`ActionContext::run`].

use std::fmt;
use std::io::{self, Read, Write};
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};
use twinaos_core::util::{log_snippet, shell_quote};
use twinaos_core::{CommandConfig, InstallDefaults, Secret};

use crate::error::CommandError;
use crate::paths::TargetLayout;

const POLL_INTERVAL: Duration = Duration::from_millis(20);
/// How long buffered output may still be drained once the process has exited.
const DRAIN_GRACE: Duration = Duration::from_millis(250);

/// A program and its discrete arguments. Never passed through a shell.
#[derive(Clone, PartialEq, Eq)]
pub struct Operation {
    program: String,
    args: Vec<String>,
    stdin: Option<Secret>,
}

impl Operation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            stdin: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Feed `payload` to the process on stdin. The payload is never displayed.
    pub fn stdin(mut self, payload: Secret) -> Self {
        self.stdin = Some(payload);
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    pub fn stdin_payload(&self) -> Option<&Secret> {
        self.stdin.as_ref()
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {}", shell_quote(arg))?;
        }
        Ok(())
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("command", &self.to_string())
            .field("stdin", &self.stdin)
            .finish()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandResult {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl CommandResult {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            code: Some(0),
            stdout: stdout.into(),
            ..Self::default()
        }
    }

    pub fn failed(code: Option<i32>, stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            code,
            stderr: stderr.into(),
            ..Self::default()
        }
    }

    pub fn timeout() -> Self {
        Self {
            success: false,
            stderr: "command timed out".to_string(),
            timed_out: true,
            ..Self::default()
        }
    }

    /// Convert an unsuccessful result into the error a stage reports.
    pub fn into_checked(
        self,
        operation: &Operation,
        timeout: Duration,
    ) -> Result<CommandResult, CommandError> {
        if self.success {
            return Ok(self);
        }
        if self.timed_out {
            return Err(CommandError::Timeout {
                operation: operation.to_string(),
                timeout,
            });
        }
        let detail = match (self.code, self.stderr.trim()) {
            (Some(code), "") => format!("exit status {code}"),
            (Some(code), stderr) => format!("exit status {code}: {}", log_snippet(stderr)),
            (None, "") => "terminated by signal".to_string(),
            (None, stderr) => log_snippet(stderr),
        };
        Err(CommandError::Failure {
            operation: operation.to_string(),
            detail,
        })
    }
}

/// Executes one external operation and blocks until it finishes or times out.
pub trait CommandRunner: Send + Sync {
    fn execute(&self, operation: &Operation, timeout: Duration) -> CommandResult;
}

/// Runs operations on the host.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn execute(&self, operation: &Operation, timeout: Duration) -> CommandResult {
        let mut command = Command::new(operation.program());
        command
            .args(operation.arguments())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if operation.stdin_payload().is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            });
        // A dedicated process group lets a timeout kill the whole subtree.
        command.process_group(0);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(err) => {
                warn!(operation = %operation, ?err, "failed to spawn");
                return CommandResult::failed(None, format!("failed to start: {err}"));
            }
        };

        let deadline = Instant::now() + timeout;
        if let (Some(stdin), Some(payload)) = (child.stdin.take(), operation.stdin_payload()) {
            spawn_writer(stdin, payload.clone());
        }
        let (sender, receiver) = mpsc::channel();
        let mut streams = 0;
        if let Some(stdout) = child.stdout.take() {
            spawn_reader(stdout, Stream::Stdout, sender.clone());
            streams += 1;
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_reader(stderr, Stream::Stderr, sender.clone());
            streams += 1;
        }
        drop(sender);

        let finished = wait_with_deadline(&mut child, deadline);
        let Captured { stdout, stderr } = collect_output(&receiver, streams);

        match finished {
            Ok(Some(status)) => CommandResult {
                success: status.success(),
                code: status.code().or_else(|| status.signal().map(|sig| 128 + sig)),
                stdout,
                stderr,
                timed_out: false,
            },
            Ok(None) => {
                warn!(operation = %operation, timeout_ms = duration_ms(timeout), "command timed out");
                CommandResult {
                    stdout,
                    ..CommandResult::timeout()
                }
            }
            Err(err) => CommandResult::failed(None, format!("failed to wait: {err}")),
        }
    }
}

/// Logs every operation and reports success without touching the host.
#[derive(Debug, Default, Clone, Copy)]
pub struct DryRunRunner;

impl CommandRunner for DryRunRunner {
    fn execute(&self, operation: &Operation, _timeout: Duration) -> CommandResult {
        info!(operation = %operation, "dry run: skipped");
        CommandResult::ok("")
    }
}

/// Returns the exit status, or `None` when the deadline passed and the group was killed.
fn wait_with_deadline(
    child: &mut Child,
    deadline: Instant,
) -> io::Result<Option<std::process::ExitStatus>> {
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            kill_process_group(child.id());
            let _ = child.kill();
            let _ = child.wait();
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

fn kill_process_group(pid: u32) {
    let Ok(pid) = i32::try_from(pid) else {
        return;
    };
    if pid <= 0 {
        return;
    }
    unsafe {
        libc::kill(-pid, libc::SIGKILL);
    }
}

#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

#[derive(Debug, Default)]
struct Captured {
    stdout: String,
    stderr: String,
}

fn spawn_reader<R: Read + Send + 'static>(
    mut reader: R,
    stream: Stream,
    sender: Sender<(Stream, Vec<u8>)>,
) {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = reader.read_to_end(&mut buf);
        let _ = sender.send((stream, buf));
    });
}

fn spawn_writer<W: Write + Send + 'static>(mut writer: W, payload: Secret) {
    thread::spawn(move || {
        // Dropping the writer closes stdin so the child sees EOF.
        let _ = writer.write_all(payload.expose().as_bytes());
    });
}

/// Gather the output of an exited process.
///
/// A descendant that left the process group can hold the pipes open long after
/// the child exited; its readers are abandoned and the output gathered so far is returned.
fn collect_output(receiver: &Receiver<(Stream, Vec<u8>)>, mut streams: usize) -> Captured {
    let limit = Instant::now() + DRAIN_GRACE;
    let mut captured = Captured::default();
    while streams > 0 {
        let wait = limit.saturating_duration_since(Instant::now());
        match receiver.recv_timeout(wait) {
            Ok((stream, bytes)) => {
                let text = String::from_utf8_lossy(&bytes).into_owned();
                match stream {
                    Stream::Stdout => captured.stdout = text,
                    Stream::Stderr => captured.stderr = text,
                }
                streams -= 1;
            }
            Err(_) => {
                debug!(open = streams, "output pipes still held open; returning partial output");
                break;
            }
        }
    }
    captured
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Everything a stage needs to touch the host: the runner, the target layout, and limits.
pub struct ActionContext<'a> {
    pub runner: &'a dyn CommandRunner,
    pub layout: &'a TargetLayout,
    pub install: &'a InstallDefaults,
    pub commands: &'a CommandConfig,
}

impl ActionContext<'_> {
    /// Run with the default timeout and fail on any unsuccessful result.
    pub fn run(&self, operation: Operation) -> Result<CommandResult, CommandError> {
        self.run_with_timeout(operation, self.commands.timeout())
    }

    pub fn run_with_timeout(
        &self,
        operation: Operation,
        timeout: Duration,
    ) -> Result<CommandResult, CommandError> {
        debug!(operation = %operation, "running");
        let result = self.runner.execute(&operation, timeout);
        if !result.stdout.trim().is_empty() {
            debug!(operation = %operation, stdout = %log_snippet(&result.stdout), "output");
        }
        result.into_checked(&operation, timeout).inspect_err(|err| {
            warn!(%err, "operation failed");
        })
    }

    /// Run `program` with `args` inside the target root.
    pub fn chroot_operation<I, S>(&self, program: &str, args: I) -> Operation
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Operation::new("chroot")
            .arg(self.layout.root().display().to_string())
            .arg(program)
            .args(args)
    }
}
