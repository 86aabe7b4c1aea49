//! Request/response channel to the external structural-parser worker.
//!
//! The worker is a long-lived child process driven over its standard streams.
//! Every message is base64-encoded and terminated by `\r\n`; the worker answers
//! each message with exactly one line encoded the same way.
//!
//! # Lifecycle
//!
//! ```text
//! NotStarted ──start()──▶ Running ◀──▶ Restarting
//!                            │
//!                          stop()
//!                            ▼
//!                         Stopped
//! ```
//!
//! A garbled or missing response forces a restart and yields an empty result
//! for that call. The worker accumulates per-session state, so it is recycled
//! after [`DEFAULT_RECYCLE_AFTER`] requests. One channel owns one worker and
//! serves one request at a time.

use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::ParserConfig;

/// Sent on startup; the worker must echo it back unchanged.
pub const START_SENTINEL: &str = "START_OF_TRANSMISSION";
/// Sent on shutdown; the worker must echo it back before exiting.
pub const END_SENTINEL: &str = "END_OF_TRANSMISSION";
/// Requests served by one worker process before it is recycled.
pub const DEFAULT_RECYCLE_AFTER: u32 = 10_000;

const FRAME_TERMINATOR: &[u8] = b"\r\n";

/// What the worker is asked to parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    /// Source text passed inline.
    Source,
    /// A single file, by absolute path.
    File,
    /// Every file under a directory, by absolute path, in one aggregate response.
    Directory,
}

impl RequestKind {
    pub fn prefix(self) -> &'static str {
        match self {
            RequestKind::Source => "PARSE_STRING_-_",
            RequestKind::File => "PARSE_FILE_-_",
            RequestKind::Directory => "PARSE_FOLDER_-_",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    NotStarted,
    Running,
    Restarting,
    Stopped,
}

#[derive(Debug, Error)]
pub enum ParserError {
    #[error("failed to launch parser worker `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("parser worker handshake failed: expected {expected:?}, got {got:?}")]
    Handshake { expected: &'static str, got: String },

    #[error("parser worker did not acknowledge shutdown; worker is unreachable")]
    Unreachable,

    #[error("parser channel is not running (state: {0:?})")]
    NotRunning(ChannelState),

    #[error("request payload is not ASCII")]
    NonAscii,
}

impl ParserError {
    /// Fatal errors mean the parser subsystem can no longer be trusted.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ParserError::NonAscii)
    }
}

/// A call/response link to a parser worker.
///
/// Requests block on the worker, so callers on an async runtime drive the
/// transport from the blocking pool.
pub trait ParserTransport: Send {
    /// Send one request and return the decoded response.
    ///
    /// An empty string means the worker failed on this input and has already
    /// been replaced; the caller may retry once.
    fn request(&mut self, kind: RequestKind, payload: &str) -> Result<String, ParserError>;
}

/// How to launch the worker process.
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

struct Worker {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl Worker {
    fn spawn(command: &WorkerCommand) -> Result<Self, ParserError> {
        let mut child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|source| ParserError::Spawn {
                command: command.display(),
                source,
            })?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(ParserError::Spawn {
                command: command.display(),
                source: std::io::Error::other("worker pipes unavailable"),
            });
        };

        Ok(Self {
            child,
            stdin,
            stdout: BufReader::new(stdout),
        })
    }

    /// Write one frame and read one frame back.
    fn exchange(&mut self, message: &str) -> std::io::Result<String> {
        let mut frame = STANDARD.encode(message.as_bytes()).into_bytes();
        frame.extend_from_slice(FRAME_TERMINATOR);
        self.stdin.write_all(&frame)?;
        self.stdin.flush()?;

        let mut line = Vec::new();
        let read = self.stdout.read_until(b'\n', &mut line)?;
        if read == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "worker closed its output",
            ));
        }

        let decoded = STANDARD
            .decode(trim_frame(&line))
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        String::from_utf8(decoded)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    fn shutdown(mut self) {
        drop(self.stdin);
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn trim_frame(line: &[u8]) -> &[u8] {
    let start = line
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(line.len());
    let end = line
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |i| i + 1);
    &line[start..end]
}

/// Channel to a single parser worker process.
pub struct ParserChannel {
    command: WorkerCommand,
    worker: Option<Worker>,
    state: ChannelState,
    recycle_after: u32,
    served: u32,
    restarts: u64,
}

impl ParserChannel {
    pub fn new(command: WorkerCommand) -> Self {
        Self {
            command,
            worker: None,
            state: ChannelState::NotStarted,
            recycle_after: DEFAULT_RECYCLE_AFTER,
            served: 0,
            restarts: 0,
        }
    }

    pub fn from_config(config: &ParserConfig) -> Self {
        Self::new(WorkerCommand::new(
            config.command.clone(),
            config.args.clone(),
        ))
        .with_recycle_after(config.recycle_after)
    }

    pub fn with_recycle_after(mut self, requests: u32) -> Self {
        self.recycle_after = requests.max(1);
        self
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    /// Number of times the worker process has been replaced.
    pub fn restarts(&self) -> u64 {
        self.restarts
    }

    /// Launch the worker and verify the start handshake.
    pub fn start(&mut self) -> Result<(), ParserError> {
        if self.state == ChannelState::Running {
            return Ok(());
        }
        self.worker = Some(self.launch()?);
        self.served = 0;
        self.state = ChannelState::Running;
        info!(command = %self.command.display(), "parser worker started");
        Ok(())
    }

    /// Ask the worker to terminate. Returns whether it acknowledged.
    pub fn stop(&mut self) -> bool {
        let Some(mut worker) = self.worker.take() else {
            self.state = ChannelState::Stopped;
            return false;
        };
        let acknowledged = matches!(worker.exchange(END_SENTINEL), Ok(ref reply) if reply == END_SENTINEL);
        worker.shutdown();
        self.state = ChannelState::Stopped;
        if !acknowledged {
            warn!("parser worker did not acknowledge shutdown");
        }
        acknowledged
    }

    /// Replace the worker process.
    ///
    /// Without `force` the current worker must acknowledge the termination
    /// sentinel first; if it does not, the worker is unreachable and the
    /// error is fatal.
    pub fn restart(&mut self, force: bool) -> Result<(), ParserError> {
        if self.state != ChannelState::Running {
            return Err(ParserError::NotRunning(self.state));
        }
        self.state = ChannelState::Restarting;

        if let Some(mut worker) = self.worker.take() {
            if !force {
                let acknowledged =
                    matches!(worker.exchange(END_SENTINEL), Ok(ref reply) if reply == END_SENTINEL);
                if !acknowledged {
                    worker.shutdown();
                    self.state = ChannelState::Stopped;
                    return Err(ParserError::Unreachable);
                }
            }
            worker.shutdown();
        }

        match self.launch() {
            Ok(worker) => {
                self.worker = Some(worker);
                self.served = 0;
                self.restarts += 1;
                self.state = ChannelState::Running;
                debug!(force, restarts = self.restarts, "parser worker restarted");
                Ok(())
            }
            Err(err) => {
                self.state = ChannelState::Stopped;
                Err(err)
            }
        }
    }

    fn launch(&self) -> Result<Worker, ParserError> {
        let mut worker = Worker::spawn(&self.command)?;
        match worker.exchange(START_SENTINEL) {
            Ok(reply) if reply == START_SENTINEL => Ok(worker),
            Ok(reply) => {
                worker.shutdown();
                Err(ParserError::Handshake {
                    expected: START_SENTINEL,
                    got: reply,
                })
            }
            Err(err) => {
                worker.shutdown();
                Err(ParserError::Handshake {
                    expected: START_SENTINEL,
                    got: format!("<{}>", err),
                })
            }
        }
    }
}

impl ParserTransport for ParserChannel {
    fn request(&mut self, kind: RequestKind, payload: &str) -> Result<String, ParserError> {
        if self.state != ChannelState::Running {
            return Err(ParserError::NotRunning(self.state));
        }
        if !payload.is_ascii() {
            return Err(ParserError::NonAscii);
        }

        self.served += 1;
        if self.served >= self.recycle_after {
            debug!(served = self.served, "recycling parser worker");
            self.restart(false)?;
        }

        let message = format!("{}{}", kind.prefix(), payload);
        let outcome = match self.worker.as_mut() {
            Some(worker) => worker.exchange(&message),
            None => Err(std::io::Error::other("worker missing")),
        };

        match outcome {
            Ok(reply) => Ok(reply),
            Err(err) => {
                warn!(kind = ?kind, error = %err, "parser worker response unusable; restarting");
                self.restart(true)?;
                Ok(String::new())
            }
        }
    }
}

impl Drop for ParserChannel {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.stop();
        }
    }
}
