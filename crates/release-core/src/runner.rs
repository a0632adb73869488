//! External command execution with bounded output capture.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{ReleaseError, Result};

/// Default per-stream capture limit (10 MiB).
pub const DEFAULT_MAX_BUFFER: usize = 10 * 1024 * 1024;

/// Appended once to a stream that hit its capture limit.
pub const TRUNCATION_MARKER: &str = "\n... [output truncated]";

const READ_CHUNK: usize = 8 * 1024;
const MAX_PENDING_ECHO: usize = 8 * 1024;

/// Options for a single command invocation.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Log output at debug level instead of streaming it at info.
    pub silent: bool,
    /// Return non-zero exits as output rather than as an error.
    pub ignore_return_code: bool,
    /// Capture limit per stream, in bytes.
    pub max_buffer: usize,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            silent: false,
            ignore_return_code: true,
            max_buffer: DEFAULT_MAX_BUFFER,
        }
    }
}

impl RunOptions {
    pub fn silent() -> Self {
        Self {
            silent: true,
            ..Self::default()
        }
    }
}

/// Captured result of a finished command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Trimmed stdout.
    pub stdout: String,
    /// Trimmed stderr.
    pub stderr: String,
    /// Exit code; `-1` when the process was killed by a signal.
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// stderr if present, else stdout, else the exit code.
    pub fn failure_detail(&self) -> String {
        if !self.stderr.is_empty() {
            self.stderr.clone()
        } else if !self.stdout.is_empty() {
            self.stdout.clone()
        } else {
            format!("exit code {}", self.exit_code)
        }
    }
}

/// Runs external programs.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args` to completion.
    ///
    /// A non-zero exit is returned in [`CommandOutput::exit_code`] unless
    /// `options.ignore_return_code` is false.
    async fn run(&self, program: &str, args: &[String], options: &RunOptions)
        -> Result<CommandOutput>;
}

/// Runs commands as child processes via tokio.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        options: &RunOptions,
    ) -> Result<CommandOutput> {
        if options.silent {
            debug!(command = %render_command(program, args), "Running command");
        } else {
            info!("[command]{}", render_command(program, args));
        }

        let spawn_error = |source: std::io::Error| ReleaseError::CommandSpawn {
            program: program.to_string(),
            source,
        };

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(spawn_error)?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| spawn_error(std::io::Error::other("stdout was not captured")))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| spawn_error(std::io::Error::other("stderr was not captured")))?;

        let (stdout, stderr, status) = tokio::try_join!(
            capture_stream(stdout, options.max_buffer, options.silent),
            capture_stream(stderr, options.max_buffer, options.silent),
            child.wait(),
        )?;

        let output = CommandOutput {
            stdout,
            stderr,
            exit_code: status.code().unwrap_or(-1),
        };

        debug!(program, exit_code = output.exit_code, "Command finished");

        if !options.ignore_return_code && !output.success() {
            return Err(ReleaseError::CommandFailed {
                program: program.to_string(),
                exit_code: output.exit_code,
                detail: output.failure_detail(),
            });
        }

        Ok(output)
    }
}

/// Accumulates bytes up to a cap, then discards the rest.
#[derive(Debug)]
pub struct BoundedCapture {
    buf: Vec<u8>,
    cap: usize,
    truncated: bool,
}

impl BoundedCapture {
    pub fn new(cap: usize) -> Self {
        Self {
            buf: Vec::new(),
            cap,
            truncated: false,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        if self.truncated {
            return;
        }
        let room = self.cap.saturating_sub(self.buf.len());
        if chunk.len() <= room {
            self.buf.extend_from_slice(chunk);
        } else {
            self.buf.extend_from_slice(&chunk[..room]);
            self.truncated = true;
        }
    }

    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    /// Lossy UTF-8 text, marker appended if truncated, trimmed.
    pub fn finish(self) -> String {
        let mut text = String::from_utf8_lossy(&self.buf).into_owned();
        if self.truncated {
            text.push_str(TRUNCATION_MARKER);
        }
        text.trim().to_string()
    }
}

/// Echoes complete lines of a stream to the log as they arrive.
struct LineEcho {
    pending: Vec<u8>,
    silent: bool,
}

impl LineEcho {
    fn feed(&mut self, chunk: &[u8]) {
        for &byte in chunk {
            if byte == b'\n' {
                self.flush();
            } else {
                self.pending.push(byte);
                if self.pending.len() >= MAX_PENDING_ECHO {
                    self.flush();
                }
            }
        }
    }

    fn flush(&mut self) {
        let line = String::from_utf8_lossy(&self.pending);
        let line = line.trim_end_matches('\r');
        if self.silent {
            debug!(target: "sfp", "{line}");
        } else {
            info!(target: "sfp", "{line}");
        }
        self.pending.clear();
    }
}

async fn capture_stream<R>(mut reader: R, max_buffer: usize, silent: bool) -> std::io::Result<String>
where
    R: AsyncRead + Unpin,
{
    let mut capture = BoundedCapture::new(max_buffer);
    let mut echo = LineEcho {
        pending: Vec::new(),
        silent,
    };
    let mut chunk = vec![0u8; READ_CHUNK];

    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        echo.feed(&chunk[..n]);
        capture.push(&chunk[..n]);
    }
    if !echo.pending.is_empty() {
        echo.flush();
    }

    Ok(capture.finish())
}

/// Render a command line for logging with the `-t <token>` value hidden.
pub fn render_command(program: &str, args: &[String]) -> String {
    let mut rendered = String::from(program);
    let mut hide_next = false;
    for arg in args {
        rendered.push(' ');
        if hide_next {
            rendered.push_str("***");
            hide_next = false;
        } else {
            rendered.push_str(arg);
            hide_next = arg == "-t";
        }
    }
    rendered
}
