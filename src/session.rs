//! Ownership of the parallel ssh agent subprocess.

use std::io::{self, BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

use crate::error::SessionError;
use crate::protocol::{self, InitializeComplete, Response};

/// Line-oriented, blocking access to an agent.
pub trait Transport {
    /// Next line without its terminator, or `None` at end of stream.
    fn read_line(&mut self) -> io::Result<Option<String>>;

    /// Write one already newline-terminated line and flush it.
    fn send(&mut self, line: &str) -> io::Result<()>;
}

/// A running agent process and both ends of its pipes.
///
/// The process is killed and reaped when the session is dropped, so every
/// exit path out of a dispatch loop releases it.
pub struct AgentSession {
    child: Child,
    writer: Option<ChildStdin>,
    reader: BufReader<ChildStdout>,
    terminated: bool,
}

impl AgentSession {
    /// Launch `program -l <user>` with piped stdin and stdout.
    pub fn start(program: &str, user: &str) -> Result<Self, SessionError> {
        let mut child = Command::new(program)
            .args(["-l", user])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|source| SessionError::Spawn {
                program: program.to_string(),
                source,
            })?;

        let (writer, reader) = match (child.stdin.take(), child.stdout.take()) {
            (Some(writer), Some(reader)) => (writer, reader),
            (writer, _) => {
                let _ = child.kill();
                let _ = child.wait();
                let missing = if writer.is_none() { "stdin" } else { "stdout" };
                return Err(SessionError::MissingPipe(missing));
            }
        };

        tracing::debug!(program, user, pid = child.id(), "agent started");
        Ok(Self {
            child,
            writer: Some(writer),
            reader: BufReader::new(reader),
            terminated: false,
        })
    }

    pub fn id(&self) -> u32 {
        self.child.id()
    }

    /// Stop the agent and close both pipes. Safe to call more than once.
    pub fn terminate(&mut self) {
        if self.terminated {
            return;
        }
        self.terminated = true;
        // Closing stdin first gives the agent a chance to notice EOF.
        self.writer.take();
        match self.child.try_wait() {
            Ok(Some(status)) => {
                tracing::debug!(pid = self.child.id(), %status, "agent already exited");
                return;
            }
            Ok(None) => {}
            Err(e) => tracing::debug!(pid = self.child.id(), error = %e, "agent status unknown"),
        }
        if let Err(e) = self.child.kill() {
            tracing::debug!(pid = self.child.id(), error = %e, "kill failed");
        }
        match self.child.wait() {
            Ok(status) => tracing::debug!(pid = self.child.id(), %status, "agent terminated"),
            Err(e) => tracing::warn!(pid = self.child.id(), error = %e, "failed to reap agent"),
        }
    }
}

impl Transport for AgentSession {
    fn read_line(&mut self) -> io::Result<Option<String>> {
        read_line_from(&mut self.reader)
    }

    fn send(&mut self, line: &str) -> io::Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "agent stdin closed"))?;
        writer.write_all(line.as_bytes())?;
        writer.flush()
    }
}

impl Drop for AgentSession {
    fn drop(&mut self) {
        self.terminate();
    }
}

/// Read one line with its terminator stripped.
///
/// Invalid UTF-8 is replaced rather than reported as an i/o error, so bytes
/// outside a JSON string reach the decoder and are rejected there as
/// malformed along with the line that carried them.
pub(crate) fn read_line_from<R: BufRead>(reader: &mut R) -> io::Result<Option<String>> {
    let mut bytes = Vec::new();
    if reader.read_until(b'\n', &mut bytes)? == 0 {
        return Ok(None);
    }
    while matches!(bytes.last(), Some(b'\n' | b'\r')) {
        bytes.pop();
    }
    let line = String::from_utf8(bytes)
        .unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned());
    Ok(Some(line))
}

/// Read the first line and require it to be `InitializeComplete{true}`.
pub fn handshake<T: Transport + ?Sized>(transport: &mut T) -> Result<(), SessionError> {
    let line = transport.read_line()?.ok_or(SessionError::NoOutput)?;
    tracing::debug!(%line, "recv");
    match protocol::decode(&line) {
        Ok(Response::InitializeComplete(InitializeComplete { ok: true })) => {
            tracing::debug!("agent initialized");
            Ok(())
        }
        _ => Err(SessionError::UnexpectedHandshake { line }),
    }
}
