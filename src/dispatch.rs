//! Classifies each agent response and routes it to the [`Aggregator`].
//!
//! ```text
//! Ready ──send──▶ Dispatched ──first line──▶ Draining ──FinalReply / fatal / EOF──▶ Done
//! ```
//!
//! The handshake happens in [`session::handshake`](crate::session::handshake)
//! before a dispatcher exists, so a new dispatcher starts in `Ready`.

use std::fmt;

use crate::aggregate::{Aggregator, Snapshot};
use crate::error::SessionError;
use crate::protocol::{self, Request, Response};
use crate::session::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Ready,
    Dispatched,
    Draining,
    Done,
}

/// How the dispatcher reached `Done`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// `FinalReply` was observed.
    Completed,
    /// The agent reported a critical `UserError`.
    CriticalError { message: String },
    /// A line could not be decoded or arrived out of order.
    ProtocolError { reason: String, line: String },
    /// The agent's output ended before `FinalReply`.
    PrematureClose,
    /// Reading from the agent failed.
    TransportFailed { error: String },
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Completed => write!(f, "completed"),
            Outcome::CriticalError { message } => write!(f, "critical error: {message}"),
            Outcome::ProtocolError { reason, line } => {
                write!(f, "protocol error: {reason}: {line}")
            }
            Outcome::PrematureClose => {
                write!(f, "parallel ssh agent closed its output before the final reply")
            }
            Outcome::TransportFailed { error } => write!(f, "failed reading from agent: {error}"),
        }
    }
}

/// Final result of one session.
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub outcome: Outcome,
    pub snapshot: Snapshot,
}

#[derive(Debug)]
pub struct Dispatcher {
    state: State,
    outcome: Option<Outcome>,
    aggregator: Aggregator,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            state: State::Ready,
            outcome: None,
            aggregator: Aggregator::new(),
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn outcome(&self) -> Option<&Outcome> {
        self.outcome.as_ref()
    }

    pub fn snapshot(&self) -> Snapshot {
        self.aggregator.snapshot()
    }

    /// Record that the request has been written to the agent.
    pub fn mark_dispatched(&mut self) {
        if self.state == State::Ready {
            self.transition(State::Dispatched);
        }
    }

    /// Handle one raw line. Returns the outcome once the dispatcher is `Done`.
    pub fn feed(&mut self, line: &str) -> Option<&Outcome> {
        match self.state {
            State::Done => return self.outcome.as_ref(),
            State::Ready => {
                return self.finish(Outcome::ProtocolError {
                    reason: "response before request was sent".to_string(),
                    line: line.to_string(),
                });
            }
            State::Dispatched => self.transition(State::Draining),
            State::Draining => {}
        }

        let response = match protocol::decode(line) {
            Ok(response) => response,
            Err(e) => {
                return self.finish(Outcome::ProtocolError {
                    reason: e.reason(),
                    line: e.line().to_string(),
                });
            }
        };

        match response {
            Response::ConnectionProgress(progress) => {
                self.aggregator.record_progress(&progress.connected_host);
                None
            }
            Response::UserError(err) if err.is_critical => {
                self.finish(Outcome::CriticalError { message: err.message })
            }
            Response::UserError(err) => {
                self.aggregator.record_warning(&err.message);
                None
            }
            Response::Reply(reply) => {
                self.aggregator.record_reply(reply);
                None
            }
            Response::FinalReply(final_reply) => {
                self.aggregator.finalize(&final_reply);
                self.finish(Outcome::Completed)
            }
            Response::InitializeComplete(_) => self.finish(Outcome::ProtocolError {
                reason: "duplicate InitializeComplete".to_string(),
                line: line.to_string(),
            }),
        }
    }

    /// The agent's output ended.
    pub fn close(&mut self) {
        if self.state != State::Done {
            self.finish(Outcome::PrematureClose);
        }
    }

    /// Reading the next line failed.
    pub fn fail(&mut self, error: &std::io::Error) {
        if self.state != State::Done {
            self.finish(Outcome::TransportFailed {
                error: error.to_string(),
            });
        }
    }

    /// Consume the dispatcher. A dispatcher that never reached `Done`
    /// reports `PrematureClose`.
    pub fn into_report(mut self) -> Report {
        let outcome = self.outcome.take().unwrap_or(Outcome::PrematureClose);
        Report {
            outcome,
            snapshot: self.aggregator.snapshot(),
        }
    }

    fn finish(&mut self, outcome: Outcome) -> Option<&Outcome> {
        tracing::debug!(%outcome, "dispatch finished");
        self.transition(State::Done);
        self.outcome = Some(outcome);
        self.outcome.as_ref()
    }

    fn transition(&mut self, next: State) {
        tracing::debug!(from = ?self.state, to = ?next, "dispatch state");
        self.state = next;
    }
}

/// Send `request` and drain responses until the dispatcher is `Done`.
///
/// Expects the handshake to have succeeded already. Only a failure to write
/// the request is returned as an error; everything after that ends up in the
/// report's [`Outcome`].
pub fn drive<T: Transport + ?Sized>(
    transport: &mut T,
    request: &Request,
) -> Result<Report, SessionError> {
    let mut dispatcher = Dispatcher::new();
    let line = protocol::encode(request)?;
    tracing::debug!(line = line.trim_end(), "send");
    transport.send(&line)?;
    dispatcher.mark_dispatched();

    loop {
        match transport.read_line() {
            Ok(Some(line)) => {
                tracing::debug!(%line, "recv");
                if dispatcher.feed(&line).is_some() {
                    break;
                }
            }
            Ok(None) => {
                dispatcher.close();
                break;
            }
            Err(e) => {
                dispatcher.fail(&e);
                break;
            }
        }
    }
    Ok(dispatcher.into_report())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::tests::ScriptedTransport;
    use std::io;
    use std::time::Duration;

    const INIT: &str = r#"{"Type":"InitializeComplete","InitializeComplete":true}"#;
    const PROGRESS_H1: &str = r#"{"Type":"ConnectionProgress","ConnectedHost":"h1"}"#;
    const OK_H1: &str = r#"{"Type":"Reply","Hostname":"h1","Stdout":"up 3 days","Success":true}"#;
    const FAIL_H1: &str =
        r#"{"Type":"Reply","Hostname":"h1","Success":false,"ErrMsg":"conn refused"}"#;
    const FINAL_NONE: &str = r#"{"Type":"FinalReply","TotalTime":0.25,"TimedOutHosts":{}}"#;
    const FINAL_H2: &str = r#"{"Type":"FinalReply","TotalTime":10.0,"TimedOutHosts":{"h2":true}}"#;

    fn request() -> Request {
        Request::ssh("uptime", Duration::from_secs(10), vec!["h1".into(), "h2".into()])
    }

    fn run(lines: &[&str]) -> (Report, ScriptedTransport) {
        let mut t = ScriptedTransport::new(lines.iter().copied());
        let report = drive(&mut t, &request()).unwrap();
        (report, t)
    }

    #[test]
    fn sends_exactly_one_request() {
        let (_, t) = run(&[OK_H1, FINAL_NONE]);
        assert_eq!(t.sent.len(), 1);
        let sent: Request = serde_json::from_str(t.sent[0].trim_end()).unwrap();
        assert_eq!(sent, request());
    }

    #[test]
    fn completes_on_final_reply() {
        let (report, _) = run(&[PROGRESS_H1, OK_H1, FINAL_NONE]);
        assert_eq!(report.outcome, Outcome::Completed);
        assert!(report.snapshot.succeeded.contains("h1"));
        assert_eq!(report.snapshot.total_time, Some(0.25));
    }

    #[test]
    fn stops_reading_after_final_reply() {
        let (report, t) = run(&[FINAL_NONE, OK_H1, "garbage"]);
        assert_eq!(report.outcome, Outcome::Completed);
        assert_eq!(t.reads, 1);
        assert_eq!(t.lines.len(), 2);
        assert!(report.snapshot.succeeded.is_empty());
    }

    #[test]
    fn timed_out_host_without_reply() {
        let (report, _) = run(&[OK_H1, FINAL_H2]);
        assert_eq!(report.outcome, Outcome::Completed);
        assert!(report.snapshot.timed_out.contains("h2"));
        assert!(report.snapshot.succeeded.contains("h1"));
    }

    #[test]
    fn critical_user_error_is_fatal() {
        let critical = r#"{"Type":"UserError","IsCritical":true,"ErrorMsg":"auth failed"}"#;
        let (report, t) = run(&[critical, OK_H1, FINAL_NONE]);
        assert_eq!(
            report.outcome,
            Outcome::CriticalError {
                message: "auth failed".into()
            }
        );
        assert_eq!(t.reads, 1);
    }

    #[test]
    fn warning_does_not_alter_flow() {
        let warning = r#"{"Type":"UserError","IsCritical":false,"ErrorMsg":"slow"}"#;
        let (report, _) = run(&[warning, OK_H1, FINAL_NONE]);
        assert_eq!(report.outcome, Outcome::Completed);
        assert_eq!(report.snapshot.warnings, vec!["slow".to_string()]);
    }

    #[test]
    fn eof_before_final_reply_is_premature_close() {
        let (report, _) = run(&[PROGRESS_H1]);
        assert_eq!(report.outcome, Outcome::PrematureClose);
        assert_eq!(report.snapshot.connected, vec!["h1".to_string()]);
    }

    #[test]
    fn eof_right_after_request_is_premature_close() {
        let (report, _) = run(&[]);
        assert_eq!(report.outcome, Outcome::PrematureClose);
    }

    #[yare::parameterized(
        malformed       = { "not json at all" },
        unknown_variant = { r#"{"Type":"Heartbeat"}"# },
        second_init     = { INIT },
        invalid_utf8    = { "\u{FFFD}\u{FFFD} garbage" },
    )]
    fn protocol_errors_are_fatal(bad: &str) {
        let (report, t) = run(&[OK_H1, bad, FINAL_NONE]);
        match &report.outcome {
            Outcome::ProtocolError { line, .. } => assert_eq!(line, bad),
            other => panic!("expected ProtocolError, got {other:?}"),
        }
        assert_eq!(t.lines.len(), 1, "nothing after the bad line is read");
        assert!(report.snapshot.succeeded.contains("h1"), "partial state survives");
    }

    #[test]
    fn read_error_is_transport_failure() {
        let mut t = ScriptedTransport::new([OK_H1]);
        t.lines
            .push_back(Err(io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed")));
        let report = drive(&mut t, &request()).unwrap();
        assert!(
            matches!(&report.outcome, Outcome::TransportFailed { error } if error.contains("pipe closed")),
            "{:?}",
            report.outcome
        );
    }

    #[test]
    fn state_transitions() {
        let mut d = Dispatcher::new();
        assert_eq!(d.state(), State::Ready);
        d.mark_dispatched();
        assert_eq!(d.state(), State::Dispatched);
        assert!(d.feed(PROGRESS_H1).is_none());
        assert_eq!(d.state(), State::Draining);
        assert!(d.feed(OK_H1).is_none());
        assert_eq!(d.state(), State::Draining);
        assert_eq!(d.feed(FINAL_NONE), Some(&Outcome::Completed));
        assert_eq!(d.state(), State::Done);
    }

    #[test]
    fn done_is_terminal() {
        let mut d = Dispatcher::new();
        d.mark_dispatched();
        d.feed(FINAL_NONE);
        assert_eq!(d.feed(FAIL_H1), Some(&Outcome::Completed));
        d.close();
        assert_eq!(d.outcome(), Some(&Outcome::Completed));
        assert!(d.snapshot().failed.is_empty());
    }

    #[test]
    fn response_before_dispatch_is_protocol_error() {
        let mut d = Dispatcher::new();
        assert!(matches!(d.feed(OK_H1), Some(Outcome::ProtocolError { .. })));
    }

    #[test]
    fn undriven_dispatcher_reports_premature_close() {
        assert_eq!(Dispatcher::new().into_report().outcome, Outcome::PrematureClose);
    }

    #[test]
    fn same_stream_twice_gives_identical_reports() {
        let stream = [
            PROGRESS_H1,
            r#"{"Type":"UserError","IsCritical":false,"ErrorMsg":"slow"}"#,
            FAIL_H1,
            r#"{"Type":"Reply","Hostname":"h3","Success":true}"#,
            FINAL_H2,
        ];
        let (first, _) = run(&stream);
        let (second, _) = run(&stream);
        assert_eq!(first, second);
    }
}
