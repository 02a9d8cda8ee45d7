//! Client for a parallel ssh agent that speaks line-delimited JSON over its
//! stdin and stdout.
//!
//! One invocation spawns the agent, waits for its handshake, sends a single
//! request, classifies every response until the final reply and turns the
//! per-host results into an exit status.

pub mod aggregate;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod protocol;
pub mod report;
pub mod session;

pub use aggregate::{Aggregator, HostStatus, Snapshot};
pub use config::{Args, Config};
pub use dispatch::{Dispatcher, Outcome, Report, State};
pub use error::{DecodeError, SessionError};
pub use protocol::{Request, Response};
pub use session::{AgentSession, Transport};

/// Run one request against a freshly spawned agent.
///
/// The agent is terminated before this returns, whichever way the session ends.
pub fn run(config: &Config) -> Result<Report, SessionError> {
    let mut agent = AgentSession::start(&config.agent, &config.user)?;
    let result = session::handshake(&mut agent)
        .and_then(|()| dispatch::drive(&mut agent, &config.request()));
    agent.terminate();
    result
}
