//! Exit status and operator summary for a finished session.

use std::collections::BTreeSet;
use std::fmt::Write as _;

use crate::aggregate::Snapshot;
use crate::dispatch::{Outcome, Report};

pub const EXIT_SUCCESS: i32 = 0;
/// Bad command line; clap reports these before a session exists.
pub const EXIT_USAGE: i32 = 1;
pub const EXIT_FAILURE: i32 = 2;
/// The agent could not be spawned or failed its handshake.
pub const EXIT_STARTUP: i32 = 3;

impl Report {
    pub fn exit_code(&self) -> i32 {
        exit_code(&self.outcome, &self.snapshot)
    }

    /// One-line reason for a non-zero exit, `None` when everything succeeded.
    pub fn failure(&self) -> Option<String> {
        match &self.outcome {
            Outcome::Completed if !self.snapshot.timed_out.is_empty() => {
                Some(format!("some hosts timed out: {}", join(&self.snapshot.timed_out)))
            }
            Outcome::Completed if !self.snapshot.failed.is_empty() => {
                Some(format!("failed hosts: {}", join(&self.snapshot.failed)))
            }
            Outcome::Completed => None,
            other => Some(other.to_string()),
        }
    }

    pub fn summary(&self) -> String {
        summary(&self.snapshot)
    }
}

pub fn exit_code(outcome: &Outcome, snapshot: &Snapshot) -> i32 {
    match outcome {
        Outcome::Completed if snapshot.timed_out.is_empty() && snapshot.failed.is_empty() => {
            EXIT_SUCCESS
        }
        Outcome::Completed
        | Outcome::CriticalError { .. }
        | Outcome::ProtocolError { .. }
        | Outcome::PrematureClose
        | Outcome::TransportFailed { .. } => EXIT_FAILURE,
    }
}

/// Per-host status lines followed by a totals line.
pub fn summary(snapshot: &Snapshot) -> String {
    let mut out = String::from("summary:\n");
    match snapshot.total_time {
        Some(secs) => {
            let _ = writeln!(out, "\texecution time: {secs:.6} s");
        }
        None => out.push_str("\texecution time: unknown\n"),
    }
    for (label, hosts) in [
        ("succeeded", &snapshot.succeeded),
        ("failed", &snapshot.failed),
        ("timed out", &snapshot.timed_out),
    ] {
        if !hosts.is_empty() {
            let _ = writeln!(out, "\t{label} ({}): {}", hosts.len(), join(hosts));
        }
    }
    for host in &snapshot.succeeded {
        let _ = writeln!(out, "\t[{host}] succeeded");
    }
    for host in &snapshot.failed {
        match snapshot.failure_messages.get(host) {
            Some(msg) if !msg.is_empty() => {
                let _ = writeln!(out, "\t[{host}] failed: {msg}");
            }
            _ => {
                let _ = writeln!(out, "\t[{host}] failed");
            }
        }
    }
    for host in &snapshot.timed_out {
        let _ = writeln!(out, "\t[{host}] timed out");
    }
    let _ = writeln!(
        out,
        "\ttotals: {} succeeded, {} failed, {} timed out",
        snapshot.succeeded.len(),
        snapshot.failed.len(),
        snapshot.timed_out.len()
    );
    out
}

fn join(hosts: &BTreeSet<String>) -> String {
    hosts.iter().map(String::as_str).collect::<Vec<_>>().join(" ")
}
