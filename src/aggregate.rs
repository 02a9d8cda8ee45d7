//! Per-host outcome bookkeeping.

use std::collections::{BTreeMap, BTreeSet};

use crate::protocol::{FinalReply, Reply};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostStatus {
    Succeeded,
    Failed,
    TimedOut,
}

/// Accumulates replies and timeout information as they arrive.
#[derive(Debug, Default)]
pub struct Aggregator {
    replies: BTreeMap<String, Reply>,
    connected: Vec<String>,
    warnings: Vec<String>,
    duplicates: BTreeSet<String>,
    timed_out: BTreeSet<String>,
    total_time: Option<f64>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_progress(&mut self, host: &str) {
        tracing::info!("[{host}] connected");
        self.connected.push(host.to_string());
    }

    pub fn record_warning(&mut self, message: &str) {
        tracing::warn!("warning: {message}");
        self.warnings.push(message.to_string());
    }

    /// Store a host's reply. A later reply for the same host replaces the earlier one.
    pub fn record_reply(&mut self, reply: Reply) {
        log_reply(&reply);
        let host = reply.hostname.clone();
        if self.replies.insert(host.clone(), reply).is_some() {
            tracing::warn!("[{host}] duplicate reply, keeping the latest");
            self.duplicates.insert(host);
        }
    }

    pub fn finalize(&mut self, final_reply: &FinalReply) {
        self.timed_out = final_reply
            .timed_out_hosts
            .iter()
            .filter(|(_, timed_out)| **timed_out)
            .map(|(host, _)| host.clone())
            .collect();
        self.total_time = Some(final_reply.total_time);
    }

    pub fn status(&self, host: &str) -> Option<HostStatus> {
        if self.timed_out.contains(host) {
            return Some(HostStatus::TimedOut);
        }
        self.replies.get(host).map(|r| {
            if r.success {
                HostStatus::Succeeded
            } else {
                HostStatus::Failed
            }
        })
    }

    pub fn snapshot(&self) -> Snapshot {
        let mut snapshot = Snapshot {
            timed_out: self.timed_out.clone(),
            total_time: self.total_time,
            connected: self.connected.clone(),
            warnings: self.warnings.clone(),
            duplicates: self.duplicates.clone(),
            ..Default::default()
        };
        for (host, reply) in &self.replies {
            match self.status(host) {
                Some(HostStatus::Succeeded) => {
                    snapshot.succeeded.insert(host.clone());
                }
                Some(HostStatus::Failed) => {
                    snapshot.failed.insert(host.clone());
                    snapshot
                        .failure_messages
                        .insert(host.clone(), reply.error_message.clone());
                }
                Some(HostStatus::TimedOut) | None => {}
            }
        }
        snapshot
    }
}

fn log_reply(reply: &Reply) {
    let host = &reply.hostname;
    let status = if reply.success { "success" } else { "failure" };
    tracing::info!("[{host}] {status}");
    if !reply.error_message.is_empty() {
        tracing::info!("[{host}] error message: {}", reply.error_message);
    }
    if !reply.stdout.is_empty() {
        tracing::info!("[{host}] stdout:\n{}", reply.stdout);
    }
    if !reply.stderr.is_empty() {
        tracing::info!("[{host}] stderr:\n{}", reply.stderr);
    }
}

/// Read-only view of the classification at some point in the session.
///
/// Every host with a reply or a timeout lands in exactly one of
/// `succeeded`, `failed` or `timed_out`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub succeeded: BTreeSet<String>,
    pub failed: BTreeSet<String>,
    pub timed_out: BTreeSet<String>,
    /// `None` until a `FinalReply` has been seen.
    pub total_time: Option<f64>,
    pub failure_messages: BTreeMap<String, String>,
    pub connected: Vec<String>,
    pub warnings: Vec<String>,
    pub duplicates: BTreeSet<String>,
}
