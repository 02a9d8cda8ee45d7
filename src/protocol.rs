//! Line-delimited JSON records exchanged with the parallel ssh agent.
//!
//! Every record is a single JSON object terminated by `\n`. Inbound records
//! carry a `Type` discriminant with their payload fields flattened beside it.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::DecodeError;

/// The only action this client ever asks the agent to perform.
pub const SSH_ACTION: &str = "ssh";

/// Discriminant key carried by every inbound record.
const TYPE_KEY: &str = "Type";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Request {
    #[serde(rename = "Action")]
    pub action: String,
    #[serde(rename = "Cmd")]
    pub command: String,
    #[serde(rename = "Timeout")]
    pub timeout_ms: u64,
    /// Empty means the agent picks its default host set.
    #[serde(rename = "Hosts", default, deserialize_with = "null_as_default")]
    pub hosts: Vec<String>,
}

impl Request {
    pub fn ssh(command: impl Into<String>, timeout: Duration, hosts: Vec<String>) -> Self {
        Self {
            action: SSH_ACTION.to_string(),
            command: command.into(),
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            hosts,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "Type")]
pub enum Response {
    InitializeComplete(InitializeComplete),
    ConnectionProgress(ConnectionProgress),
    UserError(UserError),
    Reply(Reply),
    FinalReply(FinalReply),
}

impl Response {
    /// Discriminant strings understood by [`decode`].
    pub const KINDS: [&'static str; 5] = [
        "InitializeComplete",
        "ConnectionProgress",
        "UserError",
        "Reply",
        "FinalReply",
    ];

    pub fn kind(&self) -> &'static str {
        match self {
            Response::InitializeComplete(_) => "InitializeComplete",
            Response::ConnectionProgress(_) => "ConnectionProgress",
            Response::UserError(_) => "UserError",
            Response::Reply(_) => "Reply",
            Response::FinalReply(_) => "FinalReply",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct InitializeComplete {
    #[serde(rename = "InitializeComplete")]
    pub ok: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ConnectionProgress {
    #[serde(rename = "ConnectedHost")]
    pub connected_host: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct UserError {
    #[serde(rename = "IsCritical")]
    pub is_critical: bool,
    #[serde(rename = "ErrorMsg", default)]
    pub message: String,
}

/// Outcome of the command on a single host.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    #[serde(rename = "Hostname")]
    pub hostname: String,
    #[serde(rename = "Stdout", default)]
    pub stdout: String,
    #[serde(rename = "Stderr", default)]
    pub stderr: String,
    #[serde(rename = "Success")]
    pub success: bool,
    #[serde(rename = "ErrMsg", default)]
    pub error_message: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct FinalReply {
    /// Wall time of the whole fan-out, in seconds.
    #[serde(rename = "TotalTime")]
    pub total_time: f64,
    #[serde(rename = "TimedOutHosts", default, deserialize_with = "null_as_default")]
    pub timed_out_hosts: BTreeMap<String, bool>,
}

/// The agent is written in Go, where an empty map or slice goes out as `null`.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Serialize a request as one newline-terminated line.
pub fn encode(request: &Request) -> Result<String, serde_json::Error> {
    let mut line = serde_json::to_string(request)?;
    line.push('\n');
    Ok(line)
}

/// Decode one line received from the agent.
///
/// The discriminant is inspected before the payload so an unknown `Type`
/// is reported as such instead of as a shape mismatch.
pub fn decode(line: &str) -> Result<Response, DecodeError> {
    let line = line.trim_end_matches(['\r', '\n']);
    let value: serde_json::Value =
        serde_json::from_str(line).map_err(|e| DecodeError::malformed(line, e.to_string()))?;

    let kind = match value.get(TYPE_KEY) {
        Some(serde_json::Value::String(kind)) => kind.clone(),
        Some(_) => return Err(DecodeError::malformed(line, "`Type` is not a string")),
        None => return Err(DecodeError::malformed(line, "missing `Type` field")),
    };
    if !Response::KINDS.contains(&kind.as_str()) {
        return Err(DecodeError::UnexpectedVariant {
            kind,
            line: line.to_string(),
        });
    }

    Response::deserialize(value).map_err(|e| DecodeError::malformed(line, e.to_string()))
}
