//! Command line surface and the plain configuration it produces.

use std::time::Duration;

use clap::{ArgAction, Parser};

use crate::protocol::Request;

/// Run a command on many hosts through a parallel ssh agent.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, disable_help_flag = true)]
pub struct Args {
    /// Timeout for the command to complete on each host (e.g. 500ms, 1.5s, 1m30s)
    #[arg(short, long, default_value = "10s", value_parser = parse_duration)]
    pub timeout: Duration,

    /// User to login with
    #[arg(short, long, default_value = "root")]
    pub user: String,

    /// Hosts to run the command on, comma separated (agent default when omitted)
    #[arg(short = 'h', long, value_delimiter = ',')]
    pub hosts: Vec<String>,

    /// Parallel ssh agent executable
    #[arg(long, env = "PSSH_AGENT", default_value = "GoSSHa")]
    pub agent: String,

    /// Print help
    #[arg(long, action = ArgAction::Help)]
    #[allow(dead_code)]
    help: Option<bool>,

    /// Command to run, after `--`
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

/// Everything one invocation needs, independent of clap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub agent: String,
    pub user: String,
    pub timeout: Duration,
    pub hosts: Vec<String>,
    pub command: String,
}

impl From<Args> for Config {
    fn from(args: Args) -> Self {
        Self {
            agent: args.agent,
            user: args.user,
            timeout: args.timeout,
            hosts: args
                .hosts
                .into_iter()
                .map(|h| h.trim().to_string())
                .filter(|h| !h.is_empty())
                .collect(),
            command: args.command.join(" "),
        }
    }
}

impl Config {
    pub fn request(&self) -> Request {
        Request::ssh(self.command.clone(), self.timeout, self.hosts.clone())
    }
}

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// Parse a duration the way the agent's own tooling writes them: a sequence
/// of decimal numbers, each with an optional fraction and a unit suffix
/// (`ns`, `us`/`µs`, `ms`, `s`, `m`, `h`, `d`), as in "1.5s" or "1m30s".
/// A lone number without a unit is seconds.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let input = s.trim();
    if input.is_empty() {
        return Err("empty duration string".to_string());
    }

    let mut total = Duration::ZERO;
    let mut rest = input;
    let mut first = true;
    while !rest.is_empty() {
        let num_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        let (num, tail) = rest.split_at(num_len);
        if num.is_empty() {
            return Err(format!("invalid number in duration: {input}"));
        }

        let tail = tail.trim_start();
        let unit_len = tail
            .find(|c: char| c.is_ascii_digit() || c == '.' || c.is_whitespace())
            .unwrap_or(tail.len());
        let (unit, next) = tail.split_at(unit_len);
        let unit_nanos = match unit {
            "ns" => 1,
            "us" | "µs" => 1_000,
            "ms" => 1_000_000,
            "s" => NANOS_PER_SEC,
            "m" => 60 * NANOS_PER_SEC,
            "h" => 3_600 * NANOS_PER_SEC,
            "d" => 86_400 * NANOS_PER_SEC,
            "" if first && next.is_empty() => NANOS_PER_SEC,
            "" => return Err(format!("missing unit in duration: {input}")),
            other => return Err(format!("unknown duration suffix: {other}")),
        };

        total = scale(num, unit_nanos)
            .and_then(|part| total.checked_add(part))
            .ok_or_else(|| format!("invalid duration: {input}"))?;
        rest = next.trim_start();
        first = false;
    }
    Ok(total)
}

/// `num` units of `unit_nanos` each; `num` may carry a decimal fraction,
/// which is truncated to whole nanoseconds.
fn scale(num: &str, unit_nanos: u128) -> Option<Duration> {
    let (whole, frac) = num.split_once('.').unwrap_or((num, ""));
    if (whole.is_empty() && frac.is_empty()) || frac.contains('.') {
        return None;
    }

    let whole: u128 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
    let mut nanos = whole.checked_mul(unit_nanos)?;
    if !frac.is_empty() {
        // Digits past the 18th are below a nanosecond for every unit.
        let digits = &frac[..frac.len().min(18)];
        let frac: u128 = digits.parse().ok()?;
        nanos = nanos.checked_add(frac * unit_nanos / 10u128.pow(digits.len() as u32))?;
    }

    let secs = u64::try_from(nanos / NANOS_PER_SEC).ok()?;
    Some(Duration::new(secs, (nanos % NANOS_PER_SEC) as u32))
}
