//! Fake parallel ssh agents built from shell scripts.

#![allow(dead_code)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use tempfile::TempDir;

pub const INIT: &str = r#"{"Type":"InitializeComplete","InitializeComplete":true}"#;

/// Writing an executable while another test thread forks can make exec fail
/// with ETXTBSY, so script creation and spawning are serialized.
static SPAWN_LOCK: Mutex<()> = Mutex::new(());

pub fn spawn_lock() -> MutexGuard<'static, ()> {
    SPAWN_LOCK.lock().unwrap_or_else(|e| e.into_inner())
}

pub struct FakeAgent {
    pub dir: TempDir,
    pub program: PathBuf,
}

impl FakeAgent {
    /// An agent that prints `before` lines, reads one request line into
    /// `request.json`, prints `after` lines, then runs `tail` (default: exit).
    pub fn new(before: &[&str], after: &[&str], tail: &str) -> Self {
        Self::with_body(|dir| {
            let mut body = String::new();
            for line in before {
                body.push_str(&format!("printf '%s\\n' '{line}'\n"));
            }
            body.push_str(&format!(
                "IFS= read -r request && printf '%s\\n' \"$request\" > '{}'\n",
                dir.join("request.json").display()
            ));
            for line in after {
                body.push_str(&format!("printf '%s\\n' '{line}'\n"));
            }
            body.push_str(tail);
            body
        })
    }

    /// An agent running an arbitrary script body.
    pub fn script(body: &str) -> Self {
        Self::with_body(|_| body.to_string())
    }

    fn with_body(body: impl FnOnce(&Path) -> String) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let program = dir.path().join("fake-agent");
        let mut script = String::from("#!/bin/sh\n");
        script.push_str(&format!("echo \"$@\" > '{}'\n", dir.path().join("args").display()));
        script.push_str(&format!("echo $$ > '{}'\n", dir.path().join("pid").display()));
        script.push_str(&body(dir.path()));
        script.push('\n');
        std::fs::write(&program, script).unwrap();
        std::fs::set_permissions(&program, std::fs::Permissions::from_mode(0o755)).unwrap();
        Self { dir, program }
    }

    /// The usual shape: handshake, then `responses` once the request arrived.
    pub fn responding(responses: &[&str]) -> Self {
        Self::new(&[INIT], responses, "")
    }

    pub fn program(&self) -> &str {
        self.program.to_str().unwrap()
    }

    pub fn file(&self, name: &str) -> Option<String> {
        std::fs::read_to_string(self.dir.path().join(name)).ok()
    }

    pub fn request(&self) -> Option<serde_json::Value> {
        self.file("request.json")
            .map(|s| serde_json::from_str(s.trim_end()).unwrap())
    }

    pub fn pid(&self) -> Option<u32> {
        self.file("pid").and_then(|s| s.trim().parse().ok())
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

/// Whether a process with this pid still exists.
pub fn alive(pid: u32) -> bool {
    std::process::Command::new("kill")
        .args(["-0", &pid.to_string()])
        .stderr(std::process::Stdio::null())
        .status()
        .is_ok_and(|s| s.success())
}
