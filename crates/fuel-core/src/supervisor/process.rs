//! Process supervisor (C6): spawn, capture output, poll, signal, and
//! shut down agent subprocesses.
//!
//! Grounded on the harness adapter's spawn/kill/is_running pattern:
//! build a `Command` from the agent definition, capture output to
//! files rather than holding pipes open across polls, send SIGTERM
//! before SIGKILL, and treat a `try_wait` success as the authoritative
//! completion signal.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::OnceLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use regex::Regex;
use tokio::process::{Child, Command};

use crate::config::AgentDef;
use crate::health::HealthTracker;
use crate::output::StreamParser;

/// Outcome of [`Supervisor::spawn_for_task`].
#[derive(Debug)]
pub enum SpawnResult {
    Success(ProcessHandle),
    AgentInBackoff { agent: String, seconds: i64 },
    AtCapacity { agent: String },
    SpawnFailed { task_id: String, message: String },
    ConfigError(String),
}

/// A handle to a process just spawned; enough for the caller to record
/// `consume_pid` and create a run row.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    pub task_id: String,
    pub agent: String,
    pub pid: u32,
}

/// How a completed process's exit is classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionType {
    Success,
    NetworkError,
    PermissionBlocked,
    Failed,
}

#[derive(Debug, Clone)]
pub struct Completion {
    pub task_id: String,
    pub agent: String,
    pub exit_code: i32,
    pub duration_seconds: i64,
    pub session_id: Option<String>,
    pub output: String,
    pub completion_type: CompletionType,
}

struct Running {
    task_id: String,
    agent: String,
    child: Child,
    started_at: DateTime<Utc>,
    stdout_path: PathBuf,
    read_offset: u64,
    parser: StreamParser,
}

fn network_error_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)network|connection|timeout|api.*error").unwrap())
}

fn permission_blocked_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)permission.*denied|blocked.*tool|require.*approval").unwrap())
}

fn session_id_res() -> &'static [Regex; 2] {
    static RES: OnceLock<[Regex; 2]> = OnceLock::new();
    RES.get_or_init(|| {
        [
            Regex::new(r"Session ID:\s*([0-9a-fA-F-]{8,})").unwrap(),
            Regex::new(r"(?i)session_id[:=]\s*([0-9a-fA-F-]{8,})").unwrap(),
        ]
    })
}

fn extract_session_id(text: &str) -> Option<String> {
    session_id_res()
        .iter()
        .find_map(|re| re.captures(text).and_then(|c| c.get(1)).map(|m| m.as_str().to_string()))
}

fn classify(exit_code: i32, output: &str) -> CompletionType {
    if exit_code == 0 {
        return CompletionType::Success;
    }
    if exit_code == 1 {
        if network_error_re().is_match(output) {
            return CompletionType::NetworkError;
        }
        if permission_blocked_re().is_match(output) {
            return CompletionType::PermissionBlocked;
        }
    }
    CompletionType::Failed
}

/// Maintains the set of active agent processes and per-agent live
/// counts, keyed by OS pid.
pub struct Supervisor {
    fuel_dir: PathBuf,
    processes: HashMap<u32, Running>,
    live_counts: HashMap<String, usize>,
}

impl Supervisor {
    pub fn new(fuel_dir: impl Into<PathBuf>) -> Self {
        Self {
            fuel_dir: fuel_dir.into(),
            processes: HashMap::new(),
            live_counts: HashMap::new(),
        }
    }

    pub fn live_count(&self, agent: &str) -> usize {
        self.live_counts.get(agent).copied().unwrap_or(0)
    }

    pub fn can_spawn(&self, agent: &str, cap: usize) -> bool {
        self.live_count(agent) < cap
    }

    /// Build and launch the agent process for `task`, capturing output
    /// to `.fuel/processes/<task id>/{stdout.log,stderr.log}`.
    pub fn spawn_for_task(
        &mut self,
        task_id: &str,
        agent_name: &str,
        agent_def: &AgentDef,
        health: &HealthTracker,
        prompt: &str,
        cwd: &Path,
    ) -> SpawnResult {
        let now = Utc::now();
        if !health.is_available(agent_name, now) {
            return SpawnResult::AgentInBackoff {
                agent: agent_name.to_string(),
                seconds: health.backoff_seconds(agent_name, now),
            };
        }
        if !self.can_spawn(agent_name, agent_def.max_concurrent) {
            return SpawnResult::AtCapacity {
                agent: agent_name.to_string(),
            };
        }

        let process_dir = self.fuel_dir.join("processes").join(task_id);
        // Best-effort: capture is secondary to the exit code, which is
        // the authoritative completion signal.
        if let Err(e) = fs::create_dir_all(&process_dir) {
            tracing::warn!(task_id, error = %e, "failed to create process output directory");
        }
        let stdout_path = process_dir.join("stdout.log");
        let stderr_path = process_dir.join("stderr.log");
        let stdout_file = fs::File::create(&stdout_path).ok();
        let stderr_file = fs::File::create(&stderr_path).ok();

        let mut cmd = Command::new(&agent_def.command);
        for arg in &agent_def.prompt_args {
            cmd.arg(arg);
        }
        cmd.arg(prompt);
        if let Some(model) = &agent_def.model {
            cmd.arg("--model").arg(model);
        }
        for arg in &agent_def.args {
            cmd.arg(arg);
        }
        cmd.current_dir(cwd);
        for (key, value) in &agent_def.env {
            cmd.env(key, value);
        }
        cmd.stdin(Stdio::null());
        match (stdout_file, stderr_file) {
            (Some(out), Some(err)) => {
                cmd.stdout(Stdio::from(out));
                cmd.stderr(Stdio::from(err));
            }
            _ => {
                cmd.stdout(Stdio::null());
                cmd.stderr(Stdio::null());
            }
        }

        let child = match cmd.spawn() {
            Ok(c) => c,
            Err(e) => {
                return SpawnResult::SpawnFailed {
                    task_id: task_id.to_string(),
                    message: e.to_string(),
                }
            }
        };
        let Some(pid) = child.id() else {
            return SpawnResult::SpawnFailed {
                task_id: task_id.to_string(),
                message: "child process exited before a pid could be read".to_string(),
            };
        };

        *self.live_counts.entry(agent_name.to_string()).or_insert(0) += 1;
        self.processes.insert(
            pid,
            Running {
                task_id: task_id.to_string(),
                agent: agent_name.to_string(),
                child,
                started_at: now,
                stdout_path,
                read_offset: 0,
                parser: StreamParser::new(),
            },
        );

        SpawnResult::Success(ProcessHandle {
            task_id: task_id.to_string(),
            agent: agent_name.to_string(),
            pid,
        })
    }

    /// Check every live process for new output and for exit, returning
    /// one [`Completion`] per process that has terminated. Terminated
    /// processes are unregistered and their agent counter decremented.
    pub fn poll(&mut self) -> Vec<Completion> {
        let mut completions = Vec::new();
        let pids: Vec<u32> = self.processes.keys().copied().collect();

        for pid in pids {
            let exited_status = {
                let running = self.processes.get_mut(&pid).expect("pid tracked above");
                self.scan_output(pid);
                match running.child.try_wait() {
                    Ok(status) => status,
                    Err(e) => {
                        tracing::warn!(pid, error = %e, "error polling child status");
                        None
                    }
                }
            };

            let Some(status) = exited_status else {
                continue;
            };

            let Some(running) = self.processes.remove(&pid) else {
                continue;
            };
            if let Some(count) = self.live_counts.get_mut(&running.agent) {
                *count = count.saturating_sub(1);
            }

            let full_output = fs::read_to_string(&running.stdout_path).unwrap_or_default();
            let session_id = extract_session_id(&full_output);
            let exit_code = status.code().unwrap_or(-1);
            let ended_at = Utc::now();
            let duration_seconds = (ended_at - running.started_at).num_seconds();

            completions.push(Completion {
                task_id: running.task_id,
                agent: running.agent,
                exit_code,
                duration_seconds,
                session_id,
                output: fuel_store::model::truncate_output(&full_output),
                completion_type: classify(exit_code, &full_output),
            });
        }

        completions
    }

    /// Feed newly-written stdout bytes through the output parser, for
    /// tracing visibility into the live agent's structured events.
    fn scan_output(&mut self, pid: u32) {
        let Some(running) = self.processes.get_mut(&pid) else {
            return;
        };
        let Ok(bytes) = fs::read(&running.stdout_path) else {
            return;
        };
        if (bytes.len() as u64) <= running.read_offset {
            return;
        }
        let new_bytes = &bytes[running.read_offset as usize..];
        let events = running.parser.push(new_bytes);
        running.read_offset = bytes.len() as u64;
        for event in events {
            tracing::debug!(task_id = %running.task_id, ?event, "agent output event");
        }
    }

    /// Two-phase shutdown: SIGTERM every live process, wait up to 30s
    /// with progress logging every 5s, then force-kill the remainder.
    pub async fn shutdown(&mut self) {
        let pids: Vec<u32> = self.processes.keys().copied().collect();
        for &pid in &pids {
            send_sigterm(pid);
        }

        let deadline = tokio::time::Instant::now() + Duration::from_secs(30);
        let mut next_log = tokio::time::Instant::now() + Duration::from_secs(5);

        while tokio::time::Instant::now() < deadline {
            self.processes.retain(|pid, running| match running.child.try_wait() {
                Ok(Some(_)) => false,
                _ => {
                    let _ = pid;
                    true
                }
            });
            if self.processes.is_empty() {
                break;
            }
            if tokio::time::Instant::now() >= next_log {
                tracing::info!(remaining = self.processes.len(), "waiting for agents to exit");
                next_log += Duration::from_secs(5);
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }

        for (_pid, running) in self.processes.iter_mut() {
            let _ = running.child.kill().await;
        }
        self.processes.clear();
        self.live_counts.clear();
    }

    /// Immediate SIGKILL of every live process, no SIGTERM grace period.
    /// Used when a second shutdown signal arrives while [`Self::shutdown`]
    /// is still waiting on the first.
    pub async fn force_kill_all(&mut self) {
        for (_pid, running) in self.processes.iter_mut() {
            let _ = running.child.kill().await;
        }
        self.processes.clear();
        self.live_counts.clear();
    }

    /// Platform-portable liveness probe: signal-0 on Unix, falling back
    /// to `/proc/<pid>` on Linux when the probe itself errors (e.g. a
    /// permission edge case on some containers).
    pub fn is_alive(pid: u32) -> bool {
        is_alive_impl(pid)
    }
}

#[cfg(target_os = "linux")]
fn is_alive_impl(pid: u32) -> bool {
    if unsafe { libc::kill(pid as i32, 0) } == 0 {
        return true;
    }
    Path::new(&format!("/proc/{pid}")).exists()
}

#[cfg(all(unix, not(target_os = "linux")))]
fn is_alive_impl(pid: u32) -> bool {
    unsafe { libc::kill(pid as i32, 0) == 0 }
}

#[cfg(unix)]
fn send_sigterm(pid: u32) {
    unsafe {
        libc::kill(pid as i32, libc::SIGTERM);
    }
}

#[cfg(not(unix))]
fn send_sigterm(_pid: u32) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_success_on_exit_zero() {
        assert_eq!(classify(0, "anything"), CompletionType::Success);
    }

    #[test]
    fn classify_network_error_on_exit_one() {
        assert_eq!(
            classify(1, "Error: connection timeout reached"),
            CompletionType::NetworkError
        );
    }

    #[test]
    fn classify_permission_blocked_on_exit_one() {
        assert_eq!(
            classify(1, "blocked tool: write access require approval"),
            CompletionType::PermissionBlocked
        );
    }

    #[test]
    fn classify_falls_back_to_failed() {
        assert_eq!(classify(1, "assertion failed at line 12"), CompletionType::Failed);
        assert_eq!(classify(2, "network connection lost"), CompletionType::Failed);
    }

    #[test]
    fn extracts_session_id_from_either_pattern() {
        assert_eq!(
            extract_session_id("Session ID: 1234abcd-5678-90ef"),
            Some("1234abcd-5678-90ef".to_string())
        );
        assert_eq!(
            extract_session_id("session_id=deadbeef-0000-1111"),
            Some("deadbeef-0000-1111".to_string())
        );
        assert_eq!(extract_session_id("no session info here"), None);
    }

    #[test]
    fn current_process_is_alive() {
        assert!(Supervisor::is_alive(std::process::id()));
    }
}
