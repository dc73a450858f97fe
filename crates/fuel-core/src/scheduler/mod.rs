//! Scheduler / consume loop (C10): the tick-driven loop that wires C1-C9
//! together.
//!
//! Grounded on the DAG orchestrator's drain-then-spawn loop shape, with
//! the concurrency primitives stripped out in favor of direct synchronous
//! calls — a single-threaded cooperative model.

use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;

use fuel_store::{Complexity, RunCreate, RunUpdate, Store, TaskStatus, TaskUpdate};

use crate::config::ConfigFile;
use crate::error::Result;
use crate::health::HealthTracker;
use crate::ipc::{ClientMessage, Decoded, IpcServer, ServerMessage};
use crate::supervisor::{CompletionType, SpawnResult, Supervisor};

const TICK_INTERVAL: Duration = Duration::from_millis(100);

/// Everything one consume loop needs: the store, configuration, and the
/// three pieces of in-memory state (health, supervisor, IPC) that only
/// live for the lifetime of one supervisor process.
pub struct Scheduler {
    store: Store,
    config: ConfigFile,
    health: HealthTracker,
    supervisor: Supervisor,
    ipc: IpcServer,
    cwd: PathBuf,
    paused: bool,
}

impl Scheduler {
    pub fn new(store: Store, config: ConfigFile, fuel_dir: impl Into<PathBuf>, cwd: impl Into<PathBuf>) -> Result<Self> {
        let fuel_dir = fuel_dir.into();
        let mut ipc = IpcServer::new();
        ipc.start(config.consume_port)?;
        Ok(Self {
            store,
            config,
            health: HealthTracker::new(),
            supervisor: Supervisor::new(fuel_dir),
            ipc,
            cwd: cwd.into(),
            paused: false,
        })
    }

    /// Run ticks until a Ctrl-C/SIGTERM signal arrives, then shut down
    /// every live agent process gracefully before returning. A second
    /// signal received while that graceful shutdown is still waiting on
    /// children force-kills everything immediately instead of completing
    /// the 30s drain.
    pub async fn run(&mut self) -> Result<()> {
        self.store.runs.cleanup_orphaned_runs()?;

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("shutdown signal received, draining agents");
                    tokio::select! {
                        _ = self.supervisor.shutdown() => {}
                        _ = tokio::signal::ctrl_c() => {
                            tracing::warn!("second shutdown signal received, force-killing remaining agents");
                            self.supervisor.force_kill_all().await;
                        }
                    }
                    self.ipc.broadcast(&ServerMessage::Shutdown { ts: Utc::now() });
                    return Ok(());
                }
                _ = tokio::time::sleep(TICK_INTERVAL) => {
                    if let Err(e) = self.tick() {
                        tracing::warn!(error = %e, "tick failed");
                    }
                }
            }
        }
    }

    /// One full tick: drain IPC, reap completions, admit ready work,
    /// broadcast a snapshot. Never both spawns and retires a single task.
    pub fn tick(&mut self) -> Result<()> {
        self.drain_ipc_commands();

        let completions = self.supervisor.poll();
        for completion in completions {
            if let Err(e) = self.apply_completion(completion) {
                tracing::warn!(error = %e, "failed to apply completion");
            }
        }

        if !self.paused {
            self.admit_ready_work()?;
        }

        self.broadcast_snapshot()?;
        Ok(())
    }

    fn drain_ipc_commands(&mut self) {
        for (_client_id, messages) in self.ipc.poll::<ClientMessage>() {
            for decoded in messages {
                match decoded {
                    Decoded::Message(ClientMessage::Pause) => self.paused = true,
                    Decoded::Message(ClientMessage::Resume) => self.paused = false,
                    Decoded::Message(ClientMessage::Retry { id }) => {
                        if let Err(e) = self.retry_task(&id) {
                            tracing::warn!(task_id = %id, error = %e, "operator retry rejected");
                        }
                    }
                    Decoded::Message(ClientMessage::Subscribe) => {}
                    Decoded::Error { raw } => {
                        tracing::debug!(raw, "ignoring unrecognized client command");
                    }
                }
            }
        }
    }

    fn apply_completion(&mut self, completion: crate::supervisor::Completion) -> Result<()> {
        self.store.runs.update_latest_run(
            &completion.task_id,
            RunUpdate {
                ended_at: Some(Utc::now()),
                exit_code: Some(completion.exit_code),
                output: Some(completion.output.clone()),
                session_id: completion.session_id.clone(),
                status: Some(match completion.completion_type {
                    CompletionType::Success => fuel_store::RunStatus::Completed,
                    _ => fuel_store::RunStatus::Failed,
                }),
                ..Default::default()
            },
        )?;

        match completion.completion_type {
            CompletionType::Success => {
                let task = self.store.tasks.done(&completion.task_id, None, None)?;
                self.health.record_success(&completion.agent);
                self.ipc.broadcast(&ServerMessage::TaskCompleted {
                    ts: Utc::now(),
                    task_id: completion.task_id.clone(),
                });
                if let Some(epic_id) = &task.epic {
                    // Recomputing status has no side effect beyond the
                    // read it performs; nothing further to persist here.
                    let _ = self.store.epics.status(epic_id, &self.store.tasks);
                }
            }
            CompletionType::NetworkError | CompletionType::Failed => {
                self.health.record_failure(&completion.agent);
                // Auto-retry while the task's attempt count is still under
                // the agent's max_attempts, mirroring the same
                // `attempt >= retry_max` escalation gate used by the
                // operator-triggered path below; once it's reached, leave
                // the task in_progress (failed-stuck) for an operator to
                // revive.
                let attempts = self.store.runs.for_task(&completion.task_id)?.len() as u32;
                let max_attempts = self
                    .config
                    .agents
                    .get(&completion.agent)
                    .map(|a| a.max_attempts)
                    .unwrap_or(0);
                let reopen = attempts < max_attempts;
                self.store.tasks.update(
                    &completion.task_id,
                    if reopen {
                        TaskUpdate {
                            status: Some(TaskStatus::Open),
                            consumed: Some(false),
                            consumed_at: Some(None),
                            consumed_exit_code: Some(None),
                            consume_pid: Some(None),
                            consumed_output: Some(None),
                            ..Default::default()
                        }
                    } else {
                        TaskUpdate {
                            consumed_exit_code: Some(Some(completion.exit_code)),
                            consumed_output: Some(Some(completion.output.clone())),
                            ..Default::default()
                        }
                    },
                )?;
                self.ipc.broadcast(&ServerMessage::TaskFailed {
                    ts: Utc::now(),
                    task_id: completion.task_id.clone(),
                    reason: truncate_reason(&completion.output),
                });
            }
            CompletionType::PermissionBlocked => {
                let task = self.store.tasks.find(&completion.task_id)?;
                let mut labels = task.labels.clone();
                if !labels.iter().any(|l| l == fuel_store::Task::NEEDS_HUMAN_LABEL) {
                    labels.push(fuel_store::Task::NEEDS_HUMAN_LABEL.to_string());
                }
                self.store.tasks.update(
                    &completion.task_id,
                    TaskUpdate {
                        status: Some(TaskStatus::Open),
                        labels: Some(labels),
                        consumed_exit_code: Some(Some(completion.exit_code)),
                        consumed_output: Some(Some(completion.output.clone())),
                        ..Default::default()
                    },
                )?;
                self.ipc.broadcast(&ServerMessage::TaskFailed {
                    ts: Utc::now(),
                    task_id: completion.task_id.clone(),
                    reason: "blocked on a tool permission, needs human approval".to_string(),
                });
            }
        }
        Ok(())
    }

    fn admit_ready_work(&mut self) -> Result<()> {
        let ready = self.store.tasks.ready()?;
        for task in ready {
            let agent_name = self.resolve_agent(task.complexity).to_string();
            let Some(agent_def) = self.config.agents.get(&agent_name).cloned() else {
                tracing::warn!(agent = agent_name, "complexity mapping references unknown agent");
                continue;
            };
            if !self.health.is_available(&agent_name, Utc::now()) {
                self.ipc.broadcast(&ServerMessage::AgentBackoff {
                    ts: Utc::now(),
                    agent: agent_name.clone(),
                    seconds: self.health.backoff_seconds(&agent_name, Utc::now()),
                });
                continue;
            }
            if !self.supervisor.can_spawn(&agent_name, agent_def.max_concurrent) {
                continue;
            }

            let prompt = build_prompt(&task);
            match self.supervisor.spawn_for_task(
                &task.id,
                &agent_name,
                &agent_def,
                &self.health,
                &prompt,
                &self.cwd,
            ) {
                SpawnResult::Success(handle) => {
                    self.store.tasks.update(
                        &task.id,
                        TaskUpdate {
                            status: Some(TaskStatus::InProgress),
                            consumed: Some(true),
                            consumed_at: Some(Some(Utc::now())),
                            consume_pid: Some(Some(handle.pid)),
                            consumed_exit_code: Some(None),
                            consumed_output: Some(None),
                            ..Default::default()
                        },
                    )?;
                    self.store.runs.create_run(
                        &task.id,
                        RunCreate {
                            agent: agent_name.clone(),
                            model: agent_def.model.clone(),
                        },
                    )?;
                    self.ipc.broadcast(&ServerMessage::TaskStarted {
                        ts: Utc::now(),
                        task_id: task.id.clone(),
                        agent: agent_name.clone(),
                    });
                }
                SpawnResult::AgentInBackoff { agent, seconds } => {
                    tracing::debug!(agent, seconds, "agent in backoff, skipping");
                    self.ipc.broadcast(&ServerMessage::AgentBackoff {
                        ts: Utc::now(),
                        agent,
                        seconds,
                    });
                }
                SpawnResult::AtCapacity { agent } => {
                    tracing::debug!(agent, "agent at capacity, skipping");
                }
                SpawnResult::SpawnFailed { task_id, message } => {
                    tracing::warn!(task_id, message, "spawn failed");
                    self.health.record_failure(&agent_name);
                }
                SpawnResult::ConfigError(message) => {
                    tracing::warn!(message, "spawn rejected by configuration");
                }
            }
        }
        Ok(())
    }

    fn resolve_agent(&self, complexity: Complexity) -> &str {
        self.config.resolve_agent(complexity)
    }

    /// Operator-triggered retry: resolves the task's agent to find its
    /// configured `max_retries` and refuses once the task's run count has
    /// reached it.
    fn retry_task(&self, id_or_prefix: &str) -> Result<()> {
        let task = self.store.tasks.find(id_or_prefix)?;
        let agent_name = self.resolve_agent(task.complexity);
        let max_retries = self.config.agents.get(agent_name).map(|a| a.max_retries).unwrap_or(u32::MAX);
        let attempts = self.store.runs.for_task(&task.id)?.len() as u32;
        self.store.tasks.retry(id_or_prefix, attempts, max_retries)?;
        Ok(())
    }

    fn broadcast_snapshot(&mut self) -> Result<()> {
        self.ipc.accept();
        let ready = self.store.tasks.ready()?.len();
        let running = self
            .config
            .agents
            .keys()
            .map(|agent| self.supervisor.live_count(agent))
            .sum();
        let agent_backoff = self
            .config
            .agents
            .keys()
            .map(|agent| (agent.clone(), self.health.backoff_seconds(agent, Utc::now())))
            .collect();
        self.ipc.broadcast(&ServerMessage::Snapshot {
            ts: Utc::now(),
            running,
            ready,
            agent_backoff,
        });
        Ok(())
    }
}

/// Short summary for a `task_failed` broadcast: the full output lives in
/// the run row; clients only need enough to show a reason inline.
const MAX_REASON_CHARS: usize = 280;

fn truncate_reason(output: &str) -> String {
    let trimmed = output.trim();
    match trimmed.char_indices().nth(MAX_REASON_CHARS) {
        Some((byte_idx, _)) => format!("{}…", &trimmed[..byte_idx]),
        None => trimmed.to_string(),
    }
}

/// A minimal fixed prompt rendering: template loading and variable
/// substitution are handled outside this crate.
fn build_prompt(task: &fuel_store::Task) -> String {
    match &task.description {
        Some(description) if !description.trim().is_empty() => {
            format!("{}\n\n{}", task.title, description)
        }
        _ => task.title.clone(),
    }
}

