//! Run repository (C9): attempt log and orphan recovery.

use std::path::Path;

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::id;
use crate::jsonl::JsonlFile;
use crate::model::{truncate_output, Run, RunStatus};

const ID_PREFIX: &str = "run";

/// Fields accepted by [`FileRunRepository::create_run`].
#[derive(Debug, Default)]
pub struct RunCreate {
    pub agent: String,
    pub model: Option<String>,
}

/// Fields accepted by [`FileRunRepository::update_latest_run`]. Setting
/// `ended_at` implies the run transitions to `completed`; the scheduler
/// overrides `status` explicitly to `failed` for a non-success
/// completion.
#[derive(Debug, Default)]
pub struct RunUpdate {
    pub ended_at: Option<DateTime<Utc>>,
    pub exit_code: Option<i32>,
    pub output: Option<String>,
    pub session_id: Option<String>,
    pub cost: Option<f64>,
    pub status: Option<RunStatus>,
}

pub struct FileRunRepository {
    file: JsonlFile,
}

impl FileRunRepository {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            file: JsonlFile::new(path),
        }
    }

    pub fn all(&self) -> Result<Vec<Run>> {
        self.file.read_all()
    }

    pub fn for_task(&self, task_id: &str) -> Result<Vec<Run>> {
        Ok(self
            .all()?
            .into_iter()
            .filter(|r| r.task_id == task_id)
            .collect())
    }

    /// Write a new run row in status `running` and return its short id.
    pub fn create_run(&self, task_id: &str, data: RunCreate) -> Result<String> {
        self.file.update(|items: &mut Vec<Run>| {
            let salt = format!("{task_id}-{}-{}", data.agent, rand::random::<u64>());
            let new_id = id::generate(ID_PREFIX, &salt, |candidate| {
                items.iter().any(|r| r.id == candidate)
            })?;
            let run = Run {
                id: new_id.clone(),
                task_id: task_id.to_string(),
                agent: data.agent,
                model: data.model,
                started_at: Utc::now(),
                ended_at: None,
                exit_code: None,
                output: String::new(),
                session_id: None,
                cost: None,
                status: RunStatus::Running,
                duration_seconds: None,
            };
            items.push(run);
            Ok(new_id)
        })
    }

    /// Patch the most recent run for `task_id` (ties broken by insertion
    /// order, i.e. the last one appended with that task id).
    pub fn update_latest_run(&self, task_id: &str, data: RunUpdate) -> Result<Run> {
        self.file.update(|items: &mut Vec<Run>| {
            let idx = items
                .iter()
                .enumerate()
                .filter(|(_, r)| r.task_id == task_id)
                .map(|(i, _)| i)
                .last()
                .ok_or_else(|| crate::error::Error::NotFound(task_id.to_string()))?;

            let r = &mut items[idx];
            if let Some(output) = data.output {
                r.output = truncate_output(&output);
            }
            if let Some(exit_code) = data.exit_code {
                r.exit_code = Some(exit_code);
            }
            if let Some(session_id) = data.session_id {
                r.session_id = Some(session_id);
            }
            if let Some(cost) = data.cost {
                r.cost = Some(cost);
            }
            if let Some(ended_at) = data.ended_at {
                r.ended_at = Some(ended_at);
                r.status = RunStatus::Completed;
                r.duration_seconds = Some((ended_at - r.started_at).num_seconds());
            }
            if let Some(status) = data.status {
                r.status = status;
            }
            Ok(r.clone())
        })
    }

    /// Mark every run left in status `running` with no `ended_at` as
    /// `failed`. Called once at supervisor start, when any in-memory
    /// process table from a previous run is necessarily gone.
    pub fn cleanup_orphaned_runs(&self) -> Result<usize> {
        self.file.update(|items: &mut Vec<Run>| {
            let mut count = 0;
            let now = Utc::now();
            for r in items.iter_mut() {
                if r.status == RunStatus::Running && r.ended_at.is_none() {
                    r.status = RunStatus::Failed;
                    r.exit_code = Some(-1);
                    r.output = "[Run orphaned \u{2014} supervisor restarted while the agent was still running]".to_string();
                    r.ended_at = Some(now);
                    r.duration_seconds = Some((now - r.started_at).num_seconds());
                    count += 1;
                }
            }
            Ok(count)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn repo() -> (tempfile::TempDir, FileRunRepository) {
        let dir = tempdir().unwrap();
        let repo = FileRunRepository::new(dir.path().join("runs.jsonl"));
        (dir, repo)
    }

    #[test]
    fn create_run_starts_running() {
        let (_dir, repo) = repo();
        let id = repo
            .create_run(
                "f-aaaaaa",
                RunCreate {
                    agent: "claude".into(),
                    model: None,
                },
            )
            .unwrap();
        assert!(crate::id::is_valid("run", &id));
        let runs = repo.for_task("f-aaaaaa").unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, RunStatus::Running);
    }

    #[test]
    fn update_latest_run_completes_and_computes_duration() {
        let (_dir, repo) = repo();
        repo.create_run("f-aaaaaa", RunCreate { agent: "claude".into(), model: None }).unwrap();
        let started = repo.for_task("f-aaaaaa").unwrap()[0].started_at;
        let ended = started + chrono::Duration::seconds(12);
        let updated = repo
            .update_latest_run(
                "f-aaaaaa",
                RunUpdate {
                    ended_at: Some(ended),
                    exit_code: Some(0),
                    output: Some("done".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.status, RunStatus::Completed);
        assert_eq!(updated.duration_seconds, Some(12));
    }

    #[test]
    fn update_latest_run_picks_most_recently_created() {
        let (_dir, repo) = repo();
        repo.create_run("f-aaaaaa", RunCreate { agent: "claude".into(), model: None }).unwrap();
        let second_id = repo.create_run("f-aaaaaa", RunCreate { agent: "claude".into(), model: None }).unwrap();
        let updated = repo
            .update_latest_run(
                "f-aaaaaa",
                RunUpdate {
                    exit_code: Some(1),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.id, second_id);
    }

    #[test]
    fn output_truncated_at_boundary() {
        let (_dir, repo) = repo();
        repo.create_run("f-aaaaaa", RunCreate { agent: "claude".into(), model: None }).unwrap();
        let exact = "a".repeat(crate::model::MAX_OUTPUT_BYTES);
        let updated = repo
            .update_latest_run("f-aaaaaa", RunUpdate { output: Some(exact.clone()), ..Default::default() })
            .unwrap();
        assert_eq!(updated.output.len(), crate::model::MAX_OUTPUT_BYTES);

        let over = "a".repeat(crate::model::MAX_OUTPUT_BYTES + 1);
        let updated = repo
            .update_latest_run("f-aaaaaa", RunUpdate { output: Some(over), ..Default::default() })
            .unwrap();
        assert_eq!(updated.output.len(), crate::model::MAX_OUTPUT_BYTES);
    }

    #[test]
    fn cleanup_orphaned_runs_fails_dangling_running_rows() {
        let (_dir, repo) = repo();
        repo.create_run("f-aaaaaa", RunCreate { agent: "claude".into(), model: None }).unwrap();
        let count = repo.cleanup_orphaned_runs().unwrap();
        assert_eq!(count, 1);
        let runs = repo.for_task("f-aaaaaa").unwrap();
        assert_eq!(runs[0].status, RunStatus::Failed);
        assert_eq!(runs[0].exit_code, Some(-1));
        assert!(runs[0].ended_at.is_some());
    }

    #[test]
    fn cleanup_orphaned_runs_leaves_completed_rows_alone() {
        let (_dir, repo) = repo();
        repo.create_run("f-aaaaaa", RunCreate { agent: "claude".into(), model: None }).unwrap();
        repo.update_latest_run(
            "f-aaaaaa",
            RunUpdate {
                ended_at: Some(Utc::now()),
                exit_code: Some(0),
                ..Default::default()
            },
        )
        .unwrap();
        let count = repo.cleanup_orphaned_runs().unwrap();
        assert_eq!(count, 0);
    }
}
