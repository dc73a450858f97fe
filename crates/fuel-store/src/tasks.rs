//! Task repository (C7): CRUD, dependency edges, ready/blocked queries,
//! and the failed-stuck predicate.

use std::collections::{HashSet, VecDeque};
use std::path::Path;

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::id;
use crate::jsonl::JsonlFile;
use crate::model::{
    validate_priority, Complexity, Priority, Size, Task, TaskStatus, TaskType,
};
use crate::resolve::resolve_index;

const ID_PREFIX: &str = "f";
const DEFAULT_PREFIX: &str = "f-";

/// Fields accepted by [`FileTaskRepository::create`]. Everything but
/// `title` and `task_type` falls back to a documented default.
#[derive(Debug, Default)]
pub struct TaskCreate {
    pub title: String,
    pub description: Option<String>,
    pub task_type: Option<TaskType>,
    pub priority: Option<Priority>,
    pub size: Option<Size>,
    pub complexity: Option<Complexity>,
    pub labels: Vec<String>,
    pub epic: Option<String>,
    pub blocked_by: Vec<String>,
}

/// Fields accepted by [`FileTaskRepository::update`]. A field left at
/// `None` passes through unchanged; fields that are themselves optional
/// use `Option<Option<T>>` so callers can distinguish "leave alone" from
/// "clear it".
#[derive(Debug, Default)]
pub struct TaskUpdate {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub task_type: Option<TaskType>,
    pub priority: Option<Priority>,
    pub size: Option<Size>,
    pub complexity: Option<Complexity>,
    pub labels: Option<Vec<String>>,
    pub epic: Option<Option<String>>,
    pub blocked_by: Option<Vec<String>>,
    pub reason: Option<Option<String>>,
    pub commit_hash: Option<Option<String>>,
    pub last_review_issues: Option<Vec<String>>,
    pub status: Option<TaskStatus>,
    pub updated_at: Option<DateTime<Utc>>,
    pub consumed: Option<bool>,
    pub consumed_at: Option<Option<DateTime<Utc>>>,
    pub consumed_exit_code: Option<Option<i32>>,
    pub consume_pid: Option<Option<u32>>,
    pub consumed_output: Option<Option<String>>,
}

pub struct FileTaskRepository {
    file: JsonlFile,
}

impl FileTaskRepository {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            file: JsonlFile::new(path),
        }
    }

    pub fn all(&self) -> Result<Vec<Task>> {
        self.file.read_all()
    }

    pub fn find(&self, id_or_prefix: &str) -> Result<Task> {
        let items: Vec<Task> = self.file.read_all()?;
        let idx = resolve_index(&items, id_or_prefix, DEFAULT_PREFIX)?;
        Ok(items[idx].clone())
    }

    pub fn create(&self, data: TaskCreate) -> Result<Task> {
        if data.title.trim().is_empty() {
            return Err(Error::Validation("title must not be empty".into()));
        }
        let priority = data.priority.unwrap_or(2);
        validate_priority(priority)?;

        self.file.update(|items: &mut Vec<Task>| {
            let salt = format!("{}-{}", data.title, rand::random::<u64>());
            let new_id = id::generate(ID_PREFIX, &salt, |candidate| {
                items.iter().any(|t| t.id == candidate)
            })?;
            let now = Utc::now();
            let task = Task {
                id: new_id,
                title: data.title.clone(),
                description: data.description.clone(),
                task_type: data.task_type.unwrap_or(TaskType::Task),
                priority,
                size: data.size.unwrap_or(Size::M),
                complexity: data.complexity.unwrap_or(Complexity::Simple),
                labels: data.labels.clone(),
                status: TaskStatus::Open,
                epic: data.epic.clone(),
                blocked_by: data.blocked_by.clone(),
                created_at: now,
                updated_at: now,
                reason: None,
                commit_hash: None,
                last_review_issues: Vec::new(),
                consumed: false,
                consumed_at: None,
                consumed_exit_code: None,
                consume_pid: None,
                consumed_output: None,
            };
            items.push(task.clone());
            Ok(task)
        })
    }

    pub fn update(&self, id_or_prefix: &str, data: TaskUpdate) -> Result<Task> {
        if let Some(p) = data.priority {
            validate_priority(p)?;
        }
        self.file.update(|items: &mut Vec<Task>| {
            let idx = resolve_index(items, id_or_prefix, DEFAULT_PREFIX)?;
            {
                let t = &mut items[idx];
                if let Some(title) = data.title {
                    if title.trim().is_empty() {
                        return Err(Error::Validation("title must not be empty".into()));
                    }
                    t.title = title;
                }
                if let Some(description) = data.description {
                    t.description = description;
                }
                if let Some(task_type) = data.task_type {
                    t.task_type = task_type;
                }
                if let Some(priority) = data.priority {
                    t.priority = priority;
                }
                if let Some(size) = data.size {
                    t.size = size;
                }
                if let Some(complexity) = data.complexity {
                    t.complexity = complexity;
                }
                if let Some(labels) = data.labels {
                    t.labels = labels;
                }
                if let Some(epic) = data.epic {
                    t.epic = epic;
                }
                if let Some(blocked_by) = data.blocked_by {
                    t.blocked_by = blocked_by;
                }
                if let Some(reason) = data.reason {
                    t.reason = reason;
                }
                if let Some(commit_hash) = data.commit_hash {
                    t.commit_hash = commit_hash;
                }
                if let Some(issues) = data.last_review_issues {
                    t.last_review_issues = issues;
                }
                if let Some(status) = data.status {
                    t.status = status;
                }
                if let Some(consumed) = data.consumed {
                    t.consumed = consumed;
                }
                if let Some(consumed_at) = data.consumed_at {
                    t.consumed_at = consumed_at;
                }
                if let Some(exit_code) = data.consumed_exit_code {
                    t.consumed_exit_code = exit_code;
                }
                if let Some(pid) = data.consume_pid {
                    t.consume_pid = pid;
                }
                if let Some(output) = data.consumed_output {
                    t.consumed_output = output;
                }
                t.updated_at = data.updated_at.unwrap_or_else(Utc::now);
            }
            Ok(items[idx].clone())
        })
    }

    pub fn start(&self, id_or_prefix: &str) -> Result<Task> {
        self.file.update(|items: &mut Vec<Task>| {
            let idx = resolve_index(items, id_or_prefix, DEFAULT_PREFIX)?;
            items[idx].status = TaskStatus::InProgress;
            items[idx].updated_at = Utc::now();
            Ok(items[idx].clone())
        })
    }

    pub fn done(
        &self,
        id_or_prefix: &str,
        reason: Option<String>,
        commit_hash: Option<String>,
    ) -> Result<Task> {
        self.file.update(|items: &mut Vec<Task>| {
            let idx = resolve_index(items, id_or_prefix, DEFAULT_PREFIX)?;
            let t = &mut items[idx];
            t.status = TaskStatus::Closed;
            if reason.is_some() {
                t.reason = reason.clone();
            }
            if commit_hash.is_some() {
                t.commit_hash = commit_hash.clone();
            }
            t.updated_at = Utc::now();
            Ok(t.clone())
        })
    }

    pub fn reopen(&self, id_or_prefix: &str) -> Result<Task> {
        self.file.update(|items: &mut Vec<Task>| {
            let idx = resolve_index(items, id_or_prefix, DEFAULT_PREFIX)?;
            let t = &mut items[idx];
            t.status = TaskStatus::Open;
            t.updated_at = Utc::now();
            Ok(t.clone())
        })
    }

    /// Reset a failed-stuck task back to `open`, clearing the supervisor's
    /// transient fields. Accepts both variants the failed-stuck predicate
    /// recognizes (non-zero exit, or a null pid).
    ///
    /// `attempts` is the number of runs already recorded for this task
    /// (e.g. `runs.for_task(id)?.len()`); the retry is refused once it
    /// reaches `max_retries`, so an operator can't resurrect a task past
    /// its configured ceiling.
    pub fn retry(&self, id_or_prefix: &str, attempts: u32, max_retries: u32) -> Result<Task> {
        self.file.update(|items: &mut Vec<Task>| {
            let idx = resolve_index(items, id_or_prefix, DEFAULT_PREFIX)?;
            let t = &mut items[idx];
            let no_live_pid = |_: u32| false;
            if !is_failed(t, no_live_pid, &[]) {
                return Err(Error::Validation(format!(
                    "task {} is not failed-stuck and cannot be retried",
                    t.id
                )));
            }
            if attempts >= max_retries {
                return Err(Error::Validation(format!(
                    "task {} has used {attempts} of {max_retries} allowed retries and cannot be retried further",
                    t.id
                )));
            }
            t.status = TaskStatus::Open;
            t.consumed = false;
            t.consumed_at = None;
            t.consumed_exit_code = None;
            t.consume_pid = None;
            t.consumed_output = None;
            t.updated_at = Utc::now();
            Ok(t.clone())
        })
    }

    pub fn add_dependency(&self, task_id: &str, blocker_id: &str) -> Result<Task> {
        self.file.update(|items: &mut Vec<Task>| {
            let task_idx = resolve_index(items, task_id, DEFAULT_PREFIX)?;
            let task_real_id = items[task_idx].id.clone();
            let blocker_idx = resolve_index(items, blocker_id, DEFAULT_PREFIX)?;
            let blocker_real_id = items[blocker_idx].id.clone();

            if task_real_id == blocker_real_id {
                return Err(Error::Validation("a task cannot block itself".into()));
            }
            if path_exists(items, &blocker_real_id, &task_real_id) {
                return Err(Error::CycleDetected {
                    from: task_real_id,
                    to: blocker_real_id,
                });
            }

            let t = &mut items[task_idx];
            if !t.blocked_by.iter().any(|b| *b == blocker_real_id) {
                t.blocked_by.push(blocker_real_id);
            }
            t.updated_at = Utc::now();
            Ok(t.clone())
        })
    }

    pub fn remove_dependency(&self, task_id: &str, blocker_id: &str) -> Result<Task> {
        self.file.update(|items: &mut Vec<Task>| {
            let task_idx = resolve_index(items, task_id, DEFAULT_PREFIX)?;
            let blocker_idx = resolve_index(items, blocker_id, DEFAULT_PREFIX)?;
            let blocker_real_id = items[blocker_idx].id.clone();
            let t = &mut items[task_idx];
            t.blocked_by.retain(|b| *b != blocker_real_id);
            t.updated_at = Utc::now();
            Ok(t.clone())
        })
    }

    /// Open tasks whose every blocker is closed, excluding `needs-human`,
    /// ordered by `(priority asc, created_at asc)`.
    pub fn ready(&self) -> Result<Vec<Task>> {
        let items: Vec<Task> = self.file.read_all()?;
        let mut ready: Vec<Task> = items
            .iter()
            .filter(|t| {
                t.status == TaskStatus::Open
                    && !t.has_label(Task::NEEDS_HUMAN_LABEL)
                    && t.blocked_by
                        .iter()
                        .all(|b| blocker_closed(&items, b))
            })
            .cloned()
            .collect();
        ready.sort_by(|a, b| a.priority.cmp(&b.priority).then(a.created_at.cmp(&b.created_at)));
        Ok(ready)
    }

    /// The complement of [`Self::ready`]: open tasks with at least one
    /// unresolved blocker.
    pub fn blocked(&self) -> Result<Vec<Task>> {
        let items: Vec<Task> = self.file.read_all()?;
        let blocked = items
            .iter()
            .filter(|t| {
                t.status == TaskStatus::Open
                    && t.blocked_by.iter().any(|b| !blocker_closed(&items, b))
            })
            .cloned()
            .collect();
        Ok(blocked)
    }
}

fn blocker_closed(items: &[Task], blocker_id: &str) -> bool {
    items
        .iter()
        .find(|t| t.id == blocker_id)
        .map(|t| t.status == TaskStatus::Closed)
        .unwrap_or(true)
}

/// BFS from `from`, following `blocked_by` edges, looking for `to`.
fn path_exists(items: &[Task], from: &str, to: &str) -> bool {
    let mut visited = HashSet::new();
    let mut queue = VecDeque::new();
    queue.push_back(from.to_string());
    while let Some(current) = queue.pop_front() {
        if current == to {
            return true;
        }
        if !visited.insert(current.clone()) {
            continue;
        }
        if let Some(t) = items.iter().find(|t| t.id == current) {
            queue.extend(t.blocked_by.iter().cloned());
        }
    }
    false
}

/// The failed-stuck predicate: `in_progress` with `consumed=true` and
/// either a non-zero exit code or a null/dead pid. `exclude_pids` lets
/// the caller skip pids it knows are still
/// tracked as live, so a task spawned moments ago isn't misclassified
/// mid-liveness-check.
pub fn is_failed(task: &Task, is_pid_dead: impl Fn(u32) -> bool, exclude_pids: &[u32]) -> bool {
    if task.status != TaskStatus::InProgress || !task.consumed {
        return false;
    }
    if matches!(task.consumed_exit_code, Some(code) if code != 0) {
        return true;
    }
    match task.consume_pid {
        None => true,
        Some(pid) if exclude_pids.contains(&pid) => false,
        Some(pid) => is_pid_dead(pid),
    }
}
