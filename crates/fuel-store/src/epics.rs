//! Epic repository (C8): CRUD plus the derived-status function and the
//! approve/reject/check_completion operations.

use std::path::Path;

use chrono::Utc;

use crate::error::{Error, Result};
use crate::id;
use crate::jsonl::JsonlFile;
use crate::model::{compute_epic_status, Epic, EpicStatus, Task, TaskStatus};
use crate::resolve::resolve_index;
use crate::tasks::FileTaskRepository;

const ID_PREFIX: &str = "e";
const DEFAULT_PREFIX: &str = "e-";

#[derive(Debug, Default)]
pub struct EpicCreate {
    pub title: String,
    pub description: Option<String>,
}

#[derive(Debug, Default)]
pub struct EpicUpdate {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
}

pub struct FileEpicRepository {
    file: JsonlFile,
}

impl FileEpicRepository {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            file: JsonlFile::new(path),
        }
    }

    pub fn all(&self) -> Result<Vec<Epic>> {
        self.file.read_all()
    }

    pub fn find(&self, id_or_prefix: &str) -> Result<Epic> {
        let items: Vec<Epic> = self.file.read_all()?;
        let idx = resolve_index(&items, id_or_prefix, DEFAULT_PREFIX)?;
        Ok(items[idx].clone())
    }

    pub fn create(&self, data: EpicCreate) -> Result<Epic> {
        if data.title.trim().is_empty() {
            return Err(Error::Validation("title must not be empty".into()));
        }
        self.file.update(|items: &mut Vec<Epic>| {
            let salt = format!("{}-{}", data.title, rand::random::<u64>());
            let new_id = id::generate(ID_PREFIX, &salt, |candidate| {
                items.iter().any(|e| e.id == candidate)
            })?;
            let now = Utc::now();
            let epic = Epic {
                id: new_id,
                title: data.title.clone(),
                description: data.description.clone(),
                created_at: now,
                updated_at: now,
                reviewed_at: None,
                approved_at: None,
                approved_by: None,
                changes_requested_at: None,
            };
            items.push(epic.clone());
            Ok(epic)
        })
    }

    pub fn update(&self, id_or_prefix: &str, data: EpicUpdate) -> Result<Epic> {
        self.file.update(|items: &mut Vec<Epic>| {
            let idx = resolve_index(items, id_or_prefix, DEFAULT_PREFIX)?;
            let e = &mut items[idx];
            if let Some(title) = data.title {
                if title.trim().is_empty() {
                    return Err(Error::Validation("title must not be empty".into()));
                }
                e.title = title;
            }
            if let Some(description) = data.description {
                e.description = description;
            }
            e.updated_at = Utc::now();
            Ok(e.clone())
        })
    }

    /// Set `approved_at=now`, clear `changes_requested_at`, and record the
    /// approver (default `"human"`).
    pub fn approve(&self, id_or_prefix: &str, approved_by: Option<String>) -> Result<Epic> {
        self.file.update(|items: &mut Vec<Epic>| {
            let idx = resolve_index(items, id_or_prefix, DEFAULT_PREFIX)?;
            let e = &mut items[idx];
            let now = Utc::now();
            e.approved_at = Some(now);
            e.approved_by = Some(approved_by.unwrap_or_else(|| "human".to_string()));
            e.changes_requested_at = None;
            e.updated_at = now;
            Ok(e.clone())
        })
    }

    /// Set `changes_requested_at=now`, clear approval fields, and reopen
    /// every member task whose status is `closed`.
    pub fn reject(
        &self,
        id_or_prefix: &str,
        reason: Option<String>,
        tasks: &FileTaskRepository,
    ) -> Result<Epic> {
        let epic = self.file.update(|items: &mut Vec<Epic>| {
            let idx = resolve_index(items, id_or_prefix, DEFAULT_PREFIX)?;
            let e = &mut items[idx];
            let now = Utc::now();
            e.changes_requested_at = Some(now);
            e.approved_at = None;
            e.approved_by = None;
            e.updated_at = now;
            // Epics carry no reason field of their own; the caller is
            // expected to surface `reason` to the user directly (e.g. in a
            // CLI message) rather than have it persisted here.
            let _ = reason;
            Ok(e.clone())
        })?;

        for task in tasks.all()? {
            if task.epic.as_deref() == Some(epic.id.as_str()) && task.status == TaskStatus::Closed {
                tasks.reopen(&task.id)?;
            }
        }
        Ok(epic)
    }

    pub fn status(&self, id_or_prefix: &str, tasks: &FileTaskRepository) -> Result<EpicStatus> {
        let epic = self.find(id_or_prefix)?;
        let members = self.members(&epic.id, tasks)?;
        let refs: Vec<&Task> = members.iter().collect();
        Ok(compute_epic_status(&epic, &refs))
    }

    pub fn members(&self, epic_id: &str, tasks: &FileTaskRepository) -> Result<Vec<Task>> {
        Ok(tasks
            .all()?
            .into_iter()
            .filter(|t| t.epic.as_deref() == Some(epic_id))
            .collect())
    }

    /// `true` iff the epic has at least one member and every member is
    /// `closed` or `cancelled`.
    pub fn check_completion(&self, id_or_prefix: &str, tasks: &FileTaskRepository) -> Result<bool> {
        let epic = self.find(id_or_prefix)?;
        let members = self.members(&epic.id, tasks)?;
        Ok(!members.is_empty()
            && members
                .iter()
                .all(|t| matches!(t.status, TaskStatus::Closed | TaskStatus::Cancelled)))
    }
}
