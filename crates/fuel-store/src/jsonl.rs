//! Generic line-delimited JSON file storage shared by the task, epic, and
//! run repositories.
//!
//! Every write renders the whole record set, sorted by id, to a sibling
//! temporary file and renames it over the live path, so a reader never
//! observes a partially written file.

use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;
use crate::lock;
use crate::model::Identified;

pub struct JsonlFile {
    path: PathBuf,
    lock_path: PathBuf,
    tmp_path: PathBuf,
}

impl JsonlFile {
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let mut lock_path = path.clone();
        lock_path.as_mut_os_string().push(".lock");
        let mut tmp_path = path.clone();
        tmp_path.as_mut_os_string().push(".tmp");
        Self {
            path,
            lock_path,
            tmp_path,
        }
    }

    fn read_all_unlocked<T: DeserializeOwned>(&self) -> Result<Vec<T>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&self.path)?;
        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(Into::into))
            .collect()
    }

    fn write_all_unlocked<T: Serialize + Identified>(&self, items: &mut [T]) -> Result<()> {
        items.sort_by(|a, b| a.id().cmp(b.id()));
        let mut buf = String::new();
        for item in items.iter() {
            buf.push_str(&serde_json::to_string(item)?);
            buf.push('\n');
        }
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.tmp_path, buf)?;
        fs::rename(&self.tmp_path, &self.path)?;
        Ok(())
    }

    /// Read every record under a shared lock.
    pub fn read_all<T: DeserializeOwned>(&self) -> Result<Vec<T>> {
        let _guard = lock::lock_shared(&self.lock_path)?;
        self.read_all_unlocked()
    }

    /// Read-modify-write the whole file under one exclusive lock, so the
    /// read and the write it depends on are never interleaved with
    /// another process's write.
    pub fn update<T, F, R>(&self, f: F) -> Result<R>
    where
        T: Serialize + DeserializeOwned + Identified,
        F: FnOnce(&mut Vec<T>) -> Result<R>,
    {
        let _guard = lock::lock_exclusive(&self.lock_path)?;
        let mut items: Vec<T> = self.read_all_unlocked()?;
        let result = f(&mut items)?;
        self.write_all_unlocked(&mut items)?;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Complexity, Size, Task, TaskStatus, TaskType};
    use chrono::Utc;

    fn task(id: &str) -> Task {
        let now = Utc::now();
        Task {
            id: id.to_string(),
            title: "t".to_string(),
            description: None,
            task_type: TaskType::Task,
            priority: 2,
            size: Size::M,
            complexity: Complexity::Simple,
            labels: vec![],
            status: TaskStatus::Open,
            epic: None,
            blocked_by: vec![],
            created_at: now,
            updated_at: now,
            reason: None,
            commit_hash: None,
            last_review_issues: vec![],
            consumed: false,
            consumed_at: None,
            consumed_exit_code: None,
            consume_pid: None,
            consumed_output: None,
        }
    }

    #[test]
    fn round_trips_and_sorts_by_id() {
        let dir = tempfile::tempdir().unwrap();
        let file = JsonlFile::new(dir.path().join("tasks.jsonl"));

        file.update::<Task, _, _>(|items| {
            items.push(task("f-bbbbbb"));
            items.push(task("f-aaaaaa"));
            Ok(())
        })
        .unwrap();

        let items: Vec<Task> = file.read_all().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].id, "f-aaaaaa");
        assert_eq!(items[1].id, "f-bbbbbb");
    }

    #[test]
    fn missing_file_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let file = JsonlFile::new(dir.path().join("tasks.jsonl"));
        let items: Vec<Task> = file.read_all().unwrap();
        assert!(items.is_empty());
    }
}
