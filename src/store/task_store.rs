//! Task store: the in-memory task table plus its durable JSON mirror (§4.6, §6).
//!
//! The whole store is one file, `<data_dir>/tasks.json` — a JSON array of
//! `[id, task]` pairs — rewritten atomically (`.tmp` then rename) on every
//! mutation, the same pattern used for the runtime's own status file. Writes
//! are serialized through a single background writer reading an unbounded
//! channel so concurrent mutations never race each other on disk even though
//! reads and in-memory updates are fully concurrent (§9: "whole-store JSON
//! ... serialize writes through a single-consumer queue").

use dashmap::DashMap;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, warn};

use crate::domain::{Task, TaskInput, TaskStatus, TaskType};
use crate::error::{EngineError, Result};

/// Why `create()` declined to make a new task.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CreateError {
    #[error("invalid task input: {0}")]
    Invalid(String),
    #[error("an active task already exists for ({0}, {1:?})")]
    AlreadyActive(String, TaskType),
}

const STORE_FILE: &str = "tasks.json";

/// Durable, concurrent task table. Construct with [`TaskStore::open`], which
/// replays the store file already on disk before returning.
pub struct TaskStore {
    tasks: DashMap<String, Task>,
    /// `(market_id, type) -> task id`, tracking only non-terminal tasks; this
    /// is the enforcement point for the "at most one active task per
    /// (market_id, type)" invariant (§4.6, P3).
    active_keys: DashMap<(String, TaskType), String>,
    data_dir: PathBuf,
    persist_tx: mpsc::UnboundedSender<String>,
}

impl TaskStore {
    /// Load `data_dir/tasks.json`, then spawn the background writer. A
    /// missing file means a fresh account; a corrupt one is logged and
    /// treated as empty rather than failing startup.
    pub async fn open(data_dir: impl AsRef<Path>) -> Result<Arc<Self>> {
        let data_dir = data_dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&data_dir).await.map_err(EngineError::Io)?;

        let tasks = DashMap::new();
        let active_keys = DashMap::new();

        let store_path = data_dir.join(STORE_FILE);
        match tokio::fs::read_to_string(&store_path).await {
            Ok(raw) => match serde_json::from_str::<Vec<(String, Task)>>(&raw) {
                Ok(entries) => {
                    for (id, task) in entries {
                        if !task.status.is_terminal() {
                            active_keys.insert(task.key(), id.clone());
                        }
                        tasks.insert(id, task);
                    }
                }
                Err(e) => warn!(path = %store_path.display(), error = %e, "skipping unreadable task store file"),
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %store_path.display(), error = %e, "failed reading task store file"),
        }

        let (persist_tx, persist_rx) = mpsc::unbounded_channel();
        let store = Arc::new(Self {
            tasks,
            active_keys,
            data_dir,
            persist_tx,
        });

        tokio::spawn(Self::run_writer(store.data_dir.join(STORE_FILE), persist_rx));
        Ok(store)
    }

    async fn run_writer(store_path: PathBuf, mut rx: mpsc::UnboundedReceiver<String>) {
        while let Some(json) = rx.recv().await {
            if let Err(e) = Self::write_store_file(&store_path, &json).await {
                error!(error = %e, "failed to persist task store");
            }
        }
    }

    async fn write_store_file(store_path: &Path, json: &str) -> std::io::Result<()> {
        let tmp_path = store_path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, json).await?;
        tokio::fs::rename(&tmp_path, store_path).await?;
        Ok(())
    }

    /// Serialize the whole in-memory table as `[id, task]` pairs and enqueue
    /// a full rewrite of the store file. Called after every mutation, not
    /// just the task that changed — the store file is a single snapshot.
    fn enqueue_write(&self) {
        let entries: Vec<(String, Task)> = self
            .tasks
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        match serde_json::to_string_pretty(&entries) {
            Ok(json) => {
                let _ = self.persist_tx.send(json);
            }
            Err(e) => error!(error = %e, "failed to serialize task store"),
        }
    }

    /// Idempotent create (§4.6): a call that lands in the same 10-second
    /// bucket as a prior one for the same `(market_id, type, price, qty)`
    /// returns the existing task rather than creating a duplicate. A call
    /// for a `(market_id, type)` with a *different* active task is rejected
    /// outright (P3).
    pub fn create(&self, input: TaskInput) -> std::result::Result<Task, CreateError> {
        input.validate().map_err(CreateError::Invalid)?;

        let now = chrono::Utc::now();
        let candidate = Task::new(input, now);

        if let Some(existing) = self.tasks.get(&candidate.id) {
            return Ok(existing.clone());
        }

        let key = candidate.key();
        if let Some(existing_id) = self.active_keys.get(&key) {
            if *existing_id != candidate.id {
                return Err(CreateError::AlreadyActive(key.0, key.1));
            }
        }

        self.active_keys.insert(key, candidate.id.clone());
        self.tasks.insert(candidate.id.clone(), candidate.clone());
        self.enqueue_write();
        Ok(candidate)
    }

    pub fn get(&self, id: &str) -> Option<Task> {
        self.tasks.get(id).map(|t| t.clone())
    }

    pub fn list(&self) -> Vec<Task> {
        self.tasks.iter().map(|e| e.value().clone()).collect()
    }

    /// Tasks in a mid-flight status, for startup recovery (§4.6).
    pub fn get_recoverable(&self) -> Vec<Task> {
        self.tasks
            .iter()
            .filter(|e| e.value().status.is_recoverable())
            .map(|e| e.value().clone())
            .collect()
    }

    /// Apply `mutate` to the task, persist the result, and release the
    /// `(market_id, type)` reservation once the task reaches a terminal
    /// status.
    pub fn update<F>(&self, id: &str, mutate: F) -> Result<Task>
    where
        F: FnOnce(&mut Task),
    {
        let mut entry = self
            .tasks
            .get_mut(id)
            .ok_or_else(|| EngineError::Logic(format!("task {id} not found")))?;
        mutate(&mut entry);
        if entry.status.is_terminal() {
            self.active_keys.remove(&entry.key());
        }
        let snapshot = entry.clone();
        drop(entry);
        self.enqueue_write();
        Ok(snapshot)
    }

    pub fn cancel(&self, id: &str, reason: impl Into<String>) -> Result<Task> {
        let reason = reason.into();
        self.update(id, |task| {
            let now = chrono::Utc::now();
            if task.transition(TaskStatus::Cancelled, reason.clone(), now).is_err() {
                task.error = Some(reason);
            }
        })
    }

    /// Remove a terminal task from memory and disk. Non-terminal tasks are
    /// refused — cancel or let them complete first.
    pub fn delete(&self, id: &str) -> Result<()> {
        let Some(task) = self.tasks.get(id) else {
            return Ok(());
        };
        if !task.status.is_terminal() {
            return Err(EngineError::Logic(format!(
                "refusing to delete non-terminal task {id} (status={})",
                task.status
            )));
        }
        let key = task.key();
        drop(task);
        self.tasks.remove(id);
        self.active_keys.remove(&key);
        self.enqueue_write();
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Snapshot of active-key reservations, primarily for tests and diagnostics.
    pub fn active_key_map(&self) -> HashMap<(String, TaskType), String> {
        self.active_keys
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Side, Strategy};
    use rust_decimal_macros::dec;
    use tempfile_shim::TempDir;

    // Minimal self-contained temp-dir helper so tests don't need an extra
    // dev-dependency just for directory cleanup.
    mod tempfile_shim {
        use std::path::{Path, PathBuf};

        pub struct TempDir(PathBuf);

        impl TempDir {
            pub fn new(label: &str) -> Self {
                let path = std::env::temp_dir().join(format!(
                    "xvenue-arb-test-{label}-{}",
                    uuid::Uuid::new_v4()
                ));
                std::fs::create_dir_all(&path).unwrap();
                Self(path)
            }
        }

        impl Drop for TempDir {
            fn drop(&mut self) {
                let _ = std::fs::remove_dir_all(&self.0);
            }
        }

        impl AsRef<Path> for TempDir {
            fn as_ref(&self) -> &Path {
                &self.0
            }
        }
    }

    fn sample_input(market_id: &str) -> TaskInput {
        TaskInput {
            market_id: market_id.to_string(),
            task_type: TaskType::Buy,
            strategy: Strategy::Maker,
            arb_side: Side::Yes,
            quantity: dec!(10),
            predict_price: dec!(0.42),
            hedge_price_limit: dec!(0.56),
            entry_cost: None,
            predict_ask_price: None,
            max_total_cost: None,
            predict_bid_price: None,
            expires_at: None,
        }
    }

    #[tokio::test]
    async fn create_then_reopen_recovers_active_task() {
        let dir = TempDir::new("recover");
        let store = TaskStore::open(&dir).await.unwrap();
        let task = store.create(sample_input("m1")).unwrap();
        assert_eq!(task.status, TaskStatus::Pending);

        // Give the background writer a moment to flush.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let reopened = TaskStore::open(&dir).await.unwrap();
        assert_eq!(reopened.len(), 1);
        let recovered = reopened.get(&task.id).unwrap();
        assert_eq!(recovered.market_id, "m1");
        assert_eq!(reopened.get_recoverable().len(), 1);
    }

    #[test]
    fn duplicate_active_key_is_rejected() {
        let dir = TempDir::new("dup");
        let rt = tokio::runtime::Runtime::new().unwrap();
        let store = rt.block_on(TaskStore::open(&dir)).unwrap();

        store.create(sample_input("m1")).unwrap();

        let mut second_input = sample_input("m1");
        second_input.predict_price = dec!(0.50); // different hash bucket input
        let err = store.create(second_input).unwrap_err();
        assert!(matches!(err, CreateError::AlreadyActive(_, _)));
    }

    #[test]
    fn cancel_releases_active_key_reservation() {
        let dir = TempDir::new("cancel");
        let rt = tokio::runtime::Runtime::new().unwrap();
        let store = rt.block_on(TaskStore::open(&dir)).unwrap();

        let task = store.create(sample_input("m1")).unwrap();
        store.cancel(&task.id, "user requested").unwrap();

        assert!(store.active_key_map().is_empty());
        let second = store.create(sample_input("m1")).unwrap();
        assert_ne!(second.id, task.id);
    }

    #[test]
    fn delete_refuses_non_terminal_task() {
        let dir = TempDir::new("delete");
        let rt = tokio::runtime::Runtime::new().unwrap();
        let store = rt.block_on(TaskStore::open(&dir)).unwrap();

        let task = store.create(sample_input("m1")).unwrap();
        assert!(store.delete(&task.id).is_err());

        store.cancel(&task.id, "done").unwrap();
        assert!(store.delete(&task.id).is_ok());
        assert!(store.get(&task.id).is_none());
    }
}
