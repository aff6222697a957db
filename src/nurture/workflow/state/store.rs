// SPDX-License-Identifier: MIT

//! Durable run storage
//!
//! One `RunRecord` per run id. `put` is a compare-and-swap on the state's
//! `version`, so a writer holding a stale state is refused. The file store
//! runs every read-compare-write under an OS lock on `<run_id>.lock`, which
//! makes the swap atomic for every process sharing the directory. The
//! outreach and response logs are append-only and live beside the state, so
//! a `put` never rewrites them.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use super::schema::{OutreachRecord, ResponseRecord, RunRecord, WorkflowState, SCHEMA_VERSION};
use crate::error::StoreError;
use crate::nurture::workflow::locks::KeyedLocks;

#[async_trait]
pub trait StateStore: Send + Sync {
    /// Persist a brand new run. Fails if the run id is taken.
    async fn create(&self, record: RunRecord) -> Result<(), StoreError>;

    /// Load the full record for a run
    async fn get(&self, run_id: &str) -> Result<RunRecord, StoreError>;

    /// Replace the run's state if the stored version equals
    /// `expected_version`. Returns the new version.
    async fn put(&self, state: &WorkflowState, expected_version: u64) -> Result<u64, StoreError>;

    async fn append_outreach(&self, run_id: &str, record: OutreachRecord)
        -> Result<(), StoreError>;

    async fn append_response(&self, run_id: &str, record: ResponseRecord)
        -> Result<(), StoreError>;

    /// States of every stored run
    async fn list(&self) -> Result<Vec<WorkflowState>, StoreError>;

    /// Load only the state part of a run
    async fn get_state(&self, run_id: &str) -> Result<WorkflowState, StoreError> {
        Ok(self.get(run_id).await?.state)
    }
}

fn swap_state(
    record: &mut RunRecord,
    state: &WorkflowState,
    expected_version: u64,
) -> Result<u64, StoreError> {
    if record.state.version != expected_version {
        return Err(StoreError::ConcurrentConflict {
            run_id: state.run_id.clone(),
            expected_version,
            actual_version: record.state.version,
        });
    }
    let mut next = state.clone();
    next.version = expected_version + 1;
    record.state = next;
    Ok(expected_version + 1)
}

/// Process-local store. Each record sits behind its own mutex; the map lock
/// is held only long enough to find the record.
#[derive(Default)]
pub struct InMemoryStateStore {
    runs: RwLock<HashMap<String, Arc<Mutex<RunRecord>>>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn entry(&self, run_id: &str) -> Result<Arc<Mutex<RunRecord>>, StoreError> {
        let runs = self.runs.read().await;
        runs.get(run_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(run_id.to_string()))
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn create(&self, record: RunRecord) -> Result<(), StoreError> {
        let mut runs = self.runs.write().await;
        let run_id = record.state.run_id.clone();
        if runs.contains_key(&run_id) {
            return Err(StoreError::AlreadyExists(run_id));
        }
        runs.insert(run_id, Arc::new(Mutex::new(record)));
        Ok(())
    }

    async fn get(&self, run_id: &str) -> Result<RunRecord, StoreError> {
        let entry = self.entry(run_id).await?;
        let record = entry.lock().await;
        Ok(record.clone())
    }

    async fn put(&self, state: &WorkflowState, expected_version: u64) -> Result<u64, StoreError> {
        let entry = self.entry(&state.run_id).await?;
        let mut record = entry.lock().await;
        swap_state(&mut record, state, expected_version)
    }

    async fn append_outreach(
        &self,
        run_id: &str,
        record: OutreachRecord,
    ) -> Result<(), StoreError> {
        let entry = self.entry(run_id).await?;
        entry.lock().await.outreach.push(record);
        Ok(())
    }

    async fn append_response(
        &self,
        run_id: &str,
        record: ResponseRecord,
    ) -> Result<(), StoreError> {
        let entry = self.entry(run_id).await?;
        entry.lock().await.responses.push(record);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<WorkflowState>, StoreError> {
        let entries: Vec<_> = self.runs.read().await.values().cloned().collect();
        let mut states = Vec::with_capacity(entries.len());
        for entry in entries {
            states.push(entry.lock().await.state.clone());
        }
        Ok(states)
    }
}

/// Exclusive advisory lock on a run's lock file, released when dropped.
/// The OS drops it too if the holding process dies.
struct RunFileLock {
    _file: std::fs::File,
}

impl RunFileLock {
    async fn acquire(path: PathBuf) -> Result<Self, StoreError> {
        tokio::task::spawn_blocking(move || -> Result<Self, StoreError> {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .truncate(false)
                .write(true)
                .open(&path)?;
            fs4::fs_std::FileExt::lock_exclusive(&file)?;
            Ok(Self { _file: file })
        })
        .await
        .map_err(|e| StoreError::Backend(format!("lock task failed: {}", e)))?
    }
}

/// One JSON file per run under a directory. Writes go to a temp file that is
/// renamed over the target, so a crash never leaves a half-written record.
/// Readers never take the lock; writers take the in-process lock first so
/// only one task per run waits on the file lock.
pub struct FileStateStore {
    dir: PathBuf,
    locks: KeyedLocks,
}

impl FileStateStore {
    /// Open (and create if needed) a store rooted at `dir`
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self {
            dir,
            locks: KeyedLocks::new(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, run_id: &str) -> Result<PathBuf, StoreError> {
        check_run_id(run_id)?;
        Ok(self.dir.join(format!("{}.json", run_id)))
    }

    /// Both locks for `run_id`, in-process first
    async fn lock_run(
        &self,
        run_id: &str,
    ) -> Result<(OwnedMutexGuard<()>, RunFileLock), StoreError> {
        check_run_id(run_id)?;
        let local = self.locks.lock(run_id).await;
        let file = RunFileLock::acquire(self.dir.join(format!("{}.lock", run_id))).await?;
        Ok((local, file))
    }

    async fn read_record(&self, run_id: &str, path: &Path) -> Result<RunRecord, StoreError> {
        let bytes = match tokio::fs::read(path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(run_id.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        decode_record(run_id, &bytes)
    }

    async fn write_record(&self, path: &Path, record: &RunRecord) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(record)?;
        let tmp = path.with_extension(format!("json.tmp-{}", uuid::Uuid::new_v4()));
        tokio::fs::write(&tmp, &bytes).await?;
        if let Err(e) = tokio::fs::rename(&tmp, path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn modify<F, T>(&self, run_id: &str, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut RunRecord) -> Result<T, StoreError> + Send,
        T: Send,
    {
        let path = self.path_for(run_id)?;
        let _guard = self.lock_run(run_id).await?;
        let mut record = self.read_record(run_id, &path).await?;
        let out = f(&mut record)?;
        self.write_record(&path, &record).await?;
        Ok(out)
    }
}

fn check_run_id(run_id: &str) -> Result<(), StoreError> {
    let valid = !run_id.is_empty()
        && run_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !valid {
        return Err(StoreError::Backend(format!("invalid run id: {:?}", run_id)));
    }
    Ok(())
}

/// Parse a persisted record, rejecting other schema versions before the
/// body is interpreted.
fn decode_record(run_id: &str, bytes: &[u8]) -> Result<RunRecord, StoreError> {
    let raw: serde_json::Value = serde_json::from_slice(bytes)?;
    let incompatible = |found| StoreError::IncompatibleSchema {
        run_id: run_id.to_string(),
        found,
        expected: SCHEMA_VERSION,
    };
    let found = raw
        .get("schema_version")
        .and_then(|v| v.as_u64())
        .unwrap_or(0);
    // too large for a u32 is as foreign as any other mismatch
    let found = u32::try_from(found).map_err(|_| incompatible(u32::MAX))?;
    if found != SCHEMA_VERSION {
        return Err(incompatible(found));
    }
    Ok(serde_json::from_value(raw)?)
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn create(&self, record: RunRecord) -> Result<(), StoreError> {
        let run_id = record.state.run_id.clone();
        let path = self.path_for(&run_id)?;
        let _guard = self.lock_run(&run_id).await?;
        if tokio::fs::try_exists(&path).await? {
            return Err(StoreError::AlreadyExists(run_id));
        }
        self.write_record(&path, &record).await
    }

    async fn get(&self, run_id: &str) -> Result<RunRecord, StoreError> {
        let path = self.path_for(run_id)?;
        self.read_record(run_id, &path).await
    }

    async fn put(&self, state: &WorkflowState, expected_version: u64) -> Result<u64, StoreError> {
        self.modify(&state.run_id, |record| {
            swap_state(record, state, expected_version)
        })
        .await
    }

    async fn append_outreach(
        &self,
        run_id: &str,
        record: OutreachRecord,
    ) -> Result<(), StoreError> {
        self.modify(run_id, |r| {
            r.outreach.push(record);
            Ok(())
        })
        .await
    }

    async fn append_response(
        &self,
        run_id: &str,
        record: ResponseRecord,
    ) -> Result<(), StoreError> {
        self.modify(run_id, |r| {
            r.responses.push(record);
            Ok(())
        })
        .await
    }

    async fn list(&self) -> Result<Vec<WorkflowState>, StoreError> {
        let mut states = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                let Some(run_id) = path.file_stem().and_then(|s| s.to_str()) else {
                    continue;
                };
                match self.read_record(run_id, &path).await {
                    Ok(record) => states.push(record.state),
                    Err(e) => log::warn!("Skipping unreadable run record {:?}: {}", path, e),
                }
            }
        }
        Ok(states)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::sender::Channel;
    use crate::collab::draft::OutreachKind;
    use crate::nurture::workflow::state::schema::{LeadProfile, NewLead};
    use chrono::Utc;

    fn state(run_id: &str) -> WorkflowState {
        WorkflowState::new(
            run_id.to_string(),
            NewLead {
                tenant_id: "t1".into(),
                lead_id: "l1".into(),
                compliance_urgency_score: 0.1,
                profile: LeadProfile {
                    company: "Acme".into(),
                    ..Default::default()
                },
            },
            "qualify",
            Utc::now(),
        )
    }

    fn outreach(run_id: &str) -> OutreachRecord {
        OutreachRecord {
            run_id: run_id.to_string(),
            kind: OutreachKind::Initial,
            channel: Channel::Email,
            subject: "s".into(),
            body: "b".into(),
            recipient: "a@b.test".into(),
            sent_at: Utc::now(),
            external_id: "ext-1".into(),
        }
    }

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("leadflow-store-{}", uuid::Uuid::new_v4()))
    }

    async fn exercise_cas(store: &dyn StateStore) {
        store.create(RunRecord::new(state("r1"))).await.unwrap();

        let mut s = store.get_state("r1").await.unwrap();
        assert_eq!(s.version, 0);

        s.current_node = "draft_outreach".into();
        let v = store.put(&s, 0).await.unwrap();
        assert_eq!(v, 1);

        // stale writer loses
        let err = store.put(&s, 0).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::ConcurrentConflict {
                expected_version: 0,
                actual_version: 1,
                ..
            }
        ));

        let loaded = store.get_state("r1").await.unwrap();
        assert_eq!(loaded.version, 1);
        assert_eq!(loaded.current_node, "draft_outreach");
    }

    #[tokio::test]
    async fn test_memory_store_cas() {
        exercise_cas(&InMemoryStateStore::new()).await;
    }

    #[tokio::test]
    async fn test_file_store_cas() {
        let dir = temp_dir();
        let store = FileStateStore::open(&dir).await.unwrap();
        exercise_cas(&store).await;
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn test_create_twice_fails() {
        let store = InMemoryStateStore::new();
        store.create(RunRecord::new(state("r1"))).await.unwrap();
        let err = store.create(RunRecord::new(state("r1"))).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_missing_run() {
        let store = InMemoryStateStore::new();
        assert!(matches!(
            store.get("nope").await.unwrap_err(),
            StoreError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_put_keeps_appended_logs() {
        let store = InMemoryStateStore::new();
        store.create(RunRecord::new(state("r1"))).await.unwrap();
        store.append_outreach("r1", outreach("r1")).await.unwrap();

        let s = store.get_state("r1").await.unwrap();
        store.put(&s, 0).await.unwrap();

        let record = store.get("r1").await.unwrap();
        assert_eq!(record.outreach.len(), 1);
        assert_eq!(record.state.version, 1);
    }

    #[tokio::test]
    async fn test_file_store_survives_reopen() {
        let dir = temp_dir();
        {
            let store = FileStateStore::open(&dir).await.unwrap();
            store.create(RunRecord::new(state("r2"))).await.unwrap();
            store.append_outreach("r2", outreach("r2")).await.unwrap();
        }
        let store = FileStateStore::open(&dir).await.unwrap();
        let record = store.get("r2").await.unwrap();
        assert_eq!(record.outreach.len(), 1);
        assert_eq!(store.list().await.unwrap().len(), 1);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn test_file_store_rejects_other_schema_version() {
        let dir = temp_dir();
        let store = FileStateStore::open(&dir).await.unwrap();
        let mut record = RunRecord::new(state("r3"));
        record.schema_version = SCHEMA_VERSION + 1;
        let bytes = serde_json::to_vec(&record).unwrap();
        std::fs::write(dir.join("r3.json"), bytes).unwrap();

        let err = store.get("r3").await.unwrap_err();
        assert!(matches!(err, StoreError::IncompatibleSchema { .. }));
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn test_file_store_rejects_oversized_schema_version() {
        let dir = temp_dir();
        let store = FileStateStore::open(&dir).await.unwrap();
        let mut raw = serde_json::to_value(RunRecord::new(state("r4"))).unwrap();
        // wraps to SCHEMA_VERSION if truncated to 32 bits
        raw["schema_version"] = serde_json::json!((1u64 << 32) + SCHEMA_VERSION as u64);
        std::fs::write(dir.join("r4.json"), serde_json::to_vec(&raw).unwrap()).unwrap();

        let err = store.get("r4").await.unwrap_err();
        assert!(matches!(err, StoreError::IncompatibleSchema { .. }));
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_file_store_handles_on_one_dir_swap_once() {
        let dir = temp_dir();
        let first = Arc::new(FileStateStore::open(&dir).await.unwrap());
        let second = Arc::new(FileStateStore::open(&dir).await.unwrap());

        for trial in 0..50 {
            let run_id = format!("race-{}", trial);
            first.create(RunRecord::new(state(&run_id))).await.unwrap();
            let mut s = first.get_state(&run_id).await.unwrap();
            s.current_node = "draft_outreach".into();

            let (a, b) = tokio::join!(
                tokio::spawn({
                    let store = first.clone();
                    let s = s.clone();
                    async move { store.put(&s, 0).await }
                }),
                tokio::spawn({
                    let store = second.clone();
                    let s = s.clone();
                    async move { store.put(&s, 0).await }
                }),
            );
            let results = [a.unwrap(), b.unwrap()];
            let wins = results.iter().filter(|r| r.is_ok()).count();
            assert_eq!(wins, 1, "trial {}: {:?}", trial, results);
            assert!(results
                .iter()
                .any(|r| matches!(r, Err(StoreError::ConcurrentConflict { .. }))));
            assert_eq!(second.get_state(&run_id).await.unwrap().version, 1);
        }

        // lock files are not records
        assert_eq!(first.list().await.unwrap().len(), 50);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn test_file_store_rejects_path_like_ids() {
        let dir = temp_dir();
        let store = FileStateStore::open(&dir).await.unwrap();
        assert!(store.get("../etc/passwd").await.is_err());
        let _ = std::fs::remove_dir_all(dir);
    }
}
