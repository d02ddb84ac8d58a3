//! Status repository
//!
//! Persists execution records so that every execution ever launched can be
//! listed and queried:
//! - Upserting a record by execution id
//! - Loading all records
//! - Loading one record
//!
//! Records live in an append-only JSON-lines journal that several processes
//! may share (the server and local CLI runs on the same root). Every access
//! takes an exclusive `flock` on `<journal>.lock`, then replays whatever other
//! processes appended since the last access before reading or writing. The
//! journal is compacted once it holds too many superseded lines.

use std::collections::HashMap;
use std::ffi::OsString;
use std::io::SeekFrom;
use std::os::unix::fs::MetadataExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use orchid_core::domain::execution::Execution;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{EngineError, Result};

/// How long to wait for another process to release the journal
const LOCK_TIMEOUT: Duration = Duration::from_secs(30);

const LOCK_RETRY: Duration = Duration::from_millis(10);

/// Repository trait for execution status records
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Upserts an execution record by id
    ///
    /// A record may only move forward through its lifecycle; saving a status
    /// that would regress the stored one is rejected.
    async fn save(&self, execution: &Execution) -> Result<()>;

    /// Loads every stored record, in first-saved order
    async fn load_all(&self) -> Result<Vec<Execution>>;

    /// Loads one record
    ///
    /// # Arguments
    /// * `id` - Execution id
    async fn load_one(&self, id: Uuid) -> Result<Execution>;
}

/// Journal-backed implementation of StatusStore
pub struct JournalStatusStore {
    path: PathBuf,
    compaction_factor: usize,
    lock_file: std::fs::File,
    state: Mutex<JournalState>,
}

/// This process's view of the journal
#[derive(Default)]
struct JournalState {
    records: Vec<Execution>,
    index: HashMap<Uuid, usize>,
    /// Device and inode of the journal file replayed so far
    identity: Option<(u64, u64)>,
    /// Bytes of that file already replayed
    offset: u64,
    /// Record lines in that file
    lines: usize,
}

impl JournalState {
    fn upsert(&mut self, execution: Execution) {
        match self.index.get(&execution.id) {
            Some(&slot) => self.records[slot] = execution,
            None => {
                self.index.insert(execution.id, self.records.len());
                self.records.push(execution);
            }
        }
    }

    fn needs_compaction(&self, factor: usize) -> bool {
        self.lines > factor * self.records.len().max(1)
    }
}

/// Exclusive hold on the journal, released on drop
struct JournalLock<'a> {
    file: &'a std::fs::File,
}

impl Drop for JournalLock<'_> {
    fn drop(&mut self) {
        // SAFETY: the descriptor belongs to a file that outlives this guard.
        unsafe {
            libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
        }
    }
}

impl JournalStatusStore {
    /// Opens (or creates) the journal at `path` and replays it
    ///
    /// # Arguments
    /// * `path` - Journal file, usually `<root>/executions.jsonl`
    /// * `compaction_factor` - Journal lines per record tolerated before compaction
    pub async fn open(path: impl Into<PathBuf>, compaction_factor: usize) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let lock_file = std::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(sibling(&path, ".lock"))?;

        let store = Self {
            path,
            compaction_factor,
            lock_file,
            state: Mutex::new(JournalState::default()),
        };

        {
            let mut state = store.state.lock().await;
            let _lock = store.lock().await?;
            store.catch_up(&mut state).await?;

            debug!(
                "Replayed {} journal line(s) into {} execution record(s) from {}",
                state.lines,
                state.records.len(),
                store.path.display()
            );

            if state.needs_compaction(compaction_factor) {
                store.compact_or_warn(&mut state).await;
            }
        }

        Ok(store)
    }

    /// Takes the cross-process journal lock, waiting for other holders
    async fn lock(&self) -> Result<JournalLock<'_>> {
        let fd = self.lock_file.as_raw_fd();
        let deadline = Instant::now() + LOCK_TIMEOUT;

        loop {
            // SAFETY: `fd` is owned by `self.lock_file` for the whole call.
            if unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) } == 0 {
                return Ok(JournalLock {
                    file: &self.lock_file,
                });
            }

            let err = std::io::Error::last_os_error();
            if err.kind() != std::io::ErrorKind::WouldBlock {
                return Err(err.into());
            }
            if Instant::now() >= deadline {
                return Err(EngineError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!(
                        "Timed out waiting for the lock on {}",
                        self.path.display()
                    ),
                )));
            }

            tokio::time::sleep(LOCK_RETRY).await;
        }
    }

    /// Replays lines appended since this process last read the journal
    ///
    /// Starts over when the journal was replaced by another process's
    /// compaction. Must be called with the journal lock held.
    async fn catch_up(&self, state: &mut JournalState) -> Result<()> {
        // Creating the file gives every process a journal identity to track.
        drop(append_handle(&self.path).await?);

        let metadata = tokio::fs::metadata(&self.path).await?;
        let identity = (metadata.dev(), metadata.ino());
        if state.identity != Some(identity) || metadata.len() < state.offset {
            if state.identity.is_some() {
                debug!("Journal {} was replaced, replaying it", self.path.display());
            }
            *state = JournalState {
                identity: Some(identity),
                ..JournalState::default()
            };
        }

        if metadata.len() == state.offset {
            return Ok(());
        }

        let mut file = File::open(&self.path).await?;
        file.seek(SeekFrom::Start(state.offset)).await?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes).await?;

        for chunk in bytes.split_inclusive(|b| *b == b'\n') {
            let text = String::from_utf8_lossy(chunk);
            let line = text.trim();

            if chunk.last() != Some(&b'\n') {
                return self.repair_tail(state, line).await;
            }

            let start = state.offset;
            state.offset += chunk.len() as u64;
            if line.is_empty() {
                continue;
            }

            let execution: Execution = serde_json::from_str(line).map_err(|e| {
                EngineError::Validation(format!(
                    "{}: malformed execution record at byte {}: {}",
                    self.path.display(),
                    start,
                    e
                ))
            })?;
            state.lines += 1;
            state.upsert(execution);
        }

        Ok(())
    }

    /// Handles a final line without terminator, left by an interrupted append
    ///
    /// A complete record is kept and terminated; anything else is cut off.
    async fn repair_tail(&self, state: &mut JournalState, line: &str) -> Result<()> {
        match serde_json::from_str::<Execution>(line) {
            Ok(execution) => {
                let mut journal = append_handle(&self.path).await?;
                journal.write_all(b"\n").await?;
                journal.flush().await?;

                state.offset = tokio::fs::metadata(&self.path).await?.len();
                state.lines += 1;
                state.upsert(execution);
            }
            Err(_) => {
                warn!(
                    "Discarding incomplete record at byte {} of {}",
                    state.offset,
                    self.path.display()
                );
                let journal = OpenOptions::new().write(true).open(&self.path).await?;
                journal.set_len(state.offset).await?;
                journal.sync_all().await?;
            }
        }
        Ok(())
    }

    /// Rewrites the journal with one line per live record
    ///
    /// The new journal is written next to the old one and renamed over it, so a
    /// crash leaves either the old or the new journal in place. Must be called
    /// with the journal lock held.
    async fn compact(&self, state: &mut JournalState) -> Result<()> {
        let tmp = sibling(&self.path, ".tmp");

        let mut contents = String::new();
        for execution in &state.records {
            contents.push_str(&serde_json::to_string(execution)?);
            contents.push('\n');
        }

        let mut file = File::create(&tmp).await?;
        file.write_all(contents.as_bytes()).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp, &self.path).await?;

        info!(
            "Compacted journal {} from {} to {} line(s)",
            self.path.display(),
            state.lines,
            state.records.len()
        );

        let metadata = tokio::fs::metadata(&self.path).await?;
        state.identity = Some((metadata.dev(), metadata.ino()));
        state.offset = metadata.len();
        state.lines = state.records.len();
        Ok(())
    }

    /// Compacts, keeping the current journal if that fails
    async fn compact_or_warn(&self, state: &mut JournalState) {
        if let Err(e) = self.compact(state).await {
            warn!("Failed to compact journal {}: {}", self.path.display(), e);
        }
    }
}

/// `path` with `suffix` appended to its file name
fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

async fn append_handle(path: &Path) -> Result<File> {
    Ok(OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?)
}

#[async_trait]
impl StatusStore for JournalStatusStore {
    async fn save(&self, execution: &Execution) -> Result<()> {
        let mut state = self.state.lock().await;
        let _lock = self.lock().await?;
        self.catch_up(&mut state).await?;

        if let Some(&slot) = state.index.get(&execution.id) {
            let stored = state.records[slot].status;
            if !stored.can_advance_to(execution.status) {
                return Err(EngineError::Validation(format!(
                    "Execution {} cannot move from {} back to {}",
                    execution.id, stored, execution.status
                )));
            }
        }

        let mut line = serde_json::to_string(execution)?;
        line.push('\n');
        let mut journal = append_handle(&self.path).await?;
        journal.write_all(line.as_bytes()).await?;
        journal.flush().await?;

        state.offset += line.len() as u64;
        state.lines += 1;
        state.upsert(execution.clone());

        debug!("Saved execution {} as {}", execution.id, execution.status);

        if state.needs_compaction(self.compaction_factor) {
            self.compact_or_warn(&mut state).await;
        }

        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<Execution>> {
        let mut state = self.state.lock().await;
        let _lock = self.lock().await?;
        self.catch_up(&mut state).await?;

        Ok(state.records.clone())
    }

    async fn load_one(&self, id: Uuid) -> Result<Execution> {
        let mut state = self.state.lock().await;
        let _lock = self.lock().await?;
        self.catch_up(&mut state).await?;

        state
            .index
            .get(&id)
            .map(|&slot| state.records[slot].clone())
            .ok_or_else(|| EngineError::not_found("Execution", id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use orchid_core::domain::execution::ExecutionStatus;
    use std::sync::Arc;
    use tempfile::TempDir;

    async fn open_store(dir: &TempDir) -> JournalStatusStore {
        JournalStatusStore::open(dir.path().join("executions.jsonl"), 4)
            .await
            .unwrap()
    }

    fn journal_lines(dir: &TempDir) -> usize {
        std::fs::read_to_string(dir.path().join("executions.jsonl"))
            .unwrap()
            .lines()
            .count()
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        let first = Execution::new("build");
        let second = Execution::new("deploy");
        store.save(&first).await.unwrap();
        store.save(&second).await.unwrap();

        assert_eq!(store.load_all().await.unwrap(), vec![first.clone(), second]);
        assert_eq!(store.load_one(first.id).await.unwrap(), first);
    }

    #[tokio::test]
    async fn test_load_unknown_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        let err = store.load_one(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_upsert_replaces_record() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        let mut execution = Execution::new("build");
        store.save(&execution).await.unwrap();
        execution.start(Utc::now()).unwrap();
        store.save(&execution).await.unwrap();

        let all = store.load_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].status, ExecutionStatus::Started);
        assert!(all[0].start_time.is_some());
    }

    #[tokio::test]
    async fn test_rejects_status_regression() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        let mut execution = Execution::new("build");
        let fresh = execution.clone();
        execution.start(Utc::now()).unwrap();
        execution.finish(Utc::now()).unwrap();
        store.save(&execution).await.unwrap();

        let err = store.save(&fresh).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
        assert_eq!(
            store.load_one(execution.id).await.unwrap().status,
            ExecutionStatus::Finished
        );
    }

    #[tokio::test]
    async fn test_reopen_replays_journal() {
        let dir = TempDir::new().unwrap();
        let mut execution = Execution::new("build");
        {
            let store = open_store(&dir).await;
            store.save(&execution).await.unwrap();
            execution.start(Utc::now()).unwrap();
            store.save(&execution).await.unwrap();
        }

        let store = open_store(&dir).await;
        assert_eq!(store.load_all().await.unwrap(), vec![execution]);
    }

    #[tokio::test]
    async fn test_malformed_journal_is_rejected() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("executions.jsonl"), "{not json}\n").unwrap();

        let result = JournalStatusStore::open(dir.path().join("executions.jsonl"), 4).await;
        assert!(matches!(result, Err(EngineError::Validation(_))));
    }

    #[tokio::test]
    async fn test_torn_last_line_is_discarded() {
        let dir = TempDir::new().unwrap();
        let first = Execution::new("build");
        {
            let store = open_store(&dir).await;
            store.save(&first).await.unwrap();
        }

        let path = dir.path().join("executions.jsonl");
        let mut journal = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        std::io::Write::write_all(&mut journal, br#"{"id":"3f2a"#).unwrap();
        drop(journal);

        let store = open_store(&dir).await;
        assert_eq!(store.load_all().await.unwrap(), vec![first.clone()]);

        let second = Execution::new("deploy");
        store.save(&second).await.unwrap();
        drop(store);

        assert_eq!(journal_lines(&dir), 2);
        let store = open_store(&dir).await;
        assert_eq!(store.load_all().await.unwrap(), vec![first, second]);
    }

    #[tokio::test]
    async fn test_unterminated_complete_record_is_kept() {
        let dir = TempDir::new().unwrap();
        let execution = Execution::new("build");
        std::fs::write(
            dir.path().join("executions.jsonl"),
            serde_json::to_string(&execution).unwrap(),
        )
        .unwrap();

        let store = open_store(&dir).await;
        let next = Execution::new("deploy");
        store.save(&next).await.unwrap();
        drop(store);

        let store = open_store(&dir).await;
        assert_eq!(store.load_all().await.unwrap(), vec![execution, next]);
    }

    #[tokio::test]
    async fn test_malformed_middle_line_is_rejected() {
        let dir = TempDir::new().unwrap();
        let execution = Execution::new("build");
        std::fs::write(
            dir.path().join("executions.jsonl"),
            format!("{{\"id\":\"3f2a\n{}\n", serde_json::to_string(&execution).unwrap()),
        )
        .unwrap();

        let result = JournalStatusStore::open(dir.path().join("executions.jsonl"), 4).await;
        assert!(matches!(result, Err(EngineError::Validation(_))));
    }

    #[tokio::test]
    async fn test_two_handles_share_the_journal() {
        let dir = TempDir::new().unwrap();
        let server = open_store(&dir).await;
        let cli = open_store(&dir).await;

        let mut server_job = Execution::new("server-job");
        server.save(&server_job).await.unwrap();

        // Enough re-saves for the second handle to compact the journal.
        let cli_job = Execution::new("cli-job");
        for _ in 0..10 {
            cli.save(&cli_job).await.unwrap();
        }
        assert!(journal_lines(&dir) < 11);

        server_job.start(Utc::now()).unwrap();
        server.save(&server_job).await.unwrap();

        assert_eq!(
            cli.load_one(server_job.id).await.unwrap().status,
            ExecutionStatus::Started
        );
        assert_eq!(server.load_one(cli_job.id).await.unwrap(), cli_job);
        drop(server);
        drop(cli);

        let store = open_store(&dir).await;
        let ids: Vec<Uuid> = store.load_all().await.unwrap().iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![server_job.id, cli_job.id]);
        assert_eq!(
            store.load_one(server_job.id).await.unwrap().status,
            ExecutionStatus::Started
        );
    }

    #[tokio::test]
    async fn test_compaction_keeps_latest_records() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        let mut execution = Execution::new("build");
        for _ in 0..6 {
            store.save(&execution).await.unwrap();
        }
        execution.start(Utc::now()).unwrap();
        store.save(&execution).await.unwrap();

        assert!(journal_lines(&dir) <= 4);
        drop(store);

        let store = open_store(&dir).await;
        let all = store.load_all().await.unwrap();
        assert_eq!(all, vec![execution]);
    }

    #[tokio::test]
    async fn test_failed_compaction_keeps_saves() {
        let dir = TempDir::new().unwrap();
        // A directory where the compacted journal would be written.
        std::fs::create_dir(dir.path().join("executions.jsonl.tmp")).unwrap();
        let store = open_store(&dir).await;

        let mut execution = Execution::new("build");
        for _ in 0..6 {
            store.save(&execution).await.unwrap();
        }
        execution.start(Utc::now()).unwrap();
        store.save(&execution).await.unwrap();
        assert_eq!(journal_lines(&dir), 7);
        drop(store);

        let store = open_store(&dir).await;
        assert_eq!(store.load_all().await.unwrap(), vec![execution]);
    }

    #[tokio::test]
    async fn test_concurrent_saves_are_all_persisted() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(open_store(&dir).await);

        let mut tasks = Vec::new();
        for i in 0..20 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                let mut execution = Execution::new(format!("job-{}", i));
                store.save(&execution).await.unwrap();
                execution.start(Utc::now()).unwrap();
                store.save(&execution).await.unwrap();
                execution.id
            }));
        }

        let mut ids = Vec::new();
        for task in tasks {
            ids.push(task.await.unwrap());
        }
        drop(store);

        let store = open_store(&dir).await;
        let all = store.load_all().await.unwrap();
        assert_eq!(all.len(), 20);
        for id in ids {
            let execution = store.load_one(id).await.unwrap();
            assert_eq!(execution.status, ExecutionStatus::Started);
        }
    }
}
