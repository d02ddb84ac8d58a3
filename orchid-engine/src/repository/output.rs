//! Output channels
//!
//! Each execution owns one append-only output file, `<root>/logs/<id>`. A
//! single [`OutputWriter`] appends to it while any number of [`OutputStream`]
//! readers replay it from the start and follow it until a terminal sentinel
//! line is read.
//!
//! Readers attached in the same process are woken through a watch channel on
//! every append. Files written by another process are followed by polling.

use std::collections::HashMap;
use std::io::Write as _;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use orchid_core::output::{Sentinel, escape_line, unescape_line};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::watch;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::config::output_path;
use crate::error::{EngineError, Result};

type LiveWriters = Arc<Mutex<HashMap<Uuid, watch::Sender<u64>>>>;

/// Registry of execution output files
#[derive(Clone)]
pub struct OutputChannels {
    dir: PathBuf,
    poll_interval: Duration,
    live: LiveWriters,
}

impl OutputChannels {
    /// Creates a registry for output files under `dir`
    pub fn new(dir: impl Into<PathBuf>, poll_interval: Duration) -> Self {
        Self {
            dir: dir.into(),
            poll_interval,
            live: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Path of the output file of an execution
    pub fn path(&self, execution_id: Uuid) -> PathBuf {
        output_path(&self.dir, execution_id)
    }

    /// Creates the output file of a new execution and returns its writer
    ///
    /// Fails if the file already exists; an execution has exactly one writer.
    pub async fn open(&self, execution_id: Uuid) -> Result<OutputWriter> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let path = self.path(execution_id);
        let file = OpenOptions::new()
            .create_new(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::AlreadyExists => EngineError::InvalidState(format!(
                    "Output of execution {} already exists",
                    execution_id
                )),
                _ => EngineError::Io(e),
            })?;

        let (notify, _) = watch::channel(0);
        self.live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(execution_id, notify.clone());

        debug!("Opened output {}", path.display());

        Ok(OutputWriter {
            execution_id,
            path,
            file,
            notify,
            live: self.live.clone(),
            dirty: false,
            sealed: false,
        })
    }

    /// Opens a reader over the output of an execution
    ///
    /// The reader starts at the beginning of the output and follows it until
    /// a sentinel line is reached.
    pub async fn stream(&self, execution_id: Uuid) -> Result<OutputStream> {
        // Subscribe before opening so no append between the two is missed.
        let notify = self
            .live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&execution_id)
            .map(|tx| tx.subscribe());

        let file = File::open(self.path(execution_id))
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => EngineError::not_found("Execution output", execution_id),
                _ => EngineError::Io(e),
            })?;

        Ok(OutputStream {
            execution_id,
            reader: BufReader::new(file),
            pending: Vec::new(),
            follow: match notify {
                Some(rx) => Follow::Notified(rx),
                None => Follow::Polling,
            },
            poll_interval: self.poll_interval,
            sentinel: None,
        })
    }
}

/// Sole appender of one execution's output
///
/// Dropping a writer that was never closed seals the output with the error
/// sentinel, so readers are never left waiting on an abandoned execution.
pub struct OutputWriter {
    execution_id: Uuid,
    path: PathBuf,
    file: File,
    notify: watch::Sender<u64>,
    live: LiveWriters,
    dirty: bool,
    sealed: bool,
}

impl OutputWriter {
    /// Appends one line of content
    ///
    /// Trailing line terminators are stripped; lines that would read as a
    /// sentinel are escaped.
    pub async fn append(&mut self, line: &str) -> Result<()> {
        if self.sealed {
            return Err(EngineError::InvalidState(format!(
                "Output of execution {} is already sealed",
                self.execution_id
            )));
        }

        let line = line.trim_end_matches(['\n', '\r']);
        let mut stored = escape_line(line).into_owned();
        stored.push('\n');
        self.write(stored.as_bytes()).await
    }

    /// Appends the terminal sentinel and releases the output
    pub async fn close(mut self, sentinel: Sentinel) -> Result<()> {
        let mut line = sentinel.as_line().to_string();
        line.push('\n');
        self.write(line.as_bytes()).await?;
        self.sealed = true;

        debug!("Sealed output of execution {} with {}", self.execution_id, sentinel);
        Ok(())
    }

    /// Deletes the output of an execution that was never recorded
    pub async fn discard(mut self) -> Result<()> {
        self.sealed = true;
        tokio::fs::remove_file(&self.path).await?;

        debug!("Discarded output of execution {}", self.execution_id);
        Ok(())
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.dirty = true;
        self.file.write_all(bytes).await?;
        self.file.flush().await?;
        self.dirty = false;
        self.notify.send_modify(|appended| *appended += 1);
        Ok(())
    }

    /// Synchronous last-resort seal used when the writer is dropped
    fn seal_on_drop(&self) -> std::io::Result<()> {
        let mut file = std::fs::OpenOptions::new().append(true).open(&self.path)?;
        if self.dirty {
            file.write_all(b"\n")?;
        }
        writeln!(file, "{}", Sentinel::Error.as_line())?;
        file.flush()
    }
}

impl Drop for OutputWriter {
    fn drop(&mut self) {
        if !self.sealed {
            warn!(
                "Output of execution {} released without a terminal line; sealing with {}",
                self.execution_id,
                Sentinel::Error
            );
            match self.seal_on_drop() {
                Ok(()) => self.notify.send_modify(|appended| *appended += 1),
                Err(e) => error!(
                    "Failed to seal output of execution {}: {}",
                    self.execution_id, e
                ),
            }
        }

        self.live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.execution_id);
    }
}

enum Follow {
    /// Writer lives in this process and announces appends
    Notified(watch::Receiver<u64>),
    /// Writer is elsewhere (or already gone); re-check periodically
    Polling,
    /// Writer was released; whatever is in the file is all there will be
    Drained,
}

/// Replaying, following reader of one execution's output
pub struct OutputStream {
    execution_id: Uuid,
    reader: BufReader<File>,
    pending: Vec<u8>,
    follow: Follow,
    poll_interval: Duration,
    sentinel: Option<Sentinel>,
}

impl OutputStream {
    pub fn execution_id(&self) -> Uuid {
        self.execution_id
    }

    /// Reads the next line of content
    ///
    /// Waits for more output while the execution is running. Returns
    /// `Ok(None)` once a sentinel line is read; the sentinel is available
    /// from [`OutputStream::sentinel`] and is never returned as content.
    pub async fn next_line(&mut self) -> Result<Option<String>> {
        if self.sentinel.is_some() {
            return Ok(None);
        }

        loop {
            self.reader.read_until(b'\n', &mut self.pending).await?;

            if self.pending.last() == Some(&b'\n') {
                let mut bytes = std::mem::take(&mut self.pending);
                bytes.pop();
                let line = String::from_utf8_lossy(&bytes);

                if let Some(sentinel) = Sentinel::parse(&line) {
                    self.sentinel = Some(sentinel);
                    return Ok(None);
                }
                return Ok(Some(unescape_line(&line).into_owned()));
            }

            // End of file without a complete line: wait for the writer.
            self.wait_for_output().await?;
        }
    }

    /// The sentinel that ended the output, once reached
    pub fn sentinel(&self) -> Option<Sentinel> {
        self.sentinel
    }

    async fn wait_for_output(&mut self) -> Result<()> {
        match &mut self.follow {
            Follow::Notified(rx) => {
                if rx.changed().await.is_err() {
                    self.follow = Follow::Drained;
                }
                Ok(())
            }
            Follow::Polling => {
                tokio::time::sleep(self.poll_interval).await;
                Ok(())
            }
            Follow::Drained => Err(EngineError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!(
                    "Output of execution {} ended without a terminal line",
                    self.execution_id
                ),
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn channels(dir: &TempDir) -> OutputChannels {
        OutputChannels::new(dir.path().join("logs"), Duration::from_millis(10))
    }

    async fn collect(stream: &mut OutputStream) -> Vec<String> {
        let mut lines = Vec::new();
        while let Some(line) = stream.next_line().await.unwrap() {
            lines.push(line);
        }
        lines
    }

    #[tokio::test]
    async fn test_replays_completed_output() {
        let dir = TempDir::new().unwrap();
        let channels = channels(&dir);
        let id = Uuid::new_v4();

        let mut writer = channels.open(id).await.unwrap();
        writer.append("compiling").await.unwrap();
        writer.append("testing\n").await.unwrap();
        writer.close(Sentinel::Finished).await.unwrap();

        let mut stream = channels.stream(id).await.unwrap();
        assert_eq!(collect(&mut stream).await, vec!["compiling", "testing"]);
        assert_eq!(stream.sentinel(), Some(Sentinel::Finished));

        let contents = std::fs::read_to_string(channels.path(id)).unwrap();
        assert_eq!(contents, "compiling\ntesting\n-----Finished-----\n");
    }

    #[tokio::test]
    async fn test_follows_live_output() {
        let dir = TempDir::new().unwrap();
        let channels = channels(&dir);
        let id = Uuid::new_v4();

        let mut writer = channels.open(id).await.unwrap();
        writer.append("first").await.unwrap();

        let mut stream = channels.stream(id).await.unwrap();
        assert_eq!(stream.next_line().await.unwrap().as_deref(), Some("first"));

        let reader = tokio::spawn(async move {
            let lines = collect(&mut stream).await;
            (lines, stream.sentinel())
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        writer.append("second").await.unwrap();
        writer.append("third").await.unwrap();
        writer.close(Sentinel::Error).await.unwrap();

        let (lines, sentinel) = reader.await.unwrap();
        assert_eq!(lines, vec!["second", "third"]);
        assert_eq!(sentinel, Some(Sentinel::Error));
    }

    #[tokio::test]
    async fn test_concurrent_readers_see_identical_output() {
        let dir = TempDir::new().unwrap();
        let channels = channels(&dir);
        let id = Uuid::new_v4();
        let mut writer = channels.open(id).await.unwrap();

        let mut readers = Vec::new();
        for _ in 0..3 {
            let mut stream = channels.stream(id).await.unwrap();
            readers.push(tokio::spawn(async move { collect(&mut stream).await }));
        }

        for i in 0..50 {
            writer.append(&format!("line {}", i)).await.unwrap();
        }
        writer.close(Sentinel::Finished).await.unwrap();

        let expected: Vec<String> = (0..50).map(|i| format!("line {}", i)).collect();
        for reader in readers {
            assert_eq!(reader.await.unwrap(), expected);
        }
    }

    #[tokio::test]
    async fn test_polls_output_written_elsewhere() {
        let dir = TempDir::new().unwrap();
        let channels = channels(&dir);
        let id = Uuid::new_v4();
        let path = channels.path(id);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "par").unwrap();

        let mut stream = channels.stream(id).await.unwrap();
        let reader = tokio::spawn(async move { collect(&mut stream).await });

        tokio::time::sleep(Duration::from_millis(30)).await;
        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"tial\ndone\n-----Finished-----\n").unwrap();

        assert_eq!(reader.await.unwrap(), vec!["partial", "done"]);
    }

    #[tokio::test]
    async fn test_dropped_writer_seals_with_error() {
        let dir = TempDir::new().unwrap();
        let channels = channels(&dir);
        let id = Uuid::new_v4();

        let mut writer = channels.open(id).await.unwrap();
        let mut stream = channels.stream(id).await.unwrap();
        writer.append("half way").await.unwrap();
        drop(writer);

        assert_eq!(collect(&mut stream).await, vec!["half way"]);
        assert_eq!(stream.sentinel(), Some(Sentinel::Error));
        assert!(!channels.live.lock().unwrap().contains_key(&id));
    }

    #[tokio::test]
    async fn test_discarded_output_leaves_no_file() {
        let dir = TempDir::new().unwrap();
        let channels = channels(&dir);
        let id = Uuid::new_v4();

        let writer = channels.open(id).await.unwrap();
        assert!(channels.path(id).exists());
        writer.discard().await.unwrap();

        assert!(!channels.path(id).exists());
        assert!(!channels.live.lock().unwrap().contains_key(&id));
        assert!(matches!(
            channels.stream(id).await,
            Err(EngineError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_sentinel_lookalike_content_is_preserved() {
        let dir = TempDir::new().unwrap();
        let channels = channels(&dir);
        let id = Uuid::new_v4();

        let mut writer = channels.open(id).await.unwrap();
        writer.append("-----Finished-----").await.unwrap();
        writer.append("after").await.unwrap();
        writer.close(Sentinel::Finished).await.unwrap();

        let mut stream = channels.stream(id).await.unwrap();
        assert_eq!(collect(&mut stream).await, vec!["-----Finished-----", "after"]);
    }

    #[tokio::test]
    async fn test_second_writer_is_rejected() {
        let dir = TempDir::new().unwrap();
        let channels = channels(&dir);
        let id = Uuid::new_v4();

        let writer = channels.open(id).await.unwrap();
        assert!(matches!(
            channels.open(id).await,
            Err(EngineError::InvalidState(_))
        ));
        writer.close(Sentinel::Finished).await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_execution_is_not_found() {
        let dir = TempDir::new().unwrap();
        let channels = channels(&dir);

        assert!(matches!(
            channels.stream(Uuid::new_v4()).await,
            Err(EngineError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_append_after_close_is_rejected() {
        let dir = TempDir::new().unwrap();
        let channels = channels(&dir);
        let id = Uuid::new_v4();

        let mut writer = channels.open(id).await.unwrap();
        writer.sealed = true;
        assert!(writer.append("late").await.is_err());
    }
}
