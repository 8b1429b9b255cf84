//! File-backed message queues.
//!
//! Each queue is an append-only NDJSON file under the transport directory;
//! consumers track a byte offset per queue in `meta.db`. Delivery is
//! at-least-once: a consumer commits only after it has handled or re-queued
//! every message in a batch.

use crate::app::ports::AnalyzeSinkPort;
use crate::constants::ANALYZE_QUEUE;
use crate::domain::AnalyzeRequest;
use crate::error::{IngestError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub message_id: Uuid,
    /// Deliveries that ended in failure so far.
    #[serde(default)]
    pub delivery_count: u32,
    pub enqueued_at: DateTime<Utc>,
    pub body: T,
}

impl<T> Envelope<T> {
    pub fn new(body: T) -> Self {
        Self { message_id: Uuid::new_v4(), delivery_count: 0, enqueued_at: Utc::now(), body }
    }

    /// The same message queued again after a failed delivery.
    pub fn redelivery(self) -> Self {
        Self { delivery_count: self.delivery_count + 1, enqueued_at: Utc::now(), ..self }
    }
}

#[derive(Debug)]
pub struct Batch<T> {
    pub messages: Vec<Envelope<T>>,
    /// Offset to commit once every message in the batch is settled.
    pub next_offset: u64,
    /// Lines that could not be decoded and were skipped.
    pub malformed: usize,
}

pub struct MessageLog {
    dir: PathBuf,
    meta: Mutex<Connection>,
    append_lock: Mutex<()>,
}

impl MessageLog {
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        let conn = Connection::open(dir.join("meta.db"))?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            CREATE TABLE IF NOT EXISTS consumer_offsets (
                consumer     TEXT NOT NULL,
                queue        TEXT NOT NULL,
                byte_offset  INTEGER NOT NULL,
                PRIMARY KEY (consumer, queue)
            );
            "#,
        )?;
        Ok(Self { dir, meta: Mutex::new(conn), append_lock: Mutex::new(()) })
    }

    fn queue_path(&self, queue: &str) -> PathBuf {
        self.dir.join(format!("{}.ndjson", queue))
    }

    fn meta(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.meta
            .lock()
            .map_err(|_| IngestError::Transport("offset store mutex poisoned".to_string()))
    }

    /// Wrap `body` in a fresh envelope and append it to `queue`.
    pub fn append<T: Serialize>(&self, queue: &str, body: T) -> Result<Envelope<T>> {
        let envelope = Envelope::new(body);
        self.append_envelope(queue, &envelope)?;
        Ok(envelope)
    }

    pub fn append_envelope<T: Serialize>(&self, queue: &str, envelope: &Envelope<T>) -> Result<()> {
        let mut line = serde_json::to_string(envelope)?;
        line.push('\n');
        let _guard = self
            .append_lock
            .lock()
            .map_err(|_| IngestError::Transport("append mutex poisoned".to_string()))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.queue_path(queue))?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }

    pub fn offset(&self, consumer: &str, queue: &str) -> Result<u64> {
        let conn = self.meta()?;
        let mut stmt =
            conn.prepare("SELECT byte_offset FROM consumer_offsets WHERE consumer = ?1 AND queue = ?2")?;
        let mut rows = stmt.query(params![consumer, queue])?;
        if let Some(row) = rows.next()? {
            Ok(row.get::<_, i64>(0)? as u64)
        } else {
            Ok(0)
        }
    }

    pub fn commit(&self, consumer: &str, queue: &str, byte_offset: u64) -> Result<()> {
        self.meta()?.execute(
            "INSERT INTO consumer_offsets (consumer, queue, byte_offset) VALUES (?1, ?2, ?3)
             ON CONFLICT(consumer, queue) DO UPDATE SET byte_offset=excluded.byte_offset",
            params![consumer, queue, byte_offset as i64],
        )?;
        Ok(())
    }

    /// Read up to `max` complete messages after the consumer's committed offset.
    pub fn read_batch<T: DeserializeOwned>(&self, queue: &str, consumer: &str, max: usize) -> Result<Batch<T>> {
        let start = self.offset(consumer, queue)?;
        let file = match File::open(self.queue_path(queue)) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Ok(Batch { messages: Vec::new(), next_offset: start, malformed: 0 });
            }
            Err(e) => return Err(e.into()),
        };
        let mut reader = BufReader::new(file);
        reader.seek(SeekFrom::Start(start))?;

        let mut messages = Vec::new();
        let mut malformed = 0;
        let mut offset = start;
        let mut line = String::new();
        while messages.len() < max {
            line.clear();
            let read = reader.read_line(&mut line)?;
            // A line without its newline is still being written.
            if read == 0 || !line.ends_with('\n') {
                break;
            }
            offset += read as u64;
            match serde_json::from_str::<Envelope<T>>(line.trim_end()) {
                Ok(envelope) => messages.push(envelope),
                Err(e) => {
                    malformed += 1;
                    warn!(queue = %queue, offset, "skipping malformed message: {}", e);
                }
            }
        }
        Ok(Batch { messages, next_offset: offset, malformed })
    }

    /// Every decodable message in `queue`, ignoring offsets.
    pub fn read_all<T: DeserializeOwned>(&self, queue: &str) -> Result<Vec<Envelope<T>>> {
        let file = match File::open(self.queue_path(queue)) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut out = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if let Ok(envelope) = serde_json::from_str(&line) {
                out.push(envelope);
            }
        }
        Ok(out)
    }
}

/// Emits analysis requests onto the analyze queue.
pub struct LogAnalyzeSink {
    log: Arc<MessageLog>,
}

impl LogAnalyzeSink {
    pub fn new(log: Arc<MessageLog>) -> Self {
        Self { log }
    }
}

#[async_trait]
impl AnalyzeSinkPort for LogAnalyzeSink {
    async fn emit(&self, request: AnalyzeRequest) -> Result<()> {
        self.log.append(ANALYZE_QUEUE, request)?;
        Ok(())
    }
}
