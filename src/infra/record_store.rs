use crate::app::ports::RecordStorePort;
use crate::domain::{ExternalFileId, LinkableRecord};
use crate::error::{IngestError, Result};
use async_trait::async_trait;
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Mutex;

/// Linkable records in a local SQLite database.
///
/// Rows are owned by whatever imports workshop items; this store only reads
/// them and patches `content_url`.
pub struct SqliteRecordStore {
    conn: Mutex<Connection>,
}

impl SqliteRecordStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            CREATE TABLE IF NOT EXISTS workshop_files (
                id               INTEGER PRIMARY KEY AUTOINCREMENT,
                external_file_id TEXT NOT NULL,
                content_url      TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_workshop_files_external_id
                ON workshop_files (external_file_id);
            "#,
        )?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| IngestError::Records("connection mutex poisoned".to_string()))
    }

    /// Register a record for `id` with no content URL yet.
    pub fn insert_record(&self, id: &ExternalFileId) -> Result<i64> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO workshop_files (external_file_id, content_url) VALUES (?1, NULL)",
            params![id.as_str()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn records_for(&self, id: &ExternalFileId) -> Result<Vec<LinkableRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT external_file_id, content_url FROM workshop_files WHERE external_file_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![id.as_str()], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (raw_id, content_url) = row?;
            out.push(LinkableRecord { external_file_id: ExternalFileId::parse(raw_id)?, content_url });
        }
        Ok(out)
    }
}

#[async_trait]
impl RecordStorePort for SqliteRecordStore {
    async fn find_records(&self, id: &ExternalFileId) -> Result<Vec<LinkableRecord>> {
        self.records_for(id)
    }

    async fn set_content_url(&self, id: &ExternalFileId, locator: &str) -> Result<usize> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE workshop_files SET content_url = ?2
             WHERE external_file_id = ?1 AND (content_url IS NULL OR content_url <> ?2)",
            params![id.as_str(), locator],
        )?;
        Ok(changed)
    }
}

/// Vec-backed record store for tests.
#[derive(Default)]
pub struct InMemoryRecordStore {
    records: Mutex<Vec<LinkableRecord>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, record: LinkableRecord) {
        self.records.lock().unwrap_or_else(|p| p.into_inner()).push(record);
    }

    pub fn all(&self) -> Vec<LinkableRecord> {
        self.records.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

#[async_trait]
impl RecordStorePort for InMemoryRecordStore {
    async fn find_records(&self, id: &ExternalFileId) -> Result<Vec<LinkableRecord>> {
        Ok(self.all().into_iter().filter(|r| &r.external_file_id == id).collect())
    }

    async fn set_content_url(&self, id: &ExternalFileId, locator: &str) -> Result<usize> {
        let mut records = self.records.lock().unwrap_or_else(|p| p.into_inner());
        let mut changed = 0;
        for record in records.iter_mut().filter(|r| &r.external_file_id == id) {
            if record.content_url.as_deref() != Some(locator) {
                record.content_url = Some(locator.to_string());
                changed += 1;
            }
        }
        Ok(changed)
    }
}
