//! SQLite-backed metadata store
//!
//! Holds documents, chunks (including dense embeddings), processing
//! profiles, queue jobs, remote folder bindings, status transitions and
//! processing metrics. A FTS5 virtual table over `{heading, breadcrumbs,
//! content}` is kept in sync by triggers and serves as the lexical index for
//! hybrid search.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::retrieval::RankedHit;
use crate::types::chunk::{Chunk, ChunkType, QualityFlag, SparseVector};
use crate::types::document::{
    ConnectionState, Document, DocumentStatus, FileFormat, SourceType,
};
use crate::types::job::{JobError, JobState, ProcessingJob};
use crate::types::profile::{ProcessingProfile, ProfileConfig};
use crate::types::query::SearchFilter;
use crate::types::remote::{RemoteFolderBinding, SyncStatus};
use crate::types::response::StatusCounts;

/// Parameters of a status mutation applied through the state machine
#[derive(Debug, Clone)]
pub struct StatusChange {
    pub to: DocumentStatus,
    /// Human-readable reason recorded in the transition log
    pub reason: String,
    /// New fail reason; None clears the column
    pub fail_reason: Option<String>,
    /// Drop existing chunks in the same transaction
    pub clear_chunks: bool,
    /// Record one more delivery attempt
    pub increment_retry: bool,
}

/// Listing filter for the documents collection
#[derive(Debug, Clone, Default)]
pub struct DocumentListQuery {
    pub status: Option<DocumentStatus>,
    pub search: Option<String>,
    pub source_type: Option<SourceType>,
    pub connection_state: Option<ConnectionState>,
    pub sort_by: Option<String>,
    pub sort_desc: bool,
    pub limit: usize,
    pub offset: usize,
}

/// SQLite-based metadata store
pub struct MetadataStore {
    conn: Arc<Mutex<Connection>>,
}

impl MetadataStore {
    /// Create or open the database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)
            .map_err(|e| Error::database(format!("failed to open database: {}", e)))?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.migrate()?;
        Ok(store)
    }

    /// In-memory database for tests and ephemeral runs
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::database(format!("failed to open in-memory database: {}", e)))?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            PRAGMA foreign_keys=ON;
            PRAGMA cache_size=10000;
            PRAGMA temp_store=MEMORY;
        "#,
        )
        .map_err(|e| Error::database(format!("failed to set pragmas: {}", e)))?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                filename TEXT NOT NULL,
                mime_type TEXT NOT NULL,
                file_size INTEGER NOT NULL,
                format TEXT NOT NULL,
                status TEXT NOT NULL,
                md5_hash TEXT NOT NULL UNIQUE,
                file_path TEXT NOT NULL,
                retry_count INTEGER NOT NULL DEFAULT 0,
                fail_reason TEXT,
                is_active INTEGER NOT NULL DEFAULT 1,
                source_type TEXT NOT NULL,
                connection_state TEXT NOT NULL,
                remote_file_id TEXT UNIQUE,
                remote_folder_id TEXT,
                remote_modified_time TEXT,
                profile_id TEXT,
                chunk_count INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_documents_status ON documents(status);
            CREATE INDEX IF NOT EXISTS idx_documents_remote_folder ON documents(remote_folder_id);

            CREATE TABLE IF NOT EXISTS chunks (
                id TEXT PRIMARY KEY,
                document_id TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
                chunk_index INTEGER NOT NULL,
                content TEXT NOT NULL,
                char_start INTEGER NOT NULL,
                char_end INTEGER NOT NULL,
                heading TEXT,
                breadcrumbs TEXT NOT NULL,
                page INTEGER,
                quality_score REAL NOT NULL,
                quality_flags TEXT NOT NULL,
                chunk_type TEXT NOT NULL,
                token_count INTEGER NOT NULL,
                embedding BLOB,
                sparse_embedding TEXT,
                created_at TEXT NOT NULL,
                UNIQUE(document_id, chunk_index)
            );

            CREATE INDEX IF NOT EXISTS idx_chunks_document ON chunks(document_id);

            -- Lexical index over heading path and content, trigger-refreshed.
            CREATE VIRTUAL TABLE IF NOT EXISTS chunks_fts USING fts5(
                heading,
                breadcrumbs,
                content,
                content='chunks',
                content_rowid='rowid'
            );

            CREATE TRIGGER IF NOT EXISTS chunks_ai AFTER INSERT ON chunks BEGIN
                INSERT INTO chunks_fts(rowid, heading, breadcrumbs, content)
                VALUES (NEW.rowid, NEW.heading, NEW.breadcrumbs, NEW.content);
            END;

            CREATE TRIGGER IF NOT EXISTS chunks_ad AFTER DELETE ON chunks BEGIN
                INSERT INTO chunks_fts(chunks_fts, rowid, heading, breadcrumbs, content)
                VALUES ('delete', OLD.rowid, OLD.heading, OLD.breadcrumbs, OLD.content);
            END;

            CREATE TRIGGER IF NOT EXISTS chunks_au AFTER UPDATE ON chunks BEGIN
                INSERT INTO chunks_fts(chunks_fts, rowid, heading, breadcrumbs, content)
                VALUES ('delete', OLD.rowid, OLD.heading, OLD.breadcrumbs, OLD.content);
                INSERT INTO chunks_fts(rowid, heading, breadcrumbs, content)
                VALUES (NEW.rowid, NEW.heading, NEW.breadcrumbs, NEW.content);
            END;

            CREATE TABLE IF NOT EXISTS processing_profiles (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                config TEXT NOT NULL,
                is_default INTEGER NOT NULL DEFAULT 0,
                is_active INTEGER NOT NULL DEFAULT 0,
                is_archived INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS processing_jobs (
                id TEXT PRIMARY KEY,
                document_id TEXT NOT NULL,
                file_path TEXT NOT NULL,
                format TEXT NOT NULL,
                profile_config TEXT NOT NULL,
                attempts_made INTEGER NOT NULL DEFAULT 0,
                max_attempts INTEGER NOT NULL,
                next_run_at TEXT NOT NULL,
                state TEXT NOT NULL,
                last_error TEXT,
                reserved_until TEXT,
                created_at TEXT NOT NULL,
                finished_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_jobs_state ON processing_jobs(state);
            CREATE INDEX IF NOT EXISTS idx_jobs_document ON processing_jobs(document_id);

            CREATE TABLE IF NOT EXISTS remote_folder_bindings (
                id TEXT PRIMARY KEY,
                remote_folder_id TEXT NOT NULL,
                recursive INTEGER NOT NULL DEFAULT 0,
                page_token TEXT,
                last_synced_at TEXT,
                sync_status TEXT NOT NULL,
                sync_error TEXT,
                profile_id TEXT,
                enabled INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS document_transitions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                document_id TEXT NOT NULL,
                from_status TEXT NOT NULL,
                to_status TEXT NOT NULL,
                reason TEXT NOT NULL,
                at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_transitions_document
                ON document_transitions(document_id);

            CREATE TABLE IF NOT EXISTS processing_metrics (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                document_id TEXT NOT NULL,
                lane TEXT NOT NULL,
                duration_ms INTEGER NOT NULL,
                chunk_count INTEGER NOT NULL,
                outcome TEXT NOT NULL,
                recorded_at TEXT NOT NULL
            );
        "#,
        )
        .map_err(|e| Error::database(format!("failed to run migrations: {}", e)))?;

        tracing::info!("database migrations complete");
        Ok(())
    }

    /// Seed the default profile when none exists. Called once at startup.
    pub fn seed_default_profile(&self, config: &ProfileConfig) -> Result<ProcessingProfile> {
        let conn = self.conn.lock();
        let existing = conn
            .query_row(
                "SELECT * FROM processing_profiles WHERE is_default = 1",
                [],
                row_to_profile,
            )
            .optional()
            .map_err(db_err)?;

        if let Some(profile) = existing {
            return Ok(profile);
        }

        let mut profile = ProcessingProfile::new("default".to_string(), config.clone());
        profile.is_default = true;
        profile.is_active = true;

        conn.execute(
            r#"INSERT INTO processing_profiles
               (id, name, config, is_default, is_active, is_archived, created_at, updated_at)
               VALUES (?1, ?2, ?3, 1, 1, 0, ?4, ?5)"#,
            params![
                profile.id.to_string(),
                profile.name,
                serde_json::to_string(&profile.config)?,
                profile.created_at,
                profile.updated_at,
            ],
        )
        .map_err(db_err)?;

        tracing::info!(profile_id = %profile.id, "seeded default processing profile");
        Ok(profile)
    }

    // ==================== Documents ====================

    /// Insert a new document. Enforces MD5 uniqueness; a clash reports the
    /// existing document's id.
    pub fn insert_document(&self, doc: &Document) -> Result<()> {
        let conn = self.conn.lock();

        let existing: Option<String> = conn
            .query_row(
                "SELECT id FROM documents WHERE md5_hash = ?1",
                params![doc.md5_hash],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?;

        if let Some(id) = existing {
            let existing_id = Uuid::parse_str(&id)
                .map_err(|e| Error::database(format!("corrupt document id: {}", e)))?;
            return Err(Error::DuplicateFile { existing_id });
        }

        conn.execute(
            r#"INSERT INTO documents
               (id, filename, mime_type, file_size, format, status, md5_hash, file_path,
                retry_count, fail_reason, is_active, source_type, connection_state,
                remote_file_id, remote_folder_id, remote_modified_time, profile_id,
                chunk_count, created_at, updated_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                       ?16, ?17, ?18, ?19, ?20)"#,
            params![
                doc.id.to_string(),
                doc.filename,
                doc.mime_type,
                doc.file_size as i64,
                doc.format.as_str(),
                doc.status.as_str(),
                doc.md5_hash,
                doc.file_path.to_string_lossy().into_owned(),
                doc.retry_count as i64,
                doc.fail_reason,
                doc.is_active as i64,
                doc.source_type.as_str(),
                doc.connection_state.as_str(),
                doc.remote_file_id,
                doc.remote_folder_id,
                doc.remote_modified_time,
                doc.profile_id.map(|id| id.to_string()),
                doc.chunk_count as i64,
                doc.created_at,
                doc.updated_at,
            ],
        )
        .map_err(db_err)?;

        Ok(())
    }

    pub fn get_document(&self, id: Uuid) -> Result<Option<Document>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT * FROM documents WHERE id = ?1",
            params![id.to_string()],
            row_to_document,
        )
        .optional()
        .map_err(db_err)
    }

    /// Dedup lookup by content hash
    pub fn get_document_by_hash(&self, md5_hash: &str) -> Result<Option<Document>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT * FROM documents WHERE md5_hash = ?1",
            params![md5_hash],
            row_to_document,
        )
        .optional()
        .map_err(db_err)
    }

    /// Dedup lookup by remote file id (sync path)
    pub fn get_document_by_remote_id(&self, remote_file_id: &str) -> Result<Option<Document>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT * FROM documents WHERE remote_file_id = ?1",
            params![remote_file_id],
            row_to_document,
        )
        .optional()
        .map_err(db_err)
    }

    /// Documents tracked under a remote folder (full-sync removal detection)
    pub fn get_documents_by_remote_folder(&self, folder_id: &str) -> Result<Vec<Document>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT * FROM documents WHERE remote_folder_id = ?1")
            .map_err(db_err)?;
        let result = stmt
            .query_map(params![folder_id], row_to_document)
            .map_err(db_err)?
            .collect::<std::result::Result<_, _>>()
            .map_err(db_err);
        result
    }

    /// Apply a status change guarded by the row's `updated_at` (optimistic
    /// lock). Returns the refreshed document, or `StateConflict` when the
    /// row moved underneath the caller.
    pub fn apply_status_change(
        &self,
        id: Uuid,
        expected_updated_at: DateTime<Utc>,
        change: &StatusChange,
    ) -> Result<Document> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(db_err)?;

        let current: Option<Document> = tx
            .query_row(
                "SELECT * FROM documents WHERE id = ?1",
                params![id.to_string()],
                row_to_document,
            )
            .optional()
            .map_err(db_err)?;

        let current = current.ok_or_else(|| Error::DocumentNotFound(id.to_string()))?;

        let now = Utc::now();
        let retry_increment = i64::from(change.increment_retry);

        let updated = tx
            .execute(
                r#"UPDATE documents
                   SET status = ?1,
                       fail_reason = ?2,
                       retry_count = retry_count + ?3,
                       chunk_count = CASE WHEN ?4 THEN 0 ELSE chunk_count END,
                       updated_at = ?5
                   WHERE id = ?6 AND updated_at = ?7"#,
                params![
                    change.to.as_str(),
                    change.fail_reason,
                    retry_increment,
                    change.clear_chunks,
                    now,
                    id.to_string(),
                    expected_updated_at,
                ],
            )
            .map_err(db_err)?;

        if updated == 0 {
            return Err(Error::StateConflict(format!(
                "document {} changed concurrently",
                id
            )));
        }

        if change.clear_chunks {
            tx.execute(
                "DELETE FROM chunks WHERE document_id = ?1",
                params![id.to_string()],
            )
            .map_err(db_err)?;
        }

        tx.execute(
            r#"INSERT INTO document_transitions (document_id, from_status, to_status, reason, at)
               VALUES (?1, ?2, ?3, ?4, ?5)"#,
            params![
                id.to_string(),
                current.status.as_str(),
                change.to.as_str(),
                change.reason,
                now,
            ],
        )
        .map_err(db_err)?;

        let refreshed = tx
            .query_row(
                "SELECT * FROM documents WHERE id = ?1",
                params![id.to_string()],
                row_to_document,
            )
            .map_err(db_err)?;

        tx.commit().map_err(db_err)?;
        Ok(refreshed)
    }

    /// Persist a document's full chunk set and mark it COMPLETED in one
    /// transaction. Pre-existing chunks are removed first, which makes the
    /// operation safe for reprocessing. The optimistic lock applies.
    pub fn complete_with_chunks(
        &self,
        id: Uuid,
        expected_updated_at: DateTime<Utc>,
        chunks: &[Chunk],
        reason: &str,
    ) -> Result<Document> {
        if chunks.is_empty() {
            return Err(Error::Internal(
                "refusing to mark a document COMPLETED with zero chunks".into(),
            ));
        }

        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(db_err)?;

        let current: Option<Document> = tx
            .query_row(
                "SELECT * FROM documents WHERE id = ?1",
                params![id.to_string()],
                row_to_document,
            )
            .optional()
            .map_err(db_err)?;
        let current = current.ok_or_else(|| Error::DocumentNotFound(id.to_string()))?;

        let now = Utc::now();
        let updated = tx
            .execute(
                r#"UPDATE documents
                   SET status = 'COMPLETED', fail_reason = NULL, chunk_count = ?1, updated_at = ?2
                   WHERE id = ?3 AND updated_at = ?4"#,
                params![chunks.len() as i64, now, id.to_string(), expected_updated_at],
            )
            .map_err(db_err)?;

        if updated == 0 {
            return Err(Error::StateConflict(format!(
                "document {} changed concurrently",
                id
            )));
        }

        tx.execute(
            "DELETE FROM chunks WHERE document_id = ?1",
            params![id.to_string()],
        )
        .map_err(db_err)?;

        {
            let mut stmt = tx
                .prepare(
                    r#"INSERT INTO chunks
                       (id, document_id, chunk_index, content, char_start, char_end, heading,
                        breadcrumbs, page, quality_score, quality_flags, chunk_type, token_count,
                        embedding, sparse_embedding, created_at)
                       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)"#,
                )
                .map_err(db_err)?;

            // Strict index order so a reader never sees a gap.
            for chunk in chunks {
                let flags: Vec<&str> =
                    chunk.quality_flags.iter().map(|f| f.as_str()).collect();
                stmt.execute(params![
                    chunk.id.to_string(),
                    chunk.document_id.to_string(),
                    chunk.chunk_index as i64,
                    chunk.content,
                    chunk.char_start as i64,
                    chunk.char_end as i64,
                    chunk.heading,
                    serde_json::to_string(&chunk.breadcrumbs)?,
                    chunk.page.map(|p| p as i64),
                    chunk.quality_score as f64,
                    serde_json::to_string(&flags)?,
                    chunk.chunk_type.as_str(),
                    chunk.token_count as i64,
                    encode_embedding(&chunk.embedding),
                    chunk
                        .sparse_embedding
                        .as_ref()
                        .map(serde_json::to_string)
                        .transpose()?,
                    chunk.created_at,
                ])
                .map_err(db_err)?;
            }
        }

        tx.execute(
            r#"INSERT INTO document_transitions (document_id, from_status, to_status, reason, at)
               VALUES (?1, ?2, 'COMPLETED', ?3, ?4)"#,
            params![id.to_string(), current.status.as_str(), reason, now],
        )
        .map_err(db_err)?;

        let refreshed = tx
            .query_row(
                "SELECT * FROM documents WHERE id = ?1",
                params![id.to_string()],
                row_to_document,
            )
            .map_err(db_err)?;

        tx.commit().map_err(db_err)?;
        Ok(refreshed)
    }

    /// Update remote linkage fields (sync attach / touch path).
    pub fn link_document_to_remote(
        &self,
        id: Uuid,
        remote_file_id: &str,
        remote_folder_id: &str,
        remote_modified_time: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let conn = self.conn.lock();
        let updated = conn
            .execute(
                r#"UPDATE documents
                   SET remote_file_id = ?1, remote_folder_id = ?2, remote_modified_time = ?3,
                       source_type = 'REMOTE', connection_state = 'LINKED', updated_at = ?4
                   WHERE id = ?5"#,
                params![
                    remote_file_id,
                    remote_folder_id,
                    remote_modified_time,
                    Utc::now(),
                    id.to_string()
                ],
            )
            .map_err(db_err)?;
        if updated == 0 {
            return Err(Error::DocumentNotFound(id.to_string()));
        }
        Ok(())
    }

    /// Refresh the remote modification timestamp without touching status.
    pub fn touch_remote_metadata(
        &self,
        id: Uuid,
        remote_modified_time: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE documents SET remote_modified_time = ?1, updated_at = ?2 WHERE id = ?3",
            params![remote_modified_time, Utc::now(), id.to_string()],
        )
        .map_err(db_err)?;
        Ok(())
    }

    /// Replace a document's stored content identity after a remote update:
    /// new hash, size, path; chunks are dropped by the subsequent reset.
    pub fn update_document_content(
        &self,
        id: Uuid,
        md5_hash: &str,
        file_size: u64,
        file_path: &Path,
    ) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            r#"UPDATE documents
               SET md5_hash = ?1, file_size = ?2, file_path = ?3, updated_at = ?4
               WHERE id = ?5"#,
            params![
                md5_hash,
                file_size as i64,
                file_path.to_string_lossy().into_owned(),
                Utc::now(),
                id.to_string()
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    /// Delete a document and (via cascade) its chunks. Returns the document.
    pub fn delete_document(&self, id: Uuid) -> Result<Document> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(db_err)?;
        let doc: Option<Document> = tx
            .query_row(
                "SELECT * FROM documents WHERE id = ?1",
                params![id.to_string()],
                row_to_document,
            )
            .optional()
            .map_err(db_err)?;
        let doc = doc.ok_or_else(|| Error::DocumentNotFound(id.to_string()))?;

        // Explicit chunk delete keeps the FTS triggers in the loop even if
        // foreign-key cascading is disabled on the connection.
        tx.execute(
            "DELETE FROM chunks WHERE document_id = ?1",
            params![id.to_string()],
        )
        .map_err(db_err)?;
        tx.execute(
            "DELETE FROM documents WHERE id = ?1",
            params![id.to_string()],
        )
        .map_err(db_err)?;
        tx.commit().map_err(db_err)?;
        Ok(doc)
    }

    /// Filtered, paged listing plus status counts.
    pub fn list_documents(
        &self,
        query: &DocumentListQuery,
    ) -> Result<(Vec<Document>, usize, StatusCounts)> {
        let conn = self.conn.lock();

        let mut clauses: Vec<String> = Vec::new();
        let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(status) = query.status {
            clauses.push(format!("status = ?{}", args.len() + 1));
            args.push(Box::new(status.as_str().to_string()));
        }
        if let Some(search) = &query.search {
            clauses.push(format!("filename LIKE ?{}", args.len() + 1));
            args.push(Box::new(format!("%{}%", search)));
        }
        if let Some(source) = query.source_type {
            clauses.push(format!("source_type = ?{}", args.len() + 1));
            args.push(Box::new(source.as_str().to_string()));
        }
        if let Some(conn_state) = query.connection_state {
            clauses.push(format!("connection_state = ?{}", args.len() + 1));
            args.push(Box::new(conn_state.as_str().to_string()));
        }

        let where_clause = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };

        // Sort column is whitelisted; user input never reaches the SQL text.
        let sort_col = match query.sort_by.as_deref() {
            Some("filename") => "filename",
            Some("fileSize") | Some("file_size") => "file_size",
            Some("status") => "status",
            Some("updatedAt") | Some("updated_at") => "updated_at",
            _ => "created_at",
        };
        let direction = if query.sort_desc { "DESC" } else { "ASC" };

        let sql = format!(
            "SELECT * FROM documents {} ORDER BY {} {} LIMIT {} OFFSET {}",
            where_clause,
            sort_col,
            direction,
            query.limit.max(1),
            query.offset
        );

        let mut stmt = conn.prepare(&sql).map_err(db_err)?;
        let params_ref: Vec<&dyn rusqlite::ToSql> = args.iter().map(|b| b.as_ref()).collect();
        let documents: Vec<Document> = stmt
            .query_map(params_ref.as_slice(), row_to_document)
            .map_err(db_err)?
            .collect::<std::result::Result<_, _>>()
            .map_err(db_err)?;

        let count_sql = format!("SELECT COUNT(*) FROM documents {}", where_clause);
        let mut count_stmt = conn.prepare(&count_sql).map_err(db_err)?;
        let total: i64 = count_stmt
            .query_row(params_ref.as_slice(), |row| row.get(0))
            .map_err(db_err)?;

        let mut counts = StatusCounts::default();
        let mut counts_stmt = conn
            .prepare("SELECT status, COUNT(*) FROM documents GROUP BY status")
            .map_err(db_err)?;
        let rows = counts_stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })
            .map_err(db_err)?;
        for row in rows {
            let (status, n) = row.map_err(db_err)?;
            match status.as_str() {
                "PENDING" => counts.pending = n as usize,
                "PROCESSING" => counts.processing = n as usize,
                "COMPLETED" => counts.completed = n as usize,
                "FAILED" => counts.failed = n as usize,
                _ => {}
            }
        }

        Ok((documents, total as usize, counts))
    }

    // ==================== Chunks ====================

    pub fn get_chunks(&self, document_id: Uuid) -> Result<Vec<Chunk>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT * FROM chunks WHERE document_id = ?1 ORDER BY chunk_index")
            .map_err(db_err)?;
        let result = stmt
            .query_map(params![document_id.to_string()], row_to_chunk)
            .map_err(db_err)?
            .collect::<std::result::Result<_, _>>()
            .map_err(db_err);
        result
    }

    pub fn get_chunks_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Chunk>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.conn.lock();
        let placeholders: Vec<String> =
            (1..=ids.len()).map(|i| format!("?{}", i)).collect();
        let sql = format!(
            "SELECT * FROM chunks WHERE id IN ({})",
            placeholders.join(", ")
        );
        let mut stmt = conn.prepare(&sql).map_err(db_err)?;
        let args: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
        let params_ref: Vec<&dyn rusqlite::ToSql> =
            args.iter().map(|s| s as &dyn rusqlite::ToSql).collect();
        let result = stmt
            .query_map(params_ref.as_slice(), row_to_chunk)
            .map_err(db_err)?
            .collect::<std::result::Result<_, _>>()
            .map_err(db_err);
        result
    }

    pub fn delete_chunks(&self, document_id: Uuid) -> Result<usize> {
        let conn = self.conn.lock();
        conn.execute(
            "DELETE FROM chunks WHERE document_id = ?1",
            params![document_id.to_string()],
        )
        .map_err(db_err)
    }

    /// Dense retrieval: brute-force cosine over stored embeddings, scoped to
    /// COMPLETED, active documents.
    pub fn dense_search(
        &self,
        query_vector: &[f32],
        limit: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<RankedHit>> {
        let conn = self.conn.lock();
        let doc_filter = filter.and_then(|f| f.document_id).map(|id| id.to_string());

        let mut stmt = conn
            .prepare(
                r#"SELECT c.id, c.document_id, c.chunk_index, c.embedding
                   FROM chunks c
                   JOIN documents d ON d.id = c.document_id
                   WHERE d.status = 'COMPLETED' AND d.is_active = 1
                     AND (?1 IS NULL OR c.document_id = ?1)
                     AND c.embedding IS NOT NULL"#,
            )
            .map_err(db_err)?;

        let mut hits: Vec<RankedHit> = stmt
            .query_map(params![doc_filter], |row| {
                let id: String = row.get(0)?;
                let document_id: String = row.get(1)?;
                let chunk_index: i64 = row.get(2)?;
                let blob: Vec<u8> = row.get(3)?;
                Ok((id, document_id, chunk_index, blob))
            })
            .map_err(db_err)?
            .filter_map(|row| {
                let (id, document_id, chunk_index, blob) = row.ok()?;
                let embedding = decode_embedding(&blob);
                let score = cosine_similarity(query_vector, &embedding);
                Some(RankedHit {
                    chunk_id: Uuid::parse_str(&id).ok()?,
                    document_id: Uuid::parse_str(&document_id).ok()?,
                    chunk_index: chunk_index as u32,
                    score,
                })
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| (a.document_id, a.chunk_index).cmp(&(b.document_id, b.chunk_index)))
        });
        hits.truncate(limit);
        Ok(hits)
    }

    /// Lexical retrieval over the FTS5 index, BM25-ranked, scoped to
    /// COMPLETED, active documents.
    pub fn lexical_search(
        &self,
        query_text: &str,
        limit: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<RankedHit>> {
        let match_expr = fts_match_expression(query_text);
        if match_expr.is_empty() {
            return Ok(Vec::new());
        }

        let conn = self.conn.lock();
        let doc_filter = filter.and_then(|f| f.document_id).map(|id| id.to_string());

        let mut stmt = conn
            .prepare(
                r#"SELECT c.id, c.document_id, c.chunk_index, bm25(chunks_fts) AS rank
                   FROM chunks_fts
                   JOIN chunks c ON c.rowid = chunks_fts.rowid
                   JOIN documents d ON d.id = c.document_id
                   WHERE chunks_fts MATCH ?1
                     AND d.status = 'COMPLETED' AND d.is_active = 1
                     AND (?2 IS NULL OR c.document_id = ?2)
                   ORDER BY rank
                   LIMIT ?3"#,
            )
            .map_err(db_err)?;

        let hits: Vec<RankedHit> = stmt
            .query_map(params![match_expr, doc_filter, limit as i64], |row| {
                let id: String = row.get(0)?;
                let document_id: String = row.get(1)?;
                let chunk_index: i64 = row.get(2)?;
                let rank: f64 = row.get(3)?;
                Ok((id, document_id, chunk_index, rank))
            })
            .map_err(db_err)?
            .filter_map(|row| {
                let (id, document_id, chunk_index, rank) = row.ok()?;
                Some(RankedHit {
                    chunk_id: Uuid::parse_str(&id).ok()?,
                    document_id: Uuid::parse_str(&document_id).ok()?,
                    chunk_index: chunk_index as u32,
                    // bm25() returns lower-is-better; flip the sign so every
                    // retriever reports higher-is-better.
                    score: -rank as f32,
                })
            })
            .collect();

        Ok(hits)
    }

    // ==================== Profiles ====================

    pub fn get_profile(&self, id: Uuid) -> Result<Option<ProcessingProfile>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT * FROM processing_profiles WHERE id = ?1",
            params![id.to_string()],
            row_to_profile,
        )
        .optional()
        .map_err(db_err)
    }

    pub fn get_default_profile(&self) -> Result<ProcessingProfile> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT * FROM processing_profiles WHERE is_default = 1",
            [],
            row_to_profile,
        )
        .optional()
        .map_err(db_err)?
        .ok_or_else(|| Error::Internal("no default profile seeded".into()))
    }

    pub fn list_profiles(&self) -> Result<Vec<ProcessingProfile>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT * FROM processing_profiles ORDER BY created_at")
            .map_err(db_err)?;
        let result = stmt
            .query_map([], row_to_profile)
            .map_err(db_err)?
            .collect::<std::result::Result<_, _>>()
            .map_err(db_err);
        result
    }

    pub fn insert_profile(&self, profile: &ProcessingProfile) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            r#"INSERT INTO processing_profiles
               (id, name, config, is_default, is_active, is_archived, created_at, updated_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"#,
            params![
                profile.id.to_string(),
                profile.name,
                serde_json::to_string(&profile.config)?,
                profile.is_default as i64,
                profile.is_active as i64,
                profile.is_archived as i64,
                profile.created_at,
                profile.updated_at,
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    pub fn count_documents_with_profile(&self, profile_id: Uuid) -> Result<usize> {
        let conn = self.conn.lock();
        let n: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM documents WHERE profile_id = ?1",
                params![profile_id.to_string()],
                |row| row.get(0),
            )
            .map_err(db_err)?;
        Ok(n as usize)
    }

    /// Delete a profile. The default profile is never deletable; a profile
    /// with attached documents requires the explicit confirmation step.
    pub fn delete_profile(&self, id: Uuid, confirmed: bool) -> Result<()> {
        let profile = self
            .get_profile(id)?
            .ok_or_else(|| Error::ProfileNotFound(id.to_string()))?;

        if profile.is_default {
            return Err(Error::StateConflict(
                "the default profile cannot be deleted".into(),
            ));
        }

        let attached = self.count_documents_with_profile(id)?;
        if attached > 0 && !confirmed {
            return Err(Error::StateConflict(format!(
                "profile has {} attached documents; repeat with confirm=true",
                attached
            )));
        }

        let conn = self.conn.lock();
        conn.execute(
            "DELETE FROM processing_profiles WHERE id = ?1",
            params![id.to_string()],
        )
        .map_err(db_err)?;
        Ok(())
    }

    /// Archive a profile; the default profile cannot be archived.
    pub fn archive_profile(&self, id: Uuid) -> Result<()> {
        let profile = self
            .get_profile(id)?
            .ok_or_else(|| Error::ProfileNotFound(id.to_string()))?;
        if profile.is_default {
            return Err(Error::StateConflict(
                "the default profile cannot be archived".into(),
            ));
        }
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE processing_profiles SET is_archived = 1, updated_at = ?1 WHERE id = ?2",
            params![Utc::now(), id.to_string()],
        )
        .map_err(db_err)?;
        Ok(())
    }

    // ==================== Queue jobs ====================

    /// Insert or refresh a job row; the in-memory queue drives every change.
    pub fn upsert_job(&self, job: &ProcessingJob) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            r#"INSERT INTO processing_jobs
               (id, document_id, file_path, format, profile_config, attempts_made, max_attempts,
                next_run_at, state, last_error, reserved_until, created_at, finished_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
               ON CONFLICT(id) DO UPDATE SET
                   attempts_made = excluded.attempts_made,
                   next_run_at = excluded.next_run_at,
                   state = excluded.state,
                   last_error = excluded.last_error,
                   reserved_until = excluded.reserved_until,
                   finished_at = excluded.finished_at"#,
            params![
                job.id.to_string(),
                job.document_id.to_string(),
                job.file_path,
                job.format.as_str(),
                serde_json::to_string(&job.profile_config)?,
                job.attempts_made as i64,
                job.max_attempts as i64,
                job.next_run_at,
                job.state.as_str(),
                job.last_error
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
                job.reserved_until,
                job.created_at,
                job.finished_at,
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    /// Jobs that survived a restart: anything not yet terminal. Previously
    /// active jobs come back as waiting.
    pub fn load_unfinished_jobs(&self) -> Result<Vec<ProcessingJob>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                r#"SELECT * FROM processing_jobs
                   WHERE state IN ('waiting', 'delayed', 'active')
                   ORDER BY created_at"#,
            )
            .map_err(db_err)?;
        let mut jobs: Vec<ProcessingJob> = stmt
            .query_map([], row_to_job)
            .map_err(db_err)?
            .collect::<std::result::Result<_, _>>()
            .map_err(db_err)?;
        for job in &mut jobs {
            if job.state == JobState::Active {
                job.state = JobState::Waiting;
                job.reserved_until = None;
            }
        }
        Ok(jobs)
    }

    /// Apply the retention policy to terminal job rows.
    pub fn prune_jobs(
        &self,
        completed_cutoff: DateTime<Utc>,
        completed_keep: usize,
        failed_cutoff: DateTime<Utc>,
    ) -> Result<usize> {
        let conn = self.conn.lock();
        let completed = conn
            .execute(
                r#"DELETE FROM processing_jobs
                   WHERE state = 'completed' AND finished_at < ?1
                     AND id NOT IN (
                         SELECT id FROM processing_jobs WHERE state = 'completed'
                         ORDER BY finished_at DESC LIMIT ?2
                     )"#,
                params![completed_cutoff, completed_keep as i64],
            )
            .map_err(db_err)?;
        let failed = conn
            .execute(
                "DELETE FROM processing_jobs WHERE state = 'failed' AND finished_at < ?1",
                params![failed_cutoff],
            )
            .map_err(db_err)?;
        Ok(completed + failed)
    }

    // ==================== Remote folder bindings ====================

    pub fn insert_binding(&self, binding: &RemoteFolderBinding) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            r#"INSERT INTO remote_folder_bindings
               (id, remote_folder_id, recursive, page_token, last_synced_at, sync_status,
                sync_error, profile_id, enabled, created_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"#,
            params![
                binding.id.to_string(),
                binding.remote_folder_id,
                binding.recursive as i64,
                binding.page_token,
                binding.last_synced_at,
                binding.sync_status.as_str(),
                binding.sync_error,
                binding.profile_id.map(|id| id.to_string()),
                binding.enabled as i64,
                binding.created_at,
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    pub fn get_binding(&self, id: Uuid) -> Result<Option<RemoteFolderBinding>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT * FROM remote_folder_bindings WHERE id = ?1",
            params![id.to_string()],
            row_to_binding,
        )
        .optional()
        .map_err(db_err)
    }

    pub fn list_bindings(&self) -> Result<Vec<RemoteFolderBinding>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT * FROM remote_folder_bindings ORDER BY created_at")
            .map_err(db_err)?;
        let result = stmt
            .query_map([], row_to_binding)
            .map_err(db_err)?
            .collect::<std::result::Result<_, _>>()
            .map_err(db_err);
        result
    }

    /// Conditionally move a binding to SYNCING. Returns false when another
    /// sync already holds it — the caller must bail out.
    pub fn try_begin_sync(&self, id: Uuid) -> Result<bool> {
        let conn = self.conn.lock();
        let updated = conn
            .execute(
                r#"UPDATE remote_folder_bindings
                   SET sync_status = 'SYNCING', sync_error = NULL
                   WHERE id = ?1 AND sync_status != 'SYNCING'"#,
                params![id.to_string()],
            )
            .map_err(db_err)?;
        Ok(updated == 1)
    }

    /// Finish a sync run. The page token only advances on success; on error
    /// the stored token is left untouched so the next run resumes from it.
    pub fn finish_sync(
        &self,
        id: Uuid,
        new_page_token: Option<String>,
        error: Option<String>,
    ) -> Result<()> {
        let conn = self.conn.lock();
        match error {
            None => {
                conn.execute(
                    r#"UPDATE remote_folder_bindings
                       SET sync_status = 'IDLE', sync_error = NULL,
                           page_token = COALESCE(?1, page_token), last_synced_at = ?2
                       WHERE id = ?3"#,
                    params![new_page_token, Utc::now(), id.to_string()],
                )
                .map_err(db_err)?;
            }
            Some(message) => {
                conn.execute(
                    r#"UPDATE remote_folder_bindings
                       SET sync_status = 'ERROR', sync_error = ?1
                       WHERE id = ?2"#,
                    params![message, id.to_string()],
                )
                .map_err(db_err)?;
            }
        }
        Ok(())
    }

    /// Return the binding to IDLE after a cancelled run (token untouched).
    pub fn reset_sync_status(&self, id: Uuid) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE remote_folder_bindings SET sync_status = 'IDLE' WHERE id = ?1",
            params![id.to_string()],
        )
        .map_err(db_err)?;
        Ok(())
    }

    // ==================== Metrics & transitions ====================

    pub fn record_metric(
        &self,
        document_id: Uuid,
        lane: &str,
        duration_ms: u64,
        chunk_count: usize,
        outcome: &str,
    ) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            r#"INSERT INTO processing_metrics
               (document_id, lane, duration_ms, chunk_count, outcome, recorded_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6)"#,
            params![
                document_id.to_string(),
                lane,
                duration_ms as i64,
                chunk_count as i64,
                outcome,
                Utc::now(),
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    /// Transition log for a document, oldest first.
    pub fn list_transitions(&self, document_id: Uuid) -> Result<Vec<(String, String, String)>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                r#"SELECT from_status, to_status, reason FROM document_transitions
                   WHERE document_id = ?1 ORDER BY id"#,
            )
            .map_err(db_err)?;
        let result = stmt
            .query_map(params![document_id.to_string()], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })
            .map_err(db_err)?
            .collect::<std::result::Result<_, _>>()
            .map_err(db_err);
        result
    }
}

// ==================== Row mapping ====================

fn db_err(e: rusqlite::Error) -> Error {
    Error::database(e.to_string())
}

fn parse_uuid(s: String) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(&s).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn row_to_document(row: &Row<'_>) -> rusqlite::Result<Document> {
    let format: String = row.get("format")?;
    let status: String = row.get("status")?;
    let source_type: String = row.get("source_type")?;
    let connection_state: String = row.get("connection_state")?;
    let profile_id: Option<String> = row.get("profile_id")?;
    let file_path: String = row.get("file_path")?;

    Ok(Document {
        id: parse_uuid(row.get("id")?)?,
        filename: row.get("filename")?,
        mime_type: row.get("mime_type")?,
        file_size: row.get::<_, i64>("file_size")? as u64,
        format: format.parse().unwrap_or(FileFormat::Txt),
        status: DocumentStatus::parse(&status).unwrap_or(DocumentStatus::Pending),
        md5_hash: row.get("md5_hash")?,
        file_path: file_path.into(),
        retry_count: row.get::<_, i64>("retry_count")? as u32,
        fail_reason: row.get("fail_reason")?,
        is_active: row.get::<_, i64>("is_active")? != 0,
        source_type: SourceType::parse(&source_type).unwrap_or(SourceType::Manual),
        connection_state: ConnectionState::parse(&connection_state)
            .unwrap_or(ConnectionState::Standalone),
        remote_file_id: row.get("remote_file_id")?,
        remote_folder_id: row.get("remote_folder_id")?,
        remote_modified_time: row.get("remote_modified_time")?,
        profile_id: profile_id.map(parse_uuid).transpose()?,
        chunk_count: row.get::<_, i64>("chunk_count")? as u32,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn row_to_chunk(row: &Row<'_>) -> rusqlite::Result<Chunk> {
    let breadcrumbs: String = row.get("breadcrumbs")?;
    let flags: String = row.get("quality_flags")?;
    let chunk_type: String = row.get("chunk_type")?;
    let embedding: Option<Vec<u8>> = row.get("embedding")?;
    let sparse: Option<String> = row.get("sparse_embedding")?;

    Ok(Chunk {
        id: parse_uuid(row.get("id")?)?,
        document_id: parse_uuid(row.get("document_id")?)?,
        chunk_index: row.get::<_, i64>("chunk_index")? as u32,
        content: row.get("content")?,
        char_start: row.get::<_, i64>("char_start")? as usize,
        char_end: row.get::<_, i64>("char_end")? as usize,
        heading: row.get("heading")?,
        breadcrumbs: serde_json::from_str(&breadcrumbs).unwrap_or_default(),
        page: row.get::<_, Option<i64>>("page")?.map(|p| p as u32),
        quality_score: row.get::<_, f64>("quality_score")? as f32,
        quality_flags: serde_json::from_str::<Vec<String>>(&flags)
            .unwrap_or_default()
            .iter()
            .filter_map(|s| QualityFlag::parse(s))
            .collect(),
        chunk_type: ChunkType::parse(&chunk_type).unwrap_or(ChunkType::Text),
        token_count: row.get::<_, i64>("token_count")? as u32,
        embedding: embedding.map(|b| decode_embedding(&b)).unwrap_or_default(),
        sparse_embedding: sparse.and_then(|s| serde_json::from_str::<SparseVector>(&s).ok()),
        created_at: row.get("created_at")?,
    })
}

fn row_to_profile(row: &Row<'_>) -> rusqlite::Result<ProcessingProfile> {
    let config: String = row.get("config")?;
    Ok(ProcessingProfile {
        id: parse_uuid(row.get("id")?)?,
        name: row.get("name")?,
        config: serde_json::from_str::<ProfileConfig>(&config).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })?,
        is_default: row.get::<_, i64>("is_default")? != 0,
        is_active: row.get::<_, i64>("is_active")? != 0,
        is_archived: row.get::<_, i64>("is_archived")? != 0,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn row_to_job(row: &Row<'_>) -> rusqlite::Result<ProcessingJob> {
    let format: String = row.get("format")?;
    let profile_config: String = row.get("profile_config")?;
    let state: String = row.get("state")?;
    let last_error: Option<String> = row.get("last_error")?;

    Ok(ProcessingJob {
        id: parse_uuid(row.get("id")?)?,
        document_id: parse_uuid(row.get("document_id")?)?,
        file_path: row.get("file_path")?,
        format: format.parse().unwrap_or(FileFormat::Pdf),
        profile_config: serde_json::from_str(&profile_config).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })?,
        attempts_made: row.get::<_, i64>("attempts_made")? as u32,
        max_attempts: row.get::<_, i64>("max_attempts")? as u32,
        next_run_at: row.get("next_run_at")?,
        state: JobState::parse(&state).unwrap_or(JobState::Waiting),
        last_error: last_error.and_then(|s| serde_json::from_str::<JobError>(&s).ok()),
        reserved_until: row.get("reserved_until")?,
        created_at: row.get("created_at")?,
        finished_at: row.get("finished_at")?,
    })
}

fn row_to_binding(row: &Row<'_>) -> rusqlite::Result<RemoteFolderBinding> {
    let sync_status: String = row.get("sync_status")?;
    let profile_id: Option<String> = row.get("profile_id")?;
    Ok(RemoteFolderBinding {
        id: parse_uuid(row.get("id")?)?,
        remote_folder_id: row.get("remote_folder_id")?,
        recursive: row.get::<_, i64>("recursive")? != 0,
        page_token: row.get("page_token")?,
        last_synced_at: row.get("last_synced_at")?,
        sync_status: SyncStatus::parse(&sync_status).unwrap_or(SyncStatus::Idle),
        sync_error: row.get("sync_error")?,
        profile_id: profile_id.map(parse_uuid).transpose()?,
        enabled: row.get::<_, i64>("enabled")? != 0,
        created_at: row.get("created_at")?,
    })
}

// ==================== Vector encoding & math ====================

fn encode_embedding(vector: &[f32]) -> Option<Vec<u8>> {
    if vector.is_empty() {
        return None;
    }
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for v in vector {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    Some(bytes)
}

fn decode_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Build a sanitized FTS5 MATCH expression: bare alphanumeric tokens OR-ed
/// together. Raw user input never reaches the MATCH grammar.
fn fts_match_expression(query: &str) -> String {
    let tokens: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|t| t.len() >= 2)
        .map(|t| format!("\"{}\"", t))
        .collect();
    tokens.join(" OR ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use chrono::Utc;
    use std::path::PathBuf;

    fn store() -> MetadataStore {
        MetadataStore::in_memory().unwrap()
    }

    fn doc(filename: &str, hash: &str) -> Document {
        Document::new(
            filename.to_string(),
            "text/markdown".to_string(),
            100,
            FileFormat::Md,
            hash.to_string(),
            PathBuf::from(format!("/tmp/{}", hash)),
            None,
        )
    }

    fn chunk_for(document_id: Uuid, index: u32, content: &str, embedding: Vec<f32>) -> Chunk {
        Chunk {
            id: Uuid::new_v4(),
            document_id,
            chunk_index: index,
            content: content.to_string(),
            char_start: (index as usize) * 100,
            char_end: (index as usize) * 100 + content.len(),
            heading: Some("Intro".to_string()),
            breadcrumbs: vec!["Intro".to_string()],
            page: None,
            quality_score: 1.0,
            quality_flags: Vec::new(),
            chunk_type: ChunkType::Text,
            token_count: 4,
            embedding,
            sparse_embedding: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn md5_uniqueness_reports_existing_document() {
        let s = store();
        let a = doc("a.md", "aaaa");
        s.insert_document(&a).unwrap();

        let b = doc("b.md", "aaaa");
        match s.insert_document(&b) {
            Err(Error::DuplicateFile { existing_id }) => assert_eq!(existing_id, a.id),
            other => panic!("expected DuplicateFile, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn optimistic_lock_rejects_stale_updates() {
        let s = store();
        let d = doc("a.md", "bbbb");
        s.insert_document(&d).unwrap();

        let change = StatusChange {
            to: DocumentStatus::Processing,
            reason: "worker pickup".into(),
            fail_reason: None,
            clear_chunks: false,
            increment_retry: false,
        };
        let refreshed = s.apply_status_change(d.id, d.updated_at, &change).unwrap();
        assert_eq!(refreshed.status, DocumentStatus::Processing);

        // Reusing the stale timestamp must conflict.
        let err = s.apply_status_change(d.id, d.updated_at, &change).unwrap_err();
        assert!(matches!(err, Error::StateConflict(_)));
    }

    #[test]
    fn complete_with_chunks_is_atomic_and_counts() {
        let s = store();
        let d = doc("a.md", "cccc");
        s.insert_document(&d).unwrap();

        let chunks = vec![
            chunk_for(d.id, 0, "first chunk text.", vec![1.0, 0.0]),
            chunk_for(d.id, 1, "second chunk text.", vec![0.0, 1.0]),
        ];
        let refreshed = s
            .complete_with_chunks(d.id, d.updated_at, &chunks, "fast lane")
            .unwrap();
        assert_eq!(refreshed.status, DocumentStatus::Completed);
        assert_eq!(refreshed.chunk_count, 2);

        let stored = s.get_chunks(d.id).unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].chunk_index, 0);
        assert_eq!(stored[0].embedding, vec![1.0, 0.0]);
    }

    #[test]
    fn completing_with_zero_chunks_is_refused() {
        let s = store();
        let d = doc("a.md", "dddd");
        s.insert_document(&d).unwrap();
        assert!(s.complete_with_chunks(d.id, d.updated_at, &[], "x").is_err());
    }

    #[test]
    fn reprocessing_replaces_chunks_without_duplicates() {
        let s = store();
        let d = doc("a.md", "eeee");
        s.insert_document(&d).unwrap();

        let first = vec![chunk_for(d.id, 0, "old content.", vec![1.0, 0.0])];
        let d1 = s
            .complete_with_chunks(d.id, d.updated_at, &first, "first pass")
            .unwrap();

        let second = vec![
            chunk_for(d.id, 0, "new content.", vec![0.0, 1.0]),
            chunk_for(d.id, 1, "more new content.", vec![0.5, 0.5]),
        ];
        let d2 = s
            .complete_with_chunks(d.id, d1.updated_at, &second, "reprocess")
            .unwrap();
        assert_eq!(d2.chunk_count, 2);

        let stored = s.get_chunks(d.id).unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].content, "new content.");
    }

    #[test]
    fn lexical_search_hits_only_completed_active_documents() {
        let s = store();
        let d = doc("a.md", "ffff");
        s.insert_document(&d).unwrap();

        // No chunks yet; nothing to find.
        assert!(s.lexical_search("chunk", 10, None).unwrap().is_empty());

        let chunks = vec![chunk_for(d.id, 0, "a searchable chunk about rust.", vec![1.0, 0.0])];
        s.complete_with_chunks(d.id, d.updated_at, &chunks, "done")
            .unwrap();

        let hits = s.lexical_search("rust", 10, None).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].document_id, d.id);
        // bm25 flipped to higher-is-better.
        assert!(hits[0].score > 0.0);
    }

    #[test]
    fn dense_search_ranks_by_cosine() {
        let s = store();
        let d = doc("a.md", "0123");
        s.insert_document(&d).unwrap();
        let chunks = vec![
            chunk_for(d.id, 0, "points east.", vec![1.0, 0.0]),
            chunk_for(d.id, 1, "points north.", vec![0.0, 1.0]),
        ];
        s.complete_with_chunks(d.id, d.updated_at, &chunks, "done")
            .unwrap();

        let hits = s.dense_search(&[1.0, 0.1], 10, None).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk_index, 0);
        assert!(hits[0].score > hits[1].score);
    }

    #[test]
    fn default_profile_seeded_once() {
        let s = store();
        let cfg = ProfileConfig::from_app_config(&AppConfig::default());
        let p1 = s.seed_default_profile(&cfg).unwrap();
        let p2 = s.seed_default_profile(&cfg).unwrap();
        assert_eq!(p1.id, p2.id);
        assert!(p1.is_default);
    }

    #[test]
    fn default_profile_is_protected() {
        let s = store();
        let cfg = ProfileConfig::from_app_config(&AppConfig::default());
        let default = s.seed_default_profile(&cfg).unwrap();
        assert!(s.delete_profile(default.id, true).is_err());
        assert!(s.archive_profile(default.id).is_err());
    }

    #[test]
    fn profile_deletion_requires_confirmation_when_attached() {
        let s = store();
        let cfg = ProfileConfig::from_app_config(&AppConfig::default());
        s.seed_default_profile(&cfg).unwrap();

        let extra = ProcessingProfile::new("strict".to_string(), cfg);
        s.insert_profile(&extra).unwrap();

        let mut d = doc("a.md", "9999");
        d.profile_id = Some(extra.id);
        s.insert_document(&d).unwrap();

        assert!(matches!(
            s.delete_profile(extra.id, false),
            Err(Error::StateConflict(_))
        ));
        s.delete_profile(extra.id, true).unwrap();
        assert!(s.get_profile(extra.id).unwrap().is_none());
    }

    #[test]
    fn sync_begin_is_exclusive() {
        let s = store();
        let b = RemoteFolderBinding::new("folder-1".into(), true, None);
        s.insert_binding(&b).unwrap();

        assert!(s.try_begin_sync(b.id).unwrap());
        assert!(!s.try_begin_sync(b.id).unwrap());

        s.finish_sync(b.id, Some("token-2".into()), None).unwrap();
        let binding = s.get_binding(b.id).unwrap().unwrap();
        assert_eq!(binding.sync_status, SyncStatus::Idle);
        assert_eq!(binding.page_token.as_deref(), Some("token-2"));

        // Error path keeps the token.
        assert!(s.try_begin_sync(b.id).unwrap());
        s.finish_sync(b.id, None, Some("remote listing failed".into()))
            .unwrap();
        let binding = s.get_binding(b.id).unwrap().unwrap();
        assert_eq!(binding.sync_status, SyncStatus::Error);
        assert_eq!(binding.page_token.as_deref(), Some("token-2"));
    }

    #[test]
    fn unfinished_jobs_reload_as_waiting() {
        let s = store();
        let cfg = ProfileConfig::from_app_config(&AppConfig::default());
        let mut job = ProcessingJob::new(
            Uuid::new_v4(),
            "/tmp/f".into(),
            FileFormat::Pdf,
            cfg,
            3,
        );
        job.state = JobState::Active;
        job.reserved_until = Some(Utc::now());
        s.upsert_job(&job).unwrap();

        let loaded = s.load_unfinished_jobs().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].state, JobState::Waiting);
        assert!(loaded[0].reserved_until.is_none());
    }
}
