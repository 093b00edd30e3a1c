//! mien-store — SQLite-backed face registry.
//!
//! Persists identity records with their embedding vectors (little-endian
//! f32 BLOBs) plus an append-only recognition log. A single connection
//! behind a mutex serializes writers; multi-statement writes run inside
//! transactions so readers never observe partial records.

mod schema;

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use thiserror::Error;

use mien_core::{Embedding, FaceRecord, ModelRegistry};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("face record not found: {0}")]
    NotFound(String),
    #[error("name must not be empty")]
    EmptyName,
    #[error("unknown embedding model tag: {0}")]
    UnknownModel(String),
    #[error("embedding has {got} dimensions, model {model} expects {expected}")]
    DimensionMismatch {
        model: String,
        expected: usize,
        got: usize,
    },
    #[error("a record named {0:?} already exists")]
    DuplicateName(String),
    #[error("embedding indistinguishable from record {id} ({name:?}), similarity {similarity:.3}")]
    DuplicateFace {
        id: i64,
        name: String,
        similarity: f32,
    },
    #[error("stored embedding for record {0} is corrupt")]
    CorruptEmbedding(i64),
    #[error("lock poisoned: {0}")]
    Lock(String),
}

/// Insert-time policy. Both checks are off by default: the registry does
/// not require unique names, and re-registering a known face is allowed.
#[derive(Debug, Clone, Default)]
pub struct RegistrationPolicy {
    /// Reject inserts whose name already exists.
    pub unique_names: bool,
    /// Reject inserts whose embedding scores at or above this similarity
    /// against an existing record of the same model tag under a different
    /// name.
    pub duplicate_guard: Option<f32>,
}

/// Outcome of a recognition attempt, for the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecognitionStatus {
    Success,
    NoFace,
    Unknown,
}

impl RecognitionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::NoFace => "no_face",
            Self::Unknown => "unknown",
        }
    }
}

/// One append-only recognition log entry.
#[derive(Debug, Clone, Serialize)]
pub struct RecognitionLogEntry {
    pub id: i64,
    pub recognized_name: Option<String>,
    pub confidence: Option<f32>,
    pub status: String,
    pub at: String,
}

/// A record to insert; the store assigns id and timestamps.
#[derive(Debug, Clone)]
pub struct NewFace {
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub embedding: Embedding,
}

/// Metadata-only edit. `None` fields are left untouched; the embedding is
/// immutable after insert and cannot be edited here at all.
#[derive(Debug, Clone, Default)]
pub struct ContactUpdate {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
}

/// SQLite-backed face registry.
pub struct FaceStore {
    conn: Mutex<Connection>,
    registry: ModelRegistry,
    policy: RegistrationPolicy,
}

impl FaceStore {
    /// Open (or create) the database at `path` and apply the schema.
    pub fn open(
        path: &Path,
        registry: ModelRegistry,
        policy: RegistrationPolicy,
    ) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        schema::apply_schema(&conn)?;

        tracing::info!(path = %path.display(), "face store opened");
        Ok(Self {
            conn: Mutex::new(conn),
            registry,
            policy,
        })
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    /// Insert a new face record, returning it with its assigned id.
    ///
    /// Validates the name and the embedding length against the model
    /// registry, then applies the registration policy. The policy checks
    /// and the insert run in one transaction.
    pub fn insert(&self, face: NewFace) -> Result<FaceRecord, StoreError> {
        if face.name.trim().is_empty() {
            return Err(StoreError::EmptyName);
        }
        let expected = self
            .registry
            .dimension(&face.embedding.model)
            .ok_or_else(|| StoreError::UnknownModel(face.embedding.model.clone()))?;
        if face.embedding.values.len() != expected {
            return Err(StoreError::DimensionMismatch {
                model: face.embedding.model.clone(),
                expected,
                got: face.embedding.values.len(),
            });
        }

        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;

        if self.policy.unique_names {
            let exists: Option<i64> = tx
                .query_row(
                    "SELECT id FROM face_records WHERE name = ?1 LIMIT 1",
                    params![face.name],
                    |row| row.get(0),
                )
                .optional()?;
            if exists.is_some() {
                return Err(StoreError::DuplicateName(face.name));
            }
        }

        if let Some(guard) = self.policy.duplicate_guard {
            let mut stmt = tx.prepare(
                "SELECT id, name, embedding FROM face_records
                 WHERE embedding_model = ?1 AND name != ?2 ORDER BY id",
            )?;
            let rows = stmt.query_map(params![face.embedding.model, face.name], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Vec<u8>>(2)?,
                ))
            })?;
            for row in rows {
                let (id, name, blob) = row?;
                let stored = Embedding::new(
                    blob_to_values(&blob).ok_or(StoreError::CorruptEmbedding(id))?,
                    face.embedding.model.clone(),
                );
                let similarity = face.embedding.similarity(&stored);
                if similarity >= guard {
                    return Err(StoreError::DuplicateFace {
                        id,
                        name,
                        similarity,
                    });
                }
            }
        }

        let now = Utc::now().to_rfc3339();
        tx.execute(
            "INSERT INTO face_records
                 (name, email, phone, embedding, embedding_model, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                face.name,
                face.email,
                face.phone,
                values_to_blob(&face.embedding.values),
                face.embedding.model,
                now,
                now,
            ],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;

        tracing::debug!(id, name = %face.name, model = %face.embedding.model, "face record inserted");
        Ok(FaceRecord {
            id,
            name: face.name,
            email: face.email,
            phone: face.phone,
            embedding: face.embedding,
            created_at: now.clone(),
            updated_at: now,
        })
    }

    /// Fetch one record by id.
    pub fn get(&self, id: i64) -> Result<FaceRecord, StoreError> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("{SELECT_RECORD} WHERE id = ?1"),
            params![id],
            row_to_record,
        )
        .optional()?
        .ok_or_else(|| StoreError::NotFound(format!("id {id}")))
    }

    /// All records, id ascending (insertion order).
    pub fn list_all(&self) -> Result<Vec<FaceRecord>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!("{SELECT_RECORD} ORDER BY id"))?;
        let rows = stmt.query_map([], row_to_record)?;
        collect_records(rows)
    }

    /// Records with the given model tag, id ascending — the matcher's
    /// candidate set.
    pub fn list_by_model(&self, model: &str) -> Result<Vec<FaceRecord>, StoreError> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare(&format!("{SELECT_RECORD} WHERE embedding_model = ?1 ORDER BY id"))?;
        let rows = stmt.query_map(params![model], row_to_record)?;
        collect_records(rows)
    }

    pub fn count(&self) -> Result<usize, StoreError> {
        let conn = self.lock()?;
        let n: i64 = conn.query_row("SELECT count(*) FROM face_records", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    /// Edit contact metadata. The embedding and `created_at` are untouched;
    /// `updated_at` is bumped.
    pub fn update_contact(&self, id: i64, update: ContactUpdate) -> Result<FaceRecord, StoreError> {
        if let Some(name) = &update.name {
            if name.trim().is_empty() {
                return Err(StoreError::EmptyName);
            }
        }

        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;

        let current = tx
            .query_row(
                &format!("{SELECT_RECORD} WHERE id = ?1"),
                params![id],
                row_to_record,
            )
            .optional()?
            .ok_or_else(|| StoreError::NotFound(format!("id {id}")))?;

        let name = update.name.unwrap_or(current.name);
        let email = update.email.or(current.email);
        let phone = update.phone.or(current.phone);
        let now = Utc::now().to_rfc3339();

        tx.execute(
            "UPDATE face_records SET name = ?1, email = ?2, phone = ?3, updated_at = ?4
             WHERE id = ?5",
            params![name, email, phone, now, id],
        )?;
        tx.commit()?;

        Ok(FaceRecord {
            id,
            name,
            email,
            phone,
            embedding: current.embedding,
            created_at: current.created_at,
            updated_at: now,
        })
    }

    /// Delete one record by id.
    pub fn delete_by_id(&self, id: i64) -> Result<(), StoreError> {
        let conn = self.lock()?;
        let rows = conn.execute("DELETE FROM face_records WHERE id = ?1", params![id])?;
        if rows == 0 {
            return Err(StoreError::NotFound(format!("id {id}")));
        }
        tracing::debug!(id, "face record deleted");
        Ok(())
    }

    /// Delete every record with the given name, returning how many were
    /// removed. Multiple records may share a name; all of them go.
    pub fn delete_by_name(&self, name: &str) -> Result<usize, StoreError> {
        let conn = self.lock()?;
        let rows = conn.execute("DELETE FROM face_records WHERE name = ?1", params![name])?;
        if rows == 0 {
            return Err(StoreError::NotFound(format!("name {name:?}")));
        }
        tracing::debug!(name, count = rows, "face records deleted by name");
        Ok(rows)
    }

    /// Append a recognition attempt to the audit log.
    pub fn log_recognition(
        &self,
        status: RecognitionStatus,
        recognized_name: Option<&str>,
        confidence: Option<f32>,
    ) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO recognition_log (recognized_name, confidence, status, at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                recognized_name,
                confidence,
                status.as_str(),
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Most recent log entries, newest first.
    pub fn recent_logs(&self, limit: usize) -> Result<Vec<RecognitionLogEntry>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, recognized_name, confidence, status, at
             FROM recognition_log ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(RecognitionLogEntry {
                id: row.get(0)?,
                recognized_name: row.get(1)?,
                confidence: row.get(2)?,
                status: row.get(3)?,
                at: row.get(4)?,
            })
        })?;

        let mut entries = Vec::new();
        for entry in rows {
            entries.push(entry?);
        }
        Ok(entries)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|e| StoreError::Lock(e.to_string()))
    }
}

const SELECT_RECORD: &str = "SELECT id, name, email, phone, embedding, embedding_model, \
                             created_at, updated_at FROM face_records";

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<FaceRecord> {
    let id: i64 = row.get(0)?;
    let blob: Vec<u8> = row.get(4)?;
    let model: String = row.get(5)?;
    let values = blob_to_values(&blob).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            4,
            rusqlite::types::Type::Blob,
            format!("embedding blob for record {id} has odd length {}", blob.len()).into(),
        )
    })?;

    Ok(FaceRecord {
        id,
        name: row.get(1)?,
        email: row.get(2)?,
        phone: row.get(3)?,
        embedding: Embedding::new(values, model),
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

fn collect_records(
    rows: impl Iterator<Item = rusqlite::Result<FaceRecord>>,
) -> Result<Vec<FaceRecord>, StoreError> {
    let mut records = Vec::new();
    for record in rows {
        records.push(record?);
    }
    Ok(records)
}

/// Encode an embedding as a little-endian f32 BLOB.
fn values_to_blob(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Decode a little-endian f32 BLOB; `None` if the length is not a multiple
/// of four.
fn blob_to_values(blob: &[u8]) -> Option<Vec<f32>> {
    if blob.len() % 4 != 0 {
        return None;
    }
    Some(
        blob.chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    )
}
