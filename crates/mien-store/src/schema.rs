//! SQLite schema for the face registry.

use rusqlite::Connection;

/// Apply the schema. Idempotent.
pub fn apply_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS face_records (
             id              INTEGER PRIMARY KEY AUTOINCREMENT,
             name            TEXT NOT NULL,
             email           TEXT,
             phone           TEXT,
             embedding       BLOB NOT NULL,
             embedding_model TEXT NOT NULL,
             created_at      TEXT NOT NULL,
             updated_at      TEXT NOT NULL
         );
         CREATE INDEX IF NOT EXISTS idx_face_records_name
             ON face_records(name);
         CREATE INDEX IF NOT EXISTS idx_face_records_model
             ON face_records(embedding_model);

         CREATE TABLE IF NOT EXISTS recognition_log (
             id              INTEGER PRIMARY KEY AUTOINCREMENT,
             recognized_name TEXT,
             confidence      REAL,
             status          TEXT NOT NULL,
             at              TEXT NOT NULL
         );",
    )
}
