//! SQLite-backed document store.
//!
//! One `docs` table holds every document as a JSON body keyed by its
//! `_id`. Revisions are computed in Rust from the per-document sequence
//! number, so the table never needs to understand document contents.
//! Deletes keep a tombstone row, which lets a later put continue the
//! sequence instead of restarting at 1.

use std::fs::OpenOptions;
use std::io::ErrorKind;
use std::path::Path;

use async_trait::async_trait;
use log::debug;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use tokio::sync::broadcast;

use super::{
    assemble_doc, make_rev, split_for_put, AllDocsOptions, ChangeEvent, DocRow, Document,
    DocumentStore, PutResult, StoreError,
};
use crate::config::CHANGE_FEED_CAPACITY;

/// Document store persisted to a SQLite file.
pub struct SqliteStore {
    pool: SqlitePool,
    change_tx: broadcast::Sender<ChangeEvent>,
}

impl SqliteStore {
    /// Opens (creating if necessary) the database file at `path`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::FileCreation` when the file cannot be
    /// created, and `StoreError::Sql` for connection or schema failures.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(_) => debug!("Created database file at {}", path.display()),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                debug!("Using existing database file at {}", path.display());
            }
            Err(e) => {
                return Err(StoreError::FileCreation(format!(
                    "{}: {}",
                    path.display(),
                    e
                )));
            }
        }

        let pool = SqlitePool::connect(&format!("sqlite:{}", path.display())).await?;
        sqlx::query("PRAGMA journal_mode=WAL;").execute(&pool).await?;
        Self::with_pool(pool).await
    }

    /// Opens a throwaway in-memory database.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Sql` if the connection or schema setup fails.
    pub async fn open_memory() -> Result<Self, StoreError> {
        // In-memory SQLite databases are per-connection, so the pool must
        // not hand out more than one.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS docs (
                id TEXT PRIMARY KEY,
                seq INTEGER NOT NULL,
                rev TEXT NOT NULL,
                deleted INTEGER NOT NULL DEFAULT 0,
                body TEXT NOT NULL
            )",
        )
        .execute(&pool)
        .await?;

        let (change_tx, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Ok(SqliteStore { pool, change_tx })
    }

    fn broadcast(&self, event: ChangeEvent) {
        let _ = self.change_tx.send(event);
    }
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn get(&self, id: &str) -> Result<Document, StoreError> {
        let row = sqlx::query("SELECT rev, body FROM docs WHERE id = ? AND deleted = 0")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        let row = row.ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        let rev: String = row.get("rev");
        let body: String = row.get("body");
        let body: serde_json::Map<String, serde_json::Value> = serde_json::from_str(&body)?;
        Ok(assemble_doc(id, &rev, body))
    }

    async fn put(&self, doc: Document) -> Result<PutResult, StoreError> {
        let (id, supplied_rev, body) = split_for_put(doc)?;
        let body_json = serde_json::to_string(&body)?;

        let mut tx = self.pool.begin().await?;
        let existing = sqlx::query("SELECT seq, rev, deleted FROM docs WHERE id = ?")
            .bind(&id)
            .fetch_optional(&mut *tx)
            .await?;

        let next_seq = match existing {
            Some(row) => {
                let seq: i64 = row.get("seq");
                let current_rev: String = row.get("rev");
                let deleted: i64 = row.get("deleted");
                if deleted == 0 {
                    if supplied_rev != current_rev {
                        return Err(StoreError::Conflict {
                            id,
                            supplied: supplied_rev,
                            current: current_rev,
                        });
                    }
                } else if !supplied_rev.is_empty() && supplied_rev != current_rev {
                    return Err(StoreError::Conflict {
                        id,
                        supplied: supplied_rev,
                        current: current_rev,
                    });
                }
                seq as u64 + 1
            }
            None => {
                if !supplied_rev.is_empty() {
                    return Err(StoreError::Conflict {
                        id,
                        supplied: supplied_rev,
                        current: String::new(),
                    });
                }
                1
            }
        };

        let rev = make_rev(&id, next_seq, &body_json);
        sqlx::query(
            "INSERT INTO docs (id, seq, rev, deleted, body) VALUES (?, ?, ?, 0, ?)
             ON CONFLICT(id) DO UPDATE SET
                 seq = excluded.seq, rev = excluded.rev, deleted = 0, body = excluded.body",
        )
        .bind(&id)
        .bind(next_seq as i64)
        .bind(&rev)
        .bind(&body_json)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        self.broadcast(ChangeEvent {
            id: id.clone(),
            doc: Some(assemble_doc(&id, &rev, body)),
            deleted: false,
        });
        Ok(PutResult { id, rev })
    }

    async fn remove(&self, id: &str, rev: &str) -> Result<PutResult, StoreError> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query("SELECT seq, rev FROM docs WHERE id = ? AND deleted = 0")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        let row = row.ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        let seq: i64 = row.get("seq");
        let current_rev: String = row.get("rev");
        if rev != current_rev {
            return Err(StoreError::Conflict {
                id: id.to_string(),
                supplied: rev.to_string(),
                current: current_rev,
            });
        }

        let next_seq = seq as u64 + 1;
        let new_rev = make_rev(id, next_seq, "");
        sqlx::query("UPDATE docs SET seq = ?, rev = ?, deleted = 1, body = '{}' WHERE id = ?")
            .bind(next_seq as i64)
            .bind(&new_rev)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        self.broadcast(ChangeEvent {
            id: id.to_string(),
            doc: None,
            deleted: true,
        });
        Ok(PutResult {
            id: id.to_string(),
            rev: new_rev,
        })
    }

    async fn all_docs(&self, options: AllDocsOptions) -> Result<Vec<DocRow>, StoreError> {
        let mut sql = String::from("SELECT id, rev, body FROM docs WHERE deleted = 0");
        if options.start_key.is_some() {
            sql.push_str(" AND id >= ?");
        }
        if options.end_key.is_some() {
            sql.push_str(" AND id <= ?");
        }
        sql.push_str(" ORDER BY id");

        let mut query = sqlx::query(&sql);
        if let Some(start) = &options.start_key {
            query = query.bind(start);
        }
        if let Some(end) = &options.end_key {
            query = query.bind(end);
        }

        let rows = query.fetch_all(&self.pool).await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.get("id");
            let rev: String = row.get("rev");
            let doc = if options.include_docs {
                let body: String = row.get("body");
                let body: serde_json::Map<String, serde_json::Value> =
                    serde_json::from_str(&body)?;
                Some(assemble_doc(&id, &rev, body))
            } else {
                None
            };
            out.push(DocRow { id, rev, doc });
        }
        Ok(out)
    }

    async fn bulk_get(
        &self,
        ids: &[String],
    ) -> Result<Vec<Result<Document, StoreError>>, StoreError> {
        let mut results = Vec::with_capacity(ids.len());
        for id in ids {
            results.push(self.get(id).await);
        }
        Ok(results)
    }

    fn changes(&self) -> broadcast::Receiver<ChangeEvent> {
        self.change_tx.subscribe()
    }
}
