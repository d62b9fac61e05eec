//! Local Store: durable per-collection snapshots of entity documents.
//!
//! Two layers live here. `LocalStore` is the contract the repositories and
//! the sync engine consume (`replace_all` / `upsert` / `remove` /
//! `read_all`). Underneath sits a revisioned document surface: every stored
//! row carries an optimistic-concurrency revision token, a put against a
//! stale revision is rejected and retried by re-reading (read-modify-write).

use std::sync::Arc;

use libsql::params;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::db::Database;
use crate::error::{Error, Result};
use crate::models::{document_id, Collection, EntityId};
use crate::util::unix_timestamp_millis;

/// Bounded retries for revision-conflicted puts before giving up.
const PUT_RETRY_LIMIT: u32 = 5;

/// A stored document row with its concurrency token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDocument {
    pub id: String,
    pub revision: i64,
    pub body: String,
}

/// Durable per-collection document cache.
#[derive(Clone)]
pub struct LocalStore {
    db: Arc<Mutex<Database>>,
}

impl LocalStore {
    pub const fn new(db: Arc<Mutex<Database>>) -> Self {
        Self { db }
    }

    /// Atomically swap the stored collection for `docs`.
    ///
    /// Used after a successful authoritative server read. Documents without
    /// a usable `id` are skipped with a warning rather than failing the
    /// whole snapshot.
    pub async fn replace_all(&self, collection: Collection, docs: &[Value]) -> Result<()> {
        let now = unix_timestamp_millis();
        let db = self.db.lock().await;
        let conn = db.connection();

        conn.execute("BEGIN TRANSACTION", ()).await?;

        let result = async {
            conn.execute(
                "DELETE FROM documents WHERE collection = ?",
                params![collection.as_str()],
            )
            .await?;

            for doc in docs {
                let Some(id) = document_id(doc) else {
                    tracing::warn!(
                        collection = collection.as_str(),
                        "Skipping server document without id during snapshot replace"
                    );
                    continue;
                };
                conn.execute(
                    "INSERT INTO documents (collection, id, revision, body, updated_at)
                     VALUES (?, ?, 1, ?, ?)",
                    params![collection.as_str(), id.as_key(), doc.to_string(), now],
                )
                .await?;
            }
            Ok::<(), Error>(())
        }
        .await;

        match result {
            Ok(()) => {
                conn.execute("COMMIT", ()).await?;
                Ok(())
            }
            Err(error) => {
                conn.execute("ROLLBACK", ()).await.ok();
                Err(error)
            }
        }
    }

    /// Insert or overwrite a single document, keyed by its `id` field.
    ///
    /// Conflicting revisions are retried by re-reading the current token.
    pub async fn upsert(&self, collection: Collection, doc: &Value) -> Result<()> {
        let id = document_id(doc)
            .ok_or_else(|| Error::InvalidInput("document has no usable id".to_string()))?;
        let body = doc.to_string();

        for _ in 0..PUT_RETRY_LIMIT {
            let current = self.get(collection, &id).await?;
            let expected = current.map(|raw| raw.revision);
            match self.put(collection, &id, expected, &body).await {
                Ok(_) => return Ok(()),
                Err(Error::RevisionConflict(_)) => continue,
                Err(error) => return Err(error),
            }
        }

        Err(Error::RevisionConflict(format!(
            "{collection}/{id}: retries exhausted"
        )))
    }

    /// Delete a document if present; absence is not an error.
    pub async fn remove(&self, collection: Collection, id: &EntityId) -> Result<()> {
        let db = self.db.lock().await;
        db.connection()
            .execute(
                "DELETE FROM documents WHERE collection = ? AND id = ?",
                params![collection.as_str(), id.as_key()],
            )
            .await?;
        Ok(())
    }

    /// Current snapshot of a collection as raw JSON documents.
    ///
    /// Persistence failures degrade to an empty snapshot: the error is
    /// logged and the caller renders what it has. A cache read must never
    /// hard-fail the UI.
    pub async fn read_all(&self, collection: Collection) -> Vec<Value> {
        match self.list_all(collection).await {
            Ok(raw_docs) => raw_docs
                .into_iter()
                .filter_map(|raw| match serde_json::from_str(&raw.body) {
                    Ok(value) => Some(value),
                    Err(error) => {
                        tracing::warn!(
                            collection = collection.as_str(),
                            id = %raw.id,
                            "Dropping undecodable cached document: {error}"
                        );
                        None
                    }
                })
                .collect(),
            Err(error) => {
                tracing::error!(
                    collection = collection.as_str(),
                    "Cache unavailable, falling back to empty snapshot: {error}"
                );
                Vec::new()
            }
        }
    }

    /// Fetch one document row with its revision token.
    pub async fn get(&self, collection: Collection, id: &EntityId) -> Result<Option<RawDocument>> {
        let db = self.db.lock().await;
        let mut rows = db
            .connection()
            .query(
                "SELECT id, revision, body FROM documents WHERE collection = ? AND id = ?",
                params![collection.as_str(), id.as_key()],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(RawDocument {
                id: row.get(0)?,
                revision: row.get(1)?,
                body: row.get(2)?,
            })),
            None => Ok(None),
        }
    }

    /// Write one document row at an expected revision.
    ///
    /// `expected_revision` of `None` asserts the document does not exist
    /// yet. A mismatch (concurrent writer) yields `Error::RevisionConflict`.
    /// Returns the new revision token.
    pub async fn put(
        &self,
        collection: Collection,
        id: &EntityId,
        expected_revision: Option<i64>,
        body: &str,
    ) -> Result<i64> {
        let now = unix_timestamp_millis();
        let db = self.db.lock().await;
        let conn = db.connection();

        let affected = match expected_revision {
            None => {
                conn.execute(
                    "INSERT INTO documents (collection, id, revision, body, updated_at)
                     VALUES (?, ?, 1, ?, ?)
                     ON CONFLICT (collection, id) DO NOTHING",
                    params![collection.as_str(), id.as_key(), body, now],
                )
                .await?
            }
            Some(revision) => {
                conn.execute(
                    "UPDATE documents SET revision = revision + 1, body = ?, updated_at = ?
                     WHERE collection = ? AND id = ? AND revision = ?",
                    params![body, now, collection.as_str(), id.as_key(), revision],
                )
                .await?
            }
        };

        if affected == 0 {
            return Err(Error::RevisionConflict(format!("{collection}/{id}")));
        }
        Ok(expected_revision.map_or(1, |revision| revision + 1))
    }

    async fn list_all(&self, collection: Collection) -> Result<Vec<RawDocument>> {
        let db = self.db.lock().await;
        let mut rows = db
            .connection()
            .query(
                "SELECT id, revision, body FROM documents WHERE collection = ? ORDER BY id",
                params![collection.as_str()],
            )
            .await?;

        let mut docs = Vec::new();
        while let Some(row) = rows.next().await? {
            docs.push(RawDocument {
                id: row.get(0)?,
                revision: row.get(1)?,
                body: row.get(2)?,
            });
        }
        Ok(docs)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    async fn setup() -> LocalStore {
        let db = Database::open_in_memory().await.unwrap();
        LocalStore::new(Arc::new(Mutex::new(db)))
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn upsert_and_read_all_roundtrip() {
        let store = setup().await;
        let doc = json!({ "id": 1, "name": "North" });

        store.upsert(Collection::Rooms, &doc).await.unwrap();
        let docs = store.read_all(Collection::Rooms).await;
        assert_eq!(docs, vec![doc]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn upsert_overwrites_existing_document() {
        let store = setup().await;

        store
            .upsert(Collection::Rooms, &json!({ "id": 1, "name": "North" }))
            .await
            .unwrap();
        store
            .upsert(Collection::Rooms, &json!({ "id": 1, "name": "South" }))
            .await
            .unwrap();

        let docs = store.read_all(Collection::Rooms).await;
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0]["name"], json!("South"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn replace_all_swaps_the_snapshot_wholesale() {
        let store = setup().await;

        store
            .upsert(Collection::Beds, &json!({ "id": "temp_1_a", "bedLabel": "old" }))
            .await
            .unwrap();
        store
            .replace_all(
                Collection::Beds,
                &[json!({ "id": 1, "bedLabel": "B-1" }), json!({ "id": 2, "bedLabel": "B-2" })],
            )
            .await
            .unwrap();

        let docs = store.read_all(Collection::Beds).await;
        assert_eq!(docs.len(), 2);
        assert!(docs.iter().all(|d| d["id"].is_number()));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn replace_all_is_scoped_to_one_collection() {
        let store = setup().await;

        store
            .upsert(Collection::Rooms, &json!({ "id": 9, "name": "kept" }))
            .await
            .unwrap();
        store
            .replace_all(Collection::Beds, &[json!({ "id": 1, "bedLabel": "B-1" })])
            .await
            .unwrap();

        assert_eq!(store.read_all(Collection::Rooms).await.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn remove_is_a_noop_for_missing_documents() {
        let store = setup().await;
        let id: EntityId = "4".parse().unwrap();
        store.remove(Collection::Beds, &id).await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn put_detects_stale_revisions() {
        let store = setup().await;
        let id: EntityId = "1".parse().unwrap();

        let first = store
            .put(Collection::Beds, &id, None, "{\"id\":1}")
            .await
            .unwrap();
        assert_eq!(first, 1);

        // A second insert-style put loses against the existing row
        let conflict = store.put(Collection::Beds, &id, None, "{\"id\":1}").await;
        assert!(matches!(conflict, Err(Error::RevisionConflict(_))));

        // A put against the current revision wins and bumps the token
        let second = store
            .put(Collection::Beds, &id, Some(first), "{\"id\":1,\"x\":2}")
            .await
            .unwrap();
        assert_eq!(second, 2);

        // The first token is now stale
        let stale = store
            .put(Collection::Beds, &id, Some(first), "{\"id\":1}")
            .await;
        assert!(matches!(stale, Err(Error::RevisionConflict(_))));
    }
}
