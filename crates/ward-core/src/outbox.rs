//! Outbox: durable queue of write operations awaiting server confirmation.
//!
//! Entries are processed in creation order per collection (FIFO) so that a
//! CREATE is always confirmed before any later operation that references
//! the same temporary id.

use std::str::FromStr;
use std::sync::Arc;

use libsql::params;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::db::Database;
use crate::error::{Error, Result};
use crate::models::Collection;
use crate::util::{random_suffix, unix_timestamp_millis};

/// Kind of queued mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpMethod {
    Create,
    Update,
    Delete,
}

impl OpMethod {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "CREATE",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        }
    }
}

impl FromStr for OpMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "CREATE" => Ok(Self::Create),
            "UPDATE" => Ok(Self::Update),
            "DELETE" => Ok(Self::Delete),
            other => Err(Error::InvalidInput(format!("unknown outbox method: {other}"))),
        }
    }
}

/// One queued mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboxEntry {
    pub op_id: String,
    pub collection: Collection,
    pub method: OpMethod,
    /// Server id for UPDATE/DELETE, temp id for CREATE.
    pub target_id: String,
    pub payload: Option<Value>,
    pub created_at: i64,
}

impl OutboxEntry {
    /// Build a new entry with a fresh `op:<millis>:<suffix>` operation id.
    pub fn new(
        collection: Collection,
        method: OpMethod,
        target_id: impl Into<String>,
        payload: Option<Value>,
    ) -> Self {
        let created_at = unix_timestamp_millis();
        Self {
            op_id: format!("op:{created_at}:{}", random_suffix()),
            collection,
            method,
            target_id: target_id.into(),
            payload,
            created_at,
        }
    }
}

/// Durable FIFO queue of pending mutations, one stream per collection.
#[derive(Clone)]
pub struct Outbox {
    db: Arc<Mutex<Database>>,
}

impl Outbox {
    pub const fn new(db: Arc<Mutex<Database>>) -> Self {
        Self { db }
    }

    /// Durably append an entry. Never touches the network.
    pub async fn enqueue(&self, entry: &OutboxEntry) -> Result<()> {
        let payload = entry
            .payload
            .as_ref()
            .map_or(libsql::Value::Null, |value| {
                libsql::Value::Text(value.to_string())
            });
        let db = self.db.lock().await;
        db.connection()
            .execute(
                "INSERT INTO outbox (op_id, collection, method, target_id, payload, status, created_at)
                 VALUES (?, ?, ?, ?, ?, 'pending', ?)",
                params![
                    entry.op_id.clone(),
                    entry.collection.as_str(),
                    entry.method.as_str(),
                    entry.target_id.clone(),
                    payload,
                    entry.created_at
                ],
            )
            .await?;
        Ok(())
    }

    /// Append an entry, first discarding any queued entry for the same
    /// target. Used by singleton streams (the patient help alert) where a
    /// newer trigger supersedes the older one.
    pub async fn enqueue_replacing(&self, entry: &OutboxEntry) -> Result<()> {
        self.cancel_for_target(entry.collection, &entry.target_id)
            .await?;
        self.enqueue(entry).await
    }

    /// Pending entries for a collection in FIFO creation order.
    pub async fn list_pending(&self, collection: Collection) -> Result<Vec<OutboxEntry>> {
        let db = self.db.lock().await;
        let mut rows = db
            .connection()
            .query(
                "SELECT op_id, collection, method, target_id, COALESCE(payload, ''), created_at
                 FROM outbox WHERE collection = ?
                 ORDER BY created_at, op_id",
                params![collection.as_str()],
            )
            .await?;

        let mut entries = Vec::new();
        while let Some(row) = rows.next().await? {
            let collection_str: String = row.get(1)?;
            let method_str: String = row.get(2)?;
            let payload_str: String = row.get(4)?;
            entries.push(OutboxEntry {
                op_id: row.get(0)?,
                collection: collection_str.parse()?,
                method: method_str.parse()?,
                target_id: row.get(3)?,
                payload: if payload_str.is_empty() {
                    None
                } else {
                    Some(serde_json::from_str(&payload_str)?)
                },
                created_at: row.get(5)?,
            });
        }
        Ok(entries)
    }

    /// Remove a confirmed (or permanently rejected) entry.
    pub async fn mark_done(&self, op_id: &str) -> Result<()> {
        let db = self.db.lock().await;
        db.connection()
            .execute("DELETE FROM outbox WHERE op_id = ?", params![op_id])
            .await?;
        Ok(())
    }

    /// Mark an entry as currently being replayed.
    pub async fn mark_in_flight(&self, op_id: &str, in_flight: bool) -> Result<()> {
        let status = if in_flight { "in_flight" } else { "pending" };
        let db = self.db.lock().await;
        db.connection()
            .execute(
                "UPDATE outbox SET status = ? WHERE op_id = ?",
                params![status, op_id],
            )
            .await?;
        Ok(())
    }

    /// Remove every queued entry aimed at `target_id`.
    ///
    /// Covers deleting a never-synced local entity (its queued CREATE must
    /// not resurrect it) and cascade-cancel after a permanent rejection.
    pub async fn cancel_for_target(&self, collection: Collection, target_id: &str) -> Result<u64> {
        let db = self.db.lock().await;
        let cancelled = db
            .connection()
            .execute(
                "DELETE FROM outbox WHERE collection = ? AND target_id = ?",
                params![collection.as_str(), target_id],
            )
            .await?;
        Ok(cancelled)
    }

    /// Replace the payload of a queued entry in place.
    ///
    /// Used to merge an edit of a still-unconfirmed entity into its pending
    /// CREATE instead of enqueueing a dependent UPDATE.
    pub async fn replace_payload(&self, op_id: &str, payload: &Value) -> Result<()> {
        let db = self.db.lock().await;
        let affected = db
            .connection()
            .execute(
                "UPDATE outbox SET payload = ? WHERE op_id = ?",
                params![payload.to_string(), op_id],
            )
            .await?;
        if affected == 0 {
            return Err(Error::NotFound(format!("outbox entry {op_id}")));
        }
        Ok(())
    }

    /// The queued CREATE for a temporary id, if it is still pending.
    pub async fn pending_create_for(
        &self,
        collection: Collection,
        temp_id: &str,
    ) -> Result<Option<OutboxEntry>> {
        Ok(self
            .list_pending(collection)
            .await?
            .into_iter()
            .find(|entry| entry.method == OpMethod::Create && entry.target_id == temp_id))
    }

    /// Collections that currently have at least one queued entry.
    pub async fn collections_with_pending(&self) -> Result<Vec<Collection>> {
        let db = self.db.lock().await;
        let mut rows = db
            .connection()
            .query(
                "SELECT DISTINCT collection FROM outbox ORDER BY collection",
                (),
            )
            .await?;

        let mut collections = Vec::new();
        while let Some(row) = rows.next().await? {
            let name: String = row.get(0)?;
            collections.push(name.parse()?);
        }
        Ok(collections)
    }
}
