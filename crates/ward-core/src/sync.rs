//! Sync Engine: drains the outbox against the network and reconciles the
//! Local Store with server truth.
//!
//! One drain cycle per collection runs at a time; re-entrant triggers are
//! coalesced. Entries replay in FIFO order and the cycle halts on the first
//! transient failure so a later operation can never overtake the earlier
//! one it may depend on. Permanent (4xx) rejections drop the entry, roll
//! back its optimistic document, and cascade-cancel anything still queued
//! against the same temporary id.

use std::collections::HashSet;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::broadcast;

use crate::connectivity::ConnectivityMonitor;
use crate::error::Result;
use crate::gateway::{GatewayError, NetworkGateway};
use crate::models::{document_id, normalize_document, Collection, EntityId};
use crate::outbox::{OpMethod, Outbox, OutboxEntry};
use crate::store::LocalStore;

/// Capacity of the sync event channel; slow subscribers lose old events.
const EVENT_CHANNEL_CAPACITY: usize = 32;

/// Non-blocking notifications surfaced to the UI layer.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// A drain cycle confirmed `applied` queued operations.
    Drained {
        collection: Collection,
        applied: usize,
    },
    /// The server permanently rejected a queued operation.
    Rejected {
        collection: Collection,
        message: String,
    },
    /// A transient failure halted the cycle; `remaining` entries stay
    /// queued for the next trigger.
    Halted {
        collection: Collection,
        remaining: usize,
    },
}

/// Result of one drain trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Every queued entry was resolved (confirmed or dropped).
    Completed { applied: usize },
    /// A transient failure stopped the cycle early.
    Halted { applied: usize, remaining: usize },
    /// Another drain for this collection was already running.
    AlreadyDraining,
    /// The connectivity flag is off; nothing was attempted.
    Offline,
}

/// Drains queued mutations and reconciles confirmations into the cache.
pub struct SyncEngine {
    store: LocalStore,
    outbox: Outbox,
    gateway: Arc<dyn NetworkGateway>,
    connectivity: ConnectivityMonitor,
    events: broadcast::Sender<SyncEvent>,
    draining: Mutex<HashSet<Collection>>,
}

impl SyncEngine {
    pub fn new(
        store: LocalStore,
        outbox: Outbox,
        gateway: Arc<dyn NetworkGateway>,
        connectivity: ConnectivityMonitor,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            store,
            outbox,
            gateway,
            connectivity,
            events,
            draining: Mutex::new(HashSet::new()),
        }
    }

    /// Subscribe to drain notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Drain every collection that has queued entries, one at a time.
    pub async fn drain_all_pending(&self) -> Result<()> {
        for collection in self.outbox.collections_with_pending().await? {
            self.drain(collection).await?;
        }
        Ok(())
    }

    /// Run one drain cycle for `collection`.
    pub async fn drain(&self, collection: Collection) -> Result<DrainOutcome> {
        if !self.connectivity.is_online() {
            return Ok(DrainOutcome::Offline);
        }

        let Some(_guard) = DrainGuard::acquire(&self.draining, collection) else {
            tracing::debug!(
                collection = collection.as_str(),
                "Drain already in progress, coalescing trigger"
            );
            return Ok(DrainOutcome::AlreadyDraining);
        };

        let queued = self.outbox.list_pending(collection).await?.len();
        if queued == 0 {
            return Ok(DrainOutcome::Completed { applied: 0 });
        }
        tracing::info!(
            collection = collection.as_str(),
            queued,
            "Draining queued operations"
        );

        let mut applied = 0usize;
        // Pop the head each iteration instead of iterating a snapshot:
        // a rejection may cascade-cancel entries further down the queue.
        loop {
            let Some(entry) = self.outbox.list_pending(collection).await?.into_iter().next()
            else {
                break;
            };
            self.outbox.mark_in_flight(&entry.op_id, true).await?;

            match self.replay(&entry).await {
                Ok(()) => {
                    self.outbox.mark_done(&entry.op_id).await?;
                    applied += 1;
                }
                Err(error) if error.is_transient() => {
                    tracing::warn!(
                        collection = collection.as_str(),
                        op_id = %entry.op_id,
                        "Transient failure, halting drain: {error}"
                    );
                    self.outbox.mark_in_flight(&entry.op_id, false).await?;

                    if applied > 0 {
                        self.refresh(collection).await;
                    }
                    let remaining = self.outbox.list_pending(collection).await?.len();
                    self.emit(SyncEvent::Halted {
                        collection,
                        remaining,
                    });
                    return Ok(DrainOutcome::Halted { applied, remaining });
                }
                Err(error) => {
                    self.discard_rejected(&entry, &error.to_string()).await?;
                }
            }
        }

        if applied > 0 {
            self.refresh(collection).await;
        }
        self.emit(SyncEvent::Drained {
            collection,
            applied,
        });
        Ok(DrainOutcome::Completed { applied })
    }

    /// Replay one queued entry against the gateway and reconcile the cache.
    ///
    /// Cache reconciliation failures after a confirmed network call are
    /// logged, not returned: the server has already applied the operation
    /// and the post-cycle refresh restores consistency.
    async fn replay(&self, entry: &OutboxEntry) -> std::result::Result<(), GatewayError> {
        let collection = entry.collection;
        let payload = entry.payload.clone().unwrap_or(Value::Null);

        match entry.method {
            OpMethod::Create => {
                let confirmed = self.gateway.create(collection, &payload).await?;
                self.reconcile_create(entry, &confirmed).await;
            }
            OpMethod::Update => {
                let target = self.parse_target(entry);
                let confirmed = self.gateway.update(collection, &target, &payload).await?;
                self.apply_confirmed(collection, &confirmed).await;
            }
            OpMethod::Delete => {
                let target = self.parse_target(entry);
                self.gateway.delete(collection, &target).await?;
                if let Err(error) = self.store.remove(collection, &target).await {
                    tracing::warn!(
                        collection = collection.as_str(),
                        "Failed to drop deleted document from cache: {error}"
                    );
                }
            }
        }
        Ok(())
    }

    /// Replace the temp-keyed optimistic document with the confirmed one.
    async fn reconcile_create(&self, entry: &OutboxEntry, confirmed: &Value) {
        let collection = entry.collection;
        let temp = EntityId::Temp(entry.target_id.clone());
        if let Err(error) = self.store.remove(collection, &temp).await {
            tracing::warn!(
                collection = collection.as_str(),
                "Failed to drop optimistic document {temp}: {error}"
            );
        }
        self.apply_confirmed(collection, confirmed).await;
    }

    async fn apply_confirmed(&self, collection: Collection, confirmed: &Value) {
        let normalized = match normalize_document(collection, confirmed) {
            Ok(value) => value,
            Err(error) => {
                tracing::warn!(
                    collection = collection.as_str(),
                    "Confirmation lacks a usable document, deferring to refresh: {error}"
                );
                return;
            }
        };
        if document_id(&normalized).is_none() {
            return;
        }
        if let Err(error) = self.store.upsert(collection, &normalized).await {
            tracing::warn!(
                collection = collection.as_str(),
                "Failed to cache confirmed document: {error}"
            );
        }
    }

    /// Drop a permanently rejected entry and everything depending on it.
    async fn discard_rejected(&self, entry: &OutboxEntry, message: &str) -> Result<()> {
        let collection = entry.collection;
        tracing::warn!(
            collection = collection.as_str(),
            op_id = %entry.op_id,
            "Server rejected queued operation: {message}"
        );
        self.outbox.mark_done(&entry.op_id).await?;

        if entry.method == OpMethod::Create {
            // The temp id will never be confirmed: purge dependent queued
            // entries and roll the optimistic document back out.
            let cancelled = self
                .outbox
                .cancel_for_target(collection, &entry.target_id)
                .await?;
            if cancelled > 0 {
                tracing::warn!(
                    collection = collection.as_str(),
                    cancelled,
                    "Cascade-cancelled operations queued against {}",
                    entry.target_id
                );
            }
            self.store
                .remove(collection, &EntityId::Temp(entry.target_id.clone()))
                .await?;
        }

        self.emit(SyncEvent::Rejected {
            collection,
            message: message.to_string(),
        });
        Ok(())
    }

    /// Authoritative re-fetch after a cycle that made progress, so
    /// server-side derived fields (QR codes, occupancy) are captured.
    /// Optimistic documents for entries still queued are layered back on
    /// top so pending work stays visible.
    async fn refresh(&self, collection: Collection) {
        match self.gateway.fetch_list(collection).await {
            Ok(values) => {
                let normalized: Vec<Value> = values
                    .iter()
                    .filter_map(|value| match normalize_document(collection, value) {
                        Ok(doc) => Some(doc),
                        Err(error) => {
                            tracing::warn!(
                                collection = collection.as_str(),
                                "Skipping malformed server document: {error}"
                            );
                            None
                        }
                    })
                    .collect();

                if let Err(error) = self.store.replace_all(collection, &normalized).await {
                    tracing::warn!(
                        collection = collection.as_str(),
                        "Failed to refresh cache snapshot: {error}"
                    );
                    return;
                }
                self.restore_optimistic(collection).await;
            }
            Err(error) => {
                tracing::warn!(
                    collection = collection.as_str(),
                    "Post-drain refresh failed, keeping local snapshot: {error}"
                );
            }
        }
    }

    /// Re-apply optimistic documents for CREATE entries that are still
    /// queued, which the wholesale snapshot replace just discarded.
    async fn restore_optimistic(&self, collection: Collection) {
        let entries = match self.outbox.list_pending(collection).await {
            Ok(entries) => entries,
            Err(error) => {
                tracing::warn!(
                    collection = collection.as_str(),
                    "Cannot restore optimistic documents: {error}"
                );
                return;
            }
        };

        for entry in entries {
            if entry.method != OpMethod::Create {
                continue;
            }
            let Some(Value::Object(mut fields)) = entry.payload.clone() else {
                continue;
            };
            fields.insert("id".to_string(), Value::String(entry.target_id.clone()));
            fields.insert("pending".to_string(), Value::Bool(true));
            self.apply_confirmed(collection, &Value::Object(fields)).await;
        }
    }

    fn parse_target(&self, entry: &OutboxEntry) -> EntityId {
        EntityId::from_str(&entry.target_id).unwrap_or_else(|_| {
            tracing::warn!(
                op_id = %entry.op_id,
                "Unparseable target id {}, treating as temp",
                entry.target_id
            );
            EntityId::Temp(entry.target_id.clone())
        })
    }

    fn emit(&self, event: SyncEvent) {
        // Nobody listening is fine
        let _ = self.events.send(event);
    }
}

/// Per-collection drain token; released on drop so a panicked or early
/// returning cycle never wedges the collection.
struct DrainGuard<'a> {
    draining: &'a Mutex<HashSet<Collection>>,
    collection: Collection,
}

impl<'a> DrainGuard<'a> {
    fn acquire(draining: &'a Mutex<HashSet<Collection>>, collection: Collection) -> Option<Self> {
        let mut active = draining.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if !active.insert(collection) {
            return None;
        }
        Some(Self {
            draining,
            collection,
        })
    }
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        let mut active = self
            .draining
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        active.remove(&self.collection);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tokio::sync::Mutex as AsyncMutex;

    use super::*;
    use crate::db::Database;
    use crate::testing::FakeGateway;

    struct Fixture {
        engine: Arc<SyncEngine>,
        store: LocalStore,
        outbox: Outbox,
        gateway: Arc<FakeGateway>,
        connectivity: ConnectivityMonitor,
    }

    async fn setup() -> Fixture {
        let db = Arc::new(AsyncMutex::new(Database::open_in_memory().await.unwrap()));
        let store = LocalStore::new(Arc::clone(&db));
        let outbox = Outbox::new(db);
        let gateway = Arc::new(FakeGateway::new());
        let connectivity = ConnectivityMonitor::new(true);
        let engine = Arc::new(SyncEngine::new(
            store.clone(),
            outbox.clone(),
            Arc::<FakeGateway>::clone(&gateway),
            connectivity.clone(),
        ));
        Fixture {
            engine,
            store,
            outbox,
            gateway,
            connectivity,
        }
    }

    fn bed_create(target: &str, label: &str) -> OutboxEntry {
        OutboxEntry::new(
            Collection::Beds,
            OpMethod::Create,
            target,
            Some(json!({ "roomId": 3, "bedLabel": label })),
        )
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn offline_flag_short_circuits_the_drain() {
        let fx = setup().await;
        fx.connectivity.set_online(false);
        fx.outbox.enqueue(&bed_create("temp_1_a", "A")).await.unwrap();

        let outcome = fx.engine.drain(Collection::Beds).await.unwrap();
        assert_eq!(outcome, DrainOutcome::Offline);
        assert!(fx.gateway.calls().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn queued_operations_replay_in_fifo_order() {
        let fx = setup().await;
        for (target, label) in [("temp_1_a", "A"), ("temp_2_b", "B"), ("temp_3_c", "C")] {
            fx.outbox.enqueue(&bed_create(target, label)).await.unwrap();
        }

        let outcome = fx.engine.drain(Collection::Beds).await.unwrap();
        assert_eq!(outcome, DrainOutcome::Completed { applied: 3 });

        let labels: Vec<Option<String>> = fx
            .gateway
            .calls()
            .iter()
            .filter(|call| call.label == "create beds")
            .map(|call| {
                call.payload
                    .as_ref()
                    .and_then(|p| p["bedLabel"].as_str().map(ToString::to_string))
            })
            .collect();
        assert_eq!(
            labels,
            vec![
                Some("A".to_string()),
                Some("B".to_string()),
                Some("C".to_string())
            ]
        );
        assert!(fx.outbox.list_pending(Collection::Beds).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn transient_failure_halts_before_later_entries() {
        let fx = setup().await;
        fx.outbox.enqueue(&bed_create("temp_1_a", "A")).await.unwrap();
        fx.outbox.enqueue(&bed_create("temp_2_b", "B")).await.unwrap();
        fx.gateway.push_error(GatewayError::Server { status: 500 });

        let outcome = fx.engine.drain(Collection::Beds).await.unwrap();
        assert_eq!(
            outcome,
            DrainOutcome::Halted {
                applied: 0,
                remaining: 2
            }
        );

        // B's POST was never attempted this cycle
        let creates = fx
            .gateway
            .call_labels()
            .iter()
            .filter(|label| *label == "create beds")
            .count();
        assert_eq!(creates, 1);

        // Next trigger retries A first, then B
        let outcome = fx.engine.drain(Collection::Beds).await.unwrap();
        assert_eq!(outcome, DrainOutcome::Completed { applied: 2 });
        let order: Vec<Option<String>> = fx
            .gateway
            .calls()
            .iter()
            .filter(|call| call.label == "create beds")
            .map(|call| {
                call.payload
                    .as_ref()
                    .and_then(|p| p["bedLabel"].as_str().map(ToString::to_string))
            })
            .collect();
        assert_eq!(
            order,
            vec![
                Some("A".to_string()),
                Some("A".to_string()),
                Some("B".to_string())
            ]
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn confirmed_create_reconciles_the_temp_id() {
        let fx = setup().await;
        let temp = "temp_1_a";

        // Optimistic document as the repository would have written it
        fx.store
            .upsert(
                Collection::Beds,
                &json!({ "id": temp, "roomId": 3, "bedLabel": "B-12", "pending": true }),
            )
            .await
            .unwrap();
        fx.outbox.enqueue(&bed_create(temp, "B-12")).await.unwrap();

        let confirmed = json!({ "id": 77, "roomId": 3, "bedLabel": "B-12", "isOccupied": false });
        fx.gateway.push_response(confirmed.clone());
        fx.gateway.set_list(Collection::Beds, vec![confirmed]);

        fx.engine.drain(Collection::Beds).await.unwrap();

        let docs = fx.store.read_all(Collection::Beds).await;
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0]["id"], json!(77));
        assert_eq!(docs[0]["pending"], json!(false));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn rejected_create_is_dropped_with_cascade_cancel() {
        let fx = setup().await;
        let temp = "temp_1_a";

        fx.store
            .upsert(
                Collection::Beds,
                &json!({ "id": temp, "roomId": 3, "bedLabel": "A", "pending": true }),
            )
            .await
            .unwrap();
        fx.outbox.enqueue(&bed_create(temp, "A")).await.unwrap();
        // A dependent entry against the same temp id must be purged too
        fx.outbox
            .enqueue(&OutboxEntry::new(
                Collection::Beds,
                OpMethod::Update,
                temp,
                Some(json!({ "bedLabel": "A2" })),
            ))
            .await
            .unwrap();
        fx.outbox.enqueue(&bed_create("temp_2_b", "B")).await.unwrap();

        let mut events = fx.engine.subscribe();
        fx.gateway.push_error(GatewayError::Rejected {
            status: 422,
            message: "label already in use".to_string(),
        });

        let outcome = fx.engine.drain(Collection::Beds).await.unwrap();
        // B still applies: rejections do not halt the cycle
        assert_eq!(outcome, DrainOutcome::Completed { applied: 1 });

        assert!(fx.outbox.list_pending(Collection::Beds).await.unwrap().is_empty());
        let docs = fx.store.read_all(Collection::Beds).await;
        assert!(docs.iter().all(|doc| doc["id"] != json!(temp)));

        let event = events.recv().await.unwrap();
        match event {
            SyncEvent::Rejected { message, .. } => {
                assert_eq!(message, "label already in use");
            }
            other => panic!("expected rejection event, got {other:?}"),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_triggers_do_not_double_submit() {
        let fx = setup().await;
        fx.outbox.enqueue(&bed_create("temp_1_a", "A")).await.unwrap();
        fx.gateway.hold_mutations();

        let engine = Arc::clone(&fx.engine);
        let first = tokio::spawn(async move { engine.drain(Collection::Beds).await.unwrap() });

        // Give the first drain time to reach the gated network call
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let second = fx.engine.drain(Collection::Beds).await.unwrap();
        assert_eq!(second, DrainOutcome::AlreadyDraining);

        fx.gateway.release_mutations(1);
        let first = first.await.unwrap();
        assert_eq!(first, DrainOutcome::Completed { applied: 1 });

        let creates = fx
            .gateway
            .call_labels()
            .iter()
            .filter(|label| *label == "create beds")
            .count();
        assert_eq!(creates, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn refresh_restores_documents_for_still_queued_creates() {
        let fx = setup().await;
        fx.outbox.enqueue(&bed_create("temp_1_a", "A")).await.unwrap();
        fx.outbox.enqueue(&bed_create("temp_2_b", "B")).await.unwrap();
        // A confirms, then B halts the cycle with a 500
        fx.gateway.push_response(json!({ "id": 7, "roomId": 3, "bedLabel": "A" }));
        fx.gateway.push_error(GatewayError::Server { status: 500 });
        fx.gateway
            .set_list(Collection::Beds, vec![json!({ "id": 7, "roomId": 3, "bedLabel": "A" })]);

        let outcome = fx.engine.drain(Collection::Beds).await.unwrap();
        assert_eq!(
            outcome,
            DrainOutcome::Halted {
                applied: 1,
                remaining: 1
            }
        );

        // The refreshed snapshot holds the confirmed bed plus the still
        // pending optimistic one
        let docs = fx.store.read_all(Collection::Beds).await;
        assert_eq!(docs.len(), 2);
        assert!(docs.iter().any(|d| d["id"] == json!(7)));
        assert!(docs
            .iter()
            .any(|d| d["id"] == json!("temp_2_b") && d["pending"] == json!(true)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn drain_all_pending_covers_every_queued_collection() {
        let fx = setup().await;
        fx.outbox.enqueue(&bed_create("temp_1_a", "A")).await.unwrap();
        fx.outbox
            .enqueue(&OutboxEntry::new(
                Collection::Patients,
                OpMethod::Create,
                "temp_2_b",
                Some(json!({ "name": "Ana", "surnames": "Lopez" })),
            ))
            .await
            .unwrap();

        fx.engine.drain_all_pending().await.unwrap();

        assert!(fx.outbox.list_pending(Collection::Beds).await.unwrap().is_empty());
        assert!(fx
            .outbox
            .list_pending(Collection::Patients)
            .await
            .unwrap()
            .is_empty());
    }
}
