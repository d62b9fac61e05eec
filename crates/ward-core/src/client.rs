//! Ward client: the single context object wiring the store, outbox,
//! gateway, connectivity monitor, and sync engine together.
//!
//! UI layers construct one `WardClient` and talk to typed repositories;
//! nothing in the crate lives in global mutable state, so tests inject a
//! fake gateway and an in-memory database.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::config::ApiConfig;
use crate::connectivity::ConnectivityMonitor;
use crate::db::Database;
use crate::error::Result;
use crate::gateway::{HttpGateway, NetworkGateway};
use crate::models::{Bed, Collection, Island, Nurse, Patient, Room};
use crate::outbox::{Outbox, OutboxEntry};
use crate::repo::{Admissions, HelpAlerts, NurseConsole, Repository, SyncContext};
use crate::store::LocalStore;
use crate::sync::{DrainOutcome, SyncEngine, SyncEvent};

/// Client handle over one local database and one remote API.
#[derive(Clone)]
pub struct WardClient {
    ctx: Arc<SyncContext>,
    engine: Arc<SyncEngine>,
}

impl WardClient {
    /// Open a client backed by a local database file and the HTTP gateway.
    pub async fn open(db_path: impl Into<PathBuf>, config: ApiConfig) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::open(&db_path).await?;
        let gateway: Arc<dyn NetworkGateway> = Arc::new(HttpGateway::new(config)?);
        Ok(Self::build(db, gateway, true))
    }

    /// Open an in-memory client with the HTTP gateway (primarily for
    /// short-lived tooling).
    pub async fn open_in_memory(config: ApiConfig) -> Result<Self> {
        let db = Database::open_in_memory().await?;
        let gateway: Arc<dyn NetworkGateway> = Arc::new(HttpGateway::new(config)?);
        Ok(Self::build(db, gateway, true))
    }

    /// Open an in-memory client with an injected gateway. The seam tests
    /// and embedders use to avoid real network traffic.
    pub async fn open_with_gateway(
        gateway: Arc<dyn NetworkGateway>,
        initially_online: bool,
    ) -> Result<Self> {
        let db = Database::open_in_memory().await?;
        Ok(Self::build(db, gateway, initially_online))
    }

    fn build(db: Database, gateway: Arc<dyn NetworkGateway>, initially_online: bool) -> Self {
        let db = Arc::new(Mutex::new(db));
        let store = LocalStore::new(Arc::clone(&db));
        let outbox = Outbox::new(db);
        let connectivity = ConnectivityMonitor::new(initially_online);

        let engine = Arc::new(SyncEngine::new(
            store.clone(),
            outbox.clone(),
            Arc::clone(&gateway),
            connectivity.clone(),
        ));
        let ctx = Arc::new(SyncContext {
            store,
            outbox,
            gateway,
            connectivity,
        });
        Self { ctx, engine }
    }

    pub fn beds(&self) -> Repository<Bed> {
        Repository::new(Arc::clone(&self.ctx))
    }

    pub fn rooms(&self) -> Repository<Room> {
        Repository::new(Arc::clone(&self.ctx))
    }

    pub fn islands(&self) -> Repository<Island> {
        Repository::new(Arc::clone(&self.ctx))
    }

    pub fn nurses(&self) -> Repository<Nurse> {
        Repository::new(Arc::clone(&self.ctx))
    }

    pub fn patients(&self) -> Repository<Patient> {
        Repository::new(Arc::clone(&self.ctx))
    }

    pub fn admissions(&self) -> Admissions {
        Admissions::new(Arc::clone(&self.ctx))
    }

    pub fn nurse_console(&self) -> NurseConsole {
        NurseConsole::new(Arc::clone(&self.ctx))
    }

    pub fn help(&self) -> HelpAlerts {
        HelpAlerts::new(Arc::clone(&self.ctx))
    }

    /// The connectivity flag; the embedding environment flips it.
    pub fn connectivity(&self) -> ConnectivityMonitor {
        self.ctx.connectivity.clone()
    }

    /// Subscribe to sync notifications (drained/rejected/halted).
    pub fn events(&self) -> broadcast::Receiver<SyncEvent> {
        self.engine.subscribe()
    }

    /// Drain every collection with queued operations now.
    pub async fn sync_now(&self) -> Result<()> {
        self.engine.drain_all_pending().await
    }

    /// Drain one collection now.
    pub async fn drain(&self, collection: Collection) -> Result<DrainOutcome> {
        self.engine.drain(collection).await
    }

    /// Queued operations across all collections, FIFO within each.
    pub async fn pending_operations(&self) -> Result<Vec<OutboxEntry>> {
        let mut entries = Vec::new();
        for collection in self.ctx.outbox.collections_with_pending().await? {
            entries.extend(self.ctx.outbox.list_pending(collection).await?);
        }
        Ok(entries)
    }

    /// Spawn the connectivity watcher: drains eagerly if already online
    /// (entries queued in a prior session) and on every offline-to-online
    /// transition afterwards.
    pub fn start(&self) -> JoinHandle<()> {
        let engine = Arc::clone(&self.engine);
        let mut changes = self.ctx.connectivity.changes();

        tokio::spawn(async move {
            if *changes.borrow_and_update() {
                if let Err(error) = engine.drain_all_pending().await {
                    tracing::warn!("Startup drain failed: {error}");
                }
            }

            while changes.changed().await.is_ok() {
                if !*changes.borrow_and_update() {
                    continue;
                }
                tracing::info!("Connectivity regained, draining queued operations");
                if let Err(error) = engine.drain_all_pending().await {
                    tracing::warn!("Reconnect drain failed: {error}");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::models::{BedDraft, EntityId};
    use crate::testing::FakeGateway;

    async fn client_with(gateway: &Arc<FakeGateway>, online: bool) -> WardClient {
        WardClient::open_with_gateway(
            Arc::<FakeGateway>::clone(gateway) as Arc<dyn NetworkGateway>,
            online,
        )
        .await
        .unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn offline_create_then_reconnect_reconciles_to_server_id() {
        let gateway = Arc::new(FakeGateway::new());
        let client = client_with(&gateway, false).await;

        // Offline: the bed shows up immediately, pending, under a temp id
        let outcome = client
            .beds()
            .create(BedDraft {
                room_id: 3,
                bed_label: "B-12".to_string(),
            })
            .await
            .unwrap();
        assert!(outcome.queued);

        let listed = client.beds().list().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert!(listed[0].pending);
        assert!(listed[0].id.is_temp());

        // Reconnect: the queued POST confirms with a server id
        let confirmed = json!({
            "id": 77, "roomId": 3, "bedLabel": "B-12", "isOccupied": false, "qrcode": "QR-77"
        });
        gateway.push_response(confirmed.clone());
        gateway.set_list(Collection::Beds, vec![confirmed]);

        client.connectivity().set_online(true);
        client.sync_now().await.unwrap();

        let listed = client.beds().list().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, EntityId::Server(77));
        assert!(!listed[0].pending);
        assert!(client.pending_operations().await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn watcher_drains_on_connectivity_transition() {
        let gateway = Arc::new(FakeGateway::new());
        let client = client_with(&gateway, false).await;

        client
            .beds()
            .create(BedDraft {
                room_id: 1,
                bed_label: "B-1".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(client.pending_operations().await.unwrap().len(), 1);

        let watcher = client.start();
        client.connectivity().set_online(true);

        let mut drained = false;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            if client.pending_operations().await.unwrap().is_empty() {
                drained = true;
                break;
            }
        }
        assert!(drained, "watcher never drained the queue");
        watcher.abort();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn startup_drain_covers_a_prior_offline_session() {
        let gateway = Arc::new(FakeGateway::new());
        let client = client_with(&gateway, false).await;

        client
            .beds()
            .create(BedDraft {
                room_id: 1,
                bed_label: "B-1".to_string(),
            })
            .await
            .unwrap();

        // "Next session": already online when the watcher starts
        client.connectivity().set_online(true);
        let watcher = client.start();

        let mut drained = false;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            if client.pending_operations().await.unwrap().is_empty() {
                drained = true;
                break;
            }
        }
        assert!(drained, "startup drain never ran");
        watcher.abort();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn sync_events_reach_subscribers() {
        let gateway = Arc::new(FakeGateway::new());
        let client = client_with(&gateway, false).await;
        let mut events = client.events();

        client
            .beds()
            .create(BedDraft {
                room_id: 1,
                bed_label: "B-1".to_string(),
            })
            .await
            .unwrap();

        client.connectivity().set_online(true);
        client.sync_now().await.unwrap();

        match events.recv().await.unwrap() {
            SyncEvent::Drained { collection, applied } => {
                assert_eq!(collection, Collection::Beds);
                assert_eq!(applied, 1);
            }
            other => panic!("expected drained event, got {other:?}"),
        }
    }
}
