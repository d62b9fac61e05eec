//! Entity repositories: the operation API exposed to UI layers.
//!
//! One generic [`Repository`] covers every cached entity type; per-entity
//! differences (endpoints, offline policy, sort order) come from the
//! [`Entity`] trait. Facades for the online-only admission and nurse
//! console flows, and the singleton help-alert trigger, sit alongside.

use std::marker::PhantomData;
use std::sync::Arc;

use serde_json::{json, Value};

use crate::connectivity::ConnectivityMonitor;
use crate::error::{Error, Result};
use crate::gateway::{GatewayError, NetworkGateway};
use crate::models::{
    normalize_document, Collection, Entity, EntityId, HelpAlert, HelpAlertDraft,
    HELP_ALERT_SINGLETON,
};
use crate::outbox::{OpMethod, Outbox, OutboxEntry};
use crate::store::LocalStore;

/// Shared handles constructed once per client; repositories are cheap
/// per-entity views over this context (no global mutable state).
pub struct SyncContext {
    pub(crate) store: LocalStore,
    pub(crate) outbox: Outbox,
    pub(crate) gateway: Arc<dyn NetworkGateway>,
    pub(crate) connectivity: ConnectivityMonitor,
}

/// Uniform mutation result: the UI renders `data` either way and only uses
/// `queued` for cosmetic "pending sync" messaging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome<T> {
    pub data: T,
    /// True when the mutation was deferred to the outbox instead of being
    /// confirmed by the server.
    pub queued: bool,
}

impl<T> Outcome<T> {
    pub const fn applied(data: T) -> Self {
        Self {
            data,
            queued: false,
        }
    }

    pub const fn deferred(data: T) -> Self {
        Self { data, queued: true }
    }
}

/// Per-entity-type facade over the Local Store, Outbox, and gateway.
pub struct Repository<E: Entity> {
    ctx: Arc<SyncContext>,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> Repository<E> {
    pub(crate) const fn new(ctx: Arc<SyncContext>) -> Self {
        Self {
            ctx,
            _entity: PhantomData,
        }
    }

    /// Read-through list: authoritative fetch when online (refreshing the
    /// cache snapshot), cache fallback when offline or the network fails
    /// transiently.
    pub async fn list(&self) -> Result<Vec<E>> {
        if self.ctx.connectivity.is_online() {
            match self.ctx.gateway.fetch_list(E::COLLECTION).await {
                Ok(values) => {
                    let entities = decode_many::<E>(&values);
                    let normalized: Vec<Value> = entities
                        .iter()
                        .filter_map(|entity| serde_json::to_value(entity).ok())
                        .collect();
                    if let Err(error) =
                        self.ctx.store.replace_all(E::COLLECTION, &normalized).await
                    {
                        tracing::warn!(
                            collection = E::COLLECTION.as_str(),
                            "Cache refresh after list failed: {error}"
                        );
                    }
                    return Ok(sorted(entities));
                }
                Err(error) if error.is_transient() => {
                    tracing::warn!(
                        collection = E::COLLECTION.as_str(),
                        "List fetch failed, serving cached snapshot: {error}"
                    );
                }
                Err(error) => return Err(error.into()),
            }
        }
        Ok(self.cached().await)
    }

    /// Current cache snapshot without touching the network.
    pub async fn cached(&self) -> Vec<E> {
        let docs = self.ctx.store.read_all(E::COLLECTION).await;
        sorted(decode_many::<E>(&docs))
    }

    /// Create an entity: direct POST when online, optimistic local write
    /// plus a queued CREATE otherwise.
    pub async fn create(&self, draft: E::Draft) -> Result<Outcome<E>> {
        let payload = serde_json::to_value(&draft)?;

        if self.ctx.connectivity.is_online() {
            match self.ctx.gateway.create(E::COLLECTION, &payload).await {
                Ok(confirmed) => {
                    let entity = decode_one::<E>(&confirmed)?;
                    self.cache_upsert(&entity).await;
                    return Ok(Outcome::applied(entity));
                }
                Err(error) if error.is_transient() && E::POLICY.queue_create => {
                    tracing::info!(
                        collection = E::COLLECTION.as_str(),
                        "Create failed transiently, deferring to outbox: {error}"
                    );
                }
                Err(error) => return Err(error.into()),
            }
        } else if !E::POLICY.queue_create {
            return Err(Error::RequiresConnectivity);
        }

        self.create_deferred(&draft, payload).await
    }

    /// Update an entity. Editing a still-unconfirmed temp id merges the new
    /// payload into its pending CREATE so the outbox never holds a
    /// dependent operation.
    pub async fn update(&self, id: &EntityId, draft: E::Draft) -> Result<Outcome<E>> {
        let payload = serde_json::to_value(&draft)?;

        if id.is_temp() {
            let Some(entry) = self
                .ctx
                .outbox
                .pending_create_for(E::COLLECTION, &id.as_key())
                .await?
            else {
                return Err(Error::NotFound(format!(
                    "no pending create for {id}; refresh and retry"
                )));
            };
            self.ctx.outbox.replace_payload(&entry.op_id, &payload).await?;

            let entity = E::from_draft(&draft, id.clone());
            self.cache_upsert(&entity).await;
            return Ok(Outcome::deferred(entity));
        }

        if self.ctx.connectivity.is_online() {
            match self.ctx.gateway.update(E::COLLECTION, id, &payload).await {
                Ok(confirmed) => {
                    let entity = decode_one::<E>(&confirmed)?;
                    self.cache_upsert(&entity).await;
                    return Ok(Outcome::applied(entity));
                }
                Err(error) if error.is_transient() && E::POLICY.queue_update => {
                    tracing::info!(
                        collection = E::COLLECTION.as_str(),
                        "Update failed transiently, deferring to outbox: {error}"
                    );
                }
                Err(error) => return Err(error.into()),
            }
        } else if !E::POLICY.queue_update {
            return Err(Error::RequiresConnectivity);
        }

        let entity = E::from_draft(&draft, id.clone());
        self.cache_upsert(&entity).await;
        self.enqueue(OutboxEntry::new(
            E::COLLECTION,
            OpMethod::Update,
            id.as_key(),
            Some(payload),
        ))
        .await;
        Ok(Outcome::deferred(entity))
    }

    /// Delete an entity. A never-synced temp id is discarded locally along
    /// with its queued CREATE; no network call is made.
    pub async fn delete(&self, id: &EntityId) -> Result<Outcome<()>> {
        if id.is_temp() {
            self.ctx
                .outbox
                .cancel_for_target(E::COLLECTION, &id.as_key())
                .await?;
            self.ctx.store.remove(E::COLLECTION, id).await?;
            return Ok(Outcome::applied(()));
        }

        if self.ctx.connectivity.is_online() {
            match self.ctx.gateway.delete(E::COLLECTION, id).await {
                Ok(()) => {
                    if let Err(error) = self.ctx.store.remove(E::COLLECTION, id).await {
                        tracing::warn!(
                            collection = E::COLLECTION.as_str(),
                            "Failed to drop deleted document from cache: {error}"
                        );
                    }
                    return Ok(Outcome::applied(()));
                }
                Err(error) if error.is_transient() && E::POLICY.queue_delete => {
                    tracing::info!(
                        collection = E::COLLECTION.as_str(),
                        "Delete failed transiently, deferring to outbox: {error}"
                    );
                }
                Err(error) => return Err(error.into()),
            }
        } else if !E::POLICY.queue_delete {
            return Err(Error::RequiresConnectivity);
        }

        if let Err(error) = self.ctx.store.remove(E::COLLECTION, id).await {
            tracing::warn!(
                collection = E::COLLECTION.as_str(),
                "Optimistic removal failed: {error}"
            );
        }
        self.enqueue(OutboxEntry::new(
            E::COLLECTION,
            OpMethod::Delete,
            id.as_key(),
            None,
        ))
        .await;
        Ok(Outcome::deferred(()))
    }

    async fn create_deferred(&self, draft: &E::Draft, payload: Value) -> Result<Outcome<E>> {
        let id = EntityId::new_temp();
        let entity = E::from_draft(draft, id.clone());
        self.cache_upsert(&entity).await;
        self.enqueue(OutboxEntry::new(
            E::COLLECTION,
            OpMethod::Create,
            id.as_key(),
            Some(payload),
        ))
        .await;
        Ok(Outcome::deferred(entity))
    }

    /// Cache writes degrade: an unavailable cache must not fail a mutation
    /// the server (or the outbox) already accepted.
    async fn cache_upsert(&self, entity: &E) {
        let doc = match serde_json::to_value(entity) {
            Ok(doc) => doc,
            Err(error) => {
                tracing::warn!("Failed to serialize entity for cache: {error}");
                return;
            }
        };
        if let Err(error) = self.ctx.store.upsert(E::COLLECTION, &doc).await {
            tracing::warn!(
                collection = E::COLLECTION.as_str(),
                "Cache upsert failed, entity will reappear on next fetch: {error}"
            );
        }
    }

    /// A failed enqueue degrades to "will not retry" rather than blocking
    /// the caller; the optimistic write already happened.
    async fn enqueue(&self, entry: OutboxEntry) {
        if let Err(error) = self.ctx.outbox.enqueue(&entry).await {
            tracing::error!(
                collection = entry.collection.as_str(),
                "Failed to enqueue operation; it will not be retried: {error}"
            );
        }
    }
}

fn decode_many<E: Entity>(values: &[Value]) -> Vec<E> {
    values
        .iter()
        .filter_map(|value| match serde_json::from_value::<E>(value.clone()) {
            Ok(entity) => Some(entity),
            Err(error) => {
                tracing::warn!(
                    collection = E::COLLECTION.as_str(),
                    "Skipping malformed document: {error}"
                );
                None
            }
        })
        .collect()
}

fn decode_one<E: Entity>(value: &Value) -> Result<E> {
    let normalized = normalize_document(E::COLLECTION, value)
        .map_err(|error| GatewayError::Envelope(format!("unusable confirmation: {error}")))?;
    Ok(serde_json::from_value(normalized)?)
}

fn sorted<E: Entity>(mut entities: Vec<E>) -> Vec<E> {
    entities.sort_by_key(E::sort_key);
    entities
}

fn ensure_online(connectivity: &ConnectivityMonitor) -> Result<()> {
    if connectivity.is_online() {
        Ok(())
    } else {
        Err(Error::RequiresConnectivity)
    }
}

/// Admission flows. Intentionally online-only: admitting, moving, and
/// discharging patients are irreversible server-side transitions that are
/// never queued offline.
pub struct Admissions {
    ctx: Arc<SyncContext>,
}

impl Admissions {
    pub(crate) const fn new(ctx: Arc<SyncContext>) -> Self {
        Self { ctx }
    }

    /// Admit a patient to a bed.
    pub async fn admit(&self, patient_id: i64, bed_id: i64) -> Result<Value> {
        ensure_online(&self.ctx.connectivity)?;
        Ok(self
            .ctx
            .gateway
            .post_action(
                "/admissions",
                &json!({ "patientId": patient_id, "bedId": bed_id }),
            )
            .await?)
    }

    /// Move an admitted patient to another bed.
    pub async fn change_bed(&self, admission_id: i64, bed_id: i64) -> Result<Value> {
        ensure_online(&self.ctx.connectivity)?;
        Ok(self
            .ctx
            .gateway
            .post_action(
                "/admissions/change-bed",
                &json!({ "admissionId": admission_id, "bedId": bed_id }),
            )
            .await?)
    }

    /// Discharge a patient.
    pub async fn discharge(&self, admission_id: i64) -> Result<Value> {
        ensure_online(&self.ctx.connectivity)?;
        Ok(self
            .ctx
            .gateway
            .patch_action(&format!("/admissions/discharge/{admission_id}"), None)
            .await?)
    }

    /// Look up admission/bed details from a scanned QR payload.
    pub async fn info_by_qr(&self, qr_code: &str) -> Result<Value> {
        ensure_online(&self.ctx.connectivity)?;
        Ok(self
            .ctx
            .gateway
            .get_action(&format!("/admissions/info/{qr_code}"))
            .await?)
    }

    /// Bind the patient device to an admission after scanning the bed QR.
    pub async fn bind(&self, qr_code: &str) -> Result<Value> {
        ensure_online(&self.ctx.connectivity)?;
        Ok(self
            .ctx
            .gateway
            .post_action("/admissions/bind", &json!({ "qrCode": qr_code }))
            .await?)
    }
}

/// Nurse console operations beyond the cached nurse roster.
pub struct NurseConsole {
    ctx: Arc<SyncContext>,
}

impl NurseConsole {
    pub(crate) const fn new(ctx: Arc<SyncContext>) -> Self {
        Self { ctx }
    }

    /// Toggle the authenticated nurse's duty status.
    pub async fn set_duty_status(&self, on_duty: bool) -> Result<Value> {
        ensure_online(&self.ctx.connectivity)?;
        Ok(self
            .ctx
            .gateway
            .patch_action("/nurses/status", Some(&json!({ "onDuty": on_duty })))
            .await?)
    }

    /// Rooms assigned to the authenticated nurse.
    pub async fn my_assignments(&self) -> Result<Value> {
        ensure_online(&self.ctx.connectivity)?;
        Ok(self.ctx.gateway.get_action("/nurses/my-assignments").await?)
    }

    /// Replace a nurse's room assignments.
    pub async fn assign_rooms(&self, nurse_id: i64, room_ids: &[i64]) -> Result<Value> {
        ensure_online(&self.ctx.connectivity)?;
        Ok(self
            .ctx
            .gateway
            .put_action(
                "/nurses/assignments",
                &json!({ "nurseId": nurse_id, "roomIds": room_ids }),
            )
            .await?)
    }
}

/// Patient help button plus the nurse-side alert queue.
pub struct HelpAlerts {
    ctx: Arc<SyncContext>,
    repo: Repository<HelpAlert>,
}

impl HelpAlerts {
    pub(crate) fn new(ctx: Arc<SyncContext>) -> Self {
        let repo = Repository::new(Arc::clone(&ctx));
        Self { ctx, repo }
    }

    /// Raise a help alert for an admission.
    ///
    /// Offline, at most one alert stays queued: a newer trigger replaces
    /// the older pending one instead of stacking duplicates.
    pub async fn trigger(&self, admission_id: i64) -> Result<Outcome<HelpAlert>> {
        let draft = HelpAlertDraft {
            admission_id,
            created_at: chrono::Utc::now().to_rfc3339(),
        };
        let payload = serde_json::to_value(&draft)?;

        if self.ctx.connectivity.is_online() {
            match self
                .ctx
                .gateway
                .create(Collection::HelpAlerts, &payload)
                .await
            {
                Ok(confirmed) => {
                    let alert = decode_one::<HelpAlert>(&confirmed)?;
                    return Ok(Outcome::applied(alert));
                }
                Err(error) if error.is_transient() => {
                    tracing::info!("Help alert failed transiently, queueing: {error}");
                }
                Err(error) => return Err(error.into()),
            }
        }

        let id = EntityId::Temp(HELP_ALERT_SINGLETON.to_string());
        let alert = HelpAlert::from_draft(&draft, id.clone());
        if let Err(error) = self
            .ctx
            .store
            .upsert(Collection::HelpAlerts, &serde_json::to_value(&alert)?)
            .await
        {
            tracing::warn!("Failed to cache pending help alert: {error}");
        }
        let entry = OutboxEntry::new(
            Collection::HelpAlerts,
            OpMethod::Create,
            id.as_key(),
            Some(payload),
        );
        if let Err(error) = self.ctx.outbox.enqueue_replacing(&entry).await {
            tracing::error!("Failed to queue help alert; it will not be retried: {error}");
        }
        Ok(Outcome::deferred(alert))
    }

    /// Unresolved alerts for the nurse console (read-through cached).
    pub async fn pending(&self) -> Result<Vec<HelpAlert>> {
        self.repo.list().await
    }

    /// Mark an alert as attended.
    pub async fn resolve(&self, alert_id: i64) -> Result<()> {
        ensure_online(&self.ctx.connectivity)?;
        self.ctx
            .gateway
            .patch_action(&format!("/help/resolve/{alert_id}"), None)
            .await?;
        if let Err(error) = self
            .ctx
            .store
            .remove(Collection::HelpAlerts, &EntityId::Server(alert_id))
            .await
        {
            tracing::warn!("Failed to drop resolved alert from cache: {error}");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tokio::sync::Mutex as AsyncMutex;

    use super::*;
    use crate::db::Database;
    use crate::models::{Bed, BedDraft, Patient, PatientDraft};
    use crate::testing::FakeGateway;

    struct Fixture {
        ctx: Arc<SyncContext>,
        gateway: Arc<FakeGateway>,
    }

    async fn setup(online: bool) -> Fixture {
        let db = Arc::new(AsyncMutex::new(Database::open_in_memory().await.unwrap()));
        let gateway = Arc::new(FakeGateway::new());
        let ctx = Arc::new(SyncContext {
            store: LocalStore::new(Arc::clone(&db)),
            outbox: Outbox::new(db),
            gateway: Arc::<FakeGateway>::clone(&gateway) as Arc<dyn NetworkGateway>,
            connectivity: ConnectivityMonitor::new(online),
        });
        Fixture { ctx, gateway }
    }

    fn beds(fx: &Fixture) -> Repository<Bed> {
        Repository::new(Arc::clone(&fx.ctx))
    }

    fn patients(fx: &Fixture) -> Repository<Patient> {
        Repository::new(Arc::clone(&fx.ctx))
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn online_create_confirms_and_caches() {
        let fx = setup(true).await;
        fx.gateway.push_response(json!({
            "id": 77, "roomId": 3, "bedLabel": "B-12", "isOccupied": false, "qrcode": "QR-77"
        }));

        let outcome = beds(&fx)
            .create(BedDraft {
                room_id: 3,
                bed_label: "B-12".to_string(),
            })
            .await
            .unwrap();

        assert!(!outcome.queued);
        assert_eq!(outcome.data.id, EntityId::Server(77));
        assert!(!outcome.data.pending);

        let cached = beds(&fx).cached().await;
        assert_eq!(cached.len(), 1);
        assert!(fx
            .ctx
            .outbox
            .list_pending(Collection::Beds)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn offline_create_is_optimistic_and_queued() {
        let fx = setup(false).await;

        let outcome = beds(&fx)
            .create(BedDraft {
                room_id: 3,
                bed_label: "B-12".to_string(),
            })
            .await
            .unwrap();

        assert!(outcome.queued);
        assert!(outcome.data.id.is_temp());
        assert!(outcome.data.pending);
        assert!(fx.gateway.calls().is_empty());

        let cached = beds(&fx).cached().await;
        assert_eq!(cached.len(), 1);
        assert!(cached[0].pending);

        let pending = fx.ctx.outbox.list_pending(Collection::Beds).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].method, OpMethod::Create);
        assert_eq!(pending[0].target_id, outcome.data.id.as_key());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn transient_create_failure_falls_back_to_the_queue() {
        let fx = setup(true).await;
        fx.gateway.push_error(GatewayError::Timeout);

        let outcome = beds(&fx)
            .create(BedDraft {
                room_id: 3,
                bed_label: "B-12".to_string(),
            })
            .await
            .unwrap();

        assert!(outcome.queued);
        assert_eq!(
            fx.ctx
                .outbox
                .list_pending(Collection::Beds)
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn rejected_create_surfaces_the_server_message() {
        let fx = setup(true).await;
        fx.gateway.push_error(GatewayError::Rejected {
            status: 422,
            message: "label already in use".to_string(),
        });

        let error = beds(&fx)
            .create(BedDraft {
                room_id: 3,
                bed_label: "B-12".to_string(),
            })
            .await
            .unwrap_err();

        assert_eq!(error.to_string(), "label already in use");
        // No optimistic write for a permanent rejection
        assert!(beds(&fx).cached().await.is_empty());
        assert!(fx
            .ctx
            .outbox
            .list_pending(Collection::Beds)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn updating_a_temp_id_merges_into_the_pending_create() {
        let fx = setup(false).await;
        let repo = patients(&fx);

        let created = repo
            .create(PatientDraft {
                name: "Ana".to_string(),
                surnames: "Lopez".to_string(),
                notes: None,
            })
            .await
            .unwrap();
        let temp_id = created.data.id.clone();

        let updated = repo
            .update(
                &temp_id,
                PatientDraft {
                    name: "Ana Maria".to_string(),
                    surnames: "Lopez".to_string(),
                    notes: Some("allergic to penicillin".to_string()),
                },
            )
            .await
            .unwrap();
        assert!(updated.queued);

        // Still exactly one queued op: the CREATE, carrying merged fields
        let pending = fx
            .ctx
            .outbox
            .list_pending(Collection::Patients)
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].method, OpMethod::Create);
        assert_eq!(
            pending[0].payload.as_ref().unwrap()["name"],
            json!("Ana Maria")
        );

        let cached = repo.cached().await;
        assert_eq!(cached.len(), 1);
        assert_eq!(cached[0].name, "Ana Maria");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn updating_an_unknown_temp_id_is_an_error() {
        let fx = setup(false).await;
        let error = patients(&fx)
            .update(
                &EntityId::Temp("temp_0_gone".to_string()),
                PatientDraft {
                    name: "x".to_string(),
                    surnames: "y".to_string(),
                    notes: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(error, Error::NotFound(_)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn deleting_a_temp_id_cancels_the_queued_create() {
        let fx = setup(false).await;
        let repo = beds(&fx);

        let created = repo
            .create(BedDraft {
                room_id: 3,
                bed_label: "B-12".to_string(),
            })
            .await
            .unwrap();

        let outcome = repo.delete(&created.data.id).await.unwrap();
        assert!(!outcome.queued);

        // No network traffic, no cached document, no queued create
        assert!(fx.gateway.calls().is_empty());
        assert!(repo.cached().await.is_empty());
        assert!(fx
            .ctx
            .outbox
            .list_pending(Collection::Beds)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn online_only_delete_fails_fast_offline() {
        let fx = setup(false).await;

        let error = beds(&fx).delete(&EntityId::Server(4)).await.unwrap_err();
        assert!(matches!(error, Error::RequiresConnectivity));
        assert!(fx.gateway.calls().is_empty());
        assert!(fx
            .ctx
            .outbox
            .list_pending(Collection::Beds)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn queueable_delete_removes_locally_and_defers() {
        let fx = setup(false).await;
        fx.ctx
            .store
            .upsert(
                Collection::Patients,
                &json!({ "id": 9, "name": "Ana", "surnames": "Lopez" }),
            )
            .await
            .unwrap();

        let outcome = patients(&fx).delete(&EntityId::Server(9)).await.unwrap();
        assert!(outcome.queued);
        assert!(patients(&fx).cached().await.is_empty());

        let pending = fx
            .ctx
            .outbox
            .list_pending(Collection::Patients)
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].method, OpMethod::Delete);
        assert_eq!(pending[0].target_id, "9");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn list_falls_back_to_cache_on_transient_failure() {
        let fx = setup(true).await;
        fx.ctx
            .store
            .upsert(
                Collection::Beds,
                &json!({ "id": 1, "bedLabel": "B-1", "isOccupied": false }),
            )
            .await
            .unwrap();
        fx.gateway.push_list_error(GatewayError::Transport("down".to_string()));

        let listed = beds(&fx).list().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].bed_label, "B-1");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn list_sorts_by_the_entity_sort_key() {
        let fx = setup(true).await;
        fx.gateway.set_list(
            Collection::Beds,
            vec![
                json!({ "id": 2, "bedLabel": "B-2" }),
                json!({ "id": 1, "bedLabel": "A-1" }),
            ],
        );

        let listed = beds(&fx).list().await.unwrap();
        let labels: Vec<&str> = listed.iter().map(|b| b.bed_label.as_str()).collect();
        assert_eq!(labels, vec!["A-1", "B-2"]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn admissions_are_online_only() {
        let fx = setup(false).await;
        let admissions = Admissions::new(Arc::clone(&fx.ctx));

        let error = admissions.discharge(12).await.unwrap_err();
        assert!(matches!(error, Error::RequiresConnectivity));
        assert!(fx.gateway.calls().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn offline_help_triggers_collapse_to_one_queued_alert() {
        let fx = setup(false).await;
        let help = HelpAlerts::new(Arc::clone(&fx.ctx));

        let first = help.trigger(5).await.unwrap();
        assert!(first.queued);
        let second = help.trigger(5).await.unwrap();
        assert!(second.queued);

        let pending = fx
            .ctx
            .outbox
            .list_pending(Collection::HelpAlerts)
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].target_id, HELP_ALERT_SINGLETON);
        assert_eq!(
            pending[0].payload.as_ref().unwrap()["createdAt"],
            json!(second.data.created_at.clone().unwrap())
        );
    }
}
