//! In-process fakes shared by the sync, repository, and client tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Semaphore;

use crate::gateway::{GatewayError, GatewayResult, NetworkGateway};
use crate::models::{Collection, EntityId};

/// One observed gateway call, rendered as a compact label plus payload.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub label: String,
    pub payload: Option<Value>,
}

#[derive(Default)]
struct FakeState {
    lists: HashMap<Collection, Vec<Value>>,
    /// Scripted results popped by mutating calls, FIFO. `None` payload
    /// means "use the default behavior".
    script: VecDeque<GatewayResult<Option<Value>>>,
    list_script: VecDeque<GatewayError>,
    calls: Vec<RecordedCall>,
    next_id: i64,
}

/// Scripted gateway: records every call, serves canned collection
/// snapshots, and fails on demand. Mutating calls can be gated behind a
/// semaphore to hold a drain mid-flight.
pub struct FakeGateway {
    state: Mutex<FakeState>,
    gate: Arc<Semaphore>,
    gated: std::sync::atomic::AtomicBool,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState {
                next_id: 100,
                ..FakeState::default()
            }),
            gate: Arc::new(Semaphore::new(0)),
            gated: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn set_list(&self, collection: Collection, docs: Vec<Value>) {
        self.state.lock().unwrap().lists.insert(collection, docs);
    }

    /// Queue a failure for the next mutating call.
    pub fn push_error(&self, error: GatewayError) {
        self.state.lock().unwrap().script.push_back(Err(error));
    }

    /// Queue an explicit response document for the next mutating call.
    pub fn push_response(&self, doc: Value) {
        self.state.lock().unwrap().script.push_back(Ok(Some(doc)));
    }

    /// Queue a failure for the next list fetch.
    pub fn push_list_error(&self, error: GatewayError) {
        self.state.lock().unwrap().list_script.push_back(error);
    }

    /// Make every subsequent mutating call block until `release` is called.
    pub fn hold_mutations(&self) {
        self.gated.store(true, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn release_mutations(&self, count: usize) {
        self.gate.add_permits(count);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn call_labels(&self) -> Vec<String> {
        self.calls().into_iter().map(|call| call.label).collect()
    }

    fn record(&self, label: String, payload: Option<Value>) {
        self.state
            .lock()
            .unwrap()
            .calls
            .push(RecordedCall { label, payload });
    }

    async fn wait_for_gate(&self) {
        if self.gated.load(std::sync::atomic::Ordering::SeqCst) {
            let permit = self.gate.acquire().await.unwrap();
            permit.forget();
        }
    }

    /// Pop a scripted result or fall back to `default`.
    fn scripted_or(&self, default: Value) -> GatewayResult<Value> {
        let scripted = self.state.lock().unwrap().script.pop_front();
        match scripted {
            Some(Ok(Some(doc))) => Ok(doc),
            Some(Ok(None)) | None => Ok(default),
            Some(Err(error)) => Err(error),
        }
    }

    fn next_id(&self) -> i64 {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        state.next_id
    }
}

impl Default for FakeGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NetworkGateway for FakeGateway {
    async fn fetch_list(&self, collection: Collection) -> GatewayResult<Vec<Value>> {
        self.record(format!("list {collection}"), None);
        if let Some(error) = self.state.lock().unwrap().list_script.pop_front() {
            return Err(error);
        }
        Ok(self
            .state
            .lock()
            .unwrap()
            .lists
            .get(&collection)
            .cloned()
            .unwrap_or_default())
    }

    async fn create(&self, collection: Collection, payload: &Value) -> GatewayResult<Value> {
        self.record(format!("create {collection}"), Some(payload.clone()));
        self.wait_for_gate().await;

        let mut default = payload.clone();
        if let Value::Object(fields) = &mut default {
            fields.insert("id".to_string(), json!(self.next_id()));
        }
        self.scripted_or(default)
    }

    async fn update(
        &self,
        collection: Collection,
        id: &EntityId,
        payload: &Value,
    ) -> GatewayResult<Value> {
        self.record(format!("update {collection}/{id}"), Some(payload.clone()));
        self.wait_for_gate().await;

        let mut default = payload.clone();
        if let Value::Object(fields) = &mut default {
            fields.insert("id".to_string(), serde_json::to_value(id).unwrap());
        }
        self.scripted_or(default)
    }

    async fn delete(&self, collection: Collection, id: &EntityId) -> GatewayResult<()> {
        self.record(format!("delete {collection}/{id}"), None);
        self.wait_for_gate().await;
        self.scripted_or(Value::Null).map(|_| ())
    }

    async fn get_action(&self, path: &str) -> GatewayResult<Value> {
        self.record(format!("get {path}"), None);
        self.scripted_or(Value::Null)
    }

    async fn post_action(&self, path: &str, payload: &Value) -> GatewayResult<Value> {
        self.record(format!("post {path}"), Some(payload.clone()));
        self.wait_for_gate().await;
        self.scripted_or(Value::Null)
    }

    async fn put_action(&self, path: &str, payload: &Value) -> GatewayResult<Value> {
        self.record(format!("put {path}"), Some(payload.clone()));
        self.wait_for_gate().await;
        self.scripted_or(Value::Null)
    }

    async fn patch_action(&self, path: &str, payload: Option<&Value>) -> GatewayResult<Value> {
        self.record(format!("patch {path}"), payload.cloned());
        self.wait_for_gate().await;
        self.scripted_or(Value::Null)
    }
}
