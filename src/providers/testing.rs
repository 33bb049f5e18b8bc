//! Scripted provider for driving the processor and dispatcher in tests

use super::{
    EmergencyRequest, OrderRef, OrderRequest, ProviderClient, ProviderCurrency, ProviderKind,
    ProviderOrder, ProviderQuote, QuoteRequest, Reconciliation,
};
use crate::config::ProviderConfig;
use crate::error::{ProviderError, ProviderResult};
use crate::transaction::{Leg, TransactionStatus};

use async_trait::async_trait;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::Router;
use chrono::{Duration, Utc};
use dashmap::DashMap;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

type Mapper = fn(&str) -> ProviderResult<TransactionStatus>;

/// Order as a provider echoes it right after creation
pub fn created_order(id: &str, native_status: &str) -> ProviderOrder {
    ProviderOrder {
        id: id.to_string(),
        token: Some(format!("token-{}", id)),
        native_status: native_status.to_string(),
        from: Leg {
            currency: Some("BTC".to_string()),
            network: Some("BTC".to_string()),
            amount: Some(rust_decimal_macros::dec!(0.01)),
            address: Some("bc1qdeposit".to_string()),
            tag: None,
        },
        to: Leg {
            currency: Some("USDTETH".to_string()),
            network: Some("ERC20".to_string()),
            amount: Some(rust_decimal_macros::dec!(590)),
            address: Some("0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed".to_string()),
            tag: None,
        },
        registered_at: Some(Utc::now()),
        expires_at: Some(Utc::now() + Duration::minutes(30)),
        ..Default::default()
    }
}

pub struct ScriptedProvider {
    kind: ProviderKind,
    reconciliation: Reconciliation,
    mapper: Mapper,
    create_result: Mutex<ProviderResult<ProviderOrder>>,
    panic_on_create: AtomicBool,
    /// Last entry repeats once the queue is down to one
    statuses: Mutex<VecDeque<ProviderResult<ProviderOrder>>>,
    emergency_results: Mutex<VecDeque<ProviderResult<()>>>,
    /// Native status per order id for batch lookups
    batch: DashMap<String, String>,
    pub last_create: Mutex<Option<OrderRequest>>,
    pub last_emergency: Mutex<Option<EmergencyRequest>>,
    pub create_calls: AtomicUsize,
    pub status_calls: AtomicUsize,
    pub emergency_calls: AtomicUsize,
    pub batch_calls: Mutex<Vec<usize>>,
}

impl ScriptedProvider {
    pub fn new(kind: ProviderKind, reconciliation: Reconciliation, mapper: Mapper) -> Self {
        Self {
            kind,
            reconciliation,
            mapper,
            create_result: Mutex::new(Ok(created_order("order-1", "new"))),
            panic_on_create: AtomicBool::new(false),
            statuses: Mutex::new(VecDeque::new()),
            emergency_results: Mutex::new(VecDeque::new()),
            batch: DashMap::new(),
            last_create: Mutex::new(None),
            last_emergency: Mutex::new(None),
            create_calls: AtomicUsize::new(0),
            status_calls: AtomicUsize::new(0),
            emergency_calls: AtomicUsize::new(0),
            batch_calls: Mutex::new(Vec::new()),
        }
    }

    /// Easybit vocabulary, reconciled by polling
    pub fn easybit() -> Self {
        Self::new(
            ProviderKind::Easybit,
            Reconciliation::Polling,
            super::easybit::map_native,
        )
    }

    /// FixedFloat vocabulary, reconciled by polling
    pub fn fixedfloat() -> Self {
        Self::new(
            ProviderKind::FixedFloat,
            Reconciliation::Polling,
            super::fixedfloat::map_native,
        )
    }

    /// Changelly vocabulary, reconciled by batch sweeps
    pub fn changelly() -> Self {
        Self::new(
            ProviderKind::Changelly,
            Reconciliation::Batch,
            super::changelly::map_native,
        )
    }

    pub fn set_create(&self, result: ProviderResult<ProviderOrder>) {
        *self.create_result.lock().unwrap() = result;
    }

    pub fn panic_on_create(&self) {
        self.panic_on_create.store(true, Ordering::SeqCst);
    }

    pub fn push_status(&self, native: &str) {
        self.push_order(ProviderOrder {
            native_status: native.to_string(),
            ..Default::default()
        });
    }

    pub fn push_order(&self, order: ProviderOrder) {
        self.statuses.lock().unwrap().push_back(Ok(order));
    }

    pub fn push_status_error(&self, error: ProviderError) {
        self.statuses.lock().unwrap().push_back(Err(error));
    }

    pub fn push_emergency(&self, result: ProviderResult<()>) {
        self.emergency_results.lock().unwrap().push_back(result);
    }

    pub fn set_batch_status(&self, order_id: &str, native: &str) {
        self.batch.insert(order_id.to_string(), native.to_string());
    }

    pub fn creates(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn status_lookups(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn emergencies(&self) -> usize {
        self.emergency_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderClient for ScriptedProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn reconciliation(&self) -> Reconciliation {
        self.reconciliation
    }

    fn map_status(&self, native: &str) -> ProviderResult<TransactionStatus> {
        (self.mapper)(native)
    }

    async fn currencies(&self) -> ProviderResult<Vec<ProviderCurrency>> {
        Ok(Vec::new())
    }

    async fn currency(&self, code: &str, network: &str) -> ProviderResult<ProviderCurrency> {
        Err(ProviderError::Unsupported(format!("{}/{}", code, network)))
    }

    async fn quote(&self, _request: &QuoteRequest) -> ProviderResult<ProviderQuote> {
        Err(ProviderError::Unsupported("quote".to_string()))
    }

    async fn create_order(&self, request: &OrderRequest) -> ProviderResult<ProviderOrder> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if self.panic_on_create.load(Ordering::SeqCst) {
            panic!("scripted create panic");
        }
        *self.last_create.lock().unwrap() = Some(request.clone());
        self.create_result.lock().unwrap().clone()
    }

    async fn order_status(&self, order: &OrderRef) -> ProviderResult<ProviderOrder> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let mut statuses = self.statuses.lock().unwrap();
        let next = if statuses.len() > 1 {
            statuses.pop_front()
        } else {
            statuses.front().cloned()
        };
        match next {
            Some(Ok(found)) => Ok(ProviderOrder {
                id: order.id.clone(),
                ..found
            }),
            Some(Err(e)) => Err(e),
            None => Err(ProviderError::Network("no scripted status".to_string())),
        }
    }

    async fn order_statuses(&self, orders: &[OrderRef]) -> ProviderResult<Vec<ProviderOrder>> {
        self.batch_calls.lock().unwrap().push(orders.len());
        Ok(orders
            .iter()
            .filter_map(|order| {
                self.batch.get(&order.id).map(|native| ProviderOrder {
                    id: order.id.clone(),
                    native_status: native.value().clone(),
                    ..Default::default()
                })
            })
            .collect())
    }

    async fn emergency(&self, request: &EmergencyRequest) -> ProviderResult<()> {
        self.emergency_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_emergency.lock().unwrap() = Some(request.clone());
        self.emergency_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(()))
    }
}

/// Request as seen by a [`ProviderStub`]
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    /// Path and query
    pub uri: String,
    pub headers: HeaderMap,
    pub body: String,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn json(&self) -> Value {
        serde_json::from_str(&self.body).unwrap()
    }
}

/// Local HTTP endpoint answering with canned provider payloads. Replies are
/// keyed by JSON-RPC `method` when the body carries one, else by path.
#[derive(Default)]
pub struct ProviderStub {
    replies: HashMap<String, String>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ProviderStub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(mut self, key: &str, body: &str) -> Self {
        self.replies.insert(key.to_string(), body.to_string());
        self
    }

    /// Serve on an ephemeral port and return the base URL
    pub async fn serve(self) -> (Arc<Self>, String) {
        let stub = Arc::new(self);
        let app = Router::new().fallback(answer).with_state(stub.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        (stub, format!("http://{}", addr))
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

async fn answer(
    State(stub): State<Arc<ProviderStub>>,
    uri: Uri,
    headers: HeaderMap,
    body: String,
) -> (StatusCode, String) {
    let key = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|v| v["method"].as_str().map(str::to_string))
        .unwrap_or_else(|| uri.path().to_string());
    stub.requests.lock().unwrap().push(RecordedRequest {
        uri: uri.to_string(),
        headers,
        body,
    });

    match stub.replies.get(&key) {
        Some(reply) => (StatusCode::OK, reply.clone()),
        None => (StatusCode::NOT_FOUND, format!("no reply for {}", key)),
    }
}

/// Client configuration pointing at a stub, one attempt per call
pub fn stub_config(kind: ProviderKind, base_url: &str, api_secret: &str) -> ProviderConfig {
    ProviderConfig {
        kind,
        enabled: true,
        priority: 1,
        base_url: base_url.to_string(),
        api_key: "test-key".to_string(),
        api_secret: api_secret.to_string(),
        timeout_ms: 2_000,
        max_retries: 1,
        retry_base_delay_ms: 1,
        retry_max_delay_ms: 1,
        batch_size: 10,
        sweep_interval_secs: 30,
    }
}
