// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test infrastructure: fakes for the delivery collaborators and a
//! builder for a fully wired hub.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Once};
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::Json;
use futures_util::future::BoxFuture;
use serde_json::{json, Value};
use tokio::sync::{watch, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::binding::registry::BindingRegistry;
use crate::binding::store::{BindingStore, MemoryStore};
use crate::binding::webhook::WebhookPolicy;
use crate::binding::Destination;
use crate::clock::{Clock, ManualClock};
use crate::convert::{ConversionError, MediaConverter, TargetFormat};
use crate::delivery::{DeliveryManager, Pipeline, Progress, ProgressSink, TaskReport};
use crate::gateway::{AssetSource, GatewayRouter, PlatformGateway};
use crate::model::{Asset, AssetKind, AssetRef, Platform};
use crate::relay::RelayService;
use crate::state::HubState;

static INIT: Once = Once::new();

/// Install the rustls crypto provider (reqwest needs one even for plain HTTP).
pub fn ensure_crypto_provider() {
    INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

fn locked<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// `n` PNG pack items named `item-1` through `item-n`.
pub fn pack_items(n: usize) -> Vec<AssetRef> {
    (1..=n)
        .map(|i| AssetRef {
            id: format!("item-{i}"),
            kind: AssetKind::Image,
            mime_type: "image/png".to_owned(),
            file_name: format!("item-{i}.png"),
            animated: false,
            url: format!("http://assets.test/item-{i}"),
        })
        .collect()
}

/// One message captured by [`FakeGateway`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    Asset { destination: Destination, file_name: String },
    Text { destination: Destination, text: String },
    Group { destination: Destination, file_names: Vec<String> },
    File { destination: Destination, file_name: String, content: Vec<u8> },
}

/// Gateway that records every send and fails for selected file names.
///
/// A group containing a failing file is rejected whole.
#[derive(Default)]
pub struct FakeGateway {
    sent: Mutex<Vec<Sent>>,
    fail_files: HashSet<String>,
    without_groups: bool,
    without_files: bool,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on<I, S>(files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            sent: Mutex::new(Vec::new()),
            fail_files: files.into_iter().map(Into::into).collect(),
            without_groups: false,
            without_files: false,
        }
    }

    /// Reject every image group, as gateways without group support do.
    pub fn without_groups(mut self) -> Self {
        self.without_groups = true;
        self
    }

    /// Reject every file attachment.
    pub fn without_files(mut self) -> Self {
        self.without_files = true;
        self
    }

    pub fn sent(&self) -> Vec<Sent> {
        locked(&self.sent).clone()
    }

    pub fn asset_names(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Asset { file_name, .. } => Some(file_name),
                _ => None,
            })
            .collect()
    }

    pub fn texts(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Text { text, .. } => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn groups(&self) -> Vec<Vec<String>> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Group { file_names, .. } => Some(file_names),
                _ => None,
            })
            .collect()
    }

    /// `(file_name, content)` of every file sent.
    pub fn files(&self) -> Vec<(String, Vec<u8>)> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::File { file_name, content, .. } => Some((file_name, content)),
                _ => None,
            })
            .collect()
    }
}

impl PlatformGateway for FakeGateway {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn send_asset<'a>(
        &'a self,
        destination: &'a Destination,
        asset: &'a Asset,
    ) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            if self.fail_files.contains(&asset.file_name) {
                anyhow::bail!("rejected {}", asset.file_name);
            }
            locked(&self.sent).push(Sent::Asset {
                destination: destination.clone(),
                file_name: asset.file_name.clone(),
            });
            Ok(())
        })
    }

    fn send_text<'a>(
        &'a self,
        destination: &'a Destination,
        text: &'a str,
    ) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            locked(&self.sent)
                .push(Sent::Text { destination: destination.clone(), text: text.to_owned() });
            Ok(())
        })
    }

    fn send_group<'a>(
        &'a self,
        destination: &'a Destination,
        assets: &'a [Asset],
    ) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            if self.without_groups {
                anyhow::bail!("groups unsupported");
            }
            if let Some(bad) = assets.iter().find(|a| self.fail_files.contains(&a.file_name)) {
                anyhow::bail!("group rejected because of {}", bad.file_name);
            }
            locked(&self.sent).push(Sent::Group {
                destination: destination.clone(),
                file_names: assets.iter().map(|a| a.file_name.clone()).collect(),
            });
            Ok(())
        })
    }

    fn send_file<'a>(
        &'a self,
        destination: &'a Destination,
        file_name: &'a str,
        content: &'a [u8],
    ) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            if self.without_files || self.fail_files.contains(file_name) {
                anyhow::bail!("rejected {file_name}");
            }
            locked(&self.sent).push(Sent::File {
                destination: destination.clone(),
                file_name: file_name.to_owned(),
                content: content.to_vec(),
            });
            Ok(())
        })
    }
}

/// Asset source serving placeholder bytes.
///
/// Selected ids fail; gated ids wait for a permit from the shared semaphore
/// before resolving, which lets tests hold a batch open.
#[derive(Default)]
pub struct FakeSource {
    fail_ids: HashSet<String>,
    gated_ids: HashSet<String>,
    gate: Option<Arc<Semaphore>>,
    requested: AtomicUsize,
    fetched: AtomicUsize,
}

impl FakeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fail_ids.extend(ids.into_iter().map(Into::into));
        self
    }

    pub fn gated<I, S>(mut self, ids: I, gate: Arc<Semaphore>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.gated_ids.extend(ids.into_iter().map(Into::into));
        self.gate = Some(gate);
        self
    }

    pub fn fetched(&self) -> usize {
        self.fetched.load(Ordering::SeqCst)
    }

    /// Wait until `n` fetches have started, gated or not, up to five seconds.
    pub async fn wait_for_requests(&self, n: usize) -> anyhow::Result<()> {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.requested.load(Ordering::SeqCst) < n {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await?;
        Ok(())
    }
}

impl AssetSource for FakeSource {
    fn fetch<'a>(&'a self, item: &'a AssetRef) -> BoxFuture<'a, anyhow::Result<Asset>> {
        Box::pin(async move {
            self.requested.fetch_add(1, Ordering::SeqCst);
            if self.gated_ids.contains(&item.id) {
                if let Some(gate) = &self.gate {
                    let _permit = gate.acquire().await?;
                }
            }
            self.fetched.fetch_add(1, Ordering::SeqCst);
            if self.fail_ids.contains(&item.id) {
                anyhow::bail!("source has no {}", item.id);
            }
            Ok(Asset {
                kind: item.kind,
                mime_type: item.mime_type.clone(),
                file_name: item.file_name.clone(),
                animated: item.animated,
                content: item.id.as_bytes().to_vec(),
            })
        })
    }
}

/// Converter that renames per target without touching bytes.
#[derive(Default)]
pub struct FakeConverter {
    fail_files: HashSet<String>,
    targets: Mutex<Vec<TargetFormat>>,
}

impl FakeConverter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on<I, S>(files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { fail_files: files.into_iter().map(Into::into).collect(), targets: Mutex::default() }
    }

    pub fn targets(&self) -> Vec<TargetFormat> {
        locked(&self.targets).clone()
    }
}

impl MediaConverter for FakeConverter {
    fn convert<'a>(
        &'a self,
        asset: Asset,
        target: TargetFormat,
    ) -> BoxFuture<'a, Result<Asset, ConversionError>> {
        Box::pin(async move {
            locked(&self.targets).push(target);
            if self.fail_files.contains(&asset.file_name) {
                return Err(ConversionError::Failed {
                    tool: "fake".to_owned(),
                    detail: format!("cannot convert {}", asset.file_name),
                });
            }
            Ok(match target {
                TargetFormat::Original => asset,
                TargetFormat::Gif => Asset {
                    kind: AssetKind::Gif,
                    mime_type: "image/gif".to_owned(),
                    file_name: asset.renamed("gif"),
                    animated: true,
                    content: asset.content,
                },
                TargetFormat::Png => Asset {
                    kind: AssetKind::Image,
                    mime_type: "image/png".to_owned(),
                    file_name: asset.renamed("png"),
                    animated: false,
                    content: asset.content,
                },
            })
        })
    }
}

/// Sink that records progress and final reports.
pub struct RecordingSink {
    progress: Mutex<Vec<Progress>>,
    reports: Mutex<Vec<TaskReport>>,
    count: watch::Sender<usize>,
    fail: bool,
}

impl Default for RecordingSink {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingSink {
    pub fn new() -> Self {
        let (count, _) = watch::channel(0);
        Self { progress: Mutex::default(), reports: Mutex::default(), count, fail: false }
    }

    /// Records like [`new`](Self::new) but reports an error on every call.
    pub fn failing() -> Self {
        Self { fail: true, ..Self::new() }
    }

    pub fn progress(&self) -> Vec<Progress> {
        locked(&self.progress).clone()
    }

    pub fn reports(&self) -> Vec<TaskReport> {
        locked(&self.reports).clone()
    }

    /// Wait until at least `n` progress events arrived, up to five seconds.
    pub async fn wait_for_progress(&self, n: usize) -> anyhow::Result<()> {
        let mut rx = self.count.subscribe();
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|c| *c >= n)).await??;
        Ok(())
    }
}

impl ProgressSink for RecordingSink {
    fn progress<'a>(
        &'a self,
        _task_id: &'a str,
        progress: Progress,
    ) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            let n = {
                let mut events = locked(&self.progress);
                events.push(progress);
                events.len()
            };
            self.count.send_replace(n);
            if self.fail {
                anyhow::bail!("sink unavailable");
            }
            Ok(())
        })
    }

    fn finished<'a>(&'a self, report: &'a TaskReport) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            locked(&self.reports).push(report.clone());
            if self.fail {
                anyhow::bail!("sink unavailable");
            }
            Ok(())
        })
    }
}

/// Builder for a fully wired [`HubState`] backed by fakes.
pub struct HubStateBuilder {
    clock: Arc<ManualClock>,
    store: Arc<dyn BindingStore>,
    ttl_secs: u64,
    policy: WebhookPolicy,
    source: Arc<FakeSource>,
    converter: Arc<FakeConverter>,
    gateway: Arc<FakeGateway>,
    webhook_gateway: Option<Arc<FakeGateway>>,
    auth_token: Option<String>,
}

impl Default for HubStateBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Handles to the fakes behind a built [`HubState`].
pub struct TestHub {
    pub state: Arc<HubState>,
    pub clock: Arc<ManualClock>,
    pub gateway: Arc<FakeGateway>,
    pub webhook_gateway: Option<Arc<FakeGateway>>,
    pub source: Arc<FakeSource>,
    pub converter: Arc<FakeConverter>,
}

impl HubStateBuilder {
    pub fn new() -> Self {
        Self {
            clock: Arc::new(ManualClock::new(1_700_000_000)),
            store: Arc::new(MemoryStore::default()),
            ttl_secs: 600,
            policy: WebhookPolicy::default(),
            source: Arc::new(FakeSource::new()),
            converter: Arc::new(FakeConverter::new()),
            gateway: Arc::new(FakeGateway::new()),
            webhook_gateway: Some(Arc::new(FakeGateway::new())),
            auth_token: None,
        }
    }

    pub fn store(mut self, store: Arc<dyn BindingStore>) -> Self {
        self.store = store;
        self
    }

    pub fn source(mut self, source: FakeSource) -> Self {
        self.source = Arc::new(source);
        self
    }

    pub fn converter(mut self, converter: FakeConverter) -> Self {
        self.converter = Arc::new(converter);
        self
    }

    pub fn gateway(mut self, gateway: FakeGateway) -> Self {
        self.gateway = Arc::new(gateway);
        self
    }

    /// Leave webhook destinations without a gateway.
    pub fn without_webhook_gateway(mut self) -> Self {
        self.webhook_gateway = None;
        self
    }

    pub fn auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn build(self) -> anyhow::Result<TestHub> {
        let clock: Arc<dyn Clock> = self.clock.clone();
        let registry = Arc::new(
            BindingRegistry::open(self.store, Arc::clone(&clock), self.ttl_secs, self.policy)?,
        );

        let mut router = GatewayRouter::new()
            .with_platform(Platform::Feishu, self.gateway.clone())
            .with_platform(Platform::Telegram, self.gateway.clone());
        if let Some(webhook) = &self.webhook_gateway {
            router = router.with_webhook(webhook.clone());
        }
        let pipeline = Pipeline {
            source: self.source.clone(),
            converter: self.converter.clone(),
            router,
            item_timeout: None,
        };

        let shutdown = CancellationToken::new();
        let delivery =
            Arc::new(DeliveryManager::new(pipeline.clone(), Arc::clone(&clock), shutdown.clone()));
        let relay = RelayService::new(Arc::clone(&registry), pipeline, Arc::clone(&delivery));
        let state = Arc::new(HubState {
            registry,
            delivery,
            relay,
            auth_token: self.auth_token,
            shutdown,
        });

        Ok(TestHub {
            state,
            clock: self.clock,
            gateway: self.gateway,
            webhook_gateway: self.webhook_gateway,
            source: self.source,
            converter: self.converter,
        })
    }
}

/// One request captured by [`MockFeishu`].
#[derive(Debug, Clone, PartialEq)]
pub struct Recorded {
    pub path: String,
    pub body: Value,
}

type RequestLog = Arc<Mutex<Vec<Recorded>>>;

fn record(log: &RequestLog, path: impl Into<String>, body: Value) {
    locked(log).push(Recorded { path: path.into(), body });
}

/// Local stand-in for the Feishu open API, custom-bot webhooks, and an asset
/// host, served on an ephemeral port.
///
/// - an app secret of `wrong` fails the tenant token call
/// - `/hook/bad` rejects with a non-zero code, `/hook/legacy` answers with
///   the older `StatusCode` field
/// - `/assets/missing` is a 404 and `/assets/empty` an empty body
pub struct MockFeishu {
    addr: SocketAddr,
    log: RequestLog,
}

impl MockFeishu {
    pub async fn start() -> anyhow::Result<Self> {
        let log = RequestLog::default();
        let app = axum::Router::new()
            .route("/open-apis/auth/v3/tenant_access_token/internal", post(mock_tenant_token))
            .route("/open-apis/im/v1/images", post(mock_upload))
            .route("/open-apis/im/v1/files", post(mock_file_upload))
            .route("/open-apis/im/v1/messages", post(mock_message))
            .route("/hook/{id}", post(mock_hook))
            .route("/assets/{name}", get(mock_asset))
            .with_state(Arc::clone(&log));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });
        Ok(Self { addr, log })
    }

    /// Open API base URL to hand to the Feishu gateway.
    pub fn base_url(&self) -> String {
        format!("http://{}/open-apis", self.addr)
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    pub fn requests(&self) -> Vec<Recorded> {
        locked(&self.log).clone()
    }

    pub fn paths(&self) -> Vec<String> {
        self.requests().into_iter().map(|r| r.path).collect()
    }
}

async fn mock_tenant_token(State(log): State<RequestLog>, Json(body): Json<Value>) -> Json<Value> {
    let rejected = body["app_secret"] == "wrong";
    record(&log, "/auth", body);
    if rejected {
        return Json(json!({ "code": 10014, "msg": "app secret invalid" }));
    }
    Json(json!({ "code": 0, "msg": "ok", "tenant_access_token": "t-abc", "expire": 7200 }))
}

async fn mock_upload(
    State(log): State<RequestLog>,
    headers: HeaderMap,
    body: Bytes,
) -> Json<Value> {
    let auth = headers.get("authorization").and_then(|v| v.to_str().ok()).unwrap_or_default();
    record(&log, "/images", json!({ "authorization": auth, "size": body.len() }));
    Json(json!({ "code": 0, "msg": "ok", "data": { "image_key": "img_v2_1" } }))
}

async fn mock_file_upload(
    State(log): State<RequestLog>,
    headers: HeaderMap,
    body: Bytes,
) -> Json<Value> {
    let auth = headers.get("authorization").and_then(|v| v.to_str().ok()).unwrap_or_default();
    record(&log, "/files", json!({ "authorization": auth, "size": body.len() }));
    Json(json!({ "code": 0, "msg": "ok", "data": { "file_key": "file_v3_1" } }))
}

async fn mock_message(
    State(log): State<RequestLog>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    Json(mut body): Json<Value>,
) -> Json<Value> {
    let auth = headers.get("authorization").and_then(|v| v.to_str().ok()).unwrap_or_default();
    body["authorization"] = json!(auth);
    body["receive_id_type"] = json!(query.get("receive_id_type"));
    record(&log, "/messages", body);
    Json(json!({ "code": 0, "msg": "ok" }))
}

async fn mock_hook(
    State(log): State<RequestLog>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> Json<Value> {
    record(&log, format!("/hook/{id}"), body);
    match id.as_str() {
        "bad" => Json(json!({ "code": 19024, "msg": "Key Words Not Found" })),
        "legacy" => Json(json!({ "StatusCode": 0, "StatusMessage": "success" })),
        _ => Json(json!({ "code": 0, "msg": "success" })),
    }
}

async fn mock_asset(Path(name): Path<String>) -> (StatusCode, Vec<u8>) {
    match name.as_str() {
        "missing" => (StatusCode::NOT_FOUND, Vec::new()),
        "empty" => (StatusCode::OK, Vec::new()),
        _ => (StatusCode::OK, b"GIF89a-fake".to_vec()),
    }
}
