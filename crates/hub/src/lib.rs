// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! StickerHub: cross-platform sticker relay with identity binding and batch
//! pack delivery.

pub mod binding;
pub mod clock;
pub mod config;
pub mod convert;
pub mod delivery;
pub mod error;
pub mod gateway;
pub mod janitor;
pub mod model;
pub mod relay;
pub mod resolve;
pub mod state;
pub mod test_support;
pub mod transport;

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::binding::registry::BindingRegistry;
use crate::binding::store::JsonFileStore;
use crate::clock::{Clock, SystemClock};
use crate::config::HubConfig;
use crate::convert::FfmpegConverter;
use crate::delivery::{DeliveryManager, Pipeline};
use crate::gateway::feishu::FeishuGateway;
use crate::gateway::source::HttpAssetSource;
use crate::gateway::webhook::WebhookGateway;
use crate::gateway::GatewayRouter;
use crate::janitor::spawn_janitor;
use crate::model::Platform;
use crate::relay::RelayService;
use crate::state::HubState;
use crate::transport::build_router;

/// Build the delivery router from configured credentials.
fn build_gateways(config: &HubConfig) -> GatewayRouter {
    let feishu = config.feishu_credentials().map(|(id, secret)| {
        Arc::new(FeishuGateway::with_base_url(id, secret, config.feishu_base_url.clone()))
    });
    if feishu.is_none() {
        tracing::warn!("feishu app credentials not set: bot delivery and webhook images disabled");
    }

    let mut router =
        GatewayRouter::new().with_webhook(Arc::new(WebhookGateway::new(feishu.clone())));
    if let Some(feishu) = feishu {
        router = router.with_platform(Platform::Feishu, feishu);
    }
    router
}

/// Run the hub server until shutdown.
pub async fn run(config: HubConfig) -> anyhow::Result<()> {
    config.validate()?;
    let addr = format!("{}:{}", config.host, config.port);
    let shutdown = CancellationToken::new();

    let policy = config.webhook_policy();
    if policy.is_unrestricted() {
        tracing::warn!("webhook host allow-list disabled: any https host is accepted");
    }

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = Arc::new(JsonFileStore::new(config.bindings_path()));
    tracing::info!(path = %store.path().display(), "using bindings file");
    let registry = Arc::new(BindingRegistry::open(
        store,
        Arc::clone(&clock),
        config.bind_magic_ttl_secs,
        policy,
    )?);

    let pipeline = Pipeline {
        source: Arc::new(HttpAssetSource::new()),
        converter: Arc::new(FfmpegConverter::new(
            config.ffmpeg.clone(),
            config.lottie_convert.clone(),
        )),
        router: build_gateways(&config),
        item_timeout: config.item_timeout(),
    };
    let delivery =
        Arc::new(DeliveryManager::new(pipeline.clone(), Arc::clone(&clock), shutdown.clone()));
    let relay = RelayService::new(Arc::clone(&registry), pipeline, Arc::clone(&delivery));

    let state = Arc::new(HubState {
        registry,
        delivery,
        relay,
        auth_token: config.auth_token.clone(),
        shutdown: shutdown.clone(),
    });

    spawn_janitor(Arc::clone(&state), config.janitor_interval(), config.task_retention_secs);
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupt received, shutting down");
            }
            shutdown.cancel();
        });
    }

    if config.auth_token.is_some() {
        tracing::info!("stickerhub listening on {addr} (auth enabled)");
    } else {
        tracing::info!("stickerhub listening on {addr}");
    }
    let router = build_router(state);
    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, router).with_graceful_shutdown(shutdown.cancelled_owned()).await?;

    Ok(())
}
