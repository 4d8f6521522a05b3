// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! User-facing entry points: forward one asset, start a pack, and answer
//! bind commands.

use std::fmt;
use std::sync::Arc;

use crate::binding::registry::BindingRegistry;
use crate::binding::{BindError, Binding, Destination, MagicToken};
use crate::convert::{target_format, ConversionError};
use crate::delivery::{DeliveryManager, PackMode, Pipeline, ProgressSink, TaskError, TaskHandle};
use crate::error::HubError;
use crate::model::{Asset, AssetRef, Identity};
use crate::resolve::DestinationResolver;

const WEBHOOK_EXAMPLE: &str = "https://open.feishu.cn/open-apis/bot/v2/hook/xxxx";

/// Why a relay or pack request did not go out.
#[derive(Debug)]
pub enum RelayError {
    /// The sender has no destination yet.
    Unbound,
    Fetch(anyhow::Error),
    Conversion(ConversionError),
    Delivery(anyhow::Error),
    Task(TaskError),
}

impl RelayError {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unbound => "UNBOUND",
            Self::Fetch(_) => "FETCH_FAILED",
            Self::Conversion(_) => "CONVERSION_FAILED",
            Self::Delivery(_) => "DELIVERY_FAILED",
            Self::Task(e) => e.as_str(),
        }
    }

    pub fn hub_error(&self) -> HubError {
        match self {
            Self::Unbound => HubError::Unbound,
            Self::Fetch(_) => HubError::UpstreamError,
            Self::Conversion(_) => HubError::BadRequest,
            Self::Delivery(_) => HubError::UpstreamError,
            Self::Task(e) => e.hub_error(),
        }
    }
}

impl fmt::Display for RelayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unbound => f.write_str("this account is not bound yet, send /bind first"),
            Self::Fetch(e) => write!(f, "fetch failed: {e:#}"),
            Self::Conversion(e) => write!(f, "{e}"),
            Self::Delivery(e) => write!(f, "delivery failed: {e:#}"),
            Self::Task(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for RelayError {}

impl From<TaskError> for RelayError {
    fn from(e: TaskError) -> Self {
        Self::Task(e)
    }
}

/// Result of a `/bind` command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindOutcome {
    /// No code given: a token to enter on the other platform.
    Issued(MagicToken),
    /// Code consumed: the new binding.
    Bound(Binding),
}

impl BindOutcome {
    /// Text to reply to the user with.
    pub fn reply_text(&self) -> String {
        match self {
            Self::Issued(token) => format!(
                "Send on the other platform: /bind {}\nValid for {}",
                token.code,
                validity(token.ttl_secs())
            ),
            Self::Bound(binding) => format!(
                "Binding complete: your assets now go to {}",
                binding.destination.masked()
            ),
        }
    }
}

fn validity(secs: u64) -> String {
    if secs >= 60 {
        format!("{} minutes", secs / 60)
    } else {
        format!("{secs} seconds")
    }
}

/// Forwarding and binding front end shared by every inbound surface.
pub struct RelayService {
    registry: Arc<BindingRegistry>,
    resolver: DestinationResolver,
    pipeline: Pipeline,
    delivery: Arc<DeliveryManager>,
}

impl RelayService {
    pub fn new(
        registry: Arc<BindingRegistry>,
        pipeline: Pipeline,
        delivery: Arc<DeliveryManager>,
    ) -> Self {
        let resolver = DestinationResolver::new(Arc::clone(&registry));
        Self { registry, resolver, pipeline, delivery }
    }

    pub fn resolver(&self) -> &DestinationResolver {
        &self.resolver
    }

    /// Forward one asset to `owner`'s destination right away.
    pub async fn relay(&self, owner: &Identity, asset: Asset) -> Result<Destination, RelayError> {
        let destination = self.destination_of(owner).await?;
        self.forward(owner, destination, asset).await
    }

    /// Fetch `item` from the asset source, then forward it like
    /// [`relay`](Self::relay). The destination is looked up once, before the
    /// fetch.
    pub async fn relay_item(
        &self,
        owner: &Identity,
        item: &AssetRef,
    ) -> Result<Destination, RelayError> {
        let destination = self.destination_of(owner).await?;
        let asset = self.pipeline.source.fetch(item).await.map_err(RelayError::Fetch)?;
        self.forward(owner, destination, asset).await
    }

    async fn destination_of(&self, owner: &Identity) -> Result<Destination, RelayError> {
        self.resolver.resolve(owner).await.ok_or_else(|| {
            tracing::info!(owner = %owner, "sender unbound, asset not relayed");
            RelayError::Unbound
        })
    }

    /// Convert and send `asset` to an already resolved destination.
    async fn forward(
        &self,
        owner: &Identity,
        destination: Destination,
        asset: Asset,
    ) -> Result<Destination, RelayError> {
        let target = target_format(&asset);
        let converted =
            self.pipeline.converter.convert(asset, target).await.map_err(RelayError::Conversion)?;
        let gateway = self.pipeline.router.route(&destination).map_err(RelayError::Delivery)?;
        gateway.send_asset(&destination, &converted).await.map_err(RelayError::Delivery)?;

        tracing::info!(
            owner = %owner,
            mode = destination.mode(),
            gateway = gateway.name(),
            kind = ?converted.kind,
            mime = %converted.mime_type,
            "asset relayed"
        );
        Ok(destination)
    }

    /// `/bind` with no argument issues a token; `/bind CODE` consumes one.
    pub async fn bind_command(
        &self,
        identity: &Identity,
        arg: Option<&str>,
    ) -> Result<BindOutcome, BindError> {
        match arg.map(str::trim).filter(|a| !a.is_empty()) {
            None => self.registry.issue_or_reuse_token(identity).await.map(BindOutcome::Issued),
            Some(code) => {
                self.registry.consume_token(code, identity).await.map(BindOutcome::Bound)
            }
        }
    }

    /// Like [`bind_command`](Self::bind_command) but always produces reply text.
    pub async fn handle_bind_command(&self, identity: &Identity, arg: Option<&str>) -> String {
        match self.bind_command(identity, arg).await {
            Ok(outcome) => outcome.reply_text(),
            Err(e) => {
                tracing::warn!(identity = %identity, code = e.as_str(), "bind failed");
                format!("Bind failed: {e}")
            }
        }
    }

    pub async fn bind_webhook(&self, identity: &Identity, url: &str) -> Result<Binding, BindError> {
        self.registry.set_webhook_destination(identity, url).await
    }

    /// Webhook bind with reply text; failures list the accepted hosts.
    pub async fn handle_bind_webhook(&self, identity: &Identity, url: &str) -> String {
        match self.bind_webhook(identity, url).await {
            Ok(_) => "Binding complete: your assets now go to the Feishu webhook".to_owned(),
            Err(e @ BindError::Store(_)) => format!("Bind failed: {e}"),
            Err(e) => {
                let policy = self.registry.webhook_policy();
                let hosts = if policy.is_unrestricted() {
                    "any".to_owned()
                } else {
                    policy.allowed_hosts().join(", ")
                };
                format!("Bind failed: {e}\nAllowed hosts: {hosts}\nExample: {WEBHOOK_EXAMPLE}")
            }
        }
    }

    /// Start delivering a whole pack to `owner`'s destination.
    pub async fn start_pack(
        &self,
        owner: &Identity,
        mode: PackMode,
        items: Vec<AssetRef>,
        sink: Arc<dyn ProgressSink>,
    ) -> Result<TaskHandle, RelayError> {
        let destination = self.resolver.resolve(owner).await.ok_or(RelayError::Unbound)?;
        Ok(self.delivery.start_task(owner.clone(), destination, mode, items, sink).await?)
    }
}

#[cfg(test)]
#[path = "relay_tests.rs"]
mod tests;
