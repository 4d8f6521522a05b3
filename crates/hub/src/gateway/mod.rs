// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Platform gateways: send primitives for each destination kind, and the
//! asset source that fetches pack items.
//!
//! Traits are object-safe and return boxed futures so gateways can be held
//! as `Arc<dyn PlatformGateway>` and swapped for fakes in tests.

pub mod feishu;
pub mod source;
pub mod webhook;

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::BoxFuture;

use crate::binding::Destination;
use crate::model::{Asset, AssetRef, Platform};

/// Send primitives for one kind of destination.
pub trait PlatformGateway: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    fn send_asset<'a>(
        &'a self,
        destination: &'a Destination,
        asset: &'a Asset,
    ) -> BoxFuture<'a, anyhow::Result<()>>;

    fn send_text<'a>(
        &'a self,
        destination: &'a Destination,
        text: &'a str,
    ) -> BoxFuture<'a, anyhow::Result<()>>;

    /// Send `assets` as one grouped message. All or nothing: on error no
    /// part of the group was delivered.
    fn send_group<'a>(
        &'a self,
        _destination: &'a Destination,
        _assets: &'a [Asset],
    ) -> BoxFuture<'a, anyhow::Result<()>> {
        let err = anyhow::anyhow!("{} gateway cannot send image groups", self.name());
        Box::pin(async move { Err(err) })
    }

    /// Send a file attachment such as a pack archive.
    fn send_file<'a>(
        &'a self,
        _destination: &'a Destination,
        _file_name: &'a str,
        _content: &'a [u8],
    ) -> BoxFuture<'a, anyhow::Result<()>> {
        let err = anyhow::anyhow!("{} gateway cannot send files", self.name());
        Box::pin(async move { Err(err) })
    }
}

/// Fetches the raw bytes behind an [`AssetRef`].
pub trait AssetSource: Send + Sync {
    fn fetch<'a>(&'a self, item: &'a AssetRef) -> BoxFuture<'a, anyhow::Result<Asset>>;
}

/// Picks the gateway that can serve a destination.
#[derive(Clone, Default)]
pub struct GatewayRouter {
    platforms: HashMap<Platform, Arc<dyn PlatformGateway>>,
    webhook: Option<Arc<dyn PlatformGateway>>,
}

impl GatewayRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_platform(mut self, platform: Platform, gateway: Arc<dyn PlatformGateway>) -> Self {
        self.platforms.insert(platform, gateway);
        self
    }

    pub fn with_webhook(mut self, gateway: Arc<dyn PlatformGateway>) -> Self {
        self.webhook = Some(gateway);
        self
    }

    /// Gateway for `destination`, or an error when none is configured.
    pub fn route(&self, destination: &Destination) -> anyhow::Result<Arc<dyn PlatformGateway>> {
        match destination {
            Destination::Identity(identity) => self
                .platforms
                .get(&identity.platform)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("no gateway for platform {}", identity.platform)),
            Destination::Webhook { .. } => {
                self.webhook.clone().ok_or_else(|| anyhow::anyhow!("webhook delivery disabled"))
            }
        }
    }
}
