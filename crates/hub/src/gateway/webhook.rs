// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Custom-bot webhook gateway.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use reqwest::Client;

use crate::binding::webhook::mask_url;
use crate::binding::Destination;
use crate::gateway::feishu::FeishuGateway;
use crate::gateway::PlatformGateway;
use crate::model::Asset;

/// Posts messages to a Feishu custom-bot webhook URL.
///
/// Webhooks cannot upload images themselves; image delivery borrows the bot
/// gateway's upload endpoint and is unavailable without app credentials.
pub struct WebhookGateway {
    http: Client,
    uploader: Option<Arc<FeishuGateway>>,
}

impl WebhookGateway {
    pub fn new(uploader: Option<Arc<FeishuGateway>>) -> Self {
        let http = Client::builder().timeout(Duration::from_secs(30)).build().unwrap_or_default();
        Self { http, uploader }
    }

    async fn post(&self, url: &str, body: serde_json::Value) -> anyhow::Result<()> {
        let resp = self.http.post(url).json(&body).send().await?;
        let status = resp.status();
        let payload: serde_json::Value = resp.json().await.unwrap_or_default();
        // Feishu answers either `code` or the legacy `StatusCode`.
        let code = payload
            .get("code")
            .or_else(|| payload.get("StatusCode"))
            .and_then(|v| v.as_i64())
            .unwrap_or(-1);
        if !status.is_success() || code != 0 {
            anyhow::bail!("webhook {} rejected message ({status}): {payload}", mask_url(url));
        }
        Ok(())
    }
}

fn webhook_url(destination: &Destination) -> anyhow::Result<&str> {
    match destination {
        Destination::Webhook { url } => Ok(url),
        other => anyhow::bail!("webhook gateway cannot deliver to {}", other.masked()),
    }
}

impl PlatformGateway for WebhookGateway {
    fn name(&self) -> &'static str {
        "webhook"
    }

    fn send_asset<'a>(
        &'a self,
        destination: &'a Destination,
        asset: &'a Asset,
    ) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            let url = webhook_url(destination)?;
            let Some(uploader) = self.uploader.as_ref() else {
                anyhow::bail!("image delivery via webhook needs app credentials");
            };
            let image_key = uploader.upload_image(asset).await?;
            self.post(
                url,
                serde_json::json!({ "msg_type": "image", "content": { "image_key": image_key } }),
            )
            .await?;
            tracing::info!(webhook = %mask_url(url), file = %asset.file_name, "asset sent to webhook");
            Ok(())
        })
    }

    fn send_text<'a>(
        &'a self,
        destination: &'a Destination,
        text: &'a str,
    ) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            let url = webhook_url(destination)?;
            self.post(url, serde_json::json!({ "msg_type": "text", "content": { "text": text } }))
                .await
        })
    }
}

#[cfg(test)]
#[path = "webhook_tests.rs"]
mod tests;
