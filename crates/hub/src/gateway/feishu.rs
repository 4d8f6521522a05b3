// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Feishu/Lark bot gateway: tenant token, image and file upload, and
//! messages to an `open_id`.

use std::time::Duration;

use futures_util::future::BoxFuture;
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::RwLock;

use crate::binding::Destination;
use crate::clock::epoch_secs;
use crate::gateway::PlatformGateway;
use crate::model::{Asset, Platform};

pub const DEFAULT_BASE_URL: &str = "https://open.feishu.cn/open-apis";

/// Refresh the tenant token this long before Feishu says it expires.
const TOKEN_REFRESH_MARGIN_SECS: u64 = 300;

#[derive(Debug, Deserialize)]
struct TenantTokenResponse {
    code: i64,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    tenant_access_token: Option<String>,
    #[serde(default)]
    expire: u64,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    code: i64,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    data: Option<serde_json::Value>,
}

impl ApiResponse {
    fn ensure_ok(self, what: &str) -> anyhow::Result<Self> {
        if self.code != 0 {
            anyhow::bail!("{what} failed: code={} msg={}", self.code, self.msg);
        }
        Ok(self)
    }
}

struct CachedToken {
    token: String,
    expires_at: u64,
}

/// Feishu bot API client.
pub struct FeishuGateway {
    app_id: String,
    app_secret: String,
    base_url: String,
    http: Client,
    token: RwLock<Option<CachedToken>>,
}

impl FeishuGateway {
    pub fn with_base_url(app_id: String, app_secret: String, base_url: String) -> Self {
        let http = Client::builder().timeout(Duration::from_secs(30)).build().unwrap_or_default();
        Self {
            app_id,
            app_secret,
            base_url: base_url.trim_end_matches('/').to_owned(),
            http,
            token: RwLock::new(None),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Tenant access token, fetched on demand and cached until near expiry.
    async fn tenant_token(&self) -> anyhow::Result<String> {
        let now = epoch_secs();
        if let Some(cached) = self.token.read().await.as_ref() {
            if cached.expires_at > now {
                return Ok(cached.token.clone());
            }
        }

        let resp = self
            .http
            .post(self.url("/auth/v3/tenant_access_token/internal"))
            .json(&serde_json::json!({ "app_id": self.app_id, "app_secret": self.app_secret }))
            .send()
            .await?
            .error_for_status()?;
        let body: TenantTokenResponse = resp.json().await?;
        if body.code != 0 {
            anyhow::bail!("tenant_access_token failed: code={} msg={}", body.code, body.msg);
        }
        let token = body
            .tenant_access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| anyhow::anyhow!("tenant_access_token is empty"))?;

        let expires_at = now + body.expire.saturating_sub(TOKEN_REFRESH_MARGIN_SECS);
        *self.token.write().await = Some(CachedToken { token: token.clone(), expires_at });
        tracing::debug!("feishu tenant token refreshed");
        Ok(token)
    }

    /// Upload an image and return its `image_key`.
    pub async fn upload_image(&self, asset: &Asset) -> anyhow::Result<String> {
        let token = self.tenant_token().await?;
        let part = reqwest::multipart::Part::bytes(asset.content.clone())
            .file_name(asset.file_name.clone())
            .mime_str(&asset.mime_type)?;
        let form =
            reqwest::multipart::Form::new().text("image_type", "message").part("image", part);

        let resp = self
            .http
            .post(self.url("/im/v1/images"))
            .bearer_auth(&token)
            .multipart(form)
            .send()
            .await?
            .error_for_status()?;
        let body: ApiResponse = resp.json::<ApiResponse>().await?.ensure_ok("image upload")?;
        let image_key = body
            .data
            .as_ref()
            .and_then(|d| d.get("image_key"))
            .and_then(|v| v.as_str())
            .filter(|k| !k.is_empty())
            .ok_or_else(|| anyhow::anyhow!("image upload returned no image_key"))?;
        tracing::debug!(image_key, file = %asset.file_name, "feishu image uploaded");
        Ok(image_key.to_owned())
    }

    /// Upload a file attachment and return its `file_key`.
    pub async fn upload_file(&self, file_name: &str, content: &[u8]) -> anyhow::Result<String> {
        let token = self.tenant_token().await?;
        let part =
            reqwest::multipart::Part::bytes(content.to_vec()).file_name(file_name.to_owned());
        let form = reqwest::multipart::Form::new()
            .text("file_type", "stream")
            .text("file_name", file_name.to_owned())
            .part("file", part);

        let resp = self
            .http
            .post(self.url("/im/v1/files"))
            .bearer_auth(&token)
            .multipart(form)
            .send()
            .await?
            .error_for_status()?;
        let body: ApiResponse = resp.json::<ApiResponse>().await?.ensure_ok("file upload")?;
        let file_key = body
            .data
            .as_ref()
            .and_then(|d| d.get("file_key"))
            .and_then(|v| v.as_str())
            .filter(|k| !k.is_empty())
            .ok_or_else(|| anyhow::anyhow!("file upload returned no file_key"))?;
        tracing::debug!(file_key, file = %file_name, size = content.len(), "feishu file uploaded");
        Ok(file_key.to_owned())
    }

    async fn send_message(
        &self,
        open_id: &str,
        msg_type: &str,
        content: serde_json::Value,
    ) -> anyhow::Result<()> {
        let token = self.tenant_token().await?;
        let resp = self
            .http
            .post(self.url("/im/v1/messages?receive_id_type=open_id"))
            .bearer_auth(&token)
            .json(&serde_json::json!({
                "receive_id": open_id,
                "msg_type": msg_type,
                "content": content.to_string(),
            }))
            .send()
            .await?
            .error_for_status()?;
        resp.json::<ApiResponse>().await?.ensure_ok("send message")?;
        Ok(())
    }
}

/// Extract the Feishu `open_id` from a destination.
fn open_id(destination: &Destination) -> anyhow::Result<&str> {
    match destination {
        Destination::Identity(identity) if identity.platform == Platform::Feishu => {
            Ok(&identity.user_id)
        }
        other => anyhow::bail!("feishu gateway cannot deliver to {}", other.masked()),
    }
}

impl PlatformGateway for FeishuGateway {
    fn name(&self) -> &'static str {
        "feishu"
    }

    fn send_asset<'a>(
        &'a self,
        destination: &'a Destination,
        asset: &'a Asset,
    ) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            let open_id = open_id(destination)?;
            let image_key = self.upload_image(asset).await?;
            self.send_message(open_id, "image", serde_json::json!({ "image_key": image_key }))
                .await?;
            tracing::info!(receive_id = %open_id, file = %asset.file_name, "asset sent to feishu");
            Ok(())
        })
    }

    fn send_text<'a>(
        &'a self,
        destination: &'a Destination,
        text: &'a str,
    ) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            let open_id = open_id(destination)?;
            self.send_message(open_id, "text", serde_json::json!({ "text": text })).await
        })
    }

    /// One rich-text `post` with an image per line. Every image is uploaded
    /// before the message goes out.
    fn send_group<'a>(
        &'a self,
        destination: &'a Destination,
        assets: &'a [Asset],
    ) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            let open_id = open_id(destination)?;
            let mut lines = Vec::with_capacity(assets.len());
            for asset in assets {
                let image_key = self.upload_image(asset).await?;
                lines.push(serde_json::json!([{ "tag": "img", "image_key": image_key }]));
            }
            let post = serde_json::json!({ "zh_cn": { "title": "", "content": lines } });
            self.send_message(open_id, "post", post).await?;
            tracing::info!(receive_id = %open_id, count = assets.len(), "image group sent to feishu");
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
            let open_id = open_id(destination)?;
            let file_key = self.upload_file(file_name, content).await?;
            self.send_message(open_id, "file", serde_json::json!({ "file_key": file_key }))
                .await?;
            tracing::info!(receive_id = %open_id, file = %file_name, "file sent to feishu");
            Ok(())
        })
    }
}

#[cfg(test)]
#[path = "feishu_tests.rs"]
mod tests;
