// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Asset source that downloads pack items over HTTP.

use std::time::Duration;

use futures_util::future::BoxFuture;
use reqwest::Client;

use crate::gateway::AssetSource;
use crate::model::{Asset, AssetRef};

/// Fetches `AssetRef::url` with a plain GET.
pub struct HttpAssetSource {
    http: Client,
}

impl Default for HttpAssetSource {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpAssetSource {
    pub fn new() -> Self {
        let http = Client::builder().timeout(Duration::from_secs(30)).build().unwrap_or_default();
        Self { http }
    }
}

impl AssetSource for HttpAssetSource {
    fn fetch<'a>(&'a self, item: &'a AssetRef) -> BoxFuture<'a, anyhow::Result<Asset>> {
        Box::pin(async move {
            let resp = self.http.get(&item.url).send().await?.error_for_status()?;
            let content = resp.bytes().await?.to_vec();
            if content.is_empty() {
                anyhow::bail!("asset {} is empty", item.id);
            }
            Ok(Asset {
                kind: item.kind,
                mime_type: item.mime_type.clone(),
                file_name: item.file_name.clone(),
                animated: item.animated,
                content,
            })
        })
    }
}

#[cfg(test)]
#[path = "source_tests.rs"]
mod tests;
