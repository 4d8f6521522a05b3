// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Webhook destination validation (SSRF guard) and log masking.

use reqwest::Url;

use crate::binding::BindError;

/// Characters of the URL path kept on each side when masking.
const PATH_PREFIX_LEN: usize = 20;
const PATH_SUFFIX_LEN: usize = 8;

/// Every custom-bot webhook lives under this path.
pub const HOOK_PATH: &str = "/open-apis/bot/v2/hook/";

/// Default first-party webhook hosts.
pub const DEFAULT_ALLOWED_HOSTS: &[&str] = &["open.feishu.cn", "open.larksuite.com"];

/// Host allow-list applied to every webhook bind.
///
/// An empty list disables the host check entirely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookPolicy {
    allowed_hosts: Vec<String>,
}

impl Default for WebhookPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_ALLOWED_HOSTS.iter().map(|h| (*h).to_owned()))
    }
}

impl WebhookPolicy {
    pub fn new(hosts: impl IntoIterator<Item = String>) -> Self {
        let allowed_hosts = hosts
            .into_iter()
            .map(|h| h.trim().to_lowercase())
            .filter(|h| !h.is_empty())
            .collect();
        Self { allowed_hosts }
    }

    /// Parse a comma-separated host list. An empty string yields an empty
    /// (unrestricted) policy.
    pub fn from_csv(csv: &str) -> Self {
        Self::new(csv.split(',').map(str::to_owned))
    }

    pub fn allowed_hosts(&self) -> &[String] {
        &self.allowed_hosts
    }

    pub fn is_unrestricted(&self) -> bool {
        self.allowed_hosts.is_empty()
    }

    /// Validate a user-supplied webhook URL and return its normalized form.
    ///
    /// The authority must be a bare host: no port and no credentials.
    pub fn validate(&self, raw: &str) -> Result<String, BindError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(BindError::InvalidWebhookUrl("empty url".to_owned()));
        }
        let url =
            Url::parse(trimmed).map_err(|e| BindError::InvalidWebhookUrl(e.to_string()))?;
        let host = url
            .host_str()
            .map(str::to_lowercase)
            .ok_or_else(|| BindError::InvalidWebhookUrl("missing host".to_owned()))?;

        if !self.is_unrestricted() && !self.allowed_hosts.iter().any(|h| *h == host) {
            return Err(BindError::WebhookHostNotAllowed {
                host,
                allowed: self.allowed_hosts.clone(),
            });
        }
        if url.scheme() != "https" {
            return Err(BindError::InvalidWebhookUrl(format!(
                "scheme must be https, got {}",
                url.scheme()
            )));
        }
        if let Some(port) = url.port() {
            return Err(BindError::InvalidWebhookUrl(format!("explicit port {port} not allowed")));
        }
        if !url.username().is_empty() || url.password().is_some() {
            return Err(BindError::InvalidWebhookUrl("credentials not allowed".to_owned()));
        }
        if !url.path().contains(HOOK_PATH) {
            return Err(BindError::InvalidWebhookUrl(format!("path must contain {HOOK_PATH}")));
        }
        Ok(trimmed.to_owned())
    }
}

/// Mask a URL for logging: keep scheme, host, and the ends of the path.
pub fn mask_url(raw: &str) -> String {
    let Ok(url) = Url::parse(raw) else {
        return "[url_masked]".to_owned();
    };
    let host = match url.port() {
        Some(port) => format!("{}:{port}", url.host_str().unwrap_or_default()),
        None => url.host_str().unwrap_or_default().to_owned(),
    };
    let path = url.path();
    let chars: Vec<char> = path.chars().collect();
    let masked = if chars.len() > PATH_PREFIX_LEN + PATH_SUFFIX_LEN {
        let head: String = chars[..PATH_PREFIX_LEN].iter().collect();
        let tail: String = chars[chars.len() - PATH_SUFFIX_LEN..].iter().collect();
        format!("{head}...{tail}")
    } else {
        path.to_owned()
    };
    format!("{}://{host}{masked}", url.scheme())
}

#[cfg(test)]
#[path = "webhook_tests.rs"]
mod tests;
