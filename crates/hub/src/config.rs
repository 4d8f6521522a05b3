// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::binding::webhook::{WebhookPolicy, DEFAULT_ALLOWED_HOSTS};
use crate::gateway::feishu::DEFAULT_BASE_URL;

/// Allow-list value that disables the webhook host check.
pub const ANY_WEBHOOK_HOST: &str = "*";

/// Cross-platform sticker relay hub.
#[derive(Debug, Clone, Parser)]
#[command(name = "stickerhub", version, about)]
pub struct HubConfig {
    /// Host to bind on.
    #[arg(long, default_value = "127.0.0.1", env = "STICKERHUB_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 9810, env = "STICKERHUB_PORT")]
    pub port: u16,

    /// Bearer token for API auth. If unset, auth is disabled.
    #[arg(long, env = "STICKERHUB_AUTH_TOKEN")]
    pub auth_token: Option<String>,

    /// Directory holding the bindings file.
    #[arg(long, env = "STICKERHUB_STATE_DIR")]
    pub state_dir: Option<PathBuf>,

    /// Lifetime of a `/bind` magic token, in seconds.
    #[arg(long, default_value_t = 600, env = "STICKERHUB_BIND_MAGIC_TTL_SECS")]
    pub bind_magic_ttl_secs: u64,

    /// Comma-separated webhook host allow-list. An empty list or `*` accepts
    /// any host.
    #[arg(
        long,
        default_value = "open.feishu.cn,open.larksuite.com",
        env = "STICKERHUB_WEBHOOK_ALLOWED_HOSTS"
    )]
    pub webhook_allowed_hosts: String,

    /// Feishu app id; bot delivery is disabled without it.
    #[arg(long, env = "STICKERHUB_FEISHU_APP_ID")]
    pub feishu_app_id: Option<String>,

    #[arg(long, env = "STICKERHUB_FEISHU_APP_SECRET", hide_env_values = true)]
    pub feishu_app_secret: Option<String>,

    /// Feishu open API base URL.
    #[arg(long, default_value = DEFAULT_BASE_URL, env = "STICKERHUB_FEISHU_BASE_URL")]
    pub feishu_base_url: String,

    #[arg(long, default_value = "ffmpeg", env = "STICKERHUB_FFMPEG")]
    pub ffmpeg: PathBuf,

    #[arg(long, default_value = "lottie_convert.py", env = "STICKERHUB_LOTTIE_CONVERT")]
    pub lottie_convert: PathBuf,

    /// Per-item delivery deadline in seconds (0 disables).
    #[arg(long, default_value_t = 120, env = "STICKERHUB_ITEM_TIMEOUT_SECS")]
    pub item_timeout_secs: u64,

    /// How long an unpolled finished task stays queryable, in seconds.
    #[arg(long, default_value_t = 3600, env = "STICKERHUB_TASK_RETENTION_SECS")]
    pub task_retention_secs: u64,

    /// Interval between token purges and task reaping, in seconds.
    #[arg(long, default_value_t = 300, env = "STICKERHUB_JANITOR_INTERVAL_SECS")]
    pub janitor_interval_secs: u64,

    /// Log format (json or text).
    #[arg(long, env = "STICKERHUB_LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "STICKERHUB_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl HubConfig {
    /// Validate the configuration after parsing.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.bind_magic_ttl_secs == 0 {
            anyhow::bail!("--bind-magic-ttl-secs must be positive");
        }
        if self.janitor_interval_secs == 0 {
            anyhow::bail!("--janitor-interval-secs must be positive");
        }
        if self.feishu_app_id.is_some() != self.feishu_app_secret.is_some() {
            anyhow::bail!("--feishu-app-id and --feishu-app-secret must be set together");
        }
        Ok(())
    }

    pub fn webhook_policy(&self) -> WebhookPolicy {
        if self.webhook_allowed_hosts.trim() == ANY_WEBHOOK_HOST {
            return WebhookPolicy::new(Vec::new());
        }
        WebhookPolicy::from_csv(&self.webhook_allowed_hosts)
    }

    /// App credentials when both halves are configured.
    pub fn feishu_credentials(&self) -> Option<(String, String)> {
        match (&self.feishu_app_id, &self.feishu_app_secret) {
            (Some(id), Some(secret)) => Some((id.clone(), secret.clone())),
            _ => None,
        }
    }

    pub fn item_timeout(&self) -> Option<Duration> {
        (self.item_timeout_secs > 0).then(|| Duration::from_secs(self.item_timeout_secs))
    }

    pub fn janitor_interval(&self) -> Duration {
        Duration::from_secs(self.janitor_interval_secs)
    }

    /// State directory: flag or env, then `$XDG_STATE_HOME`, then `~/.local/state`.
    pub fn state_dir(&self) -> PathBuf {
        if let Some(dir) = &self.state_dir {
            return dir.clone();
        }
        if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
            return PathBuf::from(xdg).join("stickerhub");
        }
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(".local/state/stickerhub");
        }
        PathBuf::from(".stickerhub")
    }

    pub fn bindings_path(&self) -> PathBuf {
        self.state_dir().join("bindings.json")
    }

    /// Build a minimal `HubConfig` for tests (port 0, no Feishu app).
    #[doc(hidden)]
    pub fn test() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            auth_token: None,
            state_dir: None,
            bind_magic_ttl_secs: 600,
            webhook_allowed_hosts: DEFAULT_ALLOWED_HOSTS.join(","),
            feishu_app_id: None,
            feishu_app_secret: None,
            feishu_base_url: DEFAULT_BASE_URL.into(),
            ffmpeg: "ffmpeg".into(),
            lottie_convert: "lottie_convert.py".into(),
            item_timeout_secs: 120,
            task_retention_secs: 3600,
            janitor_interval_secs: 300,
            log_format: "text".into(),
            log_level: "debug".into(),
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
