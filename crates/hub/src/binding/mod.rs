// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cross-platform identity binding.
//!
//! An identity on one platform issues a short-lived magic token; an identity
//! on another platform consumes it, linking the two so that assets sent by
//! either side route to the other. An identity may instead bind a webhook
//! destination. Each identity has at most one destination at a time and the
//! most recent successful bind wins.

pub mod registry;
pub mod store;
pub mod webhook;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::HubError;
use crate::model::Identity;

/// Pending cross-platform link proof.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MagicToken {
    pub code: String,
    pub owner: Identity,
    /// Epoch seconds.
    pub created_at: u64,
    /// Epoch seconds; the token is unusable from this instant on.
    pub expires_at: u64,
    #[serde(default)]
    pub consumed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consumed_at: Option<u64>,
}

impl MagicToken {
    pub fn is_expired(&self, now: u64) -> bool {
        now >= self.expires_at
    }

    /// Usable for reuse by its owner: not consumed and not expired.
    pub fn is_live(&self, now: u64) -> bool {
        !self.consumed && !self.is_expired(now)
    }

    pub fn ttl_secs(&self) -> u64 {
        self.expires_at.saturating_sub(self.created_at)
    }
}

/// Where assets from an identity are delivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Destination {
    /// Deliver to a bound identity through its platform's bot.
    Identity(Identity),
    /// Deliver to a custom-bot webhook.
    Webhook { url: String },
}

impl Destination {
    pub fn mode(&self) -> &'static str {
        match self {
            Self::Identity(_) => "bot",
            Self::Webhook { .. } => "webhook",
        }
    }

    /// Log-safe rendering (webhook URLs carry secrets in their path).
    pub fn masked(&self) -> String {
        match self {
            Self::Identity(identity) => identity.to_string(),
            Self::Webhook { url } => webhook::mask_url(url),
        }
    }
}

/// Persisted destination for one requesting identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingRecord {
    pub identity: Identity,
    pub destination: Destination,
    /// Epoch seconds.
    pub updated_at: u64,
}

/// Outcome of a successful bind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub requester: Identity,
    pub destination: Destination,
    /// Destination that was silently superseded, if any.
    pub previous: Option<Destination>,
}

/// Binding protocol failures. Always reported to the requesting user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindError {
    TokenNotFound,
    TokenExpired,
    TokenAlreadyConsumed,
    SelfBindRejected,
    WebhookHostNotAllowed { host: String, allowed: Vec<String> },
    InvalidWebhookUrl(String),
    Store(String),
}

impl BindError {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TokenNotFound => "TOKEN_NOT_FOUND",
            Self::TokenExpired => "TOKEN_EXPIRED",
            Self::TokenAlreadyConsumed => "TOKEN_ALREADY_CONSUMED",
            Self::SelfBindRejected => "SELF_BIND_REJECTED",
            Self::WebhookHostNotAllowed { .. } => "WEBHOOK_HOST_NOT_ALLOWED",
            Self::InvalidWebhookUrl(_) => "INVALID_WEBHOOK_URL",
            Self::Store(_) => "STORE_ERROR",
        }
    }

    pub fn hub_error(&self) -> HubError {
        match self {
            Self::TokenNotFound => HubError::NotFound,
            Self::TokenExpired | Self::TokenAlreadyConsumed => HubError::Conflict,
            Self::SelfBindRejected
            | Self::WebhookHostNotAllowed { .. }
            | Self::InvalidWebhookUrl(_) => HubError::BadRequest,
            Self::Store(_) => HubError::Internal,
        }
    }
}

impl fmt::Display for BindError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TokenNotFound => f.write_str("the bind code is invalid"),
            Self::TokenExpired => {
                f.write_str("the bind code has expired, send /bind again to get a new one")
            }
            Self::TokenAlreadyConsumed => f.write_str("the bind code has already been used"),
            Self::SelfBindRejected => {
                f.write_str("the bind code must be sent from a different account")
            }
            Self::WebhookHostNotAllowed { host, allowed } => {
                write!(f, "webhook host {host} is not allowed (allowed: {})", allowed.join(", "))
            }
            Self::InvalidWebhookUrl(reason) => write!(f, "invalid webhook url: {reason}"),
            Self::Store(e) => write!(f, "binding store error: {e}"),
        }
    }
}

impl std::error::Error for BindError {}
