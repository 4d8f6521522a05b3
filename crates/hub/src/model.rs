// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Platform-neutral identity and asset types.
//!
//! Gateways normalize platform-native payloads into these types before they
//! reach the binding registry or the delivery engine.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Chat platform an identity lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Telegram,
    Feishu,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Telegram => "telegram",
            Self::Feishu => "feishu",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "telegram" | "tg" => Ok(Self::Telegram),
            "feishu" | "lark" => Ok(Self::Feishu),
            other => anyhow::bail!("unknown platform: {other}"),
        }
    }
}

/// A sender or recipient on one chat platform.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub platform: Platform,
    pub user_id: String,
}

impl Identity {
    pub fn new(platform: Platform, user_id: impl Into<String>) -> Self {
        Self { platform, user_id: user_id.into() }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.platform, self.user_id)
    }
}

/// Closed set of asset kinds the core understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
    Sticker,
    Image,
    Gif,
    Video,
}

/// Reference to one item of a pack, fetched lazily by an [`AssetSource`].
///
/// [`AssetSource`]: crate::gateway::AssetSource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRef {
    pub id: String,
    pub kind: AssetKind,
    pub mime_type: String,
    pub file_name: String,
    #[serde(default)]
    pub animated: bool,
    pub url: String,
}

/// Raw or converted asset bytes with the metadata needed to route them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    pub kind: AssetKind,
    pub mime_type: String,
    pub file_name: String,
    pub animated: bool,
    pub content: Vec<u8>,
}

impl Asset {
    /// File name with its extension swapped for `ext`.
    pub fn renamed(&self, ext: &str) -> String {
        let stem = match self.file_name.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => stem,
            _ => self.file_name.as_str(),
        };
        format!("{stem}.{ext}")
    }
}
