// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Binding persistence: snapshot load/save behind an injected store.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::binding::{BindingRecord, MagicToken};

/// Persisted registry state.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingSnapshot {
    #[serde(default)]
    pub bindings: Vec<BindingRecord>,
    #[serde(default)]
    pub tokens: Vec<MagicToken>,
}

/// Record store backing the binding registry.
///
/// The registry serializes all writers, so implementations only need to make
/// each `save` atomic with respect to readers.
pub trait BindingStore: Send + Sync {
    fn load(&self) -> anyhow::Result<BindingSnapshot>;
    fn save(&self, snapshot: &BindingSnapshot) -> anyhow::Result<()>;
}

/// Volatile store for tests and ephemeral runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    snapshot: Mutex<BindingSnapshot>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BindingStore for MemoryStore {
    fn load(&self) -> anyhow::Result<BindingSnapshot> {
        let guard = self.snapshot.lock().map_err(|_| anyhow::anyhow!("memory store poisoned"))?;
        Ok(guard.clone())
    }

    fn save(&self, snapshot: &BindingSnapshot) -> anyhow::Result<()> {
        let mut guard =
            self.snapshot.lock().map_err(|_| anyhow::anyhow!("memory store poisoned"))?;
        *guard = snapshot.clone();
        Ok(())
    }
}

/// JSON file store with atomic writes (write tmp + rename).
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl BindingStore for JsonFileStore {
    fn load(&self) -> anyhow::Result<BindingSnapshot> {
        if !self.path.exists() {
            return Ok(BindingSnapshot::default());
        }
        let contents = std::fs::read_to_string(&self.path)?;
        let snapshot: BindingSnapshot = serde_json::from_str(&contents)?;
        Ok(snapshot)
    }

    /// Uses a unique temp filename (PID + counter) so concurrent saves never
    /// share a partially written `.tmp` file.
    fn save(&self, snapshot: &BindingSnapshot) -> anyhow::Result<()> {
        use std::sync::atomic::{AtomicU32, Ordering};
        static COUNTER: AtomicU32 = AtomicU32::new(0);

        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() && !dir.exists() {
                std::fs::create_dir_all(dir)?;
            }
        }
        let json = serde_json::to_string_pretty(snapshot)?;
        let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
        let tmp_name = format!(
            "{}.{}.{}.tmp",
            self.path.file_name().unwrap_or_default().to_string_lossy(),
            std::process::id(),
            seq,
        );
        let tmp_path = self.path.with_file_name(tmp_name);
        std::fs::write(&tmp_path, json)?;
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
