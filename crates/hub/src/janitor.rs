// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Background cleanup of expired bind tokens and unpolled finished tasks.

use std::sync::Arc;
use std::time::Duration;

use crate::state::HubState;

/// Counts from one janitor pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Sweep {
    pub tokens_purged: usize,
    pub tasks_reaped: usize,
}

/// Run one cleanup pass. A store failure is logged and the pass continues.
pub async fn sweep(state: &HubState, task_retention_secs: u64) -> Sweep {
    let tokens_purged = match state.registry.purge_expired().await {
        Ok(n) => n,
        Err(e) => {
            tracing::warn!(err = %e, "token purge failed");
            0
        }
    };
    let tasks_reaped = state.delivery.reap_finished(task_retention_secs).await;
    Sweep { tokens_purged, tasks_reaped }
}

/// Spawn the periodic janitor; it exits when `state.shutdown` fires.
pub fn spawn_janitor(state: Arc<HubState>, interval: Duration, task_retention_secs: u64) {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick fires immediately; skip it.
        timer.tick().await;

        loop {
            tokio::select! {
                _ = state.shutdown.cancelled() => break,
                _ = timer.tick() => {}
            }

            let swept = sweep(&state, task_retention_secs).await;
            if swept != Sweep::default() {
                tracing::info!(
                    tokens_purged = swept.tokens_purged,
                    tasks_reaped = swept.tasks_reaped,
                    "janitor pass"
                );
            }
        }
        tracing::debug!("janitor stopped");
    });
}

#[cfg(test)]
#[path = "janitor_tests.rs"]
mod tests;
