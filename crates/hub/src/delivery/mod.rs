// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Batched pack delivery.
//!
//! A delivery task sends an ordered list of assets to one destination in
//! batches of [`BATCH_SIZE`]. Items inside a batch run concurrently; batches
//! run strictly in order. A stop request is honoured at the next batch
//! boundary, never mid-batch.
//!
//! The [`PackMode`] decides what happens to converted items: sent one by
//! one, sent as one image group per batch, or packed into a single ZIP
//! archive delivered when the task completes.

pub mod archive;
pub mod manager;

use std::fmt;
use std::time::Duration;

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::binding::Destination;
use crate::convert::ConversionError;
use crate::error::HubError;
use crate::model::Identity;

pub use manager::{DeliveryManager, Pipeline, TaskHandle};

pub const BATCH_SIZE: usize = 10;

/// How converted pack items reach the destination.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackMode {
    /// One message per item, with a separator after each batch.
    #[default]
    Individual,
    /// One image group per batch.
    ImageGroup,
    /// Every converted item in one archive, sent once the last batch is done.
    Zip,
}

impl PackMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Individual => "individual",
            Self::ImageGroup => "image_group",
            Self::Zip => "zip",
        }
    }
}

impl fmt::Display for PackMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a delivery task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    StopRequested,
    Completed,
    Cancelled,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::StopRequested => "stop_requested",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }

    /// Whether `self -> next` is a legal transition.
    ///
    /// Terminal states are absorbing. `Completed` is never reached once a
    /// stop has been requested.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, StopRequested)
                | (Pending, Cancelled)
                | (Pending, Failed)
                | (Running, StopRequested)
                | (Running, Completed)
                | (Running, Cancelled)
                | (Running, Failed)
                | (StopRequested, Cancelled)
                | (StopRequested, Failed)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counters reported after every batch.
///
/// In [`PackMode::Zip`] `sent` counts items packed into the archive so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub sent: usize,
    pub failed: usize,
    pub total: usize,
}

/// Final outcome handed to the sink once a task is terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskReport {
    pub task_id: String,
    pub status: TaskStatus,
    pub sent: usize,
    pub failed: usize,
    pub total: usize,
    /// Systemic failure reason when `status` is `Failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Point-in-time view of a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub id: String,
    pub owner: Identity,
    pub mode: String,
    pub destination: String,
    pub pack_mode: PackMode,
    pub status: TaskStatus,
    pub sent: usize,
    pub failed: usize,
    pub total: usize,
    pub created_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<u64>,
}

/// Receives progress for one task. Failures are logged and never abort it.
pub trait ProgressSink: Send + Sync {
    fn progress<'a>(&'a self, task_id: &'a str, progress: Progress)
        -> BoxFuture<'a, anyhow::Result<()>>;

    fn finished<'a>(&'a self, report: &'a TaskReport) -> BoxFuture<'a, anyhow::Result<()>>;
}

/// Sink that only writes progress to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl ProgressSink for LogSink {
    fn progress<'a>(
        &'a self,
        task_id: &'a str,
        progress: Progress,
    ) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            tracing::info!(
                task_id,
                sent = progress.sent,
                failed = progress.failed,
                total = progress.total,
                "pack progress"
            );
            Ok(())
        })
    }

    fn finished<'a>(&'a self, report: &'a TaskReport) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            tracing::info!(
                task_id = %report.task_id,
                status = %report.status,
                sent = report.sent,
                failed = report.failed,
                total = report.total,
                "pack finished"
            );
            Ok(())
        })
    }
}

/// Task lifecycle errors returned to callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    EmptyPack,
    TaskNotFound,
    TaskAlreadyRunning { task_id: String },
}

impl TaskError {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EmptyPack => "EMPTY_PACK",
            Self::TaskNotFound => "TASK_NOT_FOUND",
            Self::TaskAlreadyRunning { .. } => "TASK_ALREADY_RUNNING",
        }
    }

    pub fn hub_error(&self) -> HubError {
        match self {
            Self::EmptyPack => HubError::BadRequest,
            Self::TaskNotFound => HubError::NotFound,
            Self::TaskAlreadyRunning { .. } => HubError::Conflict,
        }
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyPack => f.write_str("the pack has no items"),
            Self::TaskNotFound => f.write_str("no such delivery task"),
            Self::TaskAlreadyRunning { task_id } => {
                write!(f, "a pack delivery is already running ({task_id})")
            }
        }
    }
}

impl std::error::Error for TaskError {}

/// Why a single item was not delivered. Tallied as `failed`, never fatal.
#[derive(Debug)]
pub enum ItemError {
    Fetch(anyhow::Error),
    Convert(ConversionError),
    Deliver(anyhow::Error),
    Timeout(Duration),
    Aborted(String),
}

impl fmt::Display for ItemError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fetch(e) => write!(f, "fetch failed: {e:#}"),
            Self::Convert(e) => write!(f, "conversion failed: {e}"),
            Self::Deliver(e) => write!(f, "delivery failed: {e:#}"),
            Self::Timeout(after) => write!(f, "timed out after {after:?}"),
            Self::Aborted(reason) => write!(f, "item task aborted: {reason}"),
        }
    }
}

impl std::error::Error for ItemError {}

/// Text sent to the destination after each batch.
pub fn batch_separator(batch: usize, batches: usize, first: usize, last: usize) -> String {
    format!("-- batch {batch}/{batches} (items {first}-{last}) --")
}

/// `Destination` rendering for snapshots: mode plus a log-safe target.
pub(crate) fn describe(destination: &Destination) -> (String, String) {
    (destination.mode().to_owned(), destination.masked())
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
