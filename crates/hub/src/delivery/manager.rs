// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::binding::Destination;
use crate::clock::Clock;
use crate::convert::{target_format, MediaConverter};
use crate::delivery::archive::{archive_name, build_archive};
use crate::delivery::{
    batch_separator, describe, ItemError, PackMode, Progress, ProgressSink, TaskError, TaskReport,
    TaskSnapshot, TaskStatus, BATCH_SIZE,
};
use crate::gateway::{AssetSource, GatewayRouter, PlatformGateway};
use crate::model::{Asset, AssetRef, Identity};

/// Collaborators every item goes through: fetch, convert, send.
#[derive(Clone)]
pub struct Pipeline {
    pub source: Arc<dyn AssetSource>,
    pub converter: Arc<dyn MediaConverter>,
    pub router: GatewayRouter,
    /// Per-item deadline; `None` waits indefinitely.
    pub item_timeout: Option<Duration>,
}

/// Caller's reference to a started task.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    pub id: String,
    done: CancellationToken,
}

impl TaskHandle {
    /// Resolves once the task has reached a terminal status.
    pub async fn finished(&self) {
        self.done.cancelled().await;
    }
}

struct TaskState {
    status: TaskStatus,
    sent: usize,
    failed: usize,
    finished_at: Option<u64>,
}

struct TaskEntry {
    id: String,
    owner: Identity,
    destination: Destination,
    mode: PackMode,
    total: usize,
    created_at: u64,
    state: Mutex<TaskState>,
    stop: CancellationToken,
    done: CancellationToken,
}

impl TaskEntry {
    async fn snapshot(&self) -> TaskSnapshot {
        let state = self.state.lock().await;
        let (mode, destination) = describe(&self.destination);
        TaskSnapshot {
            id: self.id.clone(),
            owner: self.owner.clone(),
            mode,
            destination,
            pack_mode: self.mode,
            status: state.status,
            sent: state.sent,
            failed: state.failed,
            total: self.total,
            created_at: self.created_at,
            finished_at: state.finished_at,
        }
    }

    /// Apply a validated transition. Returns false (and logs) when illegal.
    fn transition(&self, state: &mut TaskState, next: TaskStatus) -> bool {
        if !state.status.can_transition_to(next) {
            tracing::warn!(task_id = %self.id, from = %state.status, to = %next, "illegal task transition");
            return false;
        }
        tracing::debug!(task_id = %self.id, from = %state.status, to = %next, "task transition");
        state.status = next;
        true
    }
}

/// Owns all in-flight delivery tasks.
pub struct DeliveryManager {
    tasks: RwLock<HashMap<String, Arc<TaskEntry>>>,
    pipeline: Arc<Pipeline>,
    clock: Arc<dyn Clock>,
    shutdown: CancellationToken,
}

impl DeliveryManager {
    pub fn new(pipeline: Pipeline, clock: Arc<dyn Clock>, shutdown: CancellationToken) -> Self {
        Self { tasks: RwLock::new(HashMap::new()), pipeline: Arc::new(pipeline), clock, shutdown }
    }

    /// Create a task for `items` and start running it in the background.
    pub async fn start_task(
        &self,
        owner: Identity,
        destination: Destination,
        mode: PackMode,
        items: Vec<AssetRef>,
        sink: Arc<dyn ProgressSink>,
    ) -> Result<TaskHandle, TaskError> {
        if items.is_empty() {
            return Err(TaskError::EmptyPack);
        }

        let mut tasks = self.tasks.write().await;
        for entry in tasks.values() {
            if entry.owner == owner && !entry.state.lock().await.status.is_terminal() {
                return Err(TaskError::TaskAlreadyRunning { task_id: entry.id.clone() });
            }
        }

        let entry = Arc::new(TaskEntry {
            id: uuid::Uuid::new_v4().to_string(),
            owner,
            destination,
            mode,
            total: items.len(),
            created_at: self.clock.now_secs(),
            state: Mutex::new(TaskState {
                status: TaskStatus::Pending,
                sent: 0,
                failed: 0,
                finished_at: None,
            }),
            // Shutdown stops every task at its next batch boundary.
            stop: self.shutdown.child_token(),
            done: CancellationToken::new(),
        });
        tasks.insert(entry.id.clone(), Arc::clone(&entry));
        drop(tasks);

        tracing::info!(
            task_id = %entry.id,
            owner = %entry.owner,
            destination = %entry.destination.masked(),
            mode = %entry.mode,
            total = entry.total,
            "pack delivery created"
        );

        let handle = TaskHandle { id: entry.id.clone(), done: entry.done.clone() };
        let runner = Runner {
            entry,
            items,
            pipeline: Arc::clone(&self.pipeline),
            clock: Arc::clone(&self.clock),
            sink,
        };
        tokio::spawn(runner.run());
        Ok(handle)
    }

    /// Ask a task to stop after its current batch. No effect once terminal.
    pub async fn request_stop(&self, task_id: &str) -> Result<TaskStatus, TaskError> {
        let entry = self.entry(task_id).await?;
        let mut state = entry.state.lock().await;
        if state.status.is_terminal() || state.status == TaskStatus::StopRequested {
            return Ok(state.status);
        }
        entry.transition(&mut state, TaskStatus::StopRequested);
        entry.stop.cancel();
        tracing::info!(task_id, sent = state.sent, failed = state.failed, "pack stop requested");
        Ok(state.status)
    }

    /// Current status. A terminal task is forgotten once observed here.
    pub async fn get_status(&self, task_id: &str) -> Result<TaskSnapshot, TaskError> {
        let entry = self.entry(task_id).await?;
        let snapshot = entry.snapshot().await;
        if snapshot.status.is_terminal() {
            self.tasks.write().await.remove(task_id);
            tracing::debug!(task_id, status = %snapshot.status, "terminal task removed");
        }
        Ok(snapshot)
    }

    /// Number of tasks that have not reached a terminal status.
    pub async fn active_count(&self) -> usize {
        let tasks = self.tasks.read().await;
        let mut count = 0;
        for entry in tasks.values() {
            if !entry.state.lock().await.status.is_terminal() {
                count += 1;
            }
        }
        count
    }

    /// Drop terminal tasks that finished more than `retention_secs` ago and
    /// were never polled.
    pub async fn reap_finished(&self, retention_secs: u64) -> usize {
        let now = self.clock.now_secs();
        let mut tasks = self.tasks.write().await;
        let mut stale = Vec::new();
        for (id, entry) in tasks.iter() {
            let state = entry.state.lock().await;
            if let Some(finished_at) = state.finished_at {
                if now.saturating_sub(finished_at) >= retention_secs {
                    stale.push(id.clone());
                }
            }
        }
        for id in &stale {
            tasks.remove(id);
        }
        if !stale.is_empty() {
            tracing::debug!(count = stale.len(), "reaped finished tasks");
        }
        stale.len()
    }

    async fn entry(&self, task_id: &str) -> Result<Arc<TaskEntry>, TaskError> {
        self.tasks.read().await.get(task_id).cloned().ok_or(TaskError::TaskNotFound)
    }
}

/// Drives one task from Pending to a terminal status.
struct Runner {
    entry: Arc<TaskEntry>,
    items: Vec<AssetRef>,
    pipeline: Arc<Pipeline>,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn ProgressSink>,
}

impl Runner {
    async fn run(self) {
        let task_id = self.entry.id.clone();

        let gateway = match self.pipeline.router.route(&self.entry.destination) {
            Ok(gateway) => gateway,
            Err(e) => {
                tracing::error!(task_id = %task_id, err = %e, "no gateway for destination, failing task");
                self.finish(TaskStatus::Failed, Some(e.to_string())).await;
                return;
            }
        };

        {
            let mut state = self.entry.state.lock().await;
            if state.status == TaskStatus::StopRequested {
                drop(state);
                self.finish(TaskStatus::Cancelled, None).await;
                return;
            }
            self.entry.transition(&mut state, TaskStatus::Running);
        }

        let mode = self.entry.mode;
        let batches = self.items.len().div_ceil(BATCH_SIZE);
        let mut outcome = TaskStatus::Completed;
        let mut packed = Vec::new();
        for (index, chunk) in self.items.chunks(BATCH_SIZE).enumerate() {
            let batch = index + 1;
            let first = index * BATCH_SIZE + 1;
            let last = first + chunk.len() - 1;
            tracing::info!(task_id = %task_id, batch, batches, first, last, "batch started");

            let (ok, failed) = match mode {
                PackMode::Individual => self.run_batch(batch, chunk, &gateway).await,
                PackMode::ImageGroup => {
                    let (assets, failed) = self.prepare_batch(batch, chunk).await;
                    let (ok, rejected) = self.send_group(batch, assets, &gateway).await;
                    (ok, failed + rejected)
                }
                PackMode::Zip => {
                    let (assets, failed) = self.prepare_batch(batch, chunk).await;
                    let ok = assets.len();
                    packed.extend(assets);
                    (ok, failed)
                }
            };
            let progress = {
                let mut state = self.entry.state.lock().await;
                state.sent += ok;
                state.failed += failed;
                Progress { sent: state.sent, failed: state.failed, total: self.entry.total }
            };

            if let Err(e) = self.sink.progress(&task_id, progress).await {
                tracing::warn!(task_id = %task_id, batch, err = %e, "progress sink failed");
            }
            if mode == PackMode::Individual {
                let separator = batch_separator(batch, batches, first, last);
                if let Err(e) = gateway.send_text(&self.entry.destination, &separator).await {
                    tracing::warn!(task_id = %task_id, batch, err = %e, "batch separator not delivered");
                }
            }

            if self.entry.stop.is_cancelled() {
                tracing::info!(task_id = %task_id, batch, "stop honoured at batch boundary");
                outcome = TaskStatus::Cancelled;
                break;
            }
        }

        // A stopped zip task sends nothing.
        if mode == PackMode::Zip && outcome == TaskStatus::Completed {
            if self.entry.stop.is_cancelled() {
                outcome = TaskStatus::Cancelled;
            } else if let Err(e) = self.send_archive(&packed, &gateway).await {
                tracing::error!(task_id = %task_id, err = %e, "pack archive not delivered");
                self.finish(TaskStatus::Failed, Some(format!("archive delivery failed: {e:#}")))
                    .await;
                return;
            }
        }

        self.finish(outcome, None).await;
    }

    /// Spawn `work` for every item of a batch and wait for all of them.
    /// Results keep the batch order.
    async fn join_items<T, F, Fut>(
        &self,
        chunk: &[AssetRef],
        work: F,
    ) -> Vec<(String, Result<T, ItemError>)>
    where
        T: Send + 'static,
        F: Fn(AssetRef) -> Fut,
        Fut: Future<Output = Result<T, ItemError>> + Send + 'static,
    {
        let (ids, handles): (Vec<_>, Vec<_>) =
            chunk.iter().cloned().map(|item| (item.id.clone(), tokio::spawn(work(item)))).unzip();
        let results = futures_util::future::join_all(handles).await;
        ids.into_iter()
            .zip(results)
            .map(|(id, result)| {
                (id, result.unwrap_or_else(|e| Err(ItemError::Aborted(e.to_string()))))
            })
            .collect()
    }

    /// Keep the successes and count the failures, logging each one.
    fn tally<T>(
        &self,
        batch: usize,
        results: Vec<(String, Result<T, ItemError>)>,
    ) -> (Vec<T>, usize) {
        let mut done = Vec::with_capacity(results.len());
        let mut failed = 0;
        for (item_id, result) in results {
            match result {
                Ok(value) => done.push(value),
                Err(e) => {
                    failed += 1;
                    tracing::warn!(task_id = %self.entry.id, batch, item_id = %item_id, err = %e, "item failed");
                }
            }
        }
        (done, failed)
    }

    /// Fetch, convert and send every item of a batch concurrently.
    async fn run_batch(
        &self,
        batch: usize,
        chunk: &[AssetRef],
        gateway: &Arc<dyn PlatformGateway>,
    ) -> (usize, usize) {
        let results = self
            .join_items(chunk, |item| {
                let pipeline = Arc::clone(&self.pipeline);
                let gateway = Arc::clone(gateway);
                let destination = self.entry.destination.clone();
                async move { deliver_item(&pipeline, gateway.as_ref(), &destination, &item).await }
            })
            .await;
        let (sent, failed) = self.tally(batch, results);
        (sent.len(), failed)
    }

    /// Fetch and convert every item of a batch concurrently, without sending.
    async fn prepare_batch(&self, batch: usize, chunk: &[AssetRef]) -> (Vec<Asset>, usize) {
        let results = self
            .join_items(chunk, |item| {
                let pipeline = Arc::clone(&self.pipeline);
                async move { prepare_item(&pipeline, &item).await }
            })
            .await;
        self.tally(batch, results)
    }

    /// Send a batch as one group. When the gateway rejects the group, fall
    /// back to one message per asset.
    async fn send_group(
        &self,
        batch: usize,
        assets: Vec<Asset>,
        gateway: &Arc<dyn PlatformGateway>,
    ) -> (usize, usize) {
        if assets.is_empty() {
            return (0, 0);
        }
        let destination = &self.entry.destination;
        let err = match gateway.send_group(destination, &assets).await {
            Ok(()) => return (assets.len(), 0),
            Err(e) => e,
        };
        tracing::warn!(
            task_id = %self.entry.id,
            batch,
            err = %err,
            "image group rejected, sending items one by one"
        );

        let mut sent = 0;
        let mut failed = 0;
        for asset in &assets {
            match gateway.send_asset(destination, asset).await {
                Ok(()) => sent += 1,
                Err(e) => {
                    failed += 1;
                    tracing::warn!(
                        task_id = %self.entry.id,
                        batch,
                        file = %asset.file_name,
                        err = %e,
                        "item failed"
                    );
                }
            }
        }
        (sent, failed)
    }

    async fn send_archive(
        &self,
        packed: &[Asset],
        gateway: &Arc<dyn PlatformGateway>,
    ) -> anyhow::Result<()> {
        if packed.is_empty() {
            tracing::warn!(task_id = %self.entry.id, "no item converted, archive skipped");
            return Ok(());
        }
        let content = build_archive(packed)?;
        let name = archive_name(&self.entry.id);
        gateway.send_file(&self.entry.destination, &name, &content).await?;
        tracing::info!(
            task_id = %self.entry.id,
            file = %name,
            entries = packed.len(),
            size = content.len(),
            "pack archive sent"
        );
        Ok(())
    }

    async fn finish(&self, status: TaskStatus, error: Option<String>) {
        let report = {
            let mut state = self.entry.state.lock().await;
            // A stop that landed after the last batch still wins.
            let status = match (state.status, status) {
                (TaskStatus::StopRequested, TaskStatus::Completed) => TaskStatus::Cancelled,
                (_, status) => status,
            };
            self.entry.transition(&mut state, status);
            state.finished_at = Some(self.clock.now_secs());
            TaskReport {
                task_id: self.entry.id.clone(),
                status: state.status,
                sent: state.sent,
                failed: state.failed,
                total: self.entry.total,
                error,
            }
        };
        tracing::info!(
            task_id = %report.task_id,
            status = %report.status,
            sent = report.sent,
            failed = report.failed,
            total = report.total,
            "pack delivery finished"
        );
        if let Err(e) = self.sink.finished(&report).await {
            tracing::warn!(task_id = %report.task_id, err = %e, "final report not delivered");
        }
        self.entry.done.cancel();
    }
}

/// Fetch, convert and send one item, bounded by the pipeline's timeout.
async fn deliver_item(
    pipeline: &Pipeline,
    gateway: &dyn PlatformGateway,
    destination: &Destination,
    item: &AssetRef,
) -> Result<(), ItemError> {
    let work = async {
        let asset = fetch_and_convert(pipeline, item).await?;
        gateway.send_asset(destination, &asset).await.map_err(ItemError::Deliver)
    };
    within(pipeline.item_timeout, work).await
}

/// Fetch and convert one item, bounded by the pipeline's timeout.
async fn prepare_item(pipeline: &Pipeline, item: &AssetRef) -> Result<Asset, ItemError> {
    within(pipeline.item_timeout, fetch_and_convert(pipeline, item)).await
}

async fn fetch_and_convert(pipeline: &Pipeline, item: &AssetRef) -> Result<Asset, ItemError> {
    let asset = pipeline.source.fetch(item).await.map_err(ItemError::Fetch)?;
    let target = target_format(&asset);
    pipeline.converter.convert(asset, target).await.map_err(ItemError::Convert)
}

async fn within<T>(
    limit: Option<Duration>,
    work: impl Future<Output = Result<T, ItemError>>,
) -> Result<T, ItemError> {
    match limit {
        Some(limit) => {
            tokio::time::timeout(limit, work).await.map_err(|_| ItemError::Timeout(limit))?
        }
        None => work.await,
    }
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
