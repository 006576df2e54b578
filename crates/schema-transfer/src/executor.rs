//! Plan execution with bounded per-level parallelism.
//!
//! Each level runs under a worker pool capped at `max_workers`; a level
//! barrier guarantees no task of level n+1 starts before every level-n task
//! is terminal. Batch failures retry with exponential backoff before the
//! object is marked failed. Cancellation is cooperative: workers check the
//! signal between batches, and in-flight batch writes complete before a
//! worker exits so no partial rows land.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, error, info, warn};

use crate::config::TransferOptions;
use crate::core::schema::{EdgeKind, ObjectId, SchemaObject};
use crate::core::traits::{SourceStore, TargetStore};
use crate::error::{Result, TransferError};
use crate::graph::cycles::CycleReport;
use crate::graph::DependencyGraph;
use crate::plan::TransferPlan;

/// Task status. Terminal states are Succeeded, Failed, and Skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Succeeded | TaskStatus::Failed | TaskStatus::Skipped
        )
    }
}

/// One status transition on the progress stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub object: ObjectId,
    pub status: TaskStatus,
    pub rows_so_far: i64,
    pub timestamp: DateTime<Utc>,
}

/// Resumable position within a table transfer.
///
/// Reads are in primary-key order, so the number of rows already written is
/// a safe restart offset.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct BatchCursor {
    pub rows_done: i64,
}

/// Outcome for a single object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferResult {
    pub object: ObjectId,
    pub status: TaskStatus,

    /// Row count reported by the source at transfer time.
    pub rows_source: i64,

    /// Rows actually written to the target.
    pub rows_transferred: i64,

    /// Target row count after transfer, filled in by verification.
    pub rows_target: Option<i64>,

    pub elapsed_seconds: f64,
    pub errors: Vec<String>,
}

/// What the executor hands back to the runner.
#[derive(Debug)]
pub struct ExecutionOutcome {
    /// Per-object results in plan order.
    pub results: Vec<TransferResult>,

    /// Whether the run was cut short by the cancellation signal.
    pub cancelled: bool,
}

/// Walks a [`TransferPlan`], moving data through the store capabilities.
pub struct TransferExecutor {
    source: Arc<dyn SourceStore>,
    target: Arc<dyn TargetStore>,
    options: TransferOptions,
}

impl TransferExecutor {
    pub fn new(
        source: Arc<dyn SourceStore>,
        target: Arc<dyn TargetStore>,
        options: TransferOptions,
    ) -> Self {
        Self {
            source,
            target,
            options,
        }
    }

    /// Execute the plan level by level.
    ///
    /// Never fails for per-object reasons; those are folded into the
    /// returned results. The `Err` path is reserved for collaborator
    /// failures outside any object's scope.
    pub async fn execute(
        &self,
        plan: &TransferPlan,
        graph: &DependencyGraph,
        cycles: &CycleReport,
        cancel: watch::Receiver<bool>,
        progress: Option<mpsc::Sender<ProgressEvent>>,
    ) -> Result<ExecutionOutcome> {
        let workers = self.options.effective_workers();
        let semaphore = Arc::new(Semaphore::new(workers));

        // Internal stop signal raised on failure when continue_on_error is
        // off; workers watch both this and the caller's signal.
        let (stop_tx, stop_rx) = watch::channel(false);

        let disabled = self.constraint_disabled_objects(graph, cycles);

        let mut statuses: HashMap<ObjectId, TaskStatus> = HashMap::new();
        let mut results: Vec<TransferResult> = Vec::new();
        let mut halted = false;

        info!(
            "Executing plan: {} levels, {} objects, {} workers",
            plan.levels.len(),
            plan.object_count(),
            workers
        );

        for level in &plan.levels {
            if halted || *cancel.borrow() {
                for id in &level.objects {
                    statuses.insert(id.clone(), TaskStatus::Skipped);
                    results.push(skipped_result(id.clone(), "run halted before level started"));
                    emit(&progress, id.clone(), TaskStatus::Skipped, 0).await;
                }
                continue;
            }

            debug!("Starting level {} ({} objects)", level.index, level.objects.len());
            let mut handles = Vec::new();

            for id in &level.objects {
                // Dependents of failed or skipped objects cannot be loaded
                // consistently; skip them up front.
                if let Some(blocker) = self.blocked_by(graph, &statuses, id) {
                    statuses.insert(id.clone(), TaskStatus::Skipped);
                    results.push(skipped_result(
                        id.clone(),
                        format!("dependency {} did not succeed", blocker),
                    ));
                    emit(&progress, id.clone(), TaskStatus::Skipped, 0).await;
                    continue;
                }

                let object = graph
                    .object(id)
                    .expect("planned object exists in graph")
                    .clone();

                // Enqueued; may wait here for a worker slot.
                emit(&progress, id.clone(), TaskStatus::Pending, 0).await;
                let permit = semaphore.clone().acquire_owned().await.unwrap();
                let worker = ObjectWorker {
                    source: self.source.clone(),
                    target: self.target.clone(),
                    options: self.options.clone(),
                    cancel: cancel.clone(),
                    stop: stop_rx.clone(),
                    progress: progress.clone(),
                    constraints_disabled: disabled.contains(id),
                };

                statuses.insert(id.clone(), TaskStatus::Running);
                let handle = tokio::spawn(async move {
                    let result = worker.run(object).await;
                    drop(permit);
                    result
                });
                handles.push(handle);
            }

            // Level barrier: every task must reach a terminal state before
            // the next level starts.
            for handle in handles {
                let result = match handle.await {
                    Ok(result) => result,
                    Err(e) => {
                        error!("Worker task panicked: {}", e);
                        return Err(TransferError::store(format!("worker panicked: {}", e)));
                    }
                };

                statuses.insert(result.object.clone(), result.status);
                if result.status == TaskStatus::Failed && !self.options.continue_on_error {
                    warn!("{} failed, halting run", result.object);
                    let _ = stop_tx.send(true);
                    halted = true;
                }
                results.push(result);
            }
        }

        let cancelled = *cancel.borrow();

        // Deferred fix-ups only run when the plan completed, successfully or
        // with failures the caller chose to tolerate.
        if !cancelled && !halted {
            self.run_second_pass(cycles, &statuses, &mut results).await;
            self.reenable_constraints(&disabled, &statuses, &mut results)
                .await;
        }

        Ok(ExecutionOutcome { results, cancelled })
    }

    /// Objects whose constraints must be created disabled.
    fn constraint_disabled_objects(
        &self,
        graph: &DependencyGraph,
        cycles: &CycleReport,
    ) -> HashSet<ObjectId> {
        let mut disabled: HashSet<ObjectId> =
            cycles.constraint_disable_objects().into_iter().collect();

        if self.options.disable_constraints {
            for edge in graph.edges() {
                if edge.kind == EdgeKind::ForeignKey {
                    disabled.insert(edge.to.clone());
                }
            }
        }
        disabled
    }

    /// The first active dependency of `id` that reached Failed or Skipped.
    fn blocked_by(
        &self,
        graph: &DependencyGraph,
        statuses: &HashMap<ObjectId, TaskStatus>,
        id: &ObjectId,
    ) -> Option<ObjectId> {
        graph
            .active_dependencies(id)
            .into_iter()
            .find(|dep| {
                matches!(
                    statuses.get(*dep),
                    Some(TaskStatus::Failed) | Some(TaskStatus::Skipped)
                )
            })
            .cloned()
    }

    async fn run_second_pass(
        &self,
        cycles: &CycleReport,
        statuses: &HashMap<ObjectId, TaskStatus>,
        results: &mut [TransferResult],
    ) {
        for update in cycles.second_pass_updates() {
            let both_exist = statuses.get(&update.object) == Some(&TaskStatus::Succeeded)
                && statuses.get(&update.target) == Some(&TaskStatus::Succeeded);
            if !both_exist {
                debug!(
                    "Skipping second-pass update for {}: endpoints incomplete",
                    update.object
                );
                continue;
            }

            match self.target.apply_second_pass(update).await {
                Ok(rows) => info!(
                    "Second pass: {} rows of {} updated toward {}",
                    rows, update.object, update.target
                ),
                Err(e) => {
                    warn!("Second-pass update failed for {}: {}", update.object, e);
                    if let Some(result) =
                        results.iter_mut().find(|r| r.object == update.object)
                    {
                        result
                            .errors
                            .push(format!("second-pass update failed: {}", e));
                    }
                }
            }
        }
    }

    async fn reenable_constraints(
        &self,
        disabled: &HashSet<ObjectId>,
        statuses: &HashMap<ObjectId, TaskStatus>,
        results: &mut [TransferResult],
    ) {
        let mut flagged: Vec<&ObjectId> = disabled.iter().collect();
        flagged.sort();

        for id in flagged {
            if statuses.get(id) != Some(&TaskStatus::Succeeded) {
                continue;
            }
            if let Err(e) = self.target.enable_constraints(id).await {
                warn!("Failed to re-enable constraints on {}: {}", id, e);
                if let Some(result) = results.iter_mut().find(|r| &r.object == id) {
                    result
                        .errors
                        .push(format!("constraint re-enable failed: {}", e));
                }
            }
        }
    }
}

/// Everything one worker needs, owned so it can cross the spawn boundary.
struct ObjectWorker {
    source: Arc<dyn SourceStore>,
    target: Arc<dyn TargetStore>,
    options: TransferOptions,
    cancel: watch::Receiver<bool>,
    stop: watch::Receiver<bool>,
    progress: Option<mpsc::Sender<ProgressEvent>>,
    constraints_disabled: bool,
}

impl ObjectWorker {
    fn stopping(&self) -> bool {
        *self.cancel.borrow() || *self.stop.borrow()
    }

    /// Transfer one object. Errors become part of the result, never Err.
    async fn run(self, object: SchemaObject) -> TransferResult {
        let id = object.id();
        let start = Instant::now();
        emit(&self.progress, id.clone(), TaskStatus::Running, 0).await;

        let mut result = TransferResult {
            object: id.clone(),
            status: TaskStatus::Running,
            rows_source: 0,
            rows_transferred: 0,
            rows_target: None,
            elapsed_seconds: 0.0,
            errors: Vec::new(),
        };

        // Creation applies to every kind; only tables carry rows.
        let created = self
            .with_retry(&id, "create", || {
                self.target.create_object(&object, self.constraints_disabled)
            })
            .await;

        match created {
            Ok(()) => {
                if object.has_data() {
                    self.move_rows(&id, &mut result).await;
                } else {
                    result.status = TaskStatus::Succeeded;
                }
            }
            Err(e) => {
                result.status = TaskStatus::Failed;
                result.errors.push(e.to_string());
            }
        }

        result.elapsed_seconds = start.elapsed().as_secs_f64();
        emit(
            &self.progress,
            id.clone(),
            result.status,
            result.rows_transferred,
        )
        .await;

        match result.status {
            TaskStatus::Succeeded => info!(
                "{}: completed ({} rows in {:.2}s)",
                id, result.rows_transferred, result.elapsed_seconds
            ),
            TaskStatus::Failed => error!("{}: failed - {:?}", id, result.errors),
            _ => {}
        }

        result
    }

    /// Stream table rows in batches, updating the resumable cursor.
    async fn move_rows(&self, id: &ObjectId, result: &mut TransferResult) {
        match self.source.row_count(id).await {
            Ok(count) => result.rows_source = count,
            Err(e) => {
                result.status = TaskStatus::Failed;
                result.errors.push(format!("source row count: {}", e));
                return;
            }
        }

        let batch_size = self.options.batch_size;
        let mut cursor = BatchCursor::default();

        loop {
            // Cooperative cancellation between batches; the batch already
            // written stays intact.
            if self.stopping() {
                result.status = TaskStatus::Skipped;
                result
                    .errors
                    .push("cancelled before completion".to_string());
                return;
            }

            let offset = cursor.rows_done;
            let batch = match self
                .with_retry(id, "read batch", || {
                    self.source.read_batch(id, offset, batch_size)
                })
                .await
            {
                Ok(batch) => batch,
                Err(e) => {
                    result.status = TaskStatus::Failed;
                    result.errors.push(e.to_string());
                    return;
                }
            };

            if batch.is_empty() {
                break;
            }
            let batch_len = batch.len();

            let written = match self
                .with_retry(id, "write batch", || {
                    self.target.write_batch(id, batch.clone())
                })
                .await
            {
                Ok(written) => written,
                Err(e) => {
                    result.status = TaskStatus::Failed;
                    result.errors.push(e.to_string());
                    return;
                }
            };

            cursor.rows_done += written as i64;
            result.rows_transferred = cursor.rows_done;
            emit(
                &self.progress,
                id.clone(),
                TaskStatus::Running,
                cursor.rows_done,
            )
            .await;

            if batch_len < batch_size {
                break;
            }
        }

        result.status = TaskStatus::Succeeded;
    }

    /// Run a batch operation under the timeout and retry policy.
    ///
    /// A timed-out batch counts as a failed attempt. Backoff doubles per
    /// attempt starting from `retry_backoff_ms`.
    async fn with_retry<T, Fut>(
        &self,
        id: &ObjectId,
        what: &str,
        mut op: impl FnMut() -> Fut,
    ) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        let limit = self.options.retry_limit;
        let per_batch = Duration::from_secs(self.options.batch_timeout_secs);
        let mut attempt = 0;

        loop {
            let outcome = match timeout(per_batch, op()).await {
                Ok(outcome) => outcome,
                Err(_) => Err(TransferError::batch(
                    id.clone(),
                    format!("{} timed out after {:?}", what, per_batch),
                )),
            };

            match outcome {
                Ok(value) => return Ok(value),
                Err(e) if attempt < limit => {
                    let backoff =
                        Duration::from_millis(self.options.retry_backoff_ms << attempt);
                    warn!(
                        "{}: {} failed (attempt {}/{}), retrying in {:?}: {}",
                        id,
                        what,
                        attempt + 1,
                        limit + 1,
                        backoff,
                        e
                    );
                    attempt += 1;
                    sleep(backoff).await;
                }
                Err(e) => {
                    return Err(TransferError::batch(
                        id.clone(),
                        format!("{} failed after {} attempts: {}", what, attempt + 1, e),
                    ))
                }
            }
        }
    }
}

fn skipped_result(object: ObjectId, reason: impl Into<String>) -> TransferResult {
    TransferResult {
        object,
        status: TaskStatus::Skipped,
        rows_source: 0,
        rows_transferred: 0,
        rows_target: None,
        elapsed_seconds: 0.0,
        errors: vec![reason.into()],
    }
}

async fn emit(
    progress: &Option<mpsc::Sender<ProgressEvent>>,
    object: ObjectId,
    status: TaskStatus,
    rows_so_far: i64,
) {
    if let Some(tx) = progress {
        let _ = tx
            .send(ProgressEvent {
                object,
                status,
                rows_so_far,
                timestamp: Utc::now(),
            })
            .await;
    }
}
