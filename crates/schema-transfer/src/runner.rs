//! Run orchestration: snapshot, graph, plan, execute, verify, report.

use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tracing::info;
use uuid::Uuid;

use crate::config::TransferOptions;
use crate::core::traits::{MetadataSource, SourceStore, TargetStore};
use crate::error::Result;
use crate::executor::{ProgressEvent, TransferExecutor};
use crate::graph::cycles::{CycleReport, CycleResolver};
use crate::graph::{DanglingReference, GraphBuilder};
use crate::plan::{Planner, TransferPlan};
use crate::report::{RunStatus, TransferReport};
use crate::verify::IntegrityVerifier;

/// Drives a complete transfer run against the configured collaborators.
///
/// Construction is cheap; all work happens in [`run`](TransferRunner::run).
/// A runner can execute multiple runs, each with a fresh snapshot.
pub struct TransferRunner {
    options: TransferOptions,
    metadata: Arc<dyn MetadataSource>,
    source: Arc<dyn SourceStore>,
    target: Arc<dyn TargetStore>,
}

impl TransferRunner {
    pub fn new(
        options: TransferOptions,
        metadata: Arc<dyn MetadataSource>,
        source: Arc<dyn SourceStore>,
        target: Arc<dyn TargetStore>,
    ) -> Self {
        Self {
            options,
            metadata,
            source,
            target,
        }
    }

    /// Build the plan without executing anything.
    ///
    /// Takes a fresh snapshot and runs graph building, cycle resolution, and
    /// planning, returning what a run would do.
    pub async fn plan_preview(
        &self,
    ) -> Result<(TransferPlan, CycleReport, Vec<DanglingReference>)> {
        self.options.validate()?;

        let snapshot = self.metadata.snapshot().await?;
        let (mut graph, problems) = GraphBuilder::build(snapshot)?;
        let cycles =
            CycleResolver::new(self.options.disable_constraints).resolve(&mut graph)?;
        let plan = Planner::plan(&graph)?;
        Ok((plan, cycles, problems))
    }

    /// Execute a full transfer run.
    ///
    /// `cancel` flips to true to request a cooperative stop; `progress`
    /// receives per-object status events as they happen. A report is
    /// produced for every run that gets past planning, including cancelled
    /// and partially failed ones. `Err` is reserved for structural problems
    /// that prevent a plan from existing at all.
    pub async fn run(
        &self,
        cancel: Option<watch::Receiver<bool>>,
        progress: Option<mpsc::Sender<ProgressEvent>>,
    ) -> Result<TransferReport> {
        self.options.validate()?;

        let run_id = Uuid::new_v4().to_string();
        let started_at = Utc::now();
        let start = Instant::now();
        info!("Starting transfer run {}", run_id);

        info!("Phase 1: collecting metadata snapshot");
        let snapshot = self.metadata.snapshot().await?;

        info!("Phase 2: building dependency graph");
        let (mut graph, problems) = GraphBuilder::build(snapshot)?;

        info!("Phase 3: resolving cycles");
        let cycles =
            CycleResolver::new(self.options.disable_constraints).resolve(&mut graph)?;

        info!("Phase 4: planning transfer order");
        let plan = Planner::plan(&graph)?;

        info!("Phase 5: executing plan");
        // A run without a caller-supplied cancel signal still needs a live
        // receiver; the sender is held here so it never reads as closed.
        let (_standin_tx, standin_rx) = watch::channel(false);
        let cancel = cancel.unwrap_or(standin_rx);

        let executor = TransferExecutor::new(
            self.source.clone(),
            self.target.clone(),
            self.options.clone(),
        );
        let mut outcome = executor
            .execute(&plan, &graph, &cycles, cancel, progress)
            .await?;

        let mismatches = if self.options.verify_data && !outcome.cancelled {
            info!("Phase 6: verifying transferred data");
            let verifier = IntegrityVerifier::new(
                self.source.clone(),
                self.target.clone(),
                self.options.clone(),
            );
            verifier.verify(&graph, &mut outcome.results).await
        } else {
            Vec::new()
        };

        let mut status = RunStatus::from_results(&outcome.results, outcome.cancelled);
        if status == RunStatus::Success && !mismatches.is_empty() {
            status = RunStatus::Partial;
        }
        let rows_transferred = outcome.results.iter().map(|r| r.rows_transferred).sum();
        let completed_at = Utc::now();
        let elapsed_seconds = start.elapsed().as_secs_f64();

        info!(
            "Run {} finished: {:?}, {} rows in {:.2}s",
            run_id, status, rows_transferred, elapsed_seconds
        );

        Ok(TransferReport {
            run_id,
            status,
            started_at,
            completed_at,
            elapsed_seconds,
            rows_transferred,
            results: outcome.results,
            cycles,
            problems,
            mismatches,
        })
    }
}
