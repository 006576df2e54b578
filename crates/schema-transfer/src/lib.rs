//! # schema-transfer
//!
//! Dependency-aware transfer engine for heterogeneous relational schema
//! objects (tables, views, sequences, procedures, triggers, indexes).
//!
//! The library consumes a normalized metadata snapshot, builds a validated
//! dependency graph, breaks foreign-key cycles deterministically, plans a
//! level-grouped transfer order, and executes it with:
//!
//! - **Bounded parallelism** within each level of the plan
//! - **Partial-failure isolation** via per-object retry and skip propagation
//! - **Resumable batch cursors** and a live progress event stream
//! - **Post-transfer verification** of row counts and sampled rows
//!
//! ## Example
//!
//! ```rust,no_run
//! use schema_transfer::{TransferOptions, TransferRunner};
//! use std::sync::Arc;
//!
//! # async fn demo(metadata: Arc<dyn schema_transfer::MetadataSource>,
//! #               source: Arc<dyn schema_transfer::SourceStore>,
//! #               target: Arc<dyn schema_transfer::TargetStore>) -> anyhow::Result<()> {
//! let options = TransferOptions::default();
//! let runner = TransferRunner::new(options, metadata, source, target);
//! let report = runner.run(None, None).await?;
//! println!("Transferred {} rows", report.rows_transferred);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod executor;
pub mod graph;
pub mod plan;
pub mod report;
pub mod runner;
pub mod verify;

// Re-exports for convenient access
pub use config::TransferOptions;
pub use core::schema::{
    DependencyEdge, EdgeKind, ObjectAttrs, ObjectId, ObjectKind, SchemaObject, Snapshot,
};
pub use core::traits::{MetadataSource, SourceStore, TargetStore};
pub use core::value::{Row, Value};
pub use error::{Result, TransferError};
pub use executor::{ProgressEvent, TaskStatus, TransferExecutor, TransferResult};
pub use graph::cycles::{BreakStrategy, Cycle, CycleReport, CycleResolver, SecondPassUpdate};
pub use graph::{DanglingReference, DependencyGraph, GraphBuilder};
pub use plan::{Level, Planner, TransferPlan};
pub use report::{RunStatus, TransferReport};
pub use runner::TransferRunner;
pub use verify::{IntegrityVerifier, MismatchKind, ValidationMismatch};
