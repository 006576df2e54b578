//! Run configuration with serde defaults and CPU-based worker tuning.

use serde::{Deserialize, Serialize};
use std::path::Path;
use sysinfo::System;
use tracing::info;

use crate::error::{Result, TransferError};

/// Immutable configuration for one transfer run.
///
/// `max_workers` uses `Option` to distinguish "not set" (use the detected CPU
/// count) from "explicitly set". All other fields carry plain defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferOptions {
    /// Rows per read/write batch (default: 1000).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Concurrent transfer units per level. Defaults to available parallelism.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_workers: Option<usize>,

    /// Compare source/target row counts after transfer (default: true).
    #[serde(default = "default_true")]
    pub verify_data: bool,

    /// Rows to sample per table for field-level comparison (0 = counts only).
    #[serde(default)]
    pub verify_sample_rows: usize,

    /// Keep independent objects running when one fails (default: false).
    #[serde(default)]
    pub continue_on_error: bool,

    /// Retries per failed batch before the object is marked failed (default: 3).
    #[serde(default = "default_retry_limit")]
    pub retry_limit: usize,

    /// Base backoff between retries in milliseconds, doubled per attempt
    /// (default: 200).
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Timeout per batch operation in seconds (default: 600). A timed-out
    /// batch counts as a failed attempt under the retry policy.
    #[serde(default = "default_batch_timeout_secs")]
    pub batch_timeout_secs: u64,

    /// Treat every foreign-key edge as breakable for cycle resolution and
    /// flag affected objects for constraint re-enablement (default: false).
    #[serde(default)]
    pub disable_constraints: bool,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_workers: None,
            verify_data: true,
            verify_sample_rows: 0,
            continue_on_error: false,
            retry_limit: default_retry_limit(),
            retry_backoff_ms: default_retry_backoff_ms(),
            batch_timeout_secs: default_batch_timeout_secs(),
            disable_constraints: false,
        }
    }
}

impl TransferOptions {
    /// Load options from a YAML file and validate them.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let options: Self = serde_yaml::from_str(&content)?;
        options.validate()?;
        Ok(options)
    }

    /// Validate field ranges.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(TransferError::Config("batch_size must be at least 1".into()));
        }
        if self.retry_limit > 10 {
            return Err(TransferError::Config(format!(
                "retry_limit {} exceeds maximum of 10",
                self.retry_limit
            )));
        }
        if self.max_workers == Some(0) {
            return Err(TransferError::Config(
                "max_workers must be at least 1 when set".into(),
            ));
        }
        if self.batch_timeout_secs == 0 {
            return Err(TransferError::Config(
                "batch_timeout_secs must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Effective worker count: the configured value, or the detected CPU count.
    pub fn effective_workers(&self) -> usize {
        match self.max_workers {
            Some(n) => n,
            None => {
                let mut sys = System::new();
                sys.refresh_cpu_all();
                let cores = sys.cpus().len().max(1);
                info!("max_workers not set, using {} detected cores", cores);
                cores
            }
        }
    }
}

fn default_batch_size() -> usize {
    1000
}

fn default_retry_limit() -> usize {
    3
}

fn default_retry_backoff_ms() -> u64 {
    200
}

fn default_batch_timeout_secs() -> u64 {
    600
}

fn default_true() -> bool {
    true
}
