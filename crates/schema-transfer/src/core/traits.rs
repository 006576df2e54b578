//! Capability traits for metadata, source, and target collaborators.
//!
//! The engine never branches on database engine identity: each engine ships
//! one implementation of these traits emitting the neutral
//! [`SchemaObject`]/[`DependencyEdge`] form and moving [`Row`] batches.
//! Connection pooling is the implementation's concern; the engine only bounds
//! concurrent logical transfers.

use async_trait::async_trait;

use crate::core::schema::{ObjectId, SchemaObject, Snapshot};
use crate::core::value::Row;
use crate::error::Result;
use crate::graph::cycles::SecondPassUpdate;

/// Produces the normalized metadata snapshot for a run.
#[async_trait]
pub trait MetadataSource: Send + Sync {
    /// Collect all objects and proposed dependency edges.
    async fn snapshot(&self) -> Result<Snapshot>;
}

/// Read access to the source data store.
#[async_trait]
pub trait SourceStore: Send + Sync {
    /// Exact row count for a table at transfer time.
    async fn row_count(&self, object: &ObjectId) -> Result<i64>;

    /// Read up to `limit` rows in primary-key order, starting `offset` rows in.
    ///
    /// An empty result means the table is exhausted. Rows before `offset` must
    /// not be re-read; the executor uses the offset as its resumable cursor.
    async fn read_batch(&self, object: &ObjectId, offset: i64, limit: usize) -> Result<Vec<Row>>;

    /// Read the first `limit` rows in primary-key order for verification.
    async fn sample_rows(&self, object: &ObjectId, limit: usize) -> Result<Vec<Row>>;
}

/// Write access to the target data store.
#[async_trait]
pub trait TargetStore: Send + Sync {
    /// Create (define) an object in the target.
    ///
    /// With `constraints_disabled`, foreign-key constraints on the object are
    /// created disabled (or omitted until [`enable_constraints`] runs).
    ///
    /// [`enable_constraints`]: TargetStore::enable_constraints
    async fn create_object(&self, object: &SchemaObject, constraints_disabled: bool)
        -> Result<()>;

    /// Append a batch of rows to a table. Returns the number of rows written.
    async fn write_batch(&self, object: &ObjectId, rows: Vec<Row>) -> Result<u64>;

    /// Exact row count for a table after transfer.
    async fn row_count(&self, object: &ObjectId) -> Result<i64>;

    /// Read the first `limit` rows in primary-key order for verification.
    async fn sample_rows(&self, object: &ObjectId, limit: usize) -> Result<Vec<Row>>;

    /// Fill in foreign-key columns that were deferred to break a cycle.
    /// Returns the number of rows updated.
    async fn apply_second_pass(&self, update: &SecondPassUpdate) -> Result<u64>;

    /// Re-enable constraints that were created disabled.
    async fn enable_constraints(&self, object: &ObjectId) -> Result<()>;
}
