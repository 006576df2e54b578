//! Dependency graph construction from a metadata snapshot.

pub mod cycles;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, warn};

use crate::core::schema::{DependencyEdge, ObjectId, SchemaObject, Snapshot};
use crate::error::{Result, TransferError};

/// An edge whose endpoints cannot both be resolved in the snapshot.
///
/// Recorded and excluded from the graph; transfer proceeds for the endpoint
/// that does exist. Non-fatal by design.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DanglingReference {
    /// The edge as proposed by the metadata collaborator.
    pub edge: DependencyEdge,

    /// The endpoint that is absent from the snapshot. `None` for
    /// self-referencing edges, where both endpoints exist but the edge
    /// cannot be ordered.
    pub missing: Option<ObjectId>,

    /// Human-readable problem description.
    pub detail: String,
}

/// Validated dependency graph over a snapshot.
///
/// Objects and edges are read-only once built. Cycle resolution marks edges
/// inactive via [`suspend`](DependencyGraph::suspend) instead of removing
/// them, so the original edge set stays available for audit.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    objects: BTreeMap<ObjectId, SchemaObject>,
    edges: Vec<DependencyEdge>,
    outgoing: HashMap<ObjectId, Vec<usize>>,
    incoming: HashMap<ObjectId, Vec<usize>>,
    suspended: HashSet<usize>,
}

impl DependencyGraph {
    /// Number of objects in the graph.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// All object identities in deterministic (lexicographic) order.
    pub fn object_ids(&self) -> impl Iterator<Item = &ObjectId> {
        self.objects.keys()
    }

    pub fn object(&self, id: &ObjectId) -> Option<&SchemaObject> {
        self.objects.get(id)
    }

    pub fn contains(&self, id: &ObjectId) -> bool {
        self.objects.contains_key(id)
    }

    /// All edges, including suspended ones.
    pub fn edges(&self) -> &[DependencyEdge] {
        &self.edges
    }

    pub fn edge(&self, idx: usize) -> &DependencyEdge {
        &self.edges[idx]
    }

    /// Whether an edge has been marked inactive by cycle resolution.
    pub fn is_suspended(&self, idx: usize) -> bool {
        self.suspended.contains(&idx)
    }

    /// Mark an edge inactive for planning purposes. The edge itself is kept.
    pub fn suspend(&mut self, idx: usize) {
        debug!("Suspending edge: {}", self.edges[idx]);
        self.suspended.insert(idx);
    }

    /// Indices of active outgoing edges from `id`.
    pub fn active_outgoing(&self, id: &ObjectId) -> Vec<usize> {
        self.outgoing
            .get(id)
            .map(|v| {
                v.iter()
                    .copied()
                    .filter(|i| !self.suspended.contains(i))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Indices of active incoming edges into `id`.
    pub fn active_incoming(&self, id: &ObjectId) -> Vec<usize> {
        self.incoming
            .get(id)
            .map(|v| {
                v.iter()
                    .copied()
                    .filter(|i| !self.suspended.contains(i))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Total outgoing edge count for `id`, suspended edges included.
    pub fn out_degree_total(&self, id: &ObjectId) -> usize {
        self.outgoing.get(id).map(|v| v.len()).unwrap_or(0)
    }

    /// Identities of objects `id` must exist after (active edges only).
    pub fn active_dependencies(&self, id: &ObjectId) -> Vec<&ObjectId> {
        self.active_incoming(id)
            .into_iter()
            .map(|i| &self.edges[i].from)
            .collect()
    }

    /// Identities of objects that depend on `id` (active edges only).
    pub fn active_dependents(&self, id: &ObjectId) -> Vec<&ObjectId> {
        self.active_outgoing(id)
            .into_iter()
            .map(|i| &self.edges[i].to)
            .collect()
    }
}

/// Builds a [`DependencyGraph`] from a flat snapshot.
pub struct GraphBuilder;

impl GraphBuilder {
    /// Validate the snapshot and assemble the graph.
    ///
    /// Fails on duplicate object identities. Edges referencing absent objects
    /// and self-referencing edges are excluded and reported as
    /// [`DanglingReference`] problems.
    pub fn build(snapshot: Snapshot) -> Result<(DependencyGraph, Vec<DanglingReference>)> {
        let mut objects: BTreeMap<ObjectId, SchemaObject> = BTreeMap::new();
        for object in snapshot.objects {
            let id = object.id();
            if objects.insert(id.clone(), object).is_some() {
                return Err(TransferError::DuplicateObject(id));
            }
        }

        let mut edges = Vec::new();
        let mut problems = Vec::new();
        let mut outgoing: HashMap<ObjectId, Vec<usize>> = HashMap::new();
        let mut incoming: HashMap<ObjectId, Vec<usize>> = HashMap::new();

        for edge in snapshot.edges {
            if edge.from == edge.to {
                warn!("Self-referencing edge excluded: {}", edge);
                problems.push(DanglingReference {
                    detail: format!("{} references itself and cannot be ordered", edge.from),
                    missing: None,
                    edge,
                });
                continue;
            }

            let missing = [&edge.from, &edge.to]
                .into_iter()
                .find(|id| !objects.contains_key(*id))
                .cloned();

            if let Some(missing) = missing {
                warn!("Edge references absent object {}: {}", missing, edge);
                problems.push(DanglingReference {
                    detail: format!("{} is not present in the snapshot", missing),
                    missing: Some(missing),
                    edge,
                });
                continue;
            }

            let idx = edges.len();
            outgoing.entry(edge.from.clone()).or_default().push(idx);
            incoming.entry(edge.to.clone()).or_default().push(idx);
            edges.push(edge);
        }

        debug!(
            "Graph built: {} objects, {} edges, {} problems",
            objects.len(),
            edges.len(),
            problems.len()
        );

        Ok((
            DependencyGraph {
                objects,
                edges,
                outgoing,
                incoming,
                suspended: HashSet::new(),
            },
            problems,
        ))
    }
}
