//! Level-grouped transfer planning over the resolved graph.
//!
//! A standard in-degree-zero extraction (Kahn's algorithm), except that all
//! objects extracted in one round form a single level. Objects within a level
//! have no active edges among themselves and transfer in parallel; levels
//! themselves are strictly ordered.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};

use crate::core::schema::ObjectId;
use crate::error::{Result, TransferError};
use crate::graph::DependencyGraph;

/// A set of mutually independent objects, safely transferable in parallel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Level {
    /// Zero-based position in the plan.
    pub index: usize,

    /// Members in deterministic order: kind precedence, then identity.
    pub objects: Vec<ObjectId>,
}

/// The ordered sequence of levels for one run.
///
/// Owned solely by the run that requested it; inspectable before execution
/// for plan preview.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransferPlan {
    pub levels: Vec<Level>,
}

impl TransferPlan {
    /// Total number of objects across all levels.
    pub fn object_count(&self) -> usize {
        self.levels.iter().map(|l| l.objects.len()).sum()
    }

    /// Level index of an object, if planned.
    pub fn level_of(&self, id: &ObjectId) -> Option<usize> {
        self.levels
            .iter()
            .find(|l| l.objects.contains(id))
            .map(|l| l.index)
    }
}

/// Produces a [`TransferPlan`] from a resolved (acyclic) graph view.
pub struct Planner;

impl Planner {
    /// Run the level-grouped topological sort.
    ///
    /// Fails with `UnplannableGraph` if objects remain after all zero
    /// in-degree extractions, which means the resolver left a cycle behind.
    pub fn plan(graph: &DependencyGraph) -> Result<TransferPlan> {
        let mut in_degree: HashMap<&ObjectId, usize> = graph
            .object_ids()
            .map(|id| (id, graph.active_incoming(id).len()))
            .collect();

        let mut ready: Vec<&ObjectId> = in_degree
            .iter()
            .filter(|(_, &d)| d == 0)
            .map(|(&id, _)| id)
            .collect();

        let mut plan = TransferPlan::default();
        let mut planned = 0usize;

        while !ready.is_empty() {
            // Tie-break within the level for deterministic output only; the
            // members are independent so this is not a correctness rule.
            ready.sort_by(|a, b| {
                (a.kind, &a.schema, &a.name).cmp(&(b.kind, &b.schema, &b.name))
            });

            let level = Level {
                index: plan.levels.len(),
                objects: ready.iter().map(|id| (*id).clone()).collect(),
            };
            debug!("Level {}: {} objects", level.index, level.objects.len());

            let mut next = Vec::new();
            for id in ready.drain(..) {
                planned += 1;
                for edge_idx in graph.active_outgoing(id) {
                    let successor = &graph.edge(edge_idx).to;
                    let degree = in_degree
                        .get_mut(successor)
                        .expect("edge endpoint validated at build time");
                    *degree -= 1;
                    if *degree == 0 {
                        next.push(successor);
                    }
                }
            }

            plan.levels.push(level);
            ready = next;
        }

        if planned != graph.len() {
            return Err(TransferError::UnplannableGraph {
                count: graph.len() - planned,
            });
        }

        info!(
            "Plan: {} objects in {} levels",
            planned,
            plan.levels.len()
        );
        Ok(plan)
    }
}
