//! Cycle detection and deterministic cycle breaking.
//!
//! Strongly connected components are found with Tarjan's algorithm (O(V+E)).
//! Each non-trivial component is broken one edge at a time:
//!
//! 1. Prefer a breakable (nullable-FK) edge whose removal leaves the
//!    component acyclic. Among candidates, pick the one whose source object
//!    has the fewest outgoing edges overall, then lexicographic identity.
//! 2. Otherwise suspend the edge into the highest fan-in member and flag the
//!    cycle as requiring constraint disablement.
//!
//! Suspended edges stay in the graph marked inactive; each breakable
//! suspension yields a second-pass update to fix up the deferred columns
//! once both ends exist.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

use crate::core::schema::{DependencyEdge, EdgeKind, ObjectId};
use crate::error::{Result, TransferError};
use crate::graph::DependencyGraph;

/// How a cycle was broken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakStrategy {
    /// A nullable foreign key was deferred; a second pass fills it in.
    DeferNullableFk,
    /// The constraint must be suppressed at creation time.
    DisableConstraint,
}

/// A deferred write that fills in previously nulled foreign-key columns
/// once both referenced and referencing rows exist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecondPassUpdate {
    /// The referencing object whose columns were loaded as NULL.
    pub object: ObjectId,

    /// The deferred foreign-key columns on `object`.
    pub columns: Vec<String>,

    /// The referenced object that must exist before the update runs.
    pub target: ObjectId,
}

/// One resolved cycle: its members, the edge suspended, and the strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cycle {
    /// Cycle members in lexicographic order.
    pub members: Vec<ObjectId>,

    /// The edge marked inactive to break the cycle.
    pub suspended: DependencyEdge,

    pub strategy: BreakStrategy,

    /// True when the break cannot be resolved by deferring data alone and
    /// the constraint must be suppressed at object-creation time.
    pub requires_constraint_disable: bool,

    /// Fix-up task for breakable cycles.
    pub second_pass: Option<SecondPassUpdate>,
}

/// Everything the resolver decided, for audit and for the executor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CycleReport {
    pub cycles: Vec<Cycle>,
}

impl CycleReport {
    pub fn is_empty(&self) -> bool {
        self.cycles.is_empty()
    }

    /// Second-pass updates in the order the cycles were broken.
    pub fn second_pass_updates(&self) -> Vec<&SecondPassUpdate> {
        self.cycles
            .iter()
            .filter_map(|c| c.second_pass.as_ref())
            .collect()
    }

    /// Objects whose constraints must be created disabled and re-enabled
    /// after transfer. Deduplicated, deterministic order.
    pub fn constraint_disable_objects(&self) -> Vec<ObjectId> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for cycle in &self.cycles {
            if cycle.strategy == BreakStrategy::DisableConstraint {
                let id = cycle.suspended.to.clone();
                if seen.insert(id.clone()) {
                    out.push(id);
                }
            }
        }
        out
    }
}

/// Breaks dependency cycles by suspending edges.
pub struct CycleResolver {
    /// Treat every foreign-key edge as breakable, flagging affected objects
    /// for constraint re-enablement.
    force_breakable: bool,
}

impl CycleResolver {
    pub fn new(force_breakable: bool) -> Self {
        Self { force_breakable }
    }

    /// Annotate the graph with suspensions until no cycle remains.
    ///
    /// The graph's edge set is not mutated; chosen edges are marked inactive.
    pub fn resolve(&self, graph: &mut DependencyGraph) -> Result<CycleReport> {
        let mut report = CycleReport::default();

        loop {
            let ids: Vec<ObjectId> = graph.object_ids().cloned().collect();
            let components: Vec<Vec<ObjectId>> = strongly_connected(graph, &ids)
                .into_iter()
                .filter(|c| c.len() > 1)
                .collect();

            if components.is_empty() {
                break;
            }

            for mut members in components {
                members.sort();
                let cycle = self.break_component(graph, &members)?;
                info!(
                    "Cycle of {} objects broken by suspending {} ({:?})",
                    cycle.members.len(),
                    cycle.suspended,
                    cycle.strategy
                );
                report.cycles.push(cycle);
            }
        }

        if !report.is_empty() {
            info!("Cycle resolution complete: {} suspensions", report.cycles.len());
        }
        Ok(report)
    }

    /// Pick and suspend one edge of a non-trivial component.
    fn break_component(
        &self,
        graph: &mut DependencyGraph,
        members: &[ObjectId],
    ) -> Result<Cycle> {
        let member_set: HashSet<&ObjectId> = members.iter().collect();

        // Active edges with both endpoints inside the component.
        let mut component_edges = Vec::new();
        for id in members {
            for idx in graph.active_outgoing(id) {
                if member_set.contains(&graph.edge(idx).to) {
                    component_edges.push(idx);
                }
            }
        }

        if component_edges.is_empty() {
            return Err(TransferError::UnresolvableCycle {
                members: members.to_vec(),
            });
        }

        // Preferred: a breakable FK edge whose removal leaves the component
        // acyclic. Fewest total outgoing edges on the source minimizes
        // second-pass fan-out; lexicographic identity settles ties.
        let breakable_edges: Vec<usize> = component_edges
            .iter()
            .copied()
            .filter(|&idx| {
                let edge = graph.edge(idx);
                edge.breakable || (self.force_breakable && edge.kind == EdgeKind::ForeignKey)
            })
            .collect();

        let mut candidates: Vec<usize> = breakable_edges
            .iter()
            .copied()
            .filter(|&idx| breaks_component(graph, members, idx))
            .collect();

        // Overlapping cycles: no single breakable edge yields a DAG, but
        // deferring a nullable FK still beats disabling a constraint. The
        // outer loop handles whatever cycle remains.
        if candidates.is_empty() {
            candidates = breakable_edges;
        }

        candidates.sort_by(|&a, &b| {
            let ea = graph.edge(a);
            let eb = graph.edge(b);
            graph
                .out_degree_total(&ea.from)
                .cmp(&graph.out_degree_total(&eb.from))
                .then_with(|| (&ea.from, &ea.to).cmp(&(&eb.from, &eb.to)))
        });

        if let Some(&idx) = candidates.first() {
            let edge = graph.edge(idx).clone();
            let genuinely_breakable = edge.breakable;
            graph.suspend(idx);

            return Ok(if genuinely_breakable {
                Cycle {
                    members: members.to_vec(),
                    second_pass: Some(SecondPassUpdate {
                        object: edge.to.clone(),
                        columns: edge.columns.clone(),
                        target: edge.from.clone(),
                    }),
                    suspended: edge,
                    strategy: BreakStrategy::DeferNullableFk,
                    requires_constraint_disable: false,
                }
            } else {
                // Forced by disable_constraints: the columns are not
                // nullable, so the constraint itself must be suppressed.
                Cycle {
                    members: members.to_vec(),
                    suspended: edge,
                    strategy: BreakStrategy::DisableConstraint,
                    requires_constraint_disable: true,
                    second_pass: None,
                }
            });
        }

        // Fallback: suspend the edge into the highest fan-in member. This may
        // not make the component acyclic on its own; the outer loop keeps
        // going until it is.
        let fan_in: HashMap<&ObjectId, usize> = members
            .iter()
            .map(|id| {
                let count = graph
                    .active_incoming(id)
                    .into_iter()
                    .filter(|&i| member_set.contains(&graph.edge(i).from))
                    .count();
                (id, count)
            })
            .collect();

        component_edges.sort_by(|&a, &b| {
            let ea = graph.edge(a);
            let eb = graph.edge(b);
            fan_in[&eb.to]
                .cmp(&fan_in[&ea.to])
                .then_with(|| (&ea.from, &ea.to).cmp(&(&eb.from, &eb.to)))
        });

        let idx = component_edges[0];
        let edge = graph.edge(idx).clone();
        warn!(
            "No breakable edge in cycle of {}; suspending {} and requiring constraint disable",
            members.len(),
            edge
        );
        graph.suspend(idx);

        Ok(Cycle {
            members: members.to_vec(),
            suspended: edge,
            strategy: BreakStrategy::DisableConstraint,
            requires_constraint_disable: true,
            second_pass: None,
        })
    }
}

/// Whether suspending edge `skip` leaves the component acyclic.
fn breaks_component(graph: &DependencyGraph, members: &[ObjectId], skip: usize) -> bool {
    strongly_connected_filtered(graph, members, Some(skip))
        .iter()
        .all(|c| c.len() == 1)
}

/// Tarjan's strongly connected components over a node subset, active edges only.
pub fn strongly_connected(graph: &DependencyGraph, nodes: &[ObjectId]) -> Vec<Vec<ObjectId>> {
    strongly_connected_filtered(graph, nodes, None)
}

fn strongly_connected_filtered(
    graph: &DependencyGraph,
    nodes: &[ObjectId],
    skip_edge: Option<usize>,
) -> Vec<Vec<ObjectId>> {
    let index_of: HashMap<&ObjectId, usize> =
        nodes.iter().enumerate().map(|(i, id)| (id, i)).collect();

    // Successor lists restricted to the subset.
    let adjacency: Vec<Vec<usize>> = nodes
        .iter()
        .map(|id| {
            graph
                .active_outgoing(id)
                .into_iter()
                .filter(|&e| Some(e) != skip_edge)
                .filter_map(|e| index_of.get(&graph.edge(e).to).copied())
                .collect()
        })
        .collect();

    let n = nodes.len();
    let mut index = vec![usize::MAX; n];
    let mut lowlink = vec![0usize; n];
    let mut on_stack = vec![false; n];
    let mut stack = Vec::new();
    let mut next_index = 0usize;
    let mut components = Vec::new();

    // Iterative Tarjan: (node, next successor position) call frames.
    let mut frames: Vec<(usize, usize)> = Vec::new();

    for start in 0..n {
        if index[start] != usize::MAX {
            continue;
        }
        frames.push((start, 0));

        while let Some(&(v, pos)) = frames.last() {
            if pos == 0 {
                index[v] = next_index;
                lowlink[v] = next_index;
                next_index += 1;
                stack.push(v);
                on_stack[v] = true;
            }

            if let Some(&w) = adjacency[v].get(pos) {
                frames.last_mut().expect("frame present").1 = pos + 1;
                if index[w] == usize::MAX {
                    frames.push((w, 0));
                } else if on_stack[w] {
                    lowlink[v] = lowlink[v].min(index[w]);
                }
            } else {
                frames.pop();
                if let Some(&(parent, _)) = frames.last() {
                    lowlink[parent] = lowlink[parent].min(lowlink[v]);
                }
                if lowlink[v] == index[v] {
                    let mut component = Vec::new();
                    loop {
                        let w = stack.pop().expect("tarjan stack underflow");
                        on_stack[w] = false;
                        component.push(nodes[w].clone());
                        if w == v {
                            break;
                        }
                    }
                    components.push(component);
                }
            }
        }
    }

    debug!("SCC pass: {} nodes, {} components", n, components.len());
    components
}
