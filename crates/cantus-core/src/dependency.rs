//! Immediate upstream dependencies of a job.
//!
//! The set of job kinds is closed, so dependency discovery is one free
//! function matching on the kind instead of a method on [`Job`](crate::Job):
//!
//! | kind       | depends on |
//! |------------|------------|
//! | root       | producers feeding the sink, plus every always-playing node |
//! | node       | producers of its input connections and property automation |
//! | aggregator | its live registered sources, plus everything a node depends on |

use std::collections::HashSet;

use crate::arena::NodeArena;
use crate::connection::InputConnection;
use crate::job::JobId;
use crate::node::{Node, NodeId, NodeKind};

/// Read-only view of the graph used while discovering dependencies.
#[derive(Clone, Copy)]
pub(crate) struct Topology<'a> {
    pub arena: &'a NodeArena,
    pub sink: &'a InputConnection,
    pub always_playing: &'a [NodeId],
}

enum JobKind<'a> {
    Root,
    Node(&'a Node),
    Aggregator(&'a Node, &'a [NodeId]),
}

/// Appends the immediate dependencies of `job` to `out`.
///
/// Dead ids are skipped. Duplicates are possible when a producer feeds
/// several connections of the same consumer.
pub(crate) fn visit(job: JobId, topo: &Topology<'_>, out: &mut Vec<JobId>) {
    match job {
        JobId::Root => dispatch(JobKind::Root, topo, out),
        JobId::Node(id) => {
            let Some(cell) = topo.arena.get(id) else {
                return;
            };
            let node = cell.lock();
            let kind = match node.kind() {
                NodeKind::Standard => JobKind::Node(&*node),
                NodeKind::Aggregator { sources } => JobKind::Aggregator(&*node, sources),
            };
            dispatch(kind, topo, out);
        }
    }
}

fn dispatch(kind: JobKind<'_>, topo: &Topology<'_>, out: &mut Vec<JobId>) {
    match kind {
        JobKind::Root => {
            out.extend(
                topo.sink
                    .sources()
                    .iter()
                    .map(|s| s.node)
                    .chain(topo.always_playing.iter().copied())
                    .filter(|id| topo.arena.contains(*id))
                    .map(JobId::Node),
            );
        }
        JobKind::Node(node) => node_dependencies(node, topo, out),
        JobKind::Aggregator(node, sources) => {
            out.extend(
                sources
                    .iter()
                    .copied()
                    .filter(|id| topo.arena.contains(*id))
                    .map(JobId::Node),
            );
            node_dependencies(node, topo, out);
        }
    }
}

fn node_dependencies(node: &Node, topo: &Topology<'_>, out: &mut Vec<JobId>) {
    out.extend(
        node.producers()
            .filter(|id| topo.arena.contains(*id))
            .map(JobId::Node),
    );
}

/// Whether `job` depends on `target`, directly or transitively.
///
/// An edge making `target` depend on `job` closes a cycle exactly when this
/// is true.
pub(crate) fn depends_on(job: JobId, target: JobId, topo: &Topology<'_>) -> bool {
    if job == target {
        return true;
    }
    let mut seen = HashSet::new();
    let mut stack = vec![job];
    let mut deps = Vec::new();
    while let Some(current) = stack.pop() {
        if !seen.insert(current) {
            continue;
        }
        deps.clear();
        visit(current, topo, &mut deps);
        for dep in &deps {
            if *dep == target {
                return true;
            }
            stack.push(*dep);
        }
    }
    false
}
