//! Leveled execution plans.
//!
//! The planner turns the dependency graph under a root job into levels:
//! every job's level is one more than the highest level among its
//! dependencies, leaves sit at level 0 and the root at the top. Jobs within
//! a level never depend on each other, so a level can run in parallel as
//! long as the whole level finishes before the next one starts.
//!
//! # Caching
//!
//! The plan is cached as [`JobId`]s, which keep nothing alive. For each
//! block [`Planner::execute`] resolves the ids into a snapshot of node
//! handles, runs it, and clears it again so a node released between blocks
//! is not pinned by the plan. Any topology change calls
//! [`Planner::invalidate`]; a root different from the one the plan was built
//! for also forces a rebuild.
//!
//! Cycles are rejected when edges are created. A cycle reaching the planner
//! is a bug and trips a debug assertion.

use std::collections::HashMap;

use crate::arena::NodeCell;
use crate::dependency::{self, Topology};
use crate::error::GraphError;
use crate::job::{BlockContext, Job, JobId};
use crate::pool::WorkerPool;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PlanState {
    Invalid,
    Valid,
}

enum StrongJob {
    Root,
    Node(NodeCell),
}

impl StrongJob {
    fn tick(&self, ctx: &BlockContext<'_>) {
        match self {
            Self::Root => ctx.root.lock().tick(ctx),
            Self::Node(cell) => cell.lock().tick(ctx),
        }
    }
}

#[derive(Clone, Copy)]
enum Mark {
    InProgress,
    Done(usize),
}

struct Frame {
    job: JobId,
    deps: Vec<JobId>,
    next: usize,
    level: usize,
}

/// Builds, caches and runs leveled plans.
pub struct Planner {
    state: PlanState,
    root: Option<u64>,
    levels: Vec<Vec<JobId>>,
    snapshot: Vec<Vec<StrongJob>>,
    replans: u64,
    pool: WorkerPool,
}

impl Planner {
    /// A planner with no plan yet.
    pub fn new(threads: usize) -> Result<Self, GraphError> {
        Ok(Self {
            state: PlanState::Invalid,
            root: None,
            levels: Vec::new(),
            snapshot: Vec::new(),
            replans: 0,
            pool: WorkerPool::new(threads)?,
        })
    }

    /// Marks the cached plan stale.
    pub fn invalidate(&mut self) {
        self.state = PlanState::Invalid;
    }

    /// Whether the next block will reuse the cached plan.
    pub fn is_valid(&self) -> bool {
        self.state == PlanState::Valid
    }

    /// Times a plan has been built.
    pub fn replan_count(&self) -> u64 {
        self.replans
    }

    /// Cached plan, lowest level first.
    pub fn levels(&self) -> &[Vec<JobId>] {
        &self.levels
    }

    /// Worker threads in use.
    pub fn threads(&self) -> usize {
        self.pool.threads()
    }

    /// Changes the worker thread count.
    pub fn set_threads(&mut self, threads: usize) -> Result<(), GraphError> {
        self.pool.set_threads(threads)
    }

    /// Runs one block under the root identified by `root`.
    pub(crate) fn execute(&mut self, root: u64, topo: &Topology<'_>, ctx: &BlockContext<'_>) {
        if self.state == PlanState::Invalid || self.root != Some(root) {
            self.replan(root, topo);
        }
        if !self.materialize(topo) {
            tracing::warn!("plan referenced a dead node; replanning");
            self.replan(root, topo);
            if !self.materialize(topo) {
                tracing::warn!("dead nodes remain after replanning; skipping them");
            }
        }

        if self.pool.threads() == 1 {
            self.run_jobs_sync(ctx);
        } else {
            self.run_jobs_async(ctx);
        }

        for level in &mut self.snapshot {
            level.clear();
        }
    }

    /// Rebuilds the cached levels from `root`'s dependencies.
    pub(crate) fn replan(&mut self, root: u64, topo: &Topology<'_>) {
        self.levels.clear();
        let mut marks: HashMap<JobId, Mark> = HashMap::new();
        let mut stack = vec![Self::frame(JobId::Root, topo)];
        marks.insert(JobId::Root, Mark::InProgress);

        while let Some(top) = stack.last_mut() {
            if let Some(&dep) = top.deps.get(top.next) {
                top.next += 1;
                match marks.get(&dep) {
                    Some(Mark::Done(level)) => top.level = top.level.max(level + 1),
                    Some(Mark::InProgress) => {
                        #[cfg(debug_assertions)]
                        panic!("dependency cycle through {dep}");
                    }
                    None => {
                        if Self::is_culled(dep, topo) {
                            continue;
                        }
                        marks.insert(dep, Mark::InProgress);
                        stack.push(Self::frame(dep, topo));
                    }
                }
                continue;
            }

            let Some(done) = stack.pop() else { break };
            marks.insert(done.job, Mark::Done(done.level));
            if self.levels.len() <= done.level {
                self.levels.resize_with(done.level + 1, Vec::new);
            }
            self.levels[done.level].push(done.job);
            if let Some(parent) = stack.last_mut() {
                parent.level = parent.level.max(done.level + 1);
            }
        }

        self.root = Some(root);
        self.state = PlanState::Valid;
        self.replans += 1;
        tracing::debug!(
            levels = self.levels.len(),
            jobs = marks.len(),
            replans = self.replans,
            "replanned"
        );
    }

    fn frame(job: JobId, topo: &Topology<'_>) -> Frame {
        let mut deps = Vec::new();
        dependency::visit(job, topo, &mut deps);
        Frame {
            job,
            deps,
            next: 0,
            level: 0,
        }
    }

    fn is_culled(job: JobId, topo: &Topology<'_>) -> bool {
        match job {
            JobId::Root => false,
            JobId::Node(id) => topo.arena.get(id).is_none_or(|cell| cell.lock().can_cull()),
        }
    }

    /// Resolves the cached levels into strong handles. Returns `false` if
    /// any entry was dead.
    fn materialize(&mut self, topo: &Topology<'_>) -> bool {
        if self.snapshot.len() < self.levels.len() {
            self.snapshot.resize_with(self.levels.len(), Vec::new);
        }
        let mut all_alive = true;
        for (ids, strong) in self.levels.iter().zip(&mut self.snapshot) {
            strong.clear();
            for id in ids {
                match id {
                    JobId::Root => strong.push(StrongJob::Root),
                    JobId::Node(node) => match topo.arena.get(*node) {
                        Some(cell) => strong.push(StrongJob::Node(cell.clone())),
                        None => all_alive = false,
                    },
                }
            }
        }
        for extra in self.snapshot.iter_mut().skip(self.levels.len()) {
            extra.clear();
        }
        all_alive
    }

    /// Ticks each level in order on the calling thread.
    fn run_jobs_sync(&self, ctx: &BlockContext<'_>) {
        for level in &self.snapshot {
            for job in level {
                job.tick(ctx);
            }
        }
    }

    /// Ticks each level across the worker pool; the end of each level is a
    /// barrier.
    fn run_jobs_async(&self, ctx: &BlockContext<'_>) {
        for level in &self.snapshot {
            self.pool.run_level(level, |job| job.tick(ctx));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::NodeArena;
    use crate::connection::{self, InputConnection, InputRef, OutputRef};
    use crate::job::tests::Fixture;
    use crate::node::{Node, NodeId, NodeState};
    use crate::processors::{Constant, Gain};

    fn add(arena: &mut NodeArena, source: bool) -> NodeId {
        let id = arena.reserve();
        let mut node = if source {
            Node::new(id, Box::new(Constant::new(1.0)), 0, 1, 4)
        } else {
            Node::new(id, Box::new(Gain::new(1.0)), 1, 1, 4)
        };
        node.append_input_connection(0, 1);
        node.append_output_connection(0, 1);
        arena.insert(id, node);
        id
    }

    fn link(arena: &NodeArena, from: NodeId, to: NodeId) {
        let mut a = arena.get(from).unwrap().lock();
        let mut b = arena.get(to).unwrap().lock();
        connection::connect_pair(
            a.output_connection_mut(0).unwrap(),
            OutputRef { node: from, connection: 0 },
            b.input_connection_mut(0).unwrap(),
            InputRef::Node { node: to, connection: 0 },
        );
    }

    fn level_of(planner: &Planner, job: JobId) -> Option<usize> {
        planner.levels().iter().position(|l| l.contains(&job))
    }

    #[test]
    fn test_chain_levels_increase_toward_root() {
        let mut arena = NodeArena::new();
        let a = add(&mut arena, true);
        let b = add(&mut arena, false);
        link(&arena, a, b);
        let mut sink = InputConnection::new(0, 1);
        sink.connect_half(OutputRef { node: b, connection: 0 });
        let topo = Topology {
            arena: &arena,
            sink: &sink,
            always_playing: &[],
        };

        let mut planner = Planner::new(1).unwrap();
        planner.replan(1, &topo);
        assert_eq!(level_of(&planner, JobId::Node(a)), Some(0));
        assert_eq!(level_of(&planner, JobId::Node(b)), Some(1));
        assert_eq!(level_of(&planner, JobId::Root), Some(2));
        assert_eq!(planner.replan_count(), 1);
    }

    #[test]
    fn test_longest_path_leveling() {
        // a -> b -> c -> sink, and a -> c directly.
        let mut arena = NodeArena::new();
        let a = add(&mut arena, true);
        let b = add(&mut arena, false);
        let c = add(&mut arena, false);
        link(&arena, a, b);
        link(&arena, b, c);
        link(&arena, a, c);
        let mut sink = InputConnection::new(0, 1);
        sink.connect_half(OutputRef { node: c, connection: 0 });
        let topo = Topology {
            arena: &arena,
            sink: &sink,
            always_playing: &[],
        };

        let mut planner = Planner::new(1).unwrap();
        planner.replan(1, &topo);
        assert_eq!(level_of(&planner, JobId::Node(c)), Some(2));
        let total: usize = planner.levels().iter().map(Vec::len).sum();
        assert_eq!(total, 4, "each job appears once");
    }

    #[test]
    fn test_paused_subgraph_is_culled() {
        let mut arena = NodeArena::new();
        let a = add(&mut arena, true);
        let b = add(&mut arena, false);
        link(&arena, a, b);
        arena.get(b).unwrap().lock().set_state(NodeState::Paused);
        let mut sink = InputConnection::new(0, 1);
        sink.connect_half(OutputRef { node: b, connection: 0 });
        let topo = Topology {
            arena: &arena,
            sink: &sink,
            always_playing: &[],
        };

        let mut planner = Planner::new(1).unwrap();
        planner.replan(1, &topo);
        assert_eq!(planner.levels(), &[vec![JobId::Root]]);
    }

    #[test]
    fn test_execute_caches_until_invalidated() {
        let mut fixture = Fixture::new();
        let a = add(&mut fixture.arena, true);
        let mut sink = InputConnection::new(0, 1);
        sink.connect_half(OutputRef { node: a, connection: 0 });

        let mut planner = Planner::new(1).unwrap();
        for tick in 0..3 {
            let topo = Topology {
                arena: &fixture.arena,
                sink: &sink,
                always_playing: &[],
            };
            planner.execute(1, &topo, &fixture.ctx(tick, 4));
        }
        assert_eq!(planner.replan_count(), 1);
        assert!(planner.is_valid());

        planner.invalidate();
        let topo = Topology {
            arena: &fixture.arena,
            sink: &sink,
            always_playing: &[],
        };
        planner.execute(1, &topo, &fixture.ctx(3, 4));
        assert_eq!(planner.replan_count(), 2);

        planner.execute(2, &topo, &fixture.ctx(4, 4));
        assert_eq!(planner.replan_count(), 3, "new root forces replan");
        assert!(planner.snapshot.iter().all(Vec::is_empty), "snapshot released");
        assert_eq!(fixture.arena.get(a).unwrap().lock().last_processed(), Some(4));
    }

    #[test]
    fn test_dead_entry_triggers_replan() {
        let mut fixture = Fixture::new();
        let a = add(&mut fixture.arena, true);
        let mut sink = InputConnection::new(0, 1);
        sink.connect_half(OutputRef { node: a, connection: 0 });
        let mut planner = Planner::new(1).unwrap();
        {
            let topo = Topology {
                arena: &fixture.arena,
                sink: &sink,
                always_playing: &[],
            };
            planner.execute(1, &topo, &fixture.ctx(0, 4));
        }

        fixture.arena.remove(a);
        let topo = Topology {
            arena: &fixture.arena,
            sink: &sink,
            always_playing: &[],
        };
        planner.execute(1, &topo, &fixture.ctx(1, 4));
        assert_eq!(planner.replan_count(), 2);
        assert_eq!(planner.levels(), &[vec![JobId::Root]]);
    }
}
