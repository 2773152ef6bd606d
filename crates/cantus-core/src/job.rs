//! Schedulable units of per-block work.
//!
//! A [`Job`] is anything the planner can run once per block: every node,
//! plus the simulation's own [`RootJob`]. [`Job::tick`] is the idempotence
//! wrapper; it compares the job's stamp with the current block counter so a
//! job reached through several paths in one block still executes once.

use std::fmt;

use parking_lot::Mutex;

use crate::arena::NodeArena;
use crate::mixing::MixingMatrices;
use crate::node::NodeId;
use crate::scratch::ScratchPool;

/// Everything a job may read while a block is being rendered.
///
/// Topology is frozen for the lifetime of a context: it borrows the arena
/// immutably, and every mutation path needs `&mut Simulation`.
pub struct BlockContext<'a> {
    pub(crate) arena: &'a NodeArena,
    pub(crate) mixing: &'a MixingMatrices,
    pub(crate) scratch: &'a ScratchPool,
    pub(crate) root: &'a Mutex<RootJob>,
    pub(crate) tick: u64,
    pub(crate) block_size: usize,
    pub(crate) sample_rate: f32,
    pub(crate) time: f64,
}

impl BlockContext<'_> {
    /// Block counter identifying the block being rendered.
    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Frames per block.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Sample rate in Hz.
    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    /// Simulation time at the start of the block, in seconds.
    pub fn time(&self) -> f64 {
        self.time
    }
}

/// A unit of work the planner can schedule.
pub trait Job {
    /// Whether the job may be left out of this block's plan.
    fn can_cull(&self) -> bool;

    /// Block counter of the last execution, `None` before the first.
    fn last_processed(&self) -> Option<u64>;

    /// Stores the block counter of an execution.
    fn set_last_processed(&mut self, tick: u64);

    /// Performs the job's work for the current block.
    fn execute(&mut self, ctx: &BlockContext<'_>);

    /// Runs [`execute`](Self::execute) unless it already ran this block.
    fn tick(&mut self, ctx: &BlockContext<'_>) {
        if self.last_processed() == Some(ctx.tick) {
            return;
        }
        self.execute(ctx);
        self.set_last_processed(ctx.tick);
    }
}

/// Identity of a job inside a plan.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum JobId {
    /// The simulation itself.
    Root,
    /// A node.
    Node(NodeId),
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Root => f.write_str("root"),
            Self::Node(id) => write!(f, "{id}"),
        }
    }
}

/// The simulation's own job. It does no work of its own; it exists so the
/// plan has a top level that depends on the sink producers.
#[derive(Debug, Default)]
pub struct RootJob {
    last_processed: Option<u64>,
}

impl Job for RootJob {
    fn can_cull(&self) -> bool {
        false
    }

    fn last_processed(&self) -> Option<u64> {
        self.last_processed
    }

    fn set_last_processed(&mut self, tick: u64) {
        self.last_processed = Some(tick);
    }

    fn execute(&mut self, _ctx: &BlockContext<'_>) {}
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Owns everything a [`BlockContext`] borrows.
    pub(crate) struct Fixture {
        pub arena: NodeArena,
        pub mixing: MixingMatrices,
        pub scratch: ScratchPool,
        pub root: Mutex<RootJob>,
    }

    impl Fixture {
        pub fn new() -> Self {
            Self {
                arena: NodeArena::new(),
                mixing: MixingMatrices::with_defaults(),
                scratch: ScratchPool::new(1),
                root: Mutex::new(RootJob::default()),
            }
        }

        pub fn ctx(&self, tick: u64, block_size: usize) -> BlockContext<'_> {
            BlockContext {
                arena: &self.arena,
                mixing: &self.mixing,
                scratch: &self.scratch,
                root: &self.root,
                tick,
                block_size,
                sample_rate: 44100.0,
                time: 0.0,
            }
        }
    }

    struct Counting {
        runs: usize,
        last: Option<u64>,
    }

    impl Job for Counting {
        fn can_cull(&self) -> bool {
            false
        }
        fn last_processed(&self) -> Option<u64> {
            self.last
        }
        fn set_last_processed(&mut self, tick: u64) {
            self.last = Some(tick);
        }
        fn execute(&mut self, _ctx: &BlockContext<'_>) {
            self.runs += 1;
        }
    }

    #[test]
    fn test_tick_is_idempotent_per_block() {
        let fixture = Fixture::new();
        let mut job = Counting { runs: 0, last: None };
        job.tick(&fixture.ctx(0, 4));
        job.tick(&fixture.ctx(0, 4));
        assert_eq!(job.runs, 1);
        job.tick(&fixture.ctx(1, 4));
        assert_eq!(job.runs, 2);
        assert_eq!(job.last_processed(), Some(1));
    }

    #[test]
    fn test_root_job_is_never_culled() {
        let fixture = Fixture::new();
        let mut root = RootJob::default();
        assert!(!root.can_cull());
        root.tick(&fixture.ctx(7, 4));
        assert_eq!(root.last_processed(), Some(7));
        assert_eq!(JobId::Root.to_string(), "root");
    }
}
