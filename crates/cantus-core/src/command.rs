//! Deferred graph mutations.
//!
//! Anything that cannot hold `&mut Simulation` (processor hooks, other
//! threads) sends a closure through a [`CommandSender`]. The simulation
//! drains the queue at the start of each block and again right after the
//! will-tick hooks, so a mutation never lands while the planner runs.

use crossbeam_channel::{Receiver, Sender};

use crate::error::GraphError;
use crate::simulation::Simulation;

/// A queued mutation.
pub type Command = Box<dyn FnOnce(&mut Simulation) + Send>;

/// Cloneable handle for queueing mutations on one simulation.
#[derive(Clone)]
pub struct CommandSender {
    tx: Sender<Command>,
}

impl std::fmt::Debug for CommandSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandSender")
            .field("pending", &self.tx.len())
            .finish()
    }
}

impl CommandSender {
    /// Queues `command` for the next drain point.
    pub fn send(&self, command: impl FnOnce(&mut Simulation) + Send + 'static) -> Result<(), GraphError> {
        self.tx
            .send(Box::new(command))
            .map_err(|_| GraphError::SimulationGone)
    }

    /// Commands waiting to be applied.
    pub fn pending(&self) -> usize {
        self.tx.len()
    }
}

/// Receiving side, owned by the simulation.
pub(crate) struct CommandQueue {
    tx: Sender<Command>,
    rx: Receiver<Command>,
}

impl CommandQueue {
    pub(crate) fn new() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self { tx, rx }
    }

    pub(crate) fn sender(&self) -> CommandSender {
        CommandSender { tx: self.tx.clone() }
    }

    /// Commands queued right now. Anything a command queues while the batch
    /// runs waits for the next drain.
    pub(crate) fn batch(&self) -> Vec<Command> {
        let pending = self.rx.len();
        self.rx.try_iter().take(pending).collect()
    }
}
