//! Cantus Core - graph scheduling for block-based audio
//!
//! This crate renders a dynamically reconfigurable graph of audio nodes one
//! fixed-size block at a time, in dependency order, optionally spreading
//! independent nodes across worker threads.
//!
//! # Core Abstractions
//!
//! ## Jobs and Nodes
//!
//! - [`Job`] - Schedulable unit with a per-block idempotent [`tick`](Job::tick)
//! - [`Node`] - A job owning audio buffers and connections, wrapping a [`Processor`]
//! - [`Processor`] - The DSP surface a node delegates to
//!
//! ## Connections
//!
//! - [`OutputConnection`] / [`InputConnection`] - Channel-ranged edge halves
//! - [`MixingMatrices`] - Channel-count conversion on fan-in
//!
//! ## Scheduling
//!
//! - [`Planner`] - Leveled plans, run serially or on a worker pool
//! - [`Simulation`] - Root clock, node ownership and the graph-mutation API
//! - [`CommandSender`] - Deferred mutations from hooks and other threads
//! - [`BackgroundWorker`] - Non-real-time task thread
//!
//! # Example
//!
//! ```rust
//! use cantus_core::{Simulation, SimulationConfig};
//! use cantus_core::processors::Constant;
//!
//! let mut sim = Simulation::new(SimulationConfig::new(44100.0, 512))?;
//! let a = sim.add_node(Box::new(Constant::new(0.5)), 0, 1);
//! let b = sim.add_node(Box::new(Constant::new(0.25)), 0, 1);
//! sim.connect_sink(a, 0)?;
//! sim.connect_sink(b, 0)?;
//!
//! let mut block = vec![0.0; 512];
//! sim.get_block(&mut block, 1, true)?;
//! assert!(block.iter().all(|s| *s == 0.75));
//! # Ok::<(), cantus_core::GraphError>(())
//! ```

pub mod arena;
pub mod buffer;
pub mod command;
pub mod config;
pub mod connection;
mod dependency;
pub mod error;
pub mod job;
pub mod mixing;
pub mod node;
pub mod planner;
pub mod pool;
pub mod processors;
pub mod property;
pub mod scratch;
pub mod simulation;
pub mod tasks;

pub use arena::{NodeArena, NodeCell};
pub use command::{Command, CommandSender};
pub use config::{BLOCK_GRANULARITY, SimulationConfig};
pub use connection::{InputConnection, InputRef, OutputConnection, OutputRef};
pub use error::GraphError;
pub use job::{BlockContext, Job, JobId, RootJob};
pub use mixing::{MixingMatrices, MixingMatrixSource};
pub use node::{HookContext, Node, NodeId, NodeKind, NodeState, ProcessContext, Processor};
pub use planner::Planner;
pub use pool::WorkerPool;
pub use property::{Property, PropertyDescriptor, PropertyView};
pub use scratch::{ScratchPool, Workspace};
pub use simulation::{BlockCallback, ScheduledCallback, Simulation};
pub use tasks::{BackgroundWorker, Task, TaskQueue, TaskSender};
