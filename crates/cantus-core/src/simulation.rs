//! The root clock.
//!
//! A [`Simulation`] owns every node, the terminal sink connection, the
//! planner and the weak registries that feed it. One call to
//! [`get_block`](Simulation::get_block) renders one block:
//!
//! 1. call the block observer with the elapsed time
//! 2. apply queued commands
//! 3. size and zero the sink buffers for the requested channel count
//! 4. run will-tick hooks, then apply any commands they queued
//! 5. run the plan
//! 6. pull the sink and interleave it into the destination
//! 7. advance time by one block
//! 8. service a staggered share of the maintenance registry
//! 9. bump the block counter
//! 10. fire scheduled calls that have come due
//!
//! A call with no channels or an empty destination only applies queued
//! commands, then skips to step 7 so the clock keeps pace with the host.
//!
//! # Mutation
//!
//! Every topology mutator takes `&mut self` and invalidates the cached plan.
//! Code that cannot get `&mut Simulation` (processor hooks, other threads)
//! queues closures through [`Simulation::commands`]. A device thread shares
//! the simulation as `Arc<parking_lot::Mutex<Simulation>>`; holding that
//! lock is what makes a mutation safe with respect to rendering.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::arena::{NodeArena, NodeCell};
use crate::buffer;
use crate::command::{CommandQueue, CommandSender};
use crate::config::SimulationConfig;
use crate::connection::{self, InputConnection, InputRef, OutputRef};
use crate::dependency::{self, Topology};
use crate::error::GraphError;
use crate::job::{BlockContext, Job, JobId, RootJob};
use crate::mixing::MixingMatrices;
use crate::node::{HookContext, Node, NodeId, NodeKind, NodeState, Processor};
use crate::planner::Planner;
use crate::scratch::ScratchPool;
use crate::tasks::{BackgroundWorker, Task};

static NEXT_SIMULATION_ID: AtomicU64 = AtomicU64::new(1);

/// Observer called at the start of each block with the seconds elapsed
/// since it was installed.
pub type BlockCallback = Box<dyn FnMut(&Simulation, f64) + Send>;

/// Callback fired from the block loop once its time has come.
pub type ScheduledCallback = Box<dyn FnOnce(&mut Simulation) + Send>;

struct BlockObserver {
    callback: BlockCallback,
    installed_at: f64,
}

enum ScheduledAction {
    Audio(ScheduledCallback),
    Background(Task),
}

struct ScheduledCall {
    due: f64,
    seq: u64,
    action: ScheduledAction,
}

/// Connections removed from a node, with the far half of each edge.
struct Detached {
    outputs: Vec<(OutputRef, Vec<InputRef>)>,
    inputs: Vec<(OutputRef, InputRef)>,
}

fn detach_all(node: &mut Node) -> Detached {
    let id = node.id();
    let outputs = node
        .output_connections_mut()
        .iter_mut()
        .enumerate()
        .map(|(connection, c)| (OutputRef { node: id, connection }, c.clear()))
        .collect();

    let mut inputs = Vec::new();
    for (connection, c) in node.input_connections_mut().iter_mut().enumerate() {
        let target = InputRef::Node { node: id, connection };
        inputs.extend(c.clear().into_iter().map(|src| (src, target)));
    }
    for (property, p) in node.properties_mut().iter_mut().enumerate() {
        let target = InputRef::Property { node: id, property };
        inputs.extend(p.automation_mut().clear().into_iter().map(|src| (src, target)));
    }
    Detached { outputs, inputs }
}

/// A graph of nodes rendered one block at a time.
pub struct Simulation {
    id: u64,
    config: SimulationConfig,
    arena: NodeArena,
    root: Mutex<RootJob>,
    sink: InputConnection,
    sink_buffers: Vec<Vec<f32>>,
    will_tick: Vec<NodeId>,
    always_playing: Vec<NodeId>,
    maintenance: Vec<NodeId>,
    planner: Planner,
    scratch: ScratchPool,
    mixing: MixingMatrices,
    tick_count: u64,
    time: f64,
    maintenance_start: u64,
    scheduled: Vec<ScheduledCall>,
    next_seq: u64,
    block_observer: Option<BlockObserver>,
    commands: CommandQueue,
    worker: BackgroundWorker,
}

impl std::fmt::Debug for Simulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulation")
            .field("id", &self.id)
            .field("config", &self.config)
            .field("nodes", &self.arena.len())
            .field("tick_count", &self.tick_count)
            .field("time", &self.time)
            .finish_non_exhaustive()
    }
}

impl Simulation {
    /// Creates a simulation and starts its background thread.
    pub fn new(config: SimulationConfig) -> Result<Self, GraphError> {
        config.validate()?;
        let sim = Self {
            id: NEXT_SIMULATION_ID.fetch_add(1, Ordering::Relaxed),
            config,
            arena: NodeArena::new(),
            root: Mutex::new(RootJob::default()),
            sink: InputConnection::new(0, 0),
            sink_buffers: Vec::new(),
            will_tick: Vec::new(),
            always_playing: Vec::new(),
            maintenance: Vec::new(),
            planner: Planner::new(config.threads)?,
            scratch: ScratchPool::new(config.threads),
            mixing: MixingMatrices::with_defaults(),
            tick_count: 0,
            time: 0.0,
            maintenance_start: 0,
            scheduled: Vec::new(),
            next_seq: 0,
            block_observer: None,
            commands: CommandQueue::new(),
            worker: BackgroundWorker::spawn()?,
        };
        tracing::info!(
            sample_rate = config.sample_rate,
            block_size = config.block_size,
            threads = config.threads,
            "simulation created"
        );
        Ok(sim)
    }

    // ---- accessors ----

    /// Construction parameters, with the current thread count.
    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Sample rate in Hz.
    pub fn sample_rate(&self) -> f32 {
        self.config.sample_rate
    }

    /// Frames per block.
    pub fn block_size(&self) -> usize {
        self.config.block_size
    }

    /// Blocks rendered so far.
    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    /// Seconds rendered so far.
    pub fn time(&self) -> f64 {
        self.time
    }

    /// Worker threads used by the planner.
    pub fn threads(&self) -> usize {
        self.planner.threads()
    }

    /// Live nodes.
    pub fn node_count(&self) -> usize {
        self.arena.len()
    }

    /// Whether `id` names a live node.
    pub fn is_alive(&self, id: NodeId) -> bool {
        self.arena.contains(id)
    }

    /// Times a plan has been built.
    pub fn replan_count(&self) -> u64 {
        self.planner.replan_count()
    }

    /// The cached plan, lowest level first. Empty before the first block.
    pub fn plan_levels(&self) -> &[Vec<JobId>] {
        self.planner.levels()
    }

    /// Forces the next block to rebuild the plan.
    pub fn invalidate_plan(&mut self) {
        self.planner.invalidate();
    }

    /// Registered mixing matrices.
    pub fn mixing_matrices(&self) -> &MixingMatrices {
        &self.mixing
    }

    /// Mutable access to the mixing matrices.
    pub fn mixing_matrices_mut(&mut self) -> &mut MixingMatrices {
        &mut self.mixing
    }

    /// Handle for queueing mutations from outside `&mut self`.
    pub fn commands(&self) -> CommandSender {
        self.commands.sender()
    }

    /// Background tasks that panicked.
    pub fn background_failures(&self) -> u64 {
        self.worker.failures()
    }

    /// Background tasks that completed.
    pub fn background_completed(&self) -> u64 {
        self.worker.completed()
    }

    /// Producers connected to the sink.
    pub fn sink_sources(&self) -> &[OutputRef] {
        self.sink.sources()
    }

    fn cell(&self, id: NodeId) -> Result<NodeCell, GraphError> {
        self.arena.get(id).cloned().ok_or(GraphError::NodeNotFound(id))
    }

    /// Runs `f` with read access to a node.
    pub fn with_node<R>(&self, id: NodeId, f: impl FnOnce(&Node) -> R) -> Result<R, GraphError> {
        let cell = self.arena.get(id).ok_or(GraphError::NodeNotFound(id))?;
        let node = cell.lock();
        Ok(f(&node))
    }

    // ---- node lifecycle ----

    fn insert_node(&mut self, processor: Box<dyn Processor>, inputs: usize, outputs: usize, kind: NodeKind) -> NodeId {
        let id = self.arena.reserve();
        let mut node = Node::new(id, processor, inputs, outputs, self.config.block_size);
        if inputs > 0 {
            node.append_input_connection(0, inputs);
        }
        if outputs > 0 {
            node.append_output_connection(0, outputs);
        }
        *node.kind_mut() = kind;
        tracing::debug!(node = %id, name = node.name(), inputs, outputs, "node added");
        self.arena.insert(id, node);
        self.planner.invalidate();
        id
    }

    /// Adds a node with one input connection spanning all inputs and one
    /// output connection spanning all outputs (each omitted when its channel
    /// count is zero). The caller holds the returned id's single reference.
    pub fn add_node(&mut self, processor: Box<dyn Processor>, inputs: usize, outputs: usize) -> NodeId {
        self.insert_node(processor, inputs, outputs, NodeKind::Standard)
    }

    /// Adds a node that also depends on a registry of source nodes.
    pub fn add_aggregator(&mut self, processor: Box<dyn Processor>, inputs: usize, outputs: usize) -> NodeId {
        self.insert_node(processor, inputs, outputs, NodeKind::Aggregator { sources: Vec::new() })
    }

    /// Adds an external reference to a node.
    pub fn retain(&mut self, id: NodeId) -> Result<(), GraphError> {
        if self.arena.retain_owner(id) {
            Ok(())
        } else {
            Err(GraphError::NodeNotFound(id))
        }
    }

    /// Drops an external reference. The last reference of any kind frees
    /// the node, which in turn drops its references to its producers.
    ///
    /// Holds taken by edges are untouched: a node the sink or a consumer
    /// still pulls from stays alive after its last external release.
    pub fn release(&mut self, id: NodeId) -> Result<(), GraphError> {
        match self.arena.release_owner(id) {
            Some(true) => self.destroy(id),
            Some(false) => {}
            None if self.arena.contains(id) => return Err(GraphError::NotOwned(id)),
            None => return Err(GraphError::NodeNotFound(id)),
        }
        Ok(())
    }

    fn release_holder(&mut self, id: NodeId) {
        if self.arena.release(id) {
            self.destroy(id);
        }
    }

    fn destroy(&mut self, id: NodeId) {
        let mut pending = vec![id];
        while let Some(id) = pending.pop() {
            let Some(cell) = self.arena.remove(id) else {
                continue;
            };
            let detached = detach_all(&mut cell.lock());
            drop(cell);
            for (src, targets) in detached.outputs {
                for target in targets {
                    self.detach_input(target, src);
                }
            }
            for (src, target) in detached.inputs {
                self.detach_output(src, target);
                if self.arena.release(src.node) {
                    pending.push(src.node);
                }
            }
            tracing::debug!(node = %id, "node freed");
        }
        self.planner.invalidate();
    }

    /// Drops every connection of a node in both directions.
    ///
    /// Producers lose the reference this node held on them. If the node was
    /// only kept alive by its consumers it is freed as well.
    pub fn isolate(&mut self, id: NodeId) -> Result<(), GraphError> {
        let cell = self.cell(id)?;
        let detached = detach_all(&mut cell.lock());
        drop(cell);

        for (src, target) in detached.inputs {
            self.detach_output(src, target);
            self.release_holder(src.node);
        }
        let mut lost = 0;
        for (src, targets) in detached.outputs {
            for target in targets {
                if self.detach_input(target, src) {
                    lost += 1;
                }
            }
        }
        for _ in 0..lost {
            self.release_holder(id);
        }
        self.planner.invalidate();
        tracing::debug!(node = %id, "node isolated");
        Ok(())
    }

    // ---- shape ----

    /// Adds an input connection over channels `start..start + count`.
    pub fn append_input_connection(&mut self, id: NodeId, start: usize, count: usize) -> Result<usize, GraphError> {
        let index = self.cell(id)?.lock().append_input_connection(start, count);
        self.planner.invalidate();
        Ok(index)
    }

    /// Adds an output connection over channels `start..start + count`.
    pub fn append_output_connection(&mut self, id: NodeId, start: usize, count: usize) -> Result<usize, GraphError> {
        let index = self.cell(id)?.lock().append_output_connection(start, count);
        self.planner.invalidate();
        Ok(index)
    }

    /// Reallocates a node's buffers. Growth is zero-filled.
    pub fn resize(&mut self, id: NodeId, inputs: usize, outputs: usize) -> Result<(), GraphError> {
        self.cell(id)?.lock().resize(inputs, outputs);
        self.planner.invalidate();
        Ok(())
    }

    // ---- edges ----

    fn check_acyclic(&self, from: NodeId, to: NodeId) -> Result<(), GraphError> {
        let topo = self.topology();
        if dependency::depends_on(JobId::Node(from), JobId::Node(to), &topo) {
            return Err(GraphError::CycleDetected { from, to });
        }
        Ok(())
    }

    fn topology(&self) -> Topology<'_> {
        Topology {
            arena: &self.arena,
            sink: &self.sink,
            always_playing: &self.always_playing,
        }
    }

    fn link(&mut self, from: OutputRef, to: InputRef) -> Result<(), GraphError> {
        let producer_cell = self.cell(from.node)?;
        let consumer_cell = to.node().map(|n| self.cell(n)).transpose()?;
        let mut producer = producer_cell.lock();
        let output = producer.output_connection_mut(from.connection)?;
        let fresh = match (to, &consumer_cell) {
            (InputRef::Sink, _) => connection::connect_pair(output, from, &mut self.sink, to),
            (InputRef::Node { connection, .. }, Some(cell)) => {
                let mut consumer = cell.lock();
                connection::connect_pair(output, from, consumer.input_connection_mut(connection)?, to)
            }
            (InputRef::Property { property, .. }, Some(cell)) => {
                let mut consumer = cell.lock();
                connection::connect_pair(output, from, consumer.property_mut(property)?.automation_mut(), to)
            }
            _ => false,
        };
        drop(producer);
        if fresh {
            self.arena.retain(from.node);
        }
        self.planner.invalidate();
        Ok(())
    }

    fn check_input(&self, id: NodeId, connection: usize) -> Result<(), GraphError> {
        let len = self.cell(id)?.lock().input_connections().len();
        if connection >= len {
            return Err(GraphError::range("input connection", connection, len));
        }
        Ok(())
    }

    fn check_output(&self, id: NodeId, connection: usize) -> Result<(), GraphError> {
        let len = self.cell(id)?.lock().output_connections().len();
        if connection >= len {
            return Err(GraphError::range("output connection", connection, len));
        }
        Ok(())
    }

    fn check_property(&self, id: NodeId, property: usize) -> Result<(), GraphError> {
        let len = self.cell(id)?.lock().properties().len();
        if property >= len {
            return Err(GraphError::range("property", property, len));
        }
        Ok(())
    }

    /// Feeds output connection `output` of `from` into input connection
    /// `input` of `to`. Rejects edges that would close a cycle.
    pub fn connect(&mut self, from: NodeId, output: usize, to: NodeId, input: usize) -> Result<(), GraphError> {
        self.check_output(from, output)?;
        self.check_input(to, input)?;
        self.check_acyclic(from, to)?;
        self.link(
            OutputRef { node: from, connection: output },
            InputRef::Node { node: to, connection: input },
        )?;
        tracing::debug!("connect: {from}[{output}] -> {to}[{input}]");
        Ok(())
    }

    /// Feeds output connection `output` of `from` into the sink.
    pub fn connect_sink(&mut self, from: NodeId, output: usize) -> Result<(), GraphError> {
        self.check_output(from, output)?;
        self.link(OutputRef { node: from, connection: output }, InputRef::Sink)?;
        tracing::debug!("connect: {from}[{output}] -> sink");
        Ok(())
    }

    /// Drives property `property` of `to` from output `output` of `from`.
    /// The automation edge orders `from` before `to` like any data edge.
    pub fn connect_property(&mut self, from: NodeId, output: usize, to: NodeId, property: usize) -> Result<(), GraphError> {
        self.check_output(from, output)?;
        self.check_property(to, property)?;
        self.check_acyclic(from, to)?;
        self.link(
            OutputRef { node: from, connection: output },
            InputRef::Property { node: to, property },
        )?;
        tracing::debug!("connect: {from}[{output}] -> {to}.property[{property}]");
        Ok(())
    }

    /// Removes `src` from the consumer half named by `target`.
    fn detach_input(&mut self, target: InputRef, src: OutputRef) -> bool {
        match target {
            InputRef::Sink => self.sink.disconnect_half(&src),
            InputRef::Node { node, connection } => self.arena.get(node).is_some_and(|cell| {
                cell.lock()
                    .input_connections_mut()
                    .get_mut(connection)
                    .is_some_and(|c| c.disconnect_half(&src))
            }),
            InputRef::Property { node, property } => self.arena.get(node).is_some_and(|cell| {
                cell.lock()
                    .properties_mut()
                    .get_mut(property)
                    .is_some_and(|p| p.automation_mut().disconnect_half(&src))
            }),
        }
    }

    /// Removes `target` from the producer half named by `src`.
    fn detach_output(&mut self, src: OutputRef, target: InputRef) {
        if let Some(cell) = self.arena.get(src.node) {
            if let Some(c) = cell.lock().output_connections_mut().get_mut(src.connection) {
                c.disconnect_half(&target);
            }
        }
    }

    /// Removes every edge leaving output connection `output` of `from`.
    pub fn disconnect(&mut self, from: NodeId, output: usize) -> Result<(), GraphError> {
        let targets = self.cell(from)?.lock().output_connection_mut(output)?.clear();
        let src = OutputRef { node: from, connection: output };
        let mut removed = 0;
        for target in targets {
            if self.detach_input(target, src) {
                removed += 1;
            }
        }
        for _ in 0..removed {
            self.release_holder(from);
        }
        self.planner.invalidate();
        tracing::debug!("disconnect: {from}[{output}] ({removed} edges)");
        Ok(())
    }

    /// Removes the single edge from output `output` of `from` to `target`.
    /// Returns whether it existed.
    pub fn disconnect_target(&mut self, from: NodeId, output: usize, target: InputRef) -> Result<bool, GraphError> {
        self.cell(from)?.lock().output_connection_mut(output)?.disconnect_half(&target);
        let src = OutputRef { node: from, connection: output };
        let removed = self.detach_input(target, src);
        if removed {
            self.release_holder(from);
        }
        self.planner.invalidate();
        Ok(removed)
    }

    /// Registers `source` with an aggregator. The aggregator then runs after
    /// the source without holding a reference to it.
    pub fn register_source(&mut self, aggregator: NodeId, source: NodeId) -> Result<(), GraphError> {
        let cell = self.cell(aggregator)?;
        if !self.arena.contains(source) {
            return Err(GraphError::NodeNotFound(source));
        }
        if !matches!(cell.lock().kind(), NodeKind::Aggregator { .. }) {
            return Err(GraphError::NotAggregator(aggregator));
        }
        self.check_acyclic(source, aggregator)?;
        if let NodeKind::Aggregator { sources } = cell.lock().kind_mut() {
            if !sources.contains(&source) {
                sources.push(source);
            }
        }
        self.planner.invalidate();
        Ok(())
    }

    /// Removes `source` from an aggregator. Returns whether it was registered.
    pub fn unregister_source(&mut self, aggregator: NodeId, source: NodeId) -> Result<bool, GraphError> {
        let cell = self.cell(aggregator)?;
        let mut node = cell.lock();
        let NodeKind::Aggregator { sources } = node.kind_mut() else {
            return Err(GraphError::NotAggregator(aggregator));
        };
        let before = sources.len();
        sources.retain(|s| *s != source);
        let removed = sources.len() != before;
        drop(node);
        self.planner.invalidate();
        Ok(removed)
    }

    // ---- state and properties ----

    /// Current scheduling state.
    pub fn state(&self, id: NodeId) -> Result<NodeState, GraphError> {
        Ok(self.cell(id)?.lock().state())
    }

    /// Changes scheduling state. Always-playing nodes join the registry the
    /// root depends on.
    pub fn set_state(&mut self, id: NodeId, state: NodeState) -> Result<(), GraphError> {
        self.cell(id)?.lock().set_state(state);
        if state == NodeState::AlwaysPlaying {
            if !self.always_playing.contains(&id) {
                self.always_playing.push(id);
            }
        } else {
            self.always_playing.retain(|n| *n != id);
        }
        self.planner.invalidate();
        Ok(())
    }

    /// Whether the node sat out the most recent block.
    pub fn is_suspended(&self, id: NodeId) -> Result<bool, GraphError> {
        let last = self.cell(id)?.lock().last_processed();
        Ok(self.tick_count == 0 || last != Some(self.tick_count - 1))
    }

    /// Sets a property's scalar value, clamped to its range. Returns the
    /// stored value.
    pub fn set_property(&mut self, id: NodeId, slot: usize, value: f32) -> Result<f32, GraphError> {
        Ok(self.cell(id)?.lock().property_mut(slot)?.set_value(value))
    }

    /// A property's scalar value.
    pub fn property(&self, id: NodeId, slot: usize) -> Result<f32, GraphError> {
        let cell = self.cell(id)?;
        let node = cell.lock();
        node.properties()
            .get(slot)
            .map(|p| p.value())
            .ok_or(GraphError::range("property", slot, node.properties().len()))
    }

    /// Sets the multiplier applied to a node's outputs after processing.
    pub fn set_mul(&mut self, id: NodeId, mul: f32) -> Result<(), GraphError> {
        self.cell(id)?.lock().set_mul(mul);
        Ok(())
    }

    /// Resets a node's processor and properties.
    pub fn reset_node(&mut self, id: NodeId) -> Result<(), GraphError> {
        self.cell(id)?.lock().reset();
        Ok(())
    }

    // ---- registries ----

    /// Calls the node's will-tick hook before every block.
    pub fn register_will_tick(&mut self, id: NodeId) -> Result<(), GraphError> {
        if !self.arena.contains(id) {
            return Err(GraphError::NodeNotFound(id));
        }
        if !self.will_tick.contains(&id) {
            self.will_tick.push(id);
        }
        Ok(())
    }

    /// Stops calling the node's will-tick hook.
    pub fn unregister_will_tick(&mut self, id: NodeId) {
        self.will_tick.retain(|n| *n != id);
    }

    /// Services the node's maintenance hook once every maintenance period.
    pub fn register_maintenance(&mut self, id: NodeId) -> Result<(), GraphError> {
        if !self.arena.contains(id) {
            return Err(GraphError::NodeNotFound(id));
        }
        if !self.maintenance.contains(&id) {
            self.maintenance.push(id);
        }
        Ok(())
    }

    /// Stops servicing the node's maintenance hook.
    pub fn unregister_maintenance(&mut self, id: NodeId) {
        self.maintenance.retain(|n| *n != id);
    }

    fn prune_registries(&mut self) {
        let arena = &self.arena;
        self.will_tick.retain(|id| arena.contains(*id));
        self.always_playing.retain(|id| arena.contains(*id));
        self.maintenance.retain(|id| arena.contains(*id));
        self.sink.prune(|id| arena.contains(id));
        for id in arena.ids() {
            let Some(cell) = arena.get(id) else { continue };
            let mut node = cell.lock();
            if let NodeKind::Aggregator { sources } = node.kind_mut() {
                sources.retain(|s| arena.contains(*s));
            }
            for output in node.output_connections_mut() {
                output.retain_targets(|t| t.node().is_none_or(|n| arena.contains(n)));
            }
        }
    }

    // ---- threads, callbacks and tasks ----

    /// Changes the planner's worker thread count.
    pub fn set_threads(&mut self, threads: usize) -> Result<(), GraphError> {
        self.planner.set_threads(threads)?;
        self.scratch.ensure(threads);
        self.config.threads = threads;
        Ok(())
    }

    /// Installs the block observer, replacing any previous one.
    pub fn set_block_callback(&mut self, callback: impl FnMut(&Simulation, f64) + Send + 'static) {
        self.block_observer = Some(BlockObserver {
            callback: Box::new(callback),
            installed_at: self.time,
        });
    }

    /// Removes the block observer.
    pub fn clear_block_callback(&mut self) {
        self.block_observer = None;
    }

    fn push_scheduled(&mut self, delay: f64, action: ScheduledAction) {
        let due = self.time + delay.max(0.0);
        let seq = self.next_seq;
        self.next_seq += 1;
        self.scheduled.push(ScheduledCall { due, seq, action });
    }

    /// Calls `callback` from the block loop once `delay` seconds of audio
    /// have rendered.
    pub fn schedule_call(&mut self, delay: f64, callback: impl FnOnce(&mut Simulation) + Send + 'static) {
        self.push_scheduled(delay, ScheduledAction::Audio(Box::new(callback)));
    }

    /// Queues `task` on the background thread once `delay` seconds of audio
    /// have rendered.
    pub fn schedule_background_call(&mut self, delay: f64, task: impl FnOnce() + Send + 'static) {
        self.push_scheduled(delay, ScheduledAction::Background(Box::new(task)));
    }

    /// Scheduled calls not yet fired.
    pub fn pending_calls(&self) -> usize {
        self.scheduled.len()
    }

    /// Runs `task` on the background thread as soon as possible.
    pub fn enqueue_task(&self, task: impl FnOnce() + Send + 'static) {
        self.worker.submit(task);
    }

    // ---- block loop ----

    fn drain_commands(&mut self) {
        for command in self.commands.batch() {
            command(self);
        }
    }

    fn observe_block(&mut self) {
        if let Some(mut observer) = self.block_observer.take() {
            let elapsed = self.time - observer.installed_at;
            (observer.callback)(self, elapsed);
            self.block_observer = Some(observer);
        }
    }

    fn run_will_tick(&mut self) {
        let sender = self.commands.sender();
        for id in &self.will_tick {
            if let Some(cell) = self.arena.get(*id) {
                let mut hooks = HookContext::new(*id, self.tick_count, self.time, &sender);
                cell.lock().will_tick(&mut hooks);
            }
        }
    }

    fn run_maintenance(&mut self) {
        let rate = self.config.maintenance_rate;
        for (j, id) in self.maintenance.iter().enumerate() {
            if (self.maintenance_start + j as u64) % rate == 0 {
                if let Some(cell) = self.arena.get(*id) {
                    cell.lock().do_maintenance();
                }
            }
        }
        self.maintenance_start += 1;
        if self.maintenance_start % rate == 0 {
            self.prune_registries();
        }
    }

    fn fire_scheduled(&mut self) {
        if self.scheduled.is_empty() {
            return;
        }
        let now = self.time;
        let (mut due, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut self.scheduled)
            .into_iter()
            .partition(|c| c.due <= now);
        self.scheduled = rest;
        due.sort_by(|a, b| a.due.total_cmp(&b.due).then(a.seq.cmp(&b.seq)));
        for call in due {
            match call.action {
                ScheduledAction::Audio(callback) => callback(self),
                ScheduledAction::Background(task) => self.worker.submit(task),
            }
        }
    }

    fn render(&mut self, channels: usize, apply_mixing: bool) {
        self.observe_block();
        self.drain_commands();

        let frames = self.config.block_size;
        self.sink.reconfigure(0, channels);
        if self.sink_buffers.len() < channels {
            buffer::resize_channels(&mut self.sink_buffers, channels, frames);
        }
        buffer::zero(&mut self.sink_buffers[..channels]);

        self.run_will_tick();
        self.drain_commands();

        let ctx = BlockContext {
            arena: &self.arena,
            mixing: &self.mixing,
            scratch: &self.scratch,
            root: &self.root,
            tick: self.tick_count,
            block_size: frames,
            sample_rate: self.config.sample_rate,
            time: self.time,
        };
        let topo = Topology {
            arena: &self.arena,
            sink: &self.sink,
            always_playing: &self.always_playing,
        };
        self.planner.execute(self.id, &topo, &ctx);
        self.sink.add(&ctx, &mut self.sink_buffers[..channels], apply_mixing);
    }

    fn finish_block(&mut self) {
        self.time += self.config.block_duration();
        self.run_maintenance();
        self.tick_count += 1;
        self.fire_scheduled();
        tracing::trace!(tick = self.tick_count, "block complete");
    }

    /// Renders one block of `channels` interleaved channels into
    /// `destination`.
    ///
    /// With `apply_mixing`, producers whose channel count differs from
    /// `channels` are converted through the mixing matrices.
    ///
    /// # Errors
    ///
    /// [`GraphError::BufferTooSmall`] if `destination` cannot hold
    /// `block_size * channels` samples; nothing is rendered and the clock
    /// does not advance.
    ///
    /// A call with zero channels or an empty `destination` renders nothing
    /// but still drains queued commands and advances the clock.
    pub fn get_block(&mut self, destination: &mut [f32], channels: usize, apply_mixing: bool) -> Result<(), GraphError> {
        if channels == 0 || destination.is_empty() {
            self.drain_commands();
        } else {
            let frames = self.config.block_size;
            let needed = frames * channels;
            if destination.len() < needed {
                return Err(GraphError::BufferTooSmall {
                    needed,
                    got: destination.len(),
                });
            }
            self.render(channels, apply_mixing);
            buffer::interleave(&self.sink_buffers[..channels], frames, destination);
        }
        self.finish_block();
        Ok(())
    }
}

impl Drop for Simulation {
    fn drop(&mut self) {
        self.worker.shutdown();
        tracing::debug!(id = self.id, "simulation dropped");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::node::{HookContext, ProcessContext};
    use crate::processors::{Constant, Gain};

    fn sim() -> Simulation {
        Simulation::new(SimulationConfig::new(44100.0, 64)).unwrap()
    }

    fn block(sim: &mut Simulation, channels: usize) -> Vec<f32> {
        let mut out = vec![0.0; sim.block_size() * channels];
        sim.get_block(&mut out, channels, true).unwrap();
        out
    }

    #[test]
    fn test_rejects_invalid_config() {
        assert!(matches!(
            Simulation::new(SimulationConfig::new(44100.0, 10)),
            Err(GraphError::InvalidBlockSize(10))
        ));
    }

    #[test]
    fn test_sink_sums_producers() {
        let mut sim = sim();
        let a = sim.add_node(Box::new(Constant::new(0.5)), 0, 1);
        let b = sim.add_node(Box::new(Constant::new(0.25)), 0, 1);
        sim.connect_sink(a, 0).unwrap();
        sim.connect_sink(b, 0).unwrap();
        assert!(block(&mut sim, 1).iter().all(|s| *s == 0.75));
        assert_eq!(sim.tick_count(), 1);
    }

    #[test]
    fn test_range_errors() {
        let mut sim = sim();
        let a = sim.add_node(Box::new(Constant::new(0.5)), 0, 1);
        let g = sim.add_node(Box::new(Gain::new(1.0)), 1, 1);
        assert!(matches!(sim.connect(a, 1, g, 0), Err(GraphError::Range { .. })));
        assert!(matches!(sim.connect(a, 0, g, 3), Err(GraphError::Range { .. })));
        assert!(matches!(sim.connect_property(a, 0, g, 9), Err(GraphError::Range { .. })));
        assert!(matches!(sim.set_property(g, 4, 1.0), Err(GraphError::Range { .. })));
    }

    #[test]
    fn test_cycle_detection_direct_and_self() {
        let mut sim = sim();
        let a = sim.add_node(Box::new(Gain::new(1.0)), 1, 1);
        let b = sim.add_node(Box::new(Gain::new(1.0)), 1, 1);
        sim.connect(a, 0, b, 0).unwrap();
        assert!(matches!(sim.connect(b, 0, a, 0), Err(GraphError::CycleDetected { .. })));
        assert!(matches!(sim.connect(a, 0, a, 0), Err(GraphError::CycleDetected { .. })));
    }

    #[test]
    fn test_cycle_detection_through_property_edge() {
        let mut sim = sim();
        let a = sim.add_node(Box::new(Gain::new(1.0)), 1, 1);
        let b = sim.add_node(Box::new(Gain::new(1.0)), 1, 1);
        sim.connect(a, 0, b, 0).unwrap();
        assert!(matches!(
            sim.connect_property(b, 0, a, Gain::GAIN),
            Err(GraphError::CycleDetected { .. })
        ));
    }

    #[test]
    fn test_cycle_detection_through_aggregator() {
        let mut sim = sim();
        let hub = sim.add_aggregator(Box::new(Gain::new(1.0)), 1, 1);
        let src = sim.add_node(Box::new(Gain::new(1.0)), 1, 1);
        sim.register_source(hub, src).unwrap();
        assert!(matches!(sim.connect(hub, 0, src, 0), Err(GraphError::CycleDetected { .. })));
        assert!(matches!(sim.register_source(src, hub), Err(GraphError::NotAggregator(_))));
    }

    #[test]
    fn test_release_frees_upstream_transitively() {
        let mut sim = sim();
        let a = sim.add_node(Box::new(Constant::new(1.0)), 0, 1);
        let g = sim.add_node(Box::new(Gain::new(1.0)), 1, 1);
        sim.connect(a, 0, g, 0).unwrap();
        sim.release(a).unwrap();
        assert!(sim.is_alive(a), "consumer edge keeps producer alive");

        sim.release(g).unwrap();
        assert!(!sim.is_alive(g));
        assert!(!sim.is_alive(a));
        assert_eq!(sim.node_count(), 0);
    }

    #[test]
    fn test_sink_holds_producers() {
        let mut sim = sim();
        let a = sim.add_node(Box::new(Constant::new(0.5)), 0, 1);
        sim.connect_sink(a, 0).unwrap();
        sim.release(a).unwrap();
        assert!(sim.is_alive(a));
        assert!(block(&mut sim, 1).iter().all(|s| *s == 0.5));

        sim.disconnect(a, 0).unwrap();
        assert!(!sim.is_alive(a));
        assert!(block(&mut sim, 1).iter().all(|s| *s == 0.0));
    }

    #[test]
    fn test_double_release_keeps_edge_holds() {
        let mut sim = sim();
        let a = sim.add_node(Box::new(Constant::new(0.5)), 0, 1);
        sim.connect_sink(a, 0).unwrap();
        sim.release(a).unwrap();
        assert!(matches!(sim.release(a), Err(GraphError::NotOwned(id)) if id == a));
        assert!(sim.is_alive(a));
        assert!(block(&mut sim, 1).iter().all(|s| *s == 0.5));

        sim.retain(a).unwrap();
        sim.release(a).unwrap();
        assert!(sim.is_alive(a), "sink hold survives a retain/release pair");
    }

    #[test]
    fn test_isolate_drops_all_edges() {
        let mut sim = sim();
        let a = sim.add_node(Box::new(Constant::new(1.0)), 0, 1);
        let g = sim.add_node(Box::new(Gain::new(1.0)), 1, 1);
        sim.connect(a, 0, g, 0).unwrap();
        sim.connect_sink(g, 0).unwrap();
        sim.isolate(g).unwrap();

        assert!(sim.is_alive(g), "external reference remains");
        assert!(sim.sink_sources().is_empty());
        sim.with_node(g, |n| assert!(!n.input_connections()[0].is_connected())).unwrap();
        sim.with_node(a, |n| assert!(n.output_connections()[0].targets().is_empty())).unwrap();
    }

    #[test]
    fn test_disconnect_target_single_edge() {
        let mut sim = sim();
        let a = sim.add_node(Box::new(Constant::new(1.0)), 0, 1);
        let g = sim.add_node(Box::new(Gain::new(1.0)), 1, 1);
        sim.connect(a, 0, g, 0).unwrap();
        sim.connect_sink(a, 0).unwrap();
        assert!(sim.disconnect_target(a, 0, InputRef::Sink).unwrap());
        assert!(!sim.disconnect_target(a, 0, InputRef::Sink).unwrap());
        sim.with_node(a, |n| assert_eq!(n.output_connections()[0].targets().len(), 1)).unwrap();
    }

    #[test]
    fn test_property_automation_sums_with_value() {
        let mut sim = sim();
        let src = sim.add_node(Box::new(Constant::new(1.0)), 0, 1);
        let mod_src = sim.add_node(Box::new(Constant::new(0.5)), 0, 1);
        let g = sim.add_node(Box::new(Gain::new(1.0)), 1, 1);
        sim.connect(src, 0, g, 0).unwrap();
        sim.connect_property(mod_src, 0, g, Gain::GAIN).unwrap();
        sim.connect_sink(g, 0).unwrap();
        assert!(block(&mut sim, 1).iter().all(|s| *s == 1.5));

        sim.set_property(g, Gain::GAIN, 0.0).unwrap();
        assert!(block(&mut sim, 1).iter().all(|s| *s == 0.5));
    }

    #[test]
    fn test_paused_node_is_culled_and_suspended() {
        let mut sim = sim();
        let a = sim.add_node(Box::new(Constant::new(0.5)), 0, 1);
        sim.connect_sink(a, 0).unwrap();
        block(&mut sim, 1);
        assert!(!sim.is_suspended(a).unwrap());

        sim.set_state(a, NodeState::Paused).unwrap();
        assert!(block(&mut sim, 1).iter().all(|s| *s == 0.0));
        assert!(sim.is_suspended(a).unwrap());
        assert_eq!(sim.state(a).unwrap(), NodeState::Paused);
    }

    #[test]
    fn test_always_playing_runs_without_consumer() {
        let mut sim = sim();
        let runs = Arc::new(AtomicUsize::new(0));
        struct Tracker(Arc<AtomicUsize>);
        impl Processor for Tracker {
            fn process(&mut self, _ctx: &mut ProcessContext<'_>) {
                self.0.fetch_add(1, Ordering::Relaxed);
            }
        }
        let p = sim.add_node(Box::new(Tracker(runs.clone())), 0, 0);
        block(&mut sim, 1);
        assert_eq!(runs.load(Ordering::Relaxed), 0);

        sim.set_state(p, NodeState::AlwaysPlaying).unwrap();
        block(&mut sim, 1);
        block(&mut sim, 1);
        assert_eq!(runs.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_degenerate_call_advances_clock() {
        let mut sim = sim();
        sim.get_block(&mut [], 2, true).unwrap();
        sim.get_block(&mut [0.0; 8], 0, true).unwrap();
        assert_eq!(sim.tick_count(), 2);
        assert!((sim.time() - 2.0 * 64.0 / 44100.0).abs() < 1e-12);
    }

    #[test]
    fn test_degenerate_call_drains_commands() {
        let mut sim = sim();
        let commands = sim.commands();
        commands
            .send(|sim| {
                sim.add_node(Box::new(Constant::new(1.0)), 0, 1);
            })
            .unwrap();
        assert_eq!(commands.pending(), 1);
        sim.get_block(&mut [], 0, true).unwrap();
        assert_eq!(commands.pending(), 0);
        assert_eq!(sim.node_count(), 1);
    }

    #[test]
    fn test_too_small_destination_is_rejected() {
        let mut sim = sim();
        let mut out = vec![0.0; 10];
        assert!(matches!(
            sim.get_block(&mut out, 1, true),
            Err(GraphError::BufferTooSmall { needed: 64, got: 10 })
        ));
        assert_eq!(sim.tick_count(), 0);
    }

    #[test]
    fn test_scheduled_calls_fire_in_order() {
        let mut sim = sim();
        let log = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let block_len = 64.0 / 44100.0;
        for (delay, tag) in [(2.5 * block_len, 'b'), (0.0, 'a'), (2.5 * block_len, 'c')] {
            let log = log.clone();
            sim.schedule_call(delay, move |_| log.lock().push(tag));
        }
        block(&mut sim, 1);
        assert_eq!(*log.lock(), vec!['a']);
        block(&mut sim, 1);
        assert_eq!(sim.pending_calls(), 2);
        block(&mut sim, 1);
        assert_eq!(*log.lock(), vec!['a', 'b', 'c']);
        assert_eq!(sim.pending_calls(), 0);
    }

    #[test]
    fn test_block_callback_sees_elapsed_time() {
        let mut sim = sim();
        block(&mut sim, 1);
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = seen.clone();
        sim.set_block_callback(move |_, elapsed| sink.lock().push(elapsed));
        block(&mut sim, 1);
        block(&mut sim, 1);
        let seen = seen.lock();
        assert_eq!(seen[0], 0.0);
        assert!((seen[1] - 64.0 / 44100.0).abs() < 1e-12);
    }

    #[test]
    fn test_block_callback_runs_before_queued_commands() {
        let mut sim = sim();
        let log = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let observed = log.clone();
        sim.set_block_callback(move |_, _| observed.lock().push("observer"));
        let applied = log.clone();
        sim.commands().send(move |_| applied.lock().push("command")).unwrap();
        block(&mut sim, 1);
        assert_eq!(*log.lock(), vec!["observer", "command"]);
    }

    #[test]
    fn test_will_tick_commands_apply_before_planning() {
        struct Connector;
        impl Processor for Connector {
            fn process(&mut self, ctx: &mut ProcessContext<'_>) {
                for out in ctx.outputs() {
                    out.fill(0.125);
                }
            }
            fn will_tick(&mut self, hooks: &mut HookContext<'_>) {
                let id = hooks.node();
                hooks
                    .commands()
                    .send(move |sim| {
                        if sim.sink_sources().is_empty() {
                            sim.connect_sink(id, 0).unwrap();
                        }
                    })
                    .unwrap();
            }
        }
        let mut sim = sim();
        let n = sim.add_node(Box::new(Connector), 0, 1);
        sim.register_will_tick(n).unwrap();
        assert!(block(&mut sim, 1).iter().all(|s| *s == 0.125));
    }

    #[test]
    fn test_commands_from_other_threads() {
        let mut sim = sim();
        let a = sim.add_node(Box::new(Constant::new(0.5)), 0, 1);
        let commands = sim.commands();
        std::thread::spawn(move || commands.send(move |sim| sim.connect_sink(a, 0).unwrap()).unwrap())
            .join()
            .unwrap();
        assert!(block(&mut sim, 1).iter().all(|s| *s == 0.5));
    }

    #[test]
    fn test_background_call_runs_on_worker() {
        let mut sim = sim();
        let (tx, rx) = crossbeam_channel::bounded(1);
        sim.schedule_background_call(0.0, move || tx.send(std::thread::current().name().map(str::to_owned)).unwrap());
        block(&mut sim, 1);
        let name = rx.recv_timeout(std::time::Duration::from_secs(5)).unwrap();
        assert_eq!(name.as_deref(), Some("cantus-background"));
    }

    #[test]
    fn test_stale_registry_entries_are_pruned() {
        let mut sim = Simulation::new(SimulationConfig::new(44100.0, 64).with_maintenance_rate(2)).unwrap();
        let a = sim.add_node(Box::new(Constant::new(1.0)), 0, 1);
        sim.register_will_tick(a).unwrap();
        sim.register_maintenance(a).unwrap();
        sim.set_state(a, NodeState::AlwaysPlaying).unwrap();
        sim.release(a).unwrap();
        assert!(!sim.is_alive(a));
        block(&mut sim, 1);
        block(&mut sim, 1);
        assert!(sim.will_tick.is_empty());
        assert!(sim.maintenance.is_empty());
        assert!(sim.always_playing.is_empty());
    }

    #[test]
    fn test_set_threads_validates() {
        let mut sim = sim();
        assert!(matches!(sim.set_threads(0), Err(GraphError::InvalidThreadCount)));
        sim.set_threads(2).unwrap();
        assert_eq!(sim.threads(), 2);
        assert_eq!(sim.config().threads, 2);
    }
}
