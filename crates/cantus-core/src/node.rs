//! Nodes: jobs that own audio buffers and connections.
//!
//! A [`Node`] wraps a [`Processor`] (the DSP surface) with everything the
//! scheduler needs: input and output buffers one block long, the connection
//! lists that form the graph, properties, a [`NodeState`] and the stamp of
//! the last block it rendered.
//!
//! # Tick
//!
//! [`Job::execute`] for a node:
//!
//! 1. zeroes the outputs (a paused node stops here and emits silence)
//! 2. zeroes the inputs and pulls every input connection, additively
//! 3. pulls property automation
//! 4. runs the processor with a per-thread scratch workspace
//! 5. applies the node's output multiplier

use std::fmt;

use crate::buffer;
use crate::command::CommandSender;
use crate::connection::{InputConnection, OutputConnection};
use crate::error::GraphError;
use crate::job::{BlockContext, Job};
use crate::property::{Property, PropertyDescriptor, PropertyView};
use crate::scratch::Workspace;

/// Generation-checked handle to a node in a simulation.
///
/// Ids are plain values; holding one keeps nothing alive. Once the node is
/// freed every copy of its id stops resolving.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

impl NodeId {
    pub(crate) fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Arena slot.
    #[inline]
    pub fn index(self) -> u32 {
        self.index
    }

    /// Slot generation the id was issued for.
    #[inline]
    pub fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({}v{})", self.index, self.generation)
    }
}

/// Scheduling state of a node.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum NodeState {
    /// Runs when something downstream needs it.
    #[default]
    Playing,
    /// Culled from the plan; emits silence if pulled.
    Paused,
    /// Runs every block even with no consumer.
    AlwaysPlaying,
}

/// Scheduling role of a node.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum NodeKind {
    /// Depends only on its connections.
    #[default]
    Standard,
    /// Also depends on a weak registry of source nodes, e.g. a spatial
    /// environment that must run after every source it manages.
    Aggregator {
        /// Registered sources; dead ids are skipped and pruned.
        sources: Vec<NodeId>,
    },
}

/// The DSP surface of a node.
///
/// Only [`process`](Self::process) is required.
pub trait Processor: Send {
    /// Renders one block from `ctx` inputs into `ctx` outputs.
    fn process(&mut self, ctx: &mut ProcessContext<'_>);

    /// Whether the node may be skipped this block while playing.
    ///
    /// Asked again on every pull: a culled node emits silence and nothing
    /// upstream is pulled through it. The plan only re-reads the answer when
    /// it is rebuilt, so a node that stops culling runs on demand until then.
    fn can_cull(&self) -> bool {
        false
    }

    /// Clears internal state such as filter history.
    fn reset(&mut self) {}

    /// Runs before any job of the block, for nodes registered with
    /// [`Simulation::register_will_tick`](crate::Simulation::register_will_tick).
    fn will_tick(&mut self, _hooks: &mut HookContext<'_>) {}

    /// Non-real-time housekeeping, called once every maintenance period.
    fn do_maintenance(&mut self) {}

    /// Properties this processor exposes, in slot order.
    fn properties(&self) -> Vec<PropertyDescriptor> {
        Vec::new()
    }

    /// Short name for logs.
    fn name(&self) -> &'static str {
        "node"
    }
}

/// What a processor sees while rendering a block.
pub struct ProcessContext<'a> {
    inputs: &'a [Vec<f32>],
    outputs: &'a mut [Vec<f32>],
    properties: &'a [Property],
    scratch: &'a mut Workspace,
    block_size: usize,
    sample_rate: f32,
    time: f64,
}

impl<'a> ProcessContext<'a> {
    /// Accumulated input channels.
    pub fn inputs(&self) -> &'a [Vec<f32>] {
        self.inputs
    }

    /// Output channels, zeroed before the call.
    pub fn outputs(&mut self) -> &mut [Vec<f32>] {
        &mut *self.outputs
    }

    /// Inputs, outputs and scratch at once.
    pub fn split(&mut self) -> (&[Vec<f32>], &mut [Vec<f32>], &mut Workspace) {
        (self.inputs, &mut *self.outputs, &mut *self.scratch)
    }

    /// Property `slot`. Panics if the processor asks for a slot it did not
    /// declare.
    pub fn property(&self, slot: usize) -> PropertyView<'a> {
        self.properties[slot].view()
    }

    /// Per-thread scratch buffers.
    pub fn scratch(&mut self) -> &mut Workspace {
        &mut *self.scratch
    }

    /// Frames per block.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Sample rate in Hz.
    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    /// Simulation time at the start of the block.
    pub fn time(&self) -> f64 {
        self.time
    }
}

/// What a processor sees in [`Processor::will_tick`].
pub struct HookContext<'a> {
    node: NodeId,
    tick: u64,
    time: f64,
    commands: &'a CommandSender,
}

impl<'a> HookContext<'a> {
    pub(crate) fn new(node: NodeId, tick: u64, time: f64, commands: &'a CommandSender) -> Self {
        Self {
            node,
            tick,
            time,
            commands,
        }
    }

    /// The node being hooked.
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Counter of the block about to render.
    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Simulation time at the start of the block.
    pub fn time(&self) -> f64 {
        self.time
    }

    /// Queue for graph mutations; they apply before the planner runs.
    pub fn commands(&self) -> &CommandSender {
        self.commands
    }
}

/// A processor plus its buffers, connections and scheduling state.
pub struct Node {
    id: NodeId,
    kind: NodeKind,
    state: NodeState,
    processor: Box<dyn Processor>,
    inputs: Vec<Vec<f32>>,
    outputs: Vec<Vec<f32>>,
    input_connections: Vec<InputConnection>,
    output_connections: Vec<OutputConnection>,
    properties: Vec<Property>,
    mul: f32,
    block_size: usize,
    last_processed: Option<u64>,
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("name", &self.processor.name())
            .field("kind", &self.kind)
            .field("state", &self.state)
            .field("inputs", &self.inputs.len())
            .field("outputs", &self.outputs.len())
            .finish_non_exhaustive()
    }
}

impl Node {
    /// A standard node with the given channel counts and no connections.
    pub fn new(id: NodeId, processor: Box<dyn Processor>, inputs: usize, outputs: usize, block_size: usize) -> Self {
        let properties = processor
            .properties()
            .into_iter()
            .map(|d| Property::new(d, block_size))
            .collect();
        Self {
            id,
            kind: NodeKind::Standard,
            state: NodeState::Playing,
            processor,
            inputs: buffer::channels(inputs, block_size),
            outputs: buffer::channels(outputs, block_size),
            input_connections: Vec::new(),
            output_connections: Vec::new(),
            properties,
            mul: 1.0,
            block_size,
            last_processed: None,
        }
    }

    /// This node's id.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Scheduling role.
    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub(crate) fn kind_mut(&mut self) -> &mut NodeKind {
        &mut self.kind
    }

    /// Scheduling state.
    pub fn state(&self) -> NodeState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: NodeState) {
        self.state = state;
    }

    /// Processor name.
    pub fn name(&self) -> &'static str {
        self.processor.name()
    }

    /// Input buffers as of the last tick.
    pub fn inputs(&self) -> &[Vec<f32>] {
        &self.inputs
    }

    /// Output buffers as of the last tick.
    pub fn outputs(&self) -> &[Vec<f32>] {
        &self.outputs
    }

    /// Input connections in index order.
    pub fn input_connections(&self) -> &[InputConnection] {
        &self.input_connections
    }

    /// Output connections in index order.
    pub fn output_connections(&self) -> &[OutputConnection] {
        &self.output_connections
    }

    pub(crate) fn input_connection_mut(&mut self, index: usize) -> Result<&mut InputConnection, GraphError> {
        let len = self.input_connections.len();
        self.input_connections
            .get_mut(index)
            .ok_or(GraphError::range("input connection", index, len))
    }

    pub(crate) fn output_connection_mut(&mut self, index: usize) -> Result<&mut OutputConnection, GraphError> {
        let len = self.output_connections.len();
        self.output_connections
            .get_mut(index)
            .ok_or(GraphError::range("output connection", index, len))
    }

    pub(crate) fn input_connections_mut(&mut self) -> &mut [InputConnection] {
        &mut self.input_connections
    }

    pub(crate) fn output_connections_mut(&mut self) -> &mut [OutputConnection] {
        &mut self.output_connections
    }

    /// Adds an input connection over channels `start..start + count`.
    pub(crate) fn append_input_connection(&mut self, start: usize, count: usize) -> usize {
        self.input_connections.push(InputConnection::new(start, count));
        self.input_connections.len() - 1
    }

    /// Adds an output connection over channels `start..start + count`.
    pub(crate) fn append_output_connection(&mut self, start: usize, count: usize) -> usize {
        self.output_connections.push(OutputConnection::new(start, count));
        self.output_connections.len() - 1
    }

    /// Reallocates buffers. Growth is zero-filled; connection ranges are
    /// left alone and clipped at read time.
    pub(crate) fn resize(&mut self, inputs: usize, outputs: usize) {
        buffer::resize_channels(&mut self.inputs, inputs, self.block_size);
        buffer::resize_channels(&mut self.outputs, outputs, self.block_size);
    }

    /// Properties in slot order.
    pub fn properties(&self) -> &[Property] {
        &self.properties
    }

    pub(crate) fn property_mut(&mut self, slot: usize) -> Result<&mut Property, GraphError> {
        let len = self.properties.len();
        self.properties
            .get_mut(slot)
            .ok_or(GraphError::range("property", slot, len))
    }

    pub(crate) fn properties_mut(&mut self) -> &mut [Property] {
        &mut self.properties
    }

    /// Output multiplier applied after processing.
    pub fn mul(&self) -> f32 {
        self.mul
    }

    pub(crate) fn set_mul(&mut self, mul: f32) {
        self.mul = mul;
    }

    /// Resets the processor and every property to its default.
    pub(crate) fn reset(&mut self) {
        self.processor.reset();
        for prop in &mut self.properties {
            prop.reset();
        }
    }

    pub(crate) fn will_tick(&mut self, hooks: &mut HookContext<'_>) {
        self.processor.will_tick(hooks);
    }

    pub(crate) fn do_maintenance(&mut self) {
        self.processor.do_maintenance();
    }

    /// Nodes this node pulls from: data producers, then automation producers.
    pub fn producers(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.input_connections
            .iter()
            .flat_map(|c| c.sources())
            .chain(self.properties.iter().flat_map(|p| p.automation().sources()))
            .map(|s| s.node)
    }
}

impl Job for Node {
    fn can_cull(&self) -> bool {
        self.state == NodeState::Paused || self.processor.can_cull()
    }

    fn last_processed(&self) -> Option<u64> {
        self.last_processed
    }

    fn set_last_processed(&mut self, tick: u64) {
        self.last_processed = Some(tick);
    }

    fn execute(&mut self, ctx: &BlockContext<'_>) {
        buffer::zero(&mut self.outputs);
        if self.can_cull() {
            return;
        }
        buffer::zero(&mut self.inputs);
        for conn in &self.input_connections {
            conn.add(ctx, &mut self.inputs, true);
        }
        for prop in &mut self.properties {
            prop.fill(ctx);
        }

        // Producers are ticked during the pulls above, so the workspace is
        // only held for this node's own processing.
        let mut scratch = ctx.scratch.acquire();
        let mut pc = ProcessContext {
            inputs: &self.inputs,
            outputs: &mut self.outputs,
            properties: &self.properties,
            scratch: &mut *scratch,
            block_size: ctx.block_size,
            sample_rate: ctx.sample_rate,
            time: ctx.time,
        };
        self.processor.process(&mut pc);
        drop(scratch);

        if self.mul != 1.0 {
            for out in &mut self.outputs {
                buffer::scale(self.mul, out);
            }
        }
    }
}
