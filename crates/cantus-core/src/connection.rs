//! Channel-ranged edges between node buffers.
//!
//! An edge is a pair of halves. The producer's [`OutputConnection`] names a
//! contiguous range of its output channels and keeps weak [`InputRef`]s to
//! every consumer half it feeds. The consumer's [`InputConnection`] names a
//! range of its input channels (or of the sink, or of a property's
//! automation buffer) and lists the [`OutputRef`]s feeding it.
//!
//! The `sources` list of an input connection is the strong side: the
//! simulation counts each entry as a holder of the producer node. The
//! `targets` list of an output connection never keeps anything alive.
//!
//! Ranges are logical. Reads clip them against the buffers present at the
//! time, so a resize never turns a stale range into an out-of-bounds access.

use crate::job::{BlockContext, Job};
use crate::mixing::{self, MixingMatrixSource};
use crate::node::NodeId;

/// Names one output connection of one node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct OutputRef {
    /// Producer node.
    pub node: NodeId,
    /// Index into the producer's output connections.
    pub connection: usize,
}

/// Names the consumer half of an edge.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum InputRef {
    /// An input connection of a node.
    Node {
        /// Consumer node.
        node: NodeId,
        /// Index into the consumer's input connections.
        connection: usize,
    },
    /// The automation input of a node property.
    Property {
        /// Node owning the property.
        node: NodeId,
        /// Property slot.
        property: usize,
    },
    /// The simulation's terminal sink.
    Sink,
}

impl InputRef {
    /// Node owning this half, `None` for the sink.
    pub fn node(&self) -> Option<NodeId> {
        match self {
            Self::Node { node, .. } | Self::Property { node, .. } => Some(*node),
            Self::Sink => None,
        }
    }
}

fn clip(start: usize, count: usize, len: usize) -> Option<std::ops::Range<usize>> {
    let end = start.saturating_add(count).min(len);
    (start < end).then_some(start..end)
}

/// Producer half of an edge.
#[derive(Debug, Clone)]
pub struct OutputConnection {
    start: usize,
    count: usize,
    targets: Vec<InputRef>,
}

impl OutputConnection {
    /// A connection over output channels `start..start + count`.
    pub fn new(start: usize, count: usize) -> Self {
        Self {
            start,
            count,
            targets: Vec::new(),
        }
    }

    /// First channel of the range.
    pub fn start(&self) -> usize {
        self.start
    }

    /// Channels in the range.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Moves the channel range. Existing edges are kept.
    pub fn reconfigure(&mut self, start: usize, count: usize) {
        self.start = start;
        self.count = count;
    }

    /// Consumers fed by this connection, in connection order.
    pub fn targets(&self) -> &[InputRef] {
        &self.targets
    }

    /// Records a consumer. Returns `false` if it was already present.
    pub fn connect_half(&mut self, target: InputRef) -> bool {
        if self.targets.contains(&target) {
            return false;
        }
        self.targets.push(target);
        true
    }

    /// Forgets a consumer. Returns `false` if it was not present.
    pub fn disconnect_half(&mut self, target: &InputRef) -> bool {
        let before = self.targets.len();
        self.targets.retain(|t| t != target);
        self.targets.len() != before
    }

    /// Forgets every consumer for which `keep` is false.
    pub(crate) fn retain_targets(&mut self, keep: impl FnMut(&InputRef) -> bool) {
        self.targets.retain(keep);
    }

    /// Takes every consumer, leaving the connection unattached.
    pub fn clear(&mut self) -> Vec<InputRef> {
        std::mem::take(&mut self.targets)
    }

    /// Adds this connection's range of `outputs` into `dst`.
    ///
    /// With `apply_mixing` set and differing channel counts, the channel
    /// conversion goes through `matrices`; otherwise the first
    /// `min(count, dst.len())` channels are added one-to-one.
    pub fn add(&self, outputs: &[Vec<f32>], dst: &mut [Vec<f32>], apply_mixing: bool, matrices: &dyn MixingMatrixSource) {
        let Some(range) = clip(self.start, self.count, outputs.len()) else {
            return;
        };
        let src = &outputs[range];
        let matrix = if apply_mixing && src.len() != dst.len() {
            matrices.lookup(src.len(), dst.len())
        } else {
            None
        };
        mixing::remix_into(src, dst, matrix);
    }
}

/// Consumer half of an edge.
#[derive(Debug, Clone)]
pub struct InputConnection {
    start: usize,
    count: usize,
    sources: Vec<OutputRef>,
}

impl InputConnection {
    /// A connection over input channels `start..start + count`.
    pub fn new(start: usize, count: usize) -> Self {
        Self {
            start,
            count,
            sources: Vec::new(),
        }
    }

    /// First channel of the range.
    pub fn start(&self) -> usize {
        self.start
    }

    /// Channels in the range.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Moves the channel range. Existing edges are kept.
    pub fn reconfigure(&mut self, start: usize, count: usize) {
        self.start = start;
        self.count = count;
    }

    /// Producers feeding this connection, in connection order.
    pub fn sources(&self) -> &[OutputRef] {
        &self.sources
    }

    /// Whether anything feeds this connection.
    pub fn is_connected(&self) -> bool {
        !self.sources.is_empty()
    }

    /// Records a producer. Returns `false` if it was already present.
    pub fn connect_half(&mut self, source: OutputRef) -> bool {
        if self.sources.contains(&source) {
            return false;
        }
        self.sources.push(source);
        true
    }

    /// Forgets a producer. Returns `false` if it was not present.
    pub fn disconnect_half(&mut self, source: &OutputRef) -> bool {
        let before = self.sources.len();
        self.sources.retain(|s| s != source);
        self.sources.len() != before
    }

    /// Takes every producer, leaving the connection unattached.
    pub fn clear(&mut self) -> Vec<OutputRef> {
        std::mem::take(&mut self.sources)
    }

    /// Forgets producers whose node is gone. Returns how many were dropped.
    pub(crate) fn prune(&mut self, mut alive: impl FnMut(NodeId) -> bool) -> usize {
        let before = self.sources.len();
        self.sources.retain(|s| alive(s.node));
        before - self.sources.len()
    }

    /// Accumulates every producer into this connection's range of `buffers`.
    ///
    /// Producers are ticked on demand, so a pull outside a planned block
    /// still sees current output. Producers that can be culled right now
    /// (paused, or culled by their processor) are neither ticked nor read.
    pub fn add(&self, ctx: &BlockContext<'_>, buffers: &mut [Vec<f32>], apply_mixing: bool) {
        let Some(range) = clip(self.start, self.count, buffers.len()) else {
            return;
        };
        let dst = &mut buffers[range];
        for source in &self.sources {
            let Some(cell) = ctx.arena.get(source.node) else {
                continue;
            };
            let mut producer = cell.lock();
            if producer.can_cull() {
                continue;
            }
            producer.tick(ctx);
            if let Some(output) = producer.output_connections().get(source.connection) {
                output.add(producer.outputs(), dst, apply_mixing, ctx.mixing);
            }
        }
    }
}

/// Links both halves of an edge. Returns `true` if the edge is new.
pub fn connect_pair(output: &mut OutputConnection, from: OutputRef, input: &mut InputConnection, to: InputRef) -> bool {
    let fresh = input.connect_half(from);
    output.connect_half(to);
    fresh
}

/// Unlinks both halves of an edge. Returns `true` if the edge existed.
pub fn disconnect_pair(output: &mut OutputConnection, from: OutputRef, input: &mut InputConnection, to: InputRef) -> bool {
    output.disconnect_half(&to);
    input.disconnect_half(&from)
}
