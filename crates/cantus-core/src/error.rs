//! Error type for graph construction and block rendering.

use crate::node::NodeId;

/// Errors reported synchronously by graph-mutation and rendering calls.
///
/// Invariant violations inside the planner are not represented here; those
/// are asserted in debug builds instead.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    /// The node id is stale or was never issued by this simulation.
    #[error("node {0} not found")]
    NodeNotFound(NodeId),

    /// The node has no external reference left to release.
    #[error("node {0} has no external reference to release")]
    NotOwned(NodeId),

    /// An index was outside the collection it addresses.
    #[error("{what} index {index} out of range (len {len})")]
    Range {
        /// Which collection was indexed.
        what: &'static str,
        /// The offending index.
        index: usize,
        /// Current length of the collection.
        len: usize,
    },

    /// Block size was zero or not a multiple of [`BLOCK_GRANULARITY`](crate::BLOCK_GRANULARITY).
    #[error("block size {0} must be a nonzero multiple of {granularity}", granularity = crate::BLOCK_GRANULARITY)]
    InvalidBlockSize(usize),

    /// Sample rate was zero, negative or not finite.
    #[error("invalid sample rate {0}")]
    InvalidSampleRate(f32),

    /// Worker thread count was zero.
    #[error("thread count must be at least 1")]
    InvalidThreadCount,

    /// Maintenance rate was zero.
    #[error("maintenance rate must be at least 1")]
    InvalidMaintenanceRate,

    /// Adding the edge would make the graph cyclic.
    #[error("connecting {from} to {to} would create a cycle")]
    CycleDetected {
        /// Producer side of the rejected edge.
        from: NodeId,
        /// Consumer side of the rejected edge.
        to: NodeId,
    },

    /// The node is not an aggregator and cannot accept sources.
    #[error("node {0} is not an aggregator")]
    NotAggregator(NodeId),

    /// A mixing matrix had the wrong number of coefficients.
    #[error("mixing matrix {from}->{to} needs {expected} coefficients, got {got}")]
    InvalidMatrix {
        /// Source channel count.
        from: usize,
        /// Destination channel count.
        to: usize,
        /// `from * to`.
        expected: usize,
        /// Coefficients supplied.
        got: usize,
    },

    /// Destination buffer cannot hold one interleaved block.
    #[error("destination holds {got} samples, block needs {needed}")]
    BufferTooSmall {
        /// `block_size * channels`.
        needed: usize,
        /// Length of the supplied slice.
        got: usize,
    },

    /// The simulation behind a command sender has been dropped.
    #[error("simulation is gone")]
    SimulationGone,

    /// The worker pool could not be built.
    #[error("failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    /// The background task thread could not be spawned.
    #[error("failed to spawn background thread")]
    Spawn(#[source] std::io::Error),
}

impl GraphError {
    pub(crate) fn range(what: &'static str, index: usize, len: usize) -> Self {
        Self::Range { what, index, len }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_display_messages() {
        let err = GraphError::range("output connection", 3, 1);
        assert_eq!(err.to_string(), "output connection index 3 out of range (len 1)");

        let err = GraphError::InvalidBlockSize(30);
        assert_eq!(err.to_string(), "block size 30 must be a nonzero multiple of 4");

        let err = GraphError::BufferTooSmall { needed: 1024, got: 10 };
        assert!(err.to_string().contains("1024"));
    }

    #[test]
    fn test_spawn_error_has_source() {
        let err = GraphError::Spawn(std::io::Error::other("no threads"));
        assert!(err.source().is_some());
    }
}
