//! Device-side pull of simulation blocks.
//!
//! Hardware asks for periods whose length rarely matches the simulation
//! block size. [`SimulationPull`] keeps one rendered block and hands it out
//! piecewise, rendering the next block only when the current one is used up.
//! It holds the simulation weakly; once the owner drops it, the device gets
//! silence.

use std::sync::{Arc, Weak};

use cantus_core::Simulation;
use parking_lot::Mutex;

use crate::backend::{OutputBackend, OutputConfig, Playback};
use crate::Result;

/// Re-blocking adapter between a device callback and a shared simulation.
pub struct SimulationPull {
    simulation: Weak<Mutex<Simulation>>,
    channels: usize,
    apply_mixing: bool,
    block: Vec<f32>,
    // Samples of `block` already handed out; `block.len()` means empty.
    position: usize,
}

impl SimulationPull {
    /// Pull interleaved `channels`-wide audio from `simulation`.
    pub fn new(simulation: &Arc<Mutex<Simulation>>, channels: usize, apply_mixing: bool) -> Self {
        let block_len = simulation.lock().block_size() * channels;
        Self {
            simulation: Arc::downgrade(simulation),
            channels,
            apply_mixing,
            block: vec![0.0; block_len],
            position: block_len,
        }
    }

    /// Interleaved channel count.
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Samples rendered but not yet handed out.
    pub fn buffered(&self) -> usize {
        self.block.len() - self.position
    }

    /// Fill `out` completely, rendering as many blocks as needed.
    pub fn fill(&mut self, out: &mut [f32]) {
        let mut written = 0;
        while written < out.len() {
            if self.position == self.block.len() && !self.refill() {
                out[written..].fill(0.0);
                return;
            }
            let n = (self.block.len() - self.position).min(out.len() - written);
            out[written..written + n].copy_from_slice(&self.block[self.position..self.position + n]);
            self.position += n;
            written += n;
        }
    }

    /// Render the next block. False when nothing can be rendered.
    fn refill(&mut self) -> bool {
        let Some(simulation) = self.simulation.upgrade() else {
            return false;
        };
        let mut sim = simulation.lock();
        let len = sim.block_size() * self.channels;
        if len == 0 {
            return false;
        }
        if self.block.len() != len {
            self.block.resize(len, 0.0);
        }
        if let Err(e) = sim.get_block(&mut self.block, self.channels, self.apply_mixing) {
            tracing::warn!(error = %e, "block render failed, emitting silence");
            return false;
        }
        self.position = 0;
        true
    }
}

/// Start playing `simulation` through `backend` at the simulation's rate.
///
/// The device thread locks the simulation once per rendered block.
pub fn play(
    backend: &dyn OutputBackend,
    simulation: &Arc<Mutex<Simulation>>,
    config: &OutputConfig,
    apply_mixing: bool,
) -> Result<Playback> {
    let sample_rate = simulation.lock().sample_rate().round() as u32;
    let pull = SimulationPull::new(simulation, usize::from(config.channels), apply_mixing);
    tracing::debug!(backend = backend.name(), sample_rate, channels = config.channels, "opening output");
    backend.open(pull, sample_rate, config)
}
