//! Audio output for the cantus engine.
//!
//! This crate provides:
//!
//! - **Device playback**: [`SimulationPull`], which serves hardware periods
//!   of any length from whole simulation blocks, and the
//!   [`OutputBackend`](backend::OutputBackend) seam that drives it, with a
//!   cpal implementation
//! - **Offline rendering**: [`write_file`] and [`render_blocks`]
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use cantus_core::processors::Sine;
//! use cantus_core::{Simulation, SimulationConfig};
//! use cantus_io::backend::OutputConfig;
//! use cantus_io::cpal_backend::CpalBackend;
//! use cantus_io::play;
//! use parking_lot::Mutex;
//!
//! let mut sim = Simulation::new(SimulationConfig::new(48000.0, 256))?;
//! let tone = sim.add_node(Box::new(Sine::new(440.0)), 0, 1);
//! sim.connect_sink(tone, 0)?;
//!
//! let sim = Arc::new(Mutex::new(sim));
//! let backend = CpalBackend::new();
//! let _playback = play(&backend, &sim, &OutputConfig::default(), true)?;
//! // Audio plays until `_playback` is dropped.
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod backend;
pub mod cpal_backend;
mod device;
mod pull;
mod render;

pub use device::{AudioDevice, default_output_device, list_devices};
pub use pull::{SimulationPull, play};
pub use render::{block_count, render_blocks, write_file};

use cantus_core::GraphError;

/// Error types for audio output operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// WAV file write error.
    #[error("WAV file error: {0}")]
    Wav(#[from] hound::Error),

    /// Audio stream setup or runtime error.
    #[error("Audio stream error: {0}")]
    Stream(String),

    /// No audio device available on the system.
    #[error("No audio device available")]
    NoDevice,

    /// The requested audio device was not found.
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// The simulation rejected a render request.
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    /// Render length was negative or not finite.
    #[error("Invalid render duration: {0}")]
    InvalidDuration(f64),

    /// The requested render does not fit in one buffer.
    #[error("{blocks} blocks of {block_len} samples do not fit in memory")]
    RenderTooLong {
        /// Blocks requested.
        blocks: u64,
        /// Interleaved samples per block.
        block_len: usize,
    },

    /// Standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type for audio output operations.
pub type Result<T> = std::result::Result<T, Error>;
