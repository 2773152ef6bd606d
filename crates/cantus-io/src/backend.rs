//! Where pulled blocks go.
//!
//! An [`OutputBackend`] opens a stream on some device and drives a
//! [`SimulationPull`] from the stream's callback. The simulation decides the
//! sample rate; the backend only chooses the device and period. The returned
//! [`Playback`] keeps the stream running until it is dropped.

use std::any::Any;

use crate::{Result, SimulationPull};

/// Device-side settings for one output stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputConfig {
    /// Preferred hardware period in frames. Need not match the block size.
    pub period: u32,
    /// Interleaved channels requested from the device.
    pub channels: u16,
    /// Case-insensitive substring of the device name. `None` picks the
    /// default device.
    pub device: Option<String>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            period: 512,
            channels: 2,
            device: None,
        }
    }
}

/// A running output stream.
pub struct Playback {
    device: String,
    sample_rate: u32,
    channels: u16,
    _stream: Box<dyn Any>,
}

impl Playback {
    /// Wraps whatever object keeps a backend's stream alive.
    pub fn new<S: 'static>(stream: S, device: impl Into<String>, sample_rate: u32, channels: u16) -> Self {
        Self {
            device: device.into(),
            sample_rate,
            channels,
            _stream: Box::new(stream),
        }
    }

    /// Name of the device being played on.
    pub fn device(&self) -> &str {
        &self.device
    }

    /// Rate the stream was opened at.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Interleaved channel count of the stream.
    pub fn channels(&self) -> u16 {
        self.channels
    }
}

impl std::fmt::Debug for Playback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Playback")
            .field("device", &self.device)
            .field("sample_rate", &self.sample_rate)
            .field("channels", &self.channels)
            .finish_non_exhaustive()
    }
}

/// A device API that can be fed from a [`SimulationPull`].
pub trait OutputBackend {
    /// Short name of the device API.
    fn name(&self) -> &str;

    /// Opens a stream at `sample_rate` whose callback fills every period
    /// from `pull`.
    fn open(&self, pull: SimulationPull, sample_rate: u32, config: &OutputConfig) -> Result<Playback>;
}
