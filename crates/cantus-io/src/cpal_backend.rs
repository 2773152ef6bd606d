//! Device playback through cpal.

use cpal::Host;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use crate::backend::{OutputBackend, OutputConfig, Playback};
use crate::device::device_name;
use crate::{Error, Result, SimulationPull};

fn stream_error(err: impl std::fmt::Display) -> Error {
    Error::Stream(err.to_string())
}

/// Output on the platform's default cpal host.
pub struct CpalBackend {
    host: Host,
}

impl Default for CpalBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl CpalBackend {
    /// Backend on the default host.
    pub fn new() -> Self {
        let host = cpal::default_host();
        tracing::debug!(host = host.id().name(), "using audio host");
        Self { host }
    }

    fn device(&self, wanted: Option<&str>) -> Result<cpal::Device> {
        let Some(wanted) = wanted else {
            return self.host.default_output_device().ok_or(Error::NoDevice);
        };
        let needle = wanted.to_lowercase();
        self.host
            .output_devices()
            .map_err(stream_error)?
            .find(|d| device_name(d).is_ok_and(|n| n.to_lowercase().contains(&needle)))
            .ok_or_else(|| Error::DeviceNotFound(wanted.to_owned()))
    }
}

impl OutputBackend for CpalBackend {
    fn name(&self) -> &str {
        "cpal"
    }

    fn open(&self, mut pull: SimulationPull, sample_rate: u32, config: &OutputConfig) -> Result<Playback> {
        let device = self.device(config.device.as_deref())?;
        let name = device_name(&device).unwrap_or_else(|_| "unknown device".into());
        if let Ok(native) = device.default_output_config()
            && native.sample_rate() != sample_rate
        {
            tracing::warn!(
                device = %name,
                native = native.sample_rate(),
                simulation = sample_rate,
                "device does not run at the simulation rate natively"
            );
        }

        let stream_config = cpal::StreamConfig {
            channels: config.channels,
            sample_rate,
            buffer_size: cpal::BufferSize::Fixed(config.period),
        };
        let stream = device
            .build_output_stream(
                &stream_config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| pull.fill(data),
                |err| tracing::error!(error = %err, "output stream error"),
                None,
            )
            .map_err(stream_error)?;
        stream.play().map_err(stream_error)?;

        tracing::info!(
            device = %name,
            sample_rate,
            channels = config.channels,
            period = config.period,
            "output stream started"
        );
        Ok(Playback::new(stream, name, sample_rate, config.channels))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use cantus_core::{Simulation, SimulationConfig};
    use parking_lot::Mutex;

    use super::*;

    #[test]
    fn test_missing_device_is_reported() {
        let sim = Arc::new(Mutex::new(Simulation::new(SimulationConfig::new(48000.0, 64)).unwrap()));
        let config = OutputConfig {
            device: Some("no-such-device-\u{1f50a}".into()),
            ..OutputConfig::default()
        };
        let result = CpalBackend::new().open(SimulationPull::new(&sim, 2, true), 48000, &config);
        assert!(matches!(result, Err(Error::DeviceNotFound(_) | Error::Stream(_))));
    }
}
