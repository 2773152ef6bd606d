//! Output device enumeration.

use cpal::Device;
use cpal::traits::{DeviceTrait, HostTrait};

use crate::Result;

pub(crate) fn device_name(device: &Device) -> std::result::Result<String, cpal::DeviceNameError> {
    device.description().map(|d| d.name().to_string())
}

/// Audio output device information.
#[derive(Debug, Clone)]
pub struct AudioDevice {
    /// Human-readable device name.
    pub name: String,
    /// Default sample rate in Hz.
    pub default_sample_rate: u32,
    /// Default channel count.
    pub default_channels: u16,
}

fn describe(device: &Device) -> Option<AudioDevice> {
    let name = device_name(device).ok()?;
    let (default_sample_rate, default_channels) = device
        .default_output_config()
        .map(|c| (c.sample_rate(), c.channels()))
        .unwrap_or((48000, 2));
    Some(AudioDevice {
        name,
        default_sample_rate,
        default_channels,
    })
}

/// List the output devices of the default host.
pub fn list_devices() -> Result<Vec<AudioDevice>> {
    let host = cpal::default_host();
    let mut devices = Vec::new();

    if let Ok(outputs) = host.output_devices() {
        for device in outputs {
            if let Some(info) = describe(&device)
                && !devices.iter().any(|d: &AudioDevice| d.name == info.name)
            {
                devices.push(info);
            }
        }
    }

    tracing::debug!(count = devices.len(), "enumerated output devices");
    Ok(devices)
}

/// The default host's default output device, if any.
pub fn default_output_device() -> Result<Option<AudioDevice>> {
    let host = cpal::default_host();
    Ok(host.default_output_device().as_ref().and_then(describe))
}
