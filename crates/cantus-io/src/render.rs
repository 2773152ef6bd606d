//! Offline rendering.

use std::path::Path;

use cantus_core::Simulation;
use hound::{SampleFormat, WavSpec, WavWriter};

use crate::{Error, Result};

/// Blocks needed to cover `duration` seconds: `ceil(duration * rate / block)`.
pub fn block_count(duration: f64, sample_rate: f32, block_size: usize) -> Result<u64> {
    if !duration.is_finite() || duration < 0.0 {
        return Err(Error::InvalidDuration(duration));
    }
    let frames = duration * f64::from(sample_rate);
    Ok((frames / block_size as f64).ceil() as u64)
}

/// Render `blocks` blocks into one interleaved buffer.
pub fn render_blocks(
    sim: &mut Simulation,
    blocks: u64,
    channels: usize,
    apply_mixing: bool,
) -> Result<Vec<f32>> {
    let block_len = sim.block_size() * channels;
    let total = usize::try_from(blocks)
        .ok()
        .and_then(|blocks| block_len.checked_mul(blocks))
        .ok_or(Error::RenderTooLong { blocks, block_len })?;
    let mut out = vec![0.0; total];
    if block_len == 0 {
        return Ok(out);
    }
    for chunk in out.chunks_exact_mut(block_len) {
        sim.get_block(chunk, channels, apply_mixing)?;
    }
    Ok(out)
}

/// Render `duration` seconds of `sim` into a 32-bit float WAV file.
///
/// The file always holds whole blocks, so it may run past `duration` by up to
/// one block. Returns the number of blocks rendered.
pub fn write_file(
    sim: &mut Simulation,
    path: impl AsRef<Path>,
    duration: f64,
    channels: u16,
    apply_mixing: bool,
) -> Result<u64> {
    let path = path.as_ref();
    let blocks = block_count(duration, sim.sample_rate(), sim.block_size())?;
    let spec = WavSpec {
        channels,
        sample_rate: sim.sample_rate() as u32,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    };

    let mut writer = WavWriter::create(path, spec)?;
    let mut block = vec![0.0; sim.block_size() * usize::from(channels)];
    for _ in 0..blocks {
        sim.get_block(&mut block, usize::from(channels), apply_mixing)?;
        for &sample in &block {
            writer.write_sample(sample)?;
        }
    }
    writer.finalize()?;

    tracing::info!(
        path = %path.display(),
        blocks,
        channels,
        "rendered to file"
    );
    Ok(blocks)
}
