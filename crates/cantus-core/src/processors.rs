//! Small stock processors.
//!
//! These are enough to build and test graphs without a DSP library: a
//! constant source, a gain stage driven by an automatable property, and a
//! sine oscillator.

use std::f64::consts::TAU;

use crate::node::{ProcessContext, Processor};
use crate::property::PropertyDescriptor;

/// Fills every output channel with a fixed value.
#[derive(Debug, Clone, Copy)]
pub struct Constant {
    value: f32,
}

impl Constant {
    /// A source emitting `value`.
    pub fn new(value: f32) -> Self {
        Self { value }
    }
}

impl Processor for Constant {
    fn process(&mut self, ctx: &mut ProcessContext<'_>) {
        for out in ctx.outputs() {
            out.fill(self.value);
        }
    }

    fn name(&self) -> &'static str {
        "constant"
    }
}

/// Multiplies each input channel into the matching output channel.
#[derive(Debug, Clone, Copy)]
pub struct Gain {
    initial: f32,
}

impl Gain {
    /// Property slot of the gain factor.
    pub const GAIN: usize = 0;

    /// A gain stage starting at `gain`.
    pub fn new(gain: f32) -> Self {
        Self { initial: gain }
    }
}

impl Processor for Gain {
    fn process(&mut self, ctx: &mut ProcessContext<'_>) {
        let gain = ctx.property(Self::GAIN);
        let (inputs, outputs, _) = ctx.split();
        for (input, output) in inputs.iter().zip(outputs.iter_mut()) {
            for (i, (x, y)) in input.iter().zip(output.iter_mut()).enumerate() {
                *y = *x * gain.at(i);
            }
        }
    }

    fn properties(&self) -> Vec<PropertyDescriptor> {
        vec![PropertyDescriptor::new("gain", self.initial, f32::MIN, f32::MAX)]
    }

    fn name(&self) -> &'static str {
        "gain"
    }
}

/// Sine oscillator written to every output channel.
#[derive(Debug, Clone, Copy)]
pub struct Sine {
    frequency: f32,
    phase: f64,
}

impl Sine {
    /// Property slot of the frequency in Hz.
    pub const FREQUENCY: usize = 0;

    /// An oscillator at `frequency` Hz.
    pub fn new(frequency: f32) -> Self {
        Self { frequency, phase: 0.0 }
    }
}

impl Processor for Sine {
    fn process(&mut self, ctx: &mut ProcessContext<'_>) {
        let freq = ctx.property(Self::FREQUENCY);
        let sr = f64::from(ctx.sample_rate());
        let frames = ctx.block_size();
        let (_, outputs, scratch) = ctx.split();
        let wave = scratch.buffer(0, frames);
        for (i, sample) in wave.iter_mut().enumerate() {
            *sample = (self.phase * TAU).sin() as f32;
            self.phase = (self.phase + f64::from(freq.at(i)) / sr).fract();
        }
        for out in outputs {
            out.copy_from_slice(wave);
        }
    }

    fn reset(&mut self) {
        self.phase = 0.0;
    }

    fn properties(&self) -> Vec<PropertyDescriptor> {
        vec![PropertyDescriptor::new("frequency", self.frequency, 0.0, 96_000.0)]
    }

    fn name(&self) -> &'static str {
        "sine"
    }
}
