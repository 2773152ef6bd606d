//! Node properties with optional audio-rate automation.
//!
//! A property holds a scalar value. It may also be driven by other nodes:
//! its automation input is a one-channel [`InputConnection`], and when
//! anything is connected the per-block value is `value + sum(inputs)`. The
//! automation input is an ordinary edge for scheduling purposes.

use crate::buffer;
use crate::connection::InputConnection;
use crate::job::BlockContext;

/// Static description of a property a processor exposes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PropertyDescriptor {
    /// Name, unique within the processor.
    pub name: &'static str,
    /// Initial value.
    pub default: f32,
    /// Lowest accepted value.
    pub min: f32,
    /// Highest accepted value.
    pub max: f32,
}

impl PropertyDescriptor {
    /// Descriptor with an explicit range.
    pub const fn new(name: &'static str, default: f32, min: f32, max: f32) -> Self {
        Self { name, default, min, max }
    }

    /// Clamps `value` into range.
    pub fn clamp(&self, value: f32) -> f32 {
        value.clamp(self.min, self.max)
    }
}

/// Runtime state of one property.
#[derive(Debug)]
pub struct Property {
    descriptor: PropertyDescriptor,
    value: f32,
    automation: InputConnection,
    buffer: Vec<Vec<f32>>,
}

impl Property {
    pub(crate) fn new(descriptor: PropertyDescriptor, block_size: usize) -> Self {
        Self {
            value: descriptor.default,
            descriptor,
            automation: InputConnection::new(0, 1),
            buffer: buffer::channels(1, block_size),
        }
    }

    /// Descriptor this property was built from.
    pub fn descriptor(&self) -> &PropertyDescriptor {
        &self.descriptor
    }

    /// Current scalar value.
    pub fn value(&self) -> f32 {
        self.value
    }

    /// Sets the scalar value, clamped into range. Returns the stored value.
    pub fn set_value(&mut self, value: f32) -> f32 {
        self.value = self.descriptor.clamp(value);
        self.value
    }

    /// Restores the default value.
    pub fn reset(&mut self) {
        self.value = self.descriptor.default;
    }

    /// Automation input connection.
    pub fn automation(&self) -> &InputConnection {
        &self.automation
    }

    pub(crate) fn automation_mut(&mut self) -> &mut InputConnection {
        &mut self.automation
    }

    /// Pulls automation for the current block.
    pub(crate) fn fill(&mut self, ctx: &BlockContext<'_>) {
        if !self.automation.is_connected() {
            return;
        }
        buffer::zero(&mut self.buffer);
        self.automation.add(ctx, &mut self.buffer, true);
        for s in &mut self.buffer[0] {
            *s += self.value;
        }
    }

    /// Read view for processing.
    pub fn view(&self) -> PropertyView<'_> {
        PropertyView {
            value: self.value,
            automation: self
                .automation
                .is_connected()
                .then(|| self.buffer[0].as_slice()),
        }
    }
}

/// A property as seen from [`Processor::process`](crate::Processor::process).
#[derive(Debug, Clone, Copy)]
pub struct PropertyView<'a> {
    value: f32,
    automation: Option<&'a [f32]>,
}

impl PropertyView<'_> {
    /// Scalar value, ignoring automation.
    pub fn value(&self) -> f32 {
        self.value
    }

    /// Whether the property is driven by a connected node this block.
    pub fn is_automated(&self) -> bool {
        self.automation.is_some()
    }

    /// Effective value at `frame`.
    #[inline]
    pub fn at(&self, frame: usize) -> f32 {
        match self.automation {
            Some(buf) => buf.get(frame).copied().unwrap_or(self.value),
            None => self.value,
        }
    }
}
