//! CLI command implementations.

pub mod common;
pub mod devices;
pub mod plan;
pub mod play;
pub mod render;
