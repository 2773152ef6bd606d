//! Engine configuration for cantus.
//!
//! A `cantus.toml` file describes the block clock (`[simulation]`), the
//! terminal sink (`[output]`) and any custom channel conversion matrices
//! (`[[mixing_matrices]]`). Every key is optional.
//!
//! # Example
//!
//! ```rust
//! use cantus_config::EngineConfig;
//!
//! let config = EngineConfig::from_toml(
//!     r#"
//!     [simulation]
//!     sample_rate = 48000.0
//!     block_size = 128
//!
//!     [output]
//!     channels = 2
//!     "#,
//! )
//! .unwrap();
//!
//! let sim = config.build_simulation().unwrap();
//! assert_eq!(sim.block_size(), 128);
//! ```

mod engine;
mod error;

pub use engine::{EngineConfig, MatrixEntry, OutputSection, SimulationSection};
pub use error::ConfigError;
