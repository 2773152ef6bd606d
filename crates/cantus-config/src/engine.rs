//! The `cantus.toml` engine configuration file.

use std::path::Path;

use cantus_core::{GraphError, MixingMatrices, Simulation, SimulationConfig};
use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Top-level engine configuration.
///
/// Every section is optional in the file; missing keys take the engine
/// defaults.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Block clock parameters.
    pub simulation: SimulationSection,
    /// Terminal sink and device selection.
    pub output: OutputSection,
    /// Extra or overriding channel conversion matrices.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub mixing_matrices: Vec<MatrixEntry>,
}

/// `[simulation]` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationSection {
    /// Sample rate in Hz.
    pub sample_rate: f32,
    /// Frames per block.
    pub block_size: usize,
    /// Planner worker threads.
    pub threads: usize,
    /// Blocks between maintenance visits of one node.
    pub maintenance_rate: u64,
}

impl Default for SimulationSection {
    fn default() -> Self {
        let d = SimulationConfig::default();
        Self {
            sample_rate: d.sample_rate,
            block_size: d.block_size,
            threads: d.threads,
            maintenance_rate: d.maintenance_rate,
        }
    }
}

/// `[output]` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSection {
    /// Interleaved channel count requested from the sink.
    pub channels: usize,
    /// Convert producer layouts to `channels` through the mixing matrices.
    pub apply_mixing_matrix: bool,
    /// Output device name; the host default when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
}

impl Default for OutputSection {
    fn default() -> Self {
        Self {
            channels: 2,
            apply_mixing_matrix: true,
            device: None,
        }
    }
}

/// One `[[mixing_matrices]]` entry, coefficients row-major with one row per
/// output channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatrixEntry {
    /// Source channel count.
    pub from: usize,
    /// Destination channel count.
    pub to: usize,
    /// `to * from` coefficients.
    pub coefficients: Vec<f32>,
}

impl EngineConfig {
    /// Load a configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::read_file(path, e))?;
        Self::from_toml(&content)
    }

    /// Parse a configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Save the configuration to a TOML file, creating parent directories.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::create_dir(parent, e))?;
        }

        let content = self.to_toml()?;
        std::fs::write(path, content).map_err(|e| ConfigError::write_file(path, e))?;
        Ok(())
    }

    /// Render the configuration as TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check every section without building anything.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.simulation_config().validate()?;
        if self.output.channels == 0 {
            return Err(ConfigError::invalid_output("channels", "must be at least 1"));
        }
        if let Some(device) = &self.output.device
            && device.trim().is_empty()
        {
            return Err(ConfigError::invalid_output("device", "must not be blank"));
        }
        for m in &self.mixing_matrices {
            let expected = m.from * m.to;
            if expected == 0 || m.coefficients.len() != expected {
                return Err(GraphError::InvalidMatrix {
                    from: m.from,
                    to: m.to,
                    expected,
                    got: m.coefficients.len(),
                }
                .into());
            }
        }
        Ok(())
    }

    /// The validated clock parameters.
    pub fn into_simulation_config(self) -> Result<SimulationConfig, ConfigError> {
        let config = self.simulation_config();
        config.validate()?;
        Ok(config)
    }

    /// Register every configured matrix, replacing defaults for the same pair.
    pub fn apply_mixing_matrices(&self, matrices: &mut MixingMatrices) -> Result<(), ConfigError> {
        for m in &self.mixing_matrices {
            matrices.register(m.from, m.to, m.coefficients.clone())?;
        }
        Ok(())
    }

    /// Validate, construct a [`Simulation`] and install the matrices.
    pub fn build_simulation(&self) -> Result<Simulation, ConfigError> {
        self.validate()?;
        let mut sim = Simulation::new(self.simulation_config())?;
        self.apply_mixing_matrices(sim.mixing_matrices_mut())?;
        Ok(sim)
    }

    fn simulation_config(&self) -> SimulationConfig {
        SimulationConfig::new(self.simulation.sample_rate, self.simulation.block_size)
            .with_threads(self.simulation.threads)
            .with_maintenance_rate(self.simulation.maintenance_rate)
    }
}
