//! Runtime parameters for a [`Simulation`](crate::Simulation).

use crate::error::GraphError;

/// Block sizes must be a multiple of this many frames.
pub const BLOCK_GRANULARITY: usize = 4;

/// Parameters fixed at simulation construction, except `threads` which can
/// be changed later through [`Simulation::set_threads`](crate::Simulation::set_threads).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulationConfig {
    /// Sample rate in Hz.
    pub sample_rate: f32,
    /// Frames per block.
    pub block_size: usize,
    /// Worker threads used by the planner. 1 runs every job on the caller.
    pub threads: usize,
    /// Each maintenance-registered node is serviced once every this many blocks.
    pub maintenance_rate: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100.0,
            block_size: 1024,
            threads: 1,
            maintenance_rate: 5,
        }
    }
}

impl SimulationConfig {
    /// Config with the given rate and block size, defaults elsewhere.
    pub fn new(sample_rate: f32, block_size: usize) -> Self {
        Self {
            sample_rate,
            block_size,
            ..Self::default()
        }
    }

    /// Sets the worker thread count.
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    /// Sets the maintenance rate.
    pub fn with_maintenance_rate(mut self, rate: u64) -> Self {
        self.maintenance_rate = rate;
        self
    }

    /// Rejects values the engine cannot run with.
    pub fn validate(&self) -> Result<(), GraphError> {
        if !(self.sample_rate.is_finite() && self.sample_rate > 0.0) {
            return Err(GraphError::InvalidSampleRate(self.sample_rate));
        }
        if self.block_size == 0 || self.block_size % BLOCK_GRANULARITY != 0 {
            return Err(GraphError::InvalidBlockSize(self.block_size));
        }
        if self.threads == 0 {
            return Err(GraphError::InvalidThreadCount);
        }
        if self.maintenance_rate == 0 {
            return Err(GraphError::InvalidMaintenanceRate);
        }
        Ok(())
    }

    /// Seconds covered by one block.
    pub fn block_duration(&self) -> f64 {
        self.block_size as f64 / f64::from(self.sample_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(SimulationConfig::default().validate().is_ok());
    }

    #[test]
    fn test_block_size_granularity() {
        assert!(matches!(
            SimulationConfig::new(48000.0, 0).validate(),
            Err(GraphError::InvalidBlockSize(0))
        ));
        assert!(matches!(
            SimulationConfig::new(48000.0, 130).validate(),
            Err(GraphError::InvalidBlockSize(130))
        ));
        assert!(SimulationConfig::new(48000.0, 132).validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_rate_and_threads() {
        assert!(SimulationConfig::new(0.0, 64).validate().is_err());
        assert!(SimulationConfig::new(f32::NAN, 64).validate().is_err());
        assert!(matches!(
            SimulationConfig::default().with_threads(0).validate(),
            Err(GraphError::InvalidThreadCount)
        ));
        assert!(matches!(
            SimulationConfig::default().with_maintenance_rate(0).validate(),
            Err(GraphError::InvalidMaintenanceRate)
        ));
    }

    #[test]
    fn test_block_duration() {
        let cfg = SimulationConfig::new(44100.0, 441);
        assert!((cfg.block_duration() - 0.01).abs() < 1e-12);
    }
}
