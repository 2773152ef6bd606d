//! Engine setup shared by the rendering commands.

use std::path::PathBuf;

use cantus_config::EngineConfig;
use cantus_core::processors::{Gain, Sine};
use cantus_core::Simulation;
use clap::Args;

/// Engine options accepted by every command that builds a graph.
#[derive(Args, Debug, Clone)]
pub struct EngineArgs {
    /// Engine configuration file (TOML)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Sample rate in Hz (overrides the config file)
    #[arg(long)]
    pub sample_rate: Option<f32>,

    /// Frames per block, a multiple of 4 (overrides the config file)
    #[arg(long)]
    pub block_size: Option<usize>,

    /// Planner worker threads (overrides the config file)
    #[arg(short = 'j', long)]
    pub threads: Option<usize>,

    /// Output channels (overrides the config file)
    #[arg(long)]
    pub channels: Option<usize>,

    /// Number of sine voices in the demo graph
    #[arg(long, default_value_t = 4)]
    pub voices: usize,

    /// Fundamental frequency of the demo graph in Hz
    #[arg(long, default_value_t = 220.0)]
    pub frequency: f32,
}

impl EngineArgs {
    /// Load the config file (or defaults) and apply command-line overrides.
    pub fn engine_config(&self) -> anyhow::Result<EngineConfig> {
        let mut config = match &self.config {
            Some(path) => EngineConfig::load(path)?,
            None => EngineConfig::default(),
        };
        if let Some(rate) = self.sample_rate {
            config.simulation.sample_rate = rate;
        }
        if let Some(block_size) = self.block_size {
            config.simulation.block_size = block_size;
        }
        if let Some(threads) = self.threads {
            config.simulation.threads = threads;
        }
        if let Some(channels) = self.channels {
            config.output.channels = channels;
        }
        config.validate()?;
        Ok(config)
    }

    /// Build the configured simulation with the demo graph installed.
    pub fn build(&self) -> anyhow::Result<(EngineConfig, Simulation)> {
        let config = self.engine_config()?;
        let mut sim = config.build_simulation()?;
        build_demo(&mut sim, self.voices, self.frequency)?;
        Ok((config, sim))
    }
}

/// Harmonic sine voices, each scaled by `1 / voices`, summed into a master
/// gain whose level is swept by a slow oscillator.
///
/// ```text
/// sine(f)  -> gain(1/n) --+
/// sine(2f) -> gain(1/n) --+--> master --> sink
/// ...                     |      ^
///                              gain property
/// sine(0.25 Hz) -> depth(0.25) --+
/// ```
pub fn build_demo(sim: &mut Simulation, voices: usize, frequency: f32) -> anyhow::Result<()> {
    anyhow::ensure!(voices > 0, "the demo graph needs at least one voice");

    let master = sim.add_node(Box::new(Gain::new(0.75)), 1, 1);
    let level = 1.0 / voices as f32;
    for harmonic in 1..=voices {
        let osc = sim.add_node(Box::new(Sine::new(frequency * harmonic as f32)), 0, 1);
        let scale = sim.add_node(Box::new(Gain::new(level)), 1, 1);
        sim.connect(osc, 0, scale, 0)?;
        sim.connect(scale, 0, master, 0)?;
    }

    let lfo = sim.add_node(Box::new(Sine::new(0.25)), 0, 1);
    let depth = sim.add_node(Box::new(Gain::new(0.25)), 1, 1);
    sim.connect(lfo, 0, depth, 0)?;
    sim.connect_property(depth, 0, master, Gain::GAIN)?;

    sim.connect_sink(master, 0)?;
    Ok(())
}
