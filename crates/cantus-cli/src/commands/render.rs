//! Offline rendering command.

use std::path::PathBuf;

use clap::Args;

use super::common::EngineArgs;

#[derive(Args)]
pub struct RenderArgs {
    /// Output WAV file
    #[arg(value_name = "OUTPUT")]
    output: PathBuf,

    /// Seconds of audio to render
    #[arg(short, long, default_value_t = 5.0)]
    duration: f64,

    #[command(flatten)]
    engine: EngineArgs,
}

pub fn run(args: RenderArgs) -> anyhow::Result<()> {
    let (config, mut sim) = args.engine.build()?;
    let channels = u16::try_from(config.output.channels)?;

    println!(
        "Rendering {:.2}s at {} Hz, {} channel(s), block {} on {} thread(s)...",
        args.duration,
        sim.sample_rate(),
        channels,
        sim.block_size(),
        sim.threads()
    );

    let blocks = cantus_io::write_file(
        &mut sim,
        &args.output,
        args.duration,
        channels,
        config.output.apply_mixing_matrix,
    )?;

    println!(
        "Wrote {} block(s) ({:.2}s) to {}",
        blocks,
        sim.time(),
        args.output.display()
    );
    Ok(())
}
