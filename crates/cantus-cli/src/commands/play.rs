//! Real-time playback command.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use cantus_io::backend::OutputConfig;
use cantus_io::cpal_backend::CpalBackend;
use clap::Args;
use parking_lot::Mutex;

use super::common::EngineArgs;

#[derive(Args)]
pub struct PlayArgs {
    /// Stop after this many seconds (plays until Ctrl+C otherwise)
    #[arg(short, long)]
    duration: Option<f64>,

    /// Hardware buffer size in frames
    #[arg(long, default_value_t = 512)]
    buffer_size: u32,

    /// Output device (partial name; overrides the config file)
    #[arg(short, long)]
    output: Option<String>,

    #[command(flatten)]
    engine: EngineArgs,
}

pub fn run(args: PlayArgs) -> anyhow::Result<()> {
    let (config, sim) = args.engine.build()?;

    let output = OutputConfig {
        period: args.buffer_size,
        channels: u16::try_from(config.output.channels)?,
        device: args.output.or(config.output.device),
    };

    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);
    ctrlc::set_handler(move || {
        println!("\nStopping...");
        r.store(false, Ordering::SeqCst);
    })?;

    let sim = Arc::new(Mutex::new(sim));
    let backend = CpalBackend::new();
    let playback = cantus_io::play(
        &backend,
        &sim,
        &output,
        config.output.apply_mixing_matrix,
    )?;

    println!(
        "Playing on {} ({} Hz, {} channel(s))... Press Ctrl+C to stop.",
        playback.device(),
        playback.sample_rate(),
        playback.channels()
    );

    let deadline = args.duration.map(|d| Instant::now() + Duration::from_secs_f64(d.max(0.0)));
    while running.load(Ordering::SeqCst) {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            break;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    drop(playback);

    let sim = sim.lock();
    println!(
        "Rendered {} block(s), {:.2}s, {} background failure(s)",
        sim.tick_count(),
        sim.time(),
        sim.background_failures()
    );
    Ok(())
}
