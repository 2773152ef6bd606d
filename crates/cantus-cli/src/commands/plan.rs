//! Execution plan inspection command.

use cantus_core::{JobId, Simulation};
use clap::Args;

use super::common::EngineArgs;

#[derive(Args)]
pub struct PlanArgs {
    #[command(flatten)]
    engine: EngineArgs,
}

pub fn run(args: PlanArgs) -> anyhow::Result<()> {
    let (config, mut sim) = args.engine.build()?;

    // The plan is built lazily by the first block.
    let channels = config.output.channels;
    let mut block = vec![0.0; sim.block_size() * channels];
    sim.get_block(&mut block, channels, config.output.apply_mixing_matrix)?;

    print!("{}", describe(&sim));
    Ok(())
}

fn job_label(sim: &Simulation, job: JobId) -> String {
    match job {
        JobId::Root => "root".to_string(),
        JobId::Node(id) => sim
            .with_node(id, |node| format!("{}#{}", node.name(), id.index()))
            .unwrap_or_else(|_| format!("<dead {}>", id)),
    }
}

fn describe(sim: &Simulation) -> String {
    let levels = sim.plan_levels();
    let jobs: usize = levels.iter().map(Vec::len).sum();
    let mut out = format!(
        "Plan: {} level(s), {} job(s), {} node(s), {} thread(s), {} replan(s)\n",
        levels.len(),
        jobs,
        sim.node_count(),
        sim.threads(),
        sim.replan_count()
    );
    for (i, level) in levels.iter().enumerate() {
        let labels: Vec<String> = level.iter().map(|job| job_label(sim, *job)).collect();
        out.push_str(&format!("  level {}: {}\n", i, labels.join(", ")));
    }
    out
}
