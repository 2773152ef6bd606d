//! Criterion benchmarks for the planner (`cantus-core::planner`).
//!
//! Measures scheduling overhead independently of DSP cost using the stock
//! `Gain` processor. Two axes:
//!
//! - **Replan** - dependency walk and leveling after a topology change
//! - **Execute** - `get_block()` throughput with a cached plan, serial and parallel
//!
//! Run with: `cargo bench -p cantus-core -- planner/`
#![allow(missing_docs)]

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use cantus_core::processors::{Constant, Gain};
use cantus_core::{NodeId, Simulation, SimulationConfig};

const SAMPLE_RATE: f32 = 48000.0;
const BLOCK_SIZE: usize = 256;
const WIDTHS: &[usize] = &[4, 16, 64];

// ---------------------------------------------------------------------------
// Graph constructors
// ---------------------------------------------------------------------------

/// `width` parallel chains of three gain stages, summed at the sink.
fn parallel_chains(threads: usize, width: usize) -> Simulation {
    let config = SimulationConfig::new(SAMPLE_RATE, BLOCK_SIZE).with_threads(threads);
    let mut sim = Simulation::new(config).expect("valid config");
    for _ in 0..width {
        let mut prev: NodeId = sim.add_node(Box::new(Constant::new(0.01)), 0, 1);
        for _ in 0..3 {
            let g = sim.add_node(Box::new(Gain::new(0.9)), 1, 1);
            sim.connect(prev, 0, g, 0).expect("acyclic");
            prev = g;
        }
        sim.connect_sink(prev, 0).expect("sink");
    }
    sim
}

// ---------------------------------------------------------------------------
// Benchmarks
// ---------------------------------------------------------------------------

fn bench_replan(c: &mut Criterion) {
    let mut group = c.benchmark_group("planner/replan");
    for &width in WIDTHS {
        let mut sim = parallel_chains(1, width);
        let mut out = vec![0.0; BLOCK_SIZE];
        group.bench_with_input(BenchmarkId::from_parameter(width), &width, |b, _| {
            b.iter(|| {
                sim.invalidate_plan();
                sim.get_block(black_box(&mut out), 1, true).expect("render");
            });
        });
    }
    group.finish();
}

fn bench_execute(c: &mut Criterion) {
    let mut group = c.benchmark_group("planner/execute");
    for &threads in &[1usize, 4] {
        for &width in WIDTHS {
            let mut sim = parallel_chains(threads, width);
            let mut out = vec![0.0; BLOCK_SIZE];
            group.bench_with_input(
                BenchmarkId::new(format!("threads={threads}"), width),
                &width,
                |b, _| {
                    b.iter(|| sim.get_block(black_box(&mut out), 1, true).expect("render"));
                },
            );
        }
    }
    group.finish();
}

criterion_group!(benches, bench_replan, bench_execute);
criterion_main!(benches);
