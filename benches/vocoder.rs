use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;

use voxmod::params::ModulationParams;
use voxmod::{ProcessorChain, SessionConfig};

fn bench_chain(c: &mut Criterion) {
    let config = SessionConfig::default();
    let hop = config.hop_size();

    let mut phase = 0.0f32;
    let input: Vec<f32> = (0..hop)
        .map(|_| {
            phase += 0.0627;
            0.4 * phase.sin()
        })
        .collect();
    let mut output = vec![0.0f32; hop];

    let mut neutral_chain = ProcessorChain::new(&config).unwrap();
    let neutral = ModulationParams::defaults_for(config.sample_rate);
    c.bench_function("chain_hop_neutral", |b| {
        b.iter(|| {
            neutral_chain
                .process_hop(black_box(&input), &neutral, &mut output)
                .unwrap();
        })
    });

    let mut full_chain = ProcessorChain::new(&config).unwrap();
    let mut full = ModulationParams::defaults_for(config.sample_rate);
    full.pitch_factor = 1.5;
    full.echo_intensity = 0.4;
    full.reverb_intensity = 0.3;
    c.bench_function("chain_hop_full", |b| {
        b.iter(|| {
            full_chain
                .process_hop(black_box(&input), &full, &mut output)
                .unwrap();
        })
    });
}

criterion_group!(benches, bench_chain);
criterion_main!(benches);
