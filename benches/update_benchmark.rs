//! Throughput of the two hot paths: acting on one stacked observation and a
//! full K-epoch update over a rollout.

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use ndarray::Array4;
use pixel_ppo::activations::Activation;
use pixel_ppo::algorithms::{PpoAgent, PpoBuilder};
use pixel_ppo::conv_encoder;

const ROLLOUT: usize = 64;

fn agent(k_epochs: usize) -> PpoAgent {
    PpoBuilder::new(4, 6)
        .frame_size(42, 42)
        .encoder(conv_encoder!((8, 6, 3), (16, 4, 2); Some(64), Activation::Relu))
        .k_epochs(k_epochs)
        .seed(0)
        .build()
        .unwrap()
}

fn observation(step: usize) -> Array4<f32> {
    Array4::from_shape_fn((4, 42, 42, 1), |(f, h, w, _)| ((step + f + h * w) % 17) as f32 / 16.0)
}

fn filled_agent(k_epochs: usize) -> PpoAgent {
    let mut agent = agent(k_epochs);
    for step in 0..ROLLOUT {
        agent.act(observation(step).view()).unwrap();
        agent.buffer_mut().rewards.push((step % 7) as f32 * 0.1);
        agent.buffer_mut().is_terminals.push(step % 32 == 31);
    }
    agent
}

fn bench_select_action(c: &mut Criterion) {
    let mut agent = agent(1);
    let frames = observation(0);
    c.bench_function("select_action_4x42x42", |b| {
        b.iter(|| black_box(agent.select_action(black_box(frames.view())).unwrap()))
    });
}

fn bench_update(c: &mut Criterion) {
    let mut group = c.benchmark_group("update");
    group.sample_size(10);
    for &k_epochs in &[1usize, 4] {
        group.bench_function(format!("rollout_{}_epochs_{}", ROLLOUT, k_epochs), |b| {
            b.iter_batched(
                || filled_agent(k_epochs),
                |mut agent| black_box(agent.update().unwrap()),
                BatchSize::LargeInput,
            )
        });
    }
    group.finish();
}

criterion_group!(benches, bench_select_action, bench_update);
criterion_main!(benches);
