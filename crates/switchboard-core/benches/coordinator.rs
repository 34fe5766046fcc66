//! Channel coordination benchmarks.
//!
//! Measures membership changes and member lookups with a populated model.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;
use switchboard_protocol::{DisplayMetadata, Identity};
use tenvis_switchboard_core::{ContextChannel, Coordinator, Model};

fn coordinator_with_windows(windows: usize) -> (Arc<Coordinator>, Vec<Identity>) {
    let channels = ["red", "green", "blue"].into_iter().map(|id| {
        ContextChannel::desktop(
            id,
            DisplayMetadata {
                name: id.to_string(),
                color: id.to_string(),
                glyph: None,
            },
        )
    });
    let model = Arc::new(Model::new(channels).unwrap());
    let coordinator = Coordinator::new(model.clone());

    let identities: Vec<_> = (0..windows)
        .map(|i| Identity::new("bench", format!("window-{}", i)))
        .collect();
    for identity in &identities {
        model.register_window(identity.clone());
    }
    (coordinator, identities)
}

fn bench_join_channel(c: &mut Criterion) {
    let mut group = c.benchmark_group("join_channel");

    for windows in [10, 100, 1000] {
        let (coordinator, identities) = coordinator_with_windows(windows);
        let red = coordinator.get_channel_by_id("red").unwrap();
        let blue = coordinator.get_channel_by_id("blue").unwrap();
        let mover = identities[0].clone();

        group.bench_with_input(BenchmarkId::from_parameter(windows), &windows, |b, _| {
            b.iter(|| {
                coordinator.join_channel(black_box(&mover), &red).unwrap();
                coordinator.join_channel(black_box(&mover), &blue).unwrap();
            });
        });
    }

    group.finish();
}

fn bench_channel_members(c: &mut Criterion) {
    let mut group = c.benchmark_group("channel_members");

    for windows in [10, 100, 1000] {
        let (coordinator, identities) = coordinator_with_windows(windows);
        let red = coordinator.get_channel_by_id("red").unwrap();
        for identity in identities.iter().step_by(2) {
            coordinator.join_channel(identity, &red).unwrap();
        }

        group.bench_with_input(BenchmarkId::from_parameter(windows), &windows, |b, _| {
            b.iter(|| coordinator.get_channel_members(black_box(&red)));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_join_channel, bench_channel_members);
criterion_main!(benches);
