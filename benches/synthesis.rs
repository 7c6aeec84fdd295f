use chrono::{TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use edgeplane::domain::{Exposure, ExposureId, Protocol};
use edgeplane::xds::{Synthesizer, XdsState};
use std::time::Duration;

fn seed_exposures(count: usize) -> Vec<Exposure> {
    (0..count)
        .map(|i| {
            let tcp = i % 4 == 0;
            Exposure {
                id: ExposureId::from_string(format!("exp_{:016x}", i)),
                app_id: format!("app-{}", i),
                protocol: if tcp { Protocol::Tcp } else { Protocol::Http },
                hostname: if tcp { String::new() } else { format!("app-{}.local", i) },
                container_port: 8080,
                host_port: if tcp { 10000 + i as u16 } else { 0 },
                created_at: Utc.timestamp_opt(1_700_000_000 + i as i64, 0).unwrap(),
            }
        })
        .collect()
}

fn bench_synthesis(c: &mut Criterion) {
    let mut group = c.benchmark_group("synthesis");
    group.measurement_time(Duration::from_secs(10));
    group.sample_size(50);

    let synthesizer = Synthesizer::default();

    for count in [10, 100, 1000].iter() {
        let exposures = seed_exposures(*count);

        group.bench_with_input(BenchmarkId::new("build", count), count, |b, &_count| {
            b.iter(|| synthesizer.build(black_box("1"), black_box(&exposures)))
        });

        let snapshot = synthesizer.build("1", &exposures);
        group.bench_with_input(BenchmarkId::new("encode", count), count, |b, &_count| {
            b.iter(|| snapshot.build_resources().unwrap())
        });

        // Alternates between two contents so every install produces a delta.
        let state = XdsState::new("bench-node");
        let smaller = &exposures[..exposures.len() / 2];
        group.bench_with_input(BenchmarkId::new("install", count), count, |b, &_count| {
            let mut flip = false;
            b.iter(|| {
                flip = !flip;
                let input = if flip { &exposures[..] } else { smaller };
                state.update(synthesizer.build(&state.next_version(), input)).unwrap()
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_synthesis);
criterion_main!(benches);
