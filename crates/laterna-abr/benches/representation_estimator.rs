#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use laterna_abr::{
    EstimatorOptions, MetricsSample, Observation, RepresentationEstimator, SegmentContent,
    SegmentInfo, StreamContext, StreamEvent,
};
use laterna_core::{Adaptation, Manifest, MediaType, Period, Representation};
use web_time::Instant;

fn ladder() -> Vec<Arc<Representation>> {
    [300_000_u64, 800_000, 1_600_000, 3_200_000, 6_400_000]
        .iter()
        .map(|&b| Arc::new(Representation::from_bitrate(format!("r{b}"), b)))
        .collect()
}

fn context(representations: &[Arc<Representation>]) -> StreamContext {
    StreamContext {
        manifest: Arc::new(Manifest { is_dynamic: false }),
        period: Arc::new(Period {
            id: "p1".into(),
            start: 0.0,
        }),
        adaptation: Arc::new(Adaptation::new(MediaType::Video, representations.to_vec())),
    }
}

fn metrics(representation: &Arc<Representation>, size: u64) -> StreamEvent {
    StreamEvent::Metrics(MetricsSample {
        request_duration: Duration::from_millis(250),
        size,
        segment_duration: Some(4.0),
        content: SegmentContent {
            representation: Arc::clone(representation),
            segment: SegmentInfo {
                time: 0.0,
                duration: 4.0,
                is_init: false,
            },
        },
    })
}

fn observation(buffer_gap: f64) -> Observation {
    Observation {
        buffer_gap,
        position: 10.0,
        speed: 1.0,
        duration: 600.0,
        maximum_position: 600.0,
    }
}

fn bench_metrics_and_recompute(c: &mut Criterion) {
    let mut group = c.benchmark_group("estimator_metrics_and_recompute");

    for (label, bytes) in [
        ("low_bitrate", 32_000_u64),
        ("mid_bitrate", 96_000),
        ("high_bitrate", 256_000),
    ] {
        group.bench_with_input(
            BenchmarkId::new("32_samples", label),
            &bytes,
            |b, &bytes| {
                b.iter(|| {
                    let reps = ladder();
                    let mut estimator = RepresentationEstimator::new(
                        context(&reps),
                        reps.clone(),
                        EstimatorOptions::default(),
                    )
                    .unwrap();
                    let now = Instant::now();
                    for _ in 0..32 {
                        estimator.on_stream_event(metrics(&reps[1], bytes), now);
                    }
                    black_box(estimator.on_playback_observation(observation(15.0), now))
                });
            },
        );
    }

    group.finish();
}

fn bench_observation_stream(c: &mut Criterion) {
    let mut group = c.benchmark_group("estimator_observation_stream");

    for (label, buffer_gap) in [
        ("starving", 2.0_f64),
        ("steady", 15.0),
        ("deep_buffer", 40.0),
    ] {
        group.bench_with_input(
            BenchmarkId::new("64_ticks", label),
            &buffer_gap,
            |b, &buffer_gap| {
                b.iter(|| {
                    let reps = ladder();
                    let mut estimator = RepresentationEstimator::new(
                        context(&reps),
                        reps.clone(),
                        EstimatorOptions::default(),
                    )
                    .unwrap();
                    let now = Instant::now();
                    for _ in 0..8 {
                        estimator.on_stream_event(metrics(&reps[2], 96_000), now);
                    }
                    let mut last = None;
                    for _ in 0..64 {
                        last = estimator.on_playback_observation(observation(buffer_gap), now);
                    }
                    black_box(last)
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_metrics_and_recompute, bench_observation_stream);
criterion_main!(benches);
