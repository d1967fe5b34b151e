use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use topicbus::{Bus, Envelope, Subscriber, TopicMatcher};

fn bench_matcher(c: &mut Criterion) {
    let mut group = c.benchmark_group("matcher");
    for pattern in ["orders.created", "orders.*", "orders.#", "a.#.z"] {
        let matcher = TopicMatcher::compile(pattern).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(pattern), &matcher, |b, m| {
            b.iter(|| black_box(m.matches(black_box("orders.created.eu"))))
        });
    }
    group.bench_function("compile_wildcard", |b| {
        b.iter(|| black_box(TopicMatcher::compile(black_box("orders.*.eu.#")).unwrap()))
    });
    group.finish();
}

fn bench_publish(c: &mut Criterion) {
    let mut group = c.benchmark_group("publish");
    for subscribers in [0usize, 1, 10] {
        let bus: Bus<u64> = Bus::new();
        let topic = bus.default_channel().topic("ticks").unwrap();
        let _subs: Vec<_> = (0..subscribers)
            .map(|_| topic.subscribe_data(Subscriber::new(|v| {
                black_box(v);
            })))
            .collect();
        group.bench_with_input(
            BenchmarkId::new("subscribers", subscribers),
            &subscribers,
            |b, _| b.iter(|| topic.publish(black_box(1)).unwrap()),
        );
    }
    group.finish();
}

fn bench_pattern_fan_in(c: &mut Criterion) {
    let bus: Bus<u64> = Bus::new();
    let channel = bus.default_channel();
    let _sub = channel
        .subscribe(
            "sensor.*",
            Subscriber::new(|env: Envelope<u64>| {
                black_box(env.into_data());
            }),
        )
        .unwrap();
    let topics: Vec<_> = (0..16)
        .map(|i| channel.topic(&format!("sensor.{i}")).unwrap())
        .collect();

    c.bench_function("pattern_fan_in_16_topics", |b| {
        b.iter(|| {
            for topic in &topics {
                topic.publish(black_box(1)).unwrap();
            }
        })
    });
}

fn bench_middleware(c: &mut Criterion) {
    let mut group = c.benchmark_group("middleware");
    for depth in [1usize, 4, 16] {
        let bus: Bus<u64> = Bus::new();
        let topic = bus.default_channel().topic("pipeline").unwrap();
        for _ in 0..depth {
            topic.middleware().add(|v: u64| Ok(v.wrapping_add(1)));
        }
        group.bench_with_input(BenchmarkId::new("depth", depth), &depth, |b, _| {
            b.iter(|| topic.publish(black_box(1)).unwrap())
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_matcher,
    bench_publish,
    bench_pattern_fan_in,
    bench_middleware
);
criterion_main!(benches);
