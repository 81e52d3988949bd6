use criterion::{criterion_group, criterion_main, Criterion};
use clarans_parallel::{
    generate_clustered_points, random_means, Clarans, ClaransConfig, DenseMetric, Energy, Level,
    Norm,
};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

fn bench_levels(c: &mut Criterion) {
    let mut rng = ChaCha8Rng::seed_from_u64(42);
    let means = random_means(10, 4, 10.0, &mut rng);
    let points = generate_clustered_points(500, &means, 0.5, &mut rng).expect("bench data");

    for level in [Level::L0, Level::L1, Level::L2, Level::L3] {
        let config = ClaransConfig {
            k: 10,
            level,
            energy: Energy::Quadratic,
            max_rounds: 200,
            max_time_secs: 60.0,
            ..ClaransConfig::default()
        };
        c.bench_function(&format!("clarans_level{level}_5k_4d"), |b| {
            b.iter(|| {
                let metric = DenseMetric::new(points.clone(), Norm::L2);
                let mut clarans = Clarans::new(metric, config.clone()).expect("bench config");
                clarans.initialize_with_strategy().expect("bench init");
                let _outcome = clarans.run().expect("bench run");
            });
        });
    }
}

criterion_group!(benches, bench_levels);
criterion_main!(benches);
