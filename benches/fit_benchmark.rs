use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use gsvb::data::RegressionData;
use gsvb::elbo::{ElboEstimator, MonteCarloElbo};
use gsvb::fit::fit;
use gsvb::model::{FitOptions, Hyperparameters, VariationalState};
use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

/// Groups of four columns; only the first two groups carry signal.
const GROUP_SIZE: usize = 4;

fn random_problem(n: usize, num_groups: usize) -> RegressionData {
    let p = num_groups * GROUP_SIZE;
    let mut rng = StdRng::seed_from_u64(0x5EED_CA71 + p as u64);
    let x = Array2::from_shape_fn((n, p), |_| rng.sample::<f64, _>(StandardNormal));
    let beta = Array1::from_shape_fn(p, |j| if j < 2 * GROUP_SIZE { 1.0 } else { 0.0 });
    let noise = Array1::from_shape_fn(n, |_| 0.5 * rng.sample::<f64, _>(StandardNormal));
    let y = x.dot(&beta) + noise;
    let labels: Vec<i64> = (0..p).map(|j| (j / GROUP_SIZE) as i64).collect();
    RegressionData::new(y, x, &labels).expect("valid synthetic problem")
}

fn benchmark_fit(c: &mut Criterion) {
    let hyper = Hyperparameters::default();
    let options = FitOptions {
        max_iterations: 50,
        tolerance: 1e-4,
        ..FitOptions::default()
    };
    let problems: Vec<_> = [5_usize, 20, 50]
        .iter()
        .map(|&groups| (groups, random_problem(500, groups)))
        .collect();

    let mut group = c.benchmark_group("cavi_fit");
    group.sample_size(10);
    for (num_groups, data) in problems.iter() {
        group.throughput(Throughput::Elements(data.num_coefficients() as u64));

        group.bench_with_input(BenchmarkId::new("fit", num_groups), data, |b, input| {
            b.iter(|| {
                let start = VariationalState::default_start(input.num_coefficients(), &hyper);
                let result = fit(black_box(input), &hyper, &options, start);
                black_box(result.expect("fit succeeds"));
            });
        });

        let start = VariationalState::default_start(data.num_coefficients(), &hyper);
        let estimator = MonteCarloElbo::new(500, 0);
        group.bench_with_input(BenchmarkId::new("elbo", num_groups), data, |b, input| {
            b.iter(|| black_box(estimator.estimate(black_box(input), &start, &hyper)));
        });
    }
    group.finish();
}

criterion_group!(cavi_fit, benchmark_fit);
criterion_main!(cavi_fit);
