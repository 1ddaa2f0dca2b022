//! Benchmarks for the filtering and density-estimation hot paths.
//!
//! Covers the per-block cost of the single-continuous decoder and the
//! hybrid classifier across grid sizes, and kernel-compression fit and
//! evaluation under different kernel budgets.

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use rd_core::classifier::{ClassifierConfig, HybridStateSpaceClassifier};
use rd_core::config::TransitionSpec;
use rd_core::decoder::StateSpaceDecoder;
use rd_core::estimation::{DensityEstimator, KernelCompression};
use rd_core::state_space::StateSpace;
use rd_core::transitions::build_transition;

const BLOCK_BINS: usize = 16;

fn likelihood_block(bins: usize, states: usize, seed: u64) -> Array2<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    Array2::from_shape_fn((bins, states), |_| rng.random_range(0.0..1.0))
}

fn bench_decoder_filter(c: &mut Criterion) {
    let mut group = c.benchmark_group("decoder_filter");
    for &(label, states) in &[("coarse", 64usize), ("medium", 256), ("fine", 1024)] {
        let space = Arc::new(StateSpace::new(&[0.0], &[100.0], &[states]).unwrap());
        let spec = TransitionSpec::RandomWalk {
            bandwidth: Some(5.0),
        };
        let transition = build_transition(&spec, &space).unwrap();
        let mut decoder = StateSpaceDecoder::new(space, transition).unwrap();
        let likelihoods = likelihood_block(BLOCK_BINS, states, 11);

        group.bench_with_input(BenchmarkId::new("block_16_bins", label), &states, |b, _| {
            b.iter(|| {
                decoder.reset();
                black_box(decoder.decode(black_box(likelihoods.view())).unwrap());
            });
        });
    }
    group.finish();
}

fn bench_classifier_filter(c: &mut Criterion) {
    let mut group = c.benchmark_group("classifier_filter");
    for &(label, states) in &[("coarse", 32usize), ("medium", 128), ("fine", 256)] {
        let space = Arc::new(StateSpace::new(&[0.0], &[100.0], &[states]).unwrap());
        let mut classifier =
            HybridStateSpaceClassifier::new(space, &ClassifierConfig::default()).unwrap();
        let likelihoods = likelihood_block(BLOCK_BINS, states, 13);

        group.bench_with_input(BenchmarkId::new("block_16_bins", label), &states, |b, _| {
            b.iter(|| {
                classifier.reset();
                black_box(classifier.decode(black_box(likelihoods.view())).unwrap());
            });
        });
    }
    group.finish();
}

fn bench_kernel_compression(c: &mut Criterion) {
    let mut group = c.benchmark_group("kernel_compression");

    let samples = 2000;
    let mut rng = StdRng::seed_from_u64(5);
    let values: Vec<f64> = (0..samples)
        .flat_map(|_| [rng.random_range(0.0..100.0), rng.random_range(-3.0..3.0)])
        .collect();
    let data = Array2::from_shape_vec((samples, 2), values).unwrap();

    for &(label, limit) in &[("tight", 64usize), ("loose", 256)] {
        group.bench_with_input(BenchmarkId::new("fit_2000_samples", label), &limit, |b, &limit| {
            b.iter(|| {
                let mut model =
                    KernelCompression::new(&[2.0, 0.5], Some(1.5), Some(limit)).unwrap();
                model.fit(black_box(data.view())).unwrap();
                black_box(model.kernel_count());
            });
        });
    }

    let mut fitted = KernelCompression::new(&[2.0, 0.5], Some(1.5), Some(128)).unwrap();
    fitted.fit(data.view()).unwrap();
    let grid = StateSpace::new(&[0.0, -3.0], &[100.0, 3.0], &[50, 10]).unwrap();
    group.bench_function("evaluate_500_points", |b| {
        b.iter(|| black_box(fitted.evaluate(black_box(grid.points())).unwrap()));
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_decoder_filter,
    bench_classifier_filter,
    bench_kernel_compression
);
criterion_main!(benches);
