//! Criterion benchmarks for TreeSHAP
//!
//! These benchmarks measure:
//! - Single-row explanation latency by tree depth
//! - Batch explanation throughput
//! - Plain margin prediction as a baseline

use churn_bank_service::ml::{Explainer, RegressionTree, TreeEnsemble, TreeExplainer, TreeNode};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;

const N_FEATURES: usize = 20;

/// Complete binary tree in heap layout with random splits and leaves
fn random_tree(rng: &mut StdRng, depth: usize) -> RegressionTree {
    let n_nodes = (1 << (depth + 1)) - 1;
    let first_leaf = (1 << depth) - 1;
    let mut covers = vec![0.0; n_nodes];
    for cover in covers.iter_mut().skip(first_leaf) {
        *cover = rng.gen_range(1.0..50.0);
    }
    for i in (0..first_leaf).rev() {
        covers[i] = covers[2 * i + 1] + covers[2 * i + 2];
    }

    let nodes = (0..n_nodes)
        .map(|i| {
            if i >= first_leaf {
                TreeNode::leaf(rng.gen_range(-0.5..0.5), covers[i])
            } else {
                TreeNode::split(
                    rng.gen_range(0..N_FEATURES),
                    rng.gen_range(0.0..1.0),
                    2 * i + 1,
                    2 * i + 2,
                    covers[i],
                )
            }
        })
        .collect();
    RegressionTree::new(nodes)
}

fn random_ensemble(n_trees: usize, depth: usize) -> Arc<TreeEnsemble> {
    let mut rng = StdRng::seed_from_u64(7);
    let trees = (0..n_trees).map(|_| random_tree(&mut rng, depth)).collect();
    Arc::new(TreeEnsemble::new(-1.2, N_FEATURES, trees))
}

fn random_rows(n: usize) -> Array2<f64> {
    let mut rng = StdRng::seed_from_u64(11);
    Array2::from_shape_fn((n, N_FEATURES), |_| rng.gen_range(0.0..1.0))
}

/// Benchmark one explanation per call at growing tree depth
fn bench_single_row(c: &mut Criterion) {
    let mut group = c.benchmark_group("shap_single_row");
    let rows = random_rows(1);

    for depth in [3, 6, 8] {
        let explainer = TreeExplainer::new(random_ensemble(100, depth)).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, _| {
            b.iter(|| explainer.shap_values(black_box(rows.row(0))).unwrap());
        });
    }

    group.finish();
}

/// Benchmark batch explanations, the path used for global importance
fn bench_shap_matrix(c: &mut Criterion) {
    let mut group = c.benchmark_group("shap_matrix");
    let explainer = TreeExplainer::new(random_ensemble(200, 6)).unwrap();

    for n_rows in [100, 1000] {
        let rows = random_rows(n_rows);
        group.throughput(Throughput::Elements(n_rows as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n_rows), &rows, |b, rows| {
            b.iter(|| explainer.shap_matrix(black_box(rows)).unwrap());
        });
    }

    group.finish();
}

/// Baseline: margin prediction over the same ensemble
fn bench_predict_margin(c: &mut Criterion) {
    let model = random_ensemble(200, 6);
    let rows = random_rows(1000);

    let mut group = c.benchmark_group("predict_margins");
    group.throughput(Throughput::Elements(1000));
    group.bench_function("1000_rows", |b| {
        b.iter(|| model.predict_margins(black_box(&rows)).unwrap());
    });
    group.finish();
}

criterion_group!(benches, bench_single_row, bench_shap_matrix, bench_predict_margin);
criterion_main!(benches);
