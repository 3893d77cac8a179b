use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;
use tapegrad::ops::{add, multiply, take};
use tapegrad::{backward, check_backward_computation, Array, Context, Device, Dtype, GraphId};

// Helper function to create a random tracked array
fn create_random(shape: &[usize], device: &Arc<Device>, graph: &GraphId) -> Array {
    let array = Array::random_normal(shape, Dtype::Float32, 0.0, 1.0, device).unwrap();
    array.require_grad(graph).unwrap();
    array
}

fn bench_backward_chain(c: &mut Criterion) {
    let device = Context::new().default_device().unwrap();
    let graph = GraphId::new("bench_chain");
    let mut group = c.benchmark_group("backward_chain");

    for depth in [10usize, 100, 500] {
        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, &depth| {
            b.iter(|| {
                let x = create_random(&[64], &device, &graph);
                let mut y = x.clone();
                for _ in 0..depth {
                    // Each step consumes `y` twice, so every node is a diamond
                    y = add(&multiply(&y, &x).unwrap(), &y).unwrap();
                }
                backward(&y, &graph).unwrap();
                black_box(x.grad(&graph))
            })
        });
    }
    group.finish();
}

fn bench_take_backward(c: &mut Criterion) {
    let device = Context::new().default_device().unwrap();
    let graph = GraphId::new("bench_take");
    let indices: Vec<i64> = (0..4096).map(|i| (i * 7919) % 1024).collect();
    let indices = Array::from_vec(indices, &[4096], &device).unwrap();

    c.bench_function("take_backward_1024x16", |b| {
        b.iter(|| {
            let a = create_random(&[1024, 16], &device, &graph);
            let out = take(&a, &indices, 0).unwrap();
            backward(&out, &graph).unwrap();
            black_box(a.grad(&graph))
        })
    });
}

fn bench_gradient_check(c: &mut Criterion) {
    let device = Context::new().default_device().unwrap();
    let graph = GraphId::new("bench_check");

    c.bench_function("check_backward_multiply_32", |b| {
        b.iter(|| {
            let x = create_random(&[32], &device, &graph);
            let y = create_random(&[32], &device, &graph);
            let gout = Array::ones(&[32], Dtype::Float32, &device).unwrap();
            let eps = vec![
                Array::full(&[32], Dtype::Float32, 1e-3, &device).unwrap(),
                Array::full(&[32], Dtype::Float32, 1e-3, &device).unwrap(),
            ];
            check_backward_computation(
                |xs: &[Array]| Ok(vec![multiply(&xs[0], &xs[1])?]),
                &[x, y],
                &[gout],
                &eps,
                1e-2,
                1e-2,
                &graph,
            )
            .unwrap();
        })
    });
}

criterion_group!(
    benches,
    bench_backward_chain,
    bench_take_backward,
    bench_gradient_check
);
criterion_main!(benches);
