use criterion::{Criterion, criterion_group, criterion_main};
use glam::Vec3;
use terramesh::cloud::combine::{CombineParams, clever_combine};
use terramesh::mesh::trimesh::TriangleMesh;

fn noisy_cloud(count: usize, seed: u32, origin: Vec3) -> (TriangleMesh, Vec3) {
    // Deterministic pseudo-random scatter over a 20 m square
    let mut state = seed.wrapping_mul(747796405).wrapping_add(2891336453);
    let mut rand = || {
        state = state.wrapping_mul(747796405).wrapping_add(2891336453);
        (state >> 9) as f32 / (1 << 23) as f32
    };

    let mut positions = Vec::with_capacity(count);
    for _ in 0..count {
        positions.push(Vec3::new(
            rand() * 20.0 - 10.0,
            rand() * 20.0 - 10.0,
            rand() * 0.2,
        ));
    }
    let normals = vec![Vec3::Z; count];
    (TriangleMesh::cloud(positions, Some(normals)), origin)
}

fn combine(c: &mut Criterion) {
    let mut group = c.benchmark_group("CleverCombine");

    let clouds = vec![
        noisy_cloud(200_000, 1, Vec3::new(-5.0, 0.0, 2.0)),
        noisy_cloud(200_000, 2, Vec3::new(5.0, 0.0, 2.0)),
        noisy_cloud(200_000, 3, Vec3::new(0.0, 5.0, 2.0)),
    ];
    let params = CombineParams {
        cell_size: 0.05,
        cell_aspect: 4.0,
        max_per_cell: 2,
    };

    group.sample_size(20);
    group.bench_function("three clouds, 600k points", |b| {
        b.iter(|| clever_combine(&clouds, &params))
    });

    group.bench_function("in-cloud merge", |b| {
        b.iter(|| {
            let mut cloud = clouds[0].0.clone();
            cloud.merge_by_distance(0.005);
            cloud
        })
    });

    group.finish();
}

criterion_group!(benches, combine);
criterion_main!(benches);
