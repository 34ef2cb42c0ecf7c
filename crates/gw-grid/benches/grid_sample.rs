use criterion::{Criterion, black_box, criterion_group, criterion_main};
use gw_core::{ExecOptions, FeatureMap, PaddingMode, ResizeMode};
use gw_grid::{GridSampleConfig, affine_grid, grid_sample};

fn source(channels: usize, height: usize, width: usize) -> FeatureMap {
    FeatureMap::from_fn(channels, height, width, |c, y, x| ((c * 7 + y * 3 + x) % 251) as f32)
}

fn bench_grid_sample_bilinear(c: &mut Criterion) {
    let src = source(64, 128, 128);
    let theta = [[0.9, -0.2, 0.05], [0.2, 0.9, -0.05]];
    let grid = affine_grid(&theta, 128, 128, false);
    let cfg = GridSampleConfig {
        resize: ResizeMode::Bilinear,
        padding: PaddingMode::Zero,
        align_corners: false,
    };
    let opt = ExecOptions::default();

    c.bench_function("grid_sample_bilinear_64x128x128", |b| {
        b.iter(|| {
            let out = grid_sample(black_box(&src.as_view()), &grid.as_view(), &cfg, &opt)
                .expect("grid sample");
            black_box(out);
        });
    });
}

fn bench_grid_sample_packed(c: &mut Criterion) {
    let src = source(64, 128, 128).repack(8).expect("pack by 8");
    let theta = [[0.9, -0.2, 0.05], [0.2, 0.9, -0.05]];
    let grid = affine_grid(&theta, 128, 128, false);
    let cfg = GridSampleConfig {
        resize: ResizeMode::Bilinear,
        padding: PaddingMode::Reflection,
        align_corners: false,
    };
    let opt = ExecOptions::default();

    c.bench_function("grid_sample_bilinear_pack8_64x128x128", |b| {
        b.iter(|| {
            let out = grid_sample(black_box(&src.as_view()), &grid.as_view(), &cfg, &opt)
                .expect("grid sample");
            black_box(out);
        });
    });
}

criterion_group!(benches, bench_grid_sample_bilinear, bench_grid_sample_packed);
criterion_main!(benches);
