//! Example: time grid sample and deformable im2col on a synthetic map.
//!
//! Builds a `channels x size x size` feature map, packs it, rotates it with an
//! affine grid and samples it with a swirling offset field. Per-kernel wall
//! time is printed for each repetition.
//!
//! Run from the workspace root:
//!   cargo run --release -p geowarp --example warp_timing -- --help

use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use geowarp::{
    DeformConvParams, ExecOptions, FeatureMap, GridSampleConfig, affine_grid, deformable_im2col,
    grid_sample,
};

#[derive(Parser, Debug)]
#[command(about = "Time geowarp kernels on a synthetic feature map")]
struct Args {
    #[arg(long, default_value_t = 32)]
    channels: usize,

    #[arg(long, default_value_t = 256)]
    size: usize,

    /// Pack width of the input map
    #[arg(long, default_value_t = 8)]
    elempack: usize,

    /// Worker threads (0 = rayon global pool)
    #[arg(long, default_value_t = 0)]
    threads: usize,

    /// Rotation applied by the affine grid, in degrees
    #[arg(long, default_value_t = 15.0)]
    angle: f32,

    #[arg(long, default_value_t = 5)]
    reps: usize,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let opt = if args.threads == 0 {
        ExecOptions::default()
    } else {
        ExecOptions::with_threads(args.threads).context("building worker pool")?
    };

    let src = FeatureMap::from_fn(args.channels, args.size, args.size, |c, y, x| {
        ((x / 8 + y / 8 + c) % 2) as f32
    })
    .repack(args.elempack)
    .context("packing input")?;

    let (s, co) = args.angle.to_radians().sin_cos();
    let theta = [[co, -s, 0.0], [s, co, 0.0]];
    let grid = affine_grid(&theta, args.size, args.size, false);
    let cfg = GridSampleConfig::from_params(1, 3, 0).context("grid sample config")?;

    let p = DeformConvParams::square(3, 1, 1, 1);
    let offset = FeatureMap::from_fn(2 * p.taps(), args.size, args.size, |c, y, x| {
        let phase = (x as f32 * 0.05).sin() + (y as f32 * 0.05).cos();
        if c % 2 == 0 { phase } else { -phase }
    });

    println!(
        "{} channels, {}x{}, elempack {}, {} threads",
        args.channels,
        args.size,
        args.size,
        args.elempack,
        opt.num_threads()
    );

    for rep in 0..args.reps {
        let t0 = Instant::now();
        let warped = grid_sample(&src.as_view(), &grid.as_view(), &cfg, &opt)
            .context("grid sample")?;
        let t_grid = t0.elapsed();

        let t1 = Instant::now();
        let cols = deformable_im2col(&warped.as_view(), &offset.as_view(), None, &p, &opt)
            .context("deformable im2col")?;
        let t_cols = t1.elapsed();

        println!(
            "rep {rep}: grid_sample {:>8.3} ms, deformable_im2col {:>8.3} ms ({}x{} matrix)",
            t_grid.as_secs_f64() * 1e3,
            t_cols.as_secs_f64() * 1e3,
            cols.rows(),
            cols.cols()
        );
    }

    Ok(())
}
