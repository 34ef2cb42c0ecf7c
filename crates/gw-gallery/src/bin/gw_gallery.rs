use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use image::GrayImage;
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

use gw_core::{ExecOptions, FeatureMap, Shape};
use gw_deform::{Activation, ConvWeight, DeformConvParams, DeformableConv2d, ReferenceGemm, deformable_im2col};
use gw_grid::{GridSampleConfig, affine_grid, grid_sample};

#[derive(Parser, Debug)]
#[command(name = "gw_gallery")]
#[command(about = "Run geowarp kernels on external fixtures")]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    #[command(name = "grid_sample")]
    GridSample(GridSampleArgs),
    #[command(name = "deform_im2col")]
    DeformIm2col(DeformArgs),
    #[command(name = "deform_conv")]
    DeformConv(DeformArgs),
}

#[derive(Args, Debug, Clone)]
struct CommonArgs {
    #[arg(long, required = true)]
    input: PathBuf,
    #[arg(long, required = true)]
    case: PathBuf,
    #[arg(long, default_value = "docs/fig/raw")]
    out: PathBuf,
    /// Worker threads; 0 uses the global rayon pool.
    #[arg(long, default_value_t = 0)]
    threads: usize,
    /// Pack width the input is laid out with before running the kernel.
    #[arg(long, default_value_t = 1)]
    elempack: usize,
}

#[derive(Args, Debug, Clone)]
struct GridSampleArgs {
    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Args, Debug, Clone)]
struct DeformArgs {
    #[command(flatten)]
    common: CommonArgs,
    #[arg(long, default_value_t = 3)]
    kernel: usize,
    #[arg(long, default_value_t = 1)]
    stride: usize,
    #[arg(long, default_value_t = 1)]
    dilation: usize,
    #[arg(long, default_value_t = 1)]
    pad: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CaseEnvelope {
    case: String,
    width: usize,
    height: usize,
    #[serde(default)]
    notes: Option<String>,
    #[serde(default)]
    params: serde_json::Value,
}

fn default_one() -> i32 {
    1
}

fn identity_theta() -> [[f32; 3]; 2] {
    [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0]]
}

#[derive(Debug, Clone, Deserialize)]
struct GridSamplePayload {
    #[serde(default = "default_one")]
    resize_type: i32,
    #[serde(default = "default_one")]
    padding_mode: i32,
    #[serde(default)]
    align_corner: i32,
    #[serde(default = "identity_theta")]
    theta: [[f32; 3]; 2],
    #[serde(default)]
    out_width: Option<usize>,
    #[serde(default)]
    out_height: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
struct DeformPayload {
    /// Constant `(dh, dw)` added to every tap.
    #[serde(default)]
    shift: [f32; 2],
    /// Amplitude of a per-tap radial offset, in pixels.
    #[serde(default)]
    swirl: f32,
    #[serde(default)]
    modulate: bool,
    #[serde(default)]
    activation_type: i32,
    #[serde(default)]
    activation_params: Vec<f32>,
}

#[derive(Debug, Clone, Serialize)]
struct MetaGridSample {
    resize: String,
    padding: String,
    align_corners: bool,
    theta: [[f32; 3]; 2],
    out_size: [usize; 2],
    elempack: usize,
    threads: usize,
}

#[derive(Debug, Clone, Serialize)]
struct MetaDeform {
    kernel: usize,
    stride: usize,
    dilation: usize,
    pad: usize,
    out_size: [usize; 2],
    shift: [f32; 2],
    swirl: f32,
    modulate: bool,
    elempack: usize,
    threads: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    activation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    matrix: Option<[usize; 2]>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.cmd {
        Command::GridSample(args) => run_grid_sample(args),
        Command::DeformIm2col(args) => run_deform_im2col(args),
        Command::DeformConv(args) => run_deform_conv(args),
    }
}

fn run_grid_sample(args: GridSampleArgs) -> Result<()> {
    let common = &args.common;
    let (case_dir, case) = prepare_case(common, "grid_sample")?;
    let payload: GridSamplePayload = parse_payload(&case)?;
    let src = load_input(&common.input, &case, common.elempack)?;
    let opt = exec_options(common.threads)?;

    let cfg = GridSampleConfig::from_params(payload.resize_type, payload.padding_mode, payload.align_corner)
        .context("validating grid sample params")?;
    let out_w = payload.out_width.unwrap_or(case.width);
    let out_h = payload.out_height.unwrap_or(case.height);
    let grid = affine_grid(&payload.theta, out_w, out_h, cfg.align_corners);

    let out = grid_sample(&src.as_view(), &grid.as_view(), &cfg, &opt).context("running grid sample")?;
    let out = out.repack(1).context("unpacking output")?;

    // Channel 0 of the unpacked output.
    let plane = &out.data()[..out_w * out_h];
    save_luma_raw(case_dir.join("warped.png"), out_w, out_h, f32_to_u8_clamped(plane))?;

    write_json(
        case_dir.join("meta.json"),
        &MetaGridSample {
            resize: format!("{:?}", cfg.resize),
            padding: format!("{:?}", cfg.padding),
            align_corners: cfg.align_corners,
            theta: payload.theta,
            out_size: [out_w, out_h],
            elempack: common.elempack,
            threads: opt.num_threads(),
        },
    )?;

    tracing::info!(case = %case.case, out_w, out_h, "grid sample written");
    Ok(())
}

fn run_deform_im2col(args: DeformArgs) -> Result<()> {
    let common = &args.common;
    let (case_dir, case) = prepare_case(common, "deform_im2col")?;
    let payload: DeformPayload = parse_payload(&case)?;
    let src = load_input(&common.input, &case, common.elempack)?;
    let opt = exec_options(common.threads)?;

    let p = DeformConvParams::square(args.kernel, args.stride, args.dilation, args.pad);
    let (out_w, out_h) = p
        .out_size(src.width(), src.height())
        .context("computing output size")?;
    let (offset, mask) = build_guides(&p, out_w, out_h, &payload);

    let cols = deformable_im2col(
        &src.as_view(),
        &offset.as_view(),
        mask.as_ref().map(|m| m.as_view()).as_ref(),
        &p,
        &opt,
    )
    .context("running deformable im2col")?;

    // One image per tap, each showing the sampled input at output resolution.
    for tap in 0..p.taps() {
        let plane: Vec<f32> = (0..cols.cols()).map(|col| cols.get(tap, col)).collect();
        save_luma_raw(
            case_dir.join(format!("tap_{tap}.png")),
            out_w,
            out_h,
            f32_to_u8_clamped(&plane),
        )?;
    }

    write_json(
        case_dir.join("meta.json"),
        &MetaDeform {
            kernel: args.kernel,
            stride: args.stride,
            dilation: args.dilation,
            pad: args.pad,
            out_size: [out_w, out_h],
            shift: payload.shift,
            swirl: payload.swirl,
            modulate: payload.modulate,
            elempack: common.elempack,
            threads: opt.num_threads(),
            activation: None,
            matrix: Some([cols.rows(), cols.cols()]),
        },
    )?;

    tracing::info!(case = %case.case, taps = p.taps(), "deformable im2col written");
    Ok(())
}

fn run_deform_conv(args: DeformArgs) -> Result<()> {
    let common = &args.common;
    let (case_dir, case) = prepare_case(common, "deform_conv")?;
    let payload: DeformPayload = parse_payload(&case)?;
    let src = load_input(&common.input, &case, common.elempack)?;
    let opt = exec_options(common.threads)?;

    let p = DeformConvParams::square(args.kernel, args.stride, args.dilation, args.pad);
    let (out_w, out_h) = p
        .out_size(src.width(), src.height())
        .context("computing output size")?;
    let (offset, mask) = build_guides(&p, out_w, out_h, &payload);

    // Box filter: every tap weighs the same, so the output is a local mean
    // over the deformed footprint.
    let n = p.taps() * src.channels();
    let weight = ConvWeight::from_vec(1, src.channels(), p.kernel_h, p.kernel_w, vec![1.0 / n as f32; n])
        .context("building box weights")?;
    let activation = Activation::from_params(payload.activation_type, &payload.activation_params)
        .context("validating activation params")?;
    let conv =
        DeformableConv2d::new(p, weight, None, activation, 1).context("building deformable conv")?;

    let out = conv
        .forward(
            &src.as_view(),
            &offset.as_view(),
            mask.as_ref().map(|m| m.as_view()).as_ref(),
            &ReferenceGemm,
            &opt,
        )
        .context("running deformable conv")?;

    save_luma_raw(case_dir.join("output.png"), out_w, out_h, f32_to_u8_vis(out.data()))?;

    write_json(
        case_dir.join("meta.json"),
        &MetaDeform {
            kernel: args.kernel,
            stride: args.stride,
            dilation: args.dilation,
            pad: args.pad,
            out_size: [out_w, out_h],
            shift: payload.shift,
            swirl: payload.swirl,
            modulate: payload.modulate,
            elempack: common.elempack,
            threads: opt.num_threads(),
            activation: Some(format!("{activation:?}")),
            matrix: None,
        },
    )?;

    tracing::info!(case = %case.case, out_w, out_h, "deformable conv written");
    Ok(())
}

fn exec_options(threads: usize) -> Result<ExecOptions> {
    if threads == 0 {
        return Ok(ExecOptions::default());
    }
    ExecOptions::with_threads(threads).context("building worker pool")
}

/// Offset map (`2 * taps` channels) and optional mask (`taps` channels).
fn build_guides(
    p: &DeformConvParams,
    out_w: usize,
    out_h: usize,
    payload: &DeformPayload,
) -> (FeatureMap, Option<FeatureMap>) {
    let kw = p.kernel_w as f32;
    let kh = p.kernel_h as f32;
    let cx = (kw - 1.0) * 0.5;
    let cy = (kh - 1.0) * 0.5;

    let offset = FeatureMap::from_fn(2 * p.taps(), out_h, out_w, |c, _, _| {
        let tap = c / 2;
        let ty = (tap / p.kernel_w) as f32 - cy;
        let tx = (tap % p.kernel_w) as f32 - cx;
        if c % 2 == 0 {
            payload.shift[0] + payload.swirl * tx
        } else {
            payload.shift[1] - payload.swirl * ty
        }
    });

    let mask = payload.modulate.then(|| {
        FeatureMap::from_fn(p.taps(), out_h, out_w, |c, _, _| {
            let ty = (c / p.kernel_w) as f32 - cy;
            let tx = (c % p.kernel_w) as f32 - cx;
            (-(tx * tx + ty * ty) * 0.5).exp()
        })
    });

    (offset, mask)
}

fn prepare_case(common: &CommonArgs, case_name: &str) -> Result<(PathBuf, CaseEnvelope)> {
    ensure_file_exists(&common.input, "input")?;
    ensure_file_exists(&common.case, "case")?;

    let case: CaseEnvelope = read_json(&common.case)
        .with_context(|| format!("reading case json at {}", common.case.display()))?;

    if case.case != case_name {
        bail!(
            "case mismatch: expected '{}', got '{}'.",
            case_name,
            case.case
        );
    }

    let case_dir = common.out.join(case_name);
    fs::create_dir_all(&case_dir)
        .with_context(|| format!("creating output directory {}", case_dir.display()))?;

    fs::copy(&common.input, case_dir.join("input.png")).with_context(|| {
        format!(
            "copying input {} -> {}",
            common.input.display(),
            case_dir.join("input.png").display()
        )
    })?;
    fs::copy(&common.case, case_dir.join("case.json")).with_context(|| {
        format!(
            "copying case {} -> {}",
            common.case.display(),
            case_dir.join("case.json").display()
        )
    })?;

    Ok((case_dir, case))
}

fn parse_payload<T: for<'de> Deserialize<'de>>(case: &CaseEnvelope) -> Result<T> {
    // Absent params fall back to every field's default.
    let value = if case.params.is_null() {
        serde_json::Value::Object(Default::default())
    } else {
        case.params.clone()
    };
    serde_json::from_value(value)
        .with_context(|| format!("parsing params for case '{}'", case.case))
}

/// Loads the input as a one-channel map, replicated to `elempack` channels so
/// the packed code paths run on real data.
fn load_input(path: &Path, case: &CaseEnvelope, elempack: usize) -> Result<FeatureMap> {
    let dyn_img =
        image::open(path).with_context(|| format!("opening input image {}", path.display()))?;
    let luma = dyn_img.to_luma8();
    let (w, h) = (luma.width() as usize, luma.height() as usize);

    if case.width != w || case.height != h {
        bail!(
            "case dimensions ({}, {}) do not match input dimensions ({}, {}).",
            case.width,
            case.height,
            w,
            h
        );
    }

    let data: Vec<f32> = luma
        .into_raw()
        .into_iter()
        .map(f32::from)
        .cycle()
        .take(w * h * elempack)
        .collect();
    let map = FeatureMap::from_vec(Shape::new(elempack, h, w), data)
        .with_context(|| format!("constructing feature map from {}", path.display()))?;
    map.repack(elempack)
        .with_context(|| format!("packing input by {elempack}"))
}

fn save_luma_raw(path: PathBuf, width: usize, height: usize, data: Vec<u8>) -> Result<()> {
    let gray = GrayImage::from_raw(width as u32, height as u32, data)
        .context("constructing GrayImage from raw bytes")?;
    gray.save(&path)
        .with_context(|| format!("saving image {}", path.display()))
}

fn f32_to_u8_clamped(data: &[f32]) -> Vec<u8> {
    data.iter()
        .map(|&v| v.round().clamp(0.0, 255.0) as u8)
        .collect()
}

fn f32_to_u8_vis(data: &[f32]) -> Vec<u8> {
    if data.is_empty() {
        return Vec::new();
    }

    let mut min_v = f32::INFINITY;
    let mut max_v = f32::NEG_INFINITY;
    for &v in data {
        if v < min_v {
            min_v = v;
        }
        if v > max_v {
            max_v = v;
        }
    }

    if (max_v - min_v).abs() < 1e-12 {
        return vec![0u8; data.len()];
    }

    let scale = 255.0 / (max_v - min_v);
    data.iter()
        .map(|&v| ((v - min_v) * scale).round().clamp(0.0, 255.0) as u8)
        .collect()
}

fn write_json(path: PathBuf, value: &impl Serialize) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value).context("serializing json")?;
    fs::write(&path, bytes).with_context(|| format!("writing json {}", path.display()))
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let data = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_slice(&data).with_context(|| format!("parsing json {}", path.display()))
}

fn ensure_file_exists(path: &Path, what: &str) -> Result<()> {
    if !path.exists() {
        bail!("{} file does not exist: {}", what, path.display());
    }
    if !path.is_file() {
        bail!("{} path is not a file: {}", what, path.display());
    }
    Ok(())
}
