use gw_core::{
    Error, ExecOptions, FeatureMap, FeatureView, FeatureViewMut, PaddingMode, PlaneView,
    PlaneViewMut, ResizeMode, Shape, sample_bilinear, sample_bilinear_lanes, sample_nearest,
    sample_nearest_lanes, source_index,
};
use rayon::prelude::*;

use crate::grid::GridView;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GridSampleConfig {
    pub resize: ResizeMode,
    pub padding: PaddingMode,
    pub align_corners: bool,
}

impl GridSampleConfig {
    /// Validates the integer parameter surface: resize type and padding mode
    /// in `1..=3`, align corner in `0..=1`.
    pub fn from_params(resize_type: i32, padding_mode: i32, align_corner: i32) -> Result<Self, Error> {
        let resize = ResizeMode::try_from(resize_type).inspect_err(|e| tracing::warn!("{e}"))?;
        let padding = PaddingMode::try_from(padding_mode).inspect_err(|e| tracing::warn!("{e}"))?;
        let align_corners = match align_corner {
            0 => false,
            1 => true,
            value => {
                tracing::warn!(value, "unsupported align corner flag");
                return Err(Error::InvalidParam {
                    name: "align corner flag",
                    value,
                });
            }
        };

        Ok(Self {
            resize,
            padding,
            align_corners,
        })
    }
}

#[derive(Debug, Clone, Copy)]
enum Interp {
    Bilinear,
    Nearest,
}

fn dispatch(src: &FeatureView<'_>, cfg: &GridSampleConfig) -> Result<Interp, Error> {
    if src.shape().dims() != 3 {
        return Err(Error::Unsupported("grid sample on 4-D input"));
    }
    match cfg.resize {
        ResizeMode::Bilinear => Ok(Interp::Bilinear),
        ResizeMode::Nearest => Ok(Interp::Nearest),
        ResizeMode::Bicubic => Err(Error::Unsupported("bicubic grid sample")),
    }
}

fn output_shape(src: &FeatureView<'_>, grid: &GridView<'_>) -> Shape {
    Shape::new(src.channels(), grid.height(), grid.width()).packed(src.elempack())
}

/// Resamples `src` at the normalized coordinates of `grid`.
///
/// The output has the grid's spatial shape and the source's channel count
/// and packing, and is obtained from the blob allocator.
pub fn grid_sample(
    src: &FeatureView<'_>,
    grid: &GridView<'_>,
    cfg: &GridSampleConfig,
    opt: &ExecOptions,
) -> Result<FeatureMap, Error> {
    dispatch(src, cfg)?;
    let mut dst = FeatureMap::zeros_in(output_shape(src, grid), opt.blob_allocator.as_ref())?;
    grid_sample_into(src, grid, cfg, &mut dst.as_view_mut(), opt)?;
    Ok(dst)
}

pub fn grid_sample_into(
    src: &FeatureView<'_>,
    grid: &GridView<'_>,
    cfg: &GridSampleConfig,
    dst: &mut FeatureViewMut<'_>,
    opt: &ExecOptions,
) -> Result<(), Error> {
    let interp = dispatch(src, cfg)?;

    let expected = output_shape(src, grid);
    if dst.shape() != expected {
        let s = dst.shape();
        return Err(Error::ShapeMismatch {
            what: "grid sample output",
            expected: [expected.channels, expected.height, expected.width],
            actual: [s.channels, s.height, s.width],
        });
    }

    tracing::debug!(
        channels = src.channels(),
        elempack = src.elempack(),
        src_w = src.width(),
        src_h = src.height(),
        out_w = grid.width(),
        out_h = grid.height(),
        ?cfg,
        threads = opt.num_threads(),
        "grid_sample"
    );

    let src = *src;
    let grid = *grid;
    let cfg = *cfg;
    opt.install(|| {
        dst.par_channels_mut()
            .enumerate()
            .for_each(|(g, mut plane)| {
                let src_plane = src.channel(g);
                if src_plane.elempack() == 1 {
                    resample_plane_scalar(&src_plane, &grid, &cfg, interp, &mut plane);
                } else {
                    resample_plane_lanes(&src_plane, &grid, &cfg, interp, &mut plane);
                }
            });
    });

    Ok(())
}

fn resample_plane_scalar(
    src: &PlaneView<'_>,
    grid: &GridView<'_>,
    cfg: &GridSampleConfig,
    interp: Interp,
    dst: &mut PlaneViewMut<'_>,
) {
    let (w, h) = (src.width(), src.height());
    for y in 0..grid.height() {
        let coords = grid.row(y);
        let out_row = dst.row_mut(y);
        for (xy, out) in coords.chunks_exact(2).zip(out_row.iter_mut()) {
            let sx = source_index(xy[0], w, cfg.padding, cfg.align_corners);
            let sy = source_index(xy[1], h, cfg.padding, cfg.align_corners);
            *out = match interp {
                Interp::Bilinear => sample_bilinear(src, sx, sy),
                Interp::Nearest => sample_nearest(src, sx, sy),
            };
        }
    }
}

fn resample_plane_lanes(
    src: &PlaneView<'_>,
    grid: &GridView<'_>,
    cfg: &GridSampleConfig,
    interp: Interp,
    dst: &mut PlaneViewMut<'_>,
) {
    let (w, h) = (src.width(), src.height());
    let ep = src.elempack();
    for y in 0..grid.height() {
        let coords = grid.row(y);
        let out_row = dst.row_mut(y);
        for (xy, out) in coords.chunks_exact(2).zip(out_row.chunks_exact_mut(ep)) {
            let sx = source_index(xy[0], w, cfg.padding, cfg.align_corners);
            let sy = source_index(xy[1], h, cfg.padding, cfg.align_corners);
            match interp {
                Interp::Bilinear => sample_bilinear_lanes(src, sx, sy, out),
                Interp::Nearest => sample_nearest_lanes(src, sx, sy, out),
            }
        }
    }
}
