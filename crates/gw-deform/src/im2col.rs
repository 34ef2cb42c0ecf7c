use gw_core::{Allocator, BilinearTap, Error, ExecOptions, FeatureView, Shape};
use rayon::prelude::*;

use crate::params::DeformConvParams;

/// Column buffer feeding a GEMM-based convolution.
///
/// Layout is `[channel_group][tap][output_index][lane]`. Read as a matrix,
/// logical row `channel * taps + tap` and column `output_index` give the
/// standard im2col matrix of shape `(channels * taps, out_h * out_w)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Im2colBuffer {
    channels: usize,
    taps: usize,
    out_w: usize,
    out_h: usize,
    elempack: usize,
    data: Vec<f32>,
}

impl Im2colBuffer {
    pub fn zeros_in(
        channels: usize,
        taps: usize,
        out_w: usize,
        out_h: usize,
        elempack: usize,
        allocator: &dyn Allocator,
    ) -> Result<Self, Error> {
        // Same packing contract as feature maps.
        Shape::new(channels, out_h, out_w).packed(elempack).validate()?;
        let len = channels
            .checked_mul(taps)
            .and_then(|v| v.checked_mul(out_w))
            .and_then(|v| v.checked_mul(out_h))
            .ok_or(Error::Allocation { len: usize::MAX })?;
        let data = allocator.alloc_zeroed(len)?;
        Ok(Self {
            channels,
            taps,
            out_w,
            out_h,
            elempack,
            data,
        })
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn taps(&self) -> usize {
        self.taps
    }

    pub fn out_w(&self) -> usize {
        self.out_w
    }

    pub fn out_h(&self) -> usize {
        self.out_h
    }

    pub fn elempack(&self) -> usize {
        self.elempack
    }

    pub fn groups(&self) -> usize {
        self.channels / self.elempack
    }

    pub fn rows(&self) -> usize {
        self.channels * self.taps
    }

    pub fn cols(&self) -> usize {
        self.out_w * self.out_h
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Packed line of one `(group, tap)`: `cols() * elempack` values.
    pub fn line(&self, group: usize, tap: usize) -> &[f32] {
        let len = self.cols() * self.elempack;
        let start = (group * self.taps + tap) * len;
        &self.data[start..start + len]
    }

    /// Matrix element at logical `(row, col)`.
    pub fn get(&self, row: usize, col: usize) -> f32 {
        let (c, tap) = (row / self.taps, row % self.taps);
        let (g, lane) = (c / self.elempack, c % self.elempack);
        self.line(g, tap)[col * self.elempack + lane]
    }

    /// Splits the buffer into per-output-row work units.
    ///
    /// Entry `h_col` holds, for every `group * taps + tap`, the mutable slice
    /// covering output row `h_col` of that line. Entries are disjoint.
    fn rows_mut(&mut self) -> Vec<Vec<&mut [f32]>> {
        let row_len = self.out_w * self.elempack;
        let lines = self.groups() * self.taps;
        let mut rows: Vec<Vec<&mut [f32]>> = (0..self.out_h)
            .map(|_| Vec::with_capacity(lines))
            .collect();
        if row_len == 0 || self.out_h == 0 {
            return rows;
        }
        for (k, chunk) in self.data.chunks_mut(row_len).enumerate() {
            rows[k % self.out_h].push(chunk);
        }
        rows
    }
}

fn check_source(src: &FeatureView<'_>) -> Result<(), Error> {
    if src.shape().dims() != 3 {
        return Err(Error::Unsupported("im2col on 4-D input"));
    }
    Ok(())
}

fn check_guide(
    what: &'static str,
    guide: &FeatureView<'_>,
    channels: usize,
    out_w: usize,
    out_h: usize,
) -> Result<(), Error> {
    let s = guide.shape();
    if s.dims() != 3 || s.channels != channels || s.width != out_w || s.height != out_h {
        return Err(Error::ShapeMismatch {
            what,
            expected: [channels, out_h, out_w],
            actual: [s.channels, s.height, s.width],
        });
    }
    Ok(())
}

fn check_dst(dst: &Im2colBuffer, src: &FeatureView<'_>, taps: usize, out_w: usize, out_h: usize) -> Result<(), Error> {
    if dst.channels != src.channels()
        || dst.elempack != src.elempack()
        || dst.taps != taps
        || dst.out_w != out_w
        || dst.out_h != out_h
    {
        return Err(Error::ShapeMismatch {
            what: "im2col buffer",
            expected: [src.channels() * taps, out_h, out_w],
            actual: [dst.channels * dst.taps, dst.out_h, dst.out_w],
        });
    }
    Ok(())
}

/// Plain im2col: every tap reads its integer source pixel, zero when padded.
pub fn im2col(
    src: &FeatureView<'_>,
    p: &DeformConvParams,
    opt: &ExecOptions,
) -> Result<Im2colBuffer, Error> {
    check_source(src)?;
    let (out_w, out_h) = p.out_size(src.width(), src.height())?;
    let mut dst = Im2colBuffer::zeros_in(
        src.channels(),
        p.taps(),
        out_w,
        out_h,
        src.elempack(),
        opt.workspace_allocator.as_ref(),
    )?;

    tracing::debug!(
        channels = src.channels(),
        elempack = src.elempack(),
        out_w,
        out_h,
        taps = p.taps(),
        "im2col"
    );

    let ep = src.elempack();
    let groups = src.groups();
    let taps = p.taps();
    let src = *src;
    let p = *p;
    let rows = dst.rows_mut();
    opt.install(|| {
        rows.into_par_iter()
            .enumerate()
            .for_each(|(h_col, mut lines)| {
                let h_in = (h_col * p.stride_h) as isize - p.pad_top as isize;
                for w_col in 0..out_w {
                    let w_in = (w_col * p.stride_w) as isize - p.pad_left as isize;
                    for i in 0..p.kernel_h {
                        let y = h_in + (i * p.dilation_h) as isize;
                        for j in 0..p.kernel_w {
                            let x = w_in + (j * p.dilation_w) as isize;
                            // Padded taps keep the buffer's zero fill.
                            if y < 0 || x < 0 {
                                continue;
                            }
                            let tap = i * p.kernel_w + j;
                            for g in 0..groups {
                                if let Some(lanes) = src.channel(g).pixel(x as usize, y as usize) {
                                    lines[g * taps + tap][w_col * ep..(w_col + 1) * ep]
                                        .copy_from_slice(lanes);
                                }
                            }
                        }
                    }
                }
            });
    });

    Ok(dst)
}

/// Deformable im2col with scratch from the workspace allocator.
///
/// `offset` carries `2 * taps` logical channels (`dh` at `2 * tap`, `dw` at
/// `2 * tap + 1`) and `mask`, if present, `taps` channels; both must have the
/// output's spatial shape and may use any pack width.
pub fn deformable_im2col(
    src: &FeatureView<'_>,
    offset: &FeatureView<'_>,
    mask: Option<&FeatureView<'_>>,
    p: &DeformConvParams,
    opt: &ExecOptions,
) -> Result<Im2colBuffer, Error> {
    check_source(src)?;
    let (out_w, out_h) = p.out_size(src.width(), src.height())?;
    check_guide("offset", offset, 2 * p.taps(), out_w, out_h)?;
    if let Some(mask) = mask {
        check_guide("mask", mask, p.taps(), out_w, out_h)?;
    }

    let mut dst = Im2colBuffer::zeros_in(
        src.channels(),
        p.taps(),
        out_w,
        out_h,
        src.elempack(),
        opt.workspace_allocator.as_ref(),
    )?;
    deformable_im2col_into(src, offset, mask, p, &mut dst, opt)?;
    Ok(dst)
}

pub fn deformable_im2col_into(
    src: &FeatureView<'_>,
    offset: &FeatureView<'_>,
    mask: Option<&FeatureView<'_>>,
    p: &DeformConvParams,
    dst: &mut Im2colBuffer,
    opt: &ExecOptions,
) -> Result<(), Error> {
    check_source(src)?;
    let (out_w, out_h) = p.out_size(src.width(), src.height())?;
    let taps = p.taps();
    check_guide("offset", offset, 2 * taps, out_w, out_h)?;
    if let Some(mask) = mask {
        check_guide("mask", mask, taps, out_w, out_h)?;
    }
    check_dst(dst, src, taps, out_w, out_h)?;

    tracing::debug!(
        channels = src.channels(),
        elempack = src.elempack(),
        offset_pack = offset.elempack(),
        has_mask = mask.is_some(),
        out_w,
        out_h,
        taps,
        threads = opt.num_threads(),
        "deformable_im2col"
    );

    let (src, offset, mask, p) = (*src, *offset, mask.copied(), *p);
    let rows = dst.rows_mut();
    opt.install(|| {
        rows.into_par_iter()
            .enumerate()
            .for_each(|(h_col, mut lines)| {
                fill_deformable_row(&src, &offset, mask.as_ref(), &p, h_col, out_w, &mut lines);
            });
    });

    Ok(())
}

fn fill_deformable_row(
    src: &FeatureView<'_>,
    offset: &FeatureView<'_>,
    mask: Option<&FeatureView<'_>>,
    p: &DeformConvParams,
    h_col: usize,
    out_w: usize,
    lines: &mut [&mut [f32]],
) {
    let (w, h) = (src.width(), src.height());
    let ep = src.elempack();
    let groups = src.groups();
    let taps = p.taps();
    let h_in = (h_col * p.stride_h) as isize - p.pad_top as isize;

    for w_col in 0..out_w {
        let w_in = (w_col * p.stride_w) as isize - p.pad_left as isize;
        for i in 0..p.kernel_h {
            for j in 0..p.kernel_w {
                let tap = i * p.kernel_w + j;
                let dh = offset.scalar(2 * tap, w_col, h_col);
                let dw = offset.scalar(2 * tap + 1, w_col, h_col);

                let h_im = (h_in + (i * p.dilation_h) as isize) as f32 + dh;
                let w_im = (w_in + (j * p.dilation_w) as isize) as f32 + dw;

                // Continuous bilinear support, not integer bounds.
                let tap_weights =
                    if h_im > -1.0 && w_im > -1.0 && h_im < h as f32 && w_im < w as f32 {
                        BilinearTap::new(w_im, h_im, w, h)
                    } else {
                        BilinearTap::EMPTY
                    };

                let m = mask.map(|m| m.scalar(tap, w_col, h_col));

                for g in 0..groups {
                    let out = &mut lines[g * taps + tap][w_col * ep..(w_col + 1) * ep];
                    tap_weights.gather(&src.channel(g), out);
                    if let Some(m) = m {
                        for v in out.iter_mut() {
                            *v *= m;
                        }
                    }
                }
            }
        }
    }
}
