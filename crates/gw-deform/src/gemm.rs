use gw_core::{Error, ExecOptions, FeatureViewMut};
use rayon::prelude::*;

use crate::im2col::Im2colBuffer;

/// Convolution weights in `[out_ch][in_ch][kernel_h][kernel_w]` order.
///
/// Row `oc` of the flattened matrix lines up with im2col row
/// `ic * taps + tap`, so the convolution is `weight x columns`.
#[derive(Debug, Clone, PartialEq)]
pub struct ConvWeight {
    out_channels: usize,
    in_channels: usize,
    kernel_h: usize,
    kernel_w: usize,
    data: Vec<f32>,
}

impl ConvWeight {
    pub fn from_vec(
        out_channels: usize,
        in_channels: usize,
        kernel_h: usize,
        kernel_w: usize,
        data: Vec<f32>,
    ) -> Result<Self, Error> {
        let expected = out_channels * in_channels * kernel_h * kernel_w;
        if data.len() != expected {
            return Err(Error::SizeMismatch {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            out_channels,
            in_channels,
            kernel_h,
            kernel_w,
            data,
        })
    }

    pub fn out_channels(&self) -> usize {
        self.out_channels
    }

    pub fn in_channels(&self) -> usize {
        self.in_channels
    }

    pub fn kernel_h(&self) -> usize {
        self.kernel_h
    }

    pub fn kernel_w(&self) -> usize {
        self.kernel_w
    }

    /// Flattened row of output channel `oc`: `in_channels * taps` values.
    pub fn row(&self, oc: usize) -> &[f32] {
        let len = self.in_channels * self.kernel_h * self.kernel_w;
        &self.data[oc * len..(oc + 1) * len]
    }
}

/// Matrix-multiply backend consuming an im2col buffer.
///
/// Implementations write `dst[oc][col] = bias[oc] + sum_k weight[oc][k] *
/// cols[k][col]` into an output of `weight.out_channels()` channels with the
/// im2col's spatial shape, at whatever pack width `dst` declares.
pub trait Gemm: Sync {
    fn gemm(
        &self,
        cols: &Im2colBuffer,
        weight: &ConvWeight,
        bias: Option<&[f32]>,
        dst: &mut FeatureViewMut<'_>,
        opt: &ExecOptions,
    ) -> Result<(), Error>;
}

/// Straightforward GEMM, parallel over output channel groups.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReferenceGemm;

impl Gemm for ReferenceGemm {
    fn gemm(
        &self,
        cols: &Im2colBuffer,
        weight: &ConvWeight,
        bias: Option<&[f32]>,
        dst: &mut FeatureViewMut<'_>,
        opt: &ExecOptions,
    ) -> Result<(), Error> {
        check_operands(cols, weight, bias, dst)?;

        let out_pack = dst.shape().elempack;
        let n = cols.cols();
        let taps = cols.taps();
        let in_pack = cols.elempack();

        opt.install(|| {
            dst.par_channels_mut()
                .enumerate()
                .for_each(|(og, mut plane)| {
                    let mut acc = vec![0.0f32; n];
                    for lane in 0..out_pack {
                        let oc = og * out_pack + lane;
                        acc.fill(bias.map_or(0.0, |b| b[oc]));

                        for (k, &w) in weight.row(oc).iter().enumerate() {
                            let (ic, tap) = (k / taps, k % taps);
                            let line = cols.line(ic / in_pack, tap);
                            let in_lane = ic % in_pack;
                            for (a, v) in acc.iter_mut().zip(line.iter().skip(in_lane).step_by(in_pack)) {
                                *a += w * v;
                            }
                        }

                        let out = plane.data_mut();
                        for (col, &a) in acc.iter().enumerate() {
                            out[col * out_pack + lane] = a;
                        }
                    }
                });
        });

        Ok(())
    }
}

fn check_operands(
    cols: &Im2colBuffer,
    weight: &ConvWeight,
    bias: Option<&[f32]>,
    dst: &FeatureViewMut<'_>,
) -> Result<(), Error> {
    if weight.in_channels() != cols.channels()
        || weight.kernel_h() * weight.kernel_w() != cols.taps()
    {
        return Err(Error::SizeMismatch {
            expected: cols.rows(),
            actual: weight.in_channels() * weight.kernel_h() * weight.kernel_w(),
        });
    }
    if let Some(b) = bias
        && b.len() != weight.out_channels()
    {
        return Err(Error::SizeMismatch {
            expected: weight.out_channels(),
            actual: b.len(),
        });
    }
    let s = dst.shape();
    if s.dims() != 3 || s.channels != weight.out_channels() || s.width != cols.out_w() || s.height != cols.out_h() {
        return Err(Error::ShapeMismatch {
            what: "gemm output",
            expected: [weight.out_channels(), cols.out_h(), cols.out_w()],
            actual: [s.channels, s.height, s.width],
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use gw_core::{Error, ExecOptions, FeatureMap, Shape, SystemAllocator};

    use super::{ConvWeight, Gemm, ReferenceGemm};
    use crate::im2col::{Im2colBuffer, im2col};
    use crate::params::DeformConvParams;

    #[test]
    fn one_by_one_kernel_is_channel_mix() {
        let src = FeatureMap::from_vec(
            Shape::new(2, 1, 2),
            vec![
                1.0, 2.0, // c0
                10.0, 20.0, // c1
            ],
        )
        .expect("valid map");
        let cols = im2col(&src.as_view(), &DeformConvParams::square(1, 1, 1, 0), &ExecOptions::default())
            .expect("im2col");
        let weight = ConvWeight::from_vec(2, 2, 1, 1, vec![1.0, 1.0, 2.0, -1.0]).expect("valid weight");
        let mut dst = FeatureMap::from_vec(Shape::new(2, 1, 2), vec![0.0; 4]).expect("valid map");

        ReferenceGemm
            .gemm(&cols, &weight, Some(&[0.5, 0.0][..]), &mut dst.as_view_mut(), &ExecOptions::default())
            .expect("gemm");

        assert_eq!(dst.data(), &[11.5, 22.5, -8.0, -16.0]);
    }

    #[test]
    fn packed_input_and_output_agree_with_scalar() {
        let src = FeatureMap::from_fn(4, 4, 4, |c, y, x| (c * 3 + y * 2 + x) as f32 * 0.25);
        let p = DeformConvParams::square(3, 1, 1, 1);
        let opt = ExecOptions::default();
        let weight = ConvWeight::from_vec(
            8,
            4,
            3,
            3,
            (0..8 * 4 * 9).map(|i| ((i * 7) % 11) as f32 * 0.1 - 0.5).collect(),
        )
        .expect("valid weight");
        let bias: Vec<f32> = (0..8).map(|i| i as f32).collect();

        let cols = im2col(&src.as_view(), &p, &opt).expect("im2col");
        let mut scalar = FeatureMap::from_vec(Shape::new(8, 4, 4), vec![0.0; 128]).expect("valid map");
        ReferenceGemm
            .gemm(&cols, &weight, Some(bias.as_slice()), &mut scalar.as_view_mut(), &opt)
            .expect("scalar gemm");

        let packed_src = src.repack(4).expect("pack src");
        let packed_cols = im2col(&packed_src.as_view(), &p, &opt).expect("packed im2col");
        let mut packed = FeatureMap::from_vec(Shape::new(8, 4, 4).packed(8), vec![0.0; 128])
            .expect("valid map");
        ReferenceGemm
            .gemm(&packed_cols, &weight, Some(bias.as_slice()), &mut packed.as_view_mut(), &opt)
            .expect("packed gemm");

        let unpacked = packed.repack(1).expect("unpack");
        for (a, b) in scalar.data().iter().zip(unpacked.data()) {
            assert!((a - b).abs() < 1e-4);
        }
    }

    #[test]
    fn zero_weight_still_propagates_non_finite_columns() {
        let src = FeatureMap::from_vec(Shape::new(2, 1, 2), vec![f32::NAN, 1.0, f32::INFINITY, 2.0])
            .expect("valid map");
        let cols = im2col(&src.as_view(), &DeformConvParams::square(1, 1, 1, 0), &ExecOptions::default())
            .expect("im2col");
        let weight = ConvWeight::from_vec(1, 2, 1, 1, vec![0.0, 0.0]).expect("valid weight");
        let mut dst = FeatureMap::from_vec(Shape::new(1, 1, 2), vec![0.0; 2]).expect("valid map");

        ReferenceGemm
            .gemm(&cols, &weight, None, &mut dst.as_view_mut(), &ExecOptions::default())
            .expect("gemm");

        // 0 * NaN and 0 * inf are both NaN.
        assert!(dst.data()[0].is_nan());
        assert_eq!(dst.data()[1], 0.0);
    }

    #[test]
    fn rejects_mismatched_operands() {
        let cols = Im2colBuffer::zeros_in(2, 9, 3, 3, 1, &SystemAllocator).expect("buffer");
        let weight = ConvWeight::from_vec(1, 3, 3, 3, vec![0.0; 27]).expect("valid weight");
        let mut dst = FeatureMap::from_vec(Shape::new(1, 3, 3), vec![0.0; 9]).expect("valid map");
        let err = ReferenceGemm.gemm(&cols, &weight, None, &mut dst.as_view_mut(), &ExecOptions::default());
        assert_eq!(
            err,
            Err(Error::SizeMismatch {
                expected: 18,
                actual: 27
            })
        );

        let weight = ConvWeight::from_vec(1, 2, 3, 3, vec![0.0; 18]).expect("valid weight");
        let err = ReferenceGemm.gemm(
            &cols,
            &weight,
            Some(&[1.0, 2.0][..]),
            &mut dst.as_view_mut(),
            &ExecOptions::default(),
        );
        assert!(matches!(err, Err(Error::SizeMismatch { expected: 1, actual: 2 })));

        assert!(ConvWeight::from_vec(1, 2, 3, 3, vec![0.0; 5]).is_err());
    }
}
