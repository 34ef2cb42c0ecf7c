use gw_core::{Error, ExecOptions, FeatureMap, FeatureView, Shape};
use rayon::prelude::*;

use crate::gemm::{ConvWeight, Gemm};
use crate::im2col::deformable_im2col;
use crate::params::DeformConvParams;

/// Element-wise activation fused after the convolution.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Activation {
    #[default]
    None,
    Relu,
    LeakyRelu(f32),
    Clip { min: f32, max: f32 },
    Sigmoid,
}

impl Activation {
    /// Parses the integer activation kind used by layer parameter files.
    ///
    /// `0` none, `1` relu, `2` leaky relu (`params[0]` slope), `3` clip
    /// (`params[0]` min, `params[1]` max), `4` sigmoid.
    pub fn from_params(kind: i32, params: &[f32]) -> Result<Self, Error> {
        let need = match kind {
            2 => 1,
            3 => 2,
            _ => 0,
        };
        if params.len() < need {
            return Err(Error::InvalidParam {
                name: "activation param count",
                value: params.len() as i32,
            });
        }
        match kind {
            0 => Ok(Self::None),
            1 => Ok(Self::Relu),
            2 => Ok(Self::LeakyRelu(params[0])),
            3 => {
                let (min, max) = (params[0], params[1]);
                if min.is_nan() || max.is_nan() || min > max {
                    tracing::warn!(min, max, "rejected clip bounds");
                    return Err(Error::InvalidParam {
                        name: "clip bounds",
                        value: 3,
                    });
                }
                Ok(Self::Clip { min, max })
            }
            4 => Ok(Self::Sigmoid),
            other => Err(Error::InvalidParam {
                name: "activation type",
                value: other,
            }),
        }
    }

    #[inline]
    pub fn apply(self, v: f32) -> f32 {
        match self {
            Self::None => v,
            Self::Relu => v.max(0.0),
            Self::LeakyRelu(slope) => {
                if v < 0.0 {
                    v * slope
                } else {
                    v
                }
            }
            Self::Clip { min, max } => v.max(min).min(max),
            Self::Sigmoid => 1.0 / (1.0 + (-v).exp()),
        }
    }
}

/// Deformable 2-D convolution: deformable im2col followed by a GEMM.
#[derive(Debug, Clone)]
pub struct DeformableConv2d {
    params: DeformConvParams,
    weight: ConvWeight,
    bias: Option<Vec<f32>>,
    activation: Activation,
    out_elempack: usize,
}

impl DeformableConv2d {
    pub fn new(
        params: DeformConvParams,
        weight: ConvWeight,
        bias: Option<Vec<f32>>,
        activation: Activation,
        out_elempack: usize,
    ) -> Result<Self, Error> {
        params.validate()?;
        if weight.kernel_w() != params.kernel_w || weight.kernel_h() != params.kernel_h {
            return Err(Error::SizeMismatch {
                expected: params.taps(),
                actual: weight.kernel_w() * weight.kernel_h(),
            });
        }
        if let Some(b) = &bias
            && b.len() != weight.out_channels()
        {
            return Err(Error::SizeMismatch {
                expected: weight.out_channels(),
                actual: b.len(),
            });
        }
        Shape::new(weight.out_channels(), 1, 1)
            .packed(out_elempack)
            .validate()?;

        Ok(Self {
            params,
            weight,
            bias,
            activation,
            out_elempack,
        })
    }

    pub fn params(&self) -> &DeformConvParams {
        &self.params
    }

    pub fn weight(&self) -> &ConvWeight {
        &self.weight
    }

    pub fn activation(&self) -> Activation {
        self.activation
    }

    pub fn out_elempack(&self) -> usize {
        self.out_elempack
    }

    /// Runs the convolution. The im2col scratch comes from the workspace
    /// allocator, the output from the blob allocator.
    pub fn forward(
        &self,
        src: &FeatureView<'_>,
        offset: &FeatureView<'_>,
        mask: Option<&FeatureView<'_>>,
        gemm: &dyn Gemm,
        opt: &ExecOptions,
    ) -> Result<FeatureMap, Error> {
        if src.channels() != self.weight.in_channels() {
            return Err(Error::ShapeMismatch {
                what: "deformable conv input",
                expected: [self.weight.in_channels(), src.height(), src.width()],
                actual: [src.channels(), src.height(), src.width()],
            });
        }

        let cols = deformable_im2col(src, offset, mask, &self.params, opt)?;
        let shape = Shape::new(self.weight.out_channels(), cols.out_h(), cols.out_w())
            .packed(self.out_elempack);
        let mut out = FeatureMap::zeros_in(shape, opt.blob_allocator.as_ref())?;

        tracing::debug!(
            in_channels = src.channels(),
            out_channels = shape.channels,
            out_elempack = self.out_elempack,
            activation = ?self.activation,
            "deformable conv forward"
        );

        gemm.gemm(
            &cols,
            &self.weight,
            self.bias.as_deref(),
            &mut out.as_view_mut(),
            opt,
        )?;

        if self.activation != Activation::None {
            let act = self.activation;
            opt.install(|| {
                out.data_mut().par_iter_mut().for_each(|v| *v = act.apply(*v));
            });
        }

        Ok(out)
    }
}
