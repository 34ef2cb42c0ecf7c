//! Deformable-convolution sampling over packed feature maps.
//!
//! [`deformable_im2col`] gathers every kernel tap of every output position at
//! a learned fractional offset, optionally scaled by a modulation mask, into
//! an [`Im2colBuffer`]. Read as a matrix it has `channels * taps` rows and
//! `out_h * out_w` columns, ready for a [`Gemm`] backend.
//!
//! [`DeformableConv2d`] wires the two together with bias and a fused
//! activation. [`ReferenceGemm`] is the portable backend.
//!
//! Output rows are sampled in parallel; each row writes a disjoint slice of
//! the buffer.

mod conv;
mod gemm;
mod im2col;
mod params;

pub use conv::{Activation, DeformableConv2d};
pub use gemm::{ConvWeight, Gemm, ReferenceGemm};
pub use im2col::{Im2colBuffer, deformable_im2col, deformable_im2col_into, im2col};
pub use params::DeformConvParams;
