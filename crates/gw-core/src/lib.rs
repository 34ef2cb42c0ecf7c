//! Foundational primitives for geowarp resampling kernels.
//!
//! ## Feature Maps and Packing
//! A feature map holds `channels` logical channels of `f32`. Channels are
//! stored in groups of `elempack` (a power of two). Inside a group every
//! spatial element carries `elempack` contiguous lanes, one per channel, so a
//! single contiguous load fetches one pixel of the whole group. Logical
//! channel `c` lives at `(c / elempack, c % elempack)`.
//!
//! ## Coordinates
//! Integer source coordinates refer to pixel centers. Normalized coordinates
//! in `[-1, 1]` are mapped to source space by [`denormalize`], honoring the
//! align-corners convention, and then passed through a [`PaddingMode`].
//!
//! ## Sampling
//! Bilinear sampling uses the floor-based 2x2 neighborhood and drops corners
//! outside the plane. Border and reflection padding keep coordinates inside
//! the plane, so the drop only matters for zero padding.
//!
//! ## Execution
//! Kernels take an [`ExecOptions`] carrying the worker pool and the
//! allocators for outputs and scratch. Nothing is retained between calls.

mod coord;
mod error;
mod exec;
mod map;
mod sample;

pub use coord::{
    PaddingMode, ResizeMode, apply_padding, clip_coord, denormalize, normalize, reflect_coord,
    source_index,
};
pub use error::Error;
pub use exec::{Allocator, BoundedAllocator, ExecOptions, SystemAllocator};
pub use map::{FeatureMap, FeatureView, FeatureViewMut, PlaneView, PlaneViewMut, Shape};
pub use sample::{
    BilinearTap, nearest_index, sample_bilinear, sample_bilinear_lanes, sample_nearest,
    sample_nearest_lanes,
};
