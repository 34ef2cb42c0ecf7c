//! Grid-sample resampling over packed feature maps.
//!
//! Every output pixel reads a normalized `(x, y)` pair from a [`Grid`] of the
//! output's spatial shape, maps each axis to source space with the configured
//! align-corners convention and padding mode, and interpolates.
//!
//! Supported:
//! - 3-D (channel, height, width) sources of any pack width.
//! - Bilinear and nearest interpolation.
//! - Zero, border and reflection padding.
//!
//! Bicubic interpolation and 4-D (depth) sources are rejected with
//! [`gw_core::Error::Unsupported`] before any output is touched.
//!
//! Channel groups are resampled in parallel; each group owns a disjoint slice
//! of the output.

mod grid;
mod resample;

pub use grid::{Grid, GridView, affine_grid, identity_grid};
pub use resample::{GridSampleConfig, grid_sample, grid_sample_into};
