//! Umbrella crate for the `geowarp` workspace.
//!
//! Re-exports the packed feature-map core, the grid-sample kernel and the
//! deformable-convolution sampler.

pub use gw_core::*;
pub use gw_deform::*;
pub use gw_grid::*;
