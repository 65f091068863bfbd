//! VGG building blocks for DeepLab
//!
//! This crate turns compact VGG stage specifications (channel counts
//! interleaved with pooling markers) into layer plans, and layer plans into
//! owned Burn modules. The plans are plain data, so code that replays a stage
//! against externally supplied weights can walk exactly the same sequence.

mod plan;
mod sequential;

pub use plan::{
    output_channels, output_size, stage_ops, ConvSpec, LayerOp, PoolSpec, StageEntry,
};
pub use sequential::{Layer, Sequential};
