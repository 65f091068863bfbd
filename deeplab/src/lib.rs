//! # DeepLab-Burn
//!
//! DeepLab v2 (VGG16 backbone + ASPP head) for semantic segmentation, built
//! with the Burn deep learning framework, including a meta-learning variant
//! that can replay part of the network against externally supplied weights.
//!
//! ## Modules
//!
//! - `config`: `DeepLabConfig` and the `TrainMode` selector.
//! - `error`: The error type shared by every fallible operation.
//! - `functional`: Stateless stage and ASPP functions driven by a `WeightMap`.
//! - `models`: The standard model, the meta model, and the `DeepLab` wrapper.
//! - `weights`: The ordered, typed weight dictionary.
//!
//! ## Key Components
//!
//! - `VggSeg`: The standard segmentation model.
//! - `VggMetaSeg`: The meta-learning model with mode-dependent forward passes.
//! - `create_model`: Builds either one from a class count and a flag.

mod config;
mod error;
pub mod functional;
mod models;
mod weights;

#[doc(inline)]
pub use config::{DeepLabConfig, TrainMode};
#[doc(inline)]
pub use error::{DeepLabError, DeepLabResult};
#[doc(inline)]
pub use models::{
    create_model, output_size, AsppBranch, AsppBranchConfig, AsppHead, AsppHeadConfig, DeepLab,
    ForwardMode, StageDef, Trainability, VggMetaSeg, VggSeg, ASPP_DILATIONS, BACKBONE_STAGES,
};
#[doc(inline)]
pub use weights::{bias_key, weight_key, WeightMap, WeightTensor};

#[cfg(test)]
mod tests;
