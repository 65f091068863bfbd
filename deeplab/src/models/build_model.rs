//! # Model Builder
//!
//! This module provides the `create_model` factory and the [`DeepLab`] enum
//! that lets callers hold either model variant behind one type.

use burn::prelude::*;

use super::{meta::VggMetaSeg, seg::VggSeg};
use crate::{config::DeepLabConfig, error::DeepLabResult, weights::WeightMap};

/// Either DeepLab variant.
///
/// Both variants register the same parameter names, so weights read from one
/// can be loaded into the other.
#[derive(Module, Debug)]
pub enum DeepLab<B: Backend> {
    /// The standard model.
    Standard(VggSeg<B>),
    /// The meta-learning model.
    Meta(VggMetaSeg<B>),
}

impl<B: Backend> DeepLab<B> {
    /// Structured forward pass of either variant.
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        match self {
            Self::Standard(model) => model.forward(x),
            Self::Meta(model) => model.seg().forward(x),
        }
    }

    pub fn as_meta(&self) -> Option<&VggMetaSeg<B>> {
        match self {
            Self::Meta(model) => Some(model),
            Self::Standard(_) => None,
        }
    }

    pub fn as_meta_mut(&mut self) -> Option<&mut VggMetaSeg<B>> {
        match self {
            Self::Meta(model) => Some(model),
            Self::Standard(_) => None,
        }
    }

    pub fn is_meta(&self) -> bool {
        matches!(self, Self::Meta(_))
    }

    pub fn weight_map(&self) -> WeightMap<B> {
        match self {
            Self::Standard(model) => model.weight_map(),
            Self::Meta(model) => model.weight_map(),
        }
    }

    pub fn num_classes(&self) -> usize {
        match self {
            Self::Standard(model) => model.num_classes(),
            Self::Meta(model) => model.num_classes(),
        }
    }
}

/// Creates the standard model, or the meta-learning one when `meta_training`
/// is set.
///
/// # Arguments
///
/// * `num_classes` - Channels of the prediction map (21 for PASCAL VOC).
/// * `meta_training` - Select [`VggMetaSeg`] instead of [`VggSeg`].
/// * `device` - The device to create the model on.
///
/// # Errors
///
/// Returns `DeepLabError::InvalidConfiguration` if `num_classes` is zero.
pub fn create_model<B: Backend>(
    num_classes: usize,
    meta_training: bool,
    device: &Device<B>,
) -> DeepLabResult<DeepLab<B>> {
    DeepLabConfig::new()
        .with_num_classes(num_classes)
        .with_meta_training(meta_training)
        .init(device)
}
