//! Additional operations for the Burn deep learning framework
//!
//! This crate provides operations that are commonly used in deep learning but are not
//! yet available in the core Burn framework.

use burn::prelude::*;

mod dropout;

// Convenient re-exports
pub use dropout::dropout;

/// Additional operations for Burn tensors
pub trait TensorExtraOps<B: Backend, const D: usize> {
    /// Apply inverted dropout, active only when `training` is true
    fn dropout(self, prob: f64, training: bool) -> Self;
}

impl<B: Backend, const D: usize> TensorExtraOps<B, D> for Tensor<B, D> {
    fn dropout(self, prob: f64, training: bool) -> Self {
        dropout::dropout(self, prob, training)
    }
}
