//! # Functional Dropout
//!
//! `burn::nn::Dropout` decides on its own whether it is active: it only drops
//! activations when the backend tracks gradients. Replaying a network from an
//! external weight dictionary needs the caller to choose instead, so this
//! module exposes dropout as a plain function with an explicit `training` flag.

use burn::{prelude::*, tensor::Distribution};

/// Applies inverted dropout to `x`.
///
/// When `training` is false, or `prob` is 0, the input is returned untouched.
/// Otherwise every element is zeroed with probability `prob` and the survivors
/// are scaled by `1 / (1 - prob)`, which keeps the expected activation equal to
/// the input. A `prob` of 1 or more drops everything.
///
/// # Shapes
/// - input: `[..]`
/// - output: same as input
pub fn dropout<B: Backend, const D: usize>(
    x: Tensor<B, D>,
    prob: f64,
    training: bool,
) -> Tensor<B, D> {
    if !training || prob <= 0.0 {
        return x;
    }
    if prob >= 1.0 {
        return x.zeros_like();
    }

    let keep_prob = 1.0 - prob;
    let mask = x.random_like(Distribution::Bernoulli(keep_prob));

    x * mask / keep_prob
}
