//! # Functional Replay
//!
//! Stateless versions of the backbone stages and the ASPP head. They walk the
//! same layer plans the structured modules are built from, but read every
//! kernel and bias out of a [`WeightMap`] instead of owned parameters. On an
//! autodiff backend the result is therefore differentiable with respect to the
//! supplied tensors, which is what a meta-learning inner loop needs.
//!
//! Every function resolves all of its weights before running a single
//! convolution, so a missing key or a wrongly shaped tensor is reported
//! without any work being done.

use burn::{
    prelude::*,
    tensor::{activation, module::conv2d},
};
use vgg::LayerOp;

use crate::{
    error::DeepLabResult,
    models::topology::{
        aspp_branch_ops, aspp_name, prediction_spec, StageDef, ASPP_DILATIONS, BACKBONE_STAGES,
    },
    weights::{weight_key, WeightMap},
};

/// Runs `ops` on `x`, taking the convolution at position `i` from
/// `{prefix}.{i}.weight` / `{prefix}.{i}.bias`.
///
/// Dropout is applied only when `is_train` is true.
///
/// # Errors
///
/// [`MissingWeightKey`](crate::DeepLabError::MissingWeightKey) or
/// [`ShapeMismatch`](crate::DeepLabError::ShapeMismatch) when `weights` does
/// not hold a correctly shaped kernel and bias for every convolution.
pub fn replay<B: Backend>(
    x: Tensor<B, 4>,
    ops: &[LayerOp],
    prefix: &str,
    weights: &WeightMap<B>,
    is_train: bool,
) -> DeepLabResult<Tensor<B, 4>> {
    check_ops(ops, prefix, weights)?;

    ops.iter().enumerate().try_fold(x, |x, (index, op)| {
        let x = match op {
            LayerOp::Conv(spec) => {
                let (weight, bias) = weights.conv(&format!("{prefix}.{index}"), spec)?;
                conv2d(x, weight, Some(bias), spec.options())
            }
            LayerOp::Relu => activation::relu(x),
            LayerOp::Dropout(prob) => burn_extra_ops::dropout(x, *prob, is_train),
            LayerOp::MaxPool(spec) => spec.init().forward(x),
        };
        Ok(x)
    })
}

/// Replays one backbone stage under its own parameter prefix.
pub fn fun_stage<B: Backend>(
    stage: &StageDef,
    x: Tensor<B, 4>,
    weights: &WeightMap<B>,
) -> DeepLabResult<Tensor<B, 4>> {
    replay(x, &stage.ops(), stage.name, weights, false)
}

/// Stage 1: two 64-channel conv + ReLU pairs, then a downsampling pool.
pub fn fun_conv1_features<B: Backend>(
    x: Tensor<B, 4>,
    weights: &WeightMap<B>,
) -> DeepLabResult<Tensor<B, 4>> {
    fun_stage(&BACKBONE_STAGES[0], x, weights)
}

/// Stage 2: two 128-channel conv + ReLU pairs, then a downsampling pool.
pub fn fun_conv2_features<B: Backend>(
    x: Tensor<B, 4>,
    weights: &WeightMap<B>,
) -> DeepLabResult<Tensor<B, 4>> {
    fun_stage(&BACKBONE_STAGES[1], x, weights)
}

/// Stage 3: three 256-channel conv + ReLU pairs, then a downsampling pool.
pub fn fun_conv3_features<B: Backend>(
    x: Tensor<B, 4>,
    weights: &WeightMap<B>,
) -> DeepLabResult<Tensor<B, 4>> {
    fun_stage(&BACKBONE_STAGES[2], x, weights)
}

/// Stage 4: three 512-channel conv + ReLU pairs, then a size-preserving pool.
pub fn fun_conv4_features<B: Backend>(
    x: Tensor<B, 4>,
    weights: &WeightMap<B>,
) -> DeepLabResult<Tensor<B, 4>> {
    fun_stage(&BACKBONE_STAGES[3], x, weights)
}

/// Stage 5: three dilation-2 512-channel conv + ReLU pairs, then a
/// size-preserving pool.
pub fn fun_conv5_features<B: Backend>(
    x: Tensor<B, 4>,
    weights: &WeightMap<B>,
) -> DeepLabResult<Tensor<B, 4>> {
    fun_stage(&BACKBONE_STAGES[4], x, weights)
}

/// Replays backbone stages `first..5` in order.
pub fn fun_backbone_from<B: Backend>(
    first: usize,
    x: Tensor<B, 4>,
    weights: &WeightMap<B>,
) -> DeepLabResult<Tensor<B, 4>> {
    check_backbone_from(first, weights)?;
    BACKBONE_STAGES
        .iter()
        .skip(first)
        .try_fold(x, |x, stage| fun_stage(stage, x, weights))
}

/// The four ASPP branches at dilations 6, 12, 18 and 24, summed.
///
/// The class count is read from `assp_1.pred.weight`; the other prediction
/// convolutions must agree with it.
///
/// # Shapes
/// - input: `[batch, channels, height, width]`
/// - output: `[batch, num_classes, height, width]`
pub fn fun_deeplab_assp<B: Backend>(
    x: Tensor<B, 4>,
    weights: &WeightMap<B>,
    is_train: bool,
) -> DeepLabResult<Tensor<B, 4>> {
    let [_, channels, _, _] = x.dims();
    check_aspp(channels, weights)?;
    let num_classes = aspp_num_classes(weights)?;

    let mut output = fun_aspp_branch(0, x.clone(), weights, num_classes, is_train)?;
    for index in 1..ASPP_DILATIONS.len() {
        output = output + fun_aspp_branch(index, x.clone(), weights, num_classes, is_train)?;
    }

    Ok(output)
}

fn fun_aspp_branch<B: Backend>(
    index: usize,
    x: Tensor<B, 4>,
    weights: &WeightMap<B>,
    num_classes: usize,
    is_train: bool,
) -> DeepLabResult<Tensor<B, 4>> {
    let name = aspp_name(index);
    let [_, channels, _, _] = x.dims();
    let ops = aspp_branch_ops(ASPP_DILATIONS[index], channels);

    let x = replay(x, &ops, &format!("{name}.conv.features"), weights, is_train)?;

    let spec = prediction_spec(num_classes);
    let (weight, bias) = weights.conv(&format!("{name}.pred"), &spec)?;
    Ok(conv2d(x, weight, Some(bias), spec.options()))
}

fn aspp_num_classes<B: Backend>(weights: &WeightMap<B>) -> DeepLabResult<usize> {
    let key = weight_key(&format!("{}.pred", aspp_name(0)));
    Ok(weights.kernel(&key)?.dims()[0])
}

/// Checks every weight stages `first..5` need, without running anything.
pub(crate) fn check_backbone_from<B: Backend>(
    first: usize,
    weights: &WeightMap<B>,
) -> DeepLabResult<()> {
    for stage in BACKBONE_STAGES.iter().skip(first) {
        check_ops(&stage.ops(), stage.name, weights)?;
    }
    Ok(())
}

/// Checks every weight the ASPP head needs for an input with `channels` channels.
pub(crate) fn check_aspp<B: Backend>(channels: usize, weights: &WeightMap<B>) -> DeepLabResult<()> {
    let spec = prediction_spec(aspp_num_classes(weights)?);
    for (index, &dilation) in ASPP_DILATIONS.iter().enumerate() {
        let name = aspp_name(index);
        check_ops(
            &aspp_branch_ops(dilation, channels),
            &format!("{name}.conv.features"),
            weights,
        )?;
        weights.conv(&format!("{name}.pred"), &spec)?;
    }
    Ok(())
}

fn check_ops<B: Backend>(ops: &[LayerOp], prefix: &str, weights: &WeightMap<B>) -> DeepLabResult<()> {
    for (index, op) in ops.iter().enumerate() {
        if let LayerOp::Conv(spec) = op {
            weights.conv(&format!("{prefix}.{index}"), spec)?;
        }
    }
    Ok(())
}
