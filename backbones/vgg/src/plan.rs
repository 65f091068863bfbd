//! Layer plans shared by the structured and functional execution paths.
//!
//! A plan is an ordered list of [`LayerOp`]s. The position of an op inside its
//! plan is also its parameter sub-path, so the kernel of op 4 in stage `conv_3`
//! is addressed as `conv_3.4.weight` whether it lives in a [`Sequential`] or in
//! an external weight dictionary.
//!
//! [`Sequential`]: crate::Sequential

use burn::{
    module::Param,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{MaxPool2d, MaxPool2dConfig},
        Initializer, PaddingConfig2d,
    },
    prelude::*,
    tensor::ops::ConvOptions,
};

/// One entry of a compact VGG stage specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageEntry {
    /// 3x3 convolution followed by ReLU, with the given output channels.
    Conv(usize),
    /// Max pooling that keeps the spatial size (kernel 3, stride 1, padding 1).
    NarrowPool,
    /// Max pooling that halves the spatial size (kernel 3, stride 2, padding 1).
    DownsamplePool,
}

/// Geometry of a stride-1 2D convolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvSpec {
    pub in_channels: usize,
    pub out_channels: usize,
    pub kernel_size: usize,
    pub padding: usize,
    pub dilation: usize,
}

impl ConvSpec {
    /// 3x3 convolution whose padding equals its dilation, preserving spatial size.
    pub const fn atrous(in_channels: usize, out_channels: usize, dilation: usize) -> Self {
        Self {
            in_channels,
            out_channels,
            kernel_size: 3,
            padding: dilation,
            dilation,
        }
    }

    /// 1x1 convolution.
    pub const fn pointwise(in_channels: usize, out_channels: usize) -> Self {
        Self {
            in_channels,
            out_channels,
            kernel_size: 1,
            padding: 0,
            dilation: 1,
        }
    }

    /// Options for [`burn::tensor::module::conv2d`].
    pub fn options(&self) -> ConvOptions<2> {
        ConvOptions::new(
            [1, 1],
            [self.padding, self.padding],
            [self.dilation, self.dilation],
            1,
        )
    }

    /// Kernel shape `[out_channels, in_channels, kernel, kernel]`.
    pub const fn weight_shape(&self) -> [usize; 4] {
        [
            self.out_channels,
            self.in_channels,
            self.kernel_size,
            self.kernel_size,
        ]
    }

    pub const fn bias_shape(&self) -> [usize; 1] {
        [self.out_channels]
    }

    /// Output spatial size for an input of spatial size `input`.
    pub const fn output_size(&self, input: usize) -> usize {
        input + 2 * self.padding - self.dilation * (self.kernel_size - 1)
    }

    /// Creates the convolution with weights drawn from `N(0, std)` and a zero bias.
    pub fn init<B: Backend>(&self, std: f64, device: &Device<B>) -> Conv2d<B> {
        let mut conv = Conv2dConfig::new(
            [self.in_channels, self.out_channels],
            [self.kernel_size, self.kernel_size],
        )
        .with_stride([1, 1])
        .with_padding(PaddingConfig2d::Explicit(self.padding, self.padding))
        .with_dilation([self.dilation, self.dilation])
        .with_initializer(Initializer::Normal { mean: 0.0, std })
        .init(device);

        conv.bias = Some(Param::from_tensor(Tensor::zeros(self.bias_shape(), device)));
        conv
    }
}

/// Geometry of a square max pooling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSpec {
    pub kernel_size: usize,
    pub stride: usize,
    pub padding: usize,
}

impl PoolSpec {
    pub const NARROW: Self = Self {
        kernel_size: 3,
        stride: 1,
        padding: 1,
    };

    pub const DOWNSAMPLE: Self = Self {
        kernel_size: 3,
        stride: 2,
        padding: 1,
    };

    pub fn init(&self) -> MaxPool2d {
        MaxPool2dConfig::new([self.kernel_size, self.kernel_size])
            .with_strides([self.stride, self.stride])
            .with_padding(PaddingConfig2d::Explicit(self.padding, self.padding))
            .init()
    }

    /// Output spatial size (floor rounding) for an input of spatial size `input`.
    pub const fn output_size(&self, input: usize) -> usize {
        (input + 2 * self.padding - self.kernel_size) / self.stride + 1
    }
}

/// A single step of a layer plan.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LayerOp {
    Conv(ConvSpec),
    Relu,
    /// Dropout with the given drop probability.
    Dropout(f64),
    MaxPool(PoolSpec),
}

impl LayerOp {
    /// Output spatial size of this op for an input of spatial size `input`.
    pub fn output_size(&self, input: usize) -> usize {
        match self {
            Self::Conv(spec) => spec.output_size(input),
            Self::MaxPool(spec) => spec.output_size(input),
            Self::Relu | Self::Dropout(_) => input,
        }
    }
}

/// Expands a stage specification into its layer plan.
///
/// Every `Conv` entry becomes a convolution (kernel 3, padding and dilation
/// equal to `dilation`) immediately followed by a ReLU; pooling markers become
/// the matching max pooling and leave the channel count alone.
pub fn stage_ops(entries: &[StageEntry], in_channels: usize, dilation: usize) -> Vec<LayerOp> {
    let mut ops = Vec::with_capacity(entries.len() * 2);
    let mut current_channels = in_channels;

    for entry in entries {
        match *entry {
            StageEntry::Conv(out_channels) => {
                ops.push(LayerOp::Conv(ConvSpec::atrous(
                    current_channels,
                    out_channels,
                    dilation,
                )));
                ops.push(LayerOp::Relu);
                current_channels = out_channels;
            }
            StageEntry::NarrowPool => ops.push(LayerOp::MaxPool(PoolSpec::NARROW)),
            StageEntry::DownsamplePool => ops.push(LayerOp::MaxPool(PoolSpec::DOWNSAMPLE)),
        }
    }

    ops
}

/// Output spatial size after running `input` through every op of `ops`.
pub fn output_size(ops: &[LayerOp], input: usize) -> usize {
    ops.iter().fold(input, |size, op| op.output_size(size))
}

/// Output channel count of a plan, or `in_channels` when it holds no convolution.
pub fn output_channels(ops: &[LayerOp], in_channels: usize) -> usize {
    ops.iter()
        .rev()
        .find_map(|op| match op {
            LayerOp::Conv(spec) => Some(spec.out_channels),
            _ => None,
        })
        .unwrap_or(in_channels)
}
