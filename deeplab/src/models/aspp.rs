//! # Atrous Spatial Pyramid Pooling (ASPP)
//!
//! DeepLab v2 runs four atrous branches in parallel over the backbone output
//! and sums their class predictions. Each branch is an [`AsppBranch`] body
//! followed by a 1x1 prediction convolution, bundled as an [`AsppHead`].

use burn::{nn::conv::Conv2d, prelude::*};
use vgg::Sequential;

use super::topology::{aspp_branch_ops, prediction_spec, BACKBONE_CHANNELS};

/// Configuration for an [`AsppBranch`].
#[derive(Config, Debug)]
pub struct AsppBranchConfig {
    /// Dilation (and padding) of the 3x3 atrous convolution.
    pub dilation: usize,
    /// Number of input channels.
    #[config(default = "512")]
    pub in_features: usize,
    #[config(default = "0.01")]
    pub init_std: f64,
}

impl AsppBranchConfig {
    /// Initializes a new `AsppBranch`.
    pub fn init<B: Backend>(&self, device: &Device<B>) -> AsppBranch<B> {
        AsppBranch {
            features: Sequential::new(
                &aspp_branch_ops(self.dilation, self.in_features),
                self.init_std,
                device,
            ),
        }
    }
}

/// Body of one ASPP branch: atrous conv, ReLU, dropout, 1x1 conv, ReLU, dropout.
///
/// Dropout here is `burn::nn::Dropout`, which is only active on autodiff
/// backends. The functional replay takes an explicit flag instead.
#[derive(Module, Debug)]
pub struct AsppBranch<B: Backend> {
    pub(crate) features: Sequential<B>,
}

impl<B: Backend> AsppBranch<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.features.forward(x)
    }
}

/// Configuration for an [`AsppHead`].
#[derive(Config, Debug)]
pub struct AsppHeadConfig {
    pub dilation: usize,
    pub num_classes: usize,
    #[config(default = "0.01")]
    pub init_std: f64,
}

impl AsppHeadConfig {
    /// Initializes a new `AsppHead`.
    pub fn init<B: Backend>(&self, device: &Device<B>) -> AsppHead<B> {
        let conv = AsppBranchConfig::new(self.dilation)
            .with_in_features(BACKBONE_CHANNELS)
            .with_init_std(self.init_std)
            .init(device);
        let pred = prediction_spec(self.num_classes).init(self.init_std, device);

        AsppHead { conv, pred }
    }
}

/// One ASPP branch together with its prediction convolution.
#[derive(Module, Debug)]
pub struct AsppHead<B: Backend> {
    pub(crate) conv: AsppBranch<B>,
    pub(crate) pred: Conv2d<B>,
}

impl<B: Backend> AsppHead<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.pred.forward(self.conv.forward(x))
    }

    /// Convolutions in registration order, named relative to the head:
    /// `conv.features.0`, `conv.features.3`, `pred`.
    pub(crate) fn convs(&self) -> Vec<(String, &Conv2d<B>)> {
        let mut convs: Vec<(String, &Conv2d<B>)> = self
            .conv
            .features
            .convs()
            .map(|(index, conv)| (format!("conv.features.{index}"), conv))
            .collect();
        convs.push(("pred".to_owned(), &self.pred));
        convs
    }

    pub(crate) fn convs_mut(&mut self) -> Vec<(String, &mut Conv2d<B>)> {
        let mut convs: Vec<(String, &mut Conv2d<B>)> = self
            .conv
            .features
            .convs_mut()
            .map(|(index, conv)| (format!("conv.features.{index}"), conv))
            .collect();
        convs.push(("pred".to_owned(), &mut self.pred));
        convs
    }
}

#[cfg(test)]
mod tests {
    use burn::tensor::Distribution;

    use super::*;
    use crate::tests::TestBackend;

    #[test]
    fn branch_preserves_spatial_size() {
        let device = Default::default();
        let branch = AsppBranchConfig::new(24)
            .with_in_features(8)
            .init::<TestBackend>(&device);

        let input =
            Tensor::<TestBackend, 4>::random([1, 8, 3, 3], Distribution::Normal(0.0, 1.0), &device);

        assert_eq!(branch.forward(input).dims(), [1, 1024, 3, 3]);
    }

    #[test]
    fn head_registers_three_convolutions() {
        let device = Default::default();
        let head = AsppHeadConfig::new(6, 5).init::<TestBackend>(&device);

        let names: Vec<String> = head.convs().into_iter().map(|(name, _)| name).collect();
        assert_eq!(names, ["conv.features.0", "conv.features.3", "pred"]);
        assert_eq!(head.pred.weight.val().dims(), [5, 1024, 1, 1]);
    }
}
