//! # DeepLab v2 over VGG16
//!
//! [`VggSeg`] owns five backbone stages and four ASPP heads. Its parameters are
//! registered under the dotted names used throughout the crate:
//!
//! - backbone: `conv_<stage>.<layer>.weight` / `.bias`, e.g. `conv_3.4.weight`
//! - heads: `assp_<n>.conv.features.<layer>.weight`, `assp_<n>.pred.bias`, ...
//!
//! Registration order is backbone stage by stage, then heads `assp_1` to
//! `assp_4`, kernel before bias.

use burn::{module::ParamId, nn::conv::Conv2d, prelude::*};
use vgg::Sequential;

use super::{
    aspp::{AsppHead, AsppHeadConfig},
    topology::{aspp_name, ASPP_DILATIONS, BACKBONE_STAGES},
};
use crate::{
    error::DeepLabResult,
    weights::{bias_key, ensure_dims, overwrite_param, weight_key, WeightMap},
};

/// The standard DeepLab v2 segmentation model.
#[derive(Module, Debug)]
pub struct VggSeg<B: Backend> {
    conv_1: Sequential<B>,
    conv_2: Sequential<B>,
    conv_3: Sequential<B>,
    conv_4: Sequential<B>,
    conv_5: Sequential<B>,
    assp_1: AsppHead<B>,
    assp_2: AsppHead<B>,
    assp_3: AsppHead<B>,
    assp_4: AsppHead<B>,
}

impl<B: Backend> VggSeg<B> {
    /// Builds the model with `N(0, init_std)` kernels and zero biases.
    pub fn new(num_classes: usize, init_std: f64, device: &Device<B>) -> Self {
        let [conv_1, conv_2, conv_3, conv_4, conv_5] =
            BACKBONE_STAGES.map(|stage| Sequential::new(&stage.ops(), init_std, device));
        let [assp_1, assp_2, assp_3, assp_4] = ASPP_DILATIONS.map(|dilation| {
            AsppHeadConfig::new(dilation, num_classes)
                .with_init_std(init_std)
                .init(device)
        });

        let model = Self {
            conv_1,
            conv_2,
            conv_3,
            conv_4,
            conv_5,
            assp_1,
            assp_2,
            assp_3,
            assp_4,
        };
        log::info!("Initialize {} Conv2d layers...", model.conv_count());
        model
    }

    /// Runs the backbone, then sums the four ASPP head predictions.
    ///
    /// # Shapes
    /// - input: `[batch, 3, height, width]`
    /// - output: `[batch, num_classes, height / 8, width / 8]` (rounded up)
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.forward_backbone(x);
        self.forward_aspp(x)
    }

    /// Runs all five backbone stages.
    pub fn forward_backbone(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.stages()
            .into_iter()
            .fold(x, |x, stage| stage.forward(x))
    }

    /// Runs backbone stage `index` (zero based).
    ///
    /// # Panics
    ///
    /// If `index` is not below 5.
    pub fn forward_stage(&self, index: usize, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.stages()[index].forward(x)
    }

    /// Sums the predictions of the four ASPP heads.
    pub fn forward_aspp(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.assp_1.forward(x.clone())
            + self.assp_2.forward(x.clone())
            + self.assp_3.forward(x.clone())
            + self.assp_4.forward(x)
    }

    pub fn num_classes(&self) -> usize {
        self.assp_1.pred.weight.val().dims()[0]
    }

    pub fn conv_count(&self) -> usize {
        self.convs().len()
    }

    /// Every parameter name in registration order.
    pub fn parameter_names(&self) -> Vec<String> {
        self.convs()
            .into_iter()
            .flat_map(|(prefix, conv)| {
                let bias = conv.bias.as_ref().map(|_| bias_key(&prefix));
                core::iter::once(weight_key(&prefix)).chain(bias)
            })
            .collect()
    }

    /// Reads every parameter into a [`WeightMap`], in registration order.
    ///
    /// The tensors are the live parameter values, so on an autodiff backend
    /// they stay connected to the model's parameters.
    pub fn weight_map(&self) -> WeightMap<B> {
        let mut weights = WeightMap::with_capacity(self.conv_count() * 2);
        for (prefix, conv) in self.convs() {
            weights.insert(weight_key(&prefix), conv.weight.val());
            if let Some(bias) = &conv.bias {
                weights.insert(bias_key(&prefix), bias.val());
            }
        }
        weights
    }

    /// Overwrites every parameter with a copy of the matching entry of `weights`.
    ///
    /// # Errors
    ///
    /// Fails on the first missing key or shape mismatch, leaving the model
    /// unchanged.
    pub fn load_weight_map(&mut self, weights: &WeightMap<B>) -> DeepLabResult<()> {
        self.write_params(weights, |_| true).map(|_| ())
    }

    /// Copies the entries of `weights` whose key `selected` accepts into the
    /// matching parameters; returns how many parameters were written.
    ///
    /// All selected entries are validated before anything is written.
    pub(crate) fn write_params(
        &mut self,
        weights: &WeightMap<B>,
        selected: impl Fn(&str) -> bool,
    ) -> DeepLabResult<usize> {
        for (prefix, conv) in self.convs() {
            let key = weight_key(&prefix);
            if selected(&key) {
                let kernel = weights.kernel(&key)?;
                ensure_dims(&key, &conv.weight.val().dims(), &kernel.dims())?;
            }
            if let Some(bias) = &conv.bias {
                let key = bias_key(&prefix);
                if selected(&key) {
                    let source = weights.bias(&key)?;
                    ensure_dims(&key, &bias.val().dims(), &source.dims())?;
                }
            }
        }

        let mut written = 0;
        for (prefix, conv) in self.convs_mut() {
            let key = weight_key(&prefix);
            if selected(&key) {
                overwrite_param(&mut conv.weight, &weights.kernel(&key)?);
                written += 1;
            }
            if let Some(bias) = conv.bias.as_mut() {
                let key = bias_key(&prefix);
                if selected(&key) {
                    overwrite_param(bias, &weights.bias(&key)?);
                    written += 1;
                }
            }
        }

        Ok(written)
    }

    /// Parameter ids keyed by name, split by rank: kernels, then biases.
    pub(crate) fn param_ids(&self) -> (Vec<(String, ParamId)>, Vec<(String, ParamId)>) {
        let mut kernels = Vec::new();
        let mut biases = Vec::new();
        for (prefix, conv) in self.convs() {
            kernels.push((weight_key(&prefix), conv.weight.id));
            if let Some(bias) = &conv.bias {
                biases.push((bias_key(&prefix), bias.id));
            }
        }
        (kernels, biases)
    }

    fn stages(&self) -> [&Sequential<B>; 5] {
        [
            &self.conv_1,
            &self.conv_2,
            &self.conv_3,
            &self.conv_4,
            &self.conv_5,
        ]
    }

    fn heads(&self) -> [&AsppHead<B>; 4] {
        [&self.assp_1, &self.assp_2, &self.assp_3, &self.assp_4]
    }

    /// Convolutions in registration order with their full parameter prefix.
    fn convs(&self) -> Vec<(String, &Conv2d<B>)> {
        let mut convs = Vec::new();
        for (stage, def) in self.stages().into_iter().zip(BACKBONE_STAGES.iter()) {
            convs.extend(
                stage
                    .convs()
                    .map(|(index, conv)| (format!("{}.{index}", def.name), conv)),
            );
        }
        for (index, head) in self.heads().into_iter().enumerate() {
            let name = aspp_name(index);
            convs.extend(
                head.convs()
                    .into_iter()
                    .map(|(path, conv)| (format!("{name}.{path}"), conv)),
            );
        }
        convs
    }

    fn convs_mut(&mut self) -> Vec<(String, &mut Conv2d<B>)> {
        let Self {
            conv_1,
            conv_2,
            conv_3,
            conv_4,
            conv_5,
            assp_1,
            assp_2,
            assp_3,
            assp_4,
        } = self;

        let mut convs = Vec::new();
        let stages = [conv_1, conv_2, conv_3, conv_4, conv_5];
        for (stage, def) in stages.into_iter().zip(BACKBONE_STAGES.iter()) {
            convs.extend(
                stage
                    .convs_mut()
                    .map(|(index, conv)| (format!("{}.{index}", def.name), conv)),
            );
        }
        let heads = [assp_1, assp_2, assp_3, assp_4];
        for (index, head) in heads.into_iter().enumerate() {
            let name = aspp_name(index);
            convs.extend(
                head.convs_mut()
                    .into_iter()
                    .map(|(path, conv)| (format!("{name}.{path}"), conv)),
            );
        }
        convs
    }
}
