use burn::{
    nn::{conv::Conv2d, pool::MaxPool2d, Dropout, DropoutConfig, Relu},
    prelude::*,
};

use crate::plan::LayerOp;

/// Owned counterpart of a [`LayerOp`].
#[derive(Module, Debug)]
pub enum Layer<B: Backend> {
    Conv(Conv2d<B>),
    Relu(Relu),
    Dropout(Dropout),
    MaxPool(MaxPool2d),
}

impl<B: Backend> Layer<B> {
    /// Builds the layer for `op`; convolutions get `N(0, init_std)` weights and zero bias.
    pub fn new(op: &LayerOp, init_std: f64, device: &Device<B>) -> Self {
        match op {
            LayerOp::Conv(spec) => Self::Conv(spec.init(init_std, device)),
            LayerOp::Relu => Self::Relu(Relu::new()),
            LayerOp::Dropout(prob) => Self::Dropout(DropoutConfig::new(*prob).init()),
            LayerOp::MaxPool(spec) => Self::MaxPool(spec.init()),
        }
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        match self {
            Self::Conv(conv) => conv.forward(input),
            Self::Relu(relu) => relu.forward(input),
            Self::Dropout(dropout) => dropout.forward(input),
            Self::MaxPool(pool) => pool.forward(input),
        }
    }
}

/// An ordered stack of layers built from a layer plan.
///
/// Layer `i` corresponds to op `i` of the plan, so the position of every
/// convolution doubles as its parameter sub-path.
#[derive(Module, Debug)]
pub struct Sequential<B: Backend> {
    layers: Vec<Layer<B>>,
}

impl<B: Backend> Sequential<B> {
    pub fn new(ops: &[LayerOp], init_std: f64, device: &Device<B>) -> Self {
        let layers = ops
            .iter()
            .map(|op| Layer::new(op, init_std, device))
            .collect();

        Self { layers }
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        self.layers
            .iter()
            .fold(input, |x, layer| layer.forward(x))
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Convolutions in order, paired with their position in the stack.
    pub fn convs(&self) -> impl Iterator<Item = (usize, &Conv2d<B>)> {
        self.layers
            .iter()
            .enumerate()
            .filter_map(|(index, layer)| match layer {
                Layer::Conv(conv) => Some((index, conv)),
                _ => None,
            })
    }

    pub fn convs_mut(&mut self) -> impl Iterator<Item = (usize, &mut Conv2d<B>)> {
        self.layers
            .iter_mut()
            .enumerate()
            .filter_map(|(index, layer)| match layer {
                Layer::Conv(conv) => Some((index, conv)),
                _ => None,
            })
    }
}

#[cfg(test)]
mod tests {
    use burn::tensor::Distribution;

    use super::*;
    use crate::{
        plan::{stage_ops, StageEntry},
        tests::TestBackend,
    };

    #[test]
    fn sequential_has_one_layer_per_op() {
        let device = Default::default();
        let ops = stage_ops(
            &[
                StageEntry::Conv(8),
                StageEntry::Conv(8),
                StageEntry::DownsamplePool,
            ],
            3,
            1,
        );
        let stage = Sequential::<TestBackend>::new(&ops, 0.01, &device);

        assert_eq!(stage.len(), ops.len());
        let indices: Vec<usize> = stage.convs().map(|(index, _)| index).collect();
        assert_eq!(indices, vec![0, 2]);
    }

    #[test]
    fn convs_start_with_zero_bias() {
        let device = Default::default();
        let ops = stage_ops(&[StageEntry::Conv(4)], 2, 1);
        let stage = Sequential::<TestBackend>::new(&ops, 0.01, &device);

        for (_, conv) in stage.convs() {
            let bias = conv.bias.as_ref().expect("bias should exist").val();
            assert_eq!(bias.abs().sum().into_scalar(), 0.0);
            assert_eq!(conv.weight.val().dims(), [4, 2, 3, 3]);
        }
    }

    #[test]
    fn downsample_stage_halves_spatial_size() {
        let device = Default::default();
        let ops = stage_ops(
            &[
                StageEntry::Conv(8),
                StageEntry::Conv(8),
                StageEntry::DownsamplePool,
            ],
            3,
            1,
        );
        let stage = Sequential::<TestBackend>::new(&ops, 0.01, &device);

        let input =
            Tensor::<TestBackend, 4>::random([1, 3, 17, 17], Distribution::Normal(0.0, 1.0), &device);
        let output = stage.forward(input);

        assert_eq!(output.dims(), [1, 8, 9, 9]);
        assert_eq!(crate::plan::output_size(&ops, 17), 9);
    }

    #[test]
    fn dilated_narrow_stage_preserves_spatial_size() {
        let device = Default::default();
        let ops = stage_ops(
            &[
                StageEntry::Conv(4),
                StageEntry::Conv(4),
                StageEntry::NarrowPool,
            ],
            4,
            2,
        );
        let stage = Sequential::<TestBackend>::new(&ops, 0.01, &device);

        let input =
            Tensor::<TestBackend, 4>::random([2, 4, 6, 6], Distribution::Normal(0.0, 1.0), &device);

        assert_eq!(stage.forward(input).dims(), [2, 4, 6, 6]);
    }
}
