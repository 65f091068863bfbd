//! The fixed DeepLab v2 topology: a truncated VGG16 with a dilated fifth
//! stage, followed by four atrous branches summed into the prediction.
//!
//! Everything here is plain data. The structured modules and the functional
//! replay are both generated from it, so the two paths cannot drift apart.

use vgg::{stage_ops, ConvSpec, LayerOp, StageEntry};

use StageEntry::{Conv, DownsamplePool, NarrowPool};

/// One backbone stage: its parameter prefix and its compact specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageDef {
    pub name: &'static str,
    pub entries: &'static [StageEntry],
    pub in_channels: usize,
    pub dilation: usize,
}

impl StageDef {
    pub fn ops(&self) -> Vec<LayerOp> {
        stage_ops(self.entries, self.in_channels, self.dilation)
    }
}

pub const BACKBONE_STAGES: [StageDef; 5] = [
    StageDef {
        name: "conv_1",
        entries: &[Conv(64), Conv(64), DownsamplePool],
        in_channels: 3,
        dilation: 1,
    },
    StageDef {
        name: "conv_2",
        entries: &[Conv(128), Conv(128), DownsamplePool],
        in_channels: 64,
        dilation: 1,
    },
    StageDef {
        name: "conv_3",
        entries: &[Conv(256), Conv(256), Conv(256), DownsamplePool],
        in_channels: 128,
        dilation: 1,
    },
    StageDef {
        name: "conv_4",
        entries: &[Conv(512), Conv(512), Conv(512), NarrowPool],
        in_channels: 256,
        dilation: 1,
    },
    StageDef {
        name: "conv_5",
        entries: &[Conv(512), Conv(512), Conv(512), NarrowPool],
        in_channels: 512,
        dilation: 2,
    },
];

/// Channels produced by the backbone and consumed by every ASPP branch.
pub const BACKBONE_CHANNELS: usize = 512;

/// Dilation rates of the four ASPP branches, in registration order.
pub const ASPP_DILATIONS: [usize; 4] = [6, 12, 18, 24];

/// Hidden width of each ASPP branch.
pub const ASPP_CHANNELS: usize = 1024;

/// Drop probability of the dropout layers inside each ASPP branch.
pub const ASPP_DROPOUT: f64 = 0.5;

/// Parameter prefix of the ASPP branch at `index` (zero based): `assp_1` .. `assp_4`.
pub fn aspp_name(index: usize) -> String {
    format!("assp_{}", index + 1)
}

/// Layer plan of one ASPP branch body:
/// atrous conv, ReLU, dropout, 1x1 conv, ReLU, dropout.
pub fn aspp_branch_ops(dilation: usize, in_channels: usize) -> Vec<LayerOp> {
    vec![
        LayerOp::Conv(ConvSpec::atrous(in_channels, ASPP_CHANNELS, dilation)),
        LayerOp::Relu,
        LayerOp::Dropout(ASPP_DROPOUT),
        LayerOp::Conv(ConvSpec::pointwise(ASPP_CHANNELS, ASPP_CHANNELS)),
        LayerOp::Relu,
        LayerOp::Dropout(ASPP_DROPOUT),
    ]
}

/// The 1x1 prediction convolution closing every ASPP branch.
pub const fn prediction_spec(num_classes: usize) -> ConvSpec {
    ConvSpec::pointwise(ASPP_CHANNELS, num_classes)
}

/// Spatial size of the prediction map for an input of spatial size `input`.
pub fn output_size(input: usize) -> usize {
    BACKBONE_STAGES
        .iter()
        .fold(input, |size, stage| vgg::output_size(&stage.ops(), size))
}
