//! DeepLab v2 (VGG16) models.

mod aspp;
mod build_model;
mod meta;
mod seg;
pub(crate) mod topology;

pub use aspp::{AsppBranch, AsppBranchConfig, AsppHead, AsppHeadConfig};
pub use build_model::{create_model, DeepLab};
pub use meta::{ForwardMode, Trainability, VggMetaSeg};
pub use seg::VggSeg;
pub use topology::{output_size, StageDef, ASPP_DILATIONS, BACKBONE_STAGES};
