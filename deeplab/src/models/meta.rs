//! # Meta-Learning DeepLab
//!
//! [`VggMetaSeg`] has exactly the topology and parameter names of [`VggSeg`],
//! plus two things a MAML-style learner needs:
//!
//! - a forward pass that can replay a trailing part of the network against an
//!   externally supplied [`WeightMap`] (see [`ForwardMode`]);
//! - a per-parameter trainability record, driven by name prefixes, that
//!   controls which parameters [`VggMetaSeg::get_learnable`] hands out and
//!   [`VggMetaSeg::copy_weights`] is allowed to overwrite.

use std::collections::BTreeSet;

use burn::{
    module::Ignored,
    optim::GradientsParams,
    prelude::*,
    tensor::backend::AutodiffBackend,
};
use serde::{Deserialize, Serialize};

use super::{seg::VggSeg, topology::BACKBONE_CHANNELS};
use crate::{
    config::TrainMode,
    error::DeepLabResult,
    functional,
    weights::WeightMap,
};

/// Which part of the network a meta forward pass replays functionally.
///
/// | variant          | structured stages | functional stages | ASPP       |
/// |------------------|-------------------|-------------------|------------|
/// | `Structured`     | 1-5               | none              | structured |
/// | `FunctionalHead` | 1-5               | none              | functional |
/// | `Conv345`        | 1-2               | 3-5               | functional |
/// | `Conv45`         | 1-3               | 4-5               | functional |
/// | `Functional`     | none              | 1-5               | functional |
#[derive(Debug)]
pub enum ForwardMode<'a, B: Backend> {
    Structured,
    FunctionalHead(&'a WeightMap<B>),
    Conv345(&'a WeightMap<B>),
    Conv45(&'a WeightMap<B>),
    Functional(&'a WeightMap<B>),
}

impl<B: Backend> Clone for ForwardMode<'_, B> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<B: Backend> Copy for ForwardMode<'_, B> {}

impl<'a, B: Backend> ForwardMode<'a, B> {
    /// Maps the optional `(weights, train_mode)` pair onto a mode.
    ///
    /// Without weights the mode is ignored and the pass is fully structured.
    pub fn new(weights: Option<&'a WeightMap<B>>, train_mode: Option<TrainMode>) -> Self {
        match (weights, train_mode) {
            (None, _) => Self::Structured,
            (Some(weights), None) => Self::FunctionalHead(weights),
            (Some(weights), Some(TrainMode::Conv345)) => Self::Conv345(weights),
            (Some(weights), Some(TrainMode::Conv45)) => Self::Conv45(weights),
            (Some(weights), Some(TrainMode::All)) => Self::Functional(weights),
        }
    }

    pub fn weights(&self) -> Option<&'a WeightMap<B>> {
        match *self {
            Self::Structured => None,
            Self::FunctionalHead(weights)
            | Self::Conv345(weights)
            | Self::Conv45(weights)
            | Self::Functional(weights) => Some(weights),
        }
    }

    /// Number of leading backbone stages run with the model's own parameters.
    pub fn structured_stages(&self) -> usize {
        match self {
            Self::Structured | Self::FunctionalHead(_) => 5,
            Self::Conv345(_) => TrainMode::Conv345.structured_stages(),
            Self::Conv45(_) => TrainMode::Conv45.structured_stages(),
            Self::Functional(_) => TrainMode::All.structured_stages(),
        }
    }
}

/// Names of the parameters excluded from meta updates.
///
/// Everything not listed is trainable, so a fresh record means "all trainable".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trainability {
    frozen: BTreeSet<String>,
}

impl Trainability {
    /// Marks trainable exactly the `names` starting with one of `prefixes`.
    pub fn from_prefixes<S: AsRef<str>>(names: &[String], prefixes: &[S]) -> Self {
        let frozen = names
            .iter()
            .filter(|name| !prefixes.iter().any(|prefix| name.starts_with(prefix.as_ref())))
            .cloned()
            .collect();

        Self { frozen }
    }

    pub fn is_trainable(&self, name: &str) -> bool {
        !self.frozen.contains(name)
    }

    pub fn frozen(&self) -> impl Iterator<Item = &str> {
        self.frozen.iter().map(String::as_str)
    }
}

/// DeepLab v2 with functional replay and prefix-driven parameter freezing.
#[derive(Module, Debug)]
pub struct VggMetaSeg<B: Backend> {
    seg: VggSeg<B>,
    trainability: Ignored<Trainability>,
}

impl<B: Backend> VggMetaSeg<B> {
    /// Wraps `seg` with every parameter trainable.
    pub fn new(seg: VggSeg<B>) -> Self {
        Self {
            seg,
            trainability: Ignored(Trainability::default()),
        }
    }

    /// Forward pass dispatched on the `(weights, train_mode)` pair.
    ///
    /// `is_train` only switches the ASPP dropout of the functional head. The
    /// structured path ignores it and follows Burn's own rule, so dropout is
    /// active on an autodiff backend even with `is_train = false`; call
    /// `model.valid()` for an eval-mode structured pass.
    ///
    /// # Errors
    ///
    /// A missing key or a wrongly shaped tensor in `weights`. Everything the
    /// selected mode needs is checked before the first layer runs.
    pub fn forward(
        &self,
        x: Tensor<B, 4>,
        weights: Option<&WeightMap<B>>,
        train_mode: Option<TrainMode>,
        is_train: bool,
    ) -> DeepLabResult<Tensor<B, 4>> {
        self.forward_with(x, ForwardMode::new(weights, train_mode), is_train)
    }

    pub fn forward_with(
        &self,
        x: Tensor<B, 4>,
        mode: ForwardMode<'_, B>,
        is_train: bool,
    ) -> DeepLabResult<Tensor<B, 4>> {
        let Some(weights) = mode.weights() else {
            return Ok(self.seg.forward(x));
        };

        let structured = mode.structured_stages();
        functional::check_backbone_from(structured, weights)?;
        functional::check_aspp(BACKBONE_CHANNELS, weights)?;

        let x = (0..structured).fold(x, |x, index| self.seg.forward_stage(index, x));
        let x = functional::fun_backbone_from(structured, x, weights)?;
        functional::fun_deeplab_assp(x, weights, is_train)
    }

    /// Makes trainable exactly the parameters whose name starts with one of
    /// `prefixes`; every other parameter is frozen.
    ///
    /// Only the trainability record changes; parameter tensors are left as
    /// they are, so gradients that were already computed stay reachable.
    /// Use [`learnable_grads`](Self::learnable_grads) to keep frozen
    /// parameters out of an optimizer step.
    pub fn set_learnable<S: AsRef<str>>(&mut self, prefixes: &[S]) {
        let names = self.seg.parameter_names();
        let trainability = Trainability::from_prefixes(&names, prefixes);

        let learnable: Vec<&str> = names
            .iter()
            .map(String::as_str)
            .filter(|name| trainability.is_trainable(name))
            .collect();
        log::info!("Learnable parameters: {learnable:?}");

        self.trainability = Ignored(trainability);
    }

    /// The trainable parameters, in registration order.
    pub fn get_learnable(&self) -> WeightMap<B> {
        self.seg
            .weight_map()
            .into_iter()
            .filter(|(name, _)| self.is_learnable(name))
            .collect()
    }

    pub fn is_learnable(&self, name: &str) -> bool {
        self.trainability.0.is_trainable(name)
    }

    pub fn trainability(&self) -> &Trainability {
        &self.trainability.0
    }

    /// Overwrites every trainable parameter that has an entry in `weights`
    /// with an independent copy of that entry; returns how many were written.
    ///
    /// Frozen parameters and parameters without an entry are left alone.
    ///
    /// # Errors
    ///
    /// [`ShapeMismatch`](crate::DeepLabError::ShapeMismatch) if a copied entry
    /// does not fit its parameter. Nothing is written in that case.
    pub fn copy_weights(&mut self, weights: &WeightMap<B>) -> DeepLabResult<usize> {
        let trainability = self.trainability.0.clone();
        let selected = |name: &str| trainability.is_trainable(name) && weights.contains_key(name);

        let skipped: Vec<String> = self
            .seg
            .parameter_names()
            .into_iter()
            .filter(|name| trainability.is_trainable(name) && !weights.contains_key(name))
            .collect();
        if !skipped.is_empty() {
            log::debug!(
                "{} trainable parameters have no entry to copy from: {skipped:?}",
                skipped.len()
            );
        }

        let updated = self.seg.write_params(weights, selected)?;
        log::debug!("Copied {updated} meta weights");
        Ok(updated)
    }

    /// Strict load of every parameter, frozen or not; see
    /// [`VggSeg::load_weight_map`].
    pub fn load_weight_map(&mut self, weights: &WeightMap<B>) -> DeepLabResult<()> {
        self.seg.load_weight_map(weights)
    }

    pub fn weight_map(&self) -> WeightMap<B> {
        self.seg.weight_map()
    }

    pub fn parameter_names(&self) -> Vec<String> {
        self.seg.parameter_names()
    }

    pub fn num_classes(&self) -> usize {
        self.seg.num_classes()
    }

    pub fn seg(&self) -> &VggSeg<B> {
        &self.seg
    }
}

impl<B: AutodiffBackend> VggMetaSeg<B> {
    /// Collects the parameter gradients of `grads`, dropping those of frozen
    /// parameters.
    pub fn learnable_grads(&self, grads: B::Gradients) -> GradientsParams {
        let mut params = GradientsParams::from_grads(grads, self);
        let (kernels, biases) = self.seg.param_ids();

        for (name, id) in kernels {
            if !self.is_learnable(&name) {
                params.remove::<B::InnerBackend, 4>(id);
            }
        }
        for (name, id) in biases {
            if !self.is_learnable(&name) {
                params.remove::<B::InnerBackend, 1>(id);
            }
        }

        params
    }
}
