//! # Named Weights
//!
//! [`WeightMap`] is the dictionary a meta-learner hands to the functional
//! forward path. Keys use the same dotted names the structured model reports
//! for its own parameters (`conv_3.4.weight`, `assp_2.pred.bias`, ...), so a
//! map read out of a model can be adapted and fed straight back in.

use std::collections::HashMap;

use burn::{module::Param, prelude::*};
use vgg::ConvSpec;

use crate::error::{DeepLabError, DeepLabResult};

/// Key of the kernel of the convolution registered under `prefix`.
pub fn weight_key(prefix: &str) -> String {
    format!("{prefix}.weight")
}

/// Key of the bias of the convolution registered under `prefix`.
pub fn bias_key(prefix: &str) -> String {
    format!("{prefix}.bias")
}

/// A named learnable tensor: a convolution kernel or a convolution bias.
#[derive(Debug, Clone)]
pub enum WeightTensor<B: Backend> {
    /// Convolution kernel, `[out_channels, in_channels, kernel, kernel]`.
    Kernel(Tensor<B, 4>),
    /// Convolution bias, `[out_channels]`.
    Bias(Tensor<B, 1>),
}

impl<B: Backend> WeightTensor<B> {
    pub fn dims(&self) -> Vec<usize> {
        match self {
            Self::Kernel(tensor) => tensor.dims().to_vec(),
            Self::Bias(tensor) => tensor.dims().to_vec(),
        }
    }
}

impl<B: Backend> From<Tensor<B, 4>> for WeightTensor<B> {
    fn from(tensor: Tensor<B, 4>) -> Self {
        Self::Kernel(tensor)
    }
}

impl<B: Backend> From<Tensor<B, 1>> for WeightTensor<B> {
    fn from(tensor: Tensor<B, 1>) -> Self {
        Self::Bias(tensor)
    }
}

/// An insertion-ordered mapping from parameter name to weight tensor.
///
/// Lookups used by the functional forward path are checked: a missing key is a
/// [`DeepLabError::MissingWeightKey`] and a tensor of the wrong shape is a
/// [`DeepLabError::ShapeMismatch`], both reported before any convolution runs.
#[derive(Debug, Clone)]
pub struct WeightMap<B: Backend> {
    entries: Vec<(String, WeightTensor<B>)>,
    index: HashMap<String, usize>,
}

impl<B: Backend> Default for WeightMap<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Backend> WeightMap<B> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            index: HashMap::with_capacity(capacity),
        }
    }

    /// Inserts `tensor` under `key`.
    ///
    /// Replacing an existing key keeps its original position and returns the
    /// previous tensor.
    pub fn insert(
        &mut self,
        key: impl Into<String>,
        tensor: impl Into<WeightTensor<B>>,
    ) -> Option<WeightTensor<B>> {
        let key = key.into();
        let tensor = tensor.into();

        match self.index.get(&key) {
            Some(&position) => Some(std::mem::replace(&mut self.entries[position].1, tensor)),
            None => {
                self.index.insert(key.clone(), self.entries.len());
                self.entries.push((key, tensor));
                None
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&WeightTensor<B>> {
        self.index
            .get(key)
            .map(|&position| &self.entries[position].1)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<WeightTensor<B>> {
        let position = self.index.remove(key)?;
        let (_, tensor) = self.entries.remove(position);
        for (_, slot) in self.index.iter_mut() {
            if *slot > position {
                *slot -= 1;
            }
        }
        Some(tensor)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(key, _)| key.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &WeightTensor<B>)> {
        self.entries
            .iter()
            .map(|(key, tensor)| (key.as_str(), tensor))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The entries whose key starts with `prefix`, in order.
    pub fn filter_prefix(&self, prefix: &str) -> Self {
        self.iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, tensor)| (key.to_owned(), tensor.clone()))
            .collect()
    }

    /// Looks up a convolution kernel.
    pub fn kernel(&self, key: &str) -> DeepLabResult<Tensor<B, 4>> {
        match self.lookup(key)? {
            WeightTensor::Kernel(tensor) => Ok(tensor.clone()),
            WeightTensor::Bias(tensor) => Err(DeepLabError::ShapeMismatch {
                key: key.to_owned(),
                expected: "a rank-4 kernel".to_owned(),
                actual: format!("{:?}", tensor.dims()),
            }),
        }
    }

    /// Looks up a convolution bias.
    pub fn bias(&self, key: &str) -> DeepLabResult<Tensor<B, 1>> {
        match self.lookup(key)? {
            WeightTensor::Bias(tensor) => Ok(tensor.clone()),
            WeightTensor::Kernel(tensor) => Err(DeepLabError::ShapeMismatch {
                key: key.to_owned(),
                expected: "a rank-1 bias".to_owned(),
                actual: format!("{:?}", tensor.dims()),
            }),
        }
    }

    /// Looks up the kernel and bias registered under `prefix` and checks both
    /// against `spec`.
    pub fn conv(
        &self,
        prefix: &str,
        spec: &ConvSpec,
    ) -> DeepLabResult<(Tensor<B, 4>, Tensor<B, 1>)> {
        let key = weight_key(prefix);
        let weight = self.kernel(&key)?;
        ensure_dims(&key, &spec.weight_shape(), &weight.dims())?;

        let key = bias_key(prefix);
        let bias = self.bias(&key)?;
        ensure_dims(&key, &spec.bias_shape(), &bias.dims())?;

        Ok((weight, bias))
    }

    fn lookup(&self, key: &str) -> DeepLabResult<&WeightTensor<B>> {
        self.get(key).ok_or_else(|| DeepLabError::MissingWeightKey {
            key: key.to_owned(),
        })
    }
}

impl<B, K, T> FromIterator<(K, T)> for WeightMap<B>
where
    B: Backend,
    K: Into<String>,
    T: Into<WeightTensor<B>>,
{
    fn from_iter<I: IntoIterator<Item = (K, T)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (key, tensor) in iter {
            map.insert(key, tensor);
        }
        map
    }
}

impl<B: Backend> IntoIterator for WeightMap<B> {
    type Item = (String, WeightTensor<B>);
    type IntoIter = std::vec::IntoIter<(String, WeightTensor<B>)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// Fails with [`DeepLabError::ShapeMismatch`] unless `actual == expected`.
pub(crate) fn ensure_dims(key: &str, expected: &[usize], actual: &[usize]) -> DeepLabResult<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(DeepLabError::ShapeMismatch {
            key: key.to_owned(),
            expected: format!("{expected:?}"),
            actual: format!("{actual:?}"),
        })
    }
}

/// Replaces the value of `param` with a copy of `source` that shares no
/// storage and no autodiff history with it. The parameter id is kept, so
/// optimizer state keyed on it stays attached.
pub(crate) fn overwrite_param<B: Backend, const D: usize>(
    param: &mut Param<Tensor<B, D>>,
    source: &Tensor<B, D>,
) {
    let device = param.val().device();
    let value = Tensor::<B, D>::from_data(source.to_data(), &device).require_grad();

    *param = Param::initialized(param.id, value);
}
