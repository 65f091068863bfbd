//! Configuration for DeepLab models.

use core::{fmt, str::FromStr};

use burn::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{
    error::{DeepLabError, DeepLabResult},
    models::{DeepLab, VggMetaSeg, VggSeg},
};

/// Configuration shared by the standard and the meta-learning DeepLab model.
#[derive(Config, Debug)]
pub struct DeepLabConfig {
    /// Number of output classes (channels of the prediction map).
    #[config(default = "21")]
    pub num_classes: usize,
    /// Build the meta-learning variant instead of the standard one.
    #[config(default = "false")]
    pub meta_training: bool,
    /// Standard deviation of the zero-mean normal used for every conv kernel.
    #[config(default = "0.01")]
    pub init_std: f64,
}

impl DeepLabConfig {
    /// Validate the configuration and return appropriate errors for invalid settings.
    pub fn validate(&self) -> DeepLabResult<()> {
        if self.num_classes == 0 {
            return Err(DeepLabError::InvalidConfiguration {
                reason: "num_classes must be at least 1".to_owned(),
            });
        }
        if !self.init_std.is_finite() || self.init_std <= 0.0 {
            return Err(DeepLabError::InvalidConfiguration {
                reason: format!(
                    "init_std must be a positive finite number, got {}",
                    self.init_std
                ),
            });
        }
        Ok(())
    }

    /// Initializes the model selected by `meta_training`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn init<B: Backend>(&self, device: &Device<B>) -> DeepLabResult<DeepLab<B>> {
        if self.meta_training {
            self.init_meta(device).map(DeepLab::Meta)
        } else {
            self.init_standard(device).map(DeepLab::Standard)
        }
    }

    /// Initializes the standard model regardless of `meta_training`.
    pub fn init_standard<B: Backend>(&self, device: &Device<B>) -> DeepLabResult<VggSeg<B>> {
        self.validate()?;
        Ok(VggSeg::new(self.num_classes, self.init_std, device))
    }

    /// Initializes the meta-learning model regardless of `meta_training`.
    pub fn init_meta<B: Backend>(&self, device: &Device<B>) -> DeepLabResult<VggMetaSeg<B>> {
        self.validate()?;
        Ok(VggMetaSeg::new(VggSeg::new(
            self.num_classes,
            self.init_std,
            device,
        )))
    }
}

/// How many trailing backbone stages a meta forward pass replays functionally.
///
/// The ASPP head is always replayed when weights are supplied; the mode only
/// controls the backbone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrainMode {
    /// Stages 1-2 structured, stages 3-5 functional (`conv_3_4_5`).
    #[serde(rename = "conv_3_4_5")]
    Conv345,
    /// Stages 1-3 structured, stages 4-5 functional (`conv_4_5`).
    #[serde(rename = "conv_4_5")]
    Conv45,
    /// Every stage functional (`all`).
    #[serde(rename = "all")]
    All,
}

impl TrainMode {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Conv345 => "conv_3_4_5",
            Self::Conv45 => "conv_4_5",
            Self::All => "all",
        }
    }

    /// Number of leading backbone stages that still run with owned parameters.
    pub const fn structured_stages(&self) -> usize {
        match self {
            Self::Conv345 => 2,
            Self::Conv45 => 3,
            Self::All => 0,
        }
    }
}

impl fmt::Display for TrainMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TrainMode {
    type Err = DeepLabError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "conv_3_4_5" => Ok(Self::Conv345),
            "conv_4_5" => Ok(Self::Conv45),
            "all" => Ok(Self::All),
            _ => Err(DeepLabError::UnknownTrainMode { mode: s.to_owned() }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_pascal_voc() {
        let config = DeepLabConfig::new();
        assert_eq!(config.num_classes, 21);
        assert!(!config.meta_training);
        assert_eq!(config.init_std, 0.01);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_classes_is_rejected() {
        let config = DeepLabConfig::new().with_num_classes(0);

        match config.validate() {
            Err(DeepLabError::InvalidConfiguration { reason }) => {
                assert!(reason.contains("num_classes"));
            }
            _ => panic!("Expected InvalidConfiguration error"),
        }
    }

    #[test]
    fn non_positive_init_std_is_rejected() {
        for std in [0.0, -0.01, f64::NAN] {
            let config = DeepLabConfig::new().with_init_std(std);
            assert!(matches!(
                config.validate(),
                Err(DeepLabError::InvalidConfiguration { .. })
            ));
        }
    }

    #[test]
    fn train_mode_round_trips_through_strings() {
        for mode in [TrainMode::Conv345, TrainMode::Conv45, TrainMode::All] {
            assert_eq!(mode.to_string().parse::<TrainMode>(), Ok(mode));
        }
    }

    #[test]
    fn unknown_train_mode_is_rejected() {
        assert_eq!(
            "conv_5".parse::<TrainMode>(),
            Err(DeepLabError::UnknownTrainMode {
                mode: "conv_5".to_owned()
            })
        );
    }

    #[test]
    fn structured_stage_counts_follow_the_mode() {
        assert_eq!(TrainMode::Conv345.structured_stages(), 2);
        assert_eq!(TrainMode::Conv45.structured_stages(), 3);
        assert_eq!(TrainMode::All.structured_stages(), 0);
    }
}
