//! Per-feature affine normalization learned offline.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Offline-fitted scaler parameters as shipped next to the model.
///
/// Field names follow the exported document (`mean_`, `scale_`). Either may be
/// missing in a malformed export; [`Scaler::from_config`] decides what to do.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScalerConfig {
    #[serde(rename = "mean_", default)]
    pub mean: Option<Vec<f64>>,
    #[serde(rename = "scale_", default)]
    pub scale: Option<Vec<f64>>,
}

impl ScalerConfig {
    pub fn new(mean: Vec<f64>, scale: Vec<f64>) -> Self {
        Self {
            mean: Some(mean),
            scale: Some(scale),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityReason {
    MissingConfig,
    MissingMean,
    MissingScale,
    InvalidScale,
}

impl IdentityReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MissingConfig => "missing_config",
            Self::MissingMean => "missing_mean",
            Self::MissingScale => "missing_scale",
            Self::InvalidScale => "invalid_scale",
        }
    }
}

/// Immutable scaler shared by every windowing call.
///
/// `Identity` is the degrade-gracefully branch for absent or malformed configs:
/// predictions still run, on unscaled inputs.
#[derive(Debug, Clone, PartialEq)]
pub enum Scaler {
    Affine { mean: Vec<f64>, scale: Vec<f64> },
    Identity { reason: IdentityReason },
}

impl Scaler {
    pub fn from_config(config: &ScalerConfig) -> Self {
        let (mean, scale) = match (&config.mean, &config.scale) {
            (Some(mean), Some(scale)) => (mean, scale),
            (None, _) => return Self::identity(IdentityReason::MissingMean),
            (Some(_), None) => return Self::identity(IdentityReason::MissingScale),
        };

        if scale.iter().any(|s| *s == 0.0 || !s.is_finite()) {
            return Self::identity(IdentityReason::InvalidScale);
        }

        if mean.len() != scale.len() {
            debug!(
                component = "scaler",
                event = "scaler.length_mismatch",
                mean_len = mean.len(),
                scale_len = scale.len()
            );
        }

        Self::Affine {
            mean: mean.clone(),
            scale: scale.clone(),
        }
    }

    pub fn from_optional(config: Option<&ScalerConfig>) -> Self {
        match config {
            Some(config) => Self::from_config(config),
            None => Self::identity(IdentityReason::MissingConfig),
        }
    }

    fn identity(reason: IdentityReason) -> Self {
        warn!(
            component = "scaler",
            event = "scaler.fallback.identity",
            reason = reason.as_str()
        );
        Self::Identity { reason }
    }

    pub fn is_identity(&self) -> bool {
        matches!(self, Self::Identity { .. })
    }

    /// `out[i] = (raw[i] - mean[i]) / scale[i]`. Features past the end of the
    /// configured arrays pass through as if `mean = 0`, `scale = 1`.
    pub fn scale(&self, raw: &[f64]) -> Vec<f64> {
        match self {
            Self::Identity { .. } => raw.to_vec(),
            Self::Affine { mean, scale } => raw
                .iter()
                .enumerate()
                .map(|(i, value)| {
                    let m = mean.get(i).copied().unwrap_or(0.0);
                    let s = scale.get(i).copied().unwrap_or(1.0);
                    (value - m) / s
                })
                .collect(),
        }
    }
}
