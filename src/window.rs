//! Fixed-length scaled window over the ledger tail.

use ndarray::Array3;

use crate::error::ForecastError;
use crate::ledger::HistoryLedger;
use crate::scaler::Scaler;

pub const WINDOW_SIZE: usize = 60;

/// Scaled feature vectors, oldest first. Built per prediction call.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureWindow {
    rows: Vec<Vec<f64>>,
    feature_count: usize,
    first_date: String,
    last_date: String,
}

impl FeatureWindow {
    pub fn rows(&self) -> &[Vec<f64>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn feature_count(&self) -> usize {
        self.feature_count
    }

    pub fn first_date(&self) -> &str {
        &self.first_date
    }

    pub fn last_date(&self) -> &str {
        &self.last_date
    }

    /// Rank-3 model input of shape `[1, len, feature_count]`.
    pub fn to_tensor(&self) -> Result<Array3<f32>, ForecastError> {
        let flat: Vec<f32> = self
            .rows
            .iter()
            .flat_map(|row| row.iter().map(|v| *v as f32))
            .collect();
        Array3::from_shape_vec((1, self.rows.len(), self.feature_count), flat)
            .map_err(|err| ForecastError::InferenceFailure(format!("window tensor shape: {err}")))
    }
}

/// Scales the last [`WINDOW_SIZE`] ledger rows, keeping chronological order.
pub fn build_window(ledger: &HistoryLedger, scaler: &Scaler) -> Result<FeatureWindow, ForecastError> {
    let tail = ledger.tail(WINDOW_SIZE)?;
    let feature_count = ledger.feature_count().unwrap_or(0);

    let rows = tail
        .iter()
        .map(|row| scaler.scale(&row.features_raw))
        .collect();

    Ok(FeatureWindow {
        rows,
        feature_count,
        first_date: tail.first().map(|r| r.date.clone()).unwrap_or_default(),
        last_date: tail.last().map(|r| r.date.clone()).unwrap_or_default(),
    })
}
