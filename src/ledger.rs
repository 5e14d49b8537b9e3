//! Ordered, append-at-tail history of real and predicted rows.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::calendar::parse_date;
use crate::error::ForecastError;

/// Prediction rows reuse the `features_raw` of the row that produced them.
/// Features for a synthetic future day are never recomputed; such rows are
/// marked with `is_prediction = true`.
pub const STALE_FEATURE_CARRYOVER: &str = "STALE_FEATURE_CARRYOVER";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRow {
    pub date: String,
    pub close: f64,
    pub features_raw: Vec<f64>,
    #[serde(default, alias = "isPrediction")]
    pub is_prediction: bool,
}

impl HistoryRow {
    pub fn new(date: impl Into<String>, close: f64, features_raw: Vec<f64>) -> Self {
        Self {
            date: date.into(),
            close,
            features_raw,
            is_prediction: false,
        }
    }

    /// Synthetic row for a predicted day, carrying `source`'s features verbatim.
    pub fn prediction(date: impl Into<String>, close: f64, source: &HistoryRow) -> Self {
        Self {
            date: date.into(),
            close,
            features_raw: source.features_raw.clone(),
            is_prediction: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerLoadReport {
    pub input_rows: u64,
    pub output_rows: u64,
    pub duplicate_dates_removed: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoryLedger {
    rows: Vec<HistoryRow>,
    feature_count: Option<usize>,
}

impl HistoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a ledger from source rows: lexical sort by `date`, first row kept
    /// per duplicate date, every row validated for close and feature width.
    pub fn from_rows(
        mut rows: Vec<HistoryRow>,
    ) -> Result<(Self, LedgerLoadReport), ForecastError> {
        let input_rows = rows.len() as u64;
        rows.sort_by(|a, b| a.date.cmp(&b.date));

        let mut ledger = Self::new();
        let mut duplicate_dates_removed = 0u64;
        for row in rows {
            if ledger
                .rows
                .last()
                .map(|existing| existing.date == row.date)
                .unwrap_or(false)
            {
                duplicate_dates_removed += 1;
                continue;
            }
            ledger.validate(&row)?;
            ledger.push_unchecked(row);
        }

        if duplicate_dates_removed > 0 {
            warn!(
                component = "ledger",
                event = "ledger.duplicates_removed",
                duplicate_dates_removed
            );
        }

        let report = LedgerLoadReport {
            input_rows,
            output_rows: ledger.len() as u64,
            duplicate_dates_removed,
        };

        info!(
            component = "ledger",
            event = "ledger.loaded",
            rows = report.output_rows,
            feature_count = ?ledger.feature_count,
            first_date = ledger.rows.first().map(|r| r.date.as_str()),
            last_date = ledger.rows.last().map(|r| r.date.as_str())
        );

        Ok((ledger, report))
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[HistoryRow] {
        &self.rows
    }

    pub fn feature_count(&self) -> Option<usize> {
        self.feature_count
    }

    pub fn last(&self) -> Result<&HistoryRow, ForecastError> {
        self.rows.last().ok_or(ForecastError::EmptyHistory)
    }

    pub fn tail(&self, n: usize) -> Result<&[HistoryRow], ForecastError> {
        if self.rows.len() < n {
            return Err(ForecastError::InsufficientHistory {
                required: n,
                available: self.rows.len(),
            });
        }
        Ok(&self.rows[self.rows.len() - n..])
    }

    /// Appends at the tail. The row's date must sort strictly after the
    /// current last row's date.
    pub fn append(&mut self, row: HistoryRow) -> Result<(), ForecastError> {
        if let Some(last) = self.rows.last() {
            if row.date <= last.date {
                return Err(ForecastError::OutOfOrderAppend {
                    date: row.date,
                    last_date: last.date.clone(),
                });
            }
        }
        self.validate(&row)?;

        info!(
            component = "ledger",
            event = "ledger.append",
            date = %row.date,
            close = row.close,
            is_prediction = row.is_prediction,
            rows = self.rows.len() + 1
        );

        self.push_unchecked(row);
        Ok(())
    }

    fn validate(&self, row: &HistoryRow) -> Result<(), ForecastError> {
        parse_date(&row.date)?;
        if !(row.close.is_finite() && row.close > 0.0) {
            return Err(ForecastError::InvalidClose {
                date: row.date.clone(),
                close: row.close,
            });
        }
        if let Some(expected) = self.feature_count {
            if row.features_raw.len() != expected {
                return Err(ForecastError::FeatureWidthMismatch {
                    date: row.date.clone(),
                    found: row.features_raw.len(),
                    expected,
                });
            }
        }
        Ok(())
    }

    fn push_unchecked(&mut self, row: HistoryRow) {
        if self.feature_count.is_none() {
            self.feature_count = Some(row.features_raw.len());
        }
        self.rows.push(row);
    }
}
