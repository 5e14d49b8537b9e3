//! Window -> model -> log-return -> price.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::calendar::next_calendar_day;
use crate::error::ForecastError;
use crate::ledger::HistoryLedger;
use crate::model::{SequenceModel, MODEL_HORIZON_TRADING_DAYS};
use crate::scaler::Scaler;
use crate::window::build_window;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub date: String,
    pub price: f64,
    pub log_return: f64,
}

impl PredictionResult {
    /// Simple return implied by the log-return, in percent.
    pub fn return_pct(&self) -> f64 {
        (self.log_return.exp() - 1.0) * 100.0
    }

    pub fn status_line(&self) -> String {
        format!(
            "predicted return {:+.2}% -> price {:.2} on {}",
            self.return_pct(),
            self.price,
            self.date
        )
    }
}

/// `last_close * exp(log_return)`.
pub fn price_from_log_return(last_close: f64, log_return: f64) -> f64 {
    last_close * log_return.exp()
}

#[derive(Clone)]
pub struct ForecastEngine {
    model: Option<Arc<dyn SequenceModel>>,
    scaler: Arc<Scaler>,
}

impl ForecastEngine {
    pub fn new(model: Arc<dyn SequenceModel>, scaler: Scaler) -> Self {
        Self {
            model: Some(model),
            scaler: Arc::new(scaler),
        }
    }

    pub fn without_model(scaler: Scaler) -> Self {
        Self {
            model: None,
            scaler: Arc::new(scaler),
        }
    }

    pub fn scaler(&self) -> &Scaler {
        &self.scaler
    }

    pub fn model_name(&self) -> Option<&str> {
        self.model.as_deref().map(|model| model.name())
    }

    /// Predicted log-return for the window ending at the ledger's last row.
    ///
    /// The model was trained on a 5-trading-day target; callers treat the
    /// value as the next step.
    pub fn predict_next_return(&self, ledger: &HistoryLedger) -> Result<f64, ForecastError> {
        let model = self.model.as_ref().ok_or(ForecastError::ModelNotLoaded)?;
        if ledger.is_empty() {
            return Err(ForecastError::EmptyHistory);
        }

        let window = build_window(ledger, &self.scaler)?;
        let tensor = window.to_tensor()?;
        debug!(
            component = "forecast",
            event = "forecast.window.built",
            first_date = window.first_date(),
            last_date = window.last_date(),
            shape = ?tensor.shape()
        );

        let output = model
            .predict(tensor.view())
            .map_err(|err| ForecastError::InferenceFailure(err.to_string()))?;
        let first = output.first().copied().ok_or_else(|| {
            ForecastError::InferenceFailure("model returned an empty output".to_string())
        })?;

        Ok(f64::from(first))
    }

    /// Full next-step forecast from the current ledger tail. Does not touch
    /// the ledger.
    pub fn forecast_next(&self, ledger: &HistoryLedger) -> Result<PredictionResult, ForecastError> {
        let log_return = self.predict_next_return(ledger)?;
        let last = ledger.last()?;
        let price = price_from_log_return(last.close, log_return);
        if !(log_return.is_finite() && price.is_finite()) {
            return Err(ForecastError::InvalidPrediction { log_return, price });
        }
        let date = next_calendar_day(&last.date)?;

        info!(
            component = "forecast",
            event = "forecast.result",
            base_date = %last.date,
            base_close = last.close,
            date = %date,
            log_return,
            price,
            horizon_trading_days = MODEL_HORIZON_TRADING_DAYS
        );

        Ok(PredictionResult {
            date,
            price,
            log_return,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::HistoryRow;
    use crate::model::{ConstantReturnModel, ModelError};
    use crate::scaler::ScalerConfig;
    use crate::window::WINDOW_SIZE;
    use ndarray::ArrayView3;

    struct FailingModel;

    impl SequenceModel for FailingModel {
        fn predict(&self, _input: ArrayView3<'_, f32>) -> Result<Vec<f32>, ModelError> {
            Err(ModelError::Inference("backend exploded".to_string()))
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    struct EmptyOutputModel;

    impl SequenceModel for EmptyOutputModel {
        fn predict(&self, _input: ArrayView3<'_, f32>) -> Result<Vec<f32>, ModelError> {
            Ok(Vec::new())
        }

        fn name(&self) -> &str {
            "empty"
        }
    }

    fn ledger_of(n: usize) -> HistoryLedger {
        let rows = (0..n)
            .map(|i| {
                HistoryRow::new(
                    format!("2023-{:02}-{:02}", 1 + i / 28, 1 + i % 28),
                    50.0 + i as f64,
                    vec![i as f64],
                )
            })
            .collect();
        HistoryLedger::from_rows(rows).unwrap().0
    }

    fn identity() -> Scaler {
        Scaler::from_optional(None)
    }

    #[test]
    fn price_conversion_is_exp_of_log_return() {
        assert_eq!(price_from_log_return(100.0, 0.0), 100.0);
        let up = price_from_log_return(100.0, 0.05);
        assert!((up - 100.0 * 0.05_f64.exp()).abs() < 1e-12);
        assert!((price_from_log_return(80.0, (1.25_f64).ln()) - 100.0).abs() < 1e-9);
    }

    #[test]
    fn price_conversion_is_strictly_increasing_in_log_return() {
        let returns = [-0.5, -0.1, -0.001, 0.0, 0.001, 0.1, 0.5];
        let prices: Vec<f64> = returns
            .iter()
            .map(|r| price_from_log_return(42.0, *r))
            .collect();
        assert!(prices.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn missing_model_is_reported_before_history_checks() {
        let engine = ForecastEngine::without_model(identity());
        assert_eq!(
            engine.predict_next_return(&HistoryLedger::new()).unwrap_err(),
            ForecastError::ModelNotLoaded
        );
    }

    #[test]
    fn empty_and_short_history_are_distinguished() {
        let engine = ForecastEngine::new(Arc::new(ConstantReturnModel::new(0.0)), identity());

        assert_eq!(
            engine.predict_next_return(&HistoryLedger::new()).unwrap_err(),
            ForecastError::EmptyHistory
        );
        assert_eq!(
            engine.predict_next_return(&ledger_of(10)).unwrap_err(),
            ForecastError::InsufficientHistory {
                required: WINDOW_SIZE,
                available: 10
            }
        );
    }

    #[test]
    fn model_failures_become_inference_failures() {
        let ledger = ledger_of(WINDOW_SIZE);

        let engine = ForecastEngine::new(Arc::new(FailingModel), identity());
        assert!(matches!(
            engine.predict_next_return(&ledger),
            Err(ForecastError::InferenceFailure(msg)) if msg.contains("backend exploded")
        ));

        let engine = ForecastEngine::new(Arc::new(EmptyOutputModel), identity());
        assert!(matches!(
            engine.predict_next_return(&ledger),
            Err(ForecastError::InferenceFailure(_))
        ));
    }

    #[test]
    fn forecast_next_uses_last_close_and_next_day() {
        let ledger = ledger_of(WINDOW_SIZE);
        let engine = ForecastEngine::new(
            Arc::new(ConstantReturnModel::new(0.1)),
            Scaler::from_config(&ScalerConfig::new(vec![1.0], vec![2.0])),
        );

        let result = engine.forecast_next(&ledger).unwrap();
        let last = ledger.last().unwrap();
        let expected_lr = f64::from(0.1_f32);

        assert_eq!(result.log_return, expected_lr);
        assert_eq!(result.price, last.close * expected_lr.exp());
        assert_eq!(result.date, next_calendar_day(&last.date).unwrap());
        assert_eq!(ledger.len(), WINDOW_SIZE);
    }

    #[test]
    fn status_line_reports_return_price_and_date() {
        let result = PredictionResult {
            date: "2024-03-02".to_string(),
            price: 101.2345,
            log_return: (1.0123_f64).ln(),
        };
        assert_eq!(
            result.status_line(),
            "predicted return +1.23% -> price 101.23 on 2024-03-02"
        );
    }
}
