//! Explicit per-session state: engine, ledger, status, and the prediction guard.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Mutex, RwLock, TryLockError};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::ForecastError;
use crate::forecast::{ForecastEngine, PredictionResult};
use crate::ledger::{HistoryLedger, HistoryRow, LedgerLoadReport};

pub const DEFAULT_CHART_POINTS: usize = 120;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", content = "message", rename_all = "snake_case")]
pub enum SessionStatus {
    Loading,
    Ready,
    Predicting,
    Error(String),
}

impl SessionStatus {
    pub fn label(&self) -> String {
        match self {
            Self::Loading => "loading".to_string(),
            Self::Ready => "ready".to_string(),
            Self::Predicting => "predicting".to_string(),
            Self::Error(message) => format!("error: {message}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartPoint {
    pub date: String,
    pub price: f64,
    pub is_prediction: bool,
}

impl From<&HistoryRow> for ChartPoint {
    fn from(row: &HistoryRow) -> Self {
        Self {
            date: row.date.clone(),
            price: row.close,
            is_prediction: row.is_prediction,
        }
    }
}

/// Everything the user-facing surface renders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub status: SessionStatus,
    pub status_text: String,
    pub trigger_enabled: bool,
    pub last_prediction: Option<PredictionResult>,
    pub result_text: Option<String>,
    pub ledger_rows: usize,
    pub series: Vec<ChartPoint>,
}

impl SessionSnapshot {
    pub fn without_session(status: SessionStatus) -> Self {
        Self {
            status_text: status.label(),
            status,
            trigger_enabled: false,
            last_prediction: None,
            result_text: None,
            ledger_rows: 0,
            series: Vec::new(),
        }
    }
}

#[derive(Debug)]
struct SessionState {
    status: SessionStatus,
    last_prediction: Option<PredictionResult>,
}

pub struct ForecastSession {
    engine: ForecastEngine,
    ledger: RwLock<HistoryLedger>,
    state: Mutex<SessionState>,
    load_report: Option<LedgerLoadReport>,
    // Held for the whole forecast + append; only its holder writes the ledger.
    in_flight: Mutex<()>,
}

impl ForecastSession {
    pub fn new(engine: ForecastEngine, ledger: HistoryLedger) -> Self {
        Self {
            engine,
            ledger: RwLock::new(ledger),
            state: Mutex::new(SessionState {
                status: SessionStatus::Ready,
                last_prediction: None,
            }),
            load_report: None,
            in_flight: Mutex::new(()),
        }
    }

    /// Attaches the counts from loading the history source.
    pub fn with_load_report(mut self, report: LedgerLoadReport) -> Self {
        self.load_report = Some(report);
        self
    }

    pub fn load_report(&self) -> Option<&LedgerLoadReport> {
        self.load_report.as_ref()
    }

    pub fn engine(&self) -> &ForecastEngine {
        &self.engine
    }

    pub fn status(&self) -> SessionStatus {
        self.lock_state().status.clone()
    }

    pub fn last_prediction(&self) -> Option<PredictionResult> {
        self.lock_state().last_prediction.clone()
    }

    pub fn with_ledger<R>(&self, f: impl FnOnce(&HistoryLedger) -> R) -> R {
        let ledger = self
            .ledger
            .read()
            .expect("ledger lock should not be poisoned");
        f(&ledger)
    }

    pub fn ledger_len(&self) -> usize {
        self.with_ledger(HistoryLedger::len)
    }

    /// Last `max_points` ledger rows as chart points, oldest first.
    pub fn series(&self, max_points: usize) -> Vec<ChartPoint> {
        self.with_ledger(|ledger| {
            let rows = ledger.rows();
            let start = rows.len().saturating_sub(max_points);
            rows[start..].iter().map(ChartPoint::from).collect()
        })
    }

    pub fn snapshot(&self, max_points: usize) -> SessionSnapshot {
        let (status, last_prediction) = {
            let state = self.lock_state();
            (state.status.clone(), state.last_prediction.clone())
        };
        let (ledger_rows, series) = (self.ledger_len(), self.series(max_points));

        SessionSnapshot {
            status_text: status.label(),
            trigger_enabled: !matches!(status, SessionStatus::Predicting),
            status,
            result_text: last_prediction.as_ref().map(PredictionResult::status_line),
            last_prediction,
            ledger_rows,
            series,
        }
    }

    /// Forecasts the next day and appends it to the ledger as one unit.
    ///
    /// Rejects with [`ForecastError::PredictionInFlight`] while another call
    /// holds the guard. On any error, including a panicking model, the ledger
    /// is left untouched and the session accepts the next call.
    pub fn predict_next(&self) -> Result<PredictionResult, ForecastError> {
        let _guard = match self.in_flight.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::WouldBlock) => {
                warn!(
                    component = "session",
                    event = "forecast.predict.rejected",
                    reason = "in_flight"
                );
                return Err(ForecastError::PredictionInFlight);
            }
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
        };

        self.set_status(SessionStatus::Predicting);
        info!(
            component = "session",
            event = "forecast.predict.start",
            ledger_rows = self.ledger_len()
        );

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.forecast_and_append()))
            .unwrap_or_else(|payload| {
                Err(ForecastError::InferenceFailure(format!(
                    "prediction panicked: {}",
                    panic_message(payload.as_ref())
                )))
            });

        let mut state = self.lock_state();
        match &outcome {
            Ok(result) => {
                info!(
                    component = "session",
                    event = "forecast.predict.finish",
                    date = %result.date,
                    price = result.price,
                    log_return = result.log_return
                );
                state.status = SessionStatus::Ready;
                state.last_prediction = Some(result.clone());
            }
            Err(err) => {
                warn!(
                    component = "session",
                    event = "forecast.predict.error",
                    error = %err
                );
                state.status = SessionStatus::Error(err.to_string());
            }
        }

        outcome
    }

    fn forecast_and_append(&self) -> Result<PredictionResult, ForecastError> {
        let (result, source) = self.with_ledger(|ledger| {
            let result = self.engine.forecast_next(ledger)?;
            let source = ledger.last()?.clone();
            Ok::<_, ForecastError>((result, source))
        })?;

        let row = HistoryRow::prediction(result.date.clone(), result.price, &source);
        self.ledger
            .write()
            .expect("ledger lock should not be poisoned")
            .append(row)?;

        Ok(result)
    }

    fn set_status(&self, status: SessionStatus) {
        self.lock_state().status = status;
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, SessionState> {
        self.state
            .lock()
            .expect("session state lock should not be poisoned")
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::model::ConstantReturnModel;
    use crate::scaler::Scaler;
    use crate::window::WINDOW_SIZE;

    fn ledger_of(n: usize) -> HistoryLedger {
        let rows = (0..n)
            .map(|i| {
                HistoryRow::new(
                    format!("2022-{:02}-{:02}", 1 + i / 28, 1 + i % 28),
                    10.0 + i as f64,
                    vec![i as f64, 1.0],
                )
            })
            .collect();
        HistoryLedger::from_rows(rows).unwrap().0
    }

    fn session(n: usize, log_return: f32) -> ForecastSession {
        ForecastSession::new(
            ForecastEngine::new(
                Arc::new(ConstantReturnModel::new(log_return)),
                Scaler::from_optional(None),
            ),
            ledger_of(n),
        )
    }

    #[test]
    fn status_labels_match_surface_text() {
        assert_eq!(SessionStatus::Loading.label(), "loading");
        assert_eq!(SessionStatus::Ready.label(), "ready");
        assert_eq!(SessionStatus::Predicting.label(), "predicting");
        assert_eq!(
            SessionStatus::Error("boom".to_string()).label(),
            "error: boom"
        );
    }

    #[test]
    fn successful_prediction_appends_marked_row() {
        let session = session(WINDOW_SIZE, 0.0);
        let result = session.predict_next().unwrap();

        assert_eq!(session.ledger_len(), WINDOW_SIZE + 1);
        session.with_ledger(|ledger| {
            let last = ledger.last().unwrap();
            let source = &ledger.rows()[WINDOW_SIZE - 1];
            assert!(last.is_prediction);
            assert_eq!(last.date, result.date);
            assert_eq!(last.close, source.close);
            assert_eq!(last.features_raw, source.features_raw);
        });
        assert_eq!(session.status(), SessionStatus::Ready);
        assert_eq!(session.last_prediction(), Some(result));
    }

    #[test]
    fn failed_prediction_leaves_ledger_and_reenables_trigger() {
        let session = session(WINDOW_SIZE - 1, 0.0);
        let err = session.predict_next().unwrap_err();

        assert!(matches!(err, ForecastError::InsufficientHistory { .. }));
        assert_eq!(session.ledger_len(), WINDOW_SIZE - 1);

        let snapshot = session.snapshot(DEFAULT_CHART_POINTS);
        assert!(snapshot.trigger_enabled);
        assert!(snapshot.status_text.starts_with("error: insufficient history"));
        assert!(snapshot.last_prediction.is_none());
    }

    #[test]
    fn series_is_a_bounded_tail() {
        let session = session(WINDOW_SIZE + 5, 0.0);
        let series = session.series(10);

        assert_eq!(series.len(), 10);
        session.with_ledger(|ledger| {
            assert_eq!(series[9].date, ledger.last().unwrap().date);
            assert_eq!(series[0].date, ledger.rows()[ledger.len() - 10].date);
        });
        assert_eq!(session.series(1_000).len(), WINDOW_SIZE + 5);
    }
}
