//! Error kinds for the prediction path and for startup loading.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ForecastError {
    #[error("model not loaded")]
    ModelNotLoaded,
    #[error("history is empty")]
    EmptyHistory,
    #[error("insufficient history: need {required} rows, have {available}")]
    InsufficientHistory { required: usize, available: usize },
    #[error("inference failed: {0}")]
    InferenceFailure(String),
    #[error("a prediction is already in flight")]
    PredictionInFlight,
    #[error("append out of order: {date} does not follow {last_date}")]
    OutOfOrderAppend { date: String, last_date: String },
    #[error("row {date} has {found} features, expected {expected}")]
    FeatureWidthMismatch {
        date: String,
        found: usize,
        expected: usize,
    },
    #[error("row {date} has non-positive or non-finite close {close}")]
    InvalidClose { date: String, close: f64 },
    #[error("invalid calendar date '{0}', expected YYYY-MM-DD")]
    InvalidDate(String),
    #[error("prediction produced a non-finite value (log_return={log_return}, price={price})")]
    InvalidPrediction { log_return: f64, price: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Model,
    Scaler,
    History,
}

impl SourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Model => "model",
            Self::Scaler => "scaler",
            Self::History => "history",
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to load {source_kind} from {location}: {message}")]
    StartupLoadFailed {
        source_kind: SourceKind,
        location: String,
        message: String,
    },
    #[error("invalid startup config: {0}")]
    InvalidConfig(String),
}

impl StartupError {
    pub fn load_failed(
        source_kind: SourceKind,
        location: impl Into<String>,
        message: impl std::fmt::Display,
    ) -> Self {
        Self::StartupLoadFailed {
            source_kind,
            location: location.into(),
            message: message.to_string(),
        }
    }

    pub fn source_kind(&self) -> Option<SourceKind> {
        match self {
            Self::StartupLoadFailed { source_kind, .. } => Some(*source_kind),
            Self::InvalidConfig(_) => None,
        }
    }
}
