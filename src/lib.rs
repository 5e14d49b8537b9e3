//! Pricecast core crate.
//!
//! Next-day price forecasting over a growing history ledger:
//! - startup loading of model, scaler config, and history (paths or URLs)
//! - 60-row feature windows, standardized and fed to a sequence model
//! - log-return to price conversion and iterative feedback into the ledger
//! - an HTTP dashboard with a "predict next" trigger and a price chart

mod calendar;
mod dashboard;
mod error;
mod forecast;
mod ledger;
mod model;
mod observability;
mod scaler;
mod session;
mod sources;
mod window;

pub use calendar::{next_calendar_day, parse_date, CALENDAR_DAY_NOT_TRADING_DAY, DATE_FORMAT};
pub use dashboard::{
    dashboard_router, render_chart_svg, render_dashboard_html, ForecastApp, PredictResponse,
    SessionSlot,
};
pub use error::{ForecastError, SourceKind, StartupError};
pub use forecast::{price_from_log_return, ForecastEngine, PredictionResult};
pub use ledger::{HistoryLedger, HistoryRow, LedgerLoadReport, STALE_FEATURE_CARRYOVER};
#[cfg(feature = "onnx")]
pub use model::OnnxSequenceModel;
pub use model::{ConstantReturnModel, ModelError, SequenceModel, MODEL_HORIZON_TRADING_DAYS};
pub use observability::{
    init_logging, log_app_bind, log_app_start, log_sources_configured, logging_config_from_env,
    LogFormat, LoggingConfig, LoggingInitError,
};
pub use scaler::{IdentityReason, Scaler, ScalerConfig};
pub use session::{
    ChartPoint, ForecastSession, SessionSnapshot, SessionStatus, DEFAULT_CHART_POINTS,
};
pub use sources::{
    load_history, load_model, load_scaler, load_session, load_session_with_fetcher, read_source,
    startup_config_from_env, FetchError, HttpFetcher, ModelSource, ReqwestBlockingFetcher,
    SourceRef, StartupConfig,
};
pub use window::{build_window, FeatureWindow, WINDOW_SIZE};
