//! Startup loading of the model, scaler config, and history.
//!
//! The three loads run concurrently and all must succeed before a
//! [`ForecastSession`] exists. Sources are filesystem paths or `http(s)` URLs.

use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::error::{SourceKind, StartupError};
use crate::forecast::ForecastEngine;
use crate::ledger::{HistoryLedger, HistoryRow, LedgerLoadReport};
use crate::model::{ConstantReturnModel, SequenceModel};
use crate::scaler::{Scaler, ScalerConfig};
use crate::session::ForecastSession;

const CONSTANT_MODEL_PREFIX: &str = "constant:";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceRef {
    Url(String),
    Path(PathBuf),
}

impl SourceRef {
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        let lower = trimmed.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            Self::Url(trimmed.to_string())
        } else {
            Self::Path(PathBuf::from(trimmed))
        }
    }

    pub fn location(&self) -> String {
        match self {
            Self::Url(url) => url.clone(),
            Self::Path(path) => path.display().to_string(),
        }
    }
}

impl fmt::Display for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.location())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ModelSource {
    /// Demo model that always predicts the given log-return.
    Constant(f32),
    Onnx(SourceRef),
}

impl ModelSource {
    pub fn parse(raw: &str) -> Result<Self, StartupError> {
        let trimmed = raw.trim();
        match trimmed.strip_prefix(CONSTANT_MODEL_PREFIX) {
            Some(value) => value.trim().parse::<f32>().map(Self::Constant).map_err(|_| {
                StartupError::InvalidConfig(format!(
                    "constant model needs a numeric log-return, got '{value}'"
                ))
            }),
            None => Ok(Self::Onnx(SourceRef::parse(trimmed))),
        }
    }

    pub fn location(&self) -> String {
        match self {
            Self::Constant(value) => format!("{CONSTANT_MODEL_PREFIX}{value}"),
            Self::Onnx(source) => source.location(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StartupConfig {
    pub model: ModelSource,
    pub scaler: SourceRef,
    pub history: SourceRef,
    pub http_timeout_ms: u64,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
}

impl Default for StartupConfig {
    fn default() -> Self {
        Self {
            model: ModelSource::Onnx(SourceRef::Path(PathBuf::from("model/model.onnx"))),
            scaler: SourceRef::Path(PathBuf::from("model/scaler.json")),
            history: SourceRef::Path(PathBuf::from("data/history.json")),
            http_timeout_ms: 15_000,
            max_retries: 0,
            retry_backoff_ms: 200,
        }
    }
}

pub fn startup_config_from_env() -> Result<StartupConfig, StartupError> {
    let mut config = StartupConfig::default();

    if let Some(raw) = non_empty_env("PRICECAST_MODEL_SOURCE") {
        config.model = ModelSource::parse(&raw)?;
    }
    if let Some(raw) = non_empty_env("PRICECAST_SCALER_SOURCE") {
        config.scaler = SourceRef::parse(&raw);
    }
    if let Some(raw) = non_empty_env("PRICECAST_HISTORY_SOURCE") {
        config.history = SourceRef::parse(&raw);
    }
    if let Some(raw) = non_empty_env("PRICECAST_HTTP_TIMEOUT_MS") {
        config.http_timeout_ms = parse_number("PRICECAST_HTTP_TIMEOUT_MS", &raw)?;
    }
    if let Some(raw) = non_empty_env("PRICECAST_MAX_RETRIES") {
        config.max_retries = parse_number("PRICECAST_MAX_RETRIES", &raw)?;
    }
    if let Some(raw) = non_empty_env("PRICECAST_RETRY_BACKOFF_MS") {
        config.retry_backoff_ms = parse_number("PRICECAST_RETRY_BACKOFF_MS", &raw)?;
    }

    Ok(config)
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|raw| raw.trim().to_string())
        .filter(|raw| !raw.is_empty())
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, StartupError> {
    raw.parse::<T>()
        .map_err(|_| StartupError::InvalidConfig(format!("{key} must be a number, got '{raw}'")))
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP client build error: {0}")]
    HttpClientBuild(String),
    #[error("HTTP request failed for {url}: {message}")]
    HttpRequest { url: String, message: String },
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

pub trait HttpFetcher: Send + Sync {
    fn get_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

pub struct ReqwestBlockingFetcher {
    client: reqwest::blocking::Client,
}

impl ReqwestBlockingFetcher {
    pub fn new(timeout_ms: u64) -> Result<Self, FetchError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_millis(timeout_ms))
            .build()
            .map_err(|err| FetchError::HttpClientBuild(err.to_string()))?;
        Ok(Self { client })
    }
}

impl HttpFetcher for ReqwestBlockingFetcher {
    fn get_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|err| FetchError::HttpRequest {
                url: url.to_string(),
                message: err.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpRequest {
                url: url.to_string(),
                message: format!("unexpected HTTP status {status}"),
            });
        }

        response
            .bytes()
            .map(|bytes| bytes.to_vec())
            .map_err(|err| FetchError::HttpRequest {
                url: url.to_string(),
                message: err.to_string(),
            })
    }
}

pub fn read_source(
    source: &SourceRef,
    fetcher: &dyn HttpFetcher,
    cfg: &StartupConfig,
) -> Result<Vec<u8>, FetchError> {
    match source {
        SourceRef::Url(url) => retry(cfg, || fetcher.get_bytes(url)),
        SourceRef::Path(path) => read_file(path),
    }
}

fn read_file(path: &Path) -> Result<Vec<u8>, FetchError> {
    std::fs::read(path).map_err(|source| FetchError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn retry<T>(
    cfg: &StartupConfig,
    mut f: impl FnMut() -> Result<T, FetchError>,
) -> Result<T, FetchError> {
    let mut attempt: u32 = 0;
    loop {
        match f() {
            Ok(value) => return Ok(value),
            Err(err) if attempt >= cfg.max_retries => return Err(err),
            Err(err) => {
                attempt = attempt.saturating_add(1);
                let shift = attempt.saturating_sub(1).min(10);
                let sleep_ms = cfg.retry_backoff_ms.saturating_mul(1u64 << shift);
                debug!(
                    component = "sources",
                    event = "startup.fetch.retry",
                    attempt,
                    sleep_ms,
                    error = %err
                );
                thread::sleep(std::time::Duration::from_millis(sleep_ms));
            }
        }
    }
}

pub fn load_scaler(
    source: &SourceRef,
    fetcher: &dyn HttpFetcher,
    cfg: &StartupConfig,
) -> Result<Scaler, StartupError> {
    let fail = |err: &dyn fmt::Display| {
        StartupError::load_failed(SourceKind::Scaler, source.location(), err)
    };
    let bytes = read_source(source, fetcher, cfg).map_err(|err| fail(&err))?;
    let config: ScalerConfig = serde_json::from_slice(&bytes).map_err(|err| fail(&err))?;
    Ok(Scaler::from_config(&config))
}

pub fn load_history(
    source: &SourceRef,
    fetcher: &dyn HttpFetcher,
    cfg: &StartupConfig,
) -> Result<(HistoryLedger, LedgerLoadReport), StartupError> {
    let fail = |err: &dyn fmt::Display| {
        StartupError::load_failed(SourceKind::History, source.location(), err)
    };
    let bytes = read_source(source, fetcher, cfg).map_err(|err| fail(&err))?;
    let rows: Vec<HistoryRow> = serde_json::from_slice(&bytes).map_err(|err| fail(&err))?;
    HistoryLedger::from_rows(rows).map_err(|err| fail(&err))
}

pub fn load_model(
    source: &ModelSource,
    fetcher: &dyn HttpFetcher,
    cfg: &StartupConfig,
) -> Result<Arc<dyn SequenceModel>, StartupError> {
    match source {
        ModelSource::Constant(log_return) => Ok(Arc::new(ConstantReturnModel::new(*log_return))),
        ModelSource::Onnx(source) => load_onnx_model(source, fetcher, cfg),
    }
}

#[cfg(feature = "onnx")]
fn load_onnx_model(
    source: &SourceRef,
    fetcher: &dyn HttpFetcher,
    cfg: &StartupConfig,
) -> Result<Arc<dyn SequenceModel>, StartupError> {
    use crate::model::OnnxSequenceModel;

    let model = match source {
        SourceRef::Path(path) => OnnxSequenceModel::from_file(path),
        SourceRef::Url(url) => {
            let bytes = read_source(source, fetcher, cfg).map_err(|err| {
                StartupError::load_failed(SourceKind::Model, source.location(), err)
            })?;
            OnnxSequenceModel::from_bytes(&bytes, url.clone())
        }
    }
    .map_err(|err| StartupError::load_failed(SourceKind::Model, source.location(), err))?;

    Ok(Arc::new(model))
}

#[cfg(not(feature = "onnx"))]
fn load_onnx_model(
    source: &SourceRef,
    _fetcher: &dyn HttpFetcher,
    _cfg: &StartupConfig,
) -> Result<Arc<dyn SequenceModel>, StartupError> {
    Err(StartupError::load_failed(
        SourceKind::Model,
        source.location(),
        "ONNX support is not compiled in (enable the `onnx` feature)",
    ))
}

pub fn load_session(cfg: &StartupConfig) -> Result<ForecastSession, StartupError> {
    let fetcher = ReqwestBlockingFetcher::new(cfg.http_timeout_ms)
        .map_err(|err| StartupError::InvalidConfig(err.to_string()))?;
    load_session_with_fetcher(cfg, &fetcher)
}

/// Runs the model, scaler, and history loads in parallel. Any failure aborts
/// startup; the first failing source in that order is reported.
pub fn load_session_with_fetcher(
    cfg: &StartupConfig,
    fetcher: &dyn HttpFetcher,
) -> Result<ForecastSession, StartupError> {
    let started = Instant::now();
    info!(
        component = "sources",
        event = "startup.start",
        model = %cfg.model.location(),
        scaler = %cfg.scaler,
        history = %cfg.history
    );

    let (model, scaler, history) = thread::scope(|scope| {
        let model = scope.spawn(|| timed(SourceKind::Model, || load_model(&cfg.model, fetcher, cfg)));
        let scaler =
            scope.spawn(|| timed(SourceKind::Scaler, || load_scaler(&cfg.scaler, fetcher, cfg)));
        let history = scope.spawn(|| {
            timed(SourceKind::History, || load_history(&cfg.history, fetcher, cfg))
        });

        (
            join_loader(model, SourceKind::Model),
            join_loader(scaler, SourceKind::Scaler),
            join_loader(history, SourceKind::History),
        )
    });

    let outcome = model.and_then(|model| Ok((model, scaler?, history?)));

    let (model, scaler, (ledger, report)) = match outcome {
        Ok(loaded) => loaded,
        Err(err) => {
            warn!(
                component = "sources",
                event = "startup.failed",
                source_kind = err.source_kind().map(SourceKind::as_str),
                error = %err
            );
            return Err(err);
        }
    };

    if let (Scaler::Affine { mean, .. }, Some(feature_count)) = (&scaler, ledger.feature_count()) {
        if mean.len() != feature_count {
            warn!(
                component = "sources",
                event = "startup.scaler.width_mismatch",
                scaler_features = mean.len(),
                history_features = feature_count
            );
        }
    }

    info!(
        component = "sources",
        event = "startup.ready",
        model = model.name(),
        scaler_identity = scaler.is_identity(),
        ledger_rows = ledger.len(),
        history_input_rows = report.input_rows,
        duplicate_dates_removed = report.duplicate_dates_removed,
        elapsed_ms = started.elapsed().as_millis() as u64
    );

    let session = ForecastSession::new(ForecastEngine::new(model, scaler), ledger);
    Ok(session.with_load_report(report))
}

fn timed<T>(
    kind: SourceKind,
    f: impl FnOnce() -> Result<T, StartupError>,
) -> Result<T, StartupError> {
    let started = Instant::now();
    let outcome = f();
    if outcome.is_ok() {
        info!(
            component = "sources",
            event = "startup.source.loaded",
            source_kind = kind.as_str(),
            elapsed_ms = started.elapsed().as_millis() as u64
        );
    }
    outcome
}

fn join_loader<T>(
    handle: thread::ScopedJoinHandle<'_, Result<T, StartupError>>,
    kind: SourceKind,
) -> Result<T, StartupError> {
    handle
        .join()
        .unwrap_or_else(|_| Err(StartupError::load_failed(kind, "-", "loader thread panicked")))
}
