//! HTTP surface: status text, the "predict next" trigger, and the price chart.

use std::sync::{Arc, RwLock};

use axum::{
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::ForecastError;
use crate::forecast::PredictionResult;
use crate::session::{ChartPoint, ForecastSession, SessionSnapshot, SessionStatus};

const CHART_WIDTH: f64 = 900.0;
const CHART_HEIGHT: f64 = 320.0;
const CHART_PAD: f64 = 40.0;

/// Startup progress as seen by the surface. Only `Ready` exposes a session.
pub enum SessionSlot {
    Loading,
    Ready(Arc<ForecastSession>),
    Failed(String),
}

#[derive(Clone)]
pub struct ForecastApp {
    slot: Arc<RwLock<SessionSlot>>,
    chart_points: usize,
}

impl ForecastApp {
    pub fn loading(chart_points: usize) -> Self {
        Self {
            slot: Arc::new(RwLock::new(SessionSlot::Loading)),
            chart_points,
        }
    }

    pub fn ready(session: ForecastSession, chart_points: usize) -> Self {
        let app = Self::loading(chart_points);
        app.set_ready(session);
        app
    }

    pub fn set_ready(&self, session: ForecastSession) {
        *self.write_slot() = SessionSlot::Ready(Arc::new(session));
    }

    pub fn set_failed(&self, message: impl Into<String>) {
        *self.write_slot() = SessionSlot::Failed(message.into());
    }

    pub fn session(&self) -> Option<Arc<ForecastSession>> {
        match &*self.read_slot() {
            SessionSlot::Ready(session) => Some(Arc::clone(session)),
            SessionSlot::Loading | SessionSlot::Failed(_) => None,
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let session = match &*self.read_slot() {
            SessionSlot::Loading => return SessionSnapshot::without_session(SessionStatus::Loading),
            SessionSlot::Failed(message) => {
                return SessionSnapshot::without_session(SessionStatus::Error(message.clone()))
            }
            SessionSlot::Ready(session) => Arc::clone(session),
        };
        session.snapshot(self.chart_points)
    }

    fn read_slot(&self) -> std::sync::RwLockReadGuard<'_, SessionSlot> {
        self.slot
            .read()
            .expect("session slot lock should not be poisoned")
    }

    fn write_slot(&self) -> std::sync::RwLockWriteGuard<'_, SessionSlot> {
        self.slot
            .write()
            .expect("session slot lock should not be poisoned")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictResponse {
    pub ok: bool,
    pub prediction: Option<PredictionResult>,
    pub error: Option<String>,
    pub status_text: String,
}

pub fn dashboard_router(app: ForecastApp) -> Router {
    Router::new()
        .route("/", get(get_dashboard_html))
        .route("/dashboard", get(get_dashboard_html))
        .route("/dashboard/snapshot", get(get_dashboard_snapshot))
        .route("/dashboard/predict", post(post_predict))
        .with_state(DashboardAppState { app })
}

pub fn render_dashboard_html(snapshot: &SessionSnapshot) -> String {
    let mut out = String::new();
    out.push_str("<!DOCTYPE html><html><head><meta charset=\"utf-8\">\n");
    out.push_str("<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n");
    out.push_str("<title>Pricecast</title>\n");
    out.push_str("<style>:root{--bg:#f3f5f7;--card:#fff;--ink:#1b2329;--muted:#5f6a73;--line:#1f6f8b;--pred:#d9822b;--btn:#0c5f78}*{box-sizing:border-box}body{margin:0;color:var(--ink);font-family:\"Avenir Next\",\"Segoe UI\",sans-serif;background:var(--bg)}.shell{max-width:980px;margin:0 auto;padding:24px 18px}.hero{background:linear-gradient(135deg,#102f3a 0%,#24576b 100%);color:#f7fbfc;border-radius:14px;padding:16px 20px}.hero h1{margin:0 0 6px;font-size:1.5rem}#status{font-family:\"IBM Plex Mono\",monospace;font-size:.95rem}.status-error{color:#ffb4a8}.card{margin-top:16px;background:var(--card);border:1px solid #cbd4db;border-radius:14px;padding:16px}.controls{display:flex;gap:16px;align-items:center;flex-wrap:wrap}#predict-btn{background:var(--btn);color:#fff;border:0;border-radius:9px;padding:9px 16px;font-weight:700;cursor:pointer}#predict-btn:disabled{background:#9aa7b0;cursor:not-allowed}#result{color:var(--muted)}svg .series{fill:none;stroke:var(--line);stroke-width:2}svg .pred{fill:var(--pred)}svg text{font-size:11px;fill:var(--muted)}.note{margin-top:10px;font-size:.8rem;color:var(--muted)}</style>\n");
    out.push_str("</head><body><main class=\"shell\">\n");

    let status_class = match snapshot.status {
        SessionStatus::Error(_) => " class=\"status-error\"",
        _ => "",
    };
    out.push_str("<section class=\"hero\"><h1>Pricecast</h1>");
    out.push_str(&format!(
        "<div id=\"status\"{status_class}>{}</div>",
        escape_html(&snapshot.status_text)
    ));
    out.push_str("</section>\n");

    out.push_str("<section class=\"card\"><div class=\"controls\">");
    out.push_str(&format!(
        "<button id=\"predict-btn\" type=\"button\"{}>Predict next</button>",
        if snapshot.trigger_enabled { "" } else { " disabled" }
    ));
    out.push_str(&format!(
        "<span id=\"result\">{}</span>",
        escape_html(snapshot.result_text.as_deref().unwrap_or("-"))
    ));
    out.push_str(&format!("<span>Rows: {}</span>", snapshot.ledger_rows));
    out.push_str("</div>\n");
    out.push_str(&render_chart_svg(&snapshot.series));
    out.push_str("<div class=\"note\">Orange points are predictions. They reuse the features of the day before them and advance by calendar day.</div>");
    out.push_str("</section>\n");

    out.push_str("<script>\n");
    out.push_str("const btn=document.getElementById('predict-btn');\n");
    out.push_str("btn.addEventListener('click',async()=>{btn.disabled=true;document.getElementById('status').textContent='predicting';try{await fetch('/dashboard/predict',{method:'POST'});}finally{location.reload();}});\n");
    if matches!(snapshot.status, SessionStatus::Loading) {
        out.push_str("setTimeout(()=>location.reload(),1000);\n");
    }
    out.push_str("</script>\n");
    out.push_str("</main></body></html>\n");
    out
}

/// Line chart of the series plus a marker per prediction point.
pub fn render_chart_svg(series: &[ChartPoint]) -> String {
    let mut out = format!(
        "<svg id=\"chart\" viewBox=\"0 0 {CHART_WIDTH} {CHART_HEIGHT}\" width=\"100%\" role=\"img\">"
    );
    if series.is_empty() {
        out.push_str(&format!(
            "<text x=\"{}\" y=\"{}\">no data</text></svg>",
            CHART_WIDTH / 2.0,
            CHART_HEIGHT / 2.0
        ));
        return out;
    }

    let (min, max) = series
        .iter()
        .fold((f64::MAX, f64::MIN), |(lo, hi), p| (lo.min(p.price), hi.max(p.price)));
    let coords: Vec<(f64, f64)> = series
        .iter()
        .enumerate()
        .map(|(idx, point)| chart_xy(idx, series.len(), point.price, min, max))
        .collect();

    let points: Vec<String> = coords.iter().map(|(x, y)| format!("{x:.1},{y:.1}")).collect();
    out.push_str(&format!(
        "<polyline class=\"series\" points=\"{}\"/>",
        points.join(" ")
    ));

    for (point, (x, y)) in series.iter().zip(&coords) {
        if point.is_prediction {
            out.push_str(&format!(
                "<circle class=\"pred\" cx=\"{x:.1}\" cy=\"{y:.1}\" r=\"3.5\"><title>{} {:.2}</title></circle>",
                escape_html(&point.date),
                point.price
            ));
        }
    }

    let bottom = CHART_HEIGHT - CHART_PAD / 4.0;
    out.push_str(&format!(
        "<text x=\"{CHART_PAD}\" y=\"{bottom}\">{}</text>",
        escape_html(&series[0].date)
    ));
    out.push_str(&format!(
        "<text x=\"{}\" y=\"{bottom}\" text-anchor=\"end\">{}</text>",
        CHART_WIDTH - CHART_PAD,
        escape_html(&series[series.len() - 1].date)
    ));
    out.push_str(&format!(
        "<text x=\"4\" y=\"{}\">{max:.2}</text><text x=\"4\" y=\"{}\">{min:.2}</text>",
        CHART_PAD,
        CHART_HEIGHT - CHART_PAD
    ));
    out.push_str("</svg>");
    out
}

fn chart_xy(idx: usize, len: usize, price: f64, min: f64, max: f64) -> (f64, f64) {
    let inner_w = CHART_WIDTH - 2.0 * CHART_PAD;
    let inner_h = CHART_HEIGHT - 2.0 * CHART_PAD;
    let x = if len > 1 {
        CHART_PAD + inner_w * idx as f64 / (len - 1) as f64
    } else {
        CHART_WIDTH / 2.0
    };
    let span = max - min;
    let y = if span > 0.0 {
        CHART_PAD + inner_h * (max - price) / span
    } else {
        CHART_HEIGHT / 2.0
    };
    (x, y)
}

fn escape_html(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

fn status_code_for(err: &ForecastError) -> StatusCode {
    match err {
        ForecastError::PredictionInFlight => StatusCode::CONFLICT,
        ForecastError::ModelNotLoaded => StatusCode::SERVICE_UNAVAILABLE,
        ForecastError::EmptyHistory | ForecastError::InsufficientHistory { .. } => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        ForecastError::InferenceFailure(_)
        | ForecastError::InvalidPrediction { .. }
        | ForecastError::OutOfOrderAppend { .. }
        | ForecastError::FeatureWidthMismatch { .. }
        | ForecastError::InvalidClose { .. }
        | ForecastError::InvalidDate(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[derive(Clone)]
struct DashboardAppState {
    app: ForecastApp,
}

async fn get_dashboard_html(State(state): State<DashboardAppState>) -> impl IntoResponse {
    let snapshot = state.app.snapshot();
    Html(render_dashboard_html(&snapshot))
}

async fn get_dashboard_snapshot(State(state): State<DashboardAppState>) -> impl IntoResponse {
    let snapshot = state.app.snapshot();
    info!(
        component = "dashboard",
        event = "http.snapshot.request",
        status = %snapshot.status_text,
        points = snapshot.series.len()
    );
    Json(snapshot)
}

async fn post_predict(State(state): State<DashboardAppState>) -> Response {
    info!(component = "dashboard", event = "http.predict.request");

    let Some(session) = state.app.session() else {
        let snapshot = state.app.snapshot();
        return predict_response(
            StatusCode::CONFLICT,
            Err(format!("session not ready ({})", snapshot.status_text)),
            snapshot.status_text,
        );
    };

    let worker = Arc::clone(&session);
    let outcome = tokio::task::spawn_blocking(move || worker.predict_next()).await;
    let status_text = session.status().label();

    match outcome {
        Ok(Ok(result)) => predict_response(StatusCode::OK, Ok(result), status_text),
        Ok(Err(err)) => predict_response(status_code_for(&err), Err(err.to_string()), status_text),
        Err(join_err) => {
            warn!(
                component = "dashboard",
                event = "http.predict.join_error",
                error = %join_err
            );
            predict_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                Err(format!("prediction task failed: {join_err}")),
                status_text,
            )
        }
    }
}

fn predict_response(
    code: StatusCode,
    outcome: Result<PredictionResult, String>,
    status_text: String,
) -> Response {
    let body = match outcome {
        Ok(prediction) => PredictResponse {
            ok: true,
            prediction: Some(prediction),
            error: None,
            status_text,
        },
        Err(error) => PredictResponse {
            ok: false,
            prediction: None,
            error: Some(error),
            status_text,
        },
    };
    (code, Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(date: &str, price: f64, is_prediction: bool) -> ChartPoint {
        ChartPoint {
            date: date.to_string(),
            price,
            is_prediction,
        }
    }

    #[test]
    fn chart_has_one_vertex_per_point_and_marks_predictions() {
        let svg = render_chart_svg(&[
            point("2024-01-01", 10.0, false),
            point("2024-01-02", 12.0, false),
            point("2024-01-03", 11.0, true),
        ]);

        let polyline = svg
            .split("points=\"")
            .nth(1)
            .and_then(|rest| rest.split('"').next())
            .unwrap();
        assert_eq!(polyline.split(' ').count(), 3);
        assert_eq!(svg.matches("class=\"pred\"").count(), 1);
        assert!(svg.contains("2024-01-03 11.00"));
    }

    #[test]
    fn flat_or_single_point_series_stays_in_bounds() {
        let svg = render_chart_svg(&[point("2024-01-01", 5.0, false)]);
        assert!(svg.contains("points=\"450.0,160.0\""));
        assert!(render_chart_svg(&[]).contains("no data"));
    }

    #[test]
    fn trigger_is_disabled_while_loading() {
        let html = render_dashboard_html(&SessionSnapshot::without_session(SessionStatus::Loading));
        assert!(html.contains("id=\"predict-btn\" type=\"button\" disabled"));
        assert!(html.contains(">loading</div>"));
        assert!(html.contains("location.reload(),1000"));
    }

    #[test]
    fn error_status_is_escaped() {
        let html = render_dashboard_html(&SessionSnapshot::without_session(SessionStatus::Error(
            "bad <json>".to_string(),
        )));
        assert!(html.contains("error: bad &lt;json&gt;"));
        assert!(html.contains("status-error"));
    }

    #[test]
    fn prediction_errors_map_to_http_codes() {
        assert_eq!(
            status_code_for(&ForecastError::PredictionInFlight),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_code_for(&ForecastError::EmptyHistory),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_code_for(&ForecastError::InferenceFailure("x".to_string())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
