use std::net::SocketAddr;

use pricecast::{
    dashboard_router, init_logging, load_session, log_app_bind, log_app_start,
    log_sources_configured, logging_config_from_env, startup_config_from_env, ForecastApp,
    DEFAULT_CHART_POINTS,
};
use tracing::warn;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging_cfg = logging_config_from_env();
    init_logging(&logging_cfg)?;
    log_app_start("pricecast_server", &logging_cfg);

    let addr: SocketAddr = std::env::var("PRICECAST_ADDR")
        .unwrap_or_else(|_| "127.0.0.1:8080".to_string())
        .parse()?;
    let chart_points = match std::env::var("PRICECAST_CHART_POINTS") {
        Ok(raw) => raw.trim().parse::<usize>()?,
        Err(_) => DEFAULT_CHART_POINTS,
    };
    let startup_cfg = startup_config_from_env()?;
    log_sources_configured("pricecast_server", &startup_cfg);

    // Serve "loading" right away; the trigger unlocks once every source is in.
    let app = ForecastApp::loading(chart_points);
    let loader_app = app.clone();
    tokio::task::spawn_blocking(move || match load_session(&startup_cfg) {
        Ok(session) => loader_app.set_ready(session),
        Err(err) => {
            warn!(
                component = "pricecast_server",
                event = "startup.session.unavailable",
                error = %err
            );
            loader_app.set_failed(err.to_string());
        }
    });

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    log_app_bind(bound_addr);
    axum::serve(listener, dashboard_router(app)).await?;

    Ok(())
}
