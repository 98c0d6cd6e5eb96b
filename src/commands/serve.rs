use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::path::PathBuf;

use trendcast::config::Config;
use trendcast::metrics;
use trendcast::server::AnalyticsServer;

/// Parameters for the analytics server
pub struct ServeParams {
    pub config_path: Option<PathBuf>,
    pub fixture: Option<PathBuf>,
    pub bind: Option<String>,
}

/// Start the analytics server
pub async fn serve(params: ServeParams) -> Result<()> {
    let ServeParams {
        config_path,
        fixture,
        bind,
    } = params;

    let mut config = Config::load(config_path.as_deref()).context("Failed to load configuration")?;

    if let Some(fixture) = fixture {
        config.store.fixture_path = Some(fixture);
    }
    if let Some(bind) = bind {
        let addr: SocketAddr = bind.parse().context("Invalid bind address")?;
        config.server.host = addr.ip().to_string();
        config.server.port = addr.port();
    }

    if let Err(e) = metrics::init_metrics() {
        tracing::warn!("Metrics initialization failed, continuing without metrics: {}", e);
    }

    let server = AnalyticsServer::from_config(config)
        .await
        .context("Failed to create analytics server")?;

    println!("{}", server.info().display());
    println!();
    println!("API Endpoints:");
    println!("  GET  /api/health                - Health check");
    println!("  GET  /metrics                   - Prometheus metrics endpoint");
    println!("  GET  /api/realtime/metrics      - Realtime snapshot stream");
    println!("  GET  /api/aggregate             - Platform aggregate metrics");
    println!("  GET  /api/trends/platform       - Platform trend report");
    println!("  GET  /api/trends/profile/{{id}}   - Profile trend report");
    println!("  GET  /api/stats/{{id}}            - Profile stats");
    println!("  POST /api/batch/profile-stats   - Batch profile stats");
    println!("  GET  /api/metrics/grouped       - Grouped metrics");
    println!("  GET  /api/export                - JSON or CSV export");
    println!("  POST /api/refresh               - Refresh views and cache");
    println!();
    println!("Press Ctrl+C to stop.\n");

    server
        .start_with_shutdown(async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    tracing::info!("Shutdown signal received");
                }
                Err(e) => {
                    tracing::error!("Failed to wait for Ctrl+C: {}", e);
                }
            }
        })
        .await?;

    println!("Analytics server stopped.");
    Ok(())
}
