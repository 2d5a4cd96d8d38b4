//! Gate.io futures order book recorder
//!
//! Runs one recorder per configured contract and serves health checks and
//! Prometheus metrics.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use gateio_book_recorder::{
    metrics, AppState, BookStore, Config, ContractRecorder, CsvSink, CsvWriter, RecorderSettings,
    RestSnapshotClient,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer().json())
        .with(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    info!("Starting Gate.io order book recorder");

    let config = Arc::new(Config::load()?);
    info!(contracts = ?config.contracts, save_dir = %config.save_dir.display(), "Configuration loaded");

    let settings = RecorderSettings::from(config.as_ref());
    let mut stores = Vec::with_capacity(config.contracts.len());
    let mut recorders: Vec<JoinHandle<()>> = Vec::new();
    let mut writers: Vec<JoinHandle<()>> = Vec::new();

    for contract in &config.contracts {
        let store = Arc::new(BookStore::new(contract));
        let source = RestSnapshotClient::new(&config, contract)?;
        let (sink, writer) =
            CsvSink::spawn(CsvWriter::new(&config.save_dir, contract, config.flush_every)?);

        let recorder = ContractRecorder::new(Arc::clone(&store), source, sink, settings.clone());
        let endpoint = config.ws_endpoint.clone();
        let name = contract.clone();
        recorders.push(tokio::spawn(async move {
            if let Err(e) = recorder.run(endpoint).await {
                error!(contract = %name, error = %e, "Recorder exited");
            }
        }));

        writers.push(writer);
        stores.push(store);
    }

    let state = Arc::new(AppState {
        stores,
        config: config.clone(),
    });

    tokio::spawn(async move {
        if let Err(e) = start_health_server(state).await {
            warn!(error = %e, "Health server error");
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested, flushing buffered snapshots");

    // Dropping each recorder drops its sink handle, which lets the writer drain
    for recorder in recorders {
        recorder.abort();
        let _ = recorder.await;
    }
    for writer in writers {
        if let Err(e) = writer.await {
            warn!(error = %e, "Snapshot writer panicked");
        }
    }

    Ok(())
}

/// Start HTTP server for health checks and metrics
async fn start_health_server(state: Arc<AppState>) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], state.config.health_port));

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_text))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    info!(addr = %addr, "Starting health check server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health_check(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let books: Vec<serde_json::Value> = state
        .stores
        .iter()
        .map(|store| {
            let summary = store.summary();
            serde_json::json!({
                "contract": store.contract(),
                "ready": store.is_ready(),
                "last_bootstrap_id": store.last_bootstrap_id(),
                "best_bid": summary.best_bid,
                "best_ask": summary.best_ask,
                "bid_levels": summary.bid_levels,
                "ask_levels": summary.ask_levels,
            })
        })
        .collect();

    let healthy = state.stores.iter().all(|store| store.is_ready());

    Json(serde_json::json!({
        "status": if healthy { "healthy" } else { "starting" },
        "component": "gateio-book-recorder",
        "books": books,
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn metrics_text() -> Result<String, (StatusCode, String)> {
    metrics::render().map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}
