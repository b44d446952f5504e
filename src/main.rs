//! ReviewFlow API - Autonomous Code Governance Platform
//!
//! Machine-generated code-change suggestions, verified and published
//! upstream without human authorship of the diff itself.
//!
//! PROPOSAL PIPELINE: The server runs a scheduler-driven lifecycle:
//! - Generate: reviewer roles propose file-level changes on their cadence
//! - Review: proposals move through a guarded status graph
//! - Verify: approved candidates are written into the source mirror and
//!   run through the external test runner
//! - Publish: verified changes are committed and opened upstream

mod config;
mod error;
mod events;
mod models;
mod pipeline;
mod proposal;
mod reviewer;
mod routes;
mod state;

use crate::config::Settings;
use crate::pipeline::scheduler::Scheduler;
use crate::routes::create_router;
use crate::state::AppState;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing subscriber for structured logging
    init_tracing();

    info!("🚀 Starting ReviewFlow - Autonomous Code Governance Platform...");

    // Load configuration
    let settings = Settings::load()?;
    info!("📋 Configuration loaded successfully");

    let state = Arc::new(AppState::new(settings.clone())?);

    // First sync attempt; a failure here is retried by the timers, never fatal
    if let Err(e) = state.mirror.ensure_up_to_date().await {
        warn!("⚠️  Initial mirror sync failed (will retry on schedule): {}", e);
    }

    // Start the pipeline timers
    let timers = Scheduler::new(state.clone()).spawn();
    info!("⏱️  Scheduler started with {} timers", timers.len());

    // Build the router
    let app = create_router(state, &settings);

    // Create socket address
    let addr = SocketAddr::from((settings.server.host, settings.server.port));

    info!("🌐 Server listening on http://{}", addr);
    info!("");
    info!("📚 API Endpoints:");
    info!("   ─── Proposal Lifecycle ───");
    info!("   POST /proposals              - Create new proposal");
    info!("   GET  /proposals              - List proposals (?status=&reviewer=)");
    info!("   GET  /proposals/summary      - Aggregate counts per status");
    info!("   GET  /proposals/events       - Best-effort event stream (SSE)");
    info!("   GET  /proposals/{{id}}         - Get one proposal");
    info!("   POST /proposals/{{id}}/approve - Approve a pending proposal");
    info!("   POST /proposals/{{id}}/reject  - Reject with a reason");
    info!("");
    info!("   ─── Reviewers ───");
    info!("   GET  /reviewers              - Registered reviewer roster");
    info!("");

    // Create TCP listener and serve
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Stop the timers with the server
    for timer in timers {
        timer.abort();
    }

    info!("👋 Server shutdown complete");
    Ok(())
}

/// Initialize tracing with structured logging
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,reviewflow_api=debug,tower_http=debug"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .compact(),
        )
        .init();
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("📴 Received Ctrl+C signal, initiating graceful shutdown...");
        },
        _ = terminate => {
            info!("📴 Received terminate signal, initiating graceful shutdown...");
        },
    }
}
