#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! # tunnelpoold
//!
//! Thin host process for the `tunnelpool` library: loads configuration,
//! initializes tracing, constructs the tunnel pool, loads its persisted
//! cache, starts the Activator/Reconnector background managers, and serves
//! the read-only render-list HTTP surface.
//!
//! This binary wires [`tunnelpool::transport::StubTransport`] in by
//! default — it exists to exercise the pool's lifecycle and HTTP surface,
//! not to forward real packets. An embedding packet-forwarding daemon
//! constructs [`tunnelpool::TunnelPool`] directly with its own `Transport`.

use std::sync::Arc;

use clap::Parser;
use tower_http::trace::TraceLayer;
use tracing::info;

use tunnelpool::config::Config;
use tunnelpool::transport::StubTransport;
use tunnelpool::{http, TunnelPool};

/// tunnelpool — concurrent manager of outbound encrypted transport tunnels.
#[derive(Parser)]
#[command(name = "tunnelpoold", version)]
struct Cli {
    /// Path to a TOML config file. Defaults to `tunnelpool.toml` in the
    /// current directory, or compiled defaults if that is absent.
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref());

    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| config.logging.level.clone());
    tracing_subscriber::fmt().with_env_filter(log_filter).init();

    info!("tunnelpoold v{} starting", env!("CARGO_PKG_VERSION"));
    info!("cache path: {}", config.pool.cache_path);
    info!("HTTP listen: {}", config.http.listen);

    // init(): mutex, RNG, and id generator come up here.
    let transport = Arc::new(StubTransport);
    let pool = TunnelPool::init(transport, config.pool.clone(), "tunnelpool");

    // file_read: populate *cache* from disk before `open()`.
    pool.load_cache().await;

    // open(): spawn the Activator and Reconnector managers.
    pool.open();

    let app = http::router(pool.clone()).layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&config.http.listen)
        .await
        .unwrap_or_else(|e| panic!("failed to bind {}: {e}", config.http.listen));

    info!("tunnelpoold ready");

    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("failed to register SIGTERM handler");
            tokio::select! {
                _ = ctrl_c => info!("received SIGINT"),
                _ = sigterm.recv() => info!("received SIGTERM"),
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
            info!("received SIGINT");
        }
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .expect("server error");

    info!("tunnelpoold shutting down");
}
