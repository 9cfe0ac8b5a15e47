// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! LNS server binary.
//!
//! Composition root: builds the stores, band table, clients and
//! schedulers, wires them into one [`ServerContext`] and runs the gateway
//! intake loop, the downlink scheduler and the HTTP API.
//!
//! # Usage
//!
//! ```bash
//! # defaults: EU868, sqlite file lns.db, API on :8070, bridge on :7700
//! lns-server
//!
//! # custom config and listeners
//! lns-server --config lns.toml --api-bind 0.0.0.0:8070 --bus-bind 0.0.0.0:7700
//! ```

use anyhow::Context as _;
use clap::Parser;
use lns::backend::http::{HttpApplicationServer, HttpJoinServer};
use lns::context::ServerContext;
use lns::downlink::Scheduler;
use lns::gateway::bridge::{self, TcpGatewayBackend};
use lns::gateway::{stats, GatewayEvent};
use lns::storage::Storage;
use lns::{region, uplink, Config};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, Instrument, Level};
use tracing_subscriber::FmtSubscriber;

/// LoRaWAN network server
#[derive(Parser, Debug)]
#[command(name = "lns-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (TOML format)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// SQLite database path
    #[arg(long, default_value = "lns.db")]
    database: String,

    /// HTTP API bind address
    #[arg(long, default_value = "0.0.0.0:8070")]
    api_bind: SocketAddr,

    /// Gateway bridge bind address
    #[arg(long, default_value = "0.0.0.0:7700")]
    bus_bind: SocketAddr,

    /// Application server base URL
    #[arg(long, default_value = "http://127.0.0.1:8076")]
    as_url: String,

    /// Join server base URL
    #[arg(long, default_value = "http://127.0.0.1:8003")]
    js_url: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = match &args.config {
        Some(path) => {
            info!(path = %path.display(), "loading config");
            Config::from_file(path).context("load config")?
        }
        None => Config::default(),
    };

    let band = region::by_name(&config.network.band).context("resolve band")?;
    info!(band = band.name, "band parameters loaded");

    let storage = Arc::new(
        Storage::open(&args.database, config.device_session_ttl()).context("open storage")?,
    );
    storage.spawn_cache_sweeper(Duration::from_secs(60));

    let gateway_backend = Arc::new(TcpGatewayBackend::new());
    let app_server = Arc::new(HttpApplicationServer::new(&args.as_url)?);
    let join_server = Arc::new(HttpJoinServer::new(&args.js_url)?);

    let ctx = Arc::new(ServerContext::new(
        config,
        band,
        Arc::clone(&storage),
        gateway_backend.clone(),
        app_server,
        join_server,
    ));

    info!(
        version = env!("CARGO_PKG_VERSION"),
        api = %args.api_bind,
        bus = %args.bus_bind,
        "lns-server starting"
    );

    // downlink scheduler
    Scheduler::new(Arc::clone(&ctx)).spawn();

    // gateway intake
    let (events_tx, mut events_rx) = tokio::sync::mpsc::channel::<GatewayEvent>(1024);
    {
        let ctx = Arc::clone(&ctx);
        tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                let ctx = Arc::clone(&ctx);
                // one span per inbound event; every log line downstream
                // carries the request id
                let span = tracing::info_span!("gateway_event", ctx_id = %uuid::Uuid::new_v4());
                let task = async move {
                    match event {
                        GatewayEvent::Uplink(frame) => {
                            if let Err(e) = uplink::handle_uplink_frame(&ctx, frame).await {
                                error!(error = %e, "handle uplink frame error");
                            }
                        }
                        GatewayEvent::Stats(gw_stats) => {
                            if let Err(e) = stats::handle_gateway_stats(
                                &ctx.storage,
                                &ctx.band,
                                ctx.app_server.as_ref(),
                                ctx.gateway.as_ref(),
                                gw_stats,
                            ) {
                                error!(error = %e, "handle gateway stats error");
                            }
                        }
                    }
                };
                tokio::spawn(task.instrument(span));
            }
        });
    }

    // bridge + API serve until failure
    let bridge_task = bridge::serve(args.bus_bind, gateway_backend, events_tx);
    let api_task = lns::api::serve(Arc::clone(&ctx), args.api_bind);

    tokio::select! {
        res = bridge_task => res.context("gateway bridge"),
        res = api_task => res.context("api server"),
    }
}
