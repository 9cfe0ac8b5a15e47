// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Inbound HTTP API.
//!
//! The surface the application server calls into: device-queue
//! management, multicast enqueue and gateway lookups.

mod handlers;

use crate::context::ServerContext;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;

/// API v1 routes.
pub fn routes(ctx: Arc<ServerContext>) -> Router {
    Router::new()
        .route("/api/v1/health", get(handlers::health))
        .route(
            "/api/v1/devices/:dev_eui/queue",
            post(handlers::create_device_queue_item)
                .get(handlers::get_device_queue_items)
                .delete(handlers::flush_device_queue),
        )
        .route(
            "/api/v1/multicast-groups/:id/queue",
            post(handlers::enqueue_multicast_queue_item),
        )
        .route("/api/v1/gateways/:gateway_id", get(handlers::get_gateway))
        .with_state(ctx)
}

/// Serve the API until the process exits.
pub async fn serve(ctx: Arc<ServerContext>, bind: std::net::SocketAddr) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!(bind = %bind, "api listening");
    axum::serve(listener, routes(ctx)).await?;
    Ok(())
}
