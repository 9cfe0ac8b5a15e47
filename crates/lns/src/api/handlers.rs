// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! HTTP request handlers.

use crate::context::ServerContext;
use crate::downlink::multicast;
use crate::storage::{DeviceQueueItem, MulticastQueueItem};
use crate::Error;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use lrwn::EUI64;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// API error response.
#[derive(Serialize)]
pub struct ApiError {
    pub error: String,
    pub code: u16,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self)).into_response()
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let code = match &err {
            Error::NotFound => 404,
            Error::InvalidFCnt
            | Error::InvalidMic
            | Error::MaxPayloadSize { .. }
            | Error::Validation(_) => 400,
            Error::Conflict => 409,
            _ => 500,
        };
        ApiError {
            error: err.to_string(),
            code,
        }
    }
}

fn bad_request(msg: impl Into<String>) -> ApiError {
    ApiError {
        error: msg.into(),
        code: 400,
    }
}

/// GET /api/v1/health
pub async fn health() -> StatusCode {
    StatusCode::OK
}

#[derive(Debug, Deserialize)]
pub struct CreateDeviceQueueItemRequest {
    pub f_port: u8,
    pub f_cnt: u32,
    pub confirmed: bool,
    /// Payload already encrypted under the AppSKey.
    pub frm_payload: Vec<u8>,
}

#[derive(Serialize)]
pub struct CreateDeviceQueueItemResponse {
    pub id: i64,
}

/// POST /api/v1/devices/:dev_eui/queue
pub async fn create_device_queue_item(
    State(ctx): State<Arc<ServerContext>>,
    Path(dev_eui): Path<String>,
    Json(req): Json<CreateDeviceQueueItemRequest>,
) -> Result<Json<CreateDeviceQueueItemResponse>, ApiError> {
    let dev_eui: EUI64 = dev_eui.parse().map_err(|_| bad_request("invalid dev_eui"))?;
    if req.f_port == 0 {
        return Err(bad_request("f_port must be > 0"));
    }

    let device = ctx.storage.get_device(dev_eui).map_err(ApiError::from)?;

    let mut qi = DeviceQueueItem {
        dev_eui,
        f_port: req.f_port,
        f_cnt: req.f_cnt,
        confirmed: req.confirmed,
        frm_payload: req.frm_payload,
        ..Default::default()
    };

    // Class B items carry their ping-slot emit time from enqueue
    if device.mode == crate::storage::DeviceMode::B {
        let ds = ctx.storage.get_device_session(dev_eui).map_err(ApiError::from)?;
        qi.emit_at_gps_epoch =
            Some(crate::downlink::data::next_device_ping_slot(&ds).map_err(ApiError::from)?);
    }

    ctx.storage
        .create_device_queue_item(&mut qi)
        .map_err(ApiError::from)?;
    Ok(Json(CreateDeviceQueueItemResponse { id: qi.id }))
}

/// GET /api/v1/devices/:dev_eui/queue
pub async fn get_device_queue_items(
    State(ctx): State<Arc<ServerContext>>,
    Path(dev_eui): Path<String>,
) -> Result<Json<Vec<DeviceQueueItem>>, ApiError> {
    let dev_eui: EUI64 = dev_eui.parse().map_err(|_| bad_request("invalid dev_eui"))?;
    let items = ctx
        .storage
        .get_device_queue_items(dev_eui)
        .map_err(ApiError::from)?;
    Ok(Json(items))
}

/// DELETE /api/v1/devices/:dev_eui/queue
pub async fn flush_device_queue(
    State(ctx): State<Arc<ServerContext>>,
    Path(dev_eui): Path<String>,
) -> Result<StatusCode, ApiError> {
    let dev_eui: EUI64 = dev_eui.parse().map_err(|_| bad_request("invalid dev_eui"))?;
    ctx.storage
        .flush_device_queue(dev_eui)
        .map_err(ApiError::from)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct EnqueueMulticastRequest {
    pub f_port: u8,
    pub f_cnt: u32,
    /// Payload already encrypted under the multicast application key.
    pub frm_payload: Vec<u8>,
}

#[derive(Serialize)]
pub struct EnqueueMulticastResponse {
    pub ids: Vec<i64>,
    pub f_cnt: u32,
}

/// POST /api/v1/multicast-groups/:id/queue
pub async fn enqueue_multicast_queue_item(
    State(ctx): State<Arc<ServerContext>>,
    Path(id): Path<String>,
    Json(req): Json<EnqueueMulticastRequest>,
) -> Result<Json<EnqueueMulticastResponse>, ApiError> {
    let id: Uuid = id.parse().map_err(|_| bad_request("invalid group id"))?;

    let ids = multicast::enqueue_queue_item(
        &ctx,
        MulticastQueueItem {
            multicast_group_id: id,
            f_port: req.f_port,
            f_cnt: req.f_cnt,
            frm_payload: req.frm_payload,
            ..Default::default()
        },
    )
    .map_err(ApiError::from)?;

    Ok(Json(EnqueueMulticastResponse {
        ids,
        f_cnt: req.f_cnt,
    }))
}

/// GET /api/v1/gateways/:gateway_id
pub async fn get_gateway(
    State(ctx): State<Arc<ServerContext>>,
    Path(gateway_id): Path<String>,
) -> Result<Json<crate::storage::Gateway>, ApiError> {
    let gateway_id: EUI64 = gateway_id
        .parse()
        .map_err(|_| bad_request("invalid gateway_id"))?;
    let gw = ctx.storage.get_gateway(gateway_id).map_err(ApiError::from)?;
    Ok(Json(gw))
}
