// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! HTTP implementations of the application-server and join-server
//! contracts.
//!
//! JSON-over-HTTP keeps the transport swappable; the trait calls run on
//! blocking clients inside `block_in_place` because the callers sit on
//! the multi-threaded runtime.

use super::applicationserver::{
    ApplicationServer, DownlinkAckRequest, GatewayStatsRequest, ProprietaryUpRequest,
    UplinkDataRequest,
};
use super::joinserver::{JoinAnswer, JoinRequest, JoinServer};
use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

fn post_json<T: Serialize, R: DeserializeOwned>(
    client: &reqwest::blocking::Client,
    url: &str,
    body: &T,
    err: impl Fn(String) -> Error,
) -> Result<R> {
    tokio::task::block_in_place(|| {
        let resp = client
            .post(url)
            .json(body)
            .send()
            .map_err(|e| err(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(err(format!("{} returned {}", url, resp.status())));
        }
        resp.json().map_err(|e| err(e.to_string()))
    })
}

pub struct HttpApplicationServer {
    base_url: String,
    client: reqwest::blocking::Client,
}

impl HttpApplicationServer {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        Ok(HttpApplicationServer {
            base_url: base_url.into(),
            client: reqwest::blocking::Client::builder()
                .timeout(Duration::from_secs(5))
                .build()
                .map_err(|e| Error::ApplicationServer(e.to_string()))?,
        })
    }

    fn post<T: Serialize>(&self, path: &str, body: &T) -> Result<()> {
        let url = format!("{}{}", self.base_url, path);
        let _: serde_json::Value =
            post_json(&self.client, &url, body, Error::ApplicationServer)?;
        Ok(())
    }
}

impl ApplicationServer for HttpApplicationServer {
    fn handle_uplink_data(&self, req: UplinkDataRequest) -> Result<()> {
        self.post("/api/v1/uplink-data", &req)
    }

    fn handle_downlink_ack(&self, req: DownlinkAckRequest) -> Result<()> {
        self.post("/api/v1/downlink-ack", &req)
    }

    fn handle_gateway_stats(&self, req: GatewayStatsRequest) -> Result<()> {
        self.post("/api/v1/gateway-stats", &req)
    }

    fn handle_proprietary_up(&self, req: ProprietaryUpRequest) -> Result<()> {
        self.post("/api/v1/proprietary-up", &req)
    }
}

pub struct HttpJoinServer {
    base_url: String,
    client: reqwest::blocking::Client,
}

impl HttpJoinServer {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        Ok(HttpJoinServer {
            base_url: base_url.into(),
            client: reqwest::blocking::Client::builder()
                .timeout(Duration::from_secs(5))
                .build()
                .map_err(|e| Error::JoinServer(e.to_string()))?,
        })
    }
}

impl JoinServer for HttpJoinServer {
    fn join_req(&self, req: JoinRequest) -> Result<JoinAnswer> {
        let url = format!("{}/join-req", self.base_url);
        post_json(&self.client, &url, &req, Error::JoinServer)
    }

    fn rejoin_req(&self, req: JoinRequest) -> Result<JoinAnswer> {
        let url = format!("{}/rejoin-req", self.base_url);
        post_json(&self.client, &url, &req, Error::JoinServer)
    }
}
