// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! TCP bridge to the gateway bus.
//!
//! Bus adapters (MQTT, concentratord, simulators) connect over TCP and
//! exchange newline-delimited JSON envelopes. Inbound uplink frames and
//! stats fan into the event channel; outbound downlink frames and gateway
//! configurations broadcast to every connected adapter, which filters by
//! gateway id.

use super::{DownlinkFrame, GatewayBackend, GatewayConfiguration, GatewayEvent, GatewayStats, UplinkFrame};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

/// Wire envelope on the bridge connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BusMessage {
    UplinkFrame(UplinkFrame),
    GatewayStats(GatewayStats),
    DownlinkFrame(DownlinkFrame),
    GatewayConfiguration(GatewayConfiguration),
}

/// Outbound half of the bridge; cheap to clone into the context.
pub struct TcpGatewayBackend {
    outbound: broadcast::Sender<String>,
}

impl TcpGatewayBackend {
    pub fn new() -> Self {
        let (outbound, _) = broadcast::channel(1024);
        TcpGatewayBackend { outbound }
    }

    fn send(&self, msg: &BusMessage) -> Result<()> {
        let line = serde_json::to_string(msg)?;
        self.outbound
            .send(line)
            .map_err(|_| Error::GatewayBackend("no gateway bridge connected".into()))?;
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<String> {
        self.outbound.subscribe()
    }
}

impl Default for TcpGatewayBackend {
    fn default() -> Self {
        TcpGatewayBackend::new()
    }
}

impl GatewayBackend for TcpGatewayBackend {
    fn send_downlink_frame(&self, frame: DownlinkFrame) -> Result<()> {
        self.send(&BusMessage::DownlinkFrame(frame))
    }

    fn send_gateway_configuration(&self, config: GatewayConfiguration) -> Result<()> {
        self.send(&BusMessage::GatewayConfiguration(config))
    }
}

/// Accept bridge connections until the process exits.
pub async fn serve(
    bind: SocketAddr,
    backend: std::sync::Arc<TcpGatewayBackend>,
    events: mpsc::Sender<GatewayEvent>,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(bind).await?;
    info!(bind = %bind, "gateway bridge listening");

    loop {
        let (stream, peer) = listener.accept().await?;
        info!(peer = %peer, "gateway bridge connected");

        let outbound = backend.subscribe();
        let events = events.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, outbound, events).await {
                warn!(peer = %peer, error = %e, "gateway bridge connection closed");
            }
        });
    }
}

async fn handle_connection(
    stream: TcpStream,
    mut outbound: broadcast::Receiver<String>,
    events: mpsc::Sender<GatewayEvent>,
) -> anyhow::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    return Ok(());
                };
                match serde_json::from_str::<BusMessage>(&line) {
                    Ok(BusMessage::UplinkFrame(frame)) => {
                        events.send(GatewayEvent::Uplink(frame)).await?;
                    }
                    Ok(BusMessage::GatewayStats(stats)) => {
                        events.send(GatewayEvent::Stats(stats)).await?;
                    }
                    Ok(other) => {
                        debug!(message = ?other, "outbound-only message from bridge, ignored");
                    }
                    Err(e) => {
                        warn!(error = %e, "malformed bus message, ignored");
                    }
                }
            }
            msg = outbound.recv() => {
                match msg {
                    Ok(line) => {
                        write_half.write_all(line.as_bytes()).await?;
                        write_half.write_all(b"\n").await?;
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(dropped = n, "bridge connection lagging, downlinks dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => return Ok(()),
                }
            }
        }
    }
}
