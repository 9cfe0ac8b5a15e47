// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Explicit collaborator bundle.
//!
//! Built once by the composition root and shared by the uplink pipeline,
//! the downlink scheduler and the API. Holding the collaborators here
//! (instead of process-wide singletons) keeps tests deterministic: every
//! test builds its own context with mock backends.

use crate::backend::{ApplicationServer, JoinServer};
use crate::config::Config;
use crate::gateway::GatewayBackend;
use crate::region::Band;
use crate::storage::Storage;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

pub struct ServerContext {
    pub config: Config,
    pub band: Band,
    pub storage: Arc<Storage>,
    pub gateway: Arc<dyn GatewayBackend>,
    pub app_server: Arc<dyn ApplicationServer>,
    pub join_server: Arc<dyn JoinServer>,

    /// Token for outbound downlink frames, echoed back in TX
    /// acknowledgements.
    downlink_id: AtomicU32,
}

impl ServerContext {
    pub fn new(
        config: Config,
        band: Band,
        storage: Arc<Storage>,
        gateway: Arc<dyn GatewayBackend>,
        app_server: Arc<dyn ApplicationServer>,
        join_server: Arc<dyn JoinServer>,
    ) -> Self {
        ServerContext {
            config,
            band,
            storage,
            gateway,
            app_server,
            join_server,
            downlink_id: AtomicU32::new(1),
        }
    }

    pub fn next_downlink_id(&self) -> u32 {
        self.downlink_id.fetch_add(1, Ordering::Relaxed)
    }
}
