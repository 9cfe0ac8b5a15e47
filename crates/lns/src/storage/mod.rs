// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! State stores.
//!
//! The relational store (SQLite) owns the catalog: profiles, devices,
//! gateways, multicast groups and both downlink queues. The hot cache owns
//! runtime state: device sessions, dedup sets, RX-info sets and MAC-command
//! blocks. Cache keys follow the `lora:ns:...` templates so operational
//! tooling can find them.

pub mod cache;
pub mod db;
pub mod device;
pub mod device_gateway;
pub mod device_profile;
pub mod device_queue;
pub mod device_session;
pub mod gateway;
pub mod mac_command;
pub mod multicast;
pub mod routing_profile;
pub mod service_profile;

pub use cache::Cache;
pub use db::Db;
pub use device::{Device, DeviceMode};
pub use device_gateway::{DeviceGatewayRxInfo, DeviceGatewayRxInfoSet};
pub use device_profile::DeviceProfile;
pub use device_queue::DeviceQueueItem;
pub use device_session::DeviceSession;
pub use gateway::{ExtraChannel, Gateway, GatewayProfile};
pub use mac_command::MacCommandBlock;
pub use multicast::{MulticastGroup, MulticastGroupType, MulticastQueueItem};
pub use routing_profile::RoutingProfile;
pub use service_profile::ServiceProfile;

use crate::Result;
use std::sync::Arc;
use std::time::Duration;

/// Catalog + cache bundle handed to every subsystem.
pub struct Storage {
    db: Db,
    cache: Cache,
    session_ttl: Duration,
}

impl Storage {
    pub fn open(path: &str, session_ttl: Duration) -> Result<Self> {
        Ok(Storage {
            db: Db::open(path)?,
            cache: Cache::new(),
            session_ttl,
        })
    }

    /// In-memory stores for tests.
    pub fn open_in_memory(session_ttl: Duration) -> Result<Self> {
        Ok(Storage {
            db: Db::open_in_memory()?,
            cache: Cache::new(),
            session_ttl,
        })
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    /// TTL shared by device sessions and everything keyed alongside them.
    pub fn session_ttl(&self) -> Duration {
        self.session_ttl
    }

    /// Periodic expiry sweep for the cache.
    pub fn spawn_cache_sweeper(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let storage = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                storage.cache.sweep();
            }
        })
    }
}

// Cache key templates; keep in sync with operational tooling.

pub(crate) fn device_session_key(dev_eui: lrwn::EUI64) -> String {
    format!("lora:ns:device:session:{dev_eui}")
}

pub(crate) fn dev_addr_key(dev_addr: lrwn::DevAddr) -> String {
    format!("lora:ns:devaddr:{dev_addr}")
}

pub(crate) fn device_profile_key(id: uuid::Uuid) -> String {
    format!("lora:ns:dp:{id}")
}

pub(crate) fn device_gateway_rx_info_key(dev_eui: lrwn::EUI64) -> String {
    format!("lora:ns:device:gw:rx:{dev_eui}")
}

pub(crate) fn pending_mac_command_key(dev_eui: lrwn::EUI64, cid: lrwn::Cid) -> String {
    format!("lora:ns:device:{dev_eui}:pending:{:#04x}", cid.byte())
}

pub(crate) fn mac_command_queue_key(dev_eui: lrwn::EUI64) -> String {
    format!("lora:ns:device:{dev_eui}:mac:queue")
}

pub(crate) fn device_downlink_lock_key(dev_eui: lrwn::EUI64) -> String {
    format!("lora:ns:device:{dev_eui}:down:lock")
}
