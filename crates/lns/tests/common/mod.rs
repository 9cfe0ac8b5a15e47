// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Shared integration-test harness: a full server context over in-memory
//! stores and mock external backends.

#![allow(dead_code)] // each test binary uses a subset of the helpers

use lns::backend::{MockApplicationServer, MockJoinServer};
use lns::config::Config;
use lns::context::ServerContext;
use lns::gateway::MockGatewayBackend;
use lns::region;
use lns::storage::{
    Device, DeviceProfile, DeviceSession, RoutingProfile, ServiceProfile, Storage,
};
use lrwn::{AES128Key, DevAddr, EUI64};
use std::sync::Arc;
use std::time::Duration;

pub struct Harness {
    pub ctx: Arc<ServerContext>,
    pub gateway: Arc<MockGatewayBackend>,
    pub app_server: Arc<MockApplicationServer>,
    pub join_server: Arc<MockJoinServer>,
}

pub fn harness() -> Harness {
    harness_with_config(Config::default())
}

pub fn harness_with_config(config: Config) -> Harness {
    let band = region::by_name(&config.network.band).unwrap();
    let storage = Arc::new(Storage::open_in_memory(Duration::from_secs(3600)).unwrap());
    let gateway = Arc::new(MockGatewayBackend::new());
    let app_server = Arc::new(MockApplicationServer::new());
    let join_server = Arc::new(MockJoinServer::new());

    let ctx = Arc::new(ServerContext::new(
        config,
        band,
        storage,
        gateway.clone(),
        app_server.clone(),
        join_server.clone(),
    ));

    Harness {
        ctx,
        gateway,
        app_server,
        join_server,
    }
}

pub struct Fixture {
    pub device: Device,
    pub device_profile: DeviceProfile,
    pub service_profile: ServiceProfile,
}

/// One device with profiles, catalog rows and a live 1.0.2 session.
pub fn create_device(h: &Harness, dev_eui: EUI64, dev_addr: DevAddr) -> Fixture {
    let storage = &h.ctx.storage;

    let mut dp = DeviceProfile {
        mac_version: "1.0.2".into(),
        rx_delay_1: 1,
        rx_data_rate_2: 0,
        rx_freq_2: 869_525_000,
        supports_32bit_fcnt: true,
        supports_join: true,
        ..Default::default()
    };
    storage.create_device_profile(&mut dp).unwrap();

    let mut sp = ServiceProfile {
        adr: true,
        add_gw_metadata: true,
        dr_max: 5,
        ..Default::default()
    };
    storage.create_service_profile(&mut sp).unwrap();

    let mut rp = RoutingProfile::default();
    storage.create_routing_profile(&mut rp).unwrap();

    let mut device = Device {
        dev_eui,
        device_profile_id: dp.id,
        service_profile_id: sp.id,
        routing_profile_id: rp.id,
        ..Default::default()
    };
    storage.create_device(&mut device).unwrap();

    let ds = DeviceSession {
        dev_eui,
        dev_addr,
        mac_version: "1.0.2".into(),
        f_nwk_s_int_key: session_key(),
        s_nwk_s_int_key: session_key(),
        nwk_s_enc_key: session_key(),
        f_cnt_up: 10,
        nb_trans: 1,
        rx_delay: 1,
        rx2_frequency: 869_525_000,
        enabled_uplink_channels: vec![0, 1, 2],
        ..Default::default()
    };
    storage.save_device_session(&ds).unwrap();

    Fixture {
        device,
        device_profile: dp,
        service_profile: sp,
    }
}

pub fn session_key() -> AES128Key {
    AES128Key::new([1, 2, 3, 4, 5, 6, 7, 8, 1, 2, 3, 4, 5, 6, 7, 8])
}
