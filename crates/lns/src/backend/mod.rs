// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Contracts to the application server and join server.
//!
//! Both are narrow sync traits so the core stays testable without network
//! plumbing; real RPC clients implement them in the composition root, and
//! the mock implementations here back the test suites.

pub mod applicationserver;
pub mod http;
pub mod joinserver;

pub use applicationserver::{
    ApplicationServer, DownlinkAckRequest, GatewayStatsRequest, MockApplicationServer,
    ProprietaryUpRequest, UplinkDataRequest,
};
pub use joinserver::{JoinAnswer, JoinRequest, JoinServer, KeyEnvelope, MockJoinServer};
