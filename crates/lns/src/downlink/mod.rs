// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Downlink assembler and scheduler.
//!
//! Class A responses are assembled inline after a valid uplink
//! ([`data::handle_class_a_response`]). Everything scheduled - Class C
//! queue items, Class B ping-slot items and multicast fan-outs - is picked
//! up by a single periodic task: one pass per `scheduler.interval_ms`,
//! at most `scheduler.batch_size` items, one failing item never aborts
//! the pass. Per-device cache locks stop two passes from double-scheduling
//! while a transmission is in flight.

pub mod data;
pub mod multicast;

use crate::context::ServerContext;
use crate::gateway::ModulationInfo;
use crate::region::DataRate;
use crate::storage::device_downlink_lock_key;
use crate::Result;
use std::sync::Arc;
use tracing::{debug, error};

/// Periodic scheduler task.
pub struct Scheduler {
    ctx: Arc<ServerContext>,
}

impl Scheduler {
    pub fn new(ctx: Arc<ServerContext>) -> Self {
        Scheduler { ctx }
    }

    /// Run forever. Ticks never overlap: a pass that outlives the interval
    /// simply delays the next one.
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.ctx.config.scheduler_interval());
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.tick();
            }
        })
    }

    /// One scheduler pass.
    pub fn tick(&self) {
        let batch = self.ctx.config.scheduler.batch_size;

        match self.ctx.storage.get_schedulable_multicast_queue_items(batch) {
            Ok(items) => {
                for qi in items {
                    if let Err(e) = multicast::schedule_queue_item(&self.ctx, &qi) {
                        error!(
                            multicast_group_id = %qi.multicast_group_id,
                            gateway_id = %qi.gateway_id,
                            error = %e,
                            "schedule multicast queue-item error"
                        );
                    }
                }
            }
            Err(e) => error!(error = %e, "get schedulable multicast queue-items error"),
        }

        match self.ctx.storage.get_schedulable_device_queue_dev_euis(batch) {
            Ok(dev_euis) => {
                for dev_eui in dev_euis {
                    // per-device lock: skip devices another pass is handling
                    if !self.ctx.storage.cache().set_nx(
                        &device_downlink_lock_key(dev_eui),
                        b"lock".to_vec(),
                        self.ctx.config.class_c_downlink_lock(),
                    ) {
                        debug!(dev_eui = %dev_eui, "device downlink locked, skipping");
                        continue;
                    }
                    if let Err(e) = data::handle_scheduled_device_queue(&self.ctx, dev_eui) {
                        error!(dev_eui = %dev_eui, error = %e, "schedule device downlink error");
                    }
                }
            }
            Err(e) => error!(error = %e, "get schedulable device queue error"),
        }
    }
}

/// Downlink modulation for a band data-rate.
pub(crate) fn modulation_for_dr(ctx: &ServerContext, dr: u8) -> Result<ModulationInfo> {
    Ok(match ctx.band.data_rate(dr)? {
        DataRate::Lora {
            bandwidth_khz,
            spreading_factor,
        } => ModulationInfo::Lora {
            bandwidth_khz,
            spreading_factor,
            code_rate: "4/5".to_string(),
        },
        DataRate::Fsk { bitrate } => ModulationInfo::Fsk { bitrate },
    })
}

/// EIRP: the band maximum, capped by the device profile when it sets one.
pub(crate) fn tx_power_dbm(ctx: &ServerContext, profile_max_eirp: i32) -> i32 {
    if profile_max_eirp > 0 {
        ctx.band.max_eirp.min(profile_max_eirp)
    } else {
        ctx.band.max_eirp
    }
}
