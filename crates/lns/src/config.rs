// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Server configuration.
//!
//! Loaded from a TOML file by the binary; every field has a default so a
//! minimal deployment runs with an empty file.

use lrwn::AES128Key;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub network: NetworkConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// KEK label -> key, used to unwrap join-server key envelopes.
    #[serde(default)]
    pub keks: HashMap<String, AES128Key>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Region served by this instance.
    #[serde(default = "default_band")]
    pub band: String,

    /// Uplink deduplication window.
    #[serde(default = "default_dedup_delay_ms")]
    pub deduplication_delay_ms: u64,

    /// TTL for device sessions and everything aligned to them.
    #[serde(default = "default_session_ttl_secs")]
    pub device_session_ttl_secs: u64,

    /// RX1 delay in seconds announced to devices.
    #[serde(default = "default_rx1_delay")]
    pub rx1_delay: u8,

    /// Window within which a forward FCnt jump is accepted.
    #[serde(default = "default_fcnt_tolerance")]
    pub fcnt_wrap_tolerance: u32,

    /// Pending MAC-command blocks are dropped after this many failed
    /// acknowledgements.
    #[serde(default = "default_mac_error_threshold")]
    pub mac_command_error_threshold: u32,

    /// Out-of-band uplink channels installed on devices via NewChannelReq,
    /// indexed after the band's required channels.
    #[serde(default)]
    pub extra_channels: Vec<ExtraChannelConfig>,

    /// Max NewChannelReq commands per downlink; the rest goes out in
    /// later batches.
    #[serde(default = "default_max_new_channels")]
    pub max_new_channels_per_downlink: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtraChannelConfig {
    pub frequency: u32,
    #[serde(default)]
    pub min_dr: u8,
    #[serde(default = "default_extra_max_dr")]
    pub max_dr: u8,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            band: default_band(),
            deduplication_delay_ms: default_dedup_delay_ms(),
            device_session_ttl_secs: default_session_ttl_secs(),
            rx1_delay: default_rx1_delay(),
            fcnt_wrap_tolerance: default_fcnt_tolerance(),
            mac_command_error_threshold: default_mac_error_threshold(),
            extra_channels: Vec::new(),
            max_new_channels_per_downlink: default_max_new_channels(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Interval between scheduler passes.
    #[serde(default = "default_scheduler_interval_ms")]
    pub interval_ms: u64,

    /// Max queue items handled per pass.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Class C transmissions to the same gateway are spaced by this much.
    #[serde(default = "default_class_c_lock_ms")]
    pub class_c_device_downlink_lock_duration_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            interval_ms: default_scheduler_interval_ms(),
            batch_size: default_batch_size(),
            class_c_device_downlink_lock_duration_ms: default_class_c_lock_ms(),
        }
    }
}

fn default_band() -> String {
    "EU868".to_string()
}

fn default_dedup_delay_ms() -> u64 {
    200
}

fn default_session_ttl_secs() -> u64 {
    // two lifetimes of a monthly-reporting device
    60 * 60 * 24 * 31 * 2
}

fn default_rx1_delay() -> u8 {
    1
}

fn default_fcnt_tolerance() -> u32 {
    16_384
}

fn default_mac_error_threshold() -> u32 {
    3
}

fn default_max_new_channels() -> usize {
    3
}

fn default_extra_max_dr() -> u8 {
    5
}

fn default_scheduler_interval_ms() -> u64 {
    1_000
}

fn default_batch_size() -> usize {
    100
}

fn default_class_c_lock_ms() -> u64 {
    2_000
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scheduler.batch_size == 0 {
            return Err(ConfigError::Invalid("scheduler.batch_size must be > 0".into()));
        }
        if self.network.rx1_delay == 0 || self.network.rx1_delay > 15 {
            return Err(ConfigError::Invalid(
                "network.rx1_delay must be in 1..=15".into(),
            ));
        }
        Ok(())
    }

    pub fn deduplication_delay(&self) -> Duration {
        Duration::from_millis(self.network.deduplication_delay_ms)
    }

    pub fn device_session_ttl(&self) -> Duration {
        Duration::from_secs(self.network.device_session_ttl_secs)
    }

    pub fn scheduler_interval(&self) -> Duration {
        Duration::from_millis(self.scheduler.interval_ms)
    }

    pub fn class_c_downlink_lock(&self) -> Duration {
        Duration::from_millis(self.scheduler.class_c_device_downlink_lock_duration_ms)
    }
}
