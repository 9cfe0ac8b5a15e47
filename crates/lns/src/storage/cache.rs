// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! In-process hot cache with per-key TTLs.
//!
//! Byte values and byte sets, with the atomic operation pairs the uplink
//! pipeline depends on: add+expire on insert, read+delete on collect, and
//! set-if-absent for single-winner locks. Expiry is checked lazily on
//! access; a periodic sweep drops whatever was never touched again.

use dashmap::DashMap;
use std::collections::BTreeSet;
use std::time::{Duration, Instant};

#[derive(Debug)]
struct ValueEntry {
    data: Vec<u8>,
    expires_at: Instant,
}

#[derive(Debug)]
struct SetEntry {
    members: BTreeSet<Vec<u8>>,
    expires_at: Instant,
}

/// Key/value + set store. Runtime state only; nothing survives a restart.
#[derive(Debug, Default)]
pub struct Cache {
    values: DashMap<String, ValueEntry>,
    sets: DashMap<String, SetEntry>,
}

impl Cache {
    pub fn new() -> Self {
        Cache::default()
    }

    /// Store `data` under `key`, replacing any previous value.
    pub fn set(&self, key: &str, data: Vec<u8>, ttl: Duration) {
        self.values.insert(
            key.to_string(),
            ValueEntry {
                data,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    /// Store only when the key is absent (or expired). Returns whether the
    /// write happened; the single-winner dedup lock builds on this.
    pub fn set_nx(&self, key: &str, data: Vec<u8>, ttl: Duration) -> bool {
        let now = Instant::now();
        match self.values.entry(key.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(mut occupied) => {
                if occupied.get().expires_at > now {
                    return false;
                }
                occupied.insert(ValueEntry {
                    data,
                    expires_at: now + ttl,
                });
                true
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(ValueEntry {
                    data,
                    expires_at: now + ttl,
                });
                true
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        let entry = self.values.get(key)?;
        if entry.expires_at <= Instant::now() {
            drop(entry);
            self.values.remove(key);
            return None;
        }
        Some(entry.data.clone())
    }

    pub fn del(&self, key: &str) {
        self.values.remove(key);
    }

    /// Add `member` to the set at `key` and refresh the set TTL, as one
    /// operation (SADD + PEXPIRE pipeline).
    pub fn sadd_expire(&self, key: &str, member: Vec<u8>, ttl: Duration) {
        let now = Instant::now();
        let mut entry = self.sets.entry(key.to_string()).or_insert_with(|| SetEntry {
            members: BTreeSet::new(),
            expires_at: now + ttl,
        });
        if entry.expires_at <= now {
            entry.members.clear();
        }
        entry.members.insert(member);
        entry.expires_at = now + ttl;
    }

    /// Read all members and delete the set, as one operation (SMEMBERS +
    /// DEL pipeline). An expired or absent set yields an empty vector.
    pub fn smembers_del(&self, key: &str) -> Vec<Vec<u8>> {
        match self.sets.remove(key) {
            Some((_, entry)) if entry.expires_at > Instant::now() => {
                entry.members.into_iter().collect()
            }
            _ => Vec::new(),
        }
    }

    /// Non-destructive set read (membership indexes).
    pub fn smembers(&self, key: &str) -> Vec<Vec<u8>> {
        match self.sets.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => {
                entry.members.iter().cloned().collect()
            }
            _ => Vec::new(),
        }
    }

    /// Drop expired entries. Called from the sweeper task.
    pub fn sweep(&self) {
        let now = Instant::now();
        self.values.retain(|_, e| e.expires_at > now);
        self.sets.retain(|_, e| e.expires_at > now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn test_set_get_del() {
        let c = Cache::new();
        c.set("k", vec![1, 2, 3], Duration::from_secs(60));
        assert_eq!(c.get("k"), Some(vec![1, 2, 3]));
        c.del("k");
        assert_eq!(c.get("k"), None);
    }

    #[test]
    fn test_value_expires() {
        let c = Cache::new();
        c.set("k", vec![1], Duration::from_millis(10));
        sleep(Duration::from_millis(25));
        assert_eq!(c.get("k"), None);
    }

    #[test]
    fn test_set_nx_single_winner() {
        let c = Cache::new();
        assert!(c.set_nx("lock", b"a".to_vec(), Duration::from_secs(60)));
        assert!(!c.set_nx("lock", b"b".to_vec(), Duration::from_secs(60)));
        assert_eq!(c.get("lock"), Some(b"a".to_vec()));
    }

    #[test]
    fn test_set_nx_wins_after_expiry() {
        let c = Cache::new();
        assert!(c.set_nx("lock", b"a".to_vec(), Duration::from_millis(10)));
        sleep(Duration::from_millis(25));
        assert!(c.set_nx("lock", b"b".to_vec(), Duration::from_secs(60)));
    }

    #[test]
    fn test_sadd_is_a_set() {
        let c = Cache::new();
        let ttl = Duration::from_secs(60);
        c.sadd_expire("s", vec![1], ttl);
        c.sadd_expire("s", vec![1], ttl);
        c.sadd_expire("s", vec![2], ttl);
        assert_eq!(c.smembers("s").len(), 2);
    }

    #[test]
    fn test_smembers_del_reads_once() {
        let c = Cache::new();
        let ttl = Duration::from_secs(60);
        c.sadd_expire("s", vec![1], ttl);
        c.sadd_expire("s", vec![2], ttl);

        let members = c.smembers_del("s");
        assert_eq!(members.len(), 2);
        assert!(c.smembers_del("s").is_empty());
    }

    #[test]
    fn test_sweep_drops_expired_only() {
        let c = Cache::new();
        c.set("short", vec![1], Duration::from_millis(5));
        c.set("long", vec![2], Duration::from_secs(60));
        sleep(Duration::from_millis(20));
        c.sweep();
        assert_eq!(c.get("long"), Some(vec![2]));
        assert!(!c.values.contains_key("short"));
    }
}
