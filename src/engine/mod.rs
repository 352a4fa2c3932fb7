//! Ban Engine: the component everything else in this crate is built
//! around. Owns the Ledger+Index pair behind one `parking_lot::RwLock`
//! (readers take a shared guard, writers an exclusive one, and the lock
//! is never held across an `.await`), consults the two persistent
//! override lists through the database pool, and exposes the public
//! contract the three adapters and the admin API call through.

pub mod address;
pub mod ledger;
pub mod trie;

use crate::config::BanConfig;
use crate::db::Database;
use crate::error::BanEngineError;
use ledger::LedgerEntry;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

/// The Ledger (map) and Prefix Index together, guarded by one lock:
/// they form one shared structure, mutated together under a single
/// critical section rather than two independently-locked pieces.
struct BanState {
    ledger: HashMap<String, LedgerEntry>,
    index: trie::PrefixIndex,
}

impl BanState {
    fn new() -> Self {
        Self {
            ledger: HashMap::new(),
            index: trie::PrefixIndex::new(),
        }
    }
}

/// Snapshot returned by `radix_stats`.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct RadixStats {
    pub total_ips_tracked: usize,
    pub currently_banned: usize,
    pub tree_nodes: usize,
}

/// The Ban Engine. Cheap to clone: the shared state is behind an `Arc`.
#[derive(Clone)]
pub struct BanEngine {
    state: Arc<RwLock<BanState>>,
    db: Database,
    config: BanConfig,
}

impl BanEngine {
    pub fn new(db: Database, config: BanConfig) -> Self {
        Self {
            state: Arc::new(RwLock::new(BanState::new())),
            db,
            config,
        }
    }

    /// Record one violation for `addr_text`, extracted by the pattern
    /// matcher from a log line. Applies a ban if the in-window violation
    /// count now meets `max_attempts` and the address is not already
    /// banned.
    pub async fn record_violation(
        &self,
        addr_text: &str,
        severity: u8,
        description: String,
    ) -> Result<(), BanEngineError> {
        let addr = address::parse_address(addr_text)
            .ok_or_else(|| BanEngineError::InvalidAddress(addr_text.to_string()))?;
        let key = address::canonical(&addr);
        let octets = address::to_octets(&addr);
        let now = SystemTime::now();

        let mut state = self.state.write();
        let entry = state
            .ledger
            .entry(key.clone())
            .or_insert_with(|| LedgerEntry::new(now));
        entry.record(now, severity, description, self.config.time_window);

        let surviving = entry.violations.len() as u32;
        let already_banned = entry.is_banned(now);

        if surviving >= self.config.max_attempts && !already_banned {
            apply_ban(entry, &mut state.index, &key, &octets, now, &self.config);
            let ban_count = entry.ban_count;
            info!(addr = %key, ban_count, "ban applied via violation threshold");
        }

        Ok(())
    }

    /// Ordered membership check: whitelist, then blacklist, then
    /// ledger/index, self-healing a stale index entry if it finds one.
    pub async fn is_banned(&self, addr_text: &str) -> Result<bool, BanEngineError> {
        let addr = address::parse_address(addr_text)
            .ok_or_else(|| BanEngineError::InvalidAddress(addr_text.to_string()))?;
        let key = address::canonical(&addr);
        let octets = address::to_octets(&addr);

        if self.db.whitelist().contains(&key).await? {
            return Ok(false);
        }
        if self.db.blacklist().contains(&key).await? {
            return Ok(true);
        }

        let now = SystemTime::now();
        let exists = {
            let state = self.state.read();
            state.ledger.contains_key(&key)
        };
        if !exists {
            return Ok(false);
        }

        let ban_expiry = {
            let state = self.state.read();
            state.ledger.get(&key).map(|e| e.ban_expiry)
        };
        let Some(ban_expiry) = ban_expiry else {
            return Ok(false);
        };

        if ban_expiry > now {
            let banned = {
                let state = self.state.read();
                state.index.search(&octets)
            };
            if banned {
                return Ok(true);
            }
            let mut state = self.state.write();
            state.index.delete(&octets);
            return Ok(false);
        }

        let mut state = self.state.write();
        state.index.delete(&octets);
        Ok(false)
    }

    /// Admin-initiated ban, bypassing the violation threshold.
    pub async fn manual_ban(&self, addr_text: &str, duration: Duration) -> Result<(), BanEngineError> {
        if duration.is_zero() {
            return Err(BanEngineError::InvalidDuration(duration));
        }
        let addr = address::parse_address(addr_text)
            .ok_or_else(|| BanEngineError::InvalidAddress(addr_text.to_string()))?;
        let key = address::canonical(&addr);
        let octets = address::to_octets(&addr);
        let now = SystemTime::now();

        let mut state = self.state.write();
        let entry = state
            .ledger
            .entry(key.clone())
            .or_insert_with(|| LedgerEntry::new(now));
        entry.ban_count += 1;
        entry.ban_expiry = now + duration;
        state.index.insert(&octets, &key);

        Ok(())
    }

    /// Clear a ban: drop the index terminal, zero the ledger expiry, and
    /// remove the address from the persistent blacklist if it's there.
    /// Does not touch the whitelist: a manual unban is about the ban
    /// state, not about whatever override lists say independently.
    pub async fn manual_unban(&self, addr_text: &str) -> Result<(), BanEngineError> {
        let addr = address::parse_address(addr_text)
            .ok_or_else(|| BanEngineError::InvalidAddress(addr_text.to_string()))?;
        let key = address::canonical(&addr);
        let octets = address::to_octets(&addr);

        {
            let mut state = self.state.write();
            state.index.delete(&octets);
            if let Some(entry) = state.ledger.get_mut(&key) {
                entry.ban_expiry = UNIX_EPOCH;
            }
        }

        self.db.blacklist().remove(&key).await?;
        Ok(())
    }

    /// Clear every currently active temporary ban. Returns the count
    /// cleared.
    pub fn purge_all_temporary_bans(&self) -> usize {
        let mut state = self.state.write();
        let mut purged = 0;
        let keys: Vec<String> = state
            .ledger
            .iter()
            .filter(|(_, e)| e.ban_expiry != UNIX_EPOCH)
            .map(|(k, _)| k.clone())
            .collect();
        for key in keys {
            if let Some(octets) = octets_for_key(&key) {
                state.index.delete(&octets);
            }
            if let Some(entry) = state.ledger.get_mut(&key) {
                entry.ban_expiry = UNIX_EPOCH;
                purged += 1;
            }
        }
        purged
    }

    /// Clear only bans that have actually expired. Run periodically by
    /// the cleanup task alongside `sweep_memory`.
    pub fn purge_expired(&self) {
        let now = SystemTime::now();
        let mut state = self.state.write();
        let keys: Vec<String> = state
            .ledger
            .iter()
            .filter(|(_, e)| e.ban_expiry != UNIX_EPOCH && e.ban_expiry < now)
            .map(|(k, _)| k.clone())
            .collect();
        for key in keys {
            if let Some(octets) = octets_for_key(&key) {
                state.index.delete(&octets);
            }
            if let Some(entry) = state.ledger.get_mut(&key) {
                entry.ban_expiry = UNIX_EPOCH;
            }
        }
    }

    /// Evict ledger entries that have been untouched for `max_memory_ttl`
    /// and are not currently banned.
    pub fn sweep_memory(&self) {
        let now = SystemTime::now();
        let ttl = self.config.max_memory_ttl;
        let mut state = self.state.write();
        let stale: Vec<String> = state
            .ledger
            .iter()
            .filter(|(_, e)| {
                let not_banned = e.ban_expiry == UNIX_EPOCH || e.ban_expiry <= now;
                let stale_enough = now.duration_since(e.last_seen).unwrap_or(Duration::ZERO) >= ttl;
                not_banned && stale_enough
            })
            .map(|(k, _)| k.clone())
            .collect();
        for key in &stale {
            if let Some(octets) = octets_for_key(key) {
                state.index.delete(&octets);
            }
            state.ledger.remove(key);
        }
        if !stale.is_empty() {
            debug!(count = stale.len(), "swept stale ledger entries");
        }
    }

    /// Snapshot of every address with an active ban.
    pub fn list_currently_banned(&self) -> HashMap<String, SystemTime> {
        let now = SystemTime::now();
        let state = self.state.read();
        state
            .ledger
            .iter()
            .filter(|(_, e)| e.ban_expiry > now)
            .map(|(k, e)| (k.clone(), e.ban_expiry))
            .collect()
    }

    /// Snapshot of ledger and index size for the admin stats endpoint.
    pub fn radix_stats(&self) -> RadixStats {
        let now = SystemTime::now();
        let state = self.state.read();
        RadixStats {
            total_ips_tracked: state.ledger.len(),
            currently_banned: state.ledger.values().filter(|e| e.ban_expiry > now).count(),
            tree_nodes: state.index.node_count(),
        }
    }

    /// Access to the database handle, for the admin API's list endpoints.
    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn config(&self) -> &BanConfig {
        &self.config
    }
}

/// Re-derive octets from a canonical address string. Ledger keys are
/// always produced by `address::canonical`, so this always parses.
fn octets_for_key(key: &str) -> Option<Vec<u8>> {
    key.parse::<IpAddr>().ok().map(|a| address::to_octets(&a))
}

/// Apply the escalation curve:
/// `duration = min(initial_ban_time * escalation_factor.powi(ban_count - 1), max_ban_time)`.
/// Exercised by `escalation_grows_and_caps_at_max` below.
fn apply_ban(
    entry: &mut LedgerEntry,
    index: &mut trie::PrefixIndex,
    key: &str,
    octets: &[u8],
    now: SystemTime,
    config: &BanConfig,
) {
    entry.ban_count += 1;
    let exponent = (entry.ban_count.saturating_sub(1)) as i32;
    let multiplier = config.escalation_factor.powi(exponent);
    let scaled_secs = config.initial_ban_time.as_secs_f64() * multiplier;
    let capped_secs = scaled_secs.min(config.max_ban_time.as_secs_f64());
    let duration = Duration::from_secs_f64(capped_secs.max(0.0));
    entry.ban_expiry = now + duration;
    index.insert(octets, key);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    async fn engine() -> BanEngine {
        let db = Database::new(":memory:").await.unwrap();
        BanEngine::new(db, BanConfig::default())
    }

    #[tokio::test]
    async fn threshold_crossing_applies_first_ban() {
        let engine = engine().await;
        for _ in 0..3 {
            engine
                .record_violation("192.168.1.200", 4, "auth failed".into())
                .await
                .unwrap();
        }
        assert!(engine.is_banned("192.168.1.200").await.unwrap());
        let stats = engine.radix_stats();
        assert_eq!(stats.currently_banned, 1);
    }

    #[tokio::test]
    async fn below_threshold_is_not_banned() {
        let engine = engine().await;
        engine
            .record_violation("192.168.1.201", 4, "auth failed".into())
            .await
            .unwrap();
        assert!(!engine.is_banned("192.168.1.201").await.unwrap());
    }

    #[tokio::test]
    async fn whitelist_overrides_violations() {
        let engine = engine().await;
        engine.db().whitelist().add("10.0.0.1", None, None).await.unwrap();
        for _ in 0..5 {
            engine
                .record_violation("10.0.0.1", 6, "brute force".into())
                .await
                .unwrap();
        }
        assert!(!engine.is_banned("10.0.0.1").await.unwrap());
    }

    #[tokio::test]
    async fn blacklist_forces_deny_without_ledger_entry() {
        let engine = engine().await;
        engine.db().blacklist().add("10.0.0.2", Some("known bad"), None).await.unwrap();
        assert!(engine.is_banned("10.0.0.2").await.unwrap());
    }

    #[tokio::test]
    async fn manual_unban_clears_ban_but_not_whitelist_semantics() {
        let engine = engine().await;
        engine.manual_ban("10.0.0.3", Duration::from_secs(60)).await.unwrap();
        assert!(engine.is_banned("10.0.0.3").await.unwrap());
        engine.manual_unban("10.0.0.3").await.unwrap();
        assert!(!engine.is_banned("10.0.0.3").await.unwrap());
    }

    #[tokio::test]
    async fn purge_expired_clears_stale_bans_only() {
        let engine = engine().await;
        engine.manual_ban("10.0.0.4", Duration::from_secs(3600)).await.unwrap();
        {
            let mut state = engine.state.write();
            let entry = state.ledger.get_mut("10.0.0.4").unwrap();
            entry.ban_expiry = SystemTime::now() - Duration::from_secs(1);
        }
        engine.purge_expired();
        assert!(!engine.is_banned("10.0.0.4").await.unwrap());
    }

    #[tokio::test]
    async fn sweep_memory_evicts_stale_unbanned_entries() {
        let mut config = BanConfig::default();
        config.max_memory_ttl = Duration::from_millis(1);
        let db = Database::new(":memory:").await.unwrap();
        let engine = BanEngine::new(db, config);
        engine
            .record_violation("172.16.5.5", 2, "light".into())
            .await
            .unwrap();
        std::thread::sleep(Duration::from_millis(5));
        engine.sweep_memory();
        let stats = engine.radix_stats();
        assert_eq!(stats.total_ips_tracked, 0);
    }

    #[tokio::test]
    async fn escalation_grows_and_caps_at_max() {
        let mut config = BanConfig::default();
        config.initial_ban_time = Duration::from_secs(300);
        config.max_ban_time = Duration::from_secs(600);
        config.escalation_factor = 2.0;
        config.max_attempts = 1;
        config.time_window = Duration::from_secs(600);
        let db = Database::new(":memory:").await.unwrap();
        let engine = BanEngine::new(db, config);

        engine.record_violation("10.0.0.9", 4, "one".into()).await.unwrap();
        let first_expiry = {
            let state = engine.state.read();
            state.ledger.get("10.0.0.9").unwrap().ban_expiry
        };

        {
            let mut state = engine.state.write();
            let entry = state.ledger.get_mut("10.0.0.9").unwrap();
            entry.ban_expiry = UNIX_EPOCH;
        }
        engine.record_violation("10.0.0.9", 4, "two".into()).await.unwrap();
        let second_expiry = {
            let state = engine.state.read();
            state.ledger.get("10.0.0.9").unwrap().ban_expiry
        };

        assert!(second_expiry > first_expiry);
        let stats_state = engine.state.read();
        let entry = stats_state.ledger.get("10.0.0.9").unwrap();
        assert_eq!(entry.ban_count, 2);
        // capped at max_ban_time (600s) from a would-be 300*2=600s second ban
        assert!(entry.ban_expiry <= SystemTime::now() + Duration::from_secs(601));
    }
}
