//! Violation Ledger: per-address violation history, escalation counter,
//! and current ban expiry. The map itself lives in the Ban Engine under
//! the same RW lock as the Prefix Index (the two form one shared
//! structure); this module only defines the entry shape and keeps it
//! internally consistent as violations accrue and expire.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// A single recorded violation.
#[derive(Debug, Clone)]
pub struct Violation {
    pub timestamp: SystemTime,
    pub severity: u8,
    pub description: String,
}

/// Per-address ledger entry.
#[derive(Debug, Clone)]
pub struct LedgerEntry {
    pub violations: Vec<Violation>,
    pub first_seen: SystemTime,
    pub last_seen: SystemTime,
    pub total_severity: u64,
    pub ban_count: u64,
    /// `UNIX_EPOCH` means "never banned" or "ban cleared".
    pub ban_expiry: SystemTime,
}

impl LedgerEntry {
    /// A fresh entry for an address's first violation.
    pub fn new(now: SystemTime) -> Self {
        Self {
            violations: Vec::new(),
            first_seen: now,
            last_seen: now,
            total_severity: 0,
            ban_count: 0,
            ban_expiry: UNIX_EPOCH,
        }
    }

    /// Append a violation, then drop everything older than `time_window`
    /// and recompute `total_severity` in one step.
    pub fn record(&mut self, now: SystemTime, severity: u8, description: String, time_window: Duration) {
        self.last_seen = now;
        self.violations.push(Violation {
            timestamp: now,
            severity,
            description,
        });
        self.trim_to_window(now, time_window);
    }

    /// Drop violations outside the window and recompute the severity
    /// total. Called both after recording and lazily on read, since
    /// windowed state can go stale between violations.
    pub fn trim_to_window(&mut self, now: SystemTime, time_window: Duration) {
        let cutoff = now.checked_sub(time_window).unwrap_or(UNIX_EPOCH);
        self.violations.retain(|v| v.timestamp > cutoff);
        self.total_severity = self.violations.iter().map(|v| v.severity as u64).sum();
    }

    /// True iff the ledger currently records an unexpired ban.
    pub fn is_banned(&self, now: SystemTime) -> bool {
        self.ban_expiry > now
    }

    /// True iff a ban was once applied and has lapsed but the entry is
    /// retained (the "Cooled" state).
    pub fn is_cooled(&self, now: SystemTime) -> bool {
        self.ban_expiry != UNIX_EPOCH && self.ban_expiry <= now
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_trims_old_violations_and_recomputes_severity() {
        let t0 = UNIX_EPOCH + Duration::from_secs(1_000);
        let mut entry = LedgerEntry::new(t0);
        entry.record(t0, 4, "first".into(), Duration::from_secs(600));
        let t1 = t0 + Duration::from_secs(700);
        entry.record(t1, 5, "second".into(), Duration::from_secs(600));

        assert_eq!(entry.violations.len(), 1);
        assert_eq!(entry.total_severity, 5);
    }

    #[test]
    fn fresh_entry_is_not_banned() {
        let t0 = UNIX_EPOCH + Duration::from_secs(1);
        let entry = LedgerEntry::new(t0);
        assert!(!entry.is_banned(t0));
        assert!(!entry.is_cooled(t0));
    }

    #[test]
    fn cooled_after_expiry() {
        let t0 = UNIX_EPOCH + Duration::from_secs(10);
        let mut entry = LedgerEntry::new(t0);
        entry.ban_expiry = t0 + Duration::from_secs(5);
        let t1 = t0 + Duration::from_secs(10);
        assert!(!entry.is_banned(t1));
        assert!(entry.is_cooled(t1));
    }
}
