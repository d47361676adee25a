//! Revoked token ids
//!
//! In-memory set of `jti` values that must be refused until they would have
//! expired anyway. Entries are dropped once past their expiry.

use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Default)]
pub struct TokenDenylist {
    // jti -> exp (unix seconds)
    entries: Mutex<HashMap<String, i64>>,
}

impl TokenDenylist {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse `jti` until `expires_at`. Expired entries are purged on the way.
    pub fn revoke(&self, jti: &str, expires_at: i64) {
        let now = Utc::now().timestamp();
        let purged = self.purge_expired_at(now);
        if purged > 0 {
            debug!("Dropped {} expired revocations", purged);
        }
        if expires_at >= now {
            self.entries.lock().insert(jti.to_string(), expires_at);
        }
    }

    pub fn is_revoked(&self, jti: &str) -> bool {
        self.entries.lock().contains_key(jti)
    }

    /// Drop entries whose token has expired. Returns how many were removed.
    fn purge_expired_at(&self, now: i64) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, exp| *exp >= now);
        before - entries.len()
    }
}
