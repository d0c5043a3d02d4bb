//! Cache entries and the tier they came from.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::store::StoreError;
use crate::key::CacheKey;

/// Cache tier, fastest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// L1: in-process bounded memory.
    Memory,
    /// L2: distributed key-value store.
    Distributed,
    /// L3: durable embedded store.
    Durable,
}

impl Tier {
    pub fn label(self) -> &'static str {
        match self {
            Tier::Memory => "L1",
            Tier::Distributed => "L2",
            Tier::Durable => "L3",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Current wall-clock time in Unix epoch milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Whole milliseconds, rounded up so a non-zero TTL never becomes 0.
fn duration_ms(d: Duration) -> i64 {
    i64::try_from(d.as_nanos().div_ceil(1_000_000)).unwrap_or(i64::MAX)
}

/// A cached value. Replaced wholesale, never mutated in place.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub value: Vec<u8>,
    /// Symbol the entry belongs to, for symbol-scoped invalidation.
    pub scope: Option<String>,
    pub created_at: i64,
    pub expires_at: i64,
    pub tier_of_origin: Tier,
}

impl CacheEntry {
    pub fn new(
        key: CacheKey,
        value: Vec<u8>,
        scope: Option<String>,
        now: i64,
        ttl: Duration,
    ) -> Self {
        Self {
            key,
            value,
            scope,
            created_at: now,
            expires_at: now.saturating_add(duration_ms(ttl)),
            tier_of_origin: Tier::Memory,
        }
    }

    pub fn is_expired_at(&self, now: i64) -> bool {
        self.expires_at <= now
    }

    /// Time left before expiry, `None` once expired.
    pub fn remaining_ttl(&self, now: i64) -> Option<Duration> {
        let left = self.expires_at - now;
        (left > 0).then(|| Duration::from_millis(left as u64))
    }

    /// Clamp the expiry so the entry lives at most `max_ttl` from `now`.
    /// Never extends an entry's life.
    pub fn clamp_ttl(&mut self, now: i64, max_ttl: Option<Duration>) {
        if let Some(max_ttl) = max_ttl {
            self.expires_at = self.expires_at.min(now.saturating_add(duration_ms(max_ttl)));
        }
    }

    pub fn with_origin(mut self, tier: Tier) -> Self {
        self.tier_of_origin = tier;
        self
    }

    /// Serialize into one self-describing blob: a little-endian `u32` header
    /// length, a JSON header, then the raw value bytes.
    pub fn encode(&self) -> Vec<u8> {
        let header = EntryHeader {
            key: self.key.as_str(),
            scope: self.scope.as_deref(),
            created_at: self.created_at,
            expires_at: self.expires_at,
        };
        let header = serde_json::to_vec(&header).unwrap_or_default();
        let mut out = Vec::with_capacity(4 + header.len() + self.value.len());
        out.extend_from_slice(&(header.len() as u32).to_le_bytes());
        out.extend_from_slice(&header);
        out.extend_from_slice(&self.value);
        out
    }

    /// Inverse of [`encode`](Self::encode). `origin` is the tier the blob was read from.
    pub fn decode(bytes: &[u8], origin: Tier) -> Result<Self, StoreError> {
        let len_bytes: [u8; 4] = bytes
            .get(..4)
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| StoreError::Corrupt("truncated header length".into()))?;
        let header_len = u32::from_le_bytes(len_bytes) as usize;
        let header_bytes = bytes
            .get(4..4 + header_len)
            .ok_or_else(|| StoreError::Corrupt("truncated header".into()))?;
        let header: OwnedHeader = serde_json::from_slice(header_bytes)
            .map_err(|e| StoreError::Corrupt(format!("header: {e}")))?;
        let key = CacheKey::parse(&header.key).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        Ok(Self {
            key,
            value: bytes[4 + header_len..].to_vec(),
            scope: header.scope,
            created_at: header.created_at,
            expires_at: header.expires_at,
            tier_of_origin: origin,
        })
    }
}

#[derive(Serialize)]
struct EntryHeader<'a> {
    key: &'a str,
    scope: Option<&'a str>,
    created_at: i64,
    expires_at: i64,
}

#[derive(Deserialize)]
struct OwnedHeader {
    key: String,
    scope: Option<String>,
    created_at: i64,
    expires_at: i64,
}
