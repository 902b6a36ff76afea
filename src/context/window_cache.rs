//! Per-session cache of the latest context window, with TTL
//!
//! Expired records are evicted when read; [`WindowCache::clean_expired`] and
//! the optional background sweeper bound memory for idle sessions.

use super::models::{CandidateMessage, ContextResult};
use crate::metrics::METRICS;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use tracing::debug;

/// Source of "now" for expiry decisions
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Hand-driven clock for deterministic expiry
#[derive(Debug)]
pub struct ManualClock {
    now: RwLock<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: RwLock::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.write().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.read().unwrap_or_else(|e| e.into_inner())
    }
}

/// Cached result of one optimisation for one session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowRecord {
    pub result: ContextResult,
    pub target_tokens: usize,
    /// `total_tokens / target_tokens * 100`
    pub utilization: f32,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl WindowRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Rough heap + inline footprint of this record
    fn approximate_bytes(&self, session_id: &str) -> usize {
        let messages: usize = self
            .result
            .messages
            .iter()
            .map(|m| std::mem::size_of::<CandidateMessage>() + m.id.len() + m.content.len())
            .sum();
        std::mem::size_of::<Self>() + session_id.len() + self.result.strategy.len() + messages
    }
}

/// Aggregates over live records; monitoring only
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WindowStats {
    pub active_count: usize,
    pub average_utilization: f32,
    pub average_quality: f32,
    pub approximate_memory_bytes: usize,
}

/// Session-keyed window cache, sharded by session id
pub struct WindowCache {
    records: DashMap<String, WindowRecord>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl WindowCache {
    /// Create a cache on the system clock
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            records: DashMap::new(),
            ttl,
            clock,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Store a result, replacing any previous record for the session
    pub fn put(&self, session_id: &str, result: ContextResult, target_tokens: usize) {
        let now = self.clock.now();
        let utilization = result.total_tokens as f32 / target_tokens.max(1) as f32 * 100.0;

        debug!(
            "Caching window for session {}: {} tokens, {:.1}% of target",
            session_id, result.total_tokens, utilization
        );

        self.records.insert(
            session_id.to_string(),
            WindowRecord {
                result,
                target_tokens,
                utilization,
                created_at: now,
                expires_at: now.checked_add_signed(self.ttl).unwrap_or(DateTime::<Utc>::MAX_UTC),
            },
        );
    }

    /// Get the live record for a session, evicting it if expired
    pub fn get(&self, session_id: &str) -> Option<WindowRecord> {
        let now = self.clock.now();

        if self
            .records
            .remove_if(session_id, |_, record| record.is_expired(now))
            .is_some()
        {
            debug!("Window for session {} expired", session_id);
            METRICS.record_cache_lookup("expired");
            return None;
        }

        let record = self.records.get(session_id).map(|r| r.value().clone());
        METRICS.record_cache_lookup(if record.is_some() { "hit" } else { "miss" });
        record
    }

    /// Remove a session's record; true if one existed
    pub fn clear(&self, session_id: &str) -> bool {
        self.records.remove(session_id).is_some()
    }

    /// Drop every expired record, returning how many went
    pub fn clean_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.records.len();
        self.records.retain(|_, record| !record.is_expired(now));
        let removed = before.saturating_sub(self.records.len());

        if removed > 0 {
            debug!("Swept {} expired window(s)", removed);
            METRICS.record_cache_evictions(removed);
        }
        removed
    }

    /// Number of stored records, expired ones included
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Get cache statistics over live records
    pub fn stats(&self) -> WindowStats {
        let now = self.clock.now();
        let mut stats = WindowStats::default();
        let mut utilization = 0.0f32;
        let mut quality = 0.0f32;

        for entry in self.records.iter() {
            let record = entry.value();
            if record.is_expired(now) {
                continue;
            }
            stats.active_count += 1;
            utilization += record.utilization;
            quality += record.result.quality_score;
            stats.approximate_memory_bytes += record.approximate_bytes(entry.key());
        }

        if stats.active_count > 0 {
            stats.average_utilization = utilization / stats.active_count as f32;
            stats.average_quality = quality / stats.active_count as f32;
        }
        stats
    }

    /// Run [`clean_expired`](Self::clean_expired) every `every` on the tokio runtime
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        every: std::time::Duration,
    ) -> tokio::task::JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                cache.clean_expired();
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::models::MessageRole;
    use chrono::TimeZone;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap()
    }

    fn result(tokens: usize, quality: f32) -> ContextResult {
        let message =
            CandidateMessage::new(MessageRole::User, "x".repeat(tokens * 4), 0.5, 0.5, 0.5);
        ContextResult {
            messages: vec![message],
            total_tokens: tokens,
            original_tokens: tokens * 2,
            strategy: "relevance_filtering".to_string(),
            quality_score: quality,
            quality_impact: 0.0,
            tokens_removed: tokens,
            messages_removed: 1,
        }
    }

    fn cache() -> (WindowCache, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(start()));
        (WindowCache::with_clock(Duration::minutes(30), clock.clone()), clock)
    }

    #[test]
    fn test_put_and_get() {
        let (cache, _) = cache();
        cache.put("s1", result(400, 0.8), 800);

        let record = cache.get("s1").unwrap();
        assert_eq!(record.result.total_tokens, 400);
        assert!((record.utilization - 50.0).abs() < 1e-4);
        assert_eq!(record.expires_at, start() + Duration::minutes(30));
        assert!(cache.get("s2").is_none());
    }

    #[test]
    fn test_ttl_boundary() {
        let (cache, clock) = cache();
        cache.put("s1", result(100, 0.5), 800);

        clock.advance(Duration::minutes(29));
        assert!(cache.get("s1").is_some());

        clock.advance(Duration::minutes(2));
        assert!(cache.get("s1").is_none());
        // read-time eviction removed it
        assert!(cache.is_empty());
    }

    #[test]
    fn test_put_overwrites() {
        let (cache, clock) = cache();
        cache.put("s1", result(100, 0.5), 800);
        clock.advance(Duration::minutes(20));
        cache.put("s1", result(200, 0.6), 800);
        clock.advance(Duration::minutes(20));

        let record = cache.get("s1").unwrap();
        assert_eq!(record.result.total_tokens, 200);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_expiry_saturates_instead_of_overflowing() {
        let clock = Arc::new(ManualClock::new(start()));
        let cache = WindowCache::with_clock(Duration::weeks(5_000_000_000), clock.clone());
        cache.put("s1", result(100, 0.5), 800);

        let record = cache.get("s1").unwrap();
        assert_eq!(record.expires_at, DateTime::<Utc>::MAX_UTC);
        clock.advance(Duration::weeks(52 * 1000));
        assert!(cache.get("s1").is_some());
    }

    #[test]
    fn test_clear() {
        let (cache, _) = cache();
        cache.put("s1", result(100, 0.5), 800);
        assert!(cache.clear("s1"));
        assert!(!cache.clear("s1"));
        assert!(cache.get("s1").is_none());
    }

    #[test]
    fn test_clean_expired() {
        let (cache, clock) = cache();
        cache.put("old", result(100, 0.5), 800);
        clock.advance(Duration::minutes(20));
        cache.put("new", result(100, 0.5), 800);
        clock.advance(Duration::minutes(15));

        assert_eq!(cache.clean_expired(), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.get("new").is_some());
    }

    #[test]
    fn test_stats_skip_expired() {
        let (cache, clock) = cache();
        cache.put("a", result(200, 0.4), 800);
        clock.advance(Duration::minutes(31));
        cache.put("b", result(400, 0.8), 800);
        cache.put("c", result(800, 0.6), 800);

        let stats = cache.stats();
        assert_eq!(stats.active_count, 2);
        assert!((stats.average_utilization - 75.0).abs() < 1e-4);
        assert!((stats.average_quality - 0.7).abs() < 1e-4);
        assert!(stats.approximate_memory_bytes > 1600 + 3200);
    }

    #[test]
    fn test_stats_empty() {
        let (cache, _) = cache();
        assert_eq!(cache.stats(), WindowStats::default());
    }

    #[tokio::test]
    async fn test_sweeper_cleans_in_background() {
        let clock = Arc::new(ManualClock::new(start()));
        let cache = Arc::new(WindowCache::with_clock(Duration::minutes(30), clock.clone()));
        cache.put("s1", result(100, 0.5), 800);
        clock.advance(Duration::minutes(45));

        let handle = cache.spawn_sweeper(std::time::Duration::from_millis(10));
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        handle.abort();

        assert!(cache.is_empty());
    }
}
