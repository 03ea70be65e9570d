//! Per-caller quotas checked before any upstream work.

use std::{
    fmt,
    sync::Arc,
    time::{
        Duration,
        Instant,
    },
};

use dashmap::{
    DashMap,
    mapref::entry::Entry,
};
use gateway_node::Group;
use serde::{
    Deserialize,
    Serialize,
};
use tracing::debug;

/// Configuration of per-caller rate limiting.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Calls a caller may burst. Zero rejects every call.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Calls regained per second.
    #[serde(default = "default_refill_tokens_per_second")]
    pub refill_tokens_per_second: f64,
    /// Cooldown after the first exhaustion, doubled on every repeat (milliseconds).
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
    /// Upper bound of the doubled cooldown (milliseconds).
    #[serde(default = "default_max_cooldown_ms")]
    pub max_cooldown_ms: u64,
    /// Buckets kept in memory, zero for no bound.
    #[serde(default = "default_max_tracked_keys")]
    pub max_tracked_keys: usize,
    /// Limit each method separately instead of all calls of a caller together.
    #[serde(default)]
    pub per_method: bool,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

const fn default_max_tokens() -> u32 {
    100
}

const fn default_refill_tokens_per_second() -> f64 {
    50.0
}

const fn default_cooldown_ms() -> u64 {
    500
}

const fn default_max_cooldown_ms() -> u64 {
    30_000
}

const fn default_max_tracked_keys() -> usize {
    100_000
}

const fn default_enabled() -> bool {
    true
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            refill_tokens_per_second: default_refill_tokens_per_second(),
            cooldown_ms: default_cooldown_ms(),
            max_cooldown_ms: default_max_cooldown_ms(),
            max_tracked_keys: default_max_tracked_keys(),
            per_method: false,
            enabled: default_enabled(),
        }
    }
}

impl RateLimitConfig {
    /// Disabled limiter, every call passes.
    pub fn unlimited() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }
}

/// Identifies the bucket a call is charged to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey {
    pub identity: String,
    pub group: Group,
    pub method: Option<String>,
}

impl fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.method {
            Some(method) => write!(f, "{}@{}:{}", self.identity, self.group, method),
            None => write!(f, "{}@{}", self.identity, self.group),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Throttled {
    pub key: RateLimitKey,
    pub retry_after: Duration,
}

/// Decides whether a call may proceed.
///
/// Checks run on the hot path of every call and must not perform I/O.
pub trait RateLimitRegistry: Send + Sync {
    fn check(&self, key: &RateLimitKey) -> Result<(), Throttled>;

    /// Whether buckets are kept per method.
    fn per_method(&self) -> bool {
        false
    }
}

/// Quota parameters resolved once from [`RateLimitConfig`].
#[derive(Clone, Copy, Debug)]
struct Quota {
    capacity: f64,
    refill_per_sec: f64,
    cooldown: Duration,
    max_cooldown: Duration,
}

impl From<&RateLimitConfig> for Quota {
    fn from(config: &RateLimitConfig) -> Self {
        let cooldown = Duration::from_millis(config.cooldown_ms.max(1));
        Self {
            capacity: f64::from(config.max_tokens),
            refill_per_sec: config.refill_tokens_per_second.max(0.0),
            cooldown,
            max_cooldown: Duration::from_millis(config.max_cooldown_ms).max(cooldown),
        }
    }
}

impl Quota {
    /// Cooldown after `strikes` consecutive exhaustions.
    fn cooldown_after(&self, strikes: u32) -> Duration {
        let factor = 1u32 << strikes.saturating_sub(1).min(16);
        self.cooldown.saturating_mul(factor).min(self.max_cooldown)
    }
}

/// Token bucket per [`RateLimitKey`] with a doubling cooldown on exhaustion.
#[derive(Clone, Debug)]
pub struct TokenBucketRegistry {
    config: RateLimitConfig,
    quota: Quota,
    buckets: Arc<DashMap<RateLimitKey, Bucket>>,
}

impl TokenBucketRegistry {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            quota: Quota::from(&config),
            config,
            buckets: Arc::new(DashMap::new()),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Number of buckets currently tracked.
    pub fn tracked_keys(&self) -> usize {
        self.buckets.len()
    }

    /// Charges one call to `key`, returning the wait when it is over quota.
    fn charge(&self, key: &RateLimitKey, now: Instant) -> Result<(), Duration> {
        if self.config.max_tokens == 0 {
            return Err(self.quota.max_cooldown);
        }

        // The entry guard is released at the end of this statement.
        let (outcome, created) = match self.buckets.entry(key.clone()) {
            Entry::Occupied(mut slot) => (slot.get_mut().take(now, &self.quota), false),
            Entry::Vacant(slot) => {
                let mut bucket = Bucket::full(now, &self.quota);
                let outcome = bucket.take(now, &self.quota);
                slot.insert(bucket);
                (outcome, true)
            }
        };

        let limit = self.config.max_tracked_keys;
        if created && limit > 0 && self.buckets.len() > limit {
            self.prune(now, limit);
        }
        outcome
    }

    /// Drops buckets until at most `limit` remain. Buckets in cooldown go
    /// last so an exhausted caller cannot reset itself by flooding new keys,
    /// otherwise the least recently seen go first.
    fn prune(&self, now: Instant, limit: usize) {
        let mut candidates: Vec<(bool, Instant, RateLimitKey)> = self
            .buckets
            .iter()
            .map(|entry| {
                let bucket = entry.value();
                (bucket.cooling(now), bucket.last_seen, entry.key().clone())
            })
            .collect();

        let excess = candidates.len().saturating_sub(limit);
        if excess == 0 {
            return;
        }
        candidates.sort_unstable_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));

        for (_, _, key) in candidates.into_iter().take(excess) {
            self.buckets.remove(&key);
        }
        debug!(evicted = excess, "Pruned rate limit buckets");
    }
}

impl RateLimitRegistry for TokenBucketRegistry {
    fn check(&self, key: &RateLimitKey) -> Result<(), Throttled> {
        if !self.config.enabled {
            return Ok(());
        }

        self.charge(key, Instant::now()).map_err(|retry_after| {
            metrics::counter!("gateway_rate_limited_total", "group" => key.group.to_string())
                .increment(1);
            Throttled {
                key: key.clone(),
                retry_after,
            }
        })
    }

    fn per_method(&self) -> bool {
        self.config.per_method
    }
}

#[derive(Debug)]
struct Bucket {
    available: f64,
    refilled_at: Instant,
    last_seen: Instant,
    strikes: u32,
    blocked_until: Option<Instant>,
}

impl Bucket {
    fn full(now: Instant, quota: &Quota) -> Self {
        Self {
            available: quota.capacity,
            refilled_at: now,
            last_seen: now,
            strikes: 0,
            blocked_until: None,
        }
    }

    fn cooling(&self, now: Instant) -> bool {
        self.blocked_until.is_some_and(|until| until > now)
    }

    fn take(&mut self, now: Instant, quota: &Quota) -> Result<(), Duration> {
        self.last_seen = now;
        self.refill(now, quota);

        match self.blocked_until {
            Some(until) if until > now => return Err(until - now),
            Some(_) => self.blocked_until = None,
            None => {}
        }

        if self.available >= 1.0 {
            self.available -= 1.0;
            self.strikes = self.strikes.saturating_sub(1);
            return Ok(());
        }

        Err(self.strike(now, quota))
    }

    fn refill(&mut self, now: Instant, quota: &Quota) {
        let elapsed = now.saturating_duration_since(self.refilled_at).as_secs_f64();
        self.refilled_at = now;
        self.available = (self.available + elapsed * quota.refill_per_sec).min(quota.capacity);
        if self.available >= quota.capacity {
            self.strikes = 0;
        }
    }

    /// Empties the bucket and starts the next cooldown.
    fn strike(&mut self, now: Instant, quota: &Quota) -> Duration {
        self.strikes = self.strikes.saturating_add(1).min(17);
        let cooldown = quota.cooldown_after(self.strikes);
        self.available = 0.0;
        self.blocked_until = Some(now + cooldown);
        cooldown
    }
}
