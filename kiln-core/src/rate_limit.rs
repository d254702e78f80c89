use dashmap::DashMap;
use std::time::Instant;

struct Bucket {
    tokens: f64,
    updated: Instant,
}

/// Per-client token bucket allowing `rate` requests per second, with bursts of the same size.
pub struct RateLimiter {
    rate: f64,
    burst: f64,
    buckets: DashMap<String, Bucket>,
}

impl RateLimiter {
    pub fn new(requests_per_second: f64) -> Self {
        let rate = requests_per_second.max(0.0);
        Self {
            rate,
            burst: rate.max(1.0),
            buckets: DashMap::new(),
        }
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Take one token for `client`. Returns false when the client is over the limit.
    pub fn allow(&self, client: &str) -> bool {
        self.allow_at(client, Instant::now())
    }

    pub(crate) fn allow_at(&self, client: &str, now: Instant) -> bool {
        let mut bucket = self.buckets.entry(client.to_string()).or_insert(Bucket {
            tokens: self.burst,
            updated: now,
        });

        let elapsed = now.saturating_duration_since(bucket.updated).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.rate).min(self.burst);
        bucket.updated = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Drop buckets that have been full for a while.
    pub fn prune(&self) {
        let now = Instant::now();
        let rate = self.rate;
        let burst = self.burst;
        self.buckets.retain(|_, b| {
            let refilled = b.tokens + now.saturating_duration_since(b.updated).as_secs_f64() * rate;
            refilled < burst
        });
    }
}

/// Body of the page shown to rate-limited clients.
pub const LIMIT_MESSAGE: &str = "<div style='color:red'>You have reached the maximum request limit.</div>";
