//! Token bucket rate limiter per client address.

use std::collections::HashMap;
use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::request::Parts;
use tokio::time;

/// Tracked clients before `check` starts evicting.
pub const DEFAULT_MAX_CLIENTS: usize = 10_000;

#[derive(Clone)]
pub struct RateLimiter {
    buckets: Arc<Mutex<HashMap<String, TokenBucket>>>,
    max_tokens: u32,
    refill_rate: f64, // tokens per second
    max_clients: usize,
}

struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn tokens_at(&self, now: Instant, rate: f64, max: f64) -> f64 {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        (self.tokens + elapsed * rate).min(max)
    }

    fn refill(&mut self, now: Instant, rate: f64, max: f64) {
        self.tokens = self.tokens_at(now, rate, max);
        self.last_refill = now;
    }
}

impl RateLimiter {
    pub fn new(requests_per_minute: u32) -> Self {
        Self::with_capacity(requests_per_minute, DEFAULT_MAX_CLIENTS)
    }

    pub fn with_capacity(requests_per_minute: u32, max_clients: usize) -> Self {
        Self {
            buckets: Arc::new(Mutex::new(HashMap::new())),
            max_tokens: requests_per_minute,
            refill_rate: requests_per_minute as f64 / 60.0,
            max_clients: max_clients.max(1),
        }
    }

    pub fn tracked_clients(&self) -> usize {
        self.buckets.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Drop buckets that have refilled completely. A full bucket behaves
    /// exactly like a missing one.
    pub fn prune(&self) -> usize {
        self.prune_at(Instant::now())
    }

    fn prune_at(&self, now: Instant) -> usize {
        let mut buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
        self.prune_full(&mut buckets, now)
    }

    fn prune_full(&self, buckets: &mut HashMap<String, TokenBucket>, now: Instant) -> usize {
        let max = self.max_tokens as f64;
        let before = buckets.len();
        buckets.retain(|_, bucket| bucket.tokens_at(now, self.refill_rate, max) < max);
        before - buckets.len()
    }

    /// Make room for a new client: prune full buckets, then if still at
    /// the cap drop the least recently seen half.
    fn make_room(&self, buckets: &mut HashMap<String, TokenBucket>, now: Instant) {
        self.prune_full(buckets, now);
        if buckets.len() < self.max_clients {
            return;
        }
        let mut seen: Vec<(Instant, String)> = buckets
            .iter()
            .map(|(client, bucket)| (bucket.last_refill, client.clone()))
            .collect();
        seen.sort_unstable();
        let excess = buckets.len() - self.max_clients / 2;
        for (_, client) in seen.into_iter().take(excess) {
            buckets.remove(&client);
        }
        tracing::warn!(
            tracked = buckets.len(),
            "Rate limiter at capacity, evicted least recent clients"
        );
    }

    pub fn check(&self, client: &str) -> bool {
        let mut buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();

        if !buckets.contains_key(client) && buckets.len() >= self.max_clients {
            self.make_room(&mut buckets, now);
        }

        let bucket = buckets.entry(client.to_string()).or_insert(TokenBucket {
            tokens: self.max_tokens as f64,
            last_refill: now,
        });

        bucket.refill(now, self.refill_rate, self.max_tokens as f64);

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Periodically drop idle buckets so the map tracks only active clients.
pub fn spawn_prune_task(limiter: RateLimiter, every: Duration) {
    tokio::spawn(async move {
        let mut interval = time::interval(every);
        loop {
            interval.tick().await;
            let removed = limiter.prune();
            tracing::debug!(removed, "Rate limiter pruned");
        }
    });
}

/// Peer address when the server runs with connect info, used as the rate
/// limit key.
#[derive(Debug, Clone, Copy)]
pub struct ClientIp(pub Option<IpAddr>);

impl ClientIp {
    pub fn key(&self) -> String {
        self.0
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }
}

impl<S: Send + Sync> FromRequestParts<S> for ClientIp {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Infallible> {
        Ok(Self(
            parts
                .extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip()),
        ))
    }
}
