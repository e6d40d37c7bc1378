//! Per-IP token bucket rate limiting.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, StatusCode},
    middleware::Next,
    response::Response,
};
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::config::schema::RateLimitConfig;
use crate::observability::metrics;

/// A simple token bucket rate limiter.
struct TokenBucket {
    tokens: f64,
    last_update: Instant,
}

impl TokenBucket {
    fn new(capacity: f64) -> Self {
        Self {
            tokens: capacity,
            last_update: Instant::now(),
        }
    }

    fn try_acquire(&mut self, capacity: f64, refill_rate: f64) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_update).as_secs_f64();

        self.tokens = (self.tokens + elapsed * refill_rate).min(capacity);
        self.last_update = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Buckets for one group of endpoints.
pub struct RateLimiterState {
    buckets: Mutex<HashMap<IpAddr, TokenBucket>>,
    rps: f64,
    burst: f64,
    scope: &'static str,
}

impl RateLimiterState {
    /// `scope` labels the rate-limited counter (e.g. "login", "upgrade").
    pub fn new(config: &RateLimitConfig, scope: &'static str) -> Arc<Self> {
        Arc::new(Self {
            buckets: Mutex::new(HashMap::new()),
            rps: config.requests_per_second as f64,
            burst: config.burst_size.max(1) as f64,
            scope,
        })
    }

    pub fn check(&self, ip: IpAddr) -> bool {
        let mut buckets = self.buckets.lock().unwrap_or_else(PoisonError::into_inner);
        let bucket = buckets.entry(ip).or_insert_with(|| TokenBucket::new(self.burst));
        bucket.try_acquire(self.burst, self.rps)
    }

    /// Drop buckets that have refilled completely; they carry no state.
    pub fn prune(&self) -> usize {
        let mut buckets = self.buckets.lock().unwrap_or_else(PoisonError::into_inner);
        let before = buckets.len();
        let now = Instant::now();
        let (burst, rps) = (self.burst, self.rps);
        buckets.retain(|_, b| b.tokens + now.duration_since(b.last_update).as_secs_f64() * rps < burst);
        before - buckets.len()
    }

    pub fn len(&self) -> usize {
        self.buckets.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Periodically drop idle buckets from every limiter until shutdown.
pub async fn prune_loop(
    limiters: Vec<Arc<RateLimiterState>>,
    every: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                for limiter in &limiters {
                    let pruned = limiter.prune();
                    if pruned > 0 {
                        tracing::debug!(scope = limiter.scope, pruned, "Idle rate limit buckets dropped");
                    }
                }
            }
            _ = shutdown.recv() => break,
        }
    }
}

/// Middleware function for per-IP rate limiting.
pub async fn rate_limit_middleware(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<Arc<RateLimiterState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let ip = addr.ip();
    if state.check(ip) {
        next.run(request).await
    } else {
        tracing::warn!(client_ip = %ip, scope = state.scope, "Rate limit exceeded");
        metrics::record_rate_limited(state.scope);
        let mut response = Response::new(Body::from("Rate limit exceeded"));
        *response.status_mut() = StatusCode::TOO_MANY_REQUESTS;
        response
    }
}
