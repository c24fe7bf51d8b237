//! Per-IP request throttling.
//!
//! Classic token bucket: each client IP accrues tokens at a sustained
//! rate up to a burst ceiling, and every request spends one.  Buckets for
//! idle IPs are purged periodically from a background task.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::ConnectInfo,
    http::{Request, StatusCode},
    middleware::Next,
    response::Response,
};
use tokio::sync::Mutex;
use tracing::warn;

#[derive(Debug)]
struct Bucket {
    level: f64,
    touched: Instant,
}

#[derive(Clone)]
pub struct RateLimiter {
    buckets: Arc<Mutex<HashMap<IpAddr, Bucket>>>,
    per_sec: f64,
    burst: f64,
}

impl RateLimiter {
    pub fn new(per_sec: f64, burst: f64) -> Self {
        Self {
            buckets: Arc::new(Mutex::new(HashMap::new())),
            per_sec,
            burst,
        }
    }

    /// Spend one token for `ip`.  Returns false when the bucket is dry.
    pub async fn check(&self, ip: IpAddr) -> bool {
        let now = Instant::now();
        let mut buckets = self.buckets.lock().await;
        let bucket = buckets.entry(ip).or_insert(Bucket {
            level: self.burst,
            touched: now,
        });

        let refill = now.duration_since(bucket.touched).as_secs_f64() * self.per_sec;
        bucket.level = (bucket.level + refill).min(self.burst);
        bucket.touched = now;

        if bucket.level >= 1.0 {
            bucket.level -= 1.0;
            true
        } else {
            false
        }
    }

    /// Drop buckets idle for longer than `max_idle_secs`.
    pub async fn purge_stale(&self, max_idle_secs: f64) {
        let now = Instant::now();
        let mut buckets = self.buckets.lock().await;
        buckets
            .retain(|_, b| now.duration_since(b.touched).as_secs_f64() < max_idle_secs);
    }

    #[cfg(test)]
    async fn bucket_count(&self) -> usize {
        self.buckets.lock().await.len()
    }
}

pub async fn rate_limit_middleware(
    axum::extract::State(limiter): axum::extract::State<RateLimiter>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    if let Some(ip) = client_ip(&req) {
        if !limiter.check(ip).await {
            warn!(ip = %ip, "Rate limit exceeded");
            return Err(StatusCode::TOO_MANY_REQUESTS);
        }
    }

    Ok(next.run(req).await)
}

/// Try ConnectInfo first, then X-Forwarded-For, then X-Real-IP.
fn client_ip<B>(req: &Request<B>) -> Option<IpAddr> {
    if let Some(connect_info) = req.extensions().get::<ConnectInfo<std::net::SocketAddr>>() {
        return Some(connect_info.0.ip());
    }

    for header in ["x-forwarded-for", "x-real-ip"] {
        let Some(value) = req.headers().get(header).and_then(|v| v.to_str().ok()) else {
            continue;
        };
        if let Some(candidate) = value.split(',').next() {
            if let Ok(ip) = candidate.trim().parse::<IpAddr>() {
                return Some(ip);
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn burst_is_bounded() {
        let limiter = RateLimiter::new(10.0, 3.0);
        let ip: IpAddr = "127.0.0.1".parse().unwrap();

        for _ in 0..3 {
            assert!(limiter.check(ip).await);
        }
        assert!(!limiter.check(ip).await);
    }

    #[tokio::test]
    async fn buckets_are_per_ip() {
        let limiter = RateLimiter::new(10.0, 1.0);
        let first: IpAddr = "10.0.0.1".parse().unwrap();
        let second: IpAddr = "10.0.0.2".parse().unwrap();

        assert!(limiter.check(first).await);
        assert!(!limiter.check(first).await);
        assert!(limiter.check(second).await);
    }

    #[tokio::test]
    async fn purge_drops_idle_buckets() {
        let limiter = RateLimiter::new(10.0, 5.0);
        let ip: IpAddr = "192.168.1.1".parse().unwrap();
        assert!(limiter.check(ip).await);

        limiter.purge_stale(0.0).await;
        assert_eq!(limiter.bucket_count().await, 0);
    }

    #[test]
    fn forwarded_header_wins_over_nothing() {
        let req = Request::builder()
            .header("x-forwarded-for", "203.0.113.7, 10.0.0.1")
            .body(())
            .unwrap();
        assert_eq!(client_ip(&req), Some("203.0.113.7".parse().unwrap()));
    }
}
