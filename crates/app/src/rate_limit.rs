//! Fixed-window rate limiting by client IP
//!
//! 100 requests per 60 second window per IP across every route. Windows live
//! in Redis when an endpoint is configured so that all instances share them,
//! otherwise in process memory. A Redis failure lets the request through.
//!
//! The in-memory map is swept of expired windows at most once per window, so
//! rotating client addresses cannot grow it past the callers seen in the last
//! two windows.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tenantry_common::{ClientContext, ErrorCode};
use tokio::sync::Mutex;
use tokio::time::Instant;

pub const DEFAULT_MAX_REQUESTS: u64 = 100;
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

const REDIS_KEY_PREFIX: &str = "tenantry:ratelimit:";

struct WindowEntry {
    count: u64,
    reset_at: Instant,
}

struct MemoryWindows {
    entries: HashMap<String, WindowEntry>,
    next_sweep: Instant,
}

impl MemoryWindows {
    fn sweep(&mut self, now: Instant, window: Duration) {
        if now < self.next_sweep {
            return;
        }
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.reset_at > now);
        self.next_sweep = now + window;
        let dropped = before - self.entries.len();
        if dropped > 0 {
            tracing::debug!(dropped, remaining = self.entries.len(), "Expired rate limit windows swept");
        }
    }
}

#[derive(Clone)]
enum Backend {
    Memory(Arc<Mutex<MemoryWindows>>),
    Redis(ConnectionManager),
}

#[derive(Clone)]
pub struct RateLimiter {
    backend: Backend,
    max_requests: u64,
    window: Duration,
}

impl RateLimiter {
    pub fn in_memory(max_requests: u64, window: Duration) -> Self {
        Self {
            backend: Backend::Memory(Arc::new(Mutex::new(MemoryWindows {
                entries: HashMap::new(),
                next_sweep: Instant::now() + window,
            }))),
            max_requests,
            window,
        }
    }

    pub async fn redis(url: &str, max_requests: u64, window: Duration) -> redis::RedisResult<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self {
            backend: Backend::Redis(conn),
            max_requests,
            window,
        })
    }

    /// Count a request against `key`; `false` once the window is exhausted
    pub async fn check(&self, key: &str) -> bool {
        match &self.backend {
            Backend::Memory(windows) => {
                let now = Instant::now();
                let mut windows = windows.lock().await;
                windows.sweep(now, self.window);
                let entry = windows.entries.entry(key.to_string()).or_insert(WindowEntry {
                    count: 0,
                    reset_at: now + self.window,
                });
                if now >= entry.reset_at {
                    entry.count = 0;
                    entry.reset_at = now + self.window;
                }
                entry.count += 1;
                entry.count <= self.max_requests
            }
            Backend::Redis(conn) => match self.check_redis(conn.clone(), key).await {
                Ok(allowed) => allowed,
                Err(e) => {
                    tracing::warn!(error = %e, "Rate limiter unavailable; allowing request");
                    true
                }
            },
        }
    }

    /// Windows currently held in memory; zero for the Redis backend
    pub async fn tracked_windows(&self) -> usize {
        match &self.backend {
            Backend::Memory(windows) => windows.lock().await.entries.len(),
            Backend::Redis(_) => 0,
        }
    }

    async fn check_redis(&self, mut conn: ConnectionManager, key: &str) -> redis::RedisResult<bool> {
        let key = format!("{REDIS_KEY_PREFIX}{key}");
        let count: u64 = conn.incr(&key, 1u64).await?;
        if count == 1 {
            let _: () = conn.expire(&key, self.window.as_secs() as i64).await?;
        }
        Ok(count <= self.max_requests)
    }
}

/// Middleware: reject with 429 once the caller's IP exhausts its window
pub async fn rate_limit(
    State(limiter): State<RateLimiter>,
    client: ClientContext,
    request: Request,
    next: Next,
) -> Response {
    let key = client.ip.unwrap_or_else(|| "unknown".to_string());
    if !limiter.check(&key).await {
        tracing::info!(ip = %key, "Rate limit exceeded");
        return tenantry_common::Error::from(ErrorCode::TooManyRequests).into_response();
    }
    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_window_allows_up_to_limit() {
        let limiter = RateLimiter::in_memory(3, Duration::from_secs(60));
        for _ in 0..3 {
            assert!(limiter.check("10.0.0.1").await);
        }
        assert!(!limiter.check("10.0.0.1").await);
        assert!(limiter.check("10.0.0.2").await);
    }

    #[tokio::test]
    async fn test_window_resets() {
        let limiter = RateLimiter::in_memory(1, Duration::from_millis(50));
        assert!(limiter.check("10.0.0.1").await);
        assert!(!limiter.check("10.0.0.1").await);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(limiter.check("10.0.0.1").await);
    }

    #[tokio::test]
    async fn test_expired_windows_are_swept() {
        let limiter = RateLimiter::in_memory(100, Duration::from_millis(10));
        for i in 0..10_000u32 {
            let ip = format!("10.{}.{}.{}", i >> 16, (i >> 8) & 0xff, i & 0xff);
            assert!(limiter.check(&ip).await);
        }
        assert!(limiter.tracked_windows().await >= 1);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(limiter.check("1.1.1.1").await);
        assert_eq!(limiter.tracked_windows().await, 1);
    }
}
