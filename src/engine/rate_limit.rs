use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

const DEFAULT_BUCKET: &str = "_default";

/// Per-host politeness limiter: at most one request to a host per
/// `min_interval`. Concurrent requests to the same host serialize implicitly
/// because each awaits its own computed delay against the latest stamp. The
/// read-then-write is deliberately not atomic; under concurrency two callers
/// can compute a stale wait and mildly exceed the target rate, which only
/// costs politeness, never correctness.
pub struct HostRateLimiter {
    min_interval: Duration,
    last_request: Mutex<HashMap<String, Instant>>,
}

impl HostRateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_request: Mutex::new(HashMap::new()),
        }
    }

    /// Sleep until this URL's host is allowed another request, then stamp it.
    pub async fn acquire(&self, url: &str) {
        let host = host_of(url);

        let wait = {
            let last = self.last_request.lock().unwrap_or_else(|e| e.into_inner());
            last.get(&host)
                .map(|at| self.min_interval.saturating_sub(at.elapsed()))
                .unwrap_or(Duration::ZERO)
        };
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }

        let mut last = self.last_request.lock().unwrap_or_else(|e| e.into_inner());
        last.insert(host, Instant::now());
    }
}

/// Hostname bucket for a URL; unparsable URLs share a default bucket.
fn host_of(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_string()))
        .unwrap_or_else(|| DEFAULT_BUCKET.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buckets_by_hostname() {
        assert_eq!(host_of("https://example.com/feed.xml"), "example.com");
        assert_eq!(host_of("not a url"), DEFAULT_BUCKET);
    }

    #[tokio::test(start_paused = true)]
    async fn second_request_to_same_host_waits() {
        let limiter = HostRateLimiter::new(Duration::from_secs(3));
        let start = Instant::now();

        limiter.acquire("https://example.com/a.xml").await;
        assert!(start.elapsed() < Duration::from_secs(1));

        limiter.acquire("https://example.com/b.xml").await;
        assert!(start.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn different_hosts_do_not_wait_on_each_other() {
        let limiter = HostRateLimiter::new(Duration::from_secs(3));
        let start = Instant::now();

        limiter.acquire("https://a.example/feed").await;
        limiter.acquire("https://b.example/feed").await;

        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
