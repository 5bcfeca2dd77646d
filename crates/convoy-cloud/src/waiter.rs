//! Fixed-interval readiness polling
//!
//! Every "wait until X" in Convoy goes through [`wait_until`]: evaluate the
//! probe, sleep the poll interval, repeat until the deadline. A deadline miss
//! is always [`CloudError::Timeout`] so callers can decide whether it is fatal.

use crate::error::{CloudError, Result};
use std::future::Future;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::{Instant, sleep, timeout};

/// Bounded polling window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitConfig {
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl WaitConfig {
    pub const fn new(timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            timeout,
            poll_interval,
        }
    }

    /// Window that allows exactly `attempts` probes `interval` apart.
    pub fn attempts(attempts: u32, interval: Duration) -> Self {
        Self {
            timeout: interval * attempts.saturating_sub(1),
            poll_interval: interval,
        }
    }
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self::new(Duration::from_secs(300), Duration::from_secs(5))
    }
}

/// Poll `probe` until it yields a value or the window closes.
pub async fn wait_until<T, F, Fut>(what: &str, config: WaitConfig, mut probe: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let start = Instant::now();
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        if let Some(value) = probe().await {
            tracing::debug!(
                what,
                attempt,
                elapsed_ms = start.elapsed().as_millis() as u64,
                "ready"
            );
            return Ok(value);
        }

        let elapsed = start.elapsed();
        if elapsed >= config.timeout {
            tracing::warn!(what, attempt, elapsed_ms = elapsed.as_millis() as u64, "wait timed out");
            return Err(CloudError::Timeout {
                what: what.to_string(),
                waited: elapsed,
            });
        }

        tracing::trace!(what, attempt, "not ready yet");
        sleep(config.poll_interval.min(config.timeout - elapsed)).await;
    }
}

/// Boolean form of [`wait_until`].
pub async fn wait_for<F, Fut>(what: &str, config: WaitConfig, mut probe: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    wait_until(what, config, || {
        let fut = probe();
        async move { fut.await.then_some(()) }
    })
    .await
}

/// Single connect attempt against `host:port`.
pub async fn tcp_reachable(host: &str, port: u16, connect_timeout: Duration) -> bool {
    matches!(
        timeout(connect_timeout, TcpStream::connect((host, port))).await,
        Ok(Ok(_))
    )
}

/// Wait until `host:port` accepts TCP connections.
pub async fn wait_for_port(host: &str, port: u16, config: WaitConfig) -> Result<()> {
    let what = format!("{}:{} to accept connections", host, port);
    let connect_timeout = config.poll_interval.max(Duration::from_millis(100));
    wait_for(&what, config, || tcp_reachable(host, port, connect_timeout)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_wait_returns_once_probe_succeeds() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let config = WaitConfig::new(Duration::from_secs(60), Duration::from_secs(5));

        let value = wait_until("counter", config, || {
            let counter = counter.clone();
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                (n == 3).then_some(n)
            }
        })
        .await
        .unwrap();

        assert_eq!(value, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_window_probes_exactly_n_times() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let config = WaitConfig::attempts(10, Duration::from_secs(5));

        let err = wait_for("never", config, || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                false
            }
        })
        .await
        .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 10);
        match err {
            CloudError::Timeout { what, waited } => {
                assert_eq!(what, "never");
                assert_eq!(waited, Duration::from_secs(45));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_port_probe_against_local_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let config = WaitConfig::new(Duration::from_secs(2), Duration::from_millis(50));
        wait_for_port("127.0.0.1", port, config).await.unwrap();

        drop(listener);
        assert!(!tcp_reachable("127.0.0.1", port, Duration::from_millis(200)).await);
    }
}
