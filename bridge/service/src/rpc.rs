// Copyright (c) 2024 The Botho Foundation

//! Call pacing shared by the chain clients.

use std::time::Duration;

use tokio::{sync::Mutex, time::Instant};

/// Enforces a minimum delay between consecutive external calls.
///
/// The bridge makes its calls one at a time, so a spacing rule is all the
/// rate limiting it needs. One throttle is shared by every client.
#[derive(Debug)]
pub struct RpcThrottle {
    min_interval: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl RpcThrottle {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_call: Mutex::new(None),
        }
    }

    /// A throttle that never waits.
    pub fn unlimited() -> Self {
        Self::new(Duration::ZERO)
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Wait until the next call is allowed and claim the slot.
    pub async fn wait(&self) {
        let mut last = self.last_call.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_throttle_spaces_calls() {
        let throttle = RpcThrottle::new(Duration::from_millis(30));
        let start = std::time::Instant::now();
        throttle.wait().await;
        throttle.wait().await;
        throttle.wait().await;
        assert!(start.elapsed() >= Duration::from_millis(60));
    }

    #[tokio::test]
    async fn test_unlimited_throttle_does_not_wait() {
        let throttle = RpcThrottle::unlimited();
        let start = std::time::Instant::now();
        for _ in 0..10 {
            throttle.wait().await;
        }
        assert!(start.elapsed() < Duration::from_millis(50));
    }
}
