//! Cooperative stop flag

use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Stop request shared between an interfacer loop and its handle
///
/// Requesting a stop never interrupts the loop; the loop observes the flag
/// at its own pace and returns.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    token: CancellationToken,
}

impl StopSignal {
    /// Create a fresh, unrequested signal
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the loop to stop. Idempotent.
    pub fn request(&self) {
        self.token.cancel();
    }

    /// Whether a stop was requested
    pub fn is_requested(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once a stop was requested
    pub async fn requested(&self) {
        self.token.cancelled().await;
    }

    /// Sleep for `duration` unless a stop is requested first.
    ///
    /// Returns `true` when the sleep was cut short by a stop request.
    pub async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.token.cancelled() => true,
            _ = tokio::time::sleep(duration) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sleep_cut_short() {
        let stop = StopSignal::new();
        let other = stop.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            other.request();
        });

        let start = std::time::Instant::now();
        assert!(stop.sleep(Duration::from_secs(10)).await);
        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(stop.is_requested());
    }

    #[tokio::test]
    async fn test_sleep_full() {
        let stop = StopSignal::new();
        assert!(!stop.sleep(Duration::from_millis(10)).await);
        assert!(!stop.is_requested());

        stop.request();
        stop.request();
        assert!(stop.is_requested());
    }
}
