//! Heartbeat liveness for streaming clients

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// What a sweep should do with one client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    /// Active within the last interval
    Fresh,
    /// Idle longer than one interval: send a probe
    Probe,
    /// Idle longer than two intervals: evict
    Expired,
}

/// Classify a client by how long it has been idle
pub fn classify(idle_ms: i64, interval_ms: u64) -> Liveness {
    let interval = i64::try_from(interval_ms).unwrap_or(i64::MAX);
    if idle_ms > interval.saturating_mul(2) {
        Liveness::Expired
    } else if idle_ms > interval {
        Liveness::Probe
    } else {
        Liveness::Fresh
    }
}

/// Outcome of one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub probed: usize,
    pub evicted: usize,
}

/// Run `tick` every `interval` until `cancel` fires.
///
/// The first tick happens one full interval after spawning.
pub fn spawn_heartbeat<F, Fut>(
    interval: Duration,
    cancel: CancellationToken,
    mut tick: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = time::interval_at(time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => tick().await,
                () = cancel.cancelled() => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_classify_thresholds() {
        assert_eq!(classify(0, 1000), Liveness::Fresh);
        assert_eq!(classify(1000, 1000), Liveness::Fresh);
        assert_eq!(classify(1001, 1000), Liveness::Probe);
        assert_eq!(classify(2000, 1000), Liveness::Probe);
        assert_eq!(classify(2001, 1000), Liveness::Expired);
    }

    #[tokio::test]
    async fn test_heartbeat_ticks_until_cancelled() {
        let count = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();
        let counter = Arc::clone(&count);
        let handle = spawn_heartbeat(Duration::from_millis(10), cancel.clone(), move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::Relaxed);
            }
        });

        tokio::time::sleep(Duration::from_millis(60)).await;
        cancel.cancel();
        handle.await.unwrap();
        assert!(count.load(Ordering::Relaxed) >= 2);
    }
}
