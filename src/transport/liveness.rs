//! Periodic eviction of silent vehicles.
//!
//! The monitor ticks every `check_interval` and asks the pool to evict
//! vehicles whose last liveness signal is older than `timeout`. It stops
//! as soon as [`ConnectionPool::stop`] is called; a sweep already in
//! progress finishes first, and no tick runs afterwards.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, info, warn};

use super::pool::ConnectionPool;

// ============================================================================
// ConnectionPool - Monitor
// ============================================================================

impl ConnectionPool {
    /// Spawns the liveness monitor for this pool.
    ///
    /// The first sweep runs one `check_interval` after the call. The task
    /// exits once [`stop`](Self::stop) is called.
    pub fn start_liveness_monitor(self: &Arc<Self>) -> JoinHandle<()> {
        let shutdown = self.shutdown_signal();
        tokio::spawn(run_monitor(Arc::clone(self), shutdown))
    }
}

// ============================================================================
// Monitor Loop
// ============================================================================

async fn run_monitor(pool: Arc<ConnectionPool>, mut shutdown: watch::Receiver<bool>) {
    let period = pool.check_interval();
    let Some(start) = Instant::now().checked_add(period) else {
        warn!(
            check_interval_secs = period.as_secs(),
            "Check interval out of range, liveness monitor not started"
        );
        return;
    };
    let mut ticker = interval_at(start, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(
        check_interval_secs = period.as_secs(),
        timeout_secs = pool.timeout().as_secs(),
        "Liveness monitor started"
    );

    loop {
        tokio::select! {
            biased;

            _ = shutdown.wait_for(|stopped| *stopped) => break,

            _ = ticker.tick() => {
                let evicted = pool.evict_stale(Instant::now());
                debug!(evicted = evicted.len(), "Liveness sweep complete");
            }
        }
    }

    info!("Liveness monitor stopped");
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use crate::identifiers::DeviceId;
    use crate::transport::Connection;

    fn pool() -> Arc<ConnectionPool> {
        Arc::new(ConnectionPool::new(
            Duration::from_secs(30),
            Duration::from_secs(60),
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_evicts_silent_vehicle() {
        let pool = pool();
        let (silent, _a) = Connection::new(Some(DeviceId::new("silent")));
        let (chatty, _b) = Connection::new(Some(DeviceId::new("chatty")));
        pool.add(Arc::clone(&silent)).expect("add");
        pool.add(Arc::clone(&chatty)).expect("add");

        let monitor = pool.start_liveness_monitor();

        // Sweeps at 30s and 60s find nothing older than 60s.
        for _ in 0..6 {
            tokio::time::sleep(Duration::from_secs(10)).await;
            pool.update_liveness(&DeviceId::new("chatty"));
        }
        assert!(pool.device(&DeviceId::new("silent")).is_some());

        // The sweep at 90s evicts the silent vehicle only.
        for _ in 0..4 {
            tokio::time::sleep(Duration::from_secs(10)).await;
            pool.update_liveness(&DeviceId::new("chatty"));
        }
        assert!(pool.device(&DeviceId::new("silent")).is_none());
        assert!(silent.is_closed());
        assert!(pool.device(&DeviceId::new("chatty")).is_some());
        assert!(!chatty.is_closed());

        pool.stop();
        monitor.await.expect("join");
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_prevents_further_sweeps() {
        let pool = pool();
        let monitor = pool.start_liveness_monitor();

        pool.stop();
        monitor.await.expect("join");
        assert!(pool.is_stopped());

        let (vehicle, _rx) = Connection::new(Some(DeviceId::new("v1")));
        pool.add(Arc::clone(&vehicle)).expect("add");

        tokio::time::sleep(Duration::from_secs(300)).await;
        assert!(!vehicle.is_closed());
        assert_eq!(pool.stats().vehicle_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_before_start_exits_immediately() {
        let pool = pool();
        pool.stop();

        let monitor = pool.start_liveness_monitor();
        tokio::time::timeout(Duration::from_secs(1), monitor)
            .await
            .expect("monitor exits")
            .expect("join");
    }

    #[tokio::test]
    async fn test_out_of_range_interval_does_not_panic() {
        let pool = Arc::new(ConnectionPool::new(
            Duration::from_secs(u64::MAX),
            Duration::from_secs(u64::MAX),
        ));

        let monitor = pool.start_liveness_monitor();
        tokio::time::timeout(Duration::from_secs(1), monitor)
            .await
            .expect("monitor exits")
            .expect("monitor does not panic");
    }
}
