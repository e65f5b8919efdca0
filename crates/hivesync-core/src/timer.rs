//! Process-wide repeating-timer multiplexer.
//!
//! Many named periodic callbacks share one underlying tokio interval task per
//! distinct period. A period bucket is Inactive until its first callback is
//! registered (the ticker task is spawned), and goes back to Inactive when its
//! last callback is removed (the ticker is aborted and the bucket discarded).
//!
//! On each tick every callback registered for that period is spawned before
//! any of them is awaited; completion is then awaited in aggregate, so a slow
//! or panicking callback never delays the start of its peers nor cancels them.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures_util::future::{BoxFuture, join_all};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

/// Boxed async callback stored in a period bucket.
pub type TimerCallback = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

struct IntervalBucket {
    callbacks: Arc<DashMap<String, TimerCallback>>,
    ticker: JoinHandle<()>,
}

/// Multiplexes named periodic callbacks onto a minimal number of tokio timers.
///
/// # Example
///
/// ```ignore
/// let timers = Arc::new(TimerService::new());
/// timers.on_timer("cache_ttl_sweep", Duration::from_secs(1), move || {
///     let cache = Arc::clone(&cache);
///     async move { cache.sweep_expired(); }
/// });
/// ```
pub struct TimerService {
    buckets: DashMap<Duration, IntervalBucket>,
}

impl TimerService {
    pub fn new() -> Self {
        Self {
            buckets: DashMap::new(),
        }
    }

    /// Register (or replace) a named periodic callback.
    ///
    /// Registering the same name for the same period replaces its callback.
    /// The first callback registered for a new period starts that period's
    /// ticker. `period` must be non-zero.
    pub fn on_timer<F, Fut>(&self, name: impl Into<String>, period: Duration, callback: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        let callback: TimerCallback = Arc::new(move || Box::pin(callback()));

        let bucket = self.buckets.entry(period).or_insert_with(|| {
            let callbacks: Arc<DashMap<String, TimerCallback>> = Arc::new(DashMap::new());
            let ticker = spawn_ticker(period, Arc::clone(&callbacks));
            debug!(period_ms = period.as_millis() as u64, "timer interval started");
            IntervalBucket { callbacks, ticker }
        });
        bucket.callbacks.insert(name, callback);
    }

    /// Remove a named callback from every period bucket it appears in.
    ///
    /// Buckets left empty have their ticker cancelled and are discarded.
    pub fn off_timer(&self, name: &str) {
        let mut emptied = Vec::new();
        for bucket in self.buckets.iter() {
            bucket.callbacks.remove(name);
            if bucket.callbacks.is_empty() {
                emptied.push(*bucket.key());
            }
        }

        for period in emptied {
            // Guard against a concurrent re-registration into the same bucket.
            if let Some((_, bucket)) = self
                .buckets
                .remove_if(&period, |_, b| b.callbacks.is_empty())
            {
                bucket.ticker.abort();
                debug!(period_ms = period.as_millis() as u64, "timer interval stopped");
            }
        }
    }

    /// Cancel every ticker unconditionally. Used at process shutdown.
    pub fn stop(&self) {
        let periods: Vec<Duration> = self.buckets.iter().map(|e| *e.key()).collect();
        for period in periods {
            if let Some((_, bucket)) = self.buckets.remove(&period) {
                bucket.ticker.abort();
            }
        }
    }

    /// Number of active period buckets.
    pub fn interval_count(&self) -> usize {
        self.buckets.len()
    }

    /// Total number of registered callbacks across all buckets.
    pub fn callback_count(&self) -> usize {
        self.buckets.iter().map(|b| b.callbacks.len()).sum()
    }
}

impl Default for TimerService {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TimerService {
    fn drop(&mut self) {
        self.stop();
    }
}

fn spawn_ticker(period: Duration, callbacks: Arc<DashMap<String, TimerCallback>>) -> JoinHandle<()> {
    tokio::spawn(async move {
        // First tick fires one full period after registration.
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            let snapshot: Vec<(String, TimerCallback)> = callbacks
                .iter()
                .map(|e| (e.key().clone(), Arc::clone(e.value())))
                .collect();

            let mut names = Vec::with_capacity(snapshot.len());
            let mut running = Vec::with_capacity(snapshot.len());
            for (name, callback) in snapshot {
                names.push(name);
                running.push(tokio::spawn(callback()));
            }

            for (name, joined) in names.iter().zip(join_all(running).await) {
                if let Err(e) = joined {
                    warn!(callback = %name, error = %e, "timer callback failed");
                }
            }
        }
    })
}
