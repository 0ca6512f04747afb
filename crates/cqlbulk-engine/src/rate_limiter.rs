//! Dispatch throttling
//!
//! [`RateLimiter`] is a smooth token bucket holding up to one second of
//! unused permits. [`AdaptiveRateLimiter`] wraps it and moves the rate in
//! response to a sampled statistic, by default the 99.9th percentile request
//! latency tracked by [`LatencyTracker`].

use crate::config::{AdaptiveConfig, RateConfig};
use crate::lock;
use async_trait::async_trait;
use cqlbulk_common::{BulkError, Result};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

/// Anything workers wait on before dispatching rows
#[async_trait]
pub trait Throttle: Send + Sync {
    /// Waits until `permits` rows may be dispatched
    async fn acquire(&self, permits: u32);

    /// Current rate in permits per second
    fn rate(&self) -> f64;
}

struct Bucket {
    rate: f64,
    stored: f64,
    next_free: Instant,
}

impl Bucket {
    fn max_stored(&self) -> f64 {
        self.rate
    }

    fn resync(&mut self, now: Instant) {
        if now > self.next_free {
            let idle = (now - self.next_free).as_secs_f64();
            self.stored = (self.stored + idle * self.rate).min(self.max_stored());
            self.next_free = now;
        }
    }

    /// Books `permits` and returns how long the caller must wait.
    fn reserve(&mut self, permits: f64, now: Instant) -> Duration {
        self.resync(now);
        let wait = self.next_free.saturating_duration_since(now);
        let from_store = permits.min(self.stored);
        let fresh = permits - from_store;
        self.stored -= from_store;
        self.next_free += Duration::from_secs_f64(fresh / self.rate);
        wait
    }
}

/// Token bucket with a runtime-adjustable rate
pub struct RateLimiter {
    bucket: Mutex<Bucket>,
    acquired: AtomicU64,
    report_every: Option<u64>,
    started: Instant,
}

impl RateLimiter {
    /// # Arguments
    ///
    /// * `rate` - Permits per second
    ///
    /// # Errors
    ///
    /// `Config` unless `rate` is positive and finite.
    pub fn new(rate: f64) -> Result<Self> {
        if !(rate.is_finite() && rate > 0.0) {
            return Err(BulkError::Config(format!("rate must be positive and finite, got {rate}")));
        }
        let now = Instant::now();
        Ok(Self {
            bucket: Mutex::new(Bucket { rate, stored: 0.0, next_free: now }),
            acquired: AtomicU64::new(0),
            report_every: None,
            started: now,
        })
    }

    /// Logs throughput every `every` acquired permits.
    pub fn with_progress(mut self, every: u64) -> Self {
        self.report_every = Some(every.max(1));
        self
    }

    pub fn rate(&self) -> f64 {
        lock(&self.bucket).rate
    }

    /// Changes the rate for all subsequent reservations.
    pub fn set_rate(&self, rate: f64) {
        if !(rate.is_finite() && rate > 0.0) {
            warn!(rate = rate, "Ignoring invalid rate");
            return;
        }
        let mut bucket = lock(&self.bucket);
        bucket.resync(Instant::now());
        let scale = rate / bucket.rate;
        bucket.rate = rate;
        bucket.stored = (bucket.stored * scale).min(bucket.max_stored());
    }

    pub async fn acquire(&self, permits: u32) {
        let wait = lock(&self.bucket).reserve(f64::from(permits), Instant::now());
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
        self.record(u64::from(permits));
    }

    fn record(&self, permits: u64) {
        let total = self.acquired.fetch_add(permits, Ordering::Relaxed) + permits;
        if let Some(every) = self.report_every {
            if total / every > (total - permits) / every {
                let elapsed = self.started.elapsed().as_secs_f64();
                info!(
                    acquired = total,
                    rate = self.rate(),
                    mean_rate = if elapsed > 0.0 { total as f64 / elapsed } else { 0.0 },
                    "Throughput"
                );
            }
        }
    }
}

#[async_trait]
impl Throttle for RateLimiter {
    async fn acquire(&self, permits: u32) {
        RateLimiter::acquire(self, permits).await
    }

    fn rate(&self) -> f64 {
        RateLimiter::rate(self)
    }
}

/// A statistic the adaptive limiter steers by
pub trait StatSource: Send + Sync {
    /// Current value, or `None` while there is nothing to measure
    fn sample(&self) -> Option<f64>;
}

/// Rate limiter that samples a statistic at a fixed interval
///
/// Above `max_stat` the rate drops by `down_fraction`, below `min_stat` it
/// rises by `up_fraction`; `invert` swaps the two directions. Sampling
/// happens inside `acquire` under a lock, so concurrent callers never adjust
/// twice for the same interval.
pub struct AdaptiveRateLimiter {
    limiter: RateLimiter,
    stat: Arc<dyn StatSource>,
    config: AdaptiveConfig,
    last_check: Mutex<Instant>,
}

impl AdaptiveRateLimiter {
    pub fn new(limiter: RateLimiter, stat: Arc<dyn StatSource>, config: AdaptiveConfig) -> Self {
        Self { limiter, stat, config, last_check: Mutex::new(Instant::now()) }
    }

    pub fn rate(&self) -> f64 {
        self.limiter.rate()
    }

    pub async fn acquire(&self, permits: u32) {
        self.maybe_adjust(Instant::now());
        self.limiter.acquire(permits).await;
    }

    fn maybe_adjust(&self, now: Instant) {
        let mut last_check = lock(&self.last_check);
        if now.duration_since(*last_check) <= self.config.interval() {
            return;
        }
        *last_check = now;

        let Some(stat) = self.stat.sample() else {
            return;
        };
        let rate = self.limiter.rate();
        let (new_rate, direction) = if stat > self.config.max_stat {
            self.step(rate, !self.config.invert)
        } else if stat < self.config.min_stat {
            self.step(rate, self.config.invert)
        } else {
            return;
        };

        self.limiter.set_rate(new_rate);
        info!(
            stat = stat,
            max_stat = self.config.max_stat,
            min_stat = self.config.min_stat,
            old_rate = rate,
            new_rate = new_rate,
            "Adjusting rate {}",
            direction
        );
    }

    fn step(&self, rate: f64, down: bool) -> (f64, &'static str) {
        if down {
            (rate - rate * self.config.down_fraction, "down")
        } else {
            (rate + rate * self.config.up_fraction, "up")
        }
    }
}

#[async_trait]
impl Throttle for AdaptiveRateLimiter {
    async fn acquire(&self, permits: u32) {
        AdaptiveRateLimiter::acquire(self, permits).await
    }

    fn rate(&self) -> f64 {
        AdaptiveRateLimiter::rate(self)
    }
}

/// Default number of latencies kept by [`LatencyTracker`].
pub const DEFAULT_LATENCY_WINDOW: usize = 10_000;

/// Sliding window of request latencies; samples the 99.9th percentile in ms
pub struct LatencyTracker {
    window: Mutex<VecDeque<Duration>>,
    capacity: usize,
}

impl LatencyTracker {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { window: Mutex::new(VecDeque::with_capacity(capacity)), capacity }
    }

    pub fn record(&self, latency: Duration) {
        let mut window = lock(&self.window);
        if window.len() == self.capacity {
            window.pop_front();
        }
        window.push_back(latency);
    }

    /// Latency below which `quantile` of the window falls, in milliseconds
    pub fn percentile(&self, quantile: f64) -> Option<f64> {
        let mut sorted: Vec<Duration> = lock(&self.window).iter().copied().collect();
        if sorted.is_empty() {
            return None;
        }
        sorted.sort_unstable();
        let rank = ((sorted.len() as f64) * quantile).ceil() as usize;
        let index = rank.clamp(1, sorted.len()) - 1;
        Some(sorted[index].as_secs_f64() * 1000.0)
    }
}

impl Default for LatencyTracker {
    fn default() -> Self {
        Self::new(DEFAULT_LATENCY_WINDOW)
    }
}

impl StatSource for LatencyTracker {
    fn sample(&self) -> Option<f64> {
        self.percentile(0.999)
    }
}

/// Builds the job-wide throttle described by `config`
///
/// # Returns
///
/// The throttle, `None` when throttling is disabled, and the latency tracker
/// that feeds an adaptive limiter. Requests must be recorded into that
/// tracker for the adaptive limiter to move.
pub fn build_throttle(config: &RateConfig, progress_every: u64) -> Result<ThrottleParts> {
    let Some(rate) = config.rows_per_second else {
        return Ok((None, None));
    };
    let limiter = RateLimiter::new(rate)?.with_progress(progress_every);
    let parts: ThrottleParts = match &config.adaptive {
        Some(adaptive) => {
            let tracker = Arc::new(LatencyTracker::default());
            let stat: Arc<dyn StatSource> = tracker.clone();
            let throttle = AdaptiveRateLimiter::new(limiter, stat, adaptive.clone());
            (Some(Arc::new(throttle)), Some(tracker))
        },
        None => (Some(Arc::new(limiter)), None),
    };
    Ok(parts)
}

/// A job's throttle and the tracker feeding it, either possibly absent
pub type ThrottleParts = (Option<Arc<dyn Throttle>>, Option<Arc<LatencyTracker>>);
