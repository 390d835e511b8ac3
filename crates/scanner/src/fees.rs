//! Rolling-window fee smoothing.

use crate::FeePolicy;
use alloy_primitives::U256;
use std::{
    collections::VecDeque,
    sync::atomic::{AtomicU64, Ordering},
};
use tokio::sync::Mutex;

/// Rolling-window smoothing of observed network fees.
///
/// The window is a fixed-capacity FIFO of the most recent observations.
/// Nothing is reported until the window is full, and a computed value is
/// handed out for reporting only when it differs from the last value
/// reported; the scan loop asks via [`Self::take_report`] and owns the
/// actual delivery.
#[derive(Debug)]
pub struct FeeAggregator {
    policy: FeePolicy,
    resolution: U256,
    capacity: usize,
    window: Mutex<VecDeque<U256>>,
    last_reported: Mutex<Option<U256>>,
    tx_size: AtomicU64,
}

impl FeeAggregator {
    /// Creates a new aggregator.
    pub fn new(policy: FeePolicy, resolution: U256, capacity: usize) -> Self {
        Self {
            policy,
            resolution,
            capacity,
            window: Mutex::new(VecDeque::with_capacity(capacity)),
            last_reported: Mutex::new(None),
            tx_size: AtomicU64::new(0),
        }
    }

    /// Records one fee observation, evicting the oldest once the window is
    /// at capacity. Under [`FeePolicy::Statistical`] the observation is
    /// rounded up to the configured resolution first.
    pub async fn record(&self, rate: U256) {
        let rate = match self.policy {
            FeePolicy::Statistical => self.round_up(rate),
            FeePolicy::Mean => rate,
        };
        let mut window = self.window.lock().await;
        if window.len() == self.capacity {
            window.pop_front();
        }
        window.push_back(rate);
    }

    /// Records the latest observed typical transaction size.
    pub fn set_tx_size(&self, size: u64) {
        self.tx_size.store(size, Ordering::Relaxed);
    }

    /// The latest observed typical transaction size.
    pub fn tx_size(&self) -> u64 {
        self.tx_size.load(Ordering::Relaxed)
    }

    /// The smoothed fee over the current window, or `None` until the
    /// window is full.
    pub async fn current_fee(&self) -> Option<U256> {
        let window = self.window.lock().await;
        if window.len() < self.capacity {
            return None;
        }
        let n = U256::from(window.len());
        let sum = window.iter().fold(U256::ZERO, |acc, v| acc + *v);
        let mean = sum / n;
        match self.policy {
            FeePolicy::Mean => Some(mean),
            FeePolicy::Statistical => {
                let var_sum = window.iter().fold(U256::ZERO, |acc, v| {
                    let d = if *v > mean { *v - mean } else { mean - *v };
                    acc + d * d
                });
                let stddev = (var_sum / n).root(2);
                Some(mean + U256::from(3u64) * stddev)
            }
        }
    }

    /// Returns the fee to report now, or `None` when there is nothing new
    /// to say: the window is not full yet, the value is zero, or it equals
    /// the last reported value (unless `force`, the heartbeat path).
    pub async fn take_report(&self, force: bool) -> Option<U256> {
        let fee = self.current_fee().await?;
        if fee.is_zero() {
            return None;
        }
        let mut last = self.last_reported.lock().await;
        if !force && *last == Some(fee) {
            return None;
        }
        *last = Some(fee);
        Some(fee)
    }

    /// The fee the network should currently be assuming: the last reported
    /// value, falling back to the current window computation.
    pub async fn baseline(&self) -> Option<U256> {
        let last = *self.last_reported.lock().await;
        match last {
            Some(fee) => Some(fee),
            None => self.current_fee().await,
        }
    }

    fn round_up(&self, rate: U256) -> U256 {
        if self.resolution <= U256::from(1u64) || rate.is_zero() {
            return rate;
        }
        let (quotient, remainder) = rate.div_rem(self.resolution);
        if remainder.is_zero() {
            rate
        } else {
            (quotient + U256::from(1u64)) * self.resolution
        }
    }
}
