//! Adaptive-burst token-bucket rate limiting for the HTTP Sender, built on `governor`.
//!
//! Built on `governor::RateLimiter::check_n`. The reservation contract is asymmetric by design: a
//! payload that merely exceeds the *current* delay sleeps and proceeds, but one that exceeds burst
//! capacity can never succeed without a bigger bucket, so we grow the bucket and bail out retryable
//! instead of burning a sleep on a request that's going to fail in the same way next time anyway.

use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use governor::clock::{Clock, DefaultClock};
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};

use crate::error::{ExceedsBurstSnafu, SendError};

const MAX_DOUBLINGS: u32 = 6;

type Limiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// A byte-budget token bucket whose burst capacity grows (up to 64x the configured rate) when a
/// payload is too large for the current bucket.
pub struct ByteRateLimiter {
    base_rate: NonZeroU32,
    clock: DefaultClock,
    limiter: ArcSwap<Limiter>,
    doublings: AtomicU32,
}

impl ByteRateLimiter {
    pub fn new(bytes_per_second: u32) -> Self {
        let base_rate = NonZeroU32::new(bytes_per_second).unwrap_or_else(|| NonZeroU32::new(1).unwrap());
        let clock = DefaultClock::default();
        let limiter = RateLimiter::direct_with_clock(Quota::per_second(base_rate), &clock);
        ByteRateLimiter {
            base_rate,
            clock,
            limiter: ArcSwap::from_pointee(limiter),
            doublings: AtomicU32::new(0),
        }
    }

    /// Reserves `len` bytes worth of tokens. On success, sleeps out any reservation delay before
    /// returning `Ok`. On burst overflow, widens the bucket (up to the doubling ceiling) and
    /// returns `Err(SendError::ExceedsBurst)` without sleeping, so the caller can surface a
    /// retryable failure immediately.
    pub async fn acquire(&self, len: usize) -> Result<(), SendError> {
        let n = NonZeroU32::new(len.min(u32::MAX as usize) as u32).unwrap_or_else(|| NonZeroU32::new(1).unwrap());

        let limiter = self.limiter.load();
        match limiter.check_n(n) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(not_until)) => {
                let wait = not_until.wait_time_from(self.clock.now());
                if !wait.is_zero() {
                    tokio::time::sleep(wait).await;
                }
                Ok(())
            }
            Err(_insufficient_capacity) => {
                self.widen_burst();
                ExceedsBurstSnafu { len }.fail()
            }
        }
    }

    fn widen_burst(&self) {
        let current = self.doublings.load(Ordering::SeqCst);
        if current >= MAX_DOUBLINGS {
            return;
        }
        let multiplier = 1u32 << (current + 1);
        let new_burst = self.base_rate.get().saturating_mul(multiplier);
        let Some(new_burst) = NonZeroU32::new(new_burst) else {
            return;
        };
        let quota = Quota::per_second(self.base_rate).allow_burst(new_burst);
        self.limiter
            .store(Arc::new(RateLimiter::direct_with_clock(quota, &self.clock)));
        self.doublings.store(current + 1, Ordering::SeqCst);
    }

    #[cfg(test)]
    fn doublings(&self) -> u32 {
        self.doublings.load(Ordering::SeqCst)
    }
}
