//! Token-bucket rate limiter gating outbound tool invocations.
//!
//! Refill and consumption happen under one lock so concurrent callers can
//! never drain more than the bucket holds. State is in-memory only.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

const EPSILON: f64 = 1e-9;

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_update: Instant,
}

impl Bucket {
    /// Add `elapsed * rate` tokens, capped at `burst`.
    fn refill(&mut self, now: Instant, rate: f64, burst: f64) {
        let elapsed = now.saturating_duration_since(self.last_update).as_secs_f64();
        self.tokens = (self.tokens + elapsed * rate).min(burst);
        if now > self.last_update {
            self.last_update = now;
        }
    }
}

#[derive(Debug)]
pub struct RateLimiter {
    rate: f64,
    burst: f64,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    /// A full bucket of `burst` tokens refilled at `rate` tokens per second.
    pub fn new(rate: f64, burst: u32) -> Self {
        Self::starting_at(rate, burst, Instant::now())
    }

    /// Like [`new`](Self::new) with an explicit clock origin, for deterministic tests.
    pub fn starting_at(rate: f64, burst: u32, now: Instant) -> Self {
        let burst = f64::from(burst);
        Self {
            rate,
            burst,
            bucket: Mutex::new(Bucket {
                tokens: burst,
                last_update: now,
            }),
        }
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn burst(&self) -> u32 {
        self.burst as u32
    }

    fn bucket(&self) -> MutexGuard<'_, Bucket> {
        self.bucket.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take `n` tokens if available.
    pub fn acquire(&self, n: u32) -> bool {
        self.try_acquire_at(n, Instant::now()).is_ok()
    }

    pub fn acquire_at(&self, n: u32, now: Instant) -> bool {
        self.try_acquire_at(n, now).is_ok()
    }

    /// Take `n` tokens, or report how long until `n` would be available.
    /// Refill, check and decrement form one critical section. A request
    /// larger than `burst` can never be granted and reports `Duration::MAX`.
    pub fn try_acquire_at(&self, n: u32, now: Instant) -> Result<(), Duration> {
        let needed = f64::from(n);
        if needed > self.burst {
            return Err(Duration::MAX);
        }
        let mut bucket = self.bucket();
        bucket.refill(now, self.rate, self.burst);
        if bucket.tokens + EPSILON >= needed {
            bucket.tokens = (bucket.tokens - needed).max(0.0);
            Ok(())
        } else {
            Err(self.shortfall_wait(needed - bucket.tokens))
        }
    }

    /// Time until `n` tokens are available; zero when they are available now.
    /// Does not consume anything.
    pub fn wait_time(&self, n: u32) -> Duration {
        self.wait_time_at(n, Instant::now())
    }

    pub fn wait_time_at(&self, n: u32, now: Instant) -> Duration {
        let needed = f64::from(n);
        if needed > self.burst {
            return Duration::MAX;
        }
        let mut bucket = self.bucket();
        bucket.refill(now, self.rate, self.burst);
        if bucket.tokens + EPSILON >= needed {
            Duration::ZERO
        } else {
            self.shortfall_wait(needed - bucket.tokens)
        }
    }

    /// Tokens currently in the bucket after refilling up to `now`.
    pub fn available_at(&self, now: Instant) -> f64 {
        let mut bucket = self.bucket();
        bucket.refill(now, self.rate, self.burst);
        bucket.tokens
    }

    pub fn available(&self) -> f64 {
        self.available_at(Instant::now())
    }

    fn shortfall_wait(&self, shortfall: f64) -> Duration {
        Duration::from_secs_f64((shortfall / self.rate).max(0.0))
    }
}
