//! Process-wide admission control for outbound calls
//!
//! One [`AdmissionLimiter`] is shared by every platform and user. It bounds
//! the number of calls in flight and enforces a minimum spacing between call
//! starts. Admission is serialized internally, so callers need no locking.

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::num::NonZeroU32;
use std::time::Duration;
use tokio::sync::{Semaphore, SemaphorePermit};

use crate::config::HttpConfig;
use crate::error::HttpError;

pub struct AdmissionLimiter {
    slots: Semaphore,
    max_concurrent: usize,
    spacing: Option<DefaultDirectRateLimiter>,
}

impl AdmissionLimiter {
    /// Create a limiter allowing `max_concurrent` calls in flight with at
    /// least `min_spacing` between starts (zero disables spacing)
    pub fn new(max_concurrent: usize, min_spacing: Duration) -> Self {
        let max_concurrent = max_concurrent.max(1);
        let spacing = Quota::with_period(min_spacing)
            .map(|quota| RateLimiter::direct(quota.allow_burst(NonZeroU32::MIN)));

        Self {
            slots: Semaphore::new(max_concurrent),
            max_concurrent,
            spacing,
        }
    }

    pub fn from_config(config: &HttpConfig) -> Self {
        Self::new(config.max_concurrent, config.min_spacing())
    }

    /// Wait for a free slot and the next spacing cell
    ///
    /// The returned permit holds the slot until dropped.
    pub async fn admit(&self) -> Result<SemaphorePermit<'_>, HttpError> {
        let permit = self
            .slots
            .acquire()
            .await
            .map_err(|_| HttpError::AdmissionClosed)?;

        if let Some(spacing) = &self.spacing {
            spacing.until_ready().await;
        }

        Ok(permit)
    }

    /// Slots currently free
    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }
}

impl std::fmt::Debug for AdmissionLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionLimiter")
            .field("max_concurrent", &self.max_concurrent)
            .field("available", &self.available())
            .field("spacing", &self.spacing.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::time::Instant;

    #[tokio::test]
    async fn test_bounds_in_flight_calls() {
        let limiter = Arc::new(AdmissionLimiter::new(2, Duration::ZERO));
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..6)
            .map(|_| {
                let limiter = limiter.clone();
                let in_flight = in_flight.clone();
                let peak = peak.clone();
                tokio::spawn(async move {
                    let _permit = limiter.admit().await.unwrap();
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();

        for task in tasks {
            task.await.unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(limiter.available(), 2);
    }

    #[tokio::test]
    async fn test_enforces_start_spacing() {
        let limiter = AdmissionLimiter::new(8, Duration::from_millis(40));
        let started = Instant::now();

        for _ in 0..3 {
            let _permit = limiter.admit().await.unwrap();
        }

        // First start is immediate, the next two wait one period each
        assert!(started.elapsed() >= Duration::from_millis(75));
    }

    #[tokio::test]
    async fn test_zero_spacing_disables_spacing() {
        let limiter = AdmissionLimiter::new(4, Duration::ZERO);
        let started = Instant::now();
        for _ in 0..10 {
            let _permit = limiter.admit().await.unwrap();
        }
        assert!(started.elapsed() < Duration::from_millis(50));
    }

    #[test]
    fn test_zero_concurrency_is_clamped() {
        let limiter = AdmissionLimiter::new(0, Duration::ZERO);
        assert_eq!(limiter.max_concurrent(), 1);
    }
}
