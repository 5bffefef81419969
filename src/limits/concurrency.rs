//! Bulkhead: a counting gate on in-flight requests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::lifecycle::Cancelled;

/// Caps concurrently held slots at `capacity`.
#[derive(Debug)]
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl ConcurrencyLimiter {
    /// `capacity` is clamped to at least 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    /// Wait for a free slot. No ordering guarantee between waiters.
    pub async fn acquire(
        self: &Arc<Self>,
        cancel: &CancellationToken,
    ) -> Result<ConcurrencySlot, Cancelled> {
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Cancelled),
            permit = Arc::clone(&self.semaphore).acquire_owned() => permit.map_err(|_| Cancelled)?,
        };

        let now = self.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        self.peak.fetch_max(now, Ordering::AcqRel);
        Ok(ConcurrencySlot {
            limiter: Arc::clone(self),
            _permit: permit,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Highest number of simultaneously held slots seen so far.
    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::Acquire)
    }
}

/// A held slot; released on drop.
#[derive(Debug)]
pub struct ConcurrencySlot {
    limiter: Arc<ConcurrencyLimiter>,
    _permit: OwnedSemaphorePermit,
}

impl Drop for ConcurrencySlot {
    fn drop(&mut self) {
        self.limiter.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_never_exceeds_capacity() {
        let limiter = Arc::new(ConcurrencyLimiter::new(10));
        let cancel = CancellationToken::new();

        let mut handles = Vec::new();
        for _ in 0..100 {
            let limiter = Arc::clone(&limiter);
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                let _slot = limiter.acquire(&cancel).await.unwrap();
                assert!(limiter.in_flight() <= 10);
                tokio::time::sleep(Duration::from_millis(5)).await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(limiter.in_flight(), 0);
        assert!(limiter.peak_in_flight() <= 10);
        assert!(limiter.peak_in_flight() > 1);
    }

    #[tokio::test]
    async fn test_cancel_while_waiting() {
        let limiter = Arc::new(ConcurrencyLimiter::new(1));
        let cancel = CancellationToken::new();
        let held = limiter.acquire(&cancel).await.unwrap();

        cancel.cancel();
        assert_eq!(limiter.acquire(&cancel).await.unwrap_err(), Cancelled);

        drop(held);
        assert_eq!(limiter.in_flight(), 0);
    }

    #[test]
    fn test_zero_capacity_clamped() {
        assert_eq!(ConcurrencyLimiter::new(0).capacity(), 1);
    }
}
