//! GPU resource pool.
//!
//! A bounded admission primitive with capacity `G` (`gpu_semaphore`). GPU
//! class detectors hold one permit each; CPU and io-class work bypasses the
//! pool. Tokio's semaphore queues waiters in FIFO order, acquisition is
//! cancel-safe, and the owned permit releases on every exit path, panics
//! included.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::trace;

/// One held admission slot. Dropping it returns the slot to the pool.
#[derive(Debug)]
pub struct GpuPermit {
    _permit: OwnedSemaphorePermit,
}

/// Bounded-concurrency admission for GPU-using detectors.
#[derive(Debug, Clone)]
pub struct GpuPool {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl GpuPool {
    /// Create a pool with capacity `G`.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Acquire one permit, waiting FIFO behind earlier requesters.
    pub async fn acquire(&self) -> GpuPermit {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .expect("gpu pool semaphore closed");
        trace!(available = self.semaphore.available_permits(), "gpu permit acquired");
        GpuPermit { _permit: permit }
    }

    /// Configured capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Permits currently available.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn capacity_bounds_concurrency() {
        let pool = GpuPool::new(2);
        let p1 = pool.acquire().await;
        let _p2 = pool.acquire().await;
        assert_eq!(pool.available(), 0);

        // Third acquire waits until a permit is released.
        let pool_clone = pool.clone();
        let waiter = tokio::spawn(async move {
            let _p3 = pool_clone.acquire().await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(p1);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should acquire after release")
            .unwrap();
    }

    #[tokio::test]
    async fn permit_released_on_panic() {
        let pool = GpuPool::new(1);

        let pool_clone = pool.clone();
        let handle = tokio::spawn(async move {
            let _permit = pool_clone.acquire().await;
            panic!("detector fault");
        });
        assert!(handle.await.is_err());

        // The faulting task leaked nothing: full capacity is back.
        assert_eq!(pool.available(), 1);
        let _p = tokio::time::timeout(Duration::from_secs(1), pool.acquire())
            .await
            .expect("pool must be usable after a panic");
    }

    #[tokio::test]
    async fn cancelled_waiter_does_not_leak() {
        let pool = GpuPool::new(1);
        let held = pool.acquire().await;

        let pool_clone = pool.clone();
        let waiter = tokio::spawn(async move {
            let _p = pool_clone.acquire().await;
            tokio::time::sleep(Duration::from_secs(10)).await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        waiter.abort();
        let _ = waiter.await;

        drop(held);
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let pool = GpuPool::new(0);
        assert_eq!(pool.capacity(), 1);
    }
}
