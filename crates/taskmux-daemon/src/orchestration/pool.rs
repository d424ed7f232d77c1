//! Semaphore-based admission pool for orchestrated tasks.
//!
//! The [`AdmissionPool`] bounds how many queries run at once. It issues
//! permits via a Tokio semaphore and tracks the number of permits in flight,
//! including the highest count ever observed.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info};

/// A permit granting the right to run one query.
///
/// When dropped, the permit is automatically returned to the pool.
pub struct AdmissionPermit {
    _permit: OwnedSemaphorePermit,
    counters: Arc<Counters>,
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        self.counters.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

#[derive(Default)]
struct Counters {
    in_flight: AtomicUsize,
    high_water: AtomicUsize,
}

/// Counting admission control of a fixed size.
pub struct AdmissionPool {
    semaphore: Arc<Semaphore>,
    limit: usize,
    counters: Arc<Counters>,
}

impl AdmissionPool {
    /// Create a pool admitting at most `limit` queries at once.
    ///
    /// A limit of zero is raised to one.
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        info!(limit, "AdmissionPool created");
        Self {
            semaphore: Arc::new(Semaphore::new(limit)),
            limit,
            counters: Arc::new(Counters::default()),
        }
    }

    /// Acquire a permit, waiting until one becomes available.
    #[allow(clippy::expect_used)]
    pub async fn acquire(&self) -> AdmissionPermit {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .expect("admission semaphore is never closed");
        let now = self.counters.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        self.counters.high_water.fetch_max(now, Ordering::AcqRel);
        debug!(in_flight = now, limit = self.limit, "Query admitted");
        AdmissionPermit {
            _permit: permit,
            counters: Arc::clone(&self.counters),
        }
    }

    /// Maximum concurrency limit.
    pub const fn limit(&self) -> usize {
        self.limit
    }

    /// Permits currently held.
    pub fn in_flight(&self) -> usize {
        self.counters.in_flight.load(Ordering::Acquire)
    }

    /// Most permits ever held at the same time.
    pub fn high_water_mark(&self) -> usize {
        self.counters.high_water.load(Ordering::Acquire)
    }
}
