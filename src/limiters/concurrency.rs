use parking_lot::Mutex;
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::Notify,
    time::{Instant, sleep_until},
};
use tracing::warn;

use crate::config::ConfigHandle;

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

/// Hard ceiling on simultaneous sessions, whatever the config says.
pub const CONCURRENCY_SAFETY_CEILING: usize = 5000;

/// Waiters also re-check on this cadence so a raised limit is picked up
/// without a release.
const RECHECK_INTERVAL: Duration = Duration::from_millis(10);

// -----------------------------------------------------------------------------
// ----- ConcurrencyLimiter ----------------------------------------------------

#[derive(Debug)]
pub struct ConcurrencyLimiter {
    config: ConfigHandle,
    current: Mutex<usize>,
    released: Notify,
}

// -----------------------------------------------------------------------------
// ----- ConcurrencyLimiter: Static --------------------------------------------

impl ConcurrencyLimiter {
    pub fn new(config: ConfigHandle) -> Self {
        Self {
            config,
            current: Mutex::new(0),
            released: Notify::new(),
        }
    }
}

// -----------------------------------------------------------------------------
// ----- ConcurrencyLimiter: Public --------------------------------------------

impl ConcurrencyLimiter {
    /// Take a slot, waiting up to `timeout` for one to free up.
    pub async fn acquire(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;

        loop {
            // Register interest before checking so a release in between is not lost.
            let notified = self.released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.try_acquire() {
                return true;
            }

            let now = Instant::now();
            if now >= deadline {
                return false;
            }

            let wake_at = (now + RECHECK_INTERVAL).min(deadline);
            tokio::select! {
                _ = &mut notified => {}
                _ = sleep_until(wake_at) => {}
            }
        }
    }

    pub fn try_acquire(&self) -> bool {
        let max = self.max_concurrent();
        let mut current = self.current.lock();

        if *current < max {
            *current += 1;
            true
        } else {
            false
        }
    }

    pub fn release(&self) {
        {
            let mut current = self.current.lock();
            if *current == 0 {
                warn!("concurrency release without a matching acquire; ignored");
                return;
            }
            *current -= 1;
        }

        self.released.notify_one();
    }

    /// RAII variant of [`Self::acquire`]: the slot is released when the guard drops.
    pub async fn acquire_slot(self: &Arc<Self>, timeout: Duration) -> Option<ConcurrencySlot> {
        if self.acquire(timeout).await {
            Some(ConcurrencySlot {
                limiter: self.clone(),
            })
        } else {
            None
        }
    }

    pub fn current(&self) -> usize {
        *self.current.lock()
    }

    pub fn max_concurrent(&self) -> usize {
        self.config
            .snapshot()
            .max_concurrent_streams
            .min(CONCURRENCY_SAFETY_CEILING)
    }
}

// -----------------------------------------------------------------------------
// ----- ConcurrencySlot -------------------------------------------------------

#[derive(Debug)]
pub struct ConcurrencySlot {
    limiter: Arc<ConcurrencyLimiter>,
}

impl Drop for ConcurrencySlot {
    fn drop(&mut self) {
        self.limiter.release();
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
