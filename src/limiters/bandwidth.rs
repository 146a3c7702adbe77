use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::trace;

use crate::config::ConfigHandle;

// -----------------------------------------------------------------------------
// ----- BandwidthAllocator ----------------------------------------------------

/// Global byte-rate pool with one reservation per client.
///
/// The admission decision compares against the global total, so every mutation
/// goes through the single pool lock. The ceiling is read from config on every
/// call; lowering it never evicts existing reservations, it only makes further
/// growth fail.
#[derive(Debug)]
pub struct BandwidthAllocator {
    config: ConfigHandle,
    pool: Mutex<BandwidthPool>,
}

#[derive(Debug, Default)]
struct BandwidthPool {
    used_bps: u64,
    reservations: HashMap<String, u64>,
}

// -----------------------------------------------------------------------------
// ----- BandwidthAllocator: Static --------------------------------------------

impl BandwidthAllocator {
    pub fn new(config: ConfigHandle) -> Self {
        Self {
            config,
            pool: Mutex::new(BandwidthPool::default()),
        }
    }
}

// -----------------------------------------------------------------------------
// ----- BandwidthAllocator: Public --------------------------------------------

impl BandwidthAllocator {
    /// Replace the client's reservation with `required_bps` if the new global
    /// total fits under the ceiling. On failure nothing changes.
    pub fn allocate(&self, client_id: &str, required_bps: u64) -> bool {
        let max_bps = self.max_bps();
        let mut pool = self.pool.lock();

        let prior = pool.reservations.get(client_id).copied().unwrap_or(0);
        let Some(next_total) = (pool.used_bps - prior).checked_add(required_bps) else {
            return false;
        };

        if next_total > max_bps {
            trace!(client_id, required_bps, next_total, max_bps, "bandwidth allocation refused");
            return false;
        }

        pool.used_bps = next_total;
        pool.reservations.insert(client_id.to_string(), required_bps);
        true
    }

    /// Drop the client's reservation, returning how much was released.
    pub fn release(&self, client_id: &str) -> Option<u64> {
        let mut pool = self.pool.lock();
        let released = pool.reservations.remove(client_id)?;
        pool.used_bps -= released;
        Some(released)
    }

    /// Headroom under the current ceiling; zero when over-committed after a
    /// ceiling decrease.
    pub fn available(&self) -> u64 {
        let max_bps = self.max_bps();
        let pool = self.pool.lock();
        max_bps.saturating_sub(pool.used_bps)
    }

    pub fn used(&self) -> u64 {
        self.pool.lock().used_bps
    }

    pub fn reservation(&self, client_id: &str) -> Option<u64> {
        self.pool.lock().reservations.get(client_id).copied()
    }

    pub fn max_bps(&self) -> u64 {
        self.config.snapshot().max_bps()
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    fn allocator(max_mbps: f64) -> (ConfigHandle, BandwidthAllocator) {
        let config = ConfigHandle::default();
        config.update(|l| l.max_bandwidth_mbps = max_mbps);
        let allocator = BandwidthAllocator::new(config.clone());
        (config, allocator)
    }

    impl BandwidthAllocator {
        fn sum_of_reservations(&self) -> u64 {
            self.pool.lock().reservations.values().sum()
        }
    }

    #[test]
    fn second_client_fits_only_after_first_releases() {
        let (_, bw) = allocator(10.0);

        assert!(bw.allocate("a", 6_000_000));
        assert!(!bw.allocate("b", 5_000_000));
        assert_eq!(bw.used(), 6_000_000);
        assert_eq!(bw.reservation("b"), None);

        assert_eq!(bw.release("a"), Some(6_000_000));
        assert!(bw.allocate("b", 5_000_000));
        assert_eq!(bw.used(), 5_000_000);
        assert_eq!(bw.available(), 5_000_000);
    }

    #[test]
    fn reallocation_replaces_prior_reservation() {
        let (_, bw) = allocator(10.0);

        assert!(bw.allocate("a", 8_000_000));
        // 8M -> 10M only needs 2M more
        assert!(bw.allocate("a", 10_000_000));
        assert!(!bw.allocate("a", 10_000_001));
        assert_eq!(bw.reservation("a"), Some(10_000_000));

        assert!(bw.allocate("a", 1_000_000));
        assert_eq!(bw.used(), 1_000_000);
    }

    #[test]
    fn release_of_unknown_client_is_noop() {
        let (_, bw) = allocator(10.0);
        assert_eq!(bw.release("nobody"), None);
        assert_eq!(bw.used(), 0);
    }

    #[test]
    fn ceiling_is_read_live() {
        let (config, bw) = allocator(10.0);
        assert!(bw.allocate("a", 8_000_000));

        config.update(|l| l.max_bandwidth_mbps = 5.0);
        assert_eq!(bw.available(), 0);
        assert!(!bw.allocate("b", 1));
        // reservations are kept; release still balances the pool
        assert_eq!(bw.release("a"), Some(8_000_000));
        assert!(bw.allocate("b", 5_000_000));

        config.update(|l| l.max_bandwidth_mbps = 20.0);
        assert!(bw.allocate("c", 15_000_000));
    }

    #[test]
    fn random_sequences_keep_pool_consistent() {
        let (_, bw) = allocator(10.0);
        let mut rng = rand::rng();
        let clients = ["a", "b", "c", "d", "e"];

        for _ in 0..5_000 {
            let client = clients[rng.random_range(0..clients.len())];
            if rng.random_bool(0.7) {
                bw.allocate(client, rng.random_range(0..6_000_000));
            } else {
                bw.release(client);
            }

            assert!(bw.used() <= bw.max_bps());
            assert_eq!(bw.used(), bw.sum_of_reservations());
        }
    }

    #[test]
    fn concurrent_allocations_never_overcommit() {
        let (_, bw) = allocator(10.0);
        let bw = std::sync::Arc::new(bw);

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let bw = bw.clone();
                std::thread::spawn(move || bw.allocate(&format!("c{i}"), 3_000_000))
            })
            .collect();

        let granted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();

        assert_eq!(granted, 3);
        assert_eq!(bw.used(), 9_000_000);
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
