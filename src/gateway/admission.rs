use tokio::time::Instant;
use tracing::trace;

use super::{Gateway, SessionHandle};
use crate::{
    analytics::Phase,
    limiters::{ConcurrencySlot, LimiterKind, RateLimitError},
};

/// Tokens one frame costs in the client's bucket.
pub const FRAME_COST: u32 = 1;

// -----------------------------------------------------------------------------
// ----- AdmissionDecision -----------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionReason {
    FrameRate,
    Bandwidth,
    Concurrency,
    Passed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionDecision {
    pub allowed: bool,
    pub reason: AdmissionReason,
}

impl AdmissionReason {
    pub fn as_str(self) -> &'static str {
        match self {
            AdmissionReason::FrameRate => "frame_rate",
            AdmissionReason::Bandwidth => "bandwidth",
            AdmissionReason::Concurrency => "concurrency",
            AdmissionReason::Passed => "passed",
        }
    }
}

impl AdmissionDecision {
    pub fn passed() -> Self {
        Self {
            allowed: true,
            reason: AdmissionReason::Passed,
        }
    }

    pub fn rejected(reason: AdmissionReason) -> Self {
        Self {
            allowed: false,
            reason,
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Gateway: Admission ----------------------------------------------------

impl Gateway {
    /// Take a connection slot, waiting up to `admission_timeout`. The slot is
    /// returned to the pool when dropped.
    pub async fn admit_connection(&self) -> Result<ConcurrencySlot, AdmissionDecision> {
        let wait = self.config.snapshot().admission_timeout;
        let slot = self.concurrency.acquire_slot(wait).await;
        self.metrics.admission(LimiterKind::Concurrency, slot.is_some());

        slot.ok_or(AdmissionDecision::rejected(AdmissionReason::Concurrency))
    }

    /// [`Gateway::check_admission`] for a registered session. `None` once the
    /// session has been removed; nothing is reserved for it then.
    pub fn admit_frame(
        &self,
        handle: &SessionHandle,
    ) -> Option<Result<AdmissionDecision, RateLimitError>> {
        self.registry
            .while_current(handle, || self.check_admission(handle.client_id()))
    }

    /// Gate one frame: frame rate first, so a frame that is over rate never
    /// touches the bandwidth pool, then bandwidth at the client's current
    /// profile bitrate.
    pub fn check_admission(&self, client_id: &str) -> Result<AdmissionDecision, RateLimitError> {
        let started = Instant::now();
        let decision = self.decide(client_id)?;
        self.metrics.latency(Phase::Admission, started.elapsed());

        if !decision.allowed {
            trace!(client_id, reason = decision.reason.as_str(), "frame not admitted");
        }
        Ok(decision)
    }

    fn decide(&self, client_id: &str) -> Result<AdmissionDecision, RateLimitError> {
        let within_rate = self.rate.consume(client_id, FRAME_COST)?;
        self.metrics.admission(LimiterKind::FrameRate, within_rate);
        if !within_rate {
            return Ok(AdmissionDecision::rejected(AdmissionReason::FrameRate));
        }

        let required_bps = self.quality.profile(client_id).estimated_bps();
        let within_bandwidth = self.bandwidth.allocate(client_id, required_bps);
        self.metrics.admission(LimiterKind::Bandwidth, within_bandwidth);
        if !within_bandwidth {
            return Ok(AdmissionDecision::rejected(AdmissionReason::Bandwidth));
        }

        Ok(AdmissionDecision::passed())
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::tests::gateway_with;

    #[tokio::test]
    async fn rate_is_checked_before_bandwidth() {
        let gateway = gateway_with(|l| {
            l.max_fps = 2;
            l.max_bandwidth_mbps = 10.0;
        });

        assert_eq!(gateway.check_admission("cam").unwrap(), AdmissionDecision::passed());
        assert_eq!(gateway.check_admission("cam").unwrap(), AdmissionDecision::passed());

        let third = gateway.check_admission("cam").unwrap();
        assert_eq!(third, AdmissionDecision::rejected(AdmissionReason::FrameRate));
        // the reservation from the admitted frames is untouched
        assert_eq!(gateway.bandwidth.reservation("cam"), Some(4_000_000));
    }

    #[tokio::test]
    async fn bandwidth_rejects_when_pool_is_full() {
        let gateway = gateway_with(|l| l.max_bandwidth_mbps = 6.0);

        assert!(gateway.check_admission("a").unwrap().allowed);
        let b = gateway.check_admission("b").unwrap();
        assert_eq!(b, AdmissionDecision::rejected(AdmissionReason::Bandwidth));
        assert_eq!(gateway.bandwidth.reservation("b"), None);

        // a smaller profile fits in the remaining 2 Mbps
        gateway.quality.force_downgrade("b", 3);
        assert!(gateway.check_admission("b").unwrap().allowed);
    }

    #[tokio::test]
    async fn removed_session_reserves_nothing() {
        let gateway = gateway_with(|_| {});
        let (handle, _closer) = gateway.registry.register("cam").unwrap();

        assert!(gateway.admit_frame(&handle).unwrap().unwrap().allowed);
        assert_eq!(gateway.bandwidth.reservation("cam"), Some(4_000_000));

        assert_eq!(gateway.shutdown(), 1);
        assert_eq!(gateway.bandwidth.used(), 0);

        assert!(gateway.admit_frame(&handle).is_none());
        assert_eq!(gateway.bandwidth.used(), 0);
    }

    #[tokio::test]
    async fn full_server_rejects_with_concurrency() {
        let gateway = gateway_with(|l| {
            l.max_concurrent_streams = 1;
            l.admission_timeout = std::time::Duration::from_millis(20);
        });

        let slot = gateway.admit_connection().await.unwrap();
        let refused = gateway.admit_connection().await.unwrap_err();
        assert_eq!(refused, AdmissionDecision::rejected(AdmissionReason::Concurrency));
        assert_eq!(refused.reason.as_str(), "concurrency");

        drop(slot);
        assert!(gateway.admit_connection().await.is_ok());
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
