pub mod admission;
pub mod maintenance;
pub mod registry;
pub mod session;

pub use admission::{AdmissionDecision, AdmissionReason, FRAME_COST};
pub use maintenance::MaintenanceHandles;
pub use registry::{CloseReason, RegistryError, SessionHandle, SessionRegistry};
pub use session::{SessionEnd, SessionOutcome};

use std::sync::Arc;

use crate::{
    analytics::MetricsSink,
    auth::Authenticator,
    config::ConfigHandle,
    inference::PipelineRegistry,
    limiters::{BandwidthAllocator, ConcurrencyLimiter, RateLimiter},
    quality::QualityController,
};

// -----------------------------------------------------------------------------
// ----- Gateway ---------------------------------------------------------------

/// Composition root: owns the limiters, the quality controller and the live
/// session registry, and drives sessions over any [`crate::transport::Transport`].
pub struct Gateway {
    config: ConfigHandle,
    authenticator: Arc<dyn Authenticator>,
    pipelines: Arc<PipelineRegistry>,
    metrics: Arc<dyn MetricsSink>,

    rate: RateLimiter,
    bandwidth: BandwidthAllocator,
    concurrency: Arc<ConcurrencyLimiter>,
    quality: QualityController,
    registry: SessionRegistry,
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("live_sessions", &self.registry.len())
            .field("bandwidth_used", &self.bandwidth.used())
            .field("concurrency", &self.concurrency.current())
            .finish()
    }
}

// -----------------------------------------------------------------------------
// ----- Gateway: Static -------------------------------------------------------

impl Gateway {
    pub fn new(
        config: ConfigHandle,
        authenticator: Arc<dyn Authenticator>,
        pipelines: Arc<PipelineRegistry>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Arc<Self> {
        Arc::new(Self {
            rate: RateLimiter::new(config.clone()),
            bandwidth: BandwidthAllocator::new(config.clone()),
            concurrency: Arc::new(ConcurrencyLimiter::new(config.clone())),
            quality: QualityController::new(metrics.clone()),
            registry: SessionRegistry::new(),
            config,
            authenticator,
            pipelines,
            metrics,
        })
    }
}

// -----------------------------------------------------------------------------
// ----- Gateway: Public -------------------------------------------------------

impl Gateway {
    pub fn config(&self) -> &ConfigHandle {
        &self.config
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate
    }

    pub fn bandwidth(&self) -> &BandwidthAllocator {
        &self.bandwidth
    }

    pub fn concurrency(&self) -> &ConcurrencyLimiter {
        &self.concurrency
    }

    pub fn quality(&self) -> &QualityController {
        &self.quality
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn pipelines(&self) -> &PipelineRegistry {
        &self.pipelines
    }

    pub fn live_sessions(&self) -> usize {
        self.registry.len()
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{
        analytics::NoopMetrics,
        auth::{AuthError, Identity},
        config::Limits,
    };
    use async_trait::async_trait;

    /// Accepts any token and uses it as the client id.
    pub(crate) struct TokenIsId;

    #[async_trait]
    impl Authenticator for TokenIsId {
        async fn authenticate(&self, credential: &str) -> Result<Identity, AuthError> {
            if credential.is_empty() {
                return Err(AuthError::UnknownToken);
            }
            Ok(Identity::new(credential))
        }
    }

    pub(crate) fn gateway_with(f: impl FnOnce(&mut Limits)) -> Arc<Gateway> {
        let config = ConfigHandle::default();
        config.update(f);
        Gateway::new(
            config,
            Arc::new(TokenIsId),
            Arc::new(PipelineRegistry::with_mock()),
            Arc::new(NoopMetrics),
        )
    }

    #[test]
    fn components_share_the_config_handle() {
        let gateway = gateway_with(|l| l.max_concurrent_streams = 7);
        assert_eq!(gateway.concurrency().max_concurrent(), 7);

        gateway.config().update(|l| l.max_concurrent_streams = 9);
        assert_eq!(gateway.concurrency().max_concurrent(), 9);
        assert_eq!(gateway.bandwidth().max_bps(), 10_000_000);
        assert_eq!(gateway.pipelines().names(), vec!["mock".to_string()]);
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
