mod profile;

pub use profile::{
    ClientQualityProfile, Codec, FRAMERATE_STEP, Framerate, MAX_FRAMERATE, MIN_FRAMERATE,
    NetworkStats, Resolution,
};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::time::Instant;
use tracing::debug;

use crate::analytics::MetricsSink;

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

/// Minimum time between two `adjust`-driven changes for one client.
pub const DEBOUNCE_WINDOW: Duration = Duration::from_secs(10);

const WEIGHT_BANDWIDTH: f64 = 0.7;
const WEIGHT_RTT: f64 = 0.002;
const WEIGHT_LOSS: f64 = 5.0;
const TARGET_SCALE: f64 = 1.0;
const TARGET_OFFSET_MBPS: f64 = 0.5;
const TARGET_FLOOR_MBPS: f64 = 0.5;

const DOWNGRADE_RATIO: f64 = 0.8;
const UPGRADE_RATIO: f64 = 1.2;

const EMERGENCY_LOSS: f64 = 0.1;
const EMERGENCY_RTT_MS: f64 = 500.0;

// -----------------------------------------------------------------------------
// ----- AdjustmentAction ------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentKind {
    Downscale,
    Upscale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentReason {
    /// Loss or latency past the emergency thresholds.
    Emergency,
    /// Target bitrate well below the current estimate.
    Bandwidth,
    /// Target bitrate well above the current estimate.
    Headroom,
    /// Shed by the gateway, not by the client's own stats.
    SystemOverload,
}

/// A change that was applied to a profile; the new settings are included.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdjustmentAction {
    pub kind: AdjustmentKind,
    pub reason: AdjustmentReason,
    pub resolution: Resolution,
    pub framerate: Framerate,
}

impl AdjustmentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AdjustmentKind::Downscale => "downscale",
            AdjustmentKind::Upscale => "upscale",
        }
    }
}

impl AdjustmentReason {
    pub fn as_str(self) -> &'static str {
        match self {
            AdjustmentReason::Emergency => "emergency",
            AdjustmentReason::Bandwidth => "bandwidth",
            AdjustmentReason::Headroom => "headroom",
            AdjustmentReason::SystemOverload => "system_overload",
        }
    }
}

// -----------------------------------------------------------------------------
// ----- QualityController -----------------------------------------------------

/// Per-client adaptive bitrate decisions.
///
/// Profiles are created lazily at 1080p/30fps and never removed. Each profile
/// has its own lock; the map lock is only held for lookup/insert.
pub struct QualityController {
    metrics: Arc<dyn MetricsSink>,
    profiles: RwLock<HashMap<String, Arc<Mutex<ClientQualityProfile>>>>,
}

impl std::fmt::Debug for QualityController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QualityController")
            .field("profiles", &self.profiles.read().len())
            .finish()
    }
}

// -----------------------------------------------------------------------------
// ----- QualityController: Static ---------------------------------------------

impl QualityController {
    pub fn new(metrics: Arc<dyn MetricsSink>) -> Self {
        Self {
            metrics,
            profiles: RwLock::new(HashMap::new()),
        }
    }

    /// Target bitrate in Mbps for the reported conditions.
    pub fn target_mbps(stats: &NetworkStats) -> f64 {
        let score = WEIGHT_BANDWIDTH * stats.bandwidth_mbps
            - WEIGHT_RTT * stats.rtt_ms
            - WEIGHT_LOSS * stats.packet_loss;

        (TARGET_SCALE * score + TARGET_OFFSET_MBPS).max(TARGET_FLOOR_MBPS)
    }
}

// -----------------------------------------------------------------------------
// ----- QualityController: Public ---------------------------------------------

impl QualityController {
    /// Feed fresh network stats. Returns the applied action, if any.
    pub fn adjust(&self, client_id: &str, stats: &NetworkStats) -> Option<AdjustmentAction> {
        self.adjust_at(client_id, stats, Instant::now())
    }

    /// Apply up to `levels` downgrade steps now, ignoring the debounce window.
    /// Returns the last step that changed anything.
    pub fn force_downgrade(&self, client_id: &str, levels: u32) -> Option<AdjustmentAction> {
        let now = Instant::now();
        let profile = self.profile_entry(client_id);
        let mut profile = profile.lock();

        let mut last = None;
        for _ in 0..levels {
            match step(&mut profile, AdjustmentKind::Downscale, AdjustmentReason::SystemOverload) {
                Some(action) => last = Some(action),
                None => break,
            }
        }

        if let Some(action) = &last {
            profile.last_adjusted_at = Some(now);
            drop(profile);
            self.applied(client_id, action);
        }

        last
    }

    /// Copy of the client's current profile, creating the default one if needed.
    pub fn profile(&self, client_id: &str) -> ClientQualityProfile {
        self.profile_entry(client_id).lock().clone()
    }

    pub fn len(&self) -> usize {
        self.profiles.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// -----------------------------------------------------------------------------
// ----- QualityController: Private --------------------------------------------

impl QualityController {
    fn adjust_at(
        &self,
        client_id: &str,
        stats: &NetworkStats,
        now: Instant,
    ) -> Option<AdjustmentAction> {
        let profile = self.profile_entry(client_id);
        let mut profile = profile.lock();

        if let Some(last) = profile.last_adjusted_at {
            if now.saturating_duration_since(last) < DEBOUNCE_WINDOW {
                return None;
            }
        }

        let target = Self::target_mbps(stats);
        let current = profile.estimated_mbps();

        let (kind, reason) =
            if stats.packet_loss > EMERGENCY_LOSS || stats.rtt_ms > EMERGENCY_RTT_MS {
                (AdjustmentKind::Downscale, AdjustmentReason::Emergency)
            } else if target < current * DOWNGRADE_RATIO {
                (AdjustmentKind::Downscale, AdjustmentReason::Bandwidth)
            } else if target > current * UPGRADE_RATIO {
                (AdjustmentKind::Upscale, AdjustmentReason::Headroom)
            } else {
                return None;
            };

        let action = step(&mut profile, kind, reason)?;
        profile.last_adjusted_at = Some(now);
        drop(profile);

        debug!(client_id, target, current, "quality adjusted");
        self.applied(client_id, &action);
        Some(action)
    }

    fn applied(&self, client_id: &str, action: &AdjustmentAction) {
        debug!(
            client_id,
            kind = action.kind.as_str(),
            reason = action.reason.as_str(),
            resolution = action.resolution.as_str(),
            framerate = action.framerate.fps(),
            "quality profile changed"
        );
        self.metrics.quality_change(client_id, action);
    }

    fn profile_entry(&self, client_id: &str) -> Arc<Mutex<ClientQualityProfile>> {
        if let Some(profile) = self.profiles.read().get(client_id) {
            return profile.clone();
        }

        self.profiles
            .write()
            .entry(client_id.to_string())
            .or_default()
            .clone()
    }
}

// -----------------------------------------------------------------------------
// ----- Helpers ---------------------------------------------------------------

/// Move one rung and one framerate step. `None` when already at the edge.
fn step(
    profile: &mut ClientQualityProfile,
    kind: AdjustmentKind,
    reason: AdjustmentReason,
) -> Option<AdjustmentAction> {
    let (resolution, framerate) = match kind {
        AdjustmentKind::Downscale => (
            profile.resolution.lower().unwrap_or(profile.resolution),
            profile.framerate.step_down(),
        ),
        AdjustmentKind::Upscale => (
            profile.resolution.higher().unwrap_or(profile.resolution),
            profile.framerate.step_up(),
        ),
    };

    if resolution == profile.resolution && framerate == profile.framerate {
        return None;
    }

    profile.resolution = resolution;
    profile.framerate = framerate;

    Some(AdjustmentAction {
        kind,
        reason,
        resolution,
        framerate,
    })
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
