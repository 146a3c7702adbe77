use serde::{Deserialize, Serialize};
use tokio::time::Instant;

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

pub const MIN_FRAMERATE: u32 = 10;
pub const MAX_FRAMERATE: u32 = 30;

/// Framerate change applied alongside each resolution step.
pub const FRAMERATE_STEP: u32 = 5;

/// `(fps, multiplier)` rows, descending. Rates between rows are interpolated.
const FRAMERATE_MULTIPLIERS: [(u32, f64); 4] = [(30, 1.0), (24, 0.8), (15, 0.5), (10, 0.3)];

// -----------------------------------------------------------------------------
// ----- Resolution ------------------------------------------------------------

/// Quality ladder, highest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Resolution {
    #[serde(rename = "1080p")]
    P1080,
    #[serde(rename = "720p")]
    P720,
    #[serde(rename = "480p")]
    P480,
    #[serde(rename = "360p")]
    P360,
}

impl Resolution {
    pub const LADDER: [Resolution; 4] = [
        Resolution::P1080,
        Resolution::P720,
        Resolution::P480,
        Resolution::P360,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Resolution::P1080 => "1080p",
            Resolution::P720 => "720p",
            Resolution::P480 => "480p",
            Resolution::P360 => "360p",
        }
    }

    /// Baseline bitrate at full framerate, in Mbps.
    pub fn base_mbps(self) -> f64 {
        match self {
            Resolution::P1080 => 4.0,
            Resolution::P720 => 2.5,
            Resolution::P480 => 1.5,
            Resolution::P360 => 0.8,
        }
    }

    /// Next rung down, `None` at the bottom.
    pub fn lower(self) -> Option<Resolution> {
        Self::LADDER.get(self.rung() + 1).copied()
    }

    /// Next rung up, `None` at the top.
    pub fn higher(self) -> Option<Resolution> {
        self.rung().checked_sub(1).map(|i| Self::LADDER[i])
    }

    fn rung(self) -> usize {
        self as usize
    }
}

// -----------------------------------------------------------------------------
// ----- Framerate -------------------------------------------------------------

/// Frames per second, always within `[MIN_FRAMERATE, MAX_FRAMERATE]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Framerate(u32);

impl Framerate {
    pub const MIN: Framerate = Framerate(MIN_FRAMERATE);
    pub const MAX: Framerate = Framerate(MAX_FRAMERATE);

    pub fn new(fps: u32) -> Self {
        Framerate(fps.clamp(MIN_FRAMERATE, MAX_FRAMERATE))
    }

    pub fn fps(self) -> u32 {
        self.0
    }

    pub fn step_down(self) -> Self {
        Framerate::new(self.0.saturating_sub(FRAMERATE_STEP))
    }

    pub fn step_up(self) -> Self {
        Framerate::new(self.0 + FRAMERATE_STEP)
    }

    /// Bitrate multiplier relative to 30fps.
    pub fn multiplier(self) -> f64 {
        let fps = self.0;

        for pair in FRAMERATE_MULTIPLIERS.windows(2) {
            let (hi_fps, hi_mult) = pair[0];
            let (lo_fps, lo_mult) = pair[1];

            if fps >= lo_fps && fps <= hi_fps {
                let t = f64::from(fps - lo_fps) / f64::from(hi_fps - lo_fps);
                return lo_mult + t * (hi_mult - lo_mult);
            }
        }

        // unreachable for clamped values; fall back to the nearest edge
        if fps > MAX_FRAMERATE { 1.0 } else { 0.3 }
    }
}

// -----------------------------------------------------------------------------
// ----- Codec -----------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    #[default]
    H264,
    H265,
    Vp9,
}

// -----------------------------------------------------------------------------
// ----- ClientQualityProfile --------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct ClientQualityProfile {
    pub resolution: Resolution,
    pub framerate: Framerate,
    pub codec: Codec,
    /// `None` until the first adjustment, so a new client is never debounced.
    pub last_adjusted_at: Option<Instant>,
}

impl Default for ClientQualityProfile {
    fn default() -> Self {
        Self {
            resolution: Resolution::P1080,
            framerate: Framerate::MAX,
            codec: Codec::default(),
            last_adjusted_at: None,
        }
    }
}

impl ClientQualityProfile {
    /// Bitrate the current settings are expected to need, in Mbps.
    pub fn estimated_mbps(&self) -> f64 {
        self.resolution.base_mbps() * self.framerate.multiplier()
    }

    pub fn estimated_bps(&self) -> u64 {
        (self.estimated_mbps() * 1_000_000.0).round() as u64
    }
}

// -----------------------------------------------------------------------------
// ----- NetworkStats ----------------------------------------------------------

/// Client-reported link conditions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkStats {
    #[serde(alias = "rtt")]
    pub rtt_ms: f64,

    #[serde(default, alias = "jitter")]
    pub jitter_ms: f64,

    #[serde(alias = "bandwidth")]
    pub bandwidth_mbps: f64,

    #[serde(default, alias = "packet_loss_fraction")]
    pub packet_loss: f64,
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ladder_navigation_stops_at_ends() {
        assert_eq!(Resolution::P1080.lower(), Some(Resolution::P720));
        assert_eq!(Resolution::P360.lower(), None);
        assert_eq!(Resolution::P720.higher(), Some(Resolution::P1080));
        assert_eq!(Resolution::P1080.higher(), None);
    }

    #[test]
    fn framerate_is_clamped_and_stepped() {
        assert_eq!(Framerate::new(60), Framerate::MAX);
        assert_eq!(Framerate::new(1), Framerate::MIN);
        assert_eq!(Framerate::MAX.step_down().fps(), 25);
        assert_eq!(Framerate::new(12).step_down(), Framerate::MIN);
        assert_eq!(Framerate::new(28).step_up(), Framerate::MAX);
    }

    #[test]
    fn multiplier_matches_table_rows() {
        assert_eq!(Framerate::new(30).multiplier(), 1.0);
        assert!((Framerate::new(24).multiplier() - 0.8).abs() < 1e-9);
        assert!((Framerate::new(15).multiplier() - 0.5).abs() < 1e-9);
        assert!((Framerate::new(10).multiplier() - 0.3).abs() < 1e-9);
    }

    #[test]
    fn multiplier_interpolates_and_is_monotone() {
        let m25 = Framerate::new(25).multiplier();
        assert!((m25 - (0.8 + 0.2 / 6.0)).abs() < 1e-9);

        let mut previous = 0.0;
        for fps in MIN_FRAMERATE..=MAX_FRAMERATE {
            let m = Framerate::new(fps).multiplier();
            assert!(m > previous, "multiplier not increasing at {fps}");
            previous = m;
        }
    }

    #[test]
    fn default_profile_estimates_four_mbps() {
        let profile = ClientQualityProfile::default();
        assert_eq!(profile.estimated_mbps(), 4.0);
        assert_eq!(profile.estimated_bps(), 4_000_000);
    }

    #[test]
    fn stats_accept_short_field_names() {
        let stats: NetworkStats =
            serde_json::from_str(r#"{"rtt":600,"jitter":0,"bandwidth":5,"packet_loss":0}"#).unwrap();
        assert_eq!(stats.rtt_ms, 600.0);
        assert_eq!(stats.bandwidth_mbps, 5.0);
    }

    #[test]
    fn resolution_serializes_as_label() {
        assert_eq!(serde_json::to_string(&Resolution::P720).unwrap(), "\"720p\"");
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
