pub mod bandwidth;
pub mod concurrency;
pub mod rate;

pub use bandwidth::BandwidthAllocator;
pub use concurrency::{CONCURRENCY_SAFETY_CEILING, ConcurrencyLimiter, ConcurrencySlot};
pub use rate::{RateLimitError, RateLimiter, TokenBucket};

// -----------------------------------------------------------------------------
// ----- LimiterKind -----------------------------------------------------------

/// Which resource constraint an admission decision was made against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LimiterKind {
    FrameRate,
    Bandwidth,
    Concurrency,
}

impl LimiterKind {
    pub const ALL: [LimiterKind; 3] = [
        LimiterKind::FrameRate,
        LimiterKind::Bandwidth,
        LimiterKind::Concurrency,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            LimiterKind::FrameRate => "frame_rate",
            LimiterKind::Bandwidth => "bandwidth",
            LimiterKind::Concurrency => "concurrency",
        }
    }

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}
