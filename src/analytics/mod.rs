use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use crate::{
    errors::FailureKind,
    limiters::LimiterKind,
    quality::{AdjustmentAction, AdjustmentKind},
};

// -----------------------------------------------------------------------------
// ----- Labels ----------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

/// Timed stages of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Handshake,
    Admission,
    Decode,
    Inference,
    Frame,
}

/// How a registered session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseKind {
    Normal,
    Stale,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Handshake => "handshake",
            Phase::Admission => "admission",
            Phase::Decode => "decode",
            Phase::Inference => "inference",
            Phase::Frame => "frame",
        }
    }
}

impl CloseKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CloseKind::Normal => "normal",
            CloseKind::Stale => "stale",
        }
    }
}

// -----------------------------------------------------------------------------
// ----- MetricsSink -----------------------------------------------------------

/// Fire-and-forget metrics events emitted by the gateway.
///
/// Implementations must not block: these are called inline on the session
/// path. Every method defaults to a no-op so a sink only overrides what it
/// records.
pub trait MetricsSink: Send + Sync {
    fn connection_opened(&self) {}

    fn connection_closed(&self) {}

    fn auth_failure(&self, _label: &'static str) {}

    fn admission(&self, _limiter: LimiterKind, _allowed: bool) {}

    fn bytes(&self, _direction: Direction, _count: usize) {}

    fn latency(&self, _phase: Phase, _elapsed: Duration) {}

    fn quality_change(&self, _client_id: &str, _action: &AdjustmentAction) {}

    fn concurrency(&self, _live_sessions: usize) {}

    fn connection_duration(&self, _close: CloseKind, _elapsed: Duration) {}

    fn failure(&self, _kind: FailureKind) {}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {}

// -----------------------------------------------------------------------------
// ----- GatewayStats ----------------------------------------------------------

/// In-process counters. Relaxed atomics only; a snapshot is not a consistent
/// cut across counters.
#[derive(Debug, Default)]
pub struct GatewayStats {
    connections_opened: AtomicU64,
    connections_closed: AtomicU64,
    auth_failures: AtomicU64,
    admitted: [AtomicU64; 3],
    denied: [AtomicU64; 3],
    bytes_in: AtomicU64,
    bytes_out: AtomicU64,
    downscales: AtomicU64,
    upscales: AtomicU64,
    live_sessions: AtomicU64,
    closed_normal: AtomicU64,
    closed_stale: AtomicU64,
    failures: [AtomicU64; 5],
    inference_count: AtomicU64,
    inference_micros: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub connections_opened: u64,
    pub connections_closed: u64,
    pub auth_failures: u64,
    pub admitted: [u64; 3],
    pub denied: [u64; 3],
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub downscales: u64,
    pub upscales: u64,
    pub live_sessions: u64,
    pub closed_normal: u64,
    pub closed_stale: u64,
    pub failures: [u64; 5],
    pub inference_count: u64,
    pub inference_micros: u64,
}

impl GatewayStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            connections_opened: load(&self.connections_opened),
            connections_closed: load(&self.connections_closed),
            auth_failures: load(&self.auth_failures),
            admitted: self.admitted.each_ref().map(load),
            denied: self.denied.each_ref().map(load),
            bytes_in: load(&self.bytes_in),
            bytes_out: load(&self.bytes_out),
            downscales: load(&self.downscales),
            upscales: load(&self.upscales),
            live_sessions: load(&self.live_sessions),
            closed_normal: load(&self.closed_normal),
            closed_stale: load(&self.closed_stale),
            failures: self.failures.each_ref().map(load),
            inference_count: load(&self.inference_count),
            inference_micros: load(&self.inference_micros),
        }
    }
}

impl MetricsSink for GatewayStats {
    fn connection_opened(&self) {
        bump(&self.connections_opened, 1);
    }

    fn connection_closed(&self) {
        bump(&self.connections_closed, 1);
    }

    fn auth_failure(&self, _label: &'static str) {
        bump(&self.auth_failures, 1);
    }

    fn admission(&self, limiter: LimiterKind, allowed: bool) {
        let counters = if allowed { &self.admitted } else { &self.denied };
        bump(&counters[limiter.index()], 1);
    }

    fn bytes(&self, direction: Direction, count: usize) {
        let counter = match direction {
            Direction::Inbound => &self.bytes_in,
            Direction::Outbound => &self.bytes_out,
        };
        bump(counter, count as u64);
    }

    fn latency(&self, phase: Phase, elapsed: Duration) {
        if phase == Phase::Inference {
            bump(&self.inference_count, 1);
            bump(&self.inference_micros, elapsed.as_micros() as u64);
        }
    }

    fn quality_change(&self, _client_id: &str, action: &AdjustmentAction) {
        match action.kind {
            AdjustmentKind::Downscale => bump(&self.downscales, 1),
            AdjustmentKind::Upscale => bump(&self.upscales, 1),
        }
    }

    fn concurrency(&self, live_sessions: usize) {
        self.live_sessions
            .store(live_sessions as u64, Ordering::Relaxed);
    }

    fn connection_duration(&self, close: CloseKind, _elapsed: Duration) {
        match close {
            CloseKind::Normal => bump(&self.closed_normal, 1),
            CloseKind::Stale => bump(&self.closed_stale, 1),
        }
    }

    fn failure(&self, kind: FailureKind) {
        bump(&self.failures[kind.index()], 1);
    }
}

impl StatsSnapshot {
    pub fn admitted(&self, limiter: LimiterKind) -> u64 {
        self.admitted[limiter.index()]
    }

    pub fn denied(&self, limiter: LimiterKind) -> u64 {
        self.denied[limiter.index()]
    }

    pub fn failures(&self, kind: FailureKind) -> u64 {
        self.failures[kind.index()]
    }

    pub fn mean_inference(&self) -> Option<Duration> {
        self.inference_micros
            .checked_div(self.inference_count)
            .map(Duration::from_micros)
    }
}

// -----------------------------------------------------------------------------
// ----- Internal: Helpers -----------------------------------------------------

#[inline]
fn bump(counter: &AtomicU64, by: u64) {
    counter.fetch_add(by, Ordering::Relaxed);
}

#[inline]
fn load(counter: &AtomicU64) -> u64 {
    counter.load(Ordering::Relaxed)
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------
