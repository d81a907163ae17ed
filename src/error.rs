// =============================================================================
// Error taxonomy for the signal pipeline
// =============================================================================
//
// Three outcomes must stay distinguishable for every detector step:
//   - an alert was produced,
//   - the step rejected the candle for a designed-in reason (RejectReason),
//   - an upstream collaborator failed (DetectorError::Timeout / Provider).
//
// A malformed candle is DetectorError::Invariant and aborts the whole event
// before any state is touched.
// =============================================================================

use serde::Serialize;
use thiserror::Error;

/// Failures raised while processing a single candle event.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DetectorError {
    #[error("{call} timed out after {timeout_ms} ms")]
    Timeout { call: &'static str, timeout_ms: u64 },

    #[error("{call} failed: {message}")]
    Provider { call: &'static str, message: String },

    #[error("invariant violation: {0}")]
    Invariant(String),
}

impl DetectorError {
    /// Classify an upstream failure. `None` for invariant violations.
    pub fn upstream_kind(&self) -> Option<UpstreamKind> {
        match self {
            Self::Timeout { .. } => Some(UpstreamKind::Timeout),
            Self::Provider { .. } => Some(UpstreamKind::Provider),
            Self::Invariant(_) => None,
        }
    }
}

/// Coarse class of an upstream failure, carried in cycle reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpstreamKind {
    Timeout,
    Provider,
}

/// Designed-in reasons for a detector step not producing an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    WrongDirection,
    BelowVolumeFloor,
    InsufficientHistory,
    BelowMultiplier,
    CooldownActive,
    BelowRunThreshold,
    NoRunAlert,
    NoVolumeActivity,
    NoPending,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::WrongDirection => "candle direction does not match mode",
            Self::BelowVolumeFloor => "quote volume below floor",
            Self::InsufficientHistory => "insufficient history",
            Self::BelowMultiplier => "volume ratio below multiplier",
            Self::CooldownActive => "cooldown active",
            Self::BelowRunThreshold => "run shorter than threshold",
            Self::NoRunAlert => "no consecutive alert this cycle",
            Self::NoVolumeActivity => "no concurrent or recent volume activity",
            Self::NoPending => "no pending preliminary signal",
        };
        f.write_str(s)
    }
}

/// A sink failed to accept an alert. Logged by the dispatcher, never retried.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("sink {sink} timed out after {timeout_ms} ms")]
    Timeout { sink: &'static str, timeout_ms: u64 },

    #[error("sink {sink} rejected delivery: {source:#}")]
    Rejected {
        sink: &'static str,
        #[source]
        source: anyhow::Error,
    },
}
