use serde::Serialize;

use crate::error::{DetectorError, RejectReason, UpstreamKind};
use crate::signals::alert::AlertRecord;
use crate::types::AlertKind;

/// One step of a candle cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorStep {
    Preliminary,
    FinalConfirmation,
    VolumeSpike,
    ConsecutiveRun,
    Priority,
}

/// What a step did. Rejections and upstream failures stay distinct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum StepOutcome {
    Fired(AlertKind),
    Rejected(RejectReason),
    Failed(UpstreamKind),
    Disabled,
}

/// How the candle was admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Admission {
    Unconfirmed,
    Confirmed,
    /// Confirm flag set, but the closure predicate says the bucket is open.
    AwaitingClose,
}

/// Result of processing one candle: the alerts to dispatch, in order, and a
/// per-step account of why each step did or did not fire.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleReport {
    pub admission: Admission,
    pub alerts: Vec<AlertRecord>,
    pub steps: Vec<(DetectorStep, StepOutcome)>,
}

impl CycleReport {
    pub fn new(admission: Admission) -> Self {
        Self {
            admission,
            alerts: Vec::new(),
            steps: Vec::new(),
        }
    }

    pub(crate) fn fired(&mut self, step: DetectorStep, alert: AlertRecord) {
        self.steps.push((step, StepOutcome::Fired(alert.kind())));
        self.alerts.push(alert);
    }

    pub(crate) fn rejected(&mut self, step: DetectorStep, reason: RejectReason) {
        self.steps.push((step, StepOutcome::Rejected(reason)));
    }

    pub(crate) fn failed(&mut self, step: DetectorStep, err: &DetectorError) {
        // Invariant errors abort the whole event before any step runs.
        let kind = err.upstream_kind().unwrap_or(UpstreamKind::Provider);
        self.steps.push((step, StepOutcome::Failed(kind)));
    }

    pub(crate) fn disabled(&mut self, step: DetectorStep) {
        self.steps.push((step, StepOutcome::Disabled));
    }

    pub fn outcome(&self, step: DetectorStep) -> Option<StepOutcome> {
        self.steps
            .iter()
            .find(|(s, _)| *s == step)
            .map(|(_, o)| *o)
    }

    pub fn kinds(&self) -> Vec<AlertKind> {
        self.alerts.iter().map(AlertRecord::kind).collect()
    }
}
