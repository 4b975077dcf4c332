//! Progress events and their projection.
//!
//! The orchestrator is the only producer of `ProgressEvent`s. A
//! `ProgressReporter` folds them into counts and per-step views without any
//! side effects, so a recorded event stream can be replayed in tests.

use crate::types::{StepStatus, SwapStep, COMMISSION_STEP_ID};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub step_id: String,
    pub symbol: String,
    pub status: StepStatus,
    pub reason: Option<String>,
}

impl ProgressEvent {
    pub fn from_step(step: &SwapStep) -> Self {
        Self {
            step_id: step.id.clone(),
            symbol: step.symbol.clone(),
            status: step.status,
            reason: step.reason.clone(),
        }
    }
}

pub type ProgressSender = UnboundedSender<ProgressEvent>;

/// Send an event if anyone is listening. A dropped receiver is not an error.
pub(crate) fn emit(progress: Option<&ProgressSender>, step: &SwapStep) {
    if let Some(sender) = progress {
        if sender.send(ProgressEvent::from_step(step)).is_err() {
            debug!("Progress receiver dropped, event for {} discarded", step.id);
        }
    }
}

/// Fold of progress events into a renderable view.
#[derive(Debug, Clone, Default)]
pub struct ProgressReporter {
    steps: Vec<SwapStep>,
    commission: Option<SwapStep>,
}

impl ProgressReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replay a recorded event stream.
    pub fn from_events<'a, I>(events: I) -> Self
    where
        I: IntoIterator<Item = &'a ProgressEvent>,
    {
        let mut reporter = Self::new();
        for event in events {
            reporter.apply(event);
        }
        reporter
    }

    /// Apply one event. Unknown ids create a step; regressions are ignored.
    pub fn apply(&mut self, event: &ProgressEvent) {
        let slot = if event.step_id == COMMISSION_STEP_ID {
            self.commission
                .get_or_insert_with(|| SwapStep::pending(COMMISSION_STEP_ID, event.symbol.clone()))
        } else {
            match self.steps.iter().position(|s| s.id == event.step_id) {
                Some(idx) => &mut self.steps[idx],
                None => {
                    self.steps.push(SwapStep::pending(event.step_id.clone(), event.symbol.clone()));
                    let last = self.steps.len() - 1;
                    &mut self.steps[last]
                }
            }
        };

        if slot.status.is_terminal() || event.status.rank() < slot.status.rank() {
            debug!("Ignoring {} -> {} for {}", slot.status, event.status, slot.id);
            return;
        }
        slot.status = event.status;
        slot.reason = event.reason.clone();
    }

    /// Token steps (the commission step is tracked separately).
    pub fn total(&self) -> usize {
        self.steps.len()
    }

    pub fn completed(&self) -> usize {
        self.count(StepStatus::Completed)
    }

    pub fn failed(&self) -> usize {
        self.count(StepStatus::Failed)
    }

    /// `(completed + failed) / total` as a percentage; 0 with no steps.
    pub fn percent(&self) -> f64 {
        if self.steps.is_empty() {
            return 0.0;
        }
        (self.completed() + self.failed()) as f64 / self.steps.len() as f64 * 100.0
    }

    pub fn steps(&self) -> &[SwapStep] {
        &self.steps
    }

    pub fn step(&self, id: &str) -> Option<&SwapStep> {
        self.steps.iter().find(|s| s.id == id)
    }

    pub fn commission_step(&self) -> Option<&SwapStep> {
        self.commission.as_ref()
    }

    /// Every token step and the commission step (if any) are terminal.
    pub fn is_finished(&self) -> bool {
        self.steps.iter().all(|s| s.status.is_terminal())
            && self.commission.as_ref().map_or(true, |c| c.status.is_terminal())
    }

    fn count(&self, status: StepStatus) -> usize {
        self.steps.iter().filter(|s| s.status == status).count()
    }
}
