/// Completeness gate for submission
///
/// How complete an assessment is depends on the questionnaire, which the engine
/// does not own, so the measurement sits behind `CompletenessGauge`.

use crate::error::{EngineError, EngineResult};
use crate::workflow::types::{AxisId, Snapshot};
use std::sync::Arc;

pub trait CompletenessGauge: Send + Sync {
    /// Fraction of the assessment that is answered, in 0.0..=1.0
    fn completeness(&self, snapshot: &Snapshot) -> f64;
}

/// Counts answered axes
///
/// With required axes configured, completeness is the share of them that carry
/// a non-null answer. Without, it is the share of present answers that are
/// non-null. An empty snapshot is 0.
#[derive(Debug, Clone, Default)]
pub struct AnswerCoverage {
    required_axes: Vec<AxisId>,
}

impl AnswerCoverage {
    pub fn new(required_axes: Vec<AxisId>) -> Self {
        Self { required_axes }
    }
}

impl CompletenessGauge for AnswerCoverage {
    fn completeness(&self, snapshot: &Snapshot) -> f64 {
        let answered = |axis: &AxisId| snapshot.answers.get(axis).is_some_and(|v| !v.is_null());

        if self.required_axes.is_empty() {
            if snapshot.answers.is_empty() {
                return 0.0;
            }
            let filled = snapshot.answers.keys().filter(|axis| answered(axis)).count();
            return filled as f64 / snapshot.answers.len() as f64;
        }

        let filled = self.required_axes.iter().filter(|axis| answered(axis)).count();
        filled as f64 / self.required_axes.len() as f64
    }
}

/// Gauge plus the threshold a snapshot must reach
#[derive(Clone)]
pub struct CompletenessGate {
    gauge: Arc<dyn CompletenessGauge>,
    threshold: f64,
}

impl CompletenessGate {
    pub fn new(gauge: Arc<dyn CompletenessGauge>, threshold: f64) -> Self {
        Self {
            gauge,
            threshold: if threshold.is_finite() { threshold.clamp(0.0, 1.0) } else { 1.0 },
        }
    }

    pub fn check(&self, snapshot: &Snapshot) -> EngineResult<()> {
        let completeness = self.gauge.completeness(snapshot);
        if completeness + f64::EPSILON >= self.threshold {
            Ok(())
        } else {
            Err(EngineError::validation(format!(
                "assessment is {:.0}% complete, {:.0}% required",
                completeness * 100.0,
                self.threshold * 100.0
            )))
        }
    }
}
