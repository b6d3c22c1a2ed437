//! Threshold extraction from a finished staircase.
//!
//! Extraction is a pure function of the reversal list and the response log,
//! so the same run always yields the same estimate.

use crate::model::TrialRecord;
use serde::{Deserialize, Serialize};

/// Value reported when a run shows no usable transition.
pub const INCONCLUSIVE_THRESHOLD_DB: f64 = 0.0;

/// Rule used to turn a finished run into a single threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdRule {
    /// Mean of the last two reversals, falling back to the mean level of
    /// heard/not-heard transitions
    #[default]
    ReversalMean,
    /// Lowest level heard on at least half of its presentations
    LowestMajorityHeard,
}

/// Threshold produced by a run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Estimate {
    pub threshold_db: f64,
    /// True when no rule applied and the fallback value was used
    pub inconclusive: bool,
}

impl Estimate {
    fn found(threshold_db: f64) -> Self {
        Self {
            threshold_db,
            inconclusive: false,
        }
    }

    fn fallback() -> Self {
        Self {
            threshold_db: INCONCLUSIVE_THRESHOLD_DB,
            inconclusive: true,
        }
    }
}

/// Extract a threshold with the given rule.
pub fn extract(
    rule: ThresholdRule,
    reversal_levels: &[f64],
    responses: &[TrialRecord],
) -> Estimate {
    let value = match rule {
        ThresholdRule::ReversalMean => {
            last_reversals_mean(reversal_levels).or_else(|| transition_mean(responses))
        }
        ThresholdRule::LowestMajorityHeard => lowest_majority_heard(responses),
    };
    value.map(Estimate::found).unwrap_or_else(Estimate::fallback)
}

/// Mean of the last two reversal levels, if at least two were recorded.
pub fn last_reversals_mean(reversal_levels: &[f64]) -> Option<f64> {
    match reversal_levels {
        [.., a, b] => Some((a + b) / 2.0),
        _ => None,
    }
}

/// Mean level of the non-catch trials whose answer differs from the previous
/// non-catch trial's answer.
pub fn transition_mean(responses: &[TrialRecord]) -> Option<f64> {
    let valid: Vec<&TrialRecord> = responses.iter().filter(|r| !r.is_catch_trial).collect();
    let transitions: Vec<f64> = valid
        .windows(2)
        .filter(|pair| pair[0].heard != pair[1].heard)
        .map(|pair| pair[1].level_db)
        .collect();

    mean(&transitions)
}

/// Lowest level whose non-catch presentations were heard at least half the
/// time; otherwise the lowest level heard at all.
pub fn lowest_majority_heard(responses: &[TrialRecord]) -> Option<f64> {
    // (level, heard, total)
    let mut tally: Vec<(f64, u32, u32)> = Vec::new();
    for record in responses.iter().filter(|r| !r.is_catch_trial) {
        match tally.iter_mut().find(|(level, _, _)| *level == record.level_db) {
            Some(entry) => {
                entry.1 += u32::from(record.heard);
                entry.2 += 1;
            }
            None => tally.push((record.level_db, u32::from(record.heard), 1)),
        }
    }

    let majority = tally
        .iter()
        .filter(|(_, heard, total)| 2 * heard >= *total)
        .map(|(level, _, _)| *level);
    let any_heard = tally
        .iter()
        .filter(|(_, heard, _)| *heard > 0)
        .map(|(level, _, _)| *level);

    min_level(majority).or_else(|| min_level(any_heard))
}

fn min_level(levels: impl Iterator<Item = f64>) -> Option<f64> {
    levels.reduce(f64::min)
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}
