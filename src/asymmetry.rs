//! Left/right asymmetry analysis over a completed threshold map.

use crate::model::{Ear, ThresholdMap};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Margin (dB) at or above which a left/right difference is flagged.
pub const DEFAULT_ASYMMETRY_MARGIN_DB: f64 = 20.0;

/// Outcome of the asymmetry analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionResult {
    /// Absolute left/right difference per frequency tested in both ears
    pub differences: BTreeMap<u32, f64>,
    pub max_difference: f64,
    pub asymmetry_detected: bool,
    pub margin_db: f64,
    pub left_average: Option<f64>,
    pub right_average: Option<f64>,
}

impl SessionResult {
    pub fn recommendation(&self) -> String {
        if self.asymmetry_detected {
            format!(
                "Asymmetry detected (max difference: {:.1} dB). Consult an audiologist.",
                self.max_difference
            )
        } else {
            format!(
                "No asymmetry detected (max difference: {:.1} dB).",
                self.max_difference
            )
        }
    }
}

/// Compare left and right thresholds.
///
/// Frequencies missing from either ear are skipped. With no frequency in
/// common the maximum difference is 0 and nothing is flagged.
pub fn analyze(thresholds: &ThresholdMap, margin_db: f64) -> SessionResult {
    let mut differences = BTreeMap::new();
    if let (Some(left), Some(right)) = (thresholds.ear(Ear::Left), thresholds.ear(Ear::Right)) {
        for (frequency, left_db) in left {
            if let Some(right_db) = right.get(frequency) {
                differences.insert(*frequency, (left_db - right_db).abs());
            }
        }
    }

    let max_difference = differences.values().copied().fold(0.0, f64::max);

    SessionResult {
        asymmetry_detected: !differences.is_empty() && max_difference >= margin_db,
        max_difference,
        margin_db,
        left_average: ear_average(thresholds, Ear::Left),
        right_average: ear_average(thresholds, Ear::Right),
        differences,
    }
}

fn ear_average(thresholds: &ThresholdMap, ear: Ear) -> Option<f64> {
    let by_freq = thresholds.ear(ear).filter(|m| !m.is_empty())?;
    Some(by_freq.values().sum::<f64>() / by_freq.len() as f64)
}
