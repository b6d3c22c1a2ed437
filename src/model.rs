//! Core data model shared by the staircase, the sequencer and the analysis.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Ear a stimulus is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Ear {
    Left,
    Right,
}

impl Ear {
    /// Both ears in presentation order.
    pub const BOTH: [Ear; 2] = [Ear::Left, Ear::Right];

    pub fn as_str(&self) -> &'static str {
        match self {
            Ear::Left => "left",
            Ear::Right => "right",
        }
    }
}

impl fmt::Display for Ear {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parse an ear name ("left" / "right", case-insensitive).
pub fn parse_ear(s: &str) -> Option<Ear> {
    match s.to_lowercase().as_str() {
        "left" => Some(Ear::Left),
        "right" => Some(Ear::Right),
        _ => None,
    }
}

// Custom serialization for Ear so it reads as a plain lowercase string,
// which also makes it usable as a JSON map key.
impl Serialize for Ear {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Ear {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_ear(&s).ok_or_else(|| {
            serde::de::Error::custom(format!(
                "invalid ear: {}, expected one of: left, right",
                s
            ))
        })
    }
}

/// One (frequency, ear) combination tested in a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TestPair {
    pub frequency_hz: u32,
    pub ear: Ear,
}

impl TestPair {
    pub fn new(frequency_hz: u32, ear: Ear) -> Self {
        Self { frequency_hz, ear }
    }
}

/// Direction of the last level change in a staircase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    None,
    Up,
    Down,
}

/// One presented stimulus and the subject's answer.
///
/// Records are immutable once created and kept in presentation order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrialRecord {
    /// Level the stimulus was (or, for a catch trial, would have been) presented at
    pub level_db: f64,
    pub is_catch_trial: bool,
    pub heard: bool,
    /// For a catch trial, correct means "not heard"; otherwise it means "heard"
    pub correct: bool,
}

impl TrialRecord {
    pub fn new(level_db: f64, is_catch_trial: bool, heard: bool) -> Self {
        Self {
            level_db,
            is_catch_trial,
            heard,
            correct: heard != is_catch_trial,
        }
    }

    /// A "heard" answer to a catch trial.
    pub fn is_false_alarm(&self) -> bool {
        self.is_catch_trial && self.heard
    }
}

/// Threshold estimates per ear, per frequency.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThresholdMap {
    ears: BTreeMap<Ear, BTreeMap<u32, f64>>,
}

impl ThresholdMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the threshold for a pair, replacing any previous value.
    pub fn insert(&mut self, pair: TestPair, threshold_db: f64) {
        self.ears
            .entry(pair.ear)
            .or_default()
            .insert(pair.frequency_hz, threshold_db);
    }

    pub fn get(&self, ear: Ear, frequency_hz: u32) -> Option<f64> {
        self.ears
            .get(&ear)
            .and_then(|by_freq| by_freq.get(&frequency_hz))
            .copied()
    }

    /// All thresholds recorded for one ear, keyed by frequency.
    pub fn ear(&self, ear: Ear) -> Option<&BTreeMap<u32, f64>> {
        self.ears.get(&ear)
    }

    /// Total number of (frequency, ear) entries.
    pub fn len(&self) -> usize {
        self.ears.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterate over every entry as (pair, threshold).
    pub fn iter(&self) -> impl Iterator<Item = (TestPair, f64)> + '_ {
        self.ears.iter().flat_map(|(ear, by_freq)| {
            by_freq
                .iter()
                .map(move |(freq, threshold)| (TestPair::new(*freq, *ear), *threshold))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trial_record_correctness() {
        assert!(TrialRecord::new(-10.0, false, true).correct);
        assert!(!TrialRecord::new(-10.0, false, false).correct);
        assert!(TrialRecord::new(-10.0, true, false).correct);

        let false_alarm = TrialRecord::new(-10.0, true, true);
        assert!(!false_alarm.correct);
        assert!(false_alarm.is_false_alarm());
    }

    #[test]
    fn test_threshold_map_insert_and_get() {
        let mut map = ThresholdMap::new();
        assert!(map.is_empty());

        map.insert(TestPair::new(1000, Ear::Left), -25.0);
        map.insert(TestPair::new(1000, Ear::Right), -30.0);
        map.insert(TestPair::new(2000, Ear::Left), -40.0);

        assert_eq!(map.len(), 3);
        assert_eq!(map.get(Ear::Left, 1000), Some(-25.0));
        assert_eq!(map.get(Ear::Right, 2000), None);

        // Re-inserting the same pair replaces rather than duplicates
        map.insert(TestPair::new(1000, Ear::Left), -35.0);
        assert_eq!(map.len(), 3);
        assert_eq!(map.get(Ear::Left, 1000), Some(-35.0));
    }

    #[test]
    fn test_threshold_map_iterates_by_ear_then_frequency() {
        let mut map = ThresholdMap::new();
        assert_eq!(map.iter().count(), 0);

        map.insert(TestPair::new(2000, Ear::Right), -20.0);
        map.insert(TestPair::new(500, Ear::Left), -45.0);
        map.insert(TestPair::new(250, Ear::Right), -30.0);
        map.insert(TestPair::new(1000, Ear::Left), -40.0);

        let entries: Vec<(TestPair, f64)> = map.iter().collect();
        assert_eq!(
            entries,
            vec![
                (TestPair::new(500, Ear::Left), -45.0),
                (TestPair::new(1000, Ear::Left), -40.0),
                (TestPair::new(250, Ear::Right), -30.0),
                (TestPair::new(2000, Ear::Right), -20.0),
            ]
        );
        assert_eq!(entries.len(), map.len());
    }

    #[test]
    fn test_ear_serialization() {
        let json = serde_json::to_string(&Ear::Left).unwrap();
        assert_eq!(json, "\"left\"");

        let parsed: Ear = serde_json::from_str("\"right\"").unwrap();
        assert_eq!(parsed, Ear::Right);

        let err = serde_json::from_str::<Ear>("\"center\"").unwrap_err().to_string();
        assert!(err.contains("invalid ear"));
    }

    #[test]
    fn test_threshold_map_json_shape() {
        let mut map = ThresholdMap::new();
        map.insert(TestPair::new(500, Ear::Right), -15.0);

        let json = serde_json::to_string(&map).unwrap();
        assert_eq!(json, r#"{"right":{"500":-15.0}}"#);

        let parsed: ThresholdMap = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, map);
    }
}
