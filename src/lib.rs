//! Adaptive staircase engine for per-ear pure-tone hearing thresholds.
//!
//! A [`TestSequencer`] walks a session's (frequency, ear) pairs, driving one
//! [`StaircaseRun`] at a time against a [`TonePlayer`] and a
//! [`ResponseSource`], and finishes with a left/right asymmetry analysis.

pub mod asymmetry;
pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod model;
pub mod random;
pub mod runner;
pub mod sequencer;
pub mod simulation;
pub mod staircase;
pub mod stimulus;
pub mod threshold;

pub use asymmetry::SessionResult;
pub use config::{ConfigManager, EngineConfig, SessionConfig, StaircaseConfig};
pub use error::{ConfigError, EngineError, PlaybackError, SessionError};
pub use model::{Ear, TestPair, ThresholdMap, TrialRecord};
pub use runner::{abort_channel, run_staircase, AbortHandle, AbortSignal};
pub use sequencer::{SessionObserver, SessionProgress, SessionReport, TestSequencer};
pub use staircase::{RunSummary, StaircaseRun};
pub use stimulus::{ResponseSource, Stimulus, TonePlayer};
