//! Metrics collection for a test session.
//!
//! Tracks trial, retry and catch-trial counts across runs, and derives the
//! false-alarm rate used to judge how reliable a subject's answers were.

use crate::staircase::RunSummary;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Snapshot of session metrics, included in the session report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMetrics {
    /// Completed runs
    pub runs: u64,
    /// Trials across all runs (retries not counted)
    pub trials: u64,
    /// Answers scored, including retries and catch trials
    pub presentations: u64,
    pub retries: u64,
    pub catch_trials: u64,
    /// "Heard" answers to catch trials
    pub false_alarms: u64,
    /// Runs whose threshold is the inconclusive fallback
    pub inconclusive_runs: u64,
    /// False alarms per catch trial; absent when no catch trial was drawn
    pub false_alarm_rate: Option<f64>,
    /// Seconds since the session started
    pub elapsed_sec: f64,
}

impl SessionMetrics {
    /// True if at least one run produced a real threshold.
    pub fn is_conclusive(&self) -> bool {
        self.runs > self.inconclusive_runs
    }
}

/// Metrics collector for a session
pub struct MetricsCollector {
    start_time: Instant,
    runs: AtomicU64,
    trials: AtomicU64,
    presentations: AtomicU64,
    retries: AtomicU64,
    catch_trials: AtomicU64,
    false_alarms: AtomicU64,
    inconclusive_runs: AtomicU64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            runs: AtomicU64::new(0),
            trials: AtomicU64::new(0),
            presentations: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            catch_trials: AtomicU64::new(0),
            false_alarms: AtomicU64::new(0),
            inconclusive_runs: AtomicU64::new(0),
        }
    }

    /// Record a completed run
    pub fn record_run(&self, summary: &RunSummary) {
        self.runs.fetch_add(1, Ordering::SeqCst);
        self.trials
            .fetch_add(u64::from(summary.trials), Ordering::SeqCst);
        self.presentations
            .fetch_add(summary.presentations as u64, Ordering::SeqCst);
        self.retries
            .fetch_add(u64::from(summary.retries), Ordering::SeqCst);
        self.catch_trials
            .fetch_add(summary.catch_trials as u64, Ordering::SeqCst);
        self.false_alarms
            .fetch_add(summary.false_alarms as u64, Ordering::SeqCst);

        if summary.inconclusive {
            self.inconclusive_runs.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Get current metrics
    pub fn get_metrics(&self) -> SessionMetrics {
        let catch_trials = self.catch_trials.load(Ordering::SeqCst);
        let false_alarms = self.false_alarms.load(Ordering::SeqCst);

        let false_alarm_rate = if catch_trials == 0 {
            None
        } else {
            Some(false_alarms as f64 / catch_trials as f64)
        };

        SessionMetrics {
            runs: self.runs.load(Ordering::SeqCst),
            trials: self.trials.load(Ordering::SeqCst),
            presentations: self.presentations.load(Ordering::SeqCst),
            retries: self.retries.load(Ordering::SeqCst),
            catch_trials,
            false_alarms,
            inconclusive_runs: self.inconclusive_runs.load(Ordering::SeqCst),
            false_alarm_rate,
            elapsed_sec: self.start_time.elapsed().as_secs_f64(),
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}
