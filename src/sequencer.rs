//! Session sequencing across (frequency, ear) pairs.
//!
//! A [`TestSequencer`] owns the pair list and the threshold map for exactly
//! one session. It hands out one [`StaircaseRun`] at a time and is consumed
//! when the session is finished, so a completed or partial session can never
//! be restarted in place.

use crate::asymmetry::{self, SessionResult};
use crate::config::SessionConfig;
use crate::error::{ConfigError, SessionError};
use crate::metrics::{MetricsCollector, SessionMetrics};
use crate::model::{TestPair, ThresholdMap};
use crate::random::RandomSource;
use crate::runner::{run_staircase, AbortSignal};
use crate::staircase::{RunSummary, StaircaseRun};
use crate::stimulus::{ResponseSource, TonePlayer};
use serde::Serialize;
use tracing::info;

/// Position in the session after a pair completes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SessionProgress {
    /// Number of completed pairs (1-based once the first pair is done)
    pub test_number: usize,
    pub total_tests: usize,
    pub percent: f64,
}

/// Callbacks emitted while a session runs.
pub trait SessionObserver {
    /// Called once per pair, after its threshold is stored.
    fn on_pair_complete(&mut self, _summary: &RunSummary, _progress: SessionProgress) {}

    /// Called once, after the last pair and the asymmetry analysis.
    fn on_session_complete(&mut self, _thresholds: &ThresholdMap, _result: &SessionResult) {}
}

impl SessionObserver for () {}

/// Everything a finished session produced.
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub thresholds: ThresholdMap,
    pub result: SessionResult,
    pub recommendation: String,
    pub runs: Vec<RunSummary>,
    pub metrics: SessionMetrics,
}

/// Drives one session, one pair at a time.
pub struct TestSequencer<R: RandomSource> {
    config: SessionConfig,
    pairs: Vec<TestPair>,
    /// Index of the next pair to start
    next_index: usize,
    active: Option<TestPair>,
    thresholds: ThresholdMap,
    runs: Vec<RunSummary>,
    metrics: MetricsCollector,
    rng: R,
}

impl<R: RandomSource> TestSequencer<R> {
    /// Validate the configuration and build the pair list.
    ///
    /// Pairs are the Cartesian product of frequencies and ears, frequency
    /// major, shuffled once here if configured.
    pub fn new(config: SessionConfig, mut rng: R) -> Result<Self, ConfigError> {
        config.validate()?;

        let mut pairs: Vec<TestPair> = config
            .frequencies_hz
            .iter()
            .flat_map(|&frequency| {
                config
                    .ears
                    .iter()
                    .map(move |&ear| TestPair::new(frequency, ear))
            })
            .collect();

        if config.shuffle {
            rng.shuffle(&mut pairs);
        }

        info!(
            pairs = pairs.len(),
            shuffled = config.shuffle,
            "Test session created"
        );

        Ok(Self {
            config,
            pairs,
            next_index: 0,
            active: None,
            thresholds: ThresholdMap::new(),
            runs: Vec::new(),
            metrics: MetricsCollector::new(),
            rng,
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Pairs in presentation order.
    pub fn pairs(&self) -> &[TestPair] {
        &self.pairs
    }

    pub fn thresholds(&self) -> &ThresholdMap {
        &self.thresholds
    }

    pub fn completed(&self) -> usize {
        self.runs.len()
    }

    pub fn is_complete(&self) -> bool {
        self.completed() == self.pairs.len()
    }

    pub fn progress(&self) -> SessionProgress {
        let total_tests = self.pairs.len();
        let test_number = self.completed();
        SessionProgress {
            test_number,
            total_tests,
            percent: if total_tests == 0 {
                100.0
            } else {
                test_number as f64 * 100.0 / total_tests as f64
            },
        }
    }

    /// Randomness for the runs this sequencer hands out.
    pub fn rng_mut(&mut self) -> &mut R {
        &mut self.rng
    }

    /// Start the run for the next pair.
    ///
    /// Returns `None` when every pair is done, or while the previous run has
    /// not been handed back through [`complete_run`](Self::complete_run).
    pub fn start_next_run(&mut self) -> Option<StaircaseRun> {
        if self.active.is_some() {
            return None;
        }
        let pair = *self.pairs.get(self.next_index)?;
        self.active = Some(pair);
        info!(
            frequency_hz = pair.frequency_hz,
            ear = %pair.ear,
            test_number = self.next_index + 1,
            total_tests = self.pairs.len(),
            "Starting run"
        );
        Some(StaircaseRun::new(pair, self.config.staircase.clone()))
    }

    /// Hand back a converged run and store its threshold.
    pub fn complete_run(&mut self, run: StaircaseRun) -> Result<RunSummary, SessionError> {
        let pair = run.pair();
        if self.active != Some(pair) {
            return Err(SessionError::UnexpectedRun {
                frequency_hz: pair.frequency_hz,
                ear: pair.ear,
            });
        }
        let summary = run.summary().ok_or(SessionError::NotConverged {
            frequency_hz: pair.frequency_hz,
            ear: pair.ear,
        })?;

        self.thresholds.insert(pair, summary.threshold_db);
        self.metrics.record_run(&summary);
        self.runs.push(summary.clone());
        self.active = None;
        self.next_index += 1;

        Ok(summary)
    }

    /// Run the asymmetry analysis and produce the report.
    ///
    /// Fails if any pair has not completed.
    pub fn finish(self) -> Result<SessionReport, SessionError> {
        if !self.is_complete() {
            return Err(SessionError::Incomplete {
                completed: self.completed(),
                total: self.pairs.len(),
            });
        }

        let result = asymmetry::analyze(&self.thresholds, self.config.asymmetry_margin_db);
        let metrics = self.metrics.get_metrics();

        info!(
            pairs = self.runs.len(),
            max_difference_db = result.max_difference,
            asymmetry_detected = result.asymmetry_detected,
            inconclusive_runs = metrics.inconclusive_runs,
            "Test session complete"
        );

        Ok(SessionReport {
            recommendation: result.recommendation(),
            thresholds: self.thresholds,
            result,
            runs: self.runs,
            metrics,
        })
    }

    /// Run every remaining pair to completion.
    pub async fn run<P, S, O>(
        mut self,
        player: &mut P,
        responses: &mut S,
        observer: &mut O,
        mut abort: AbortSignal,
    ) -> Result<SessionReport, SessionError>
    where
        P: TonePlayer,
        S: ResponseSource,
        O: SessionObserver,
    {
        while let Some(mut run) = self.start_next_run() {
            run_staircase(&mut run, player, responses, &mut self.rng, &mut abort).await?;
            let summary = self.complete_run(run)?;
            observer.on_pair_complete(&summary, self.progress());
        }

        let report = self.finish()?;
        observer.on_session_complete(&report.thresholds, &report.result);
        Ok(report)
    }
}
