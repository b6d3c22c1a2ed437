//! Staircase module implementing the transformed up-down procedure.
//!
//! This module contains the state machine for one (frequency, ear) run. It
//! performs no I/O: the caller asks for the next trial, reports when the
//! response window opens, and feeds back the answer (or a timeout). See
//! [`crate::runner`] for the async driver.

use crate::config::StaircaseConfig;
use crate::model::{Direction, Ear, TestPair, TrialRecord};
use crate::random::RandomSource;
use crate::stimulus::Stimulus;
use crate::threshold::{self, Estimate};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Lifecycle of a run.
///
/// Scoring happens synchronously inside [`StaircaseRun::record_response`],
/// so it never shows up as an observable state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunState {
    /// Between trials, waiting for the caller to request the next one
    #[default]
    Idle,
    /// A stimulus has been planned and is being presented
    Presenting,
    /// The response window is open
    AwaitingResponse,
    Converged,
    Aborted,
}

/// Why a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    TrialCap,
    ReversalTarget,
    HeardImmediately,
}

/// A single planned presentation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrialPlan {
    /// 1-based trial number; retries keep the number of the trial they repeat
    pub trial_number: u32,
    /// 1 for the first presentation, incremented on each retry
    pub attempt: u32,
    pub level_db: f64,
    /// No tone is emitted, but a response is still solicited
    pub is_catch_trial: bool,
}

/// Result of scoring a response.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ResponseOutcome {
    /// Not awaiting a response; nothing changed
    Ignored,
    /// Request the next trial
    Continue,
    /// Present the same level again
    Retry(TrialPlan),
    Converged(Termination),
}

/// Final report of a converged run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub frequency_hz: u32,
    pub ear: Ear,
    pub threshold_db: f64,
    pub inconclusive: bool,
    pub termination: Termination,
    pub trials: u32,
    pub presentations: usize,
    pub retries: u32,
    pub catch_trials: usize,
    pub false_alarms: usize,
    pub reversal_levels: Vec<f64>,
}

impl RunSummary {
    pub fn pair(&self) -> TestPair {
        TestPair::new(self.frequency_hz, self.ear)
    }
}

/// Adaptive staircase for one frequency/ear pair.
pub struct StaircaseRun {
    pair: TestPair,
    config: StaircaseConfig,
    state: RunState,
    current_level: f64,
    step_size: f64,
    direction: Direction,
    reversal_levels: Vec<f64>,
    trial_count: u32,
    responses: Vec<TrialRecord>,
    /// Consecutive misses at the current level
    retry_count: u32,
    consecutive_heard: u32,
    retries_total: u32,
    current_trial: Option<TrialPlan>,
    termination: Option<Termination>,
    /// Level heard when the run converged on its first detection
    heard_level: Option<f64>,
}

impl StaircaseRun {
    /// Create a run in the `Idle` state.
    ///
    /// The configuration is expected to be validated already; the start
    /// level is clamped into the level range regardless.
    pub fn new(pair: TestPair, config: StaircaseConfig) -> Self {
        let start = clamp_level(config.start_level_db, &config);
        Self {
            pair,
            state: RunState::Idle,
            current_level: start,
            step_size: config.large_step_db,
            direction: Direction::None,
            reversal_levels: Vec::new(),
            trial_count: 0,
            responses: Vec::new(),
            retry_count: 0,
            consecutive_heard: 0,
            retries_total: 0,
            current_trial: None,
            termination: None,
            heard_level: None,
            config,
        }
    }

    pub fn pair(&self) -> TestPair {
        self.pair
    }

    pub fn config(&self) -> &StaircaseConfig {
        &self.config
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn current_level(&self) -> f64 {
        self.current_level
    }

    pub fn step_size(&self) -> f64 {
        self.step_size
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn reversal_levels(&self) -> &[f64] {
        &self.reversal_levels
    }

    pub fn trial_count(&self) -> u32 {
        self.trial_count
    }

    pub fn responses(&self) -> &[TrialRecord] {
        &self.responses
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Trial currently being presented or awaiting an answer.
    pub fn current_trial(&self) -> Option<TrialPlan> {
        self.current_trial
    }

    pub fn termination(&self) -> Option<Termination> {
        self.termination
    }

    /// True once the run has converged or been aborted.
    pub fn is_finished(&self) -> bool {
        matches!(self.state, RunState::Converged | RunState::Aborted)
    }

    /// Plan the next trial and move to `Presenting`.
    ///
    /// Returns `None` when the run is finished (converging it first if the
    /// trial cap has been reached). While a trial is in flight the in-flight
    /// plan is returned unchanged.
    pub fn next_trial<R: RandomSource + ?Sized>(&mut self, rng: &mut R) -> Option<TrialPlan> {
        match self.state {
            RunState::Converged | RunState::Aborted => return None,
            RunState::Presenting | RunState::AwaitingResponse => return self.current_trial,
            RunState::Idle => {}
        }

        if self.trial_count >= self.config.max_trials {
            self.converge(Termination::TrialCap);
            return None;
        }

        self.trial_count += 1;
        let plan = TrialPlan {
            trial_number: self.trial_count,
            attempt: 1,
            level_db: self.current_level,
            is_catch_trial: rng.chance(self.config.catch_trial_probability),
        };

        debug!(
            frequency_hz = self.pair.frequency_hz,
            ear = %self.pair.ear,
            trial = plan.trial_number,
            level_db = plan.level_db,
            catch_trial = plan.is_catch_trial,
            "Presenting trial"
        );

        self.current_trial = Some(plan);
        self.state = RunState::Presenting;
        Some(plan)
    }

    /// Tone to emit for the trial in flight. Catch trials emit nothing.
    pub fn stimulus(&self) -> Option<Stimulus> {
        let plan = self.current_trial.filter(|plan| !plan.is_catch_trial)?;
        Some(Stimulus::new(
            self.pair.frequency_hz,
            self.pair.ear,
            plan.level_db,
            Duration::from_millis(self.config.tone_duration_ms),
        ))
    }

    /// Open the response window (`Presenting` -> `AwaitingResponse`).
    ///
    /// Returns false if no trial is being presented.
    pub fn open_response_window(&mut self) -> bool {
        if self.state != RunState::Presenting {
            return false;
        }
        self.state = RunState::AwaitingResponse;
        true
    }

    /// Score an explicit heard / not-heard answer.
    ///
    /// Answers arriving outside `AwaitingResponse` are ignored and leave the
    /// run untouched; this is what makes late or duplicate signals harmless.
    pub fn record_response(&mut self, heard: bool) -> ResponseOutcome {
        if self.state != RunState::AwaitingResponse {
            debug!(
                frequency_hz = self.pair.frequency_hz,
                ear = %self.pair.ear,
                state = ?self.state,
                "Ignoring response outside the response window"
            );
            return ResponseOutcome::Ignored;
        }
        let Some(plan) = self.current_trial.take() else {
            self.state = RunState::Idle;
            return ResponseOutcome::Ignored;
        };

        self.responses
            .push(TrialRecord::new(plan.level_db, plan.is_catch_trial, heard));

        if plan.is_catch_trial {
            if heard {
                warn!(
                    frequency_hz = self.pair.frequency_hz,
                    ear = %self.pair.ear,
                    trial = plan.trial_number,
                    "False alarm on catch trial"
                );
            }
            self.state = RunState::Idle;
            return self.after_trial();
        }

        if heard {
            self.retry_count = 0;
            if self.config.immediate_converge_on_heard {
                self.heard_level = Some(plan.level_db);
                return self.converge(Termination::HeardImmediately);
            }
            self.update_level(true);
        } else {
            self.retry_count += 1;
            if self.retry_count < self.config.max_retries {
                self.retries_total += 1;
                let retry = TrialPlan {
                    attempt: plan.attempt + 1,
                    ..plan
                };
                debug!(
                    frequency_hz = self.pair.frequency_hz,
                    ear = %self.pair.ear,
                    trial = retry.trial_number,
                    attempt = retry.attempt,
                    "Not heard, presenting the same level again"
                );
                self.current_trial = Some(retry);
                self.state = RunState::Presenting;
                return ResponseOutcome::Retry(retry);
            }
            self.retry_count = 0;
            self.update_level(false);
        }

        if let Some(target) = self.config.reversals_target {
            if self.reversal_levels.len() >= target as usize {
                return self.converge(Termination::ReversalTarget);
            }
        }

        self.state = RunState::Idle;
        self.after_trial()
    }

    /// Score an expired response window as "not heard".
    pub fn record_timeout(&mut self) -> ResponseOutcome {
        if self.state == RunState::AwaitingResponse {
            warn!(
                frequency_hz = self.pair.frequency_hz,
                ear = %self.pair.ear,
                timeout_ms = ?self.config.response_timeout_ms,
                "Response window expired, scoring as not heard"
            );
        }
        self.record_response(false)
    }

    /// Move the level one step after a scored answer.
    ///
    /// A "heard" answer steps down only after `consecutive_heard_required`
    /// heard answers in a row; a miss steps up at once. A change of direction
    /// records the pre-update level as a reversal, and the first reversal
    /// switches the step from large to small for the rest of the run.
    pub fn update_level(&mut self, heard: bool) {
        let previous = self.current_level;
        let new_level = if heard {
            self.consecutive_heard += 1;
            if self.consecutive_heard < self.config.consecutive_heard_required {
                return;
            }
            self.consecutive_heard = 0;
            let next = previous - self.step_size;
            if self.direction == Direction::Up {
                self.record_reversal(previous);
            }
            self.direction = Direction::Down;
            next
        } else {
            self.consecutive_heard = 0;
            let next = previous + self.step_size;
            if self.direction == Direction::Down {
                self.record_reversal(previous);
            }
            self.direction = Direction::Up;
            next
        };

        self.current_level = clamp_level(new_level, &self.config);
    }

    /// Abort the run. No threshold is produced afterwards.
    ///
    /// Returns false if the run had already finished.
    pub fn abort(&mut self) -> bool {
        if self.is_finished() {
            return false;
        }
        info!(
            frequency_hz = self.pair.frequency_hz,
            ear = %self.pair.ear,
            trials = self.trial_count,
            "Run aborted"
        );
        self.current_trial = None;
        self.state = RunState::Aborted;
        true
    }

    /// Threshold estimate; only available once converged.
    pub fn estimate(&self) -> Option<Estimate> {
        if self.state != RunState::Converged {
            return None;
        }
        if let Some(level) = self.heard_level {
            return Some(Estimate {
                threshold_db: level,
                inconclusive: false,
            });
        }
        Some(threshold::extract(
            self.config.threshold_rule,
            &self.reversal_levels,
            &self.responses,
        ))
    }

    /// Summary of a converged run.
    pub fn summary(&self) -> Option<RunSummary> {
        let estimate = self.estimate()?;
        let termination = self.termination?;
        Some(RunSummary {
            frequency_hz: self.pair.frequency_hz,
            ear: self.pair.ear,
            threshold_db: estimate.threshold_db,
            inconclusive: estimate.inconclusive,
            termination,
            trials: self.trial_count,
            presentations: self.responses.len(),
            retries: self.retries_total,
            catch_trials: self.responses.iter().filter(|r| r.is_catch_trial).count(),
            false_alarms: self.responses.iter().filter(|r| r.is_false_alarm()).count(),
            reversal_levels: self.reversal_levels.clone(),
        })
    }

    fn record_reversal(&mut self, level: f64) {
        self.reversal_levels.push(level);
        if self.reversal_levels.len() == 1 {
            self.step_size = self.config.small_step_db;
        }
        debug!(
            frequency_hz = self.pair.frequency_hz,
            ear = %self.pair.ear,
            level_db = level,
            reversals = self.reversal_levels.len(),
            "Reversal recorded"
        );
    }

    fn after_trial(&mut self) -> ResponseOutcome {
        if self.trial_count >= self.config.max_trials {
            return self.converge(Termination::TrialCap);
        }
        ResponseOutcome::Continue
    }

    fn converge(&mut self, termination: Termination) -> ResponseOutcome {
        self.state = RunState::Converged;
        self.current_trial = None;
        self.termination = Some(termination);
        if let Some(estimate) = self.estimate() {
            info!(
                frequency_hz = self.pair.frequency_hz,
                ear = %self.pair.ear,
                threshold_db = estimate.threshold_db,
                inconclusive = estimate.inconclusive,
                termination = ?termination,
                trials = self.trial_count,
                reversals = self.reversal_levels.len(),
                "Run converged"
            );
        }
        ResponseOutcome::Converged(termination)
    }
}

/// Keep a level inside the configured range. Unlike `f64::clamp` this never
/// panics on an inverted or NaN range.
fn clamp_level(level: f64, config: &StaircaseConfig) -> f64 {
    level.max(config.min_level_db).min(config.max_level_db)
}
