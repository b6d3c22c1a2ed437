//! Async driver for a single staircase run.
//!
//! Bridges [`StaircaseRun`] to a [`TonePlayer`] and a [`ResponseSource`],
//! applying the configured playback policy and response timeout, and honours
//! an external abort signal.
//!
//! Without a response timeout, a source that never answers stalls the run.
//! Callers that need liveness must configure `response_timeout_ms` or abort.

use crate::error::SessionError;
use crate::random::RandomSource;
use crate::staircase::{ResponseOutcome, RunSummary, StaircaseRun};
use crate::stimulus::{ResponseSource, Stimulus, TonePlayer};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Create an abort handle and the signal it drives.
pub fn abort_channel() -> (AbortHandle, AbortSignal) {
    let (tx, rx) = watch::channel(false);
    (AbortHandle { tx }, AbortSignal { rx })
}

/// Triggers an abort. Cloneable so signal handlers and UIs can share it.
#[derive(Debug, Clone)]
pub struct AbortHandle {
    tx: watch::Sender<bool>,
}

impl AbortHandle {
    pub fn abort(&self) {
        let _ = self.tx.send(true);
    }

    pub fn subscribe(&self) -> AbortSignal {
        AbortSignal {
            rx: self.tx.subscribe(),
        }
    }
}

/// Receiving side of an abort.
#[derive(Debug, Clone)]
pub struct AbortSignal {
    rx: watch::Receiver<bool>,
}

impl AbortSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        let (_, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_aborted(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once an abort has been requested. If every handle is dropped
    /// without aborting, this never resolves.
    pub async fn aborted(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// What ended a response window.
enum Answer {
    Response(bool),
    TimedOut,
    Closed,
}

/// Drive `run` to convergence.
///
/// On abort, closed response source or playback failure the run is moved to
/// `Aborted` and no threshold is produced.
pub async fn run_staircase<P, S, R>(
    run: &mut StaircaseRun,
    player: &mut P,
    responses: &mut S,
    rng: &mut R,
    abort: &mut AbortSignal,
) -> Result<RunSummary, SessionError>
where
    P: TonePlayer,
    S: ResponseSource,
    R: RandomSource + ?Sized,
{
    let pair = run.pair();
    let aborted = || SessionError::Aborted {
        frequency_hz: pair.frequency_hz,
        ear: pair.ear,
    };

    if run.next_trial(rng).is_some() {
        loop {
            if abort.is_aborted() {
                run.abort();
                return Err(aborted());
            }

            let stimulus = run.stimulus();
            let step = tokio::select! {
                biased;
                _ = abort.aborted() => None,
                answer = present_and_await(run, player, responses, stimulus) => Some(answer),
            };

            let answer = match step {
                None => {
                    run.abort();
                    return Err(aborted());
                }
                Some(Err(e)) => {
                    run.abort();
                    return Err(e);
                }
                Some(Ok(answer)) => answer,
            };

            let outcome = match answer {
                Answer::Response(heard) => run.record_response(heard),
                Answer::TimedOut => run.record_timeout(),
                Answer::Closed => {
                    run.abort();
                    return Err(SessionError::ResponseSourceClosed);
                }
            };

            match outcome {
                ResponseOutcome::Retry(plan) => {
                    debug!(trial = plan.trial_number, attempt = plan.attempt, "Retrying trial");
                }
                ResponseOutcome::Converged(_) => break,
                ResponseOutcome::Continue | ResponseOutcome::Ignored => {
                    if run.next_trial(rng).is_none() {
                        break;
                    }
                }
            }
        }
    }

    run.summary().ok_or(SessionError::NotConverged {
        frequency_hz: pair.frequency_hz,
        ear: pair.ear,
    })
}

/// Present the stimulus (if any) and wait for the answer, following the
/// run's playback policy.
async fn present_and_await<P, S>(
    run: &mut StaircaseRun,
    player: &mut P,
    responses: &mut S,
    stimulus: Option<Stimulus>,
) -> Result<Answer, SessionError>
where
    P: TonePlayer,
    S: ResponseSource,
{
    let wait_for_playback = run.config().wait_for_playback_completion;
    let timeout = run.config().response_timeout_ms.map(Duration::from_millis);

    if wait_for_playback {
        if let Some(stimulus) = stimulus {
            player.play(stimulus).await?;
        }
        responses.discard_pending();
        run.open_response_window();
        return Ok(await_answer(responses, timeout).await);
    }

    // The window opens with playback; a playback failure does not void the answer
    responses.discard_pending();
    run.open_response_window();
    let playback = async {
        match stimulus {
            Some(stimulus) => player.play(stimulus).await,
            None => Ok(()),
        }
    };
    tokio::pin!(playback);
    let answer = await_answer(responses, timeout);
    tokio::pin!(answer);

    // Playback is polled alongside the window but never gates scoring
    let mut playing = true;
    let answer = loop {
        tokio::select! {
            biased;
            played = &mut playback, if playing => {
                playing = false;
                if let Err(e) = played {
                    warn!(error = %e, "Tone playback failed, keeping the response");
                }
            }
            answer = &mut answer => break answer,
        }
    };
    if playing {
        debug!("Response window closed before playback finished, dropping playback");
    }
    Ok(answer)
}

async fn await_answer<S: ResponseSource>(responses: &mut S, timeout: Option<Duration>) -> Answer {
    let received = match timeout {
        Some(limit) => match tokio::time::timeout(limit, responses.next_response()).await {
            Ok(received) => received,
            Err(_) => return Answer::TimedOut,
        },
        None => responses.next_response().await,
    };
    received.map_or(Answer::Closed, Answer::Response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StaircaseConfig;
    use crate::error::PlaybackError;
    use crate::model::{Ear, TestPair};
    use crate::random::ScriptedRandom;
    use crate::staircase::{RunState, Termination};
    use crate::stimulus::ScriptedResponses;

    /// Records every stimulus it is asked to play.
    #[derive(Default)]
    struct RecordingPlayer {
        played: Vec<Stimulus>,
    }

    impl TonePlayer for RecordingPlayer {
        async fn play(&mut self, stimulus: Stimulus) -> Result<(), PlaybackError> {
            self.played.push(stimulus);
            Ok(())
        }
    }

    struct FailingPlayer;

    impl TonePlayer for FailingPlayer {
        async fn play(&mut self, stimulus: Stimulus) -> Result<(), PlaybackError> {
            Err(PlaybackError::Failed {
                frequency_hz: stimulus.frequency_hz,
                ear: stimulus.ear,
                reason: "no device".to_string(),
            })
        }
    }

    /// Starts playback and never finishes it.
    struct HangingPlayer {
        started: usize,
    }

    impl TonePlayer for HangingPlayer {
        async fn play(&mut self, _stimulus: Stimulus) -> Result<(), PlaybackError> {
            self.started += 1;
            std::future::pending().await
        }
    }

    /// Never answers and never closes.
    struct SilentResponses;

    impl ResponseSource for SilentResponses {
        async fn next_response(&mut self) -> Option<bool> {
            std::future::pending().await
        }
    }

    fn config(max_trials: u32) -> StaircaseConfig {
        StaircaseConfig {
            max_trials,
            max_retries: 0,
            catch_trial_probability: 0.0,
            tone_duration_ms: 1,
            ..StaircaseConfig::default()
        }
    }

    fn new_run(config: StaircaseConfig) -> StaircaseRun {
        StaircaseRun::new(TestPair::new(1000, Ear::Right), config)
    }

    #[tokio::test]
    async fn test_run_converges_with_scripted_answers() {
        let mut run = new_run(config(5));
        let mut player = RecordingPlayer::default();
        let mut responses = ScriptedResponses::new([true, true, false, true, false]);

        let summary = run_staircase(
            &mut run,
            &mut player,
            &mut responses,
            &mut ScriptedRandom::never(),
            &mut AbortSignal::never(),
        )
        .await
        .unwrap();

        assert_eq!(summary.threshold_db, -35.0);
        assert_eq!(summary.termination, Termination::TrialCap);
        assert_eq!(summary.reversal_levels, vec![-50.0, -30.0, -40.0]);

        let levels: Vec<f64> = player.played.iter().map(|s| s.level_db).collect();
        assert_eq!(levels, vec![-10.0, -30.0, -50.0, -30.0, -40.0]);
        assert!(player.played.iter().all(|s| s.ear == Ear::Right));
        assert_eq!(responses.remaining(), 0);
    }

    #[tokio::test]
    async fn test_catch_trials_are_not_played() {
        let mut run = new_run(StaircaseConfig {
            catch_trial_probability: 0.5,
            ..config(4)
        });
        let mut player = RecordingPlayer::default();
        let mut responses = ScriptedResponses::new([true, false, true, true]);
        let mut rng = ScriptedRandom::new(vec![false, true, false, true], false);

        let summary = run_staircase(
            &mut run,
            &mut player,
            &mut responses,
            &mut rng,
            &mut AbortSignal::never(),
        )
        .await
        .unwrap();

        assert_eq!(player.played.len(), 2);
        assert_eq!(summary.catch_trials, 2);
        assert_eq!(summary.false_alarms, 1);
        assert_eq!(summary.presentations, 4);
    }

    #[tokio::test]
    async fn test_retries_replay_same_level() {
        let mut run = new_run(StaircaseConfig {
            max_retries: 2,
            ..config(2)
        });
        let mut player = RecordingPlayer::default();
        let mut responses = ScriptedResponses::new([false, false, true]);

        let summary = run_staircase(
            &mut run,
            &mut player,
            &mut responses,
            &mut ScriptedRandom::never(),
            &mut AbortSignal::never(),
        )
        .await
        .unwrap();

        let levels: Vec<f64> = player.played.iter().map(|s| s.level_db).collect();
        assert_eq!(levels, vec![-10.0, -10.0, 0.0]);
        assert_eq!(summary.trials, 2);
        assert_eq!(summary.retries, 1);
        assert_eq!(summary.presentations, 3);
    }

    #[tokio::test]
    async fn test_timeout_scores_not_heard() {
        let mut run = new_run(StaircaseConfig {
            response_timeout_ms: Some(10),
            ..config(3)
        });
        let mut player = RecordingPlayer::default();

        let summary = run_staircase(
            &mut run,
            &mut player,
            &mut SilentResponses,
            &mut ScriptedRandom::never(),
            &mut AbortSignal::never(),
        )
        .await
        .unwrap();

        assert!(run.responses().iter().all(|r| !r.heard));
        assert_eq!(summary.trials, 3);
        assert_eq!(run.current_level(), 0.0);
        // Never heard: no transitions
        assert!(summary.inconclusive);
        assert_eq!(summary.threshold_db, 0.0);
    }

    #[tokio::test]
    async fn test_closed_source_fails_run() {
        let mut run = new_run(config(5));
        let mut responses = ScriptedResponses::new([true]);

        let err = run_staircase(
            &mut run,
            &mut RecordingPlayer::default(),
            &mut responses,
            &mut ScriptedRandom::never(),
            &mut AbortSignal::never(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, SessionError::ResponseSourceClosed));
        assert_eq!(run.state(), RunState::Aborted);
        assert!(run.summary().is_none());
    }

    #[tokio::test]
    async fn test_abort_before_start() {
        let (handle, mut signal) = abort_channel();
        handle.abort();

        let mut run = new_run(config(5));
        let err = run_staircase(
            &mut run,
            &mut RecordingPlayer::default(),
            &mut ScriptedResponses::new([true; 5]),
            &mut ScriptedRandom::never(),
            &mut signal,
        )
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            SessionError::Aborted {
                frequency_hz: 1000,
                ear: Ear::Right
            }
        ));
        assert_eq!(run.state(), RunState::Aborted);
    }

    #[tokio::test]
    async fn test_abort_while_awaiting_response() {
        let (handle, mut signal) = abort_channel();
        let mut run = new_run(config(5));
        let mut player = RecordingPlayer::default();

        let mut silent = SilentResponses;
        let mut rng = ScriptedRandom::never();

        let (result, _) = tokio::join!(
            run_staircase(&mut run, &mut player, &mut silent, &mut rng, &mut signal),
            async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                handle.abort();
            }
        );

        assert!(matches!(result, Err(SessionError::Aborted { .. })));
        assert_eq!(run.state(), RunState::Aborted);
        assert!(run.responses().is_empty());
        assert!(run.estimate().is_none());
    }

    #[tokio::test]
    async fn test_dropped_handle_never_aborts() {
        let (handle, mut signal) = abort_channel();
        drop(handle);

        let mut run = new_run(config(2));
        let summary = run_staircase(
            &mut run,
            &mut RecordingPlayer::default(),
            &mut ScriptedResponses::new([true, true]),
            &mut ScriptedRandom::never(),
            &mut signal,
        )
        .await;
        assert!(summary.is_ok());
    }

    #[tokio::test]
    async fn test_playback_failure_when_waiting() {
        let mut run = new_run(config(5));
        let err = run_staircase(
            &mut run,
            &mut FailingPlayer,
            &mut ScriptedResponses::new([true; 5]),
            &mut ScriptedRandom::never(),
            &mut AbortSignal::never(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, SessionError::Playback(_)));
        assert_eq!(run.state(), RunState::Aborted);
    }

    #[tokio::test]
    async fn test_playback_failure_tolerated_without_waiting() {
        let mut run = new_run(StaircaseConfig {
            wait_for_playback_completion: false,
            ..config(3)
        });
        let summary = run_staircase(
            &mut run,
            &mut FailingPlayer,
            &mut ScriptedResponses::new([true, false, true]),
            &mut ScriptedRandom::never(),
            &mut AbortSignal::never(),
        )
        .await
        .unwrap();

        assert_eq!(summary.trials, 3);
        assert_eq!(summary.reversal_levels, vec![-30.0, -10.0]);
    }

    #[tokio::test]
    async fn test_hanging_playback_does_not_block_scoring_without_waiting() {
        let mut run = new_run(StaircaseConfig {
            wait_for_playback_completion: false,
            response_timeout_ms: Some(10),
            ..config(2)
        });
        let mut player = HangingPlayer { started: 0 };
        let mut responses = ScriptedResponses::new([true, true]);
        let mut rng = ScriptedRandom::never();
        let mut signal = AbortSignal::never();

        let summary = tokio::time::timeout(
            Duration::from_millis(500),
            run_staircase(&mut run, &mut player, &mut responses, &mut rng, &mut signal),
        )
        .await
        .expect("run stalled on playback")
        .unwrap();

        assert_eq!(player.started, 2);
        assert_eq!(summary.trials, 2);
        assert_eq!(responses.remaining(), 0);
        assert!(run.responses().iter().all(|r| r.heard));
        assert_eq!(run.current_level(), -50.0);
    }

    #[tokio::test]
    async fn test_hanging_playback_times_out_without_waiting() {
        let mut run = new_run(StaircaseConfig {
            wait_for_playback_completion: false,
            response_timeout_ms: Some(10),
            ..config(2)
        });
        let mut player = HangingPlayer { started: 0 };

        let summary = tokio::time::timeout(
            Duration::from_millis(500),
            run_staircase(
                &mut run,
                &mut player,
                &mut SilentResponses,
                &mut ScriptedRandom::never(),
                &mut AbortSignal::never(),
            ),
        )
        .await
        .expect("run stalled on playback")
        .unwrap();

        assert_eq!(summary.trials, 2);
        assert!(run.responses().iter().all(|r| !r.heard));
    }

    #[tokio::test]
    async fn test_subscribed_signal_sees_abort() {
        let (handle, _signal) = abort_channel();
        let mut late = handle.subscribe();
        assert!(!late.is_aborted());

        handle.abort();
        assert!(late.is_aborted());
        tokio::time::timeout(Duration::from_millis(100), late.aborted())
            .await
            .expect("subscribed signal did not fire");

        let mut run = new_run(config(5));
        let err = run_staircase(
            &mut run,
            &mut RecordingPlayer::default(),
            &mut ScriptedResponses::new([true; 5]),
            &mut ScriptedRandom::never(),
            &mut handle.subscribe(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, SessionError::Aborted { .. }));
    }
}
