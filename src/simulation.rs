//! Simulated listener for dry runs and tests.
//!
//! The player and responder share the last stimulus presented. The responder
//! answers "heard" when that stimulus is at or above the ear's hearing level.
//! If nothing was played since the previous answer (a catch trial), it
//! answers "heard" only with the profile's false-alarm probability.

use crate::error::PlaybackError;
use crate::model::Ear;
use crate::random::RandomSource;
use crate::stimulus::{ResponseSource, Stimulus, TonePlayer};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Hearing levels of a simulated subject.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HearingProfile {
    pub left_db: f64,
    pub right_db: f64,
    #[serde(default)]
    pub false_alarm_probability: f64,
}

impl HearingProfile {
    pub fn new(left_db: f64, right_db: f64) -> Self {
        Self {
            left_db,
            right_db,
            false_alarm_probability: 0.0,
        }
    }

    /// Same hearing level in both ears.
    pub fn uniform(level_db: f64) -> Self {
        Self::new(level_db, level_db)
    }

    pub fn with_false_alarms(mut self, probability: f64) -> Self {
        self.false_alarm_probability = probability;
        self
    }

    pub fn hearing_level(&self, ear: Ear) -> f64 {
        match ear {
            Ear::Left => self.left_db,
            Ear::Right => self.right_db,
        }
    }

    pub fn hears(&self, stimulus: &Stimulus) -> bool {
        stimulus.level_db >= self.hearing_level(stimulus.ear)
    }
}

type LastStimulus = Arc<Mutex<Option<Stimulus>>>;

/// Build a connected player / responder pair for one simulated subject.
pub fn simulated_subject<R: RandomSource + Send>(
    profile: HearingProfile,
    rng: R,
) -> (SimulatedPlayer, SimulatedResponder<R>) {
    let last: LastStimulus = Arc::new(Mutex::new(None));
    (
        SimulatedPlayer {
            last: Arc::clone(&last),
            played: 0,
        },
        SimulatedResponder { profile, last, rng },
    )
}

/// Player half of a simulated subject. Playback is instantaneous.
pub struct SimulatedPlayer {
    last: LastStimulus,
    played: usize,
}

impl SimulatedPlayer {
    pub fn played(&self) -> usize {
        self.played
    }
}

impl TonePlayer for SimulatedPlayer {
    async fn play(&mut self, stimulus: Stimulus) -> Result<(), PlaybackError> {
        let mut slot = self.last.lock().map_err(|_| {
            PlaybackError::DeviceUnavailable("simulated subject state poisoned".to_string())
        })?;
        *slot = Some(stimulus);
        self.played += 1;
        Ok(())
    }
}

/// Responder half of a simulated subject. Never closes.
pub struct SimulatedResponder<R> {
    profile: HearingProfile,
    last: LastStimulus,
    rng: R,
}

impl<R: RandomSource + Send> ResponseSource for SimulatedResponder<R> {
    async fn next_response(&mut self) -> Option<bool> {
        let presented = self.last.lock().ok().and_then(|mut slot| slot.take());
        let heard = match presented {
            Some(stimulus) => self.profile.hears(&stimulus),
            None => self.rng.chance(self.profile.false_alarm_probability),
        };
        debug!(
            presented = presented.is_some(),
            heard,
            "Simulated subject answered"
        );
        Some(heard)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StaircaseConfig;
    use crate::model::TestPair;
    use crate::random::{ScriptedRandom, SeededRandom};
    use crate::runner::{run_staircase, AbortSignal};
    use crate::staircase::StaircaseRun;
    use std::time::Duration;

    fn tone(ear: Ear, level_db: f64) -> Stimulus {
        Stimulus::new(1000, ear, level_db, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_responder_follows_hearing_level() {
        let (mut player, mut responder) =
            simulated_subject(HearingProfile::new(-40.0, -20.0), ScriptedRandom::never());

        player.play(tone(Ear::Left, -40.0)).await.unwrap();
        assert_eq!(responder.next_response().await, Some(true));

        player.play(tone(Ear::Right, -30.0)).await.unwrap();
        assert_eq!(responder.next_response().await, Some(false));
        assert_eq!(player.played(), 2);
    }

    #[tokio::test]
    async fn test_catch_trial_false_alarms() {
        let profile = HearingProfile::uniform(-30.0).with_false_alarms(0.5);

        let (_, mut honest) = simulated_subject(profile, ScriptedRandom::never());
        assert_eq!(honest.next_response().await, Some(false));

        let (_, mut guesser) = simulated_subject(profile, ScriptedRandom::always());
        assert_eq!(guesser.next_response().await, Some(true));
    }

    #[tokio::test]
    async fn test_stimulus_is_consumed_by_answer() {
        let (mut player, mut responder) =
            simulated_subject(HearingProfile::uniform(-60.0), ScriptedRandom::never());
        player.play(tone(Ear::Left, -10.0)).await.unwrap();
        assert_eq!(responder.next_response().await, Some(true));
        // Nothing played since: treated as a catch trial
        assert_eq!(responder.next_response().await, Some(false));
    }

    #[tokio::test]
    async fn test_adaptive_run_brackets_hearing_level() {
        let config = StaircaseConfig {
            catch_trial_probability: 0.1,
            tone_duration_ms: 1,
            ..StaircaseConfig::adaptive()
        };
        let mut run = StaircaseRun::new(TestPair::new(2000, Ear::Left), config);
        let (mut player, mut responder) =
            simulated_subject(HearingProfile::uniform(-35.0), SeededRandom::from_seed(5));

        let summary = run_staircase(
            &mut run,
            &mut player,
            &mut responder,
            &mut SeededRandom::from_seed(9),
            &mut AbortSignal::never(),
        )
        .await
        .unwrap();

        assert!(!summary.inconclusive);
        assert_eq!(summary.false_alarms, 0);
        assert!((summary.threshold_db - -35.0).abs() <= 10.0);
    }
}
