//! Collaborator seams: the tone player and the response source.
//!
//! The engine never synthesizes audio or reads input itself. A [`TonePlayer`]
//! is asked to present a [`Stimulus`], and a [`ResponseSource`] delivers the
//! subject's heard / not-heard answers. Both push-style (channel) and
//! pull-style (scripted) response adapters are provided.

use crate::error::PlaybackError;
use crate::model::Ear;
use serde::Serialize;
use std::collections::VecDeque;
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

/// A tone presentation request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Stimulus {
    pub frequency_hz: u32,
    pub ear: Ear,
    pub level_db: f64,
    pub duration: Duration,
}

impl Stimulus {
    pub fn new(frequency_hz: u32, ear: Ear, level_db: f64, duration: Duration) -> Self {
        Self {
            frequency_hz,
            ear,
            level_db,
            duration,
        }
    }

    /// Linear gain for the level, where 0 dB is full scale.
    pub fn amplitude(&self) -> f64 {
        10f64.powf(self.level_db / 20.0)
    }
}

/// Plays tones on behalf of the engine.
pub trait TonePlayer: Send {
    /// Present the stimulus. Resolves once playback has completed.
    fn play(
        &mut self,
        stimulus: Stimulus,
    ) -> impl Future<Output = Result<(), PlaybackError>> + Send;
}

/// Delivers the subject's answers.
pub trait ResponseSource: Send {
    /// Drop answers that arrived before the current response window opened.
    fn discard_pending(&mut self) {}

    /// Wait for the next answer. `None` means the source has closed and no
    /// further answers will arrive.
    fn next_response(&mut self) -> impl Future<Output = Option<bool>> + Send;
}

/// Create a push-style response adapter.
///
/// The sender side is handed to whatever produces answers (a keyboard reader,
/// a UI event handler); the receiver is given to the engine.
pub fn response_channel() -> (ResponseSender, ChannelResponses) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ResponseSender { tx }, ChannelResponses { rx })
}

/// Sending half of [`response_channel`].
#[derive(Debug, Clone)]
pub struct ResponseSender {
    tx: mpsc::UnboundedSender<bool>,
}

impl ResponseSender {
    /// Push an answer. Returns false if the engine side has gone away.
    pub fn send(&self, heard: bool) -> bool {
        self.tx.send(heard).is_ok()
    }

    pub fn heard(&self) -> bool {
        self.send(true)
    }

    pub fn not_heard(&self) -> bool {
        self.send(false)
    }
}

/// Receiving half of [`response_channel`].
#[derive(Debug)]
pub struct ChannelResponses {
    rx: mpsc::UnboundedReceiver<bool>,
}

impl ResponseSource for ChannelResponses {
    fn discard_pending(&mut self) {
        let mut dropped = 0usize;
        while self.rx.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            debug!(dropped, "Discarded answers received outside the response window");
        }
    }

    async fn next_response(&mut self) -> Option<bool> {
        self.rx.recv().await
    }
}

/// Pull-style source replaying a fixed list of answers, then closing.
#[derive(Debug, Clone, Default)]
pub struct ScriptedResponses {
    answers: VecDeque<bool>,
}

impl ScriptedResponses {
    pub fn new(answers: impl IntoIterator<Item = bool>) -> Self {
        Self {
            answers: answers.into_iter().collect(),
        }
    }

    pub fn remaining(&self) -> usize {
        self.answers.len()
    }
}

impl ResponseSource for ScriptedResponses {
    async fn next_response(&mut self) -> Option<bool> {
        self.answers.pop_front()
    }
}

/// Player that only logs the request and waits out the tone duration.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingPlayer;

impl TonePlayer for LoggingPlayer {
    async fn play(&mut self, stimulus: Stimulus) -> Result<(), PlaybackError> {
        debug!(
            frequency_hz = stimulus.frequency_hz,
            ear = %stimulus.ear,
            level_db = stimulus.level_db,
            amplitude = stimulus.amplitude(),
            duration_ms = stimulus.duration.as_millis() as u64,
            "Playing tone"
        );
        tokio::time::sleep(stimulus.duration).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_amplitude_conversion() {
        let full = Stimulus::new(1000, Ear::Left, 0.0, Duration::from_millis(300));
        assert_eq!(full.amplitude(), 1.0);

        let quiet = Stimulus::new(1000, Ear::Left, -20.0, Duration::from_millis(300));
        assert!((quiet.amplitude() - 0.1).abs() < 1e-12);

        let floor = Stimulus::new(1000, Ear::Right, -60.0, Duration::from_millis(300));
        assert!((floor.amplitude() - 0.001).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_channel_delivers_in_order() {
        let (sender, mut responses) = response_channel();
        assert!(sender.heard());
        assert!(sender.not_heard());

        assert_eq!(responses.next_response().await, Some(true));
        assert_eq!(responses.next_response().await, Some(false));

        drop(sender);
        assert_eq!(responses.next_response().await, None);
    }

    #[tokio::test]
    async fn test_channel_discards_stale_answers() {
        let (sender, mut responses) = response_channel();
        sender.heard();
        sender.heard();
        responses.discard_pending();

        sender.not_heard();
        assert_eq!(responses.next_response().await, Some(false));
    }

    #[tokio::test]
    async fn test_send_after_receiver_dropped() {
        let (sender, responses) = response_channel();
        drop(responses);
        assert!(!sender.heard());
    }

    #[tokio::test]
    async fn test_scripted_responses_close_when_exhausted() {
        let mut responses = ScriptedResponses::new([true, false]);
        // Scripted answers are not stale input, so discarding keeps them
        responses.discard_pending();
        assert_eq!(responses.remaining(), 2);

        assert_eq!(responses.next_response().await, Some(true));
        assert_eq!(responses.next_response().await, Some(false));
        assert_eq!(responses.next_response().await, None);
    }

    #[tokio::test]
    async fn test_logging_player_completes() {
        let mut player = LoggingPlayer;
        let stimulus = Stimulus::new(500, Ear::Right, -30.0, Duration::from_millis(5));
        assert!(player.play(stimulus).await.is_ok());
    }
}
