//! Injectable randomness for catch-trial draws and pair shuffling.
//!
//! Everything random in the engine goes through [`RandomSource`] so that
//! convergence behaviour can be reproduced exactly in tests.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;

/// Source of randomness used by the engine.
pub trait RandomSource {
    /// Uniform sample in `[0, 1)`.
    fn next_unit(&mut self) -> f64;

    /// Uniform index in `0..upper`. `upper` is always at least 1.
    fn next_index(&mut self, upper: usize) -> usize;

    /// Bernoulli draw with the given probability of `true`.
    fn chance(&mut self, probability: f64) -> bool {
        self.next_unit() < probability
    }

    /// Shuffle a slice in place. Produces a permutation: nothing is dropped
    /// or repeated. The default is a Fisher-Yates pass over `next_index`.
    fn shuffle<T>(&mut self, items: &mut [T])
    where
        Self: Sized,
    {
        for i in (1..items.len()).rev() {
            let j = self.next_index(i + 1).min(i);
            items.swap(i, j);
        }
    }
}

/// Production source backed by `StdRng`.
pub struct SeededRandom {
    rng: StdRng,
}

impl SeededRandom {
    /// Reproducible source for a given seed.
    pub fn from_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Source seeded from the operating system.
    pub fn from_entropy() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }
}

impl RandomSource for SeededRandom {
    fn next_unit(&mut self) -> f64 {
        self.rng.gen::<f64>()
    }

    fn next_index(&mut self, upper: usize) -> usize {
        self.rng.gen_range(0..upper.max(1))
    }

    fn shuffle<T>(&mut self, items: &mut [T]) {
        items.shuffle(&mut self.rng);
    }
}

/// Deterministic source that replays a fixed catch-trial pattern.
///
/// Each `chance` call pops the next scripted decision; once the script is
/// exhausted the fallback decision is returned. `next_index` always returns
/// the upper bound minus one, so `shuffle` leaves order unchanged.
#[derive(Debug, Clone)]
pub struct ScriptedRandom {
    decisions: VecDeque<bool>,
    fallback: bool,
}

impl ScriptedRandom {
    pub fn new(decisions: Vec<bool>, fallback: bool) -> Self {
        Self {
            decisions: decisions.into(),
            fallback,
        }
    }

    /// Every draw says "not a catch trial".
    pub fn never() -> Self {
        Self::new(Vec::new(), false)
    }

    /// Every draw says "catch trial".
    pub fn always() -> Self {
        Self::new(Vec::new(), true)
    }
}

impl RandomSource for ScriptedRandom {
    fn next_unit(&mut self) -> f64 {
        if self.decisions.pop_front().unwrap_or(self.fallback) {
            0.0
        } else {
            1.0
        }
    }

    fn next_index(&mut self, upper: usize) -> usize {
        upper.saturating_sub(1)
    }

    fn chance(&mut self, probability: f64) -> bool {
        // A zero probability disables draws entirely, script or not
        probability > 0.0 && self.next_unit() < probability
    }
}
