//! Randomness used by the rules: dice and uniform picks (card draws,
//! random destinations).
//!
//! The engine never reaches for a global RNG; callers hand it a
//! [`DiceSource`]. Production code uses [`RandomDice`], tests use
//! [`LoadedDice`] to script exact outcomes.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;

pub trait DiceSource {
    /// One six-sided die, 1..=6
    fn roll_die(&mut self) -> u8;

    /// Uniform index in 0..len. `len` is never zero.
    fn pick(&mut self, len: usize) -> usize;

    fn roll_pair(&mut self) -> (u8, u8) {
        (self.roll_die(), self.roll_die())
    }
}

/// Dice backed by a real RNG
pub struct RandomDice<R: Rng = StdRng> {
    rng: R,
}

impl RandomDice<StdRng> {
    pub fn from_entropy() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl<R: Rng> RandomDice<R> {
    pub fn new(rng: R) -> Self {
        Self { rng }
    }
}

impl<R: Rng> DiceSource for RandomDice<R> {
    fn roll_die(&mut self) -> u8 {
        self.rng.gen_range(1..=6)
    }

    fn pick(&mut self, len: usize) -> usize {
        self.rng.gen_range(0..len)
    }
}

/// Scripted dice for deterministic games.
///
/// Dice values and picks are consumed in order. Once a queue runs dry the
/// source falls back to 1 for dice and 0 for picks.
#[derive(Debug, Clone, Default)]
pub struct LoadedDice {
    dice: VecDeque<u8>,
    picks: VecDeque<usize>,
}

impl LoadedDice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue one roll of two dice
    pub fn then_roll(mut self, d1: u8, d2: u8) -> Self {
        self.dice.push_back(d1);
        self.dice.push_back(d2);
        self
    }

    /// Queue a pick result
    pub fn then_pick(mut self, index: usize) -> Self {
        self.picks.push_back(index);
        self
    }

    pub fn push_roll(&mut self, d1: u8, d2: u8) {
        self.dice.push_back(d1);
        self.dice.push_back(d2);
    }

    pub fn push_pick(&mut self, index: usize) {
        self.picks.push_back(index);
    }
}

impl DiceSource for LoadedDice {
    fn roll_die(&mut self) -> u8 {
        self.dice.pop_front().unwrap_or(1)
    }

    fn pick(&mut self, len: usize) -> usize {
        self.picks.pop_front().unwrap_or(0) % len.max(1)
    }
}
