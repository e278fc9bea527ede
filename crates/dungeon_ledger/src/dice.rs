use std::collections::VecDeque;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub const DEFAULT_SEED: u64 = 42;

/// Oracle dice. Scripted faces are consumed first, then the seeded RNG.
#[derive(Debug)]
pub struct Dice {
    script: VecDeque<u32>,
    rng: StdRng,
}

impl Dice {
    pub fn seeded(seed: u64) -> Self {
        Self {
            script: VecDeque::new(),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn scripted(faces: impl IntoIterator<Item = u32>) -> Self {
        Self {
            script: faces.into_iter().collect(),
            rng: StdRng::seed_from_u64(DEFAULT_SEED),
        }
    }

    /// Mixes the request seed into the RNG the way a VRF ties its output
    /// to the request.
    pub fn reseed(&mut self, request_seed: u64) {
        let base: u64 = self.rng.gen();
        self.rng = StdRng::seed_from_u64(base ^ request_seed);
    }

    /// Rolls one die with `sides` faces (at least one).
    pub fn roll(&mut self, sides: u32) -> u32 {
        let sides = sides.max(1);
        match self.script.pop_front() {
            Some(face) => face.clamp(1, sides),
            None => self.rng.gen_range(1..=sides),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_runs_out_into_rng() {
        let mut dice = Dice::scripted([20, 1, 99]);
        assert_eq!(20, dice.roll(20));
        assert_eq!(1, dice.roll(20));
        assert_eq!(6, dice.roll(6), "scripted faces clamp to the die");
        let face = dice.roll(20);
        assert!((1..=20).contains(&face));
    }

    #[test]
    fn seeded_dice_repeat() {
        let mut a = Dice::seeded(DEFAULT_SEED);
        let mut b = Dice::seeded(DEFAULT_SEED);
        a.reseed(9);
        b.reseed(9);
        let first: Vec<u32> = (0..5).map(|_| a.roll(20)).collect();
        let second: Vec<u32> = (0..5).map(|_| b.roll(20)).collect();
        assert_eq!(first, second);
    }
}
