//! Round resolution used by the local ledger's oracle callback.

use dungeon_core::service::{EncounterId, RoundResult};

use crate::dice::Dice;

/// Attack-relevant numbers for one side of a round.
#[derive(Debug, Clone, Copy)]
pub struct Attacker {
    pub str: u32,
    /// Damage die size.
    pub atk: u32,
    pub dmg: u32,
}

/// Rolls one attack. A natural 20 always hits and doubles the damage dice,
/// a natural 1 always misses.
pub fn attack(
    dice: &mut Dice,
    encounter: EncounterId,
    round: u32,
    attacker: Attacker,
    target_ac: u32,
    target_hp: u32,
) -> RoundResult {
    let roll = dice.roll(20);
    let modified = i64::from(roll) + i64::from(attacker.str);
    let crit = roll == 20;
    let hit = crit || (roll != 1 && modified >= i64::from(target_ac));
    let damage = if hit {
        let mut damage = dice.roll(attacker.atk) + attacker.dmg;
        if crit {
            damage += dice.roll(attacker.atk);
        }
        damage
    } else {
        0
    };
    RoundResult {
        encounter,
        round,
        roll,
        modified,
        hit,
        crit,
        damage,
        opponent_hp: target_hp.saturating_sub(damage),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIGHTER: Attacker = Attacker {
        str: 2,
        atk: 6,
        dmg: 1,
    };

    #[test]
    fn natural_one_misses_even_against_zero_ac() {
        let mut dice = Dice::scripted([1]);
        let result = attack(&mut dice, 1, 1, FIGHTER, 0, 10);
        assert!(!result.hit);
        assert_eq!(0, result.damage);
        assert_eq!(10, result.opponent_hp);
    }

    #[test]
    fn natural_twenty_crits_with_extra_die() {
        let mut dice = Dice::scripted([20, 4, 5]);
        let result = attack(&mut dice, 1, 3, FIGHTER, 30, 12);
        assert!(result.hit && result.crit);
        assert_eq!(10, result.damage);
        assert_eq!(2, result.opponent_hp);
        assert_eq!(3, result.round);
    }

    #[test]
    fn modified_roll_must_meet_ac() {
        let mut dice = Dice::scripted([10, 10, 3]);
        assert!(!attack(&mut dice, 1, 1, FIGHTER, 13, 12).hit);
        let hit = attack(&mut dice, 1, 2, FIGHTER, 12, 2);
        assert!(hit.hit);
        assert_eq!(0, hit.opponent_hp, "hp saturates at zero");
    }
}
