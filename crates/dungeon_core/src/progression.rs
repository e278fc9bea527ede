//! Between-encounter progression: stat upgrades and monster tier choice.

use std::collections::HashMap;

use tracing::info;

use crate::error::Result;
use crate::gate::BalanceGate;
use crate::report::EncounterRecord;
use crate::service::{Amount, DungeonService, MonsterId, ParticipantId, Player, PlayerCaps, Stat};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlayerMemory {
    /// `None` until the player has a recorded outcome.
    pub won_last: Option<bool>,
    pub highest_defeated: MonsterId,
}

/// Process-local memory of each participant's last outcome and best tier.
#[derive(Debug, Clone, Default)]
pub struct ProgressionMemory {
    entries: HashMap<ParticipantId, PlayerMemory>,
}

impl ProgressionMemory {
    /// Rebuilds the memory from recorded encounters, oldest first.
    pub fn replay<'a>(records: impl IntoIterator<Item = &'a EncounterRecord>) -> Self {
        let mut memory = Self::default();
        for record in records {
            if let Some(won) = record.outcome.player_won() {
                memory.record_outcome(&record.participant, record.monster, won);
            }
        }
        memory
    }

    pub fn get(&self, who: &ParticipantId) -> PlayerMemory {
        self.entries.get(who).copied().unwrap_or_default()
    }

    pub fn record_outcome(&mut self, who: &ParticipantId, monster: MonsterId, player_won: bool) {
        let entry = self.entries.entry(who.clone()).or_default();
        entry.won_last = Some(player_won);
        if player_won && monster > entry.highest_defeated {
            entry.highest_defeated = monster;
        }
    }

    /// Upgrades run from the second simulation round on, and never right
    /// after a loss.
    pub fn should_progress(&self, who: &ParticipantId, sim_round: u32) -> bool {
        sim_round > 1 && self.get(who).won_last == Some(true)
    }

    /// One tier above the best defeated monster, capped at the top tier.
    pub fn next_monster(&self, who: &ParticipantId, highest_monster_id: MonsterId) -> MonsterId {
        (self.get(who).highest_defeated + 1).min(highest_monster_id)
    }
}

/// Stats still below their cap, in upgrade order.
pub fn pending_upgrades(player: &Player, caps: &PlayerCaps) -> Vec<Stat> {
    Stat::ALL
        .into_iter()
        .filter(|&stat| player.stat(stat) < caps.cap(stat))
        .collect()
}

/// Buys one step of every stat that is still below its cap.
pub async fn progress_player<S: DungeonService>(
    service: &S,
    gate: &BalanceGate,
    who: &ParticipantId,
    stat_fee: Amount,
    caps: &PlayerCaps,
) -> Result<Vec<Stat>> {
    let player = service.player(who).await?;
    let upgrades = pending_upgrades(&player, caps);
    for &stat in &upgrades {
        gate.ensure_funded(service, who, stat_fee).await?;
        service.upgrade_stat(who, stat).await?;
        info!(
            target: "dungeon_core.progression",
            participant = %who,
            stat = stat.label(),
            from = player.stat(stat),
            "stat upgraded"
        );
    }
    Ok(upgrades)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::{EncounterStats, Outcome};

    fn caps() -> PlayerCaps {
        PlayerCaps {
            ac: 20,
            hp: 100,
            str: 10,
            atk: 12,
            dmg: 10,
            healing_potions: 5,
        }
    }

    #[test]
    fn capped_stats_are_skipped() {
        let player = Player {
            ac: 20,
            hp: 40,
            str: 10,
            atk: 4,
            dmg: 10,
            ..Default::default()
        };
        assert_eq!(
            vec![Stat::HitPoints, Stat::AttackDice],
            pending_upgrades(&player, &caps())
        );

        let maxed = Player {
            ac: 20,
            hp: 100,
            str: 10,
            atk: 12,
            dmg: 10,
            ..Default::default()
        };
        assert!(pending_upgrades(&maxed, &caps()).is_empty());
    }

    #[test]
    fn tiers_climb_one_at_a_time_and_stop_at_the_top() {
        let who = ParticipantId::new("a");
        let mut memory = ProgressionMemory::default();
        assert_eq!(1, memory.next_monster(&who, 3));

        memory.record_outcome(&who, 1, true);
        assert_eq!(2, memory.next_monster(&who, 3));
        memory.record_outcome(&who, 2, false);
        assert_eq!(2, memory.next_monster(&who, 3));
        memory.record_outcome(&who, 2, true);
        memory.record_outcome(&who, 3, true);
        memory.record_outcome(&who, 3, true);
        assert_eq!(3, memory.next_monster(&who, 3));
    }

    #[test]
    fn progression_skips_first_round_and_losses() {
        let who = ParticipantId::new("a");
        let mut memory = ProgressionMemory::default();
        assert!(!memory.should_progress(&who, 1));
        assert!(!memory.should_progress(&who, 2));

        memory.record_outcome(&who, 1, true);
        assert!(!memory.should_progress(&who, 1));
        assert!(memory.should_progress(&who, 2));

        memory.record_outcome(&who, 2, false);
        assert!(!memory.should_progress(&who, 3));
    }

    #[test]
    fn replay_rebuilds_from_records() {
        let record = |participant: &str, monster, outcome| EncounterRecord {
            participant: ParticipantId::new(participant),
            player: participant.to_string(),
            sim_round: 1,
            monster,
            encounter: 0,
            outcome,
            round_requests: 1,
            potions_drunk: 0,
            stats: EncounterStats::default(),
        };
        let records = vec![
            record("a", 1, Outcome::PlayerWon),
            record("a", 2, Outcome::Unrecorded),
            record("b", 1, Outcome::MonsterWon),
        ];
        let memory = ProgressionMemory::replay(&records);
        assert_eq!(
            PlayerMemory {
                won_last: Some(true),
                highest_defeated: 1
            },
            memory.get(&ParticipantId::new("a"))
        );
        assert_eq!(Some(false), memory.get(&ParticipantId::new("b")).won_last);
    }
}
