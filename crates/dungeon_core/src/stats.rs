//! Event reconciliation and statistics.
//!
//! Once an encounter is resolved its live fields only describe the final
//! round, so the per-round story is rebuilt from the result events logged
//! since the encounter was created.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Result, ServiceError};
use crate::service::{
    DungeonService, EncounterEvent, EncounterId, EncounterTicket, EventKind, EventQuery,
    LoggedEvent, RoundResult,
};

const D20_FACES: std::ops::RangeInclusive<u32> = 1..=20;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SideTally {
    pub hits: u32,
    pub misses: u32,
    pub crits: u32,
    pub nat1s: u32,
}

impl SideTally {
    fn record(&mut self, result: &RoundResult) {
        if result.hit {
            self.hits += 1;
        } else {
            self.misses += 1;
        }
        if result.crit {
            self.crits += 1;
        }
        if result.roll == 1 {
            self.nat1s += 1;
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncounterStats {
    pub rolls: u32,
    pub player: SideTally,
    pub monster: SideTally,
}

/// Whole-run roll counter and d20 face histogram.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimulationStats {
    total_rolls: u64,
    faces: BTreeMap<u32, u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceShare {
    pub face: u32,
    pub count: u64,
    /// Share of all rolls, rounded to two decimals.
    pub percentage: f64,
}

impl SimulationStats {
    fn record(&mut self, result: &RoundResult) {
        self.total_rolls += 1;
        *self.faces.entry(result.roll).or_insert(0) += 1;
    }

    pub fn total_rolls(&self) -> u64 {
        self.total_rolls
    }

    pub fn face_count(&self, face: u32) -> u64 {
        self.faces.get(&face).copied().unwrap_or(0)
    }

    pub fn distribution(&self) -> Vec<FaceShare> {
        self.faces
            .iter()
            .map(|(&face, &count)| FaceShare {
                face,
                count,
                percentage: percentage(count, self.total_rolls),
            })
            .collect()
    }
}

fn percentage(count: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let raw = count as f64 / total as f64 * 100.0;
    (raw * 100.0).round() / 100.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    PlayerWon,
    MonsterWon,
    /// Resolved without an `EncounterOver` event.
    Unrecorded,
}

impl Outcome {
    pub fn player_won(self) -> Option<bool> {
        match self {
            Outcome::PlayerWon => Some(true),
            Outcome::MonsterWon => Some(false),
            Outcome::Unrecorded => None,
        }
    }
}

/// Folded view of one encounter's events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    pub stats: EncounterStats,
    pub outcome: Outcome,
    /// Player results with no monster result for the same round.
    pub uncorrelated: u32,
    /// Uncorrelated player results that left the monster standing.
    pub missing_replies: u32,
    /// Monster results with no player result for the same round.
    pub orphaned: u32,
}

impl Reconciliation {
    /// Data-consistency warnings raised while folding.
    pub fn warnings(&self) -> u32 {
        self.missing_replies + self.orphaned + u32::from(self.outcome == Outcome::Unrecorded)
    }
}

/// Fetches every result logged for `ticket` and folds it into `sim`.
pub async fn reconcile<S: DungeonService>(
    service: &S,
    ticket: EncounterTicket,
    sim: &mut SimulationStats,
) -> Result<Reconciliation> {
    let mut events = Vec::new();
    for kind in [
        EventKind::PlayerResult,
        EventKind::MonsterResult,
        EventKind::EncounterOver,
    ] {
        let query = EventQuery::since(kind, ticket.id, ticket.from_position);
        events.extend(service.events(&query).await?);
    }
    fold_events(ticket.id, &events, sim)
}

/// Pairs player and monster results by round number, in emission order of
/// the player results, and tallies both sides.
///
/// A face outside the d20 range rejects the whole batch before anything is
/// folded into `sim`.
pub fn fold_events(
    encounter: EncounterId,
    events: &[LoggedEvent],
    sim: &mut SimulationStats,
) -> Result<Reconciliation> {
    let mut ordered: Vec<&LoggedEvent> = events
        .iter()
        .filter(|logged| logged.event.encounter() == encounter)
        .collect();
    ordered.sort_by_key(|logged| logged.position);
    for logged in &ordered {
        if let EncounterEvent::PlayerResult(result) | EncounterEvent::MonsterResult(result) =
            &logged.event
        {
            if !D20_FACES.contains(&result.roll) {
                return Err(ServiceError::Malformed(format!(
                    "encounter {encounter} round {} rolled {}",
                    result.round, result.roll
                ))
                .into());
            }
        }
    }

    let mut player_results = Vec::new();
    let mut monster_results: BTreeMap<u32, &RoundResult> = BTreeMap::new();
    let mut outcome = None;
    let mut orphaned = 0;
    for logged in ordered {
        match &logged.event {
            EncounterEvent::PlayerResult(result) => player_results.push(result),
            EncounterEvent::MonsterResult(result) => {
                if monster_results.contains_key(&result.round) {
                    warn!(
                        target: "dungeon_core.stats",
                        encounter,
                        round = result.round,
                        "duplicate monster result ignored"
                    );
                    orphaned += 1;
                } else {
                    monster_results.insert(result.round, result);
                }
            }
            EncounterEvent::EncounterOver(over) => outcome = Some(over.player_won),
        }
    }

    let mut stats = EncounterStats::default();
    let mut uncorrelated = 0;
    let mut missing_replies = 0;
    for (idx, player) in player_results.into_iter().enumerate() {
        debug!(
            target: "dungeon_core.stats",
            encounter,
            roll_number = idx + 1,
            rolled = player.roll,
            modified = player.modified,
            hit = player.hit,
            crit = player.crit,
            damage = player.damage,
            monster_hp = player.opponent_hp,
            "player result"
        );
        stats.player.record(player);
        stats.rolls += 1;
        sim.record(player);

        match monster_results.remove(&player.round) {
            Some(monster) => {
                debug!(
                    target: "dungeon_core.stats",
                    encounter,
                    rolled = monster.roll,
                    modified = monster.modified,
                    hit = monster.hit,
                    crit = monster.crit,
                    damage = monster.damage,
                    player_hp = monster.opponent_hp,
                    "monster result"
                );
                stats.monster.record(monster);
                stats.rolls += 1;
                sim.record(monster);
            }
            None => {
                // The monster does not swing back once it is down.
                if player.opponent_hp != 0 {
                    warn!(
                        target: "dungeon_core.stats",
                        encounter,
                        round = player.round,
                        "player result without monster result"
                    );
                    missing_replies += 1;
                }
                uncorrelated += 1;
            }
        }
    }

    for round in monster_results.keys() {
        warn!(
            target: "dungeon_core.stats",
            encounter,
            round,
            "monster result without player result"
        );
        orphaned += 1;
    }

    let outcome = match outcome {
        Some(true) => Outcome::PlayerWon,
        Some(false) => Outcome::MonsterWon,
        None => {
            warn!(target: "dungeon_core.stats", encounter, "no EncounterOver event");
            Outcome::Unrecorded
        }
    };

    Ok(Reconciliation {
        stats,
        outcome,
        uncorrelated,
        missing_replies,
        orphaned,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HarnessError;
    use crate::service::EncounterOver;

    fn result(encounter: EncounterId, round: u32, roll: u32, hit: bool, hp: u32) -> RoundResult {
        RoundResult {
            encounter,
            round,
            roll,
            modified: roll as i64 + 1,
            hit,
            crit: roll == 20,
            damage: if hit { 4 } else { 0 },
            opponent_hp: hp,
        }
    }

    fn logged(position: u64, event: EncounterEvent) -> LoggedEvent {
        LoggedEvent { position, event }
    }

    #[test]
    fn pairs_by_round_and_counts_both_faces() {
        let events = vec![
            logged(10, EncounterEvent::PlayerResult(result(1, 1, 20, true, 4))),
            logged(10, EncounterEvent::MonsterResult(result(1, 1, 1, false, 12))),
            logged(11, EncounterEvent::PlayerResult(result(1, 2, 15, true, 0))),
            logged(11, EncounterEvent::EncounterOver(EncounterOver {
                encounter: 1,
                player_won: true,
            })),
        ];
        let mut sim = SimulationStats::default();
        let rec = fold_events(1, &events, &mut sim).unwrap();

        assert_eq!(Outcome::PlayerWon, rec.outcome);
        assert_eq!(3, rec.stats.rolls);
        assert_eq!(2, rec.stats.player.hits);
        assert_eq!(1, rec.stats.player.crits);
        assert_eq!(1, rec.stats.monster.misses);
        assert_eq!(1, rec.stats.monster.nat1s);
        assert_eq!(1, rec.uncorrelated);
        assert_eq!(0, rec.missing_replies);
        assert_eq!(0, rec.orphaned);
        assert_eq!(0, rec.warnings());
        // 2 per correlated pair + 1 per uncorrelated player result
        assert_eq!(3, sim.total_rolls());
        assert_eq!(1, sim.face_count(1));
        assert_eq!(1, sim.face_count(20));
    }

    #[test]
    fn out_of_order_streams_still_pair() {
        let events = vec![
            logged(5, EncounterEvent::MonsterResult(result(9, 2, 7, true, 3))),
            logged(6, EncounterEvent::MonsterResult(result(9, 1, 8, true, 8))),
            logged(2, EncounterEvent::PlayerResult(result(9, 1, 3, false, 12))),
            logged(4, EncounterEvent::PlayerResult(result(9, 2, 4, false, 12))),
        ];
        let mut sim = SimulationStats::default();
        let rec = fold_events(9, &events, &mut sim).unwrap();
        assert_eq!(4, rec.stats.rolls);
        assert_eq!(2, rec.stats.monster.hits);
        assert_eq!(0, rec.uncorrelated);
        assert_eq!(Outcome::Unrecorded, rec.outcome);
        assert_eq!(1, rec.warnings());
    }

    #[test]
    fn foreign_and_orphaned_events_are_not_folded() {
        let events = vec![
            logged(1, EncounterEvent::PlayerResult(result(2, 1, 11, true, 5))),
            logged(1, EncounterEvent::MonsterResult(result(3, 1, 12, true, 5))),
            logged(2, EncounterEvent::MonsterResult(result(2, 4, 13, true, 5))),
        ];
        let mut sim = SimulationStats::default();
        let rec = fold_events(2, &events, &mut sim).unwrap();
        assert_eq!(1, rec.stats.rolls);
        assert_eq!(1, rec.orphaned);
        assert_eq!(1, rec.uncorrelated);
        // unanswered round 1, orphaned round 4, no EncounterOver
        assert_eq!(1, rec.missing_replies);
        assert_eq!(3, rec.warnings());
        assert_eq!(1, sim.total_rolls());
        assert_eq!(0, sim.face_count(12));
    }

    #[test]
    fn out_of_range_faces_are_malformed_and_fold_nothing() {
        for bad in [0, 21] {
            let events = vec![
                logged(1, EncounterEvent::PlayerResult(result(4, 1, 12, true, 5))),
                logged(1, EncounterEvent::MonsterResult(result(4, 1, bad, false, 9))),
            ];
            let mut sim = SimulationStats::default();
            let err = fold_events(4, &events, &mut sim).unwrap_err();
            assert!(
                matches!(err, HarnessError::Service(ServiceError::Malformed(_))),
                "face {bad}: {err:?}"
            );
            assert!(!err.is_recoverable());
            assert_eq!(SimulationStats::default(), sim);
        }
    }

    #[test]
    fn distribution_shares_round_to_two_decimals() {
        let mut sim = SimulationStats::default();
        for roll in [1, 1, 20] {
            sim.record(&result(1, 1, roll, false, 1));
        }
        insta::assert_json_snapshot!(sim.distribution(), @r###"
        [
          {
            "face": 1,
            "count": 2,
            "percentage": 66.67
          },
          {
            "face": 20,
            "count": 1,
            "percentage": 33.33
          }
        ]
        "###);
        let total: f64 = sim.distribution().iter().map(|s| s.percentage).sum();
        assert!((total - 100.0).abs() < 0.05);
    }
}
