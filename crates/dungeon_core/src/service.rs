//! Typed view of the remote dungeon service. Snapshots go stale after any
//! mutating call.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ServiceError;

pub type Amount = u128;

/// Position in the service's append-only event log (a block height on a
/// chain-backed service).
pub type LogPosition = u64;

pub type MonsterId = u32;
pub type EncounterId = u64;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ParticipantId(pub String);

impl ParticipantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonsterTemplate {
    pub name: String,
    pub ac: u32,
    pub hp: u32,
    pub str: u32,
    pub atk: u32,
    pub dmg: u32,
}

impl MonsterTemplate {
    pub fn new(name: impl Into<String>, ac: u32, hp: u32, str: u32, atk: u32, dmg: u32) -> Self {
        Self {
            name: name.into(),
            ac,
            hp,
            str,
            atk,
            dmg,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Monster {
    pub id: MonsterId,
    pub name: String,
    pub ac: u32,
    pub hp: u32,
    pub str: u32,
    pub atk: u32,
    pub dmg: u32,
}

impl Monster {
    /// An unseeded slot reads back with every attribute zeroed.
    pub fn exists(&self) -> bool {
        self.ac != 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Player {
    pub name: String,
    pub ac: u32,
    pub hp: u32,
    pub str: u32,
    pub atk: u32,
    pub dmg: u32,
    pub healing_potions: u32,
    pub won: u32,
    pub lost: u32,
}

impl Player {
    /// A participant without a player reads back with zero HP.
    pub fn exists(&self) -> bool {
        self.hp != 0
    }

    pub fn stat(&self, stat: Stat) -> u32 {
        match stat {
            Stat::ArmourClass => self.ac,
            Stat::HitPoints => self.hp,
            Stat::Strength => self.str,
            Stat::AttackDice => self.atk,
            Stat::DamageModifier => self.dmg,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stat {
    ArmourClass,
    HitPoints,
    Strength,
    AttackDice,
    DamageModifier,
}

impl Stat {
    pub const ALL: [Stat; 5] = [
        Stat::ArmourClass,
        Stat::HitPoints,
        Stat::Strength,
        Stat::AttackDice,
        Stat::DamageModifier,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Stat::ArmourClass => "AC",
            Stat::HitPoints => "HP",
            Stat::Strength => "STR",
            Stat::AttackDice => "ATK",
            Stat::DamageModifier => "DMG",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayerCaps {
    pub ac: u32,
    pub hp: u32,
    pub str: u32,
    pub atk: u32,
    pub dmg: u32,
    pub healing_potions: u32,
}

impl PlayerCaps {
    pub fn cap(&self, stat: Stat) -> u32 {
        match stat {
            Stat::ArmourClass => self.ac,
            Stat::HitPoints => self.hp,
            Stat::Strength => self.str,
            Stat::AttackDice => self.atk,
            Stat::DamageModifier => self.dmg,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeSchedule {
    pub round_fee: Amount,
    pub stat_fee: Amount,
    pub healing_potion_fee: Amount,
}

/// Returned by `new_encounter`: the assigned id and the log position from
/// which that encounter's events are visible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncounterTicket {
    pub id: EncounterId,
    pub from_position: LogPosition,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EncounterSnapshot {
    pub id: EncounterId,
    pub monster_id: MonsterId,
    pub is_rolling: bool,
    pub player_hp: u32,
    pub monster_hp: u32,
    pub rounds: u32,
}

impl EncounterSnapshot {
    pub fn is_over(&self) -> bool {
        self.player_hp == 0 || self.monster_hp == 0
    }

    /// Winner implied by the hit points alone. The player loses an exact tie.
    pub fn winner(&self) -> Option<Side> {
        if self.player_hp == 0 {
            Some(Side::Monster)
        } else if self.monster_hp == 0 {
            Some(Side::Player)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Player,
    Monster,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundRequest {
    pub seed: u64,
    pub provider_key: String,
    pub fee: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundResult {
    pub encounter: EncounterId,
    /// Per-encounter round sequence number, shared by both sides' results.
    pub round: u32,
    pub roll: u32,
    pub modified: i64,
    pub hit: bool,
    pub crit: bool,
    pub damage: u32,
    /// The opponent's hit points after this result was applied.
    pub opponent_hp: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncounterOver {
    pub encounter: EncounterId,
    pub player_won: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncounterEvent {
    PlayerResult(RoundResult),
    MonsterResult(RoundResult),
    EncounterOver(EncounterOver),
}

impl EncounterEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            EncounterEvent::PlayerResult(_) => EventKind::PlayerResult,
            EncounterEvent::MonsterResult(_) => EventKind::MonsterResult,
            EncounterEvent::EncounterOver(_) => EventKind::EncounterOver,
        }
    }

    pub fn encounter(&self) -> EncounterId {
        match self {
            EncounterEvent::PlayerResult(r) | EncounterEvent::MonsterResult(r) => r.encounter,
            EncounterEvent::EncounterOver(o) => o.encounter,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    PlayerResult,
    MonsterResult,
    EncounterOver,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggedEvent {
    pub position: LogPosition,
    pub event: EncounterEvent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogBound {
    Latest,
    At(LogPosition),
}

/// Filter for `DungeonService::events`. Positions are inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventQuery {
    pub kind: EventKind,
    pub encounter: EncounterId,
    pub from: LogPosition,
    pub to: LogBound,
}

impl EventQuery {
    pub fn since(kind: EventKind, encounter: EncounterId, from: LogPosition) -> Self {
        Self {
            kind,
            encounter,
            from,
            to: LogBound::Latest,
        }
    }
}

/// Paid calls expect the balance gate to have run for the matching fee.
#[allow(async_fn_in_trait)]
pub trait DungeonService {
    async fn fee_schedule(&self) -> Result<FeeSchedule, ServiceError>;
    async fn player_caps(&self) -> Result<PlayerCaps, ServiceError>;

    /// One past the highest seeded monster id.
    async fn next_monster_id(&self) -> Result<MonsterId, ServiceError>;
    async fn add_monster(&self, template: &MonsterTemplate) -> Result<MonsterId, ServiceError>;
    async fn monster(&self, id: MonsterId) -> Result<Monster, ServiceError>;

    async fn create_player(&self, who: &ParticipantId, name: &str) -> Result<(), ServiceError>;
    async fn player(&self, who: &ParticipantId) -> Result<Player, ServiceError>;
    async fn upgrade_stat(&self, who: &ParticipantId, stat: Stat) -> Result<(), ServiceError>;

    async fn new_encounter(
        &self,
        who: &ParticipantId,
        monster: MonsterId,
    ) -> Result<EncounterTicket, ServiceError>;
    async fn encounter(&self, id: EncounterId) -> Result<EncounterSnapshot, ServiceError>;
    async fn begin_combat_round(
        &self,
        who: &ParticipantId,
        encounter: EncounterId,
        request: &RoundRequest,
    ) -> Result<(), ServiceError>;
    async fn drink_healing_potion(
        &self,
        who: &ParticipantId,
        encounter: EncounterId,
    ) -> Result<(), ServiceError>;
    async fn buy_healing_potion(&self, who: &ParticipantId) -> Result<(), ServiceError>;

    async fn events(&self, query: &EventQuery) -> Result<Vec<LoggedEvent>, ServiceError>;

    async fn balance_of(&self, who: &ParticipantId) -> Result<Amount, ServiceError>;
    async fn transfer(
        &self,
        from: &ParticipantId,
        to: &ParticipantId,
        amount: Amount,
    ) -> Result<(), ServiceError>;
    async fn increase_allowance(&self, owner: &ParticipantId, amount: Amount)
        -> Result<(), ServiceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_tie_goes_to_the_monster() {
        let snapshot = EncounterSnapshot {
            player_hp: 0,
            monster_hp: 0,
            ..Default::default()
        };
        assert!(snapshot.is_over());
        assert_eq!(Some(Side::Monster), snapshot.winner());
    }

    #[test]
    fn live_encounter_has_no_winner() {
        let snapshot = EncounterSnapshot {
            player_hp: 4,
            monster_hp: 9,
            ..Default::default()
        };
        assert!(!snapshot.is_over());
        assert_eq!(None, snapshot.winner());
    }
}
