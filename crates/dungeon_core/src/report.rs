use std::fmt::Write as _;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::service::{EncounterId, MonsterId, ParticipantId};
use crate::stats::{EncounterStats, FaceShare, Outcome, SimulationStats};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationReport {
    pub id: String,
    pub timestamp: String,
    pub rounds: u32,
    pub total_rolls: u64,
    pub faces: Vec<FaceShare>,
    pub players: Vec<PlayerSummary>,
    pub encounters: Vec<EncounterRecord>,
    pub timeouts: Vec<TimeoutRecord>,
    pub consistency_warnings: u32,
}

impl SimulationReport {
    pub fn new(
        id: impl Into<String>,
        rounds: u32,
        stats: &SimulationStats,
        players: Vec<PlayerSummary>,
        log: RunLog,
    ) -> Self {
        Self {
            id: id.into(),
            timestamp: Utc::now().to_rfc3339(),
            rounds,
            total_rolls: stats.total_rolls(),
            faces: stats.distribution(),
            players,
            consistency_warnings: log.consistency_warnings,
            encounters: log.encounters,
            timeouts: log.timeouts,
        }
    }

    /// Console summary: d20 distribution, then per-player results.
    pub fn render_summary(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "d20 stats");
        let _ = writeln!(out, "total rolls {}", self.total_rolls);
        for share in &self.faces {
            let _ = writeln!(
                out,
                "{} = {} ({:.2}%)",
                share.face, share.count, share.percentage
            );
        }
        let _ = writeln!(out, "Player stats");
        for player in &self.players {
            let _ = writeln!(out, "{}", player.name);
            let _ = writeln!(out, "Won: {}", player.won);
            let _ = writeln!(out, "Lost: {}", player.lost);
            let _ = writeln!(out, "Healing Potions Consumed: {}", player.potions_drunk);
            let _ = writeln!(out, "Highest Monster Defeated: {}", player.highest_monster);
        }
        if !self.timeouts.is_empty() {
            let _ = writeln!(out, "Timed out encounters: {}", self.timeouts.len());
        }
        if self.consistency_warnings > 0 {
            let _ = writeln!(out, "Consistency warnings: {}", self.consistency_warnings);
        }
        out
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlayerSummary {
    pub name: String,
    pub won: u32,
    pub lost: u32,
    pub potions_drunk: u32,
    pub highest_monster: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EncounterRecord {
    pub participant: ParticipantId,
    pub player: String,
    pub sim_round: u32,
    pub monster: MonsterId,
    pub encounter: EncounterId,
    pub outcome: Outcome,
    pub round_requests: u32,
    pub potions_drunk: u32,
    pub stats: EncounterStats,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeoutRecord {
    pub player: String,
    pub sim_round: u32,
    pub encounter: EncounterId,
    pub waited_ms: u64,
}

/// Per-run bookkeeping the driver accumulates alongside the stats.
#[derive(Debug, Clone, Default)]
pub struct RunLog {
    pub encounters: Vec<EncounterRecord>,
    pub timeouts: Vec<TimeoutRecord>,
    pub consistency_warnings: u32,
}
