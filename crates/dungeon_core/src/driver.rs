//! Top-level simulation loop: rounds × players, strictly sequential.

use std::collections::HashMap;

use tracing::{info, warn};

use crate::config::{RosterEntry, SimulationConfig};
use crate::encounter::{EncounterMachine, EncounterSettings};
use crate::error::{HarnessError, Result};
use crate::gate::BalanceGate;
use crate::progression::{progress_player, ProgressionMemory};
use crate::report::{EncounterRecord, PlayerSummary, RunLog, SimulationReport, TimeoutRecord};
use crate::roster::{ensure_player, Roster};
use crate::seed::SeedSource;
use crate::service::{DungeonService, FeeSchedule, ParticipantId, PlayerCaps};
use crate::stats::{reconcile, Outcome, SimulationStats};

/// Runs the whole simulation described by `config` against `service`.
///
/// Any error other than a round timeout aborts the run and discards the
/// partial statistics.
pub async fn run_simulation<S: DungeonService>(
    service: &S,
    config: &SimulationConfig,
    run_id: impl Into<String>,
) -> Result<SimulationReport> {
    config.validate()?;
    let mut sim = Simulation::prepare(service, config).await?;
    let players = sim.players.clone();
    for sim_round in 1..=config.simulation.rounds() {
        info!(target: "dungeon_core.driver", sim_round, "simulation round");
        for entry in &players {
            sim.play_turn_or_skip(entry, sim_round).await?;
        }
    }
    sim.finish(run_id.into(), config.simulation.rounds()).await
}

struct Simulation<'a, S> {
    service: &'a S,
    gate: BalanceGate,
    settings: EncounterSettings,
    fees: FeeSchedule,
    caps: PlayerCaps,
    roster: Roster,
    players: Vec<RosterEntry>,
    seeds: SeedSource,
    memory: ProgressionMemory,
    stats: SimulationStats,
    log: RunLog,
    potions_drunk: HashMap<ParticipantId, u32>,
}

impl<'a, S: DungeonService> Simulation<'a, S> {
    async fn prepare(service: &'a S, config: &SimulationConfig) -> Result<Self> {
        let fees = service.fee_schedule().await?;
        let caps = service.player_caps().await?;
        info!(
            target: "dungeon_core.driver",
            round_fee = %fees.round_fee,
            stat_fee = %fees.stat_fee,
            potion_fee = %fees.healing_potion_fee,
            "fee schedule"
        );

        let roster = Roster::ensure(service, &config.monsters).await?;
        let players = config.roster();
        for entry in &players {
            ensure_player(service, &entry.participant, &entry.name).await?;
        }

        Ok(Self {
            service,
            gate: BalanceGate::new(config.funding.funder()),
            settings: EncounterSettings {
                provider_key: config.oracle.provider_key(),
                round_fee: fees.round_fee,
                poll: config.polling.poll_policy(),
                healing_threshold: config.healing.threshold(),
            },
            fees,
            caps,
            roster,
            players,
            seeds: SeedSource::new(config.simulation.seed),
            memory: ProgressionMemory::default(),
            stats: SimulationStats::default(),
            log: RunLog::default(),
            potions_drunk: HashMap::new(),
        })
    }

    async fn play_turn_or_skip(&mut self, entry: &RosterEntry, sim_round: u32) -> Result<()> {
        match self.play_turn(entry, sim_round).await {
            Err(HarnessError::TimedOut { encounter, waited }) => {
                warn!(
                    target: "dungeon_core.driver",
                    player = %entry.name,
                    encounter,
                    ?waited,
                    "round timed out, skipping player"
                );
                self.log.timeouts.push(TimeoutRecord {
                    player: entry.name.clone(),
                    sim_round,
                    encounter,
                    waited_ms: waited.as_millis() as u64,
                });
                Ok(())
            }
            other => other,
        }
    }

    async fn play_turn(&mut self, entry: &RosterEntry, sim_round: u32) -> Result<()> {
        let who = &entry.participant;
        if self.memory.should_progress(who, sim_round) {
            info!(target: "dungeon_core.driver", player = %entry.name, "increase player stats");
            progress_player(self.service, &self.gate, who, self.fees.stat_fee, &self.caps).await?;
        }

        let monster_id = self
            .memory
            .next_monster(who, self.roster.highest_monster_id());
        ensure_player(self.service, who, &entry.name).await?;
        if let Some(monster) = self.roster.monster(monster_id) {
            info!(
                target: "dungeon_core.driver",
                monster = %monster.name,
                ac = monster.ac,
                hp = monster.hp,
                str = monster.str,
                atk = monster.atk,
                dmg = monster.dmg,
                "monster"
            );
        }
        let player = self.service.player(who).await?;
        info!(
            target: "dungeon_core.driver",
            player = %player.name,
            ac = player.ac,
            hp = player.hp,
            str = player.str,
            atk = player.atk,
            dmg = player.dmg,
            potions = player.healing_potions,
            "player"
        );

        let machine =
            EncounterMachine::start(self.service, &self.gate, &self.settings, who, monster_id)
                .await?;
        let run = machine.run_to_end(&mut self.seeds).await?;
        *self.potions_drunk.entry(who.clone()).or_insert(0) += run.potions_drunk;

        let reconciliation = reconcile(self.service, run.ticket, &mut self.stats).await?;
        self.log.consistency_warnings += reconciliation.warnings();
        info!(
            target: "dungeon_core.driver",
            encounter = run.ticket.id,
            rolls = reconciliation.stats.rolls,
            player_hits = reconciliation.stats.player.hits,
            player_misses = reconciliation.stats.player.misses,
            player_crits = reconciliation.stats.player.crits,
            player_nat1 = reconciliation.stats.player.nat1s,
            monster_hits = reconciliation.stats.monster.hits,
            monster_misses = reconciliation.stats.monster.misses,
            monster_crits = reconciliation.stats.monster.crits,
            monster_nat1 = reconciliation.stats.monster.nat1s,
            outcome = ?reconciliation.outcome,
            "encounter results"
        );

        if let Some(player_won) = reconciliation.outcome.player_won() {
            self.memory.record_outcome(who, monster_id, player_won);
        }
        if reconciliation.outcome == Outcome::MonsterWon {
            self.restock_potion(who).await?;
        }

        self.log.encounters.push(EncounterRecord {
            participant: who.clone(),
            player: entry.name.clone(),
            sim_round,
            monster: monster_id,
            encounter: run.ticket.id,
            outcome: reconciliation.outcome,
            round_requests: run.round_requests,
            potions_drunk: run.potions_drunk,
            stats: reconciliation.stats,
        });
        Ok(())
    }

    /// After a loss, buys one potion unless the player is already at the cap.
    async fn restock_potion(&mut self, who: &ParticipantId) -> Result<()> {
        let player = self.service.player(who).await?;
        if player.healing_potions >= self.caps.healing_potions {
            return Ok(());
        }
        info!(target: "dungeon_core.driver", player = %player.name, "buy healing potion");
        self.gate
            .ensure_funded(self.service, who, self.fees.healing_potion_fee)
            .await?;
        self.service.buy_healing_potion(who).await?;
        Ok(())
    }

    async fn finish(self, run_id: String, rounds: u32) -> Result<SimulationReport> {
        let mut summaries = Vec::with_capacity(self.players.len());
        for entry in &self.players {
            let player = self.service.player(&entry.participant).await?;
            let memory = self.memory.get(&entry.participant);
            summaries.push(PlayerSummary {
                name: player.name,
                won: player.won,
                lost: player.lost,
                potions_drunk: self
                    .potions_drunk
                    .get(&entry.participant)
                    .copied()
                    .unwrap_or(0),
                highest_monster: self.roster.name_of(memory.highest_defeated).to_string(),
            });
        }
        Ok(SimulationReport::new(
            run_id, rounds, &self.stats, summaries, self.log,
        ))
    }
}
