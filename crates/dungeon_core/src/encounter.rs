//! `Created -> RoundPending -> RoundInFlight -> (RoundPending | Resolved)`.
//! A round is only submitted from `RoundPending`, which is only entered
//! after a read showed the in-flight flag cleared.

use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{debug, info};

use crate::error::{HarnessError, Result};
use crate::gate::BalanceGate;
use crate::seed::SeedSource;
use crate::service::{
    Amount, DungeonService, EncounterSnapshot, EncounterTicket, MonsterId, ParticipantId,
    RoundRequest,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub settle: Duration,
    /// `None` waits forever.
    pub max_wait: Option<Duration>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(50),
            settle: Duration::from_millis(50),
            max_wait: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EncounterSettings {
    pub provider_key: String,
    pub round_fee: Amount,
    pub poll: PollPolicy,
    pub healing_threshold: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncounterPhase {
    Created,
    RoundPending,
    RoundInFlight,
    Resolved,
}

#[derive(Debug, Clone)]
pub struct EncounterRun {
    pub ticket: EncounterTicket,
    pub monster: MonsterId,
    pub last_snapshot: EncounterSnapshot,
    pub round_requests: u32,
    pub potions_drunk: u32,
}

pub struct EncounterMachine<'a, S> {
    service: &'a S,
    gate: &'a BalanceGate,
    settings: &'a EncounterSettings,
    who: &'a ParticipantId,
    monster: MonsterId,
    ticket: EncounterTicket,
    phase: EncounterPhase,
    snapshot: EncounterSnapshot,
    round_requests: u32,
    potions_drunk: u32,
    polls_this_round: u32,
    submitted_at: Option<Instant>,
}

impl<'a, S: DungeonService> EncounterMachine<'a, S> {
    pub async fn start(
        service: &'a S,
        gate: &'a BalanceGate,
        settings: &'a EncounterSettings,
        who: &'a ParticipantId,
        monster: MonsterId,
    ) -> Result<Self> {
        let ticket = service.new_encounter(who, monster).await?;
        info!(
            target: "dungeon_core.encounter",
            participant = %who,
            encounter = ticket.id,
            monster,
            "encounter created"
        );
        Ok(Self {
            service,
            gate,
            settings,
            who,
            monster,
            ticket,
            phase: EncounterPhase::Created,
            snapshot: EncounterSnapshot::default(),
            round_requests: 0,
            potions_drunk: 0,
            polls_this_round: 0,
            submitted_at: None,
        })
    }

    pub fn phase(&self) -> EncounterPhase {
        self.phase
    }

    pub fn ticket(&self) -> EncounterTicket {
        self.ticket
    }

    pub fn snapshot(&self) -> &EncounterSnapshot {
        &self.snapshot
    }

    /// Performs one transition and returns the phase it landed in.
    pub async fn step(&mut self, seeds: &mut SeedSource) -> Result<EncounterPhase> {
        self.phase = match self.phase {
            EncounterPhase::Created => {
                self.snapshot = self.service.encounter(self.ticket.id).await?;
                if self.snapshot.is_over() {
                    EncounterPhase::Resolved
                } else if self.snapshot.is_rolling {
                    self.submitted_at = Some(Instant::now());
                    EncounterPhase::RoundInFlight
                } else {
                    EncounterPhase::RoundPending
                }
            }
            EncounterPhase::RoundPending => {
                self.heal_if_needed().await?;
                self.submit_round(seeds).await?;
                EncounterPhase::RoundInFlight
            }
            EncounterPhase::RoundInFlight => self.poll().await?,
            EncounterPhase::Resolved => EncounterPhase::Resolved,
        };
        Ok(self.phase)
    }

    pub async fn run_to_end(mut self, seeds: &mut SeedSource) -> Result<EncounterRun> {
        while self.step(seeds).await? != EncounterPhase::Resolved {}
        info!(
            target: "dungeon_core.encounter",
            encounter = self.ticket.id,
            player_hp = self.snapshot.player_hp,
            monster_hp = self.snapshot.monster_hp,
            requests = self.round_requests,
            "encounter over"
        );
        Ok(EncounterRun {
            ticket: self.ticket,
            monster: self.monster,
            last_snapshot: self.snapshot,
            round_requests: self.round_requests,
            potions_drunk: self.potions_drunk,
        })
    }

    async fn heal_if_needed(&mut self) -> Result<()> {
        if self.snapshot.player_hp > self.settings.healing_threshold {
            return Ok(());
        }
        let player = self.service.player(self.who).await?;
        if player.healing_potions == 0 {
            return Ok(());
        }
        info!(
            target: "dungeon_core.encounter",
            participant = %self.who,
            encounter = self.ticket.id,
            hp = self.snapshot.player_hp,
            "drink healing potion"
        );
        self.service
            .drink_healing_potion(self.who, self.ticket.id)
            .await?;
        self.potions_drunk += 1;
        Ok(())
    }

    async fn submit_round(&mut self, seeds: &mut SeedSource) -> Result<()> {
        debug_assert!(!self.snapshot.is_rolling, "round already in flight");
        self.gate
            .ensure_funded(self.service, self.who, self.settings.round_fee)
            .await?;
        let request = RoundRequest {
            seed: seeds.next_seed(),
            provider_key: self.settings.provider_key.clone(),
            fee: self.settings.round_fee,
        };
        self.round_requests += 1;
        info!(
            target: "dungeon_core.encounter",
            encounter = self.ticket.id,
            request = self.round_requests,
            seed = request.seed,
            "begin combat round"
        );
        self.service
            .begin_combat_round(self.who, self.ticket.id, &request)
            .await?;
        self.polls_this_round = 0;
        self.submitted_at = Some(Instant::now());
        Ok(())
    }

    async fn poll(&mut self) -> Result<EncounterPhase> {
        let policy = self.settings.poll;
        let delay = if self.polls_this_round == 0 {
            policy.settle
        } else {
            policy.interval
        };
        sleep(delay).await;
        self.polls_this_round += 1;
        self.snapshot = self.service.encounter(self.ticket.id).await?;

        if self.snapshot.is_rolling {
            let waited = self
                .submitted_at
                .map(|at| at.elapsed())
                .unwrap_or_default();
            if let Some(max_wait) = policy.max_wait {
                if waited >= max_wait {
                    return Err(HarnessError::TimedOut {
                        encounter: self.ticket.id,
                        waited,
                    });
                }
            }
            debug!(
                target: "dungeon_core.encounter",
                encounter = self.ticket.id,
                polls = self.polls_this_round,
                "."
            );
            return Ok(EncounterPhase::RoundInFlight);
        }

        if self.snapshot.is_over() {
            Ok(EncounterPhase::Resolved)
        } else {
            Ok(EncounterPhase::RoundPending)
        }
    }
}
