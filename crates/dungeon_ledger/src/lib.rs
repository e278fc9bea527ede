//! In-process dungeon service.
//!
//! Holds balances, allowances, monsters, players and encounters, and keeps
//! an append-only event log addressed by block height. Combat rounds are
//! not resolved on submission: the oracle fulfils a request only after the
//! encounter has been read a configurable number of times, which gives the
//! harness the same polling shape as a chain-backed service.

pub mod combat;
pub mod dice;

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use dungeon_core::service::{
    Amount, DungeonService, EncounterEvent, EncounterId, EncounterOver, EncounterSnapshot,
    EncounterTicket, EventQuery, FeeSchedule, LogBound, LogPosition, LoggedEvent, Monster,
    MonsterId, MonsterTemplate, ParticipantId, Player, PlayerCaps, RoundRequest, Stat,
};
use dungeon_core::ServiceError;
use tracing::debug;

use crate::combat::{attack, Attacker};
use crate::dice::{Dice, DEFAULT_SEED};

pub const POTION_HEAL: u32 = 10;

/// Mutating calls, journaled in submission order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    AddMonster(String),
    CreatePlayer(ParticipantId),
    UpgradeStat(ParticipantId, Stat),
    NewEncounter(ParticipantId, MonsterId),
    BeginCombatRound(ParticipantId, EncounterId),
    DrinkHealingPotion(ParticipantId, EncounterId),
    BuyHealingPotion(ParticipantId),
    Transfer {
        from: ParticipantId,
        to: ParticipantId,
        amount: Amount,
    },
    IncreaseAllowance(ParticipantId, Amount),
}

#[derive(Debug, Clone)]
pub struct LedgerOptions {
    pub fees: FeeSchedule,
    pub caps: PlayerCaps,
    /// Stats a freshly created player starts with (name and counters ignored).
    pub baseline: Player,
    pub funder: ParticipantId,
    pub funder_balance: Amount,
    /// Encounter reads that still report a submitted round as rolling.
    pub latency: u32,
    /// Never fulfil rounds.
    pub stalled: bool,
    pub seed: u64,
    pub script: Vec<u32>,
}

impl Default for LedgerOptions {
    fn default() -> Self {
        Self {
            fees: FeeSchedule {
                round_fee: 100,
                stat_fee: 10_000_000,
                healing_potion_fee: 10_000_000,
            },
            caps: PlayerCaps {
                ac: 20,
                hp: 100,
                str: 10,
                atk: 12,
                dmg: 10,
                healing_potions: 5,
            },
            baseline: Player {
                ac: 11,
                hp: 20,
                str: 1,
                atk: 4,
                dmg: 1,
                ..Default::default()
            },
            funder: ParticipantId::new("funder"),
            funder_balance: 100_000_000_000_000_000_000_000_000,
            latency: 2,
            stalled: false,
            seed: DEFAULT_SEED,
            script: Vec::new(),
        }
    }
}

impl LedgerOptions {
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Oracle d20/damage faces to hand out before falling back to the RNG.
    pub fn with_script(mut self, faces: impl IntoIterator<Item = u32>) -> Self {
        self.script = faces.into_iter().collect();
        self
    }

    pub fn with_latency(mut self, reads: u32) -> Self {
        self.latency = reads;
        self
    }

    pub fn with_funder_balance(mut self, balance: Amount) -> Self {
        self.funder_balance = balance;
        self
    }

    pub fn stalled(mut self) -> Self {
        self.stalled = true;
        self
    }
}

#[derive(Debug)]
struct EncounterState {
    owner: ParticipantId,
    monster: Monster,
    player_hp: u32,
    monster_hp: u32,
    rounds: u32,
    pending: Option<u32>,
    over: bool,
}

#[derive(Debug)]
struct LedgerState {
    options: LedgerOptions,
    dice: Dice,
    height: LogPosition,
    balances: HashMap<ParticipantId, Amount>,
    allowances: HashMap<ParticipantId, Amount>,
    monsters: Vec<Monster>,
    players: HashMap<ParticipantId, Player>,
    encounters: Vec<EncounterState>,
    log: Vec<LoggedEvent>,
    calls: Vec<Call>,
}

/// Local stand-in for the remote dungeon service.
#[derive(Debug)]
pub struct LocalLedger {
    state: Mutex<LedgerState>,
}

impl Default for LocalLedger {
    fn default() -> Self {
        Self::new(LedgerOptions::default())
    }
}

impl LocalLedger {
    pub fn new(options: LedgerOptions) -> Self {
        let dice = if options.script.is_empty() {
            Dice::seeded(options.seed)
        } else {
            let mut dice = Dice::scripted(options.script.clone());
            dice.reseed(options.seed);
            dice
        };
        let mut balances = HashMap::new();
        balances.insert(options.funder.clone(), options.funder_balance);
        Self {
            state: Mutex::new(LedgerState {
                options,
                dice,
                height: 0,
                balances,
                allowances: HashMap::new(),
                monsters: Vec::new(),
                players: HashMap::new(),
                encounters: Vec::new(),
                log: Vec::new(),
                calls: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    pub fn allowance_of(&self, who: &ParticipantId) -> Amount {
        self.lock().allowances.get(who).copied().unwrap_or(0)
    }

    /// Direct edit of a player record, for setting up scenarios.
    pub fn edit_player(&self, who: &ParticipantId, edit: impl FnOnce(&mut Player)) {
        if let Some(player) = self.lock().players.get_mut(who) {
            edit(player);
        }
    }

    /// Direct edit of an encounter's player HP, for setting up scenarios.
    pub fn set_encounter_player_hp(&self, id: EncounterId, hp: u32) {
        let mut state = self.lock();
        if let Some(encounter) = id
            .checked_sub(1)
            .and_then(|idx| state.encounters.get_mut(idx as usize))
        {
            encounter.player_hp = hp;
        }
    }

    /// Appends an arbitrary event, for exercising reconciliation edge cases.
    pub fn inject_event(&self, event: EncounterEvent) {
        let mut state = self.lock();
        state.height += 1;
        let position = state.height;
        state.log.push(LoggedEvent { position, event });
    }
}

impl LedgerState {
    fn charge(&mut self, who: &ParticipantId, fee: Amount) -> Result<(), ServiceError> {
        let granted = self.allowances.get(who).copied().unwrap_or(0);
        if granted < fee {
            return Err(ServiceError::InsufficientAllowance {
                who: who.clone(),
                needed: fee,
                granted,
            });
        }
        let available = self.balances.get(who).copied().unwrap_or(0);
        if available < fee {
            return Err(ServiceError::InsufficientBalance {
                who: who.clone(),
                needed: fee,
                available,
            });
        }
        self.allowances.insert(who.clone(), granted - fee);
        self.balances.insert(who.clone(), available - fee);
        Ok(())
    }

    fn player_mut(&mut self, who: &ParticipantId) -> Result<&mut Player, ServiceError> {
        self.players
            .get_mut(who)
            .ok_or_else(|| ServiceError::NotFound {
                what: format!("player for {who}"),
            })
    }

    fn encounter_mut(&mut self, id: EncounterId) -> Result<&mut EncounterState, ServiceError> {
        id.checked_sub(1)
            .and_then(|idx| self.encounters.get_mut(idx as usize))
            .ok_or_else(|| ServiceError::NotFound {
                what: format!("encounter {id}"),
            })
    }

    fn emit(&mut self, event: EncounterEvent) {
        let position = self.height;
        self.log.push(LoggedEvent { position, event });
    }

    /// Oracle callback: resolves the pending round of encounter `id`.
    fn fulfil(&mut self, id: EncounterId) -> Result<(), ServiceError> {
        let idx = id.checked_sub(1).map(|i| i as usize).unwrap_or(usize::MAX);
        let Some(encounter) = self.encounters.get(idx) else {
            return Err(ServiceError::NotFound {
                what: format!("encounter {id}"),
            });
        };
        let owner = encounter.owner.clone();
        let player = self
            .players
            .get(&owner)
            .cloned()
            .ok_or_else(|| ServiceError::NotFound {
                what: format!("player for {owner}"),
            })?;
        let monster = encounter.monster.clone();
        let round = encounter.rounds + 1;
        let (player_hp, monster_hp) = (encounter.player_hp, encounter.monster_hp);

        self.height += 1;
        let player_attack = Attacker {
            str: player.str,
            atk: player.atk,
            dmg: player.dmg,
        };
        let player_result = attack(
            &mut self.dice,
            id,
            round,
            player_attack,
            monster.ac,
            monster_hp,
        );
        let monster_hp = player_result.opponent_hp;
        self.emit(EncounterEvent::PlayerResult(player_result));

        let mut player_hp_after = player_hp;
        if monster_hp > 0 {
            let monster_attack = Attacker {
                str: monster.str,
                atk: monster.atk,
                dmg: monster.dmg,
            };
            let monster_result =
                attack(&mut self.dice, id, round, monster_attack, player.ac, player_hp);
            player_hp_after = monster_result.opponent_hp;
            self.emit(EncounterEvent::MonsterResult(monster_result));
        }

        let over = monster_hp == 0 || player_hp_after == 0;
        // Both sides down in one round counts as a loss for the player.
        let player_won = monster_hp == 0 && player_hp_after > 0;
        let encounter = &mut self.encounters[idx];
        encounter.rounds = round;
        encounter.monster_hp = monster_hp;
        encounter.player_hp = player_hp_after;
        encounter.pending = None;
        encounter.over = over;
        debug!(target: "dungeon_ledger", encounter = id, round, monster_hp, player_hp = player_hp_after, "round fulfilled");

        if over {
            self.emit(EncounterEvent::EncounterOver(EncounterOver {
                encounter: id,
                player_won,
            }));
            let record = self.player_mut(&owner)?;
            if player_won {
                record.won += 1;
            } else {
                record.lost += 1;
            }
        }
        Ok(())
    }
}

fn snapshot(id: EncounterId, encounter: &EncounterState) -> EncounterSnapshot {
    EncounterSnapshot {
        id,
        monster_id: encounter.monster.id,
        is_rolling: encounter.pending.is_some(),
        player_hp: encounter.player_hp,
        monster_hp: encounter.monster_hp,
        rounds: encounter.rounds,
    }
}

fn stat_step(stat: Stat) -> u32 {
    match stat {
        Stat::HitPoints => 5,
        Stat::AttackDice => 2,
        Stat::ArmourClass | Stat::Strength | Stat::DamageModifier => 1,
    }
}

impl DungeonService for LocalLedger {
    async fn fee_schedule(&self) -> Result<FeeSchedule, ServiceError> {
        Ok(self.lock().options.fees)
    }

    async fn player_caps(&self) -> Result<PlayerCaps, ServiceError> {
        Ok(self.lock().options.caps)
    }

    async fn next_monster_id(&self) -> Result<MonsterId, ServiceError> {
        Ok(self.lock().monsters.len() as MonsterId + 1)
    }

    async fn add_monster(&self, template: &MonsterTemplate) -> Result<MonsterId, ServiceError> {
        let mut state = self.lock();
        if template.ac == 0 || template.hp == 0 {
            return Err(ServiceError::rejected("addMonster", "AC and HP must be nonzero"));
        }
        let id = state.monsters.len() as MonsterId + 1;
        state.monsters.push(Monster {
            id,
            name: template.name.clone(),
            ac: template.ac,
            hp: template.hp,
            str: template.str,
            atk: template.atk,
            dmg: template.dmg,
        });
        state.calls.push(Call::AddMonster(template.name.clone()));
        Ok(id)
    }

    async fn monster(&self, id: MonsterId) -> Result<Monster, ServiceError> {
        let state = self.lock();
        Ok(id
            .checked_sub(1)
            .and_then(|idx| state.monsters.get(idx as usize))
            .cloned()
            .unwrap_or_default())
    }

    async fn create_player(&self, who: &ParticipantId, name: &str) -> Result<(), ServiceError> {
        let mut state = self.lock();
        if state.players.get(who).is_some_and(Player::exists) {
            return Err(ServiceError::rejected("createPlayer", "player exists"));
        }
        let player = Player {
            name: name.to_string(),
            healing_potions: 0,
            won: 0,
            lost: 0,
            ..state.options.baseline.clone()
        };
        state.players.insert(who.clone(), player);
        state.calls.push(Call::CreatePlayer(who.clone()));
        Ok(())
    }

    async fn player(&self, who: &ParticipantId) -> Result<Player, ServiceError> {
        Ok(self.lock().players.get(who).cloned().unwrap_or_default())
    }

    async fn upgrade_stat(&self, who: &ParticipantId, stat: Stat) -> Result<(), ServiceError> {
        let mut state = self.lock();
        let cap = state.options.caps.cap(stat);
        let current = state.player_mut(who)?.stat(stat);
        if current >= cap {
            return Err(ServiceError::rejected("upgradeStat", format!("{} at cap", stat.label())));
        }
        let fee = state.options.fees.stat_fee;
        state.charge(who, fee)?;
        let player = state.player_mut(who)?;
        let next = (current + stat_step(stat)).min(cap);
        match stat {
            Stat::ArmourClass => player.ac = next,
            Stat::HitPoints => player.hp = next,
            Stat::Strength => player.str = next,
            Stat::AttackDice => player.atk = next,
            Stat::DamageModifier => player.dmg = next,
        }
        state.calls.push(Call::UpgradeStat(who.clone(), stat));
        Ok(())
    }

    async fn new_encounter(
        &self,
        who: &ParticipantId,
        monster: MonsterId,
    ) -> Result<EncounterTicket, ServiceError> {
        let mut state = self.lock();
        let player_hp = state.player_mut(who)?.hp;
        let monster = monster
            .checked_sub(1)
            .and_then(|idx| state.monsters.get(idx as usize))
            .cloned()
            .ok_or_else(|| ServiceError::NotFound {
                what: format!("monster {monster}"),
            })?;
        state.height += 1;
        let id = state.encounters.len() as EncounterId + 1;
        state.encounters.push(EncounterState {
            owner: who.clone(),
            monster_hp: monster.hp,
            monster: monster.clone(),
            player_hp,
            rounds: 0,
            pending: None,
            over: false,
        });
        state.calls.push(Call::NewEncounter(who.clone(), monster.id));
        Ok(EncounterTicket {
            id,
            from_position: state.height,
        })
    }

    async fn encounter(&self, id: EncounterId) -> Result<EncounterSnapshot, ServiceError> {
        let mut state = self.lock();
        let encounter = state.encounter_mut(id)?;
        let due = match encounter.pending.as_mut() {
            Some(0) => true,
            Some(reads) => {
                *reads -= 1;
                false
            }
            None => false,
        };
        if due {
            state.fulfil(id)?;
        }
        let encounter = state.encounter_mut(id)?;
        Ok(snapshot(id, encounter))
    }

    async fn begin_combat_round(
        &self,
        who: &ParticipantId,
        encounter: EncounterId,
        request: &RoundRequest,
    ) -> Result<(), ServiceError> {
        let mut state = self.lock();
        let round_fee = state.options.fees.round_fee;
        if request.fee < round_fee {
            return Err(ServiceError::rejected("beginCombatRound", "fee too low"));
        }
        let (latency, stalled) = (state.options.latency, state.options.stalled);
        {
            let current = state.encounter_mut(encounter)?;
            if current.owner != *who {
                return Err(ServiceError::rejected("beginCombatRound", "not your encounter"));
            }
            if current.over {
                return Err(ServiceError::rejected("beginCombatRound", "encounter over"));
            }
            if current.pending.is_some() {
                return Err(ServiceError::rejected("beginCombatRound", "round in flight"));
            }
        }
        state.charge(who, request.fee)?;
        state.dice.reseed(request.seed);
        state.calls.push(Call::BeginCombatRound(who.clone(), encounter));
        let reads = if stalled { u32::MAX } else { latency };
        state.encounter_mut(encounter)?.pending = Some(reads);
        if !stalled && latency == 0 {
            state.fulfil(encounter)?;
        }
        Ok(())
    }

    async fn drink_healing_potion(
        &self,
        who: &ParticipantId,
        encounter: EncounterId,
    ) -> Result<(), ServiceError> {
        let mut state = self.lock();
        let player = state.player_mut(who)?;
        if player.healing_potions == 0 {
            return Err(ServiceError::rejected("drinkHealingPotion", "no potions"));
        }
        let max_hp = player.hp;
        let current = state.encounter_mut(encounter)?;
        if current.owner != *who || current.over || current.pending.is_some() {
            return Err(ServiceError::rejected("drinkHealingPotion", "encounter not idle"));
        }
        current.player_hp = (current.player_hp + POTION_HEAL).min(max_hp);
        state.player_mut(who)?.healing_potions -= 1;
        state
            .calls
            .push(Call::DrinkHealingPotion(who.clone(), encounter));
        Ok(())
    }

    async fn buy_healing_potion(&self, who: &ParticipantId) -> Result<(), ServiceError> {
        let mut state = self.lock();
        let cap = state.options.caps.healing_potions;
        if state.player_mut(who)?.healing_potions >= cap {
            return Err(ServiceError::rejected("buyHealingPotion", "potion cap reached"));
        }
        let fee = state.options.fees.healing_potion_fee;
        state.charge(who, fee)?;
        state.player_mut(who)?.healing_potions += 1;
        state.calls.push(Call::BuyHealingPotion(who.clone()));
        Ok(())
    }

    async fn events(&self, query: &EventQuery) -> Result<Vec<LoggedEvent>, ServiceError> {
        let state = self.lock();
        let to = match query.to {
            LogBound::Latest => state.height,
            LogBound::At(position) => position,
        };
        Ok(state
            .log
            .iter()
            .filter(|logged| {
                logged.position >= query.from
                    && logged.position <= to
                    && logged.event.kind() == query.kind
                    && logged.event.encounter() == query.encounter
            })
            .cloned()
            .collect())
    }

    async fn balance_of(&self, who: &ParticipantId) -> Result<Amount, ServiceError> {
        Ok(self.lock().balances.get(who).copied().unwrap_or(0))
    }

    async fn transfer(
        &self,
        from: &ParticipantId,
        to: &ParticipantId,
        amount: Amount,
    ) -> Result<(), ServiceError> {
        let mut state = self.lock();
        let available = state.balances.get(from).copied().unwrap_or(0);
        if available < amount {
            return Err(ServiceError::InsufficientBalance {
                who: from.clone(),
                needed: amount,
                available,
            });
        }
        state.balances.insert(from.clone(), available - amount);
        *state.balances.entry(to.clone()).or_insert(0) += amount;
        state.calls.push(Call::Transfer {
            from: from.clone(),
            to: to.clone(),
            amount,
        });
        Ok(())
    }

    async fn increase_allowance(
        &self,
        owner: &ParticipantId,
        amount: Amount,
    ) -> Result<(), ServiceError> {
        let mut state = self.lock();
        *state.allowances.entry(owner.clone()).or_insert(0) += amount;
        state
            .calls
            .push(Call::IncreaseAllowance(owner.clone(), amount));
        Ok(())
    }
}
