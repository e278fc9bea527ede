use std::collections::HashMap;

use dungeon_core::config::default_monsters;
use dungeon_core::service::{DungeonService, ParticipantId, Stat};
use dungeon_core::{
    ensure_player, progress_player, run_simulation, BalanceGate, Roster, SimulationConfig,
};
use dungeon_ledger::{Call, LedgerOptions, LocalLedger};

fn is_paid_or_funding(call: &Call) -> bool {
    matches!(
        call,
        Call::Transfer { .. }
            | Call::IncreaseAllowance(..)
            | Call::UpgradeStat(..)
            | Call::BeginCombatRound(..)
            | Call::BuyHealingPotion(_)
    )
}

#[tokio::test]
async fn seeding_twice_adds_nothing() {
    let ledger = LocalLedger::default();
    let who = ParticipantId::new("participant-1");
    let monsters = default_monsters();

    let first = Roster::ensure(&ledger, &monsters).await.unwrap();
    assert!(ensure_player(&ledger, &who, "p_1").await.unwrap());
    let after_first = ledger.calls();

    let second = Roster::ensure(&ledger, &monsters).await.unwrap();
    assert!(!ensure_player(&ledger, &who, "p_1").await.unwrap());
    let after_second = ledger.calls();

    assert_eq!(after_first, after_second);
    assert_eq!(9, first.highest_monster_id());
    assert_eq!(first.highest_monster_id(), second.highest_monster_id());
    assert_eq!("deity", second.name_of(9));
    assert!(!after_second.iter().any(is_paid_or_funding));
}

#[tokio::test]
async fn gate_funds_only_when_short_and_always_authorizes() {
    let ledger = LocalLedger::default();
    let funder = ParticipantId::new("funder");
    let who = ParticipantId::new("participant-1");
    let gate = BalanceGate::new(funder.clone());

    gate.ensure_funded(&ledger, &who, 100).await.unwrap();
    ledger.transfer(&funder, &who, 1_000).await.unwrap();
    gate.ensure_funded(&ledger, &who, 100).await.unwrap();

    let calls = ledger.calls();
    assert_eq!(
        vec![
            Call::Transfer {
                from: funder.clone(),
                to: who.clone(),
                amount: 100
            },
            Call::IncreaseAllowance(who.clone(), 100),
            Call::Transfer {
                from: funder.clone(),
                to: who.clone(),
                amount: 1_000
            },
            Call::IncreaseAllowance(who.clone(), 100),
        ],
        calls
    );
    assert_eq!(200, ledger.allowance_of(&who));
    assert_eq!(1_100, ledger.balance_of(&who).await.unwrap());
}

#[tokio::test]
async fn progression_funds_then_upgrades_only_stats_below_cap() {
    let ledger = LocalLedger::default();
    let funder = ParticipantId::new("funder");
    let who = ParticipantId::new("participant-1");
    let gate = BalanceGate::new(funder.clone());
    let fees = ledger.fee_schedule().await.unwrap();
    let caps = ledger.player_caps().await.unwrap();

    ensure_player(&ledger, &who, "p_1").await.unwrap();
    ledger.edit_player(&who, |p| {
        p.ac = caps.ac;
        p.hp = caps.hp - 5;
        p.str = caps.str;
        p.atk = caps.atk - 1;
        p.dmg = caps.dmg;
    });
    let before = ledger.calls().len();

    let upgraded = progress_player(&ledger, &gate, &who, fees.stat_fee, &caps)
        .await
        .unwrap();
    assert_eq!(vec![Stat::HitPoints, Stat::AttackDice], upgraded);

    let funded = |stat| {
        vec![
            Call::Transfer {
                from: funder.clone(),
                to: who.clone(),
                amount: fees.stat_fee,
            },
            Call::IncreaseAllowance(who.clone(), fees.stat_fee),
            Call::UpgradeStat(who.clone(), stat),
        ]
    };
    let expected: Vec<Call> = [Stat::HitPoints, Stat::AttackDice]
        .into_iter()
        .flat_map(funded)
        .collect();
    assert_eq!(expected, ledger.calls()[before..]);

    let player = ledger.player(&who).await.unwrap();
    for stat in Stat::ALL {
        assert_eq!(caps.cap(stat), player.stat(stat), "{}", stat.label());
    }

    // everything is capped now: nothing is funded or attempted
    let settled = ledger.calls().len();
    let again = progress_player(&ledger, &gate, &who, fees.stat_fee, &caps)
        .await
        .unwrap();
    assert!(again.is_empty());
    assert_eq!(settled, ledger.calls().len());
}

#[tokio::test(start_paused = true)]
async fn long_run_respects_caps_tiers_and_roll_totals() {
    let ledger = LocalLedger::new(LedgerOptions::default().with_seed(2024));
    let caps = ledger.player_caps().await.unwrap();
    let mut cfg = SimulationConfig::default();
    cfg.simulation.rounds = Some(12);
    cfg.simulation.players = Some(3);
    cfg.simulation.seed = Some(2024);
    cfg.polling.interval_ms = Some(1);
    cfg.polling.settle_ms = Some(1);

    let report = run_simulation(&ledger, &cfg, "long-run").await.unwrap();
    assert_eq!(36, report.encounters.len());
    assert!(report.timeouts.is_empty());

    for entry in cfg.roster() {
        let player = ledger.player(&entry.participant).await.unwrap();
        for stat in Stat::ALL {
            assert!(
                player.stat(stat) <= caps.cap(stat),
                "{} {} over cap",
                entry.name,
                stat.label()
            );
        }
        assert!(player.healing_potions <= caps.healing_potions);
        assert_eq!(12, player.won + player.lost);
    }

    let mut last_tier: HashMap<&ParticipantId, u32> = HashMap::new();
    for record in &report.encounters {
        let previous = last_tier.insert(&record.participant, record.monster).unwrap_or(1);
        assert!(record.monster >= previous, "tier went down for {}", record.player);
        assert!(record.monster <= 9);
    }

    let folded: u64 = report.encounters.iter().map(|r| u64::from(r.stats.rolls)).sum();
    assert_eq!(report.total_rolls, folded);
    let faces: u64 = report.faces.iter().map(|s| s.count).sum();
    assert_eq!(report.total_rolls, faces);
    assert!(report.faces.iter().all(|s| (1..=20).contains(&s.face)));

    let upgrades = ledger
        .calls()
        .iter()
        .filter(|c| matches!(c, Call::UpgradeStat(..)))
        .count();
    let wins_before_last_round = report
        .encounters
        .iter()
        .filter(|r| r.sim_round < 12 && r.outcome == dungeon_core::Outcome::PlayerWon)
        .count();
    assert!(upgrades <= wins_before_last_round * Stat::ALL.len());
}
