use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::encounter::PollPolicy;
use crate::error::ConfigError;
use crate::service::{MonsterTemplate, ParticipantId};

const DEFAULT_ROUNDS: u32 = 20;
const DEFAULT_PLAYERS: u32 = 15;
const DEFAULT_PROVIDER_KEY: &str = "local-vor-provider";
const DEFAULT_FUNDER: &str = "funder";
const DEFAULT_POLL_INTERVAL_MS: u64 = 50;
const DEFAULT_SETTLE_MS: u64 = 50;
const DEFAULT_HEALING_THRESHOLD: u32 = 10;

#[derive(Debug, Deserialize, Clone)]
pub struct SimulationConfig {
    #[serde(default)]
    pub simulation: SimulationSection,
    #[serde(default)]
    pub oracle: OracleConfig,
    #[serde(default)]
    pub funding: FundingConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub healing: HealingConfig,
    #[serde(default = "default_monsters")]
    pub monsters: Vec<MonsterTemplate>,
    #[serde(default)]
    pub report: Option<ReportConfig>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            simulation: SimulationSection::default(),
            oracle: OracleConfig::default(),
            funding: FundingConfig::default(),
            polling: PollingConfig::default(),
            healing: HealingConfig::default(),
            monsters: default_monsters(),
            report: None,
        }
    }
}

impl SimulationConfig {
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let data = fs::read_to_string(path)?;
        let cfg: SimulationConfig = toml::from_str(&data)?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.simulation.rounds() == 0 {
            return Err(ConfigError::Invalid("simulation.rounds must be >= 1".into()));
        }
        if self.simulation.players() == 0 {
            return Err(ConfigError::Invalid("simulation.players must be >= 1".into()));
        }
        if self.monsters.is_empty() {
            return Err(ConfigError::Invalid("monster roster is empty".into()));
        }
        if let Some(bad) = self.monsters.iter().find(|m| m.ac == 0 || m.hp == 0) {
            return Err(ConfigError::Invalid(format!(
                "monster {} needs nonzero AC and HP",
                bad.name
            )));
        }
        let funder = self.funding.funder();
        if self.roster().iter().any(|entry| entry.participant == funder) {
            return Err(ConfigError::Invalid(format!(
                "funder {funder} collides with a player participant"
            )));
        }
        Ok(())
    }

    /// Player roster in registration order.
    pub fn roster(&self) -> Vec<RosterEntry> {
        (1..=self.simulation.players())
            .map(|i| RosterEntry {
                participant: ParticipantId::new(format!("participant-{i}")),
                name: format!("p_{i}"),
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterEntry {
    pub participant: ParticipantId,
    pub name: String,
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct SimulationSection {
    #[serde(default)]
    pub rounds: Option<u32>,
    #[serde(default)]
    pub players: Option<u32>,
    /// Seed for round request seeds; entropy when absent.
    #[serde(default)]
    pub seed: Option<u64>,
}

impl SimulationSection {
    pub fn rounds(&self) -> u32 {
        self.rounds.unwrap_or(DEFAULT_ROUNDS)
    }
    pub fn players(&self) -> u32 {
        self.players.unwrap_or(DEFAULT_PLAYERS)
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct OracleConfig {
    #[serde(default)]
    pub provider_key: Option<String>,
}

impl OracleConfig {
    pub fn provider_key(&self) -> String {
        self.provider_key
            .clone()
            .unwrap_or_else(|| DEFAULT_PROVIDER_KEY.to_string())
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct FundingConfig {
    #[serde(default)]
    pub funder: Option<String>,
}

impl FundingConfig {
    pub fn funder(&self) -> ParticipantId {
        ParticipantId::new(self.funder.as_deref().unwrap_or(DEFAULT_FUNDER))
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct PollingConfig {
    #[serde(default)]
    pub interval_ms: Option<u64>,
    #[serde(default)]
    pub settle_ms: Option<u64>,
    /// Unbounded wait when absent.
    #[serde(default)]
    pub max_wait_ms: Option<u64>,
}

impl PollingConfig {
    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            interval: Duration::from_millis(self.interval_ms.unwrap_or(DEFAULT_POLL_INTERVAL_MS)),
            settle: Duration::from_millis(self.settle_ms.unwrap_or(DEFAULT_SETTLE_MS)),
            max_wait: self.max_wait_ms.map(Duration::from_millis),
        }
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct HealingConfig {
    #[serde(default)]
    pub threshold: Option<u32>,
}

impl HealingConfig {
    pub fn threshold(&self) -> u32 {
        self.threshold.unwrap_or(DEFAULT_HEALING_THRESHOLD)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReportConfig {
    pub path: PathBuf,
}

/// The stock roster, easiest first.
pub fn default_monsters() -> Vec<MonsterTemplate> {
    vec![
        MonsterTemplate::new("goblin", 12, 12, 0, 4, 0),
        MonsterTemplate::new("skeleton", 14, 15, 1, 4, 1),
        MonsterTemplate::new("orc", 15, 17, 1, 6, 1),
        MonsterTemplate::new("troll", 17, 25, 2, 8, 2),
        MonsterTemplate::new("mind flayer", 18, 45, 3, 10, 3),
        MonsterTemplate::new("beholder", 19, 50, 4, 10, 4),
        MonsterTemplate::new("lich", 23, 80, 6, 10, 8),
        MonsterTemplate::new("demi god", 25, 100, 10, 12, 10),
        MonsterTemplate::new("deity", 30, 150, 12, 12, 12),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let cfg: SimulationConfig = toml::from_str("").unwrap();
        assert_eq!(20, cfg.simulation.rounds());
        assert_eq!(15, cfg.roster().len());
        assert_eq!(9, cfg.monsters.len());
        assert_eq!(10, cfg.healing.threshold());
        assert_eq!(None, cfg.polling.poll_policy().max_wait);
        cfg.validate().unwrap();
    }

    #[test]
    fn sections_override_defaults() {
        let cfg: SimulationConfig = toml::from_str(
            r#"
            [simulation]
            rounds = 3
            players = 2
            seed = 7

            [polling]
            interval_ms = 5
            max_wait_ms = 2000

            [[monsters]]
            name = "rat"
            ac = 8
            hp = 4
            str = 0
            atk = 2
            dmg = 0
            "#,
        )
        .unwrap();
        assert_eq!(3, cfg.simulation.rounds());
        assert_eq!(Some(7), cfg.simulation.seed);
        assert_eq!(1, cfg.monsters.len());
        let policy = cfg.polling.poll_policy();
        assert_eq!(Duration::from_millis(5), policy.interval);
        assert_eq!(Some(Duration::from_secs(2)), policy.max_wait);
        let roster = cfg.roster();
        assert_eq!("p_2", roster[1].name);
        assert_eq!("participant-2", roster[1].participant.as_str());
    }

    #[test]
    fn rejects_zero_rounds_and_funder_collisions() {
        let mut cfg = SimulationConfig::default();
        cfg.simulation.rounds = Some(0);
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));

        let mut cfg = SimulationConfig::default();
        cfg.funding.funder = Some("participant-1".into());
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));
    }
}
