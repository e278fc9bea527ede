//! Encounter simulation engine for the dungeon service.
//!
//! Drives per-player encounters against a remote, oracle-backed combat
//! service, gates every paid action behind a funding step, and rebuilds
//! per-round statistics from the service's event log.

pub mod config;
pub mod driver;
pub mod encounter;
pub mod error;
pub mod gate;
pub mod progression;
pub mod report;
pub mod roster;
pub mod seed;
pub mod service;
pub mod stats;

pub use config::{RosterEntry, SimulationConfig};
pub use driver::run_simulation;
pub use encounter::{EncounterMachine, EncounterPhase, EncounterRun, EncounterSettings, PollPolicy};
pub use error::{ConfigError, HarnessError, ServiceError};
pub use gate::BalanceGate;
pub use progression::{pending_upgrades, progress_player, PlayerMemory, ProgressionMemory};
pub use report::{EncounterRecord, PlayerSummary, SimulationReport, TimeoutRecord};
pub use roster::{ensure_player, Roster};
pub use seed::SeedSource;
pub use service::DungeonService;
pub use stats::{fold_events, reconcile, EncounterStats, Outcome, Reconciliation, SimulationStats};
