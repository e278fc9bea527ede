//! Idempotent seeding of monsters and players.

use tracing::info;

use crate::error::{Result, ServiceError};
use crate::service::{DungeonService, Monster, MonsterId, MonsterTemplate, ParticipantId};

/// Read-through cache of the seeded monster roster. Monsters are immutable
/// once seeded, so the cache never goes stale.
#[derive(Debug, Clone, Default)]
pub struct Roster {
    monsters: Vec<Monster>,
}

impl Roster {
    /// Seeds `templates` unless monster #1 already exists, then loads every
    /// seeded monster. Calling it again adds nothing.
    pub async fn ensure<S: DungeonService>(
        service: &S,
        templates: &[MonsterTemplate],
    ) -> Result<Self> {
        let first = service.monster(1).await?;
        if !first.exists() {
            info!(target: "dungeon_core.roster", count = templates.len(), "seeding monsters");
            for template in templates {
                let id = service.add_monster(template).await?;
                info!(target: "dungeon_core.roster", id, name = %template.name, "monster added");
            }
        }
        Self::load(service).await
    }

    pub async fn load<S: DungeonService>(service: &S) -> Result<Self> {
        let next = service.next_monster_id().await?;
        let mut monsters = Vec::with_capacity(next.saturating_sub(1) as usize);
        for id in 1..next {
            let monster = service.monster(id).await?;
            if !monster.exists() {
                return Err(ServiceError::Malformed(format!(
                    "monster {id} below next id {next} is empty"
                ))
                .into());
            }
            monsters.push(monster);
        }
        if monsters.is_empty() {
            return Err(ServiceError::NotFound {
                what: "any seeded monster".into(),
            }
            .into());
        }
        Ok(Self { monsters })
    }

    pub fn highest_monster_id(&self) -> MonsterId {
        self.monsters.len() as MonsterId
    }

    pub fn monster(&self, id: MonsterId) -> Option<&Monster> {
        let idx = (id as usize).checked_sub(1)?;
        self.monsters.get(idx)
    }

    /// Display name for a tier, "none" for tier 0.
    pub fn name_of(&self, id: MonsterId) -> &str {
        self.monster(id).map(|m| m.name.as_str()).unwrap_or("none")
    }
}

/// Creates a player for `who` unless one with nonzero HP already exists.
/// Returns whether a player was created.
pub async fn ensure_player<S: DungeonService>(
    service: &S,
    who: &ParticipantId,
    name: &str,
) -> Result<bool> {
    if service.player(who).await?.exists() {
        return Ok(false);
    }
    service.create_player(who, name).await?;
    info!(target: "dungeon_core.roster", participant = %who, name, "player created");
    Ok(true)
}
