//! Balance authorization: every paid action is preceded by a top-up from
//! the funding identity and an allowance bump for the dungeon service.

use tracing::debug;

use crate::error::{HarnessError, Result};
use crate::service::{Amount, DungeonService, ParticipantId};

#[derive(Debug, Clone)]
pub struct BalanceGate {
    funder: ParticipantId,
}

impl BalanceGate {
    pub fn new(funder: ParticipantId) -> Self {
        Self { funder }
    }

    pub fn funder(&self) -> &ParticipantId {
        &self.funder
    }

    /// Makes sure `who` can pay `amount` to the service.
    ///
    /// Tops the participant up from the funder when its balance falls short,
    /// then extends its allowance by `amount`. Allowance only ever grows.
    pub async fn ensure_funded<S: DungeonService>(
        &self,
        service: &S,
        who: &ParticipantId,
        amount: Amount,
    ) -> Result<()> {
        let balance = service.balance_of(who).await?;
        if balance < amount {
            let available = service.balance_of(&self.funder).await?;
            if available < amount {
                return Err(HarnessError::FunderShortfall {
                    needed: amount,
                    available,
                });
            }
            service.transfer(&self.funder, who, amount).await?;
            debug!(target: "dungeon_core.gate", participant = %who, amount = %amount, "funded");
        }
        service.increase_allowance(who, amount).await?;
        debug!(target: "dungeon_core.gate", participant = %who, amount = %amount, "allowance increased");
        Ok(())
    }
}
