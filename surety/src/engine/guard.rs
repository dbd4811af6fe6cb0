use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{engine::Error, models::AccountId};

/// The on/off switch for every mutating operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationalGuard {
    owner: AccountId,
    operational: bool,
}

impl OperationalGuard {
    pub fn new(owner: AccountId) -> Self {
        Self {
            owner,
            operational: true,
        }
    }

    pub fn is_operational(&self) -> bool {
        self.operational
    }

    pub fn owner(&self) -> AccountId {
        self.owner
    }

    pub fn ensure_operational(&self) -> Result<(), Error> {
        if self.operational {
            Ok(())
        } else {
            Err(Error::SystemPaused)
        }
    }

    /// Returns whether the status actually changed.
    pub fn set_operating_status(
        &mut self,
        operational: bool,
        caller: AccountId,
    ) -> Result<bool, Error> {
        if caller != self.owner {
            return Err(Error::Unauthorized(caller));
        }
        if self.operational == operational {
            return Ok(false);
        }
        self.operational = operational;
        info!("Operating status changed: operational:{operational}");
        Ok(true)
    }
}
