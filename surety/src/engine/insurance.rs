use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    engine::{Error, Rules},
    models::{AccountId, Amount, FlightKey},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PolicyState {
    /// The premium is held until the flight resolves.
    Active,
    /// Converted into a passenger credit.
    Credited,
    /// The flight resolved without an airline-caused delay.
    Lapsed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    pub passenger: AccountId,
    pub flight: FlightKey,
    pub premium: Amount,
    pub state: PolicyState,
}

/// Policies and passenger credit balances.
///
/// Balances only change through settlement and withdrawal, both driven by
/// [`crate::engine::payout::PayoutEngine`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InsuranceLedger {
    policies: Vec<Policy>,
    credits: HashMap<AccountId, Amount>,
}

impl InsuranceLedger {
    /// Records a policy. The caller must have checked that the flight exists
    /// and is not settled.
    pub fn buy(
        &mut self,
        passenger: AccountId,
        flight: FlightKey,
        premium: Amount,
        rules: &Rules,
    ) -> Result<&Policy, Error> {
        if premium.is_zero() {
            return Err(Error::ZeroPremium);
        }
        if premium > rules.premium_cap {
            return Err(Error::PremiumExceedsCap {
                premium,
                cap: rules.premium_cap,
            });
        }
        if self.policy(&passenger, &flight).is_some() {
            return Err(Error::DuplicatePolicy { passenger, flight });
        }

        info!("Policy bought: passenger:{passenger}, flight:{flight}, premium:{premium}");
        self.policies.push(Policy {
            passenger,
            flight,
            premium,
            state: PolicyState::Active,
        });
        Ok(&self.policies[self.policies.len() - 1])
    }

    pub fn policy(&self, passenger: &AccountId, flight: &FlightKey) -> Option<&Policy> {
        self.policies
            .iter()
            .find(|p| p.passenger == *passenger && p.flight == *flight)
    }

    pub fn policies<'a>(&'a self, flight: &'a FlightKey) -> impl Iterator<Item = &'a Policy> {
        self.policies.iter().filter(move |p| p.flight == *flight)
    }

    pub fn has_credit(&self, passenger: &AccountId) -> bool {
        !self.credit_amount(passenger).is_zero()
    }

    pub fn credit_amount(&self, passenger: &AccountId) -> Amount {
        self.credits.get(passenger).copied().unwrap_or_default()
    }

    pub(crate) fn active_policies_mut<'a>(
        &'a mut self,
        flight: &'a FlightKey,
    ) -> impl Iterator<Item = &'a mut Policy> {
        self.policies
            .iter_mut()
            .filter(move |p| p.flight == *flight && p.state == PolicyState::Active)
    }

    pub(crate) fn set_credit(&mut self, passenger: AccountId, amount: Amount) {
        if amount.is_zero() {
            self.credits.remove(&passenger);
        } else {
            self.credits.insert(passenger, amount);
        }
    }
}
