use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    engine::{
        Error, Rules,
        insurance::{InsuranceLedger, PolicyState},
    },
    models::{AccountId, Amount, FlightKey, FlightStatus},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credit {
    pub passenger: AccountId,
    pub amount: Amount,
}

/// Everything a resolution will change in the ledger, computed up front so
/// that applying it cannot fail halfway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settlement {
    flight: FlightKey,
    status: FlightStatus,
    credits: Vec<Credit>,
    balances: HashMap<AccountId, Amount>,
}

impl Settlement {
    pub fn credits(&self) -> &[Credit] {
        &self.credits
    }

    pub fn total(&self) -> Option<Amount> {
        self.credits
            .iter()
            .try_fold(Amount::ZERO, |sum, credit| sum.checked_add(credit.amount))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Withdrawal {
    pub passenger: AccountId,
    pub amount: Amount,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PayoutEngine {
    withdrawals: Vec<Withdrawal>,
}

impl PayoutEngine {
    /// Plans the settlement of every active policy on `flight`.
    ///
    /// Only `LateAirline` produces credits. Any other final status lapses the
    /// policies.
    pub fn plan(
        &self,
        ledger: &InsuranceLedger,
        flight: &FlightKey,
        status: FlightStatus,
        rules: &Rules,
    ) -> Result<Settlement, Error> {
        let mut credits = Vec::new();
        let mut balances = HashMap::new();
        if status == FlightStatus::LateAirline {
            for policy in ledger
                .policies(flight)
                .filter(|p| p.state == PolicyState::Active)
            {
                let amount = policy
                    .premium
                    .checked_percent(rules.payout_percent)
                    .ok_or(Error::AmountOverflow)?;
                let balance = balances
                    .get(&policy.passenger)
                    .copied()
                    .unwrap_or_else(|| ledger.credit_amount(&policy.passenger));
                let balance = balance.checked_add(amount).ok_or(Error::AmountOverflow)?;
                balances.insert(policy.passenger, balance);
                credits.push(Credit {
                    passenger: policy.passenger,
                    amount,
                });
            }
        }
        Ok(Settlement {
            flight: flight.clone(),
            status,
            credits,
            balances,
        })
    }

    /// Applies a settlement planned against the current ledger state.
    pub(crate) fn apply(
        &mut self,
        ledger: &mut InsuranceLedger,
        settlement: Settlement,
    ) -> Vec<Credit> {
        let Settlement {
            flight,
            status,
            credits,
            balances,
        } = settlement;
        let state = if status == FlightStatus::LateAirline {
            PolicyState::Credited
        } else {
            PolicyState::Lapsed
        };
        let mut settled = 0;
        for policy in ledger.active_policies_mut(&flight) {
            policy.state = state;
            settled += 1;
        }
        for (passenger, balance) in balances {
            ledger.set_credit(passenger, balance);
        }
        info!(
            "Flight {flight} settled as {status}: policies:{settled}, credits:{}",
            credits.len()
        );
        credits
    }

    /// Zeroes the passenger's balance and returns the amount to transfer.
    pub fn withdraw(
        &mut self,
        ledger: &mut InsuranceLedger,
        passenger: AccountId,
    ) -> Result<Amount, Error> {
        let amount = ledger.credit_amount(&passenger);
        if amount.is_zero() {
            return Err(Error::NoCredit(passenger));
        }
        ledger.set_credit(passenger, Amount::ZERO);
        self.withdrawals.push(Withdrawal { passenger, amount });
        info!("Withdrawal authorized: passenger:{passenger}, amount:{amount}");
        Ok(amount)
    }

    pub fn withdrawals(&self) -> &[Withdrawal] {
        &self.withdrawals
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flight() -> FlightKey {
        FlightKey::new(AccountId::derive(1), "ND1309", 1_700_000_000)
    }

    fn ledger_with_policies(premiums: &[(u64, Amount)]) -> InsuranceLedger {
        let rules = Rules::default();
        let mut ledger = InsuranceLedger::default();
        for (passenger, premium) in premiums {
            ledger
                .buy(AccountId::derive(*passenger), flight(), *premium, &rules)
                .unwrap();
        }
        ledger
    }

    #[test]
    fn late_airline_credits_150_percent() {
        let rules = Rules::default();
        let premiums = [
            (200, Amount::ether_fraction(1, 1)),
            (201, Amount::ether(1)),
            (202, Amount::ether_fraction(25, 2)),
        ];
        let mut ledger = ledger_with_policies(&premiums);
        let mut payouts = PayoutEngine::default();

        let settlement = payouts
            .plan(&ledger, &flight(), FlightStatus::LateAirline, &rules)
            .unwrap();
        let sum_of_premiums = Amount::ether_fraction(135, 2);
        assert_eq!(settlement.total(), sum_of_premiums.checked_percent(150));

        let credits = payouts.apply(&mut ledger, settlement);
        assert_eq!(credits.len(), 3);
        assert_eq!(
            ledger.credit_amount(&AccountId::derive(200)),
            Amount::ether_fraction(15, 2)
        );
        assert_eq!(
            ledger.credit_amount(&AccountId::derive(201)),
            Amount::ether_fraction(15, 1)
        );
        assert!(
            ledger
                .policies(&flight())
                .all(|p| p.state == PolicyState::Credited)
        );

        // Nothing left to settle.
        let again = payouts
            .plan(&ledger, &flight(), FlightStatus::LateAirline, &rules)
            .unwrap();
        assert!(again.credits().is_empty());
    }

    #[test]
    fn other_statuses_lapse_without_credit() {
        let rules = Rules::default();
        for status in [
            FlightStatus::OnTime,
            FlightStatus::LateWeather,
            FlightStatus::LateTechnical,
            FlightStatus::LateOther,
        ] {
            let mut ledger = ledger_with_policies(&[(200, Amount::ether(1))]);
            let mut payouts = PayoutEngine::default();
            let settlement = payouts.plan(&ledger, &flight(), status, &rules).unwrap();
            assert_eq!(settlement.total(), Some(Amount::ZERO));
            assert!(payouts.apply(&mut ledger, settlement).is_empty());
            assert!(!ledger.has_credit(&AccountId::derive(200)));
            assert!(
                ledger
                    .policies(&flight())
                    .all(|p| p.state == PolicyState::Lapsed)
            );
        }
    }

    #[test]
    fn overflow_is_rejected_before_any_change() {
        let rules = Rules {
            premium_cap: Amount::from_wei(u128::MAX),
            ..Default::default()
        };
        let mut ledger = InsuranceLedger::default();
        ledger
            .buy(AccountId::derive(200), flight(), Amount::ether(1), &rules)
            .unwrap();
        ledger
            .buy(
                AccountId::derive(201),
                flight(),
                Amount::from_wei(u128::MAX / 2),
                &rules,
            )
            .unwrap();
        let payouts = PayoutEngine::default();
        assert_eq!(
            payouts.plan(&ledger, &flight(), FlightStatus::LateAirline, &rules),
            Err(Error::AmountOverflow)
        );
        assert!(!ledger.has_credit(&AccountId::derive(200)));
    }

    #[test]
    fn withdraw_zeroes_then_fails() {
        let rules = Rules::default();
        let passenger = AccountId::derive(200);
        let mut ledger = ledger_with_policies(&[(200, Amount::ether_fraction(1, 1))]);
        let mut payouts = PayoutEngine::default();
        let settlement = payouts
            .plan(&ledger, &flight(), FlightStatus::LateAirline, &rules)
            .unwrap();
        payouts.apply(&mut ledger, settlement);

        assert_eq!(
            payouts.withdraw(&mut ledger, passenger),
            Ok(Amount::ether_fraction(15, 2))
        );
        assert!(!ledger.has_credit(&passenger));
        assert_eq!(
            payouts.withdraw(&mut ledger, passenger),
            Err(Error::NoCredit(passenger))
        );
        assert_eq!(
            payouts.withdrawals(),
            &[Withdrawal {
                passenger,
                amount: Amount::ether_fraction(15, 2)
            }]
        );
    }
}
