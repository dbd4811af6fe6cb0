use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{
    engine::{Error, oracles::INDEXES_PER_ORACLE},
    models::{AccountId, Amount},
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// The only identity allowed to pause and resume the system.
    pub owner: AccountId,
    /// Seeded as registered (but unfunded) when the engine is created.
    pub first_airline: AccountId,
    #[serde(default)]
    pub rules: Rules,
}

impl Config {
    pub fn new(owner: AccountId, first_airline: AccountId) -> Self {
        Self {
            owner,
            first_airline,
            rules: Rules::default(),
        }
    }
}

/// Tunable constants of the business rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Rules {
    /// Cumulative funding that turns a registered airline into a member.
    pub membership_threshold: Amount,
    /// Below this many registered airlines, one member admits a candidate alone.
    pub direct_registration_cap: usize,
    /// Votes required once the cap is reached: `members / divisor + 1`.
    pub majority_divisor: usize,
    pub premium_cap: Amount,
    /// Credit paid for a `LateAirline` flight, as a percentage of the premium.
    pub payout_percent: u32,
    pub oracle_registration_fee: Amount,
    /// Matching responses needed to resolve a request.
    pub oracle_quorum: usize,
    /// Oracle indexes are drawn from `0..index_space`.
    pub index_space: u8,
    /// Open requests older than this reject responses. `None` keeps them open forever.
    #[serde(with = "humantime_serde")]
    pub request_ttl: Option<Duration>,
}

impl Default for Rules {
    fn default() -> Self {
        Self {
            membership_threshold: Amount::ether(10),
            direct_registration_cap: 5,
            majority_divisor: 2,
            premium_cap: Amount::ether(1),
            payout_percent: 150,
            oracle_registration_fee: Amount::ether(1),
            oracle_quorum: 3,
            index_space: 10,
            request_ttl: None,
        }
    }
}

impl Rules {
    pub fn validate(&self) -> Result<(), Error> {
        if usize::from(self.index_space) < INDEXES_PER_ORACLE {
            return Err(Error::InvalidConfig(format!(
                "index_space must hold at least {INDEXES_PER_ORACLE} indexes: {}",
                self.index_space
            )));
        }
        if self.oracle_quorum == 0 {
            return Err(Error::InvalidConfig("oracle_quorum must not be zero".into()));
        }
        if self.majority_divisor == 0 {
            return Err(Error::InvalidConfig(
                "majority_divisor must not be zero".into(),
            ));
        }
        if self.payout_percent == 0 {
            return Err(Error::InvalidConfig("payout_percent must not be zero".into()));
        }
        Ok(())
    }

    /// Votes a pending candidate needs, given the current member count.
    pub fn required_votes(&self, members: usize) -> usize {
        members / self.majority_divisor + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_rules_are_valid() {
        Rules::default().validate().unwrap();
    }

    #[test]
    fn degenerate_rules_are_rejected() {
        for rules in [
            Rules {
                index_space: 2,
                ..Default::default()
            },
            Rules {
                oracle_quorum: 0,
                ..Default::default()
            },
            Rules {
                majority_divisor: 0,
                ..Default::default()
            },
            Rules {
                payout_percent: 0,
                ..Default::default()
            },
        ] {
            assert!(matches!(rules.validate(), Err(Error::InvalidConfig(_))));
        }
    }

    #[test]
    fn strict_majority() {
        let rules = Rules::default();
        assert_eq!(rules.required_votes(4), 3);
        assert_eq!(rules.required_votes(5), 3);
        assert_eq!(rules.required_votes(6), 4);
    }

    #[test]
    fn rules_from_partial_json() {
        let json = format!(
            r#"{{"owner":"{}","first_airline":"{}","rules":{{"oracle_quorum":5,"request_ttl":"10m"}}}}"#,
            AccountId::derive(0),
            AccountId::derive(1)
        );
        let config: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(config.rules.oracle_quorum, 5);
        assert_eq!(config.rules.request_ttl, Some(Duration::from_secs(600)));
        assert_eq!(config.rules.index_space, 10);
    }
}
