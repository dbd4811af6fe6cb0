use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    engine::{Error, Rules},
    models::{AccountId, Amount},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Airline {
    pub id: AccountId,
    pub registered: bool,
    pub funded: Amount,
    pub member: bool,
    /// Members that voted for this airline, in voting order.
    pub votes: Vec<AccountId>,
}

impl Airline {
    fn candidate(id: AccountId) -> Self {
        Self {
            id,
            registered: false,
            funded: Amount::ZERO,
            member: false,
            votes: Vec::new(),
        }
    }
}

/// Result of a proposal or a vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Admission {
    Registered { votes: usize },
    Pending { votes: usize, required: usize },
    AlreadyRegistered,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Funding {
    pub total: Amount,
    pub member: bool,
    /// True only for the funding that crossed the threshold.
    pub became_member: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AirlineRegistry {
    airlines: HashMap<AccountId, Airline>,
    registration_order: Vec<AccountId>,
}

impl AirlineRegistry {
    pub fn new(first_airline: AccountId) -> Self {
        let mut this = Self::default();
        let mut airline = Airline::candidate(first_airline);
        airline.registered = true;
        this.airlines.insert(first_airline, airline);
        this.registration_order.push(first_airline);
        this
    }

    /// Proposes `candidate`, or adds `voter`'s vote to an existing proposal.
    ///
    /// While fewer than `direct_registration_cap` airlines are registered, a
    /// single member admits the candidate. After that a strict majority of the
    /// current members is needed.
    pub fn propose_or_vote(
        &mut self,
        candidate: AccountId,
        voter: AccountId,
        rules: &Rules,
    ) -> Result<Admission, Error> {
        if !self.is_member(&voter) {
            return Err(Error::VoterNotMember(voter));
        }
        if candidate.is_zero() {
            return Err(Error::ZeroAirline);
        }
        if self.is_registered(&candidate) {
            debug!("Airline {candidate} is already registered");
            return Ok(Admission::AlreadyRegistered);
        }

        let direct = self.registered_count() < rules.direct_registration_cap;
        let required = if direct {
            1
        } else {
            rules.required_votes(self.member_count())
        };

        let airline = self
            .airlines
            .entry(candidate)
            .or_insert_with(|| Airline::candidate(candidate));
        if airline.votes.contains(&voter) {
            debug!("Duplicate vote from {voter} for {candidate} ignored");
        } else {
            airline.votes.push(voter);
        }
        let votes = airline.votes.len();

        if votes < required {
            info!("Airline {candidate} pending: votes:{votes}, required:{required}");
            return Ok(Admission::Pending { votes, required });
        }

        airline.registered = true;
        self.registration_order.push(candidate);
        info!("Airline {candidate} registered with {votes} vote(s)");
        Ok(Admission::Registered { votes })
    }

    pub fn fund(
        &mut self,
        airline: AccountId,
        amount: Amount,
        rules: &Rules,
    ) -> Result<Funding, Error> {
        let record = self
            .airlines
            .get_mut(&airline)
            .filter(|record| record.registered)
            .ok_or(Error::UnknownAirline(airline))?;
        let total = record
            .funded
            .checked_add(amount)
            .ok_or(Error::AmountOverflow)?;

        record.funded = total;
        let became_member = !record.member && total >= rules.membership_threshold;
        if became_member {
            record.member = true;
            info!("Airline {airline} became a member with {total}");
        }
        Ok(Funding {
            total,
            member: record.member,
            became_member,
        })
    }

    pub fn airline(&self, id: &AccountId) -> Option<&Airline> {
        self.airlines.get(id)
    }

    pub fn is_registered(&self, id: &AccountId) -> bool {
        self.airlines.get(id).is_some_and(|a| a.registered)
    }

    pub fn is_member(&self, id: &AccountId) -> bool {
        self.airlines.get(id).is_some_and(|a| a.registered && a.member)
    }

    pub fn registered_count(&self) -> usize {
        self.registration_order.len()
    }

    pub fn member_count(&self) -> usize {
        self.registration_order
            .iter()
            .filter(|id| self.is_member(id))
            .count()
    }

    /// Registered airlines in registration order.
    pub fn registered_airlines(&self) -> Vec<AccountId> {
        self.registration_order
            .iter()
            .filter(|id| !id.is_zero())
            .copied()
            .collect()
    }

    /// Member airlines in registration order.
    pub fn member_airlines(&self) -> Vec<AccountId> {
        self.registration_order
            .iter()
            .filter(|id| !id.is_zero() && self.is_member(id))
            .copied()
            .collect()
    }
}
