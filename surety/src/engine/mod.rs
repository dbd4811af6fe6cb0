//! The insurance engine: airline admission, flights, policies, oracle consensus
//! and payouts.
//!
//! [`Engine`] is the composition root. It owns every component, routes each
//! operation to the component that owns the affected state, and queues the
//! resulting [`Fact`]s. Operations are synchronous and either apply fully or
//! fail without changing anything.

pub mod airlines;
mod clock;
mod config;
mod error;
mod fact;
pub mod flights;
pub mod guard;
pub mod insurance;
pub mod oracles;
pub mod payout;

use std::{collections::VecDeque, sync::Arc};

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Config, Rules};
pub use error::Error;
pub use fact::Fact;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    engine::{
        airlines::{Admission, Airline, AirlineRegistry},
        flights::{Flight, FlightRegistry},
        guard::OperationalGuard,
        insurance::{InsuranceLedger, Policy},
        oracles::{
            INDEXES_PER_ORACLE, OracleConsensus, OracleRequest, Opened, RequestKey,
            ResponseOutcome,
        },
        payout::{PayoutEngine, Withdrawal},
    },
    models::{AccountId, Amount, FlightKey, FlightStatus},
};

/// The state of every component, as persisted between runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub guard: OperationalGuard,
    pub airlines: AirlineRegistry,
    pub flights: FlightRegistry,
    pub insurance: InsuranceLedger,
    pub oracles: OracleConsensus,
    pub payouts: PayoutEngine,
}

#[derive(Debug)]
pub struct Engine {
    config: Config,
    clock: Arc<dyn Clock>,
    guard: OperationalGuard,
    airlines: AirlineRegistry,
    flights: FlightRegistry,
    insurance: InsuranceLedger,
    oracles: OracleConsensus,
    payouts: PayoutEngine,
    facts: VecDeque<Fact>,
}

impl Engine {
    pub fn new(config: Config, clock: Arc<dyn Clock>) -> Result<Self, Error> {
        config.rules.validate()?;
        if config.first_airline.is_zero() {
            return Err(Error::InvalidConfig(
                "first airline must not be the zero account".to_string(),
            ));
        }
        info!(
            "Engine created: owner:{}, first airline:{}",
            config.owner, config.first_airline
        );
        Ok(Self {
            guard: OperationalGuard::new(config.owner),
            airlines: AirlineRegistry::new(config.first_airline),
            flights: FlightRegistry::default(),
            insurance: InsuranceLedger::default(),
            oracles: OracleConsensus::default(),
            payouts: PayoutEngine::default(),
            facts: VecDeque::new(),
            config,
            clock,
        })
    }

    /// Restores an engine from a snapshot taken by [`Self::snapshot`].
    pub fn restore(config: Config, clock: Arc<dyn Clock>, snapshot: Snapshot) -> Result<Self, Error> {
        config.rules.validate()?;
        let Snapshot {
            guard,
            airlines,
            flights,
            insurance,
            oracles,
            payouts,
        } = snapshot;
        info!(
            "Engine restored: airlines:{}, flights:{}, oracles:{}",
            airlines.registered_count(),
            flights.flights().count(),
            oracles.oracle_count()
        );
        Ok(Self {
            config,
            clock,
            guard,
            airlines,
            flights,
            insurance,
            oracles,
            payouts,
            facts: VecDeque::new(),
        })
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            guard: self.guard.clone(),
            airlines: self.airlines.clone(),
            flights: self.flights.clone(),
            insurance: self.insurance.clone(),
            oracles: self.oracles.clone(),
            payouts: self.payouts.clone(),
        }
    }

    /// Puts every component back to `snapshot` and drops queued facts.
    pub fn rollback(&mut self, snapshot: Snapshot) {
        let Snapshot {
            guard,
            airlines,
            flights,
            insurance,
            oracles,
            payouts,
        } = snapshot;
        self.guard = guard;
        self.airlines = airlines;
        self.flights = flights;
        self.insurance = insurance;
        self.oracles = oracles;
        self.payouts = payouts;
        self.facts.clear();
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Takes every fact queued since the last call, oldest first.
    pub fn drain_facts(&mut self) -> Vec<Fact> {
        self.facts.drain(..).collect()
    }

    fn emit(&mut self, fact: Fact) {
        debug!("Fact emitted: {fact:?}");
        self.facts.push_back(fact);
    }

    // Commands

    pub fn set_operating_status(
        &mut self,
        operational: bool,
        caller: AccountId,
    ) -> Result<(), Error> {
        if self.guard.set_operating_status(operational, caller)? {
            self.emit(Fact::OperatingStatusChanged { operational });
        }
        Ok(())
    }

    pub fn register_airline(
        &mut self,
        candidate: AccountId,
        voter: AccountId,
    ) -> Result<Admission, Error> {
        self.guard.ensure_operational()?;
        let admission = self
            .airlines
            .propose_or_vote(candidate, voter, &self.config.rules)?;
        match admission {
            Admission::Registered { votes } => self.emit(Fact::AirlineRegistered {
                airline: candidate,
                votes,
            }),
            Admission::Pending { votes, required } => self.emit(Fact::AirlineVoted {
                airline: candidate,
                voter,
                votes,
                required,
            }),
            Admission::AlreadyRegistered => {}
        }
        Ok(admission)
    }

    pub fn fund_airline(&mut self, airline: AccountId, amount: Amount) -> Result<bool, Error> {
        self.guard.ensure_operational()?;
        let funding = self.airlines.fund(airline, amount, &self.config.rules)?;
        self.emit(Fact::AirlineFunded {
            airline,
            amount,
            total: funding.total,
            member: funding.member,
        });
        Ok(funding.member)
    }

    pub fn register_flight(
        &mut self,
        airline: AccountId,
        code: impl Into<String>,
        departure: u64,
        caller: AccountId,
    ) -> Result<Flight, Error> {
        self.guard.ensure_operational()?;
        if !self.airlines.is_member(&airline) {
            return Err(Error::AirlineNotMember(airline));
        }
        let key = FlightKey::new(airline, code, departure);
        let flight = self.flights.register(key.clone(), caller)?.clone();
        self.emit(Fact::FlightRegistered { flight: key });
        Ok(flight)
    }

    /// Opens an oracle request for the flight and returns its key.
    pub fn fetch_flight_status(
        &mut self,
        airline: AccountId,
        code: impl Into<String>,
        departure: u64,
        caller: AccountId,
    ) -> Result<RequestKey, Error> {
        self.guard.ensure_operational()?;
        let key = FlightKey::new(airline, code, departure);
        self.ensure_unsettled(&key)?;

        let now = self.clock.now();
        let (request, opened) =
            self.oracles
                .open_request(key, caller, now, &self.config.rules);
        if opened == Opened::AlreadyOpen {
            debug!("Re-announcing open request {}", request.index);
        }
        self.emit(Fact::OracleRequest {
            index: request.index,
            airline: request.flight.airline,
            flight_code: request.flight.code.clone(),
            timestamp: request.flight.departure,
        });
        Ok(request)
    }

    pub fn buy_insurance(
        &mut self,
        passenger: AccountId,
        flight: FlightKey,
        premium: Amount,
    ) -> Result<(), Error> {
        self.guard.ensure_operational()?;
        self.ensure_unsettled(&flight)?;
        self.insurance
            .buy(passenger, flight.clone(), premium, &self.config.rules)?;
        self.emit(Fact::InsurancePurchased {
            passenger,
            flight,
            premium,
        });
        Ok(())
    }

    /// Zeroes the passenger's credit and authorizes its transfer.
    pub fn withdraw(&mut self, passenger: AccountId) -> Result<Amount, Error> {
        self.guard.ensure_operational()?;
        let amount = self.payouts.withdraw(&mut self.insurance, passenger)?;
        self.emit(Fact::PayoutAuthorized { passenger, amount });
        Ok(amount)
    }

    pub fn register_oracle(
        &mut self,
        oracle: AccountId,
        fee: Amount,
    ) -> Result<[u8; INDEXES_PER_ORACLE], Error> {
        self.guard.ensure_operational()?;
        let indexes = self.oracles.register(oracle, fee, &self.config.rules)?;
        self.emit(Fact::OracleRegistered { oracle, indexes });
        Ok(indexes)
    }

    /// Records an oracle's report and settles the flight when quorum is reached.
    pub fn submit_oracle_response(
        &mut self,
        index: u8,
        airline: AccountId,
        code: impl Into<String>,
        departure: u64,
        status: FlightStatus,
        oracle: AccountId,
    ) -> Result<ResponseOutcome, Error> {
        self.guard.ensure_operational()?;
        let key = RequestKey {
            index,
            flight: FlightKey::new(airline, code, departure),
        };
        let now = self.clock.now();
        let response = self
            .oracles
            .accept_response(key, status, oracle, now, &self.config.rules)?;

        // Nothing is mutated before the settlement is planned.
        let settlement = match response.outcome {
            ResponseOutcome::Resolved(status) if status.is_final() => Some(self.payouts.plan(
                &self.insurance,
                &response.key.flight,
                status,
                &self.config.rules,
            )?),
            _ => None,
        };

        self.oracles.record_response(&response);
        let RequestKey { index, flight } = &response.key;
        self.emit(Fact::OracleReport {
            index: *index,
            oracle,
            airline: flight.airline,
            flight_code: flight.code.clone(),
            timestamp: flight.departure,
            status,
        });

        if let ResponseOutcome::Resolved(status) = response.outcome {
            self.flights.set_status(flight, status);
            self.emit(Fact::FlightStatusInfo {
                airline: flight.airline,
                flight_code: flight.code.clone(),
                timestamp: flight.departure,
                status,
            });
            if status.is_final() {
                self.oracles.supersede(&response.key);
            }
        }
        if let Some(settlement) = settlement {
            for credit in self.payouts.apply(&mut self.insurance, settlement) {
                self.emit(Fact::PassengerCredited {
                    passenger: credit.passenger,
                    flight: flight.clone(),
                    amount: credit.amount,
                });
            }
        }
        Ok(response.outcome)
    }

    /// Closes open requests older than the configured TTL.
    pub fn expire_requests(&mut self) -> Result<usize, Error> {
        self.guard.ensure_operational()?;
        let now = self.clock.now();
        let expired = self.oracles.expire(now, &self.config.rules);
        let count = expired.len();
        for RequestKey { index, flight } in expired {
            self.emit(Fact::RequestExpired { index, flight });
        }
        Ok(count)
    }

    fn ensure_unsettled(&self, key: &FlightKey) -> Result<(), Error> {
        match self.flights.get(key) {
            None => Err(Error::UnknownFlight(key.clone())),
            Some(flight) if flight.status.is_final() => Err(Error::FlightResolved(key.clone())),
            Some(_) => Ok(()),
        }
    }

    // Queries

    pub fn is_operational(&self) -> bool {
        self.guard.is_operational()
    }

    pub fn registered_airlines(&self) -> Vec<AccountId> {
        self.airlines.registered_airlines()
    }

    pub fn member_airlines(&self) -> Vec<AccountId> {
        self.airlines.member_airlines()
    }

    pub fn airline(&self, id: &AccountId) -> Option<Airline> {
        self.airlines.airline(id).cloned()
    }

    pub fn is_airline(&self, id: &AccountId) -> bool {
        self.airlines.is_registered(id)
    }

    pub fn is_member(&self, id: &AccountId) -> bool {
        self.airlines.is_member(id)
    }

    pub fn number_of_airlines(&self) -> usize {
        self.airlines.registered_count()
    }

    pub fn flight_numbers(&self) -> Vec<String> {
        self.flights.flight_numbers()
    }

    /// Returns an empty record (empty code) for an unknown flight.
    pub fn flight(&self, key: &FlightKey) -> Flight {
        self.flights.get(key).cloned().unwrap_or_default()
    }

    pub fn flights(&self) -> Vec<Flight> {
        self.flights.flights().cloned().collect()
    }

    pub fn policies(&self, flight: &FlightKey) -> Vec<Policy> {
        self.insurance.policies(flight).cloned().collect()
    }

    pub fn has_credit(&self, passenger: &AccountId) -> bool {
        self.insurance.has_credit(passenger)
    }

    pub fn credit_amount(&self, passenger: &AccountId) -> Amount {
        self.insurance.credit_amount(passenger)
    }

    pub fn withdrawals(&self) -> &[Withdrawal] {
        self.payouts.withdrawals()
    }

    pub fn oracle_indexes(&self, oracle: &AccountId) -> Option<[u8; INDEXES_PER_ORACLE]> {
        self.oracles.indexes(oracle)
    }

    pub fn oracle_count(&self) -> usize {
        self.oracles.oracle_count()
    }

    pub fn oracle_request(&self, key: &RequestKey) -> Option<OracleRequest> {
        self.oracles.request(key).cloned()
    }

    pub fn open_requests(&self) -> usize {
        self.oracles.requests().filter(|r| r.is_open()).count()
    }
}
