use serde::{Deserialize, Serialize};

use crate::{
    engine::oracles::INDEXES_PER_ORACLE,
    models::{AccountId, Amount, FlightKey, FlightStatus},
};

/// An immutable record of something the engine did.
///
/// Facts are queued by the engine in the order they happen and handed out
/// through [`crate::engine::Engine::drain_facts`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Fact {
    OperatingStatusChanged {
        operational: bool,
    },
    AirlineVoted {
        airline: AccountId,
        voter: AccountId,
        votes: usize,
        required: usize,
    },
    AirlineRegistered {
        airline: AccountId,
        votes: usize,
    },
    AirlineFunded {
        airline: AccountId,
        amount: Amount,
        total: Amount,
        member: bool,
    },
    FlightRegistered {
        flight: FlightKey,
    },
    InsurancePurchased {
        passenger: AccountId,
        flight: FlightKey,
        premium: Amount,
    },
    OracleRegistered {
        oracle: AccountId,
        indexes: [u8; INDEXES_PER_ORACLE],
    },
    /// Asks every oracle holding `index` to report the status of a flight.
    OracleRequest {
        index: u8,
        airline: AccountId,
        flight_code: String,
        timestamp: u64,
    },
    OracleReport {
        index: u8,
        oracle: AccountId,
        airline: AccountId,
        flight_code: String,
        timestamp: u64,
        status: FlightStatus,
    },
    /// Emitted once per request, when it reaches quorum.
    FlightStatusInfo {
        airline: AccountId,
        flight_code: String,
        timestamp: u64,
        status: FlightStatus,
    },
    RequestExpired {
        index: u8,
        flight: FlightKey,
    },
    PassengerCredited {
        passenger: AccountId,
        flight: FlightKey,
        amount: Amount,
    },
    /// The balance has been zeroed and `amount` may be transferred to the passenger.
    PayoutAuthorized {
        passenger: AccountId,
        amount: Amount,
    },
}
