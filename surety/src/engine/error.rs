use crate::models::{AccountId, Amount, FlightKey};

/// Validation failures of engine operations.
///
/// A failed operation never leaves partial state behind.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("System is paused")]
    SystemPaused,
    #[error("Caller {0} is not authorized")]
    Unauthorized(AccountId),
    #[error("Voter {0} is not a funded member airline")]
    VoterNotMember(AccountId),
    #[error("Airline {0} is not a funded member")]
    AirlineNotMember(AccountId),
    #[error("Airline {0} is not registered")]
    UnknownAirline(AccountId),
    #[error("The zero account cannot be an airline")]
    ZeroAirline,
    #[error("Flight already registered: {0}")]
    DuplicateFlight(FlightKey),
    #[error("Flight not registered: {0}")]
    UnknownFlight(FlightKey),
    #[error("Flight status already finalized: {0}")]
    FlightResolved(FlightKey),
    #[error("Premium {premium} exceeds the cap {cap}")]
    PremiumExceedsCap { premium: Amount, cap: Amount },
    #[error("Premium must not be zero")]
    ZeroPremium,
    #[error("Passenger {passenger} already holds a policy on {flight}")]
    DuplicatePolicy {
        passenger: AccountId,
        flight: FlightKey,
    },
    #[error("Registration fee {paid} is below the required {required}")]
    InsufficientFee { paid: Amount, required: Amount },
    #[error("Oracle {0} is already registered")]
    DuplicateOracle(AccountId),
    #[error("Index {index} is not assigned to oracle {oracle}")]
    IndexMismatch { oracle: AccountId, index: u8 },
    #[error("No oracle request for index {index} on {flight}")]
    UnknownRequest { index: u8, flight: FlightKey },
    #[error("Oracle request for index {index} on {flight} has expired")]
    RequestExpired { index: u8, flight: FlightKey },
    #[error("Passenger {0} has no credit")]
    NoCredit(AccountId),
    #[error("Amount overflow")]
    AmountOverflow,
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
}
