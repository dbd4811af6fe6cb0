use std::fmt::{self, Debug, Formatter};

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, oneshot};

use crate::{
    actors::engine::Error,
    command::Status,
    engine::{
        Fact, Rules,
        airlines::Admission,
        flights::Flight,
        oracles::{INDEXES_PER_ORACLE, RequestKey, ResponseOutcome},
    },
    models::{AccountId, Amount, FlightKey, FlightStatus},
};

pub enum Message {
    SetOperatingStatus {
        msg: SetOperatingStatusMessage,
        reply_sender: oneshot::Sender<Result<(), Error>>,
    },
    RegisterAirline {
        msg: RegisterAirlineMessage,
        reply_sender: oneshot::Sender<Result<Admission, Error>>,
    },
    FundAirline {
        msg: FundAirlineMessage,
        reply_sender: oneshot::Sender<Result<bool, Error>>,
    },
    RegisterFlight {
        msg: RegisterFlightMessage,
        reply_sender: oneshot::Sender<Result<Flight, Error>>,
    },
    FetchFlightStatus {
        msg: FetchFlightStatusMessage,
        reply_sender: oneshot::Sender<Result<RequestKey, Error>>,
    },
    BuyInsurance {
        msg: BuyInsuranceMessage,
        reply_sender: oneshot::Sender<Result<(), Error>>,
    },
    Withdraw {
        msg: WithdrawMessage,
        reply_sender: oneshot::Sender<Result<Amount, Error>>,
    },
    RegisterOracle {
        msg: RegisterOracleMessage,
        reply_sender: oneshot::Sender<Result<[u8; INDEXES_PER_ORACLE], Error>>,
    },
    SubmitOracleResponse {
        msg: SubmitOracleResponseMessage,
        reply_sender: oneshot::Sender<Result<ResponseOutcome, Error>>,
    },
    ExpireRequests {
        reply_sender: oneshot::Sender<Result<usize, Error>>,
    },
    Status {
        reply_sender: oneshot::Sender<Status>,
    },
    ListAirlines {
        reply_sender: oneshot::Sender<Airlines>,
    },
    ListFlights {
        reply_sender: oneshot::Sender<Vec<Flight>>,
    },
    GetFlight {
        flight: FlightKey,
        reply_sender: oneshot::Sender<Flight>,
    },
    GetCredit {
        passenger: AccountId,
        reply_sender: oneshot::Sender<Amount>,
    },
    GetOracleIndexes {
        oracle: AccountId,
        reply_sender: oneshot::Sender<Option<[u8; INDEXES_PER_ORACLE]>>,
    },
    GetRegistrationFee {
        reply_sender: oneshot::Sender<Amount>,
    },
    GetRules {
        reply_sender: oneshot::Sender<Rules>,
    },
    Subscribe {
        reply_sender: oneshot::Sender<broadcast::Receiver<Fact>>,
    },
}

impl Debug for Message {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::SetOperatingStatus { msg, .. } => {
                f.debug_tuple("SetOperatingStatus").field(msg).finish()
            }
            Self::RegisterAirline { msg, .. } => f.debug_tuple("RegisterAirline").field(msg).finish(),
            Self::FundAirline { msg, .. } => f.debug_tuple("FundAirline").field(msg).finish(),
            Self::RegisterFlight { msg, .. } => f.debug_tuple("RegisterFlight").field(msg).finish(),
            Self::FetchFlightStatus { msg, .. } => {
                f.debug_tuple("FetchFlightStatus").field(msg).finish()
            }
            Self::BuyInsurance { msg, .. } => f.debug_tuple("BuyInsurance").field(msg).finish(),
            Self::Withdraw { msg, .. } => f.debug_tuple("Withdraw").field(msg).finish(),
            Self::RegisterOracle { msg, .. } => f.debug_tuple("RegisterOracle").field(msg).finish(),
            Self::SubmitOracleResponse { msg, .. } => {
                f.debug_tuple("SubmitOracleResponse").field(msg).finish()
            }
            Self::ExpireRequests { .. } => f.debug_tuple("ExpireRequests").finish(),
            Self::Status { .. } => f.debug_tuple("Status").finish(),
            Self::ListAirlines { .. } => f.debug_tuple("ListAirlines").finish(),
            Self::ListFlights { .. } => f.debug_tuple("ListFlights").finish(),
            Self::GetFlight { flight, .. } => f.debug_tuple("GetFlight").field(flight).finish(),
            Self::GetCredit { passenger, .. } => {
                f.debug_tuple("GetCredit").field(passenger).finish()
            }
            Self::GetOracleIndexes { oracle, .. } => {
                f.debug_tuple("GetOracleIndexes").field(oracle).finish()
            }
            Self::GetRegistrationFee { .. } => f.debug_tuple("GetRegistrationFee").finish(),
            Self::GetRules { .. } => f.debug_tuple("GetRules").finish(),
            Self::Subscribe { .. } => f.debug_tuple("Subscribe").finish(),
        }
    }
}

/// Registered and member airlines, in registration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Airlines {
    pub registered: Vec<AccountId>,
    pub members: Vec<AccountId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetOperatingStatusMessage {
    pub operational: bool,
    pub caller: AccountId,
}

impl From<SetOperatingStatusMessage> for (Message, oneshot::Receiver<Result<(), Error>>) {
    fn from(msg: SetOperatingStatusMessage) -> Self {
        let (reply_sender, reply_receiver) = oneshot::channel();
        (
            Message::SetOperatingStatus { msg, reply_sender },
            reply_receiver,
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterAirlineMessage {
    pub candidate: AccountId,
    pub voter: AccountId,
}

impl From<RegisterAirlineMessage> for (Message, oneshot::Receiver<Result<Admission, Error>>) {
    fn from(msg: RegisterAirlineMessage) -> Self {
        let (reply_sender, reply_receiver) = oneshot::channel();
        (Message::RegisterAirline { msg, reply_sender }, reply_receiver)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundAirlineMessage {
    pub airline: AccountId,
    pub amount: Amount,
}

impl From<FundAirlineMessage> for (Message, oneshot::Receiver<Result<bool, Error>>) {
    fn from(msg: FundAirlineMessage) -> Self {
        let (reply_sender, reply_receiver) = oneshot::channel();
        (Message::FundAirline { msg, reply_sender }, reply_receiver)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterFlightMessage {
    pub airline: AccountId,
    pub code: String,
    pub departure: u64,
    pub caller: AccountId,
}

impl From<RegisterFlightMessage> for (Message, oneshot::Receiver<Result<Flight, Error>>) {
    fn from(msg: RegisterFlightMessage) -> Self {
        let (reply_sender, reply_receiver) = oneshot::channel();
        (Message::RegisterFlight { msg, reply_sender }, reply_receiver)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchFlightStatusMessage {
    pub airline: AccountId,
    pub code: String,
    pub departure: u64,
    pub caller: AccountId,
}

impl From<FetchFlightStatusMessage> for (Message, oneshot::Receiver<Result<RequestKey, Error>>) {
    fn from(msg: FetchFlightStatusMessage) -> Self {
        let (reply_sender, reply_receiver) = oneshot::channel();
        (
            Message::FetchFlightStatus { msg, reply_sender },
            reply_receiver,
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuyInsuranceMessage {
    pub passenger: AccountId,
    pub flight: FlightKey,
    pub premium: Amount,
}

impl From<BuyInsuranceMessage> for (Message, oneshot::Receiver<Result<(), Error>>) {
    fn from(msg: BuyInsuranceMessage) -> Self {
        let (reply_sender, reply_receiver) = oneshot::channel();
        (Message::BuyInsurance { msg, reply_sender }, reply_receiver)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawMessage {
    pub passenger: AccountId,
}

impl From<WithdrawMessage> for (Message, oneshot::Receiver<Result<Amount, Error>>) {
    fn from(msg: WithdrawMessage) -> Self {
        let (reply_sender, reply_receiver) = oneshot::channel();
        (Message::Withdraw { msg, reply_sender }, reply_receiver)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterOracleMessage {
    pub oracle: AccountId,
    pub fee: Amount,
}

impl From<RegisterOracleMessage>
    for (Message, oneshot::Receiver<Result<[u8; INDEXES_PER_ORACLE], Error>>)
{
    fn from(msg: RegisterOracleMessage) -> Self {
        let (reply_sender, reply_receiver) = oneshot::channel();
        (Message::RegisterOracle { msg, reply_sender }, reply_receiver)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitOracleResponseMessage {
    pub index: u8,
    pub airline: AccountId,
    pub code: String,
    pub departure: u64,
    pub status: FlightStatus,
    pub oracle: AccountId,
}

impl From<SubmitOracleResponseMessage>
    for (Message, oneshot::Receiver<Result<ResponseOutcome, Error>>)
{
    fn from(msg: SubmitOracleResponseMessage) -> Self {
        let (reply_sender, reply_receiver) = oneshot::channel();
        (
            Message::SubmitOracleResponse { msg, reply_sender },
            reply_receiver,
        )
    }
}
