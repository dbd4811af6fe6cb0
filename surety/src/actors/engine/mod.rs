pub mod message;
mod store;

use std::{io, sync::Arc};

pub use store::{FileStore, MemoryStore, SnapshotStore};
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, error, info, warn};

use crate::{
    actors::engine::message::{
        Airlines, BuyInsuranceMessage, FetchFlightStatusMessage, FundAirlineMessage, Message,
        RegisterAirlineMessage, RegisterFlightMessage, RegisterOracleMessage,
        SetOperatingStatusMessage, SubmitOracleResponseMessage, WithdrawMessage,
    },
    command::Status,
    engine::{
        self, Clock, Engine, Fact,
        airlines::Admission,
        flights::Flight,
        oracles::{INDEXES_PER_ORACLE, RequestKey, ResponseOutcome},
    },
    models::Amount,
};

const FACT_CHANNEL_SIZE: usize = 1024;

/// Owns the [`Engine`] and serializes every operation on it.
///
/// After each successful command the queued facts are broadcast to
/// subscribers and a snapshot is written to the store.
pub struct Actor {
    engine: Engine,
    store: Box<dyn SnapshotStore>,
    fact_sender: broadcast::Sender<Fact>,
}

#[async_trait::async_trait]
impl actman::Actor for Actor {
    type Message = Message;

    async fn run(mut self, mut state: actman::State<Self>) {
        loop {
            tokio::select! {
                Some(message) = state.message_receiver.recv() => {
                    self.handle_message(message)
                }
                Some(ctrl) = state.control_receiver.recv() => {
                    match ctrl {
                        actman::Control::Shutdown => {
                            info!("Actor received shutdown control.");
                            return;
                        },
                    }
                }
                else => {
                    warn!("All channels closed, terminating actor.");
                    return;
                }
            }
        }
    }
}

impl Actor {
    /// Restores the engine from the store, or starts a fresh one.
    pub fn new(
        config: engine::Config,
        store: Box<dyn SnapshotStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, Error> {
        let engine = match store.load()? {
            Some(snapshot) => Engine::restore(config, clock, snapshot)?,
            None => Engine::new(config, clock)?,
        };
        let (fact_sender, _) = broadcast::channel(FACT_CHANNEL_SIZE);
        Ok(Self {
            engine,
            store,
            fact_sender,
        })
    }

    fn handle_message(&mut self, message: Message) {
        debug!("Message received: {message:?}");
        match message {
            Message::SetOperatingStatus { msg, reply_sender } => {
                self.handle_set_operating_status_message(msg, reply_sender)
            }
            Message::RegisterAirline { msg, reply_sender } => {
                self.handle_register_airline_message(msg, reply_sender)
            }
            Message::FundAirline { msg, reply_sender } => {
                self.handle_fund_airline_message(msg, reply_sender)
            }
            Message::RegisterFlight { msg, reply_sender } => {
                self.handle_register_flight_message(msg, reply_sender)
            }
            Message::FetchFlightStatus { msg, reply_sender } => {
                self.handle_fetch_flight_status_message(msg, reply_sender)
            }
            Message::BuyInsurance { msg, reply_sender } => {
                self.handle_buy_insurance_message(msg, reply_sender)
            }
            Message::Withdraw { msg, reply_sender } => {
                self.handle_withdraw_message(msg, reply_sender)
            }
            Message::RegisterOracle { msg, reply_sender } => {
                self.handle_register_oracle_message(msg, reply_sender)
            }
            Message::SubmitOracleResponse { msg, reply_sender } => {
                self.handle_submit_oracle_response_message(msg, reply_sender)
            }
            Message::ExpireRequests { reply_sender } => {
                self.handle_expire_requests_message(reply_sender)
            }
            Message::Status { reply_sender } => self.handle_status_message(reply_sender),
            Message::ListAirlines { reply_sender } => {
                send_reply(
                    reply_sender,
                    Airlines {
                        registered: self.engine.registered_airlines(),
                        members: self.engine.member_airlines(),
                    },
                );
            }
            Message::ListFlights { reply_sender } => send_reply(reply_sender, self.engine.flights()),
            Message::GetFlight {
                flight,
                reply_sender,
            } => send_reply(reply_sender, self.engine.flight(&flight)),
            Message::GetCredit {
                passenger,
                reply_sender,
            } => send_reply(reply_sender, self.engine.credit_amount(&passenger)),
            Message::GetOracleIndexes {
                oracle,
                reply_sender,
            } => send_reply(reply_sender, self.engine.oracle_indexes(&oracle)),
            Message::GetRegistrationFee { reply_sender } => send_reply(
                reply_sender,
                self.engine.config().rules.oracle_registration_fee,
            ),
            Message::GetRules { reply_sender } => {
                send_reply(reply_sender, self.engine.config().rules.clone())
            }
            Message::Subscribe { reply_sender } => {
                send_reply(reply_sender, self.fact_sender.subscribe())
            }
        }
    }

    fn handle_set_operating_status_message(
        &mut self,
        msg: SetOperatingStatusMessage,
        reply_sender: oneshot::Sender<Result<(), Error>>,
    ) {
        let _ = reply_sender
            .send(
                self.handle_set_operating_status_message_inner(msg)
                    .inspect_err(|e| error!("Failed to set operating status: {e:?}")),
            )
            .inspect_err(|_| error!("Failed to send reply"));
    }

    fn handle_set_operating_status_message_inner(
        &mut self,
        SetOperatingStatusMessage {
            operational,
            caller,
        }: SetOperatingStatusMessage,
    ) -> Result<(), Error> {
        self.apply(|engine| engine.set_operating_status(operational, caller))
    }

    fn handle_register_airline_message(
        &mut self,
        msg: RegisterAirlineMessage,
        reply_sender: oneshot::Sender<Result<Admission, Error>>,
    ) {
        let _ = reply_sender
            .send(
                self.handle_register_airline_message_inner(msg)
                    .inspect_err(|e| error!("Failed to register airline: {e:?}")),
            )
            .inspect_err(|_| error!("Failed to send reply"));
    }

    fn handle_register_airline_message_inner(
        &mut self,
        RegisterAirlineMessage { candidate, voter }: RegisterAirlineMessage,
    ) -> Result<Admission, Error> {
        self.apply(|engine| engine.register_airline(candidate, voter))
    }

    fn handle_fund_airline_message(
        &mut self,
        msg: FundAirlineMessage,
        reply_sender: oneshot::Sender<Result<bool, Error>>,
    ) {
        let _ = reply_sender
            .send(
                self.handle_fund_airline_message_inner(msg)
                    .inspect_err(|e| error!("Failed to fund airline: {e:?}")),
            )
            .inspect_err(|_| error!("Failed to send reply"));
    }

    fn handle_fund_airline_message_inner(
        &mut self,
        FundAirlineMessage { airline, amount }: FundAirlineMessage,
    ) -> Result<bool, Error> {
        self.apply(|engine| engine.fund_airline(airline, amount))
    }

    fn handle_register_flight_message(
        &mut self,
        msg: RegisterFlightMessage,
        reply_sender: oneshot::Sender<Result<Flight, Error>>,
    ) {
        let _ = reply_sender
            .send(
                self.handle_register_flight_message_inner(msg)
                    .inspect_err(|e| error!("Failed to register flight: {e:?}")),
            )
            .inspect_err(|_| error!("Failed to send reply"));
    }

    fn handle_register_flight_message_inner(
        &mut self,
        RegisterFlightMessage {
            airline,
            code,
            departure,
            caller,
        }: RegisterFlightMessage,
    ) -> Result<Flight, Error> {
        self.apply(|engine| engine.register_flight(airline, code, departure, caller))
    }

    fn handle_fetch_flight_status_message(
        &mut self,
        msg: FetchFlightStatusMessage,
        reply_sender: oneshot::Sender<Result<RequestKey, Error>>,
    ) {
        let _ = reply_sender
            .send(
                self.handle_fetch_flight_status_message_inner(msg)
                    .inspect_err(|e| error!("Failed to fetch flight status: {e:?}")),
            )
            .inspect_err(|_| error!("Failed to send reply"));
    }

    fn handle_fetch_flight_status_message_inner(
        &mut self,
        FetchFlightStatusMessage {
            airline,
            code,
            departure,
            caller,
        }: FetchFlightStatusMessage,
    ) -> Result<RequestKey, Error> {
        self.apply(|engine| engine.fetch_flight_status(airline, code, departure, caller))
    }

    fn handle_buy_insurance_message(
        &mut self,
        msg: BuyInsuranceMessage,
        reply_sender: oneshot::Sender<Result<(), Error>>,
    ) {
        let _ = reply_sender
            .send(
                self.handle_buy_insurance_message_inner(msg)
                    .inspect_err(|e| error!("Failed to buy insurance: {e:?}")),
            )
            .inspect_err(|_| error!("Failed to send reply"));
    }

    fn handle_buy_insurance_message_inner(
        &mut self,
        BuyInsuranceMessage {
            passenger,
            flight,
            premium,
        }: BuyInsuranceMessage,
    ) -> Result<(), Error> {
        self.apply(|engine| engine.buy_insurance(passenger, flight, premium))
    }

    fn handle_withdraw_message(
        &mut self,
        msg: WithdrawMessage,
        reply_sender: oneshot::Sender<Result<Amount, Error>>,
    ) {
        let _ = reply_sender
            .send(
                self.handle_withdraw_message_inner(msg)
                    .inspect_err(|e| error!("Failed to withdraw: {e:?}")),
            )
            .inspect_err(|_| error!("Failed to send reply"));
    }

    fn handle_withdraw_message_inner(
        &mut self,
        WithdrawMessage { passenger }: WithdrawMessage,
    ) -> Result<Amount, Error> {
        self.apply(|engine| engine.withdraw(passenger))
    }

    fn handle_register_oracle_message(
        &mut self,
        msg: RegisterOracleMessage,
        reply_sender: oneshot::Sender<Result<[u8; INDEXES_PER_ORACLE], Error>>,
    ) {
        let _ = reply_sender
            .send(
                self.handle_register_oracle_message_inner(msg)
                    .inspect_err(|e| error!("Failed to register oracle: {e:?}")),
            )
            .inspect_err(|_| error!("Failed to send reply"));
    }

    fn handle_register_oracle_message_inner(
        &mut self,
        RegisterOracleMessage { oracle, fee }: RegisterOracleMessage,
    ) -> Result<[u8; INDEXES_PER_ORACLE], Error> {
        self.apply(|engine| engine.register_oracle(oracle, fee))
    }

    fn handle_submit_oracle_response_message(
        &mut self,
        msg: SubmitOracleResponseMessage,
        reply_sender: oneshot::Sender<Result<ResponseOutcome, Error>>,
    ) {
        let _ = reply_sender
            .send(
                self.handle_submit_oracle_response_message_inner(msg)
                    .inspect_err(|e| error!("Failed to submit oracle response: {e:?}")),
            )
            .inspect_err(|_| error!("Failed to send reply"));
    }

    fn handle_submit_oracle_response_message_inner(
        &mut self,
        SubmitOracleResponseMessage {
            index,
            airline,
            code,
            departure,
            status,
            oracle,
        }: SubmitOracleResponseMessage,
    ) -> Result<ResponseOutcome, Error> {
        self.apply(|engine| {
            engine.submit_oracle_response(index, airline, code, departure, status, oracle)
        })
    }

    fn handle_expire_requests_message(
        &mut self,
        reply_sender: oneshot::Sender<Result<usize, Error>>,
    ) {
        let result = self
            .apply(Engine::expire_requests)
            .inspect_err(|e| error!("Failed to expire requests: {e:?}"));
        send_reply(reply_sender, result);
    }

    fn handle_status_message(&self, reply_sender: oneshot::Sender<Status>) {
        let status = Status {
            operational: self.engine.is_operational(),
            owner: self.engine.config().owner,
            airlines: self.engine.number_of_airlines(),
            members: self.engine.member_airlines().len(),
            flights: self.engine.flight_numbers().len(),
            oracles: self.engine.oracle_count(),
            open_requests: self.engine.open_requests(),
        };
        send_reply(reply_sender, status);
    }

    /// Runs an engine command, persists the new state and publishes its facts.
    ///
    /// If the snapshot cannot be saved the engine is rolled back to where it
    /// was before the command and no fact leaves the actor.
    fn apply<T>(
        &mut self,
        command: impl FnOnce(&mut Engine) -> Result<T, engine::Error>,
    ) -> Result<T, Error> {
        let before = self.engine.snapshot();
        let value = command(&mut self.engine)?;
        let facts = self.engine.drain_facts();
        if facts.is_empty() {
            return Ok(value);
        }
        if let Err(e) = self.store.save(&self.engine.snapshot()) {
            warn!("Rolling back after failed snapshot save: {e}");
            self.engine.rollback(before);
            return Err(e);
        }
        for fact in facts {
            // No subscribers is not an error.
            let _ = self.fact_sender.send(fact);
        }
        Ok(value)
    }
}

fn send_reply<T>(reply_sender: oneshot::Sender<T>, value: T) {
    let _ = reply_sender
        .send(value)
        .inspect_err(|_| error!("Failed to send reply"));
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Engine error: {0}")]
    Engine(#[from] engine::Error),
    #[error("IO error: {message}: {cause}")]
    IO { message: String, cause: io::Error },
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
