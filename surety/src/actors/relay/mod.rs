mod config;

pub use config::{Config, ResponseStrategy};
use rand::{SeedableRng as _, rngs::StdRng};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, error, info, warn};

use crate::{
    actors::engine::{
        self,
        message::{RegisterOracleMessage, SubmitOracleResponseMessage},
    },
    engine::{
        Fact,
        oracles::{INDEXES_PER_ORACLE, ResponseOutcome},
    },
    models::{AccountId, Amount, FlightStatus},
};

/// A registered simulated oracle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OracleInfo {
    pub id: AccountId,
    pub indexes: [u8; INDEXES_PER_ORACLE],
}

/// Simulates a fleet of independent oracles.
///
/// Registers each oracle once, watches the engine's facts for status
/// requests and answers every request whose index an oracle was assigned.
pub struct Actor {
    config: Config,
    engine_handle: actman::Handle<engine::Actor>,
    fact_receiver: broadcast::Receiver<Fact>,
    oracles: Vec<OracleInfo>,
    rng: StdRng,
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
                result = self.fact_receiver.recv() => {
                    match result {
                        Ok(fact) => self.handle_fact(fact).await,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!("Relay lagged behind, {skipped} facts skipped");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            warn!("Fact channel closed, terminating actor.");
                            return;
                        }
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
    pub async fn new(config: Config, engine_handle: actman::Handle<engine::Actor>) -> Result<Self, Error> {
        // Subscribe before registering so no request is missed.
        let (reply_sender, reply_receiver) = oneshot::channel();
        engine_handle
            .send(engine::message::Message::Subscribe { reply_sender })
            .await;
        let fact_receiver = reply_receiver.await.map_err(|_| Error::EngineClosed)?;

        // The fee is read once and reused for every oracle.
        let (reply_sender, reply_receiver) = oneshot::channel();
        engine_handle
            .send(engine::message::Message::GetRegistrationFee { reply_sender })
            .await;
        let fee = reply_receiver.await.map_err(|_| Error::EngineClosed)?;

        let mut oracles = Vec::with_capacity(config.oracles);
        for i in 0..config.oracles {
            let id = AccountId::derive(config.seed.wrapping_add(i as u64));
            let indexes = register_oracle(&engine_handle, id, fee).await?;
            debug!("Oracle {id} assigned indexes {indexes:?}");
            oracles.push(OracleInfo { id, indexes });
        }
        info!("{} oracles registered with fee {fee}", oracles.len());

        Ok(Self {
            rng: StdRng::seed_from_u64(config.seed),
            config,
            engine_handle,
            fact_receiver,
            oracles,
        })
    }

    fn handle_message(&self, message: Message) {
        match message {
            Message::ListOracles { reply_sender } => {
                let _ = reply_sender
                    .send(self.oracles.clone())
                    .inspect_err(|_| error!("Failed to send reply"));
            }
        }
    }

    async fn handle_fact(&mut self, fact: Fact) {
        match fact {
            Fact::OracleRequest {
                index,
                airline,
                flight_code,
                timestamp,
            } => {
                self.handle_oracle_request(index, airline, flight_code, timestamp)
                    .await
            }
            Fact::FlightStatusInfo {
                flight_code,
                timestamp,
                status,
                ..
            } => info!("Flight {flight_code}@{timestamp} resolved as {status}"),
            _ => {}
        }
    }

    async fn handle_oracle_request(
        &mut self,
        index: u8,
        airline: AccountId,
        flight_code: String,
        timestamp: u64,
    ) {
        let assigned: Vec<AccountId> = self
            .oracles
            .iter()
            .filter(|oracle| oracle.indexes.contains(&index))
            .map(|oracle| oracle.id)
            .collect();
        debug!(
            "Request {index} for {flight_code}@{timestamp}: {} oracles assigned",
            assigned.len()
        );

        for oracle in assigned {
            let status = self.config.strategy.pick(&mut self.rng);
            match self
                .submit(index, airline, flight_code.clone(), timestamp, status, oracle)
                .await
            {
                Ok(ResponseOutcome::Resolved(status)) => {
                    debug!("Response from {oracle} resolved {flight_code} as {status}")
                }
                Ok(outcome) => debug!("Response from {oracle}: {outcome:?}"),
                Err(e) => warn!("Response from {oracle} rejected: {e}"),
            }
        }
    }

    async fn submit(
        &self,
        index: u8,
        airline: AccountId,
        code: String,
        departure: u64,
        status: FlightStatus,
        oracle: AccountId,
    ) -> Result<ResponseOutcome, Error> {
        let (msg, reply_receiver) = SubmitOracleResponseMessage {
            index,
            airline,
            code,
            departure,
            status,
            oracle,
        }
        .into();
        self.engine_handle.send(msg).await;
        reply_receiver
            .await
            .map_err(|_| Error::EngineClosed)?
            .map_err(Error::from)
    }
}

/// Registers an oracle, or looks up its indexes if it already is.
async fn register_oracle(
    engine_handle: &actman::Handle<engine::Actor>,
    oracle: AccountId,
    fee: Amount,
) -> Result<[u8; INDEXES_PER_ORACLE], Error> {
    let (msg, reply_receiver) = RegisterOracleMessage { oracle, fee }.into();
    engine_handle.send(msg).await;
    match reply_receiver.await.map_err(|_| Error::EngineClosed)? {
        Ok(indexes) => Ok(indexes),
        Err(engine::Error::Engine(crate::engine::Error::DuplicateOracle(_))) => {
            let (reply_sender, reply_receiver) = oneshot::channel();
            engine_handle
                .send(engine::message::Message::GetOracleIndexes {
                    oracle,
                    reply_sender,
                })
                .await;
            reply_receiver
                .await
                .map_err(|_| Error::EngineClosed)?
                .ok_or(Error::EngineClosed)
        }
        Err(e) => Err(e.into()),
    }
}

pub enum Message {
    ListOracles {
        reply_sender: oneshot::Sender<Vec<OracleInfo>>,
    },
}

impl std::fmt::Debug for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ListOracles { .. } => f.debug_tuple("ListOracles").finish(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Engine error: {0}")]
    Engine(#[from] engine::Error),
    #[error("Engine actor has been closed")]
    EngineClosed,
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use tokio::time::timeout;

    use super::*;
    use crate::{
        actors::engine::{
            MemoryStore,
            message::{
                BuyInsuranceMessage, FetchFlightStatusMessage, FundAirlineMessage,
                RegisterFlightMessage,
            },
        },
        engine::{ManualClock, Rules},
        models::FlightKey,
    };

    const DEPARTURE: u64 = 1_700_000_000;

    fn engine_actor() -> engine::Actor {
        let config = crate::engine::Config {
            owner: AccountId::derive(0),
            first_airline: AccountId::derive(101),
            rules: Rules {
                index_space: 3,
                ..Default::default()
            },
        };
        engine::Actor::new(
            config,
            Box::new(MemoryStore::default()),
            Arc::new(ManualClock::new(DEPARTURE)),
        )
        .unwrap()
    }

    #[test_log::test(tokio::test)]
    async fn oracles_register_and_list() {
        let mut runner = actman::Runner::new();
        let engine_handle = runner.run(engine_actor());
        let config = Config {
            oracles: 4,
            ..Default::default()
        };
        let relay = Actor::new(config.clone(), engine_handle.clone()).await.unwrap();
        let relay_handle = runner.run(relay);

        let (reply_sender, reply_receiver) = oneshot::channel();
        relay_handle
            .send(Message::ListOracles { reply_sender })
            .await;
        let oracles = reply_receiver.await.unwrap();
        assert_eq!(oracles.len(), 4);
        for oracle in &oracles {
            let mut indexes = oracle.indexes;
            indexes.sort();
            assert_eq!(indexes, [0, 1, 2]);
        }

        // A second relay with the same seed reuses the registrations.
        let again = Actor::new(config, engine_handle.clone()).await.unwrap();
        assert_eq!(again.oracles, oracles);

        runner.shutdown().await;
    }

    #[test_log::test(tokio::test)]
    async fn relay_resolves_requests() {
        let mut runner = actman::Runner::new();
        let engine_handle = runner.run(engine_actor());
        let relay = Actor::new(
            Config {
                oracles: 5,
                seed: 42,
                strategy: ResponseStrategy::Fixed(FlightStatus::LateAirline),
            },
            engine_handle.clone(),
        )
        .await
        .unwrap();
        let _relay_handle = runner.run(relay);

        let (reply_sender, reply_receiver) = oneshot::channel();
        engine_handle
            .send(engine::message::Message::Subscribe { reply_sender })
            .await;
        let mut facts = reply_receiver.await.unwrap();

        let airline = AccountId::derive(101);
        let passenger = AccountId::derive(200);
        let (msg, reply_receiver) = FundAirlineMessage {
            airline,
            amount: Amount::ether(10),
        }
        .into();
        engine_handle.send(msg).await;
        reply_receiver.await.unwrap().unwrap();
        let (msg, reply_receiver) = RegisterFlightMessage {
            airline,
            code: "ND1309".into(),
            departure: DEPARTURE,
            caller: airline,
        }
        .into();
        engine_handle.send(msg).await;
        reply_receiver.await.unwrap().unwrap();
        let (msg, reply_receiver) = BuyInsuranceMessage {
            passenger,
            flight: FlightKey::new(airline, "ND1309", DEPARTURE),
            premium: Amount::ether(1),
        }
        .into();
        engine_handle.send(msg).await;
        reply_receiver.await.unwrap().unwrap();

        let (msg, reply_receiver) = FetchFlightStatusMessage {
            airline,
            code: "ND1309".into(),
            departure: DEPARTURE,
            caller: passenger,
        }
        .into();
        engine_handle.send(msg).await;
        reply_receiver.await.unwrap().unwrap();

        let status = timeout(Duration::from_secs(5), async {
            loop {
                if let Fact::FlightStatusInfo { status, .. } = facts.recv().await.unwrap() {
                    return status;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(status, FlightStatus::LateAirline);

        let (reply_sender, reply_receiver) = oneshot::channel();
        engine_handle
            .send(engine::message::Message::GetCredit {
                passenger,
                reply_sender,
            })
            .await;
        assert_eq!(reply_receiver.await.unwrap(), Amount::ether_fraction(15, 1));

        runner.shutdown().await;
    }
}
