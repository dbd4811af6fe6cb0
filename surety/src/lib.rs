use std::{io, sync::Arc};

use tokio::{
    sync::{mpsc, oneshot},
    time::{Interval, MissedTickBehavior},
};
use tracing::{debug, error, info};

#[cfg(feature = "rest")]
use crate::actors::rest;
#[cfg(feature = "rest")]
pub use crate::actors::rest::Config as RestConfig;
use crate::actors::{
    engine::{FileStore, MemoryStore, SnapshotStore},
    relay,
};
pub use crate::{
    actors::{
        engine::{Error as EngineError, message as engine_message},
        relay::{Config as RelayConfig, OracleInfo, ResponseStrategy},
    },
    command::{Command, Status},
    config::Config,
};

mod actors;
mod command;
pub mod config;
pub mod engine;
pub mod models;
mod serde_helpers;
mod sweep;

/// A running insurance node: the engine actor, the oracle relay and the
/// optional REST server, driven by [`Command`]s.
pub struct Surety {
    config: Config,
    command_receiver: mpsc::Receiver<Command>,
}

impl Surety {
    pub fn new(config: Config) -> Result<(Self, mpsc::Sender<Command>), Error> {
        config.engine.rules.validate()?;
        let (command_sender, command_receiver) = mpsc::channel(100);
        Ok((
            Self {
                config,
                command_receiver,
            },
            command_sender,
        ))
    }

    pub async fn run(mut self, ready_sender: oneshot::Sender<Result<(), Error>>) {
        info!("Surety is running...");

        let mut runner = actman::Runner::new();

        let engine_actor = match self.engine_actor() {
            Ok(actor) => actor,
            Err(e) => {
                error!("Failed to create engine actor: {e:?}");
                send_ready(ready_sender, Err(e));
                return;
            }
        };
        let engine_handle = runner.run(engine_actor);

        let relay_handle = if self.config.relay.oracles > 0 {
            match relay::Actor::new(self.config.relay.clone(), engine_handle.clone()).await {
                Ok(actor) => Some(runner.run(actor)),
                Err(e) => {
                    error!("Failed to create relay actor: {e:?}");
                    runner.shutdown().await;
                    send_ready(ready_sender, Err(e.into()));
                    return;
                }
            }
        } else {
            info!("Oracle relay disabled");
            None
        };

        #[cfg(feature = "rest")]
        let _rest_handle = match &self.config.rest {
            Some(rest_config) => match rest::Actor::new(rest_config, engine_handle.clone()).await {
                Ok(actor) => Some(runner.run(actor)),
                Err(e) => {
                    error!("Failed to create REST actor: {e:?}");
                    runner.shutdown().await;
                    send_ready(ready_sender, Err(e.into()));
                    return;
                }
            },
            None => None,
        };

        send_ready(ready_sender, Ok(()));

        let mut sweep_interval = self.config.sweep_interval.map(|period| {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

        loop {
            tokio::select! {
                cmd = self.command_receiver.recv() => {
                    let Some(cmd) = cmd else {
                        info!("Command channel closed");
                        break;
                    };
                    debug!("Command received: {:?}", cmd);
                    if command::handle_command(cmd, &engine_handle, relay_handle.as_ref()).await {
                        break;
                    }
                }
                _ = tick(&mut sweep_interval) => {
                    match sweep::handle_sweep_tick(&engine_handle).await {
                        Ok(0) => {}
                        Ok(expired) => info!("{expired} oracle requests expired"),
                        Err(e) => error!("Sweep failed: {e}"),
                    }
                }
            }
        }

        runner.shutdown().await;
        info!("Surety has been shut down.");
    }

    fn engine_actor(&self) -> Result<actors::engine::Actor, Error> {
        let store: Box<dyn SnapshotStore> = match &self.config.snapshot_path {
            Some(path) => Box::new(FileStore::new(path)?),
            None => Box::new(MemoryStore::default()),
        };
        Ok(actors::engine::Actor::new(
            self.config.engine.clone(),
            store,
            Arc::new(engine::SystemClock),
        )?)
    }
}

/// Resolves on the next tick, or never when sweeping is disabled.
async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

fn send_ready(ready_sender: oneshot::Sender<Result<(), Error>>, result: Result<(), Error>) {
    let _ = ready_sender
        .send(result)
        .inspect_err(|_| error!("Failed to send ready signal"));
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Engine error: {0}")]
    Engine(#[from] actors::engine::Error),
    #[error("Relay error: {0}")]
    Relay(#[from] relay::Error),
    #[cfg(feature = "rest")]
    #[error("HTTP error: {0}")]
    Http(#[from] rest::Error),
    #[error("IO error: {message}: {cause}")]
    IO { message: String, cause: io::Error },
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    #[error("Actor has been closed")]
    ActorClosed,
}

impl From<engine::Error> for Error {
    fn from(e: engine::Error) -> Self {
        match e {
            engine::Error::InvalidConfig(message) => Self::InvalidConfig(message),
            e => Self::Engine(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        engine::Fact,
        engine_message::{BuyInsuranceMessage, FetchFlightStatusMessage, FundAirlineMessage},
        models::{AccountId, Amount, FlightKey, FlightStatus},
    };

    async fn start(config: Config) -> (mpsc::Sender<Command>, tokio::task::JoinHandle<()>) {
        let (surety, command_sender) = Surety::new(config).unwrap();
        let (ready_sender, ready_receiver) = oneshot::channel();
        let task = tokio::spawn(async move { surety.run(ready_sender).await });
        ready_receiver.await.unwrap().unwrap();
        (command_sender, task)
    }

    #[test_log::test(tokio::test)]
    async fn node_settles_a_flight_end_to_end() {
        let owner = AccountId::derive(0);
        let airline = AccountId::derive(101);
        let passenger = AccountId::derive(200);
        let mut config = Config::new(owner, airline);
        config.engine.rules.index_space = 3;
        config.relay = RelayConfig {
            oracles: 6,
            seed: 9,
            strategy: ResponseStrategy::Fixed(FlightStatus::LateAirline),
        };
        let (command_sender, task) = start(config).await;

        let (reply_sender, reply_receiver) = oneshot::channel();
        command_sender
            .send(Command::Engine(engine_message::Message::Subscribe {
                reply_sender,
            }))
            .await
            .unwrap();
        let mut facts = reply_receiver.await.unwrap();

        let (msg, reply_receiver) = FundAirlineMessage {
            airline,
            amount: Amount::ether(10),
        }
        .into();
        command_sender.send(Command::Engine(msg)).await.unwrap();
        reply_receiver.await.unwrap().unwrap();

        let (msg, reply_receiver) = engine_message::RegisterFlightMessage {
            airline,
            code: "ND1309".into(),
            departure: 1_700_000_000,
            caller: airline,
        }
        .into();
        command_sender.send(Command::Engine(msg)).await.unwrap();
        reply_receiver.await.unwrap().unwrap();

        let (msg, reply_receiver) = BuyInsuranceMessage {
            passenger,
            flight: FlightKey::new(airline, "ND1309", 1_700_000_000),
            premium: Amount::ether_fraction(5, 1),
        }
        .into();
        command_sender.send(Command::Engine(msg)).await.unwrap();
        reply_receiver.await.unwrap().unwrap();

        let (msg, reply_receiver) = FetchFlightStatusMessage {
            airline,
            code: "ND1309".into(),
            departure: 1_700_000_000,
            caller: passenger,
        }
        .into();
        command_sender.send(Command::Engine(msg)).await.unwrap();
        reply_receiver.await.unwrap().unwrap();

        let credited = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Fact::PassengerCredited { amount, .. } = facts.recv().await.unwrap() {
                    return amount;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(credited, Amount::ether_fraction(75, 2));

        let (reply_sender, reply_receiver) = oneshot::channel();
        command_sender
            .send(Command::Status { reply_sender })
            .await
            .unwrap();
        let status = reply_receiver.await.unwrap();
        assert_eq!(status.oracles, 6);
        assert_eq!(status.flights, 1);

        let (reply_sender, reply_receiver) = oneshot::channel();
        command_sender
            .send(Command::ListOracles { reply_sender })
            .await
            .unwrap();
        assert_eq!(reply_receiver.await.unwrap().len(), 6);

        command_sender.send(Command::Shutdown).await.unwrap();
        task.await.unwrap();
    }

    #[test_log::test(tokio::test)]
    async fn invalid_rules_fail_early() {
        let mut config = Config::new(AccountId::derive(0), AccountId::derive(1));
        config.engine.rules.oracle_quorum = 0;
        assert!(matches!(Surety::new(config), Err(Error::InvalidConfig(_))));
    }

    #[test_log::test(tokio::test)]
    async fn relay_disabled() {
        let mut config = Config::new(AccountId::derive(0), AccountId::derive(1));
        config.relay.oracles = 0;
        let (command_sender, task) = start(config).await;

        let (reply_sender, reply_receiver) = oneshot::channel();
        command_sender
            .send(Command::ListOracles { reply_sender })
            .await
            .unwrap();
        assert!(reply_receiver.await.unwrap().is_empty());

        command_sender.send(Command::Shutdown).await.unwrap();
        task.await.unwrap();
    }
}
