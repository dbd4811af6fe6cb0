use actman::Handle;
use tokio::sync::oneshot;
use tracing::debug;

use crate::{Error, actors::engine};

/// Asks the engine to expire overdue oracle requests. Returns how many closed.
///
/// A paused engine is skipped until it resumes.
pub async fn handle_sweep_tick<EngineActor>(engine_handle: &Handle<EngineActor>) -> Result<usize, Error>
where
    EngineActor: actman::Actor<Message = engine::message::Message>,
{
    let (reply_sender, reply_receiver) = oneshot::channel();
    engine_handle
        .send(engine::message::Message::ExpireRequests { reply_sender })
        .await;
    match reply_receiver.await.map_err(|_| Error::ActorClosed)? {
        Ok(expired) => Ok(expired),
        Err(engine::Error::Engine(crate::engine::Error::SystemPaused)) => {
            debug!("Engine is paused, sweep skipped");
            Ok(0)
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use super::*;
    use crate::{
        actors::engine::{
            MemoryStore,
            message::{
                FetchFlightStatusMessage, FundAirlineMessage, RegisterFlightMessage,
                SetOperatingStatusMessage,
            },
        },
        engine::{ManualClock, Rules},
        models::{AccountId, Amount},
    };

    const DEPARTURE: u64 = 1_700_000_000;

    #[test_log::test(tokio::test)]
    async fn sweep_expires_overdue_requests() {
        let clock = Arc::new(ManualClock::new(DEPARTURE));
        let airline = AccountId::derive(101);
        let config = crate::engine::Config {
            owner: AccountId::derive(0),
            first_airline: airline,
            rules: Rules {
                request_ttl: Some(Duration::from_secs(300)),
                ..Default::default()
            },
        };
        let mut runner = actman::Runner::new();
        let engine_handle = runner.run(
            engine::Actor::new(config, Box::new(MemoryStore::default()), clock.clone()).unwrap(),
        );

        // Nothing to expire yet.
        assert_eq!(handle_sweep_tick(&engine_handle).await.unwrap(), 0);

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
        let (msg, reply_receiver) = FetchFlightStatusMessage {
            airline,
            code: "ND1309".into(),
            departure: DEPARTURE,
            caller: airline,
        }
        .into();
        engine_handle.send(msg).await;
        reply_receiver.await.unwrap().unwrap();

        clock.advance(299);
        assert_eq!(handle_sweep_tick(&engine_handle).await.unwrap(), 0);
        clock.advance(1);
        assert_eq!(handle_sweep_tick(&engine_handle).await.unwrap(), 1);
        assert_eq!(handle_sweep_tick(&engine_handle).await.unwrap(), 0);

        runner.shutdown().await;
    }

    #[test_log::test(tokio::test)]
    async fn sweep_skips_paused_engine() {
        let owner = AccountId::derive(0);
        let mut runner = actman::Runner::new();
        let engine_handle = runner.run(
            engine::Actor::new(
                crate::engine::Config::new(owner, AccountId::derive(101)),
                Box::new(MemoryStore::default()),
                Arc::new(ManualClock::new(DEPARTURE)),
            )
            .unwrap(),
        );
        let (msg, reply_receiver) = SetOperatingStatusMessage {
            operational: false,
            caller: owner,
        }
        .into();
        engine_handle.send(msg).await;
        reply_receiver.await.unwrap().unwrap();

        assert_eq!(handle_sweep_tick(&engine_handle).await.unwrap(), 0);

        runner.shutdown().await;
    }

    #[test_log::test(tokio::test)]
    async fn sweep_fails_when_engine_is_gone() {
        let mut runner = actman::Runner::new();
        let engine_handle = runner.run(
            engine::Actor::new(
                crate::engine::Config::new(AccountId::derive(0), AccountId::derive(101)),
                Box::new(MemoryStore::default()),
                Arc::new(ManualClock::new(DEPARTURE)),
            )
            .unwrap(),
        );
        runner.shutdown().await;

        assert!(matches!(
            handle_sweep_tick(&engine_handle).await,
            Err(Error::ActorClosed)
        ));
    }
}
