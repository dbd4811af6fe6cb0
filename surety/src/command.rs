use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::error;

use crate::{
    actors::{
        engine,
        relay::{self, OracleInfo},
    },
    models::AccountId,
};

#[derive(Debug)]
pub enum Command {
    Engine(engine::message::Message),
    Status {
        reply_sender: oneshot::Sender<Status>,
    },
    ListOracles {
        reply_sender: oneshot::Sender<Vec<OracleInfo>>,
    },
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub operational: bool,
    pub owner: AccountId,
    pub airlines: usize,
    pub members: usize,
    pub flights: usize,
    pub oracles: usize,
    pub open_requests: usize,
}

/// Routes a command to the actor that owns it. Returns `true` on shutdown.
pub async fn handle_command(
    command: Command,
    engine_handle: &actman::Handle<engine::Actor>,
    relay_handle: Option<&actman::Handle<relay::Actor>>,
) -> bool {
    match command {
        Command::Engine(msg) => {
            engine_handle.send(msg).await;
        }
        Command::Status { reply_sender } => {
            engine_handle
                .send(engine::message::Message::Status { reply_sender })
                .await;
        }
        Command::ListOracles { reply_sender } => {
            handle_list_oracles_command(reply_sender, relay_handle).await;
        }
        Command::Shutdown => {
            // Should shutdown
            return true;
        }
    }

    // Should not shutdown
    false
}

async fn handle_list_oracles_command(
    reply_sender: oneshot::Sender<Vec<OracleInfo>>,
    relay_handle: Option<&actman::Handle<relay::Actor>>,
) {
    match relay_handle {
        Some(relay_handle) => {
            relay_handle
                .send(relay::Message::ListOracles { reply_sender })
                .await;
        }
        None => {
            let _ = reply_sender
                .send(Vec::new())
                .inspect_err(|_| error!("Failed to send oracles reply"));
        }
    }
}
