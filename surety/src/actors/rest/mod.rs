use std::{io, net::SocketAddr, time::Duration};

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use serde::{Deserialize, Serialize};
use tokio::{sync::oneshot, task::JoinHandle};
use tower_http::timeout::TimeoutLayer;
use tracing::{error, info, warn};

use crate::{
    actors::engine::{self, message::Message},
    models::{AccountId, Amount},
};

/// Serves read-only queries over HTTP.
pub struct Actor {
    local_addr: SocketAddr,
    server_join_handle: JoinHandle<()>,
    shutdown_sender: oneshot::Sender<()>,
}

#[async_trait::async_trait]
impl actman::Actor for Actor {
    type Message = ();

    async fn run(mut self, mut state: actman::State<Self>) {
        loop {
            tokio::select! {
                Some(()) = state.message_receiver.recv() => {}
                Some(ctrl) = state.control_receiver.recv() => {
                    match ctrl {
                        actman::Control::Shutdown => {
                            info!("Actor received shutdown control.");
                            break;
                        },
                    }
                }
                else => {
                    warn!("All channels closed, terminating actor.");
                    break;
                }
            }
        }

        self.shutdown().await;
    }
}

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
struct ServerState {
    engine_handle: actman::Handle<engine::Actor>,
}

impl Actor {
    pub async fn new(config: &Config, engine_handle: actman::Handle<engine::Actor>) -> Result<Self, Error> {
        let router = Router::new()
            .route("/status", get(status))
            .route("/airlines", get(airlines))
            .route("/airlines/members", get(members))
            .route("/flights", get(flights))
            .route("/credits/{passenger}", get(credit))
            .layer(
                // Necessary for graceful shutdown
                TimeoutLayer::new(REQUEST_TIMEOUT),
            )
            .with_state(ServerState { engine_handle });
        let listener = tokio::net::TcpListener::bind(config.addr)
            .await
            .map_err(|cause| Error::IO {
                message: "Failed to listen on port".to_string(),
                cause,
            })?;
        let local_addr = listener.local_addr().map_err(|cause| Error::IO {
            message: "Failed to get local address".to_string(),
            cause,
        })?;
        let (shutdown_sender, shutdown_receiver) = oneshot::channel();
        let server_join_handle = tokio::spawn(async move {
            info!("starting REST server: {local_addr:?}");
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(async move { shutdown_signal(shutdown_receiver).await })
                .await
            {
                error!("REST server failed: {e}");
            }
        });

        Ok(Self {
            local_addr,
            server_join_handle,
            shutdown_sender,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    async fn shutdown(self) {
        // Send shutdown signal to the axum server
        if self.shutdown_sender.send(()).is_err() {
            warn!("REST server has already stopped");
        }
        // Wait until the axum server task is terminated
        if let Err(e) = self.server_join_handle.await {
            error!("REST server task terminated abnormally: {e}");
        }
        info!("REST server has been shut down.");
    }
}

/// A future to be passed to the [`axum::serve::Serve::with_graceful_shutdown`].
/// When this future resolves, the axum server will start graceful shutdown.
async fn shutdown_signal(shutdown_receiver: oneshot::Receiver<()>) {
    let _ = shutdown_receiver.await;
    info!("starting graceful shutdown for REST server...");
}

/// Sends a query to the engine actor and waits for the answer.
async fn query<T>(
    state: &ServerState,
    message: impl FnOnce(oneshot::Sender<T>) -> Message,
) -> Result<T, StatusCode> {
    let (reply_sender, reply_receiver) = oneshot::channel();
    state.engine_handle.send(message(reply_sender)).await;
    reply_receiver.await.map_err(|_| {
        error!("failed to receive reply from the engine");
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

async fn status(State(state): State<ServerState>) -> impl IntoResponse {
    query(&state, |reply_sender| Message::Status { reply_sender })
        .await
        .map(Json)
}

async fn airlines(State(state): State<ServerState>) -> impl IntoResponse {
    query(&state, |reply_sender| Message::ListAirlines { reply_sender })
        .await
        .map(|airlines| Json(airlines.registered))
}

async fn members(State(state): State<ServerState>) -> impl IntoResponse {
    query(&state, |reply_sender| Message::ListAirlines { reply_sender })
        .await
        .map(|airlines| Json(airlines.members))
}

async fn flights(State(state): State<ServerState>) -> impl IntoResponse {
    query(&state, |reply_sender| Message::ListFlights { reply_sender })
        .await
        .map(Json)
}

#[derive(Debug, Serialize, Deserialize)]
struct CreditResponse {
    passenger: AccountId,
    amount: Amount,
}

async fn credit(
    State(state): State<ServerState>,
    Path(passenger): Path<String>,
) -> Result<Json<CreditResponse>, StatusCode> {
    let passenger: AccountId = passenger.parse().map_err(|_| StatusCode::BAD_REQUEST)?;
    let amount = query(&state, |reply_sender| Message::GetCredit {
        passenger,
        reply_sender,
    })
    .await?;
    Ok(Json(CreditResponse { passenger, amount }))
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {message}: {cause}")]
    IO { message: String, cause: io::Error },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub addr: SocketAddr,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 0)),
        }
    }
}
