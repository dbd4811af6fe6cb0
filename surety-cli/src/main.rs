use std::{fmt::Debug, net::SocketAddr, path::PathBuf, time::Duration};

use clap::Parser;
use serde::Serialize;
use surety::{
    Error, RelayConfig, RestConfig, ResponseStrategy, Surety,
    engine::Fact,
    engine_message::{
        self, BuyInsuranceMessage, FetchFlightStatusMessage, FundAirlineMessage,
        RegisterFlightMessage,
    },
    models::{AccountId, Amount, FlightKey, FlightStatus},
};
use tokio::{
    signal,
    sync::{broadcast, mpsc, oneshot},
};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    info!("Starting Surety binary...");
    if let Err(e) = run(args).await {
        error!("Error: {e:?}");
    } else {
        info!("Surety has been terminated.");
    }
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let config = args.to_config()?;
    let owner = config.engine.owner;
    let first_airline = config.engine.first_airline;

    let (surety, command_sender) = Surety::new(config)?;
    let (ready_sender, ready_receiver) = oneshot::channel();
    let surety_task = tokio::spawn(async move { surety.run(ready_sender).await });
    ready_receiver
        .await
        .map_err(|_| "Surety stopped before becoming ready")??;

    match args.command {
        Command::Daemonize => {
            handle_status(&command_sender).await;
            daemonize().await;
        }
        Command::Status => {
            handle_status(&command_sender).await;
        }
        Command::Airlines => {
            handle_airlines(&command_sender).await;
        }
        Command::Flights => {
            handle_flights(&command_sender).await;
        }
        Command::Simulate {
            flights,
            passengers,
            premium,
            timeout,
        } => {
            let simulation = Simulation {
                owner,
                airline: first_airline,
                flights,
                passengers,
                premium,
                timeout,
            };
            if let Err(e) = simulation.run(&command_sender).await {
                error!("Simulation failed: {e}");
            }
        }
    }

    // Shutdown Surety.
    command_sender
        .send(surety::Command::Shutdown)
        .await
        .inspect_err(|e| {
            error!("Channel send error: {e}");
        })?;
    info!("Waiting for Surety to terminate...");
    if let Err(e) = surety_task.await {
        error!("Failed to wait until Surety is terminated: {e}");
    }
    Ok(())
}

/// A future that resolves when a termination signal is received.
async fn daemonize() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Termination signal received");
}

/// Sends a command built around a fresh reply channel and waits for the reply.
async fn request<T>(
    command_sender: &mpsc::Sender<surety::Command>,
    command: impl FnOnce(oneshot::Sender<T>) -> surety::Command,
) -> Option<T> {
    let (reply_sender, reply_receiver) = oneshot::channel();
    if let Err(e) = command_sender.send(command(reply_sender)).await {
        error!("Channel send error: {e}");
        return None;
    }
    reply_receiver
        .await
        .inspect_err(|_| error!("Failed to receive reply"))
        .ok()
}

fn print_json(title: &str, value: &impl Serialize) {
    println!("============================");
    println!(" {title}");
    println!("============================");
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{json}"),
        Err(e) => error!("Failed to serialize {title}: {e}"),
    }
}

async fn handle_status(command_sender: &mpsc::Sender<surety::Command>) {
    info!("Handling status command");
    let Some(status) = request(command_sender, |reply_sender| surety::Command::Status {
        reply_sender,
    })
    .await
    else {
        return;
    };
    print_json("Status", &status);

    if let Some(oracles) = request(command_sender, |reply_sender| {
        surety::Command::ListOracles { reply_sender }
    })
    .await
    {
        print_json("Oracles", &oracles);
    }
}

async fn handle_airlines(command_sender: &mpsc::Sender<surety::Command>) {
    info!("Listing airlines");
    if let Some(airlines) = request(command_sender, |reply_sender| {
        surety::Command::Engine(engine_message::Message::ListAirlines { reply_sender })
    })
    .await
    {
        print_json("Airlines", &airlines);
    }
}

async fn handle_flights(command_sender: &mpsc::Sender<surety::Command>) {
    info!("Listing flights");
    if let Some(flights) = request(command_sender, |reply_sender| {
        surety::Command::Engine(engine_message::Message::ListFlights { reply_sender })
    })
    .await
    {
        print_json("Flights", &flights);
    }
}

/// Drives the first airline through a full insurance round against the
/// built-in oracle relay: fund, register flights, sell policies, fetch the
/// status and wait for the oracles to settle every flight.
struct Simulation {
    owner: AccountId,
    airline: AccountId,
    flights: usize,
    passengers: usize,
    premium: Amount,
    timeout: Duration,
}

#[derive(Debug, Serialize)]
struct SettledFlight {
    flight: String,
    status: FlightStatus,
}

#[derive(Debug, Serialize)]
struct PassengerCredit {
    passenger: AccountId,
    credit: Amount,
}

impl Simulation {
    const FIRST_DEPARTURE: u64 = 1_700_000_000;

    async fn run(&self, command_sender: &mpsc::Sender<surety::Command>) -> Result<(), String> {
        info!(
            "Simulating {} flights with {} passengers each (owner: {})",
            self.flights, self.passengers, self.owner
        );
        let mut facts = request(command_sender, |reply_sender| {
            surety::Command::Engine(engine_message::Message::Subscribe { reply_sender })
        })
        .await
        .ok_or("Failed to subscribe to facts")?;

        let rules = request(command_sender, |reply_sender| {
            surety::Command::Engine(engine_message::Message::GetRules { reply_sender })
        })
        .await
        .ok_or("Failed to read the engine rules")?;
        debug!("Engine rules: {rules:?}");

        let became_member = self
            .engine(
                command_sender,
                FundAirlineMessage {
                    airline: self.airline,
                    amount: rules.membership_threshold,
                },
            )
            .await?;
        info!("Airline {} funded, member: {became_member}", self.airline);

        let mut pending = Vec::with_capacity(self.flights);
        for i in 0..self.flights {
            let code = format!("SR{:04}", 100 + i);
            let departure = Self::FIRST_DEPARTURE + (i as u64) * 3600;
            self.engine(
                command_sender,
                RegisterFlightMessage {
                    airline: self.airline,
                    code: code.clone(),
                    departure,
                    caller: self.airline,
                },
            )
            .await?;

            for p in 0..self.passengers {
                self.engine(
                    command_sender,
                    BuyInsuranceMessage {
                        passenger: Self::passenger(p),
                        flight: FlightKey::new(self.airline, code.clone(), departure),
                        premium: self.premium,
                    },
                )
                .await?;
            }
            pending.push(FlightKey::new(self.airline, code, departure));
        }

        for flight in &pending {
            let request_key = self
                .engine(
                    command_sender,
                    FetchFlightStatusMessage {
                        airline: flight.airline,
                        code: flight.code.clone(),
                        departure: flight.departure,
                        caller: Self::passenger(0),
                    },
                )
                .await?;
            info!("Requested status of {flight} on index {}", request_key.index);
        }

        let settled = tokio::time::timeout(self.timeout, Self::wait_for_settlement(&mut facts, pending))
            .await
            .map_err(|_| format!("Flights were not settled within {:?}", self.timeout))??;
        print_json("Settled flights", &settled);

        let mut credits = Vec::with_capacity(self.passengers);
        for p in 0..self.passengers {
            let passenger = Self::passenger(p);
            let credit = request(command_sender, |reply_sender| {
                surety::Command::Engine(engine_message::Message::GetCredit {
                    passenger,
                    reply_sender,
                })
            })
            .await
            .ok_or("Failed to read a passenger credit")?;
            credits.push(PassengerCredit { passenger, credit });
        }
        print_json("Credits", &credits);
        Ok(())
    }

    /// Waits until every pending flight reports a final status.
    async fn wait_for_settlement(
        facts: &mut broadcast::Receiver<Fact>,
        mut pending: Vec<FlightKey>,
    ) -> Result<Vec<SettledFlight>, String> {
        let mut settled = Vec::with_capacity(pending.len());
        while !pending.is_empty() {
            let fact = match facts.recv().await {
                Ok(fact) => fact,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Fact stream lagged, skipped {skipped} facts");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Err("Fact stream closed".to_string());
                }
            };
            let Fact::FlightStatusInfo {
                airline,
                flight_code,
                timestamp,
                status,
                ..
            } = fact
            else {
                continue;
            };
            if !status.is_final() {
                continue;
            }
            let key = FlightKey::new(airline, flight_code, timestamp);
            if let Some(pos) = pending.iter().position(|flight| *flight == key) {
                pending.swap_remove(pos);
                settled.push(SettledFlight {
                    flight: key.to_string(),
                    status,
                });
            }
        }
        Ok(settled)
    }

    async fn engine<M, T>(
        &self,
        command_sender: &mpsc::Sender<surety::Command>,
        msg: M,
    ) -> Result<T, String>
    where
        M: Debug + Into<(
            engine_message::Message,
            oneshot::Receiver<Result<T, surety::EngineError>>,
        )>,
    {
        debug!("Sending {msg:?}");
        let (msg, reply_receiver) = msg.into();
        command_sender
            .send(surety::Command::Engine(msg))
            .await
            .map_err(|e| format!("Channel send error: {e}"))?;
        reply_receiver
            .await
            .map_err(|_| "Failed to receive reply".to_string())?
            .map_err(|e| e.to_string())
    }

    fn passenger(i: usize) -> AccountId {
        AccountId::derive(10_000 + i as u64)
    }
}

#[derive(Debug, Parser)]
struct Args {
    /// A JSON config file. The other options override what it sets.
    #[clap(long)]
    config: Option<PathBuf>,
    #[clap(long, default_value_t = AccountId::derive(0))]
    owner: AccountId,
    #[clap(long, default_value_t = AccountId::derive(1))]
    first_airline: AccountId,
    #[clap(long)]
    snapshot: Option<PathBuf>,
    #[clap(long)]
    rest_addr: Option<SocketAddr>,
    #[clap(long)]
    oracles: Option<usize>,
    #[clap(long)]
    seed: Option<u64>,
    /// Makes every simulated oracle report this status instead of a random one.
    /// `simulate` uses LateAirline unless told otherwise, so its flights settle.
    #[clap(long)]
    oracle_status: Option<FlightStatus>,
    #[clap(long, value_parser = humantime::parse_duration)]
    sweep_interval: Option<Duration>,
    #[clap(long, value_parser = humantime::parse_duration)]
    request_ttl: Option<Duration>,
    #[clap(subcommand)]
    command: Command,
}

impl Args {
    fn to_config(&self) -> Result<surety::Config, Error> {
        let mut config = match &self.config {
            Some(path) => surety::Config::from_json_file(path)?,
            None => surety::Config::new(self.owner, self.first_airline),
        };

        if let Some(path) = &self.snapshot {
            config.snapshot_path = Some(path.clone());
        }
        if let Some(addr) = self.rest_addr {
            config.rest = Some(RestConfig { addr });
        }
        let RelayConfig {
            oracles,
            seed,
            strategy,
        } = &mut config.relay;
        if let Some(count) = self.oracles {
            *oracles = count;
        }
        if let Some(value) = self.seed {
            *seed = value;
        }
        let oracle_status = match self.command {
            Command::Simulate { .. } => self.oracle_status.or(Some(FlightStatus::LateAirline)),
            _ => self.oracle_status,
        };
        if let Some(status) = oracle_status {
            *strategy = ResponseStrategy::Fixed(status);
        }
        if self.sweep_interval.is_some() {
            config.sweep_interval = self.sweep_interval;
        }
        if self.request_ttl.is_some() {
            config.engine.rules.request_ttl = self.request_ttl;
        }
        Ok(config)
    }
}

#[derive(Debug, Parser)]
enum Command {
    Daemonize,
    Status,
    Airlines,
    Flights,
    /// Runs an insurance round for the first airline and prints the payouts.
    Simulate {
        #[clap(long, default_value_t = 3)]
        flights: usize,
        #[clap(long, default_value_t = 2)]
        passengers: usize,
        #[clap(long, default_value = "0.5")]
        premium: Amount,
        #[clap(long, default_value = "10s", value_parser = humantime::parse_duration)]
        timeout: Duration,
    },
}
