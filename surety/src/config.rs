use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

#[cfg(feature = "rest")]
use crate::actors::rest;
use crate::{Error, actors::relay, engine, models::AccountId};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub engine: engine::Config,
    /// JSON snapshot file. State is kept in memory only when unset.
    #[serde(default)]
    pub snapshot_path: Option<PathBuf>,
    #[serde(default)]
    pub relay: relay::Config,
    /// How often overdue oracle requests are expired.
    #[serde(default, with = "humantime_serde")]
    pub sweep_interval: Option<Duration>,
    #[cfg(feature = "rest")]
    #[serde(default)]
    pub rest: Option<rest::Config>,
}

impl Config {
    pub fn new(owner: AccountId, first_airline: AccountId) -> Self {
        Self {
            engine: engine::Config::new(owner, first_airline),
            snapshot_path: None,
            relay: relay::Config::default(),
            sweep_interval: None,
            #[cfg(feature = "rest")]
            rest: None,
        }
    }

    pub fn from_json_file(path: &std::path::Path) -> Result<Self, Error> {
        let data = std::fs::read(path).map_err(|cause| Error::IO {
            message: format!("Failed to read config file at {path:?}"),
            cause,
        })?;
        serde_json::from_slice(&data).map_err(|e| Error::InvalidConfig(e.to_string()))
    }
}
