use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    engine::Error,
    models::{AccountId, FlightKey, FlightStatus},
    serde_helpers,
};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flight {
    pub airline: AccountId,
    /// Empty for the "not found" record.
    pub code: String,
    pub departure: u64,
    pub status: FlightStatus,
    pub registered_by: AccountId,
}

impl Flight {
    pub fn key(&self) -> FlightKey {
        FlightKey::new(self.airline, self.code.clone(), self.departure)
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlightRegistry {
    #[serde(with = "serde_helpers::entries")]
    flights: HashMap<FlightKey, Flight>,
    order: Vec<FlightKey>,
}

impl FlightRegistry {
    /// The caller must have checked that the airline is a member.
    pub fn register(&mut self, key: FlightKey, registered_by: AccountId) -> Result<&Flight, Error> {
        if self.flights.contains_key(&key) {
            return Err(Error::DuplicateFlight(key));
        }
        let flight = Flight {
            airline: key.airline,
            code: key.code.clone(),
            departure: key.departure,
            status: FlightStatus::Unknown,
            registered_by,
        };
        info!("Flight registered: {key}, by:{registered_by}");
        self.order.push(key.clone());
        Ok(self.flights.entry(key).or_insert(flight))
    }

    pub fn get(&self, key: &FlightKey) -> Option<&Flight> {
        self.flights.get(key)
    }

    pub fn contains(&self, key: &FlightKey) -> bool {
        self.flights.contains_key(key)
    }

    /// Flight codes in registration order.
    pub fn flight_numbers(&self) -> Vec<String> {
        self.order.iter().map(|key| key.code.clone()).collect()
    }

    /// Flights in registration order.
    pub fn flights(&self) -> impl Iterator<Item = &Flight> {
        self.order.iter().filter_map(|key| self.flights.get(key))
    }

    pub(crate) fn set_status(&mut self, key: &FlightKey, status: FlightStatus) {
        match self.flights.get_mut(key) {
            Some(flight) => {
                flight.status = status;
                info!("Flight {key} status set to {status}");
            }
            None => warn!("Status {status} resolved for an unregistered flight {key}"),
        }
    }
}
