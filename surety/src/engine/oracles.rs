use std::collections::{BTreeMap, HashMap};

use rand::{Rng as _, SeedableRng as _, rngs::StdRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    engine::{Error, Rules},
    models::{AccountId, Amount, FlightKey, FlightStatus},
    serde_helpers,
};

pub const INDEXES_PER_ORACLE: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Oracle {
    pub id: AccountId,
    pub indexes: [u8; INDEXES_PER_ORACLE],
    pub fee: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestKey {
    pub index: u8,
    pub flight: FlightKey,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestState {
    Open,
    Resolved(FlightStatus),
    /// Another request resolved the same flight first.
    Superseded,
    Expired,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OracleRequest {
    pub key: RequestKey,
    pub requester: AccountId,
    pub opened_at: u64,
    pub state: RequestState,
    /// Distinct oracles per reported status.
    pub responses: BTreeMap<FlightStatus, Vec<AccountId>>,
    /// Responses that arrived after the request was closed. Kept for audit only.
    pub late_responses: Vec<(AccountId, FlightStatus)>,
}

impl OracleRequest {
    fn new(key: RequestKey, requester: AccountId, opened_at: u64) -> Self {
        Self {
            key,
            requester,
            opened_at,
            state: RequestState::Open,
            responses: BTreeMap::new(),
            late_responses: Vec::new(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.state == RequestState::Open
    }

    fn is_overdue(&self, now: u64, rules: &Rules) -> bool {
        rules
            .request_ttl
            .is_some_and(|ttl| now.saturating_sub(self.opened_at) >= ttl.as_secs())
    }

    fn responded(&self, status: FlightStatus, oracle: &AccountId) -> bool {
        self.responses
            .get(&status)
            .is_some_and(|oracles| oracles.contains(oracle))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseOutcome {
    /// Counted towards quorum. `responses` is the count for the reported status.
    Counted { responses: usize },
    /// This response completed the quorum.
    Resolved(FlightStatus),
    /// The request was already closed. Recorded, no effect.
    AfterResolution,
}

/// A validated response that has not been recorded yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub key: RequestKey,
    pub oracle: AccountId,
    pub status: FlightStatus,
    pub outcome: ResponseOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opened {
    New,
    /// The same (index, flight) request was already open and is kept as is.
    AlreadyOpen,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OracleConsensus {
    oracles: HashMap<AccountId, Oracle>,
    #[serde(with = "serde_helpers::entries")]
    requests: HashMap<RequestKey, OracleRequest>,
    registrations: u64,
    fetches: u64,
}

impl OracleConsensus {
    pub fn register(
        &mut self,
        oracle: AccountId,
        fee: Amount,
        rules: &Rules,
    ) -> Result<[u8; INDEXES_PER_ORACLE], Error> {
        if fee < rules.oracle_registration_fee {
            return Err(Error::InsufficientFee {
                paid: fee,
                required: rules.oracle_registration_fee,
            });
        }
        if self.oracles.contains_key(&oracle) {
            return Err(Error::DuplicateOracle(oracle));
        }

        let indexes = draw_indexes(&oracle, self.registrations, rules.index_space);
        self.registrations += 1;
        self.oracles.insert(
            oracle,
            Oracle {
                id: oracle,
                indexes,
                fee,
            },
        );
        info!("Oracle {oracle} registered with indexes {indexes:?}");
        Ok(indexes)
    }

    pub fn oracle(&self, oracle: &AccountId) -> Option<&Oracle> {
        self.oracles.get(oracle)
    }

    pub fn indexes(&self, oracle: &AccountId) -> Option<[u8; INDEXES_PER_ORACLE]> {
        self.oracles.get(oracle).map(|o| o.indexes)
    }

    pub fn oracle_count(&self) -> usize {
        self.oracles.len()
    }

    pub fn request(&self, key: &RequestKey) -> Option<&OracleRequest> {
        self.requests.get(key)
    }

    pub fn requests(&self) -> impl Iterator<Item = &OracleRequest> {
        self.requests.values()
    }

    /// Opens a status request for `flight` on an index picked for `requester`.
    pub(crate) fn open_request(
        &mut self,
        flight: FlightKey,
        requester: AccountId,
        now: u64,
        rules: &Rules,
    ) -> (RequestKey, Opened) {
        let index = rng_for(&requester, self.fetches).random_range(0..rules.index_space);
        self.fetches += 1;
        let key = RequestKey { index, flight };

        if self.requests.get(&key).is_some_and(OracleRequest::is_open) {
            debug!("Request already open: index:{index}, flight:{}", key.flight);
            return (key, Opened::AlreadyOpen);
        }
        self.requests
            .insert(key.clone(), OracleRequest::new(key.clone(), requester, now));
        info!("Request opened: index:{index}, flight:{}", key.flight);
        (key, Opened::New)
    }

    /// Validates a response without changing any state.
    pub(crate) fn accept_response(
        &self,
        key: RequestKey,
        status: FlightStatus,
        oracle: AccountId,
        now: u64,
        rules: &Rules,
    ) -> Result<Response, Error> {
        let assigned = self
            .indexes(&oracle)
            .is_some_and(|indexes| indexes.contains(&key.index));
        if !assigned {
            return Err(Error::IndexMismatch {
                oracle,
                index: key.index,
            });
        }
        let Some(request) = self.requests.get(&key) else {
            // Answering a live flight on the wrong index is a mismatch.
            if self.requests.keys().any(|k| k.flight == key.flight) {
                return Err(Error::IndexMismatch {
                    oracle,
                    index: key.index,
                });
            }
            return Err(Error::UnknownRequest {
                index: key.index,
                flight: key.flight,
            });
        };

        let outcome = match request.state {
            RequestState::Open if request.is_overdue(now, rules) => {
                return Err(Error::RequestExpired {
                    index: key.index,
                    flight: key.flight,
                });
            }
            RequestState::Expired => {
                return Err(Error::RequestExpired {
                    index: key.index,
                    flight: key.flight,
                });
            }
            RequestState::Open => {
                let current = request.responses.get(&status).map_or(0, Vec::len);
                let responses = if request.responded(status, &oracle) {
                    current
                } else {
                    current + 1
                };
                if responses >= rules.oracle_quorum {
                    ResponseOutcome::Resolved(status)
                } else {
                    ResponseOutcome::Counted { responses }
                }
            }
            RequestState::Resolved(_) | RequestState::Superseded => {
                ResponseOutcome::AfterResolution
            }
        };

        Ok(Response {
            key,
            oracle,
            status,
            outcome,
        })
    }

    /// Records a response returned by [`Self::accept_response`].
    pub(crate) fn record_response(&mut self, response: &Response) {
        let Some(request) = self.requests.get_mut(&response.key) else {
            warn!("Response for a missing request dropped: {response:?}");
            return;
        };
        match response.outcome {
            ResponseOutcome::AfterResolution => {
                request
                    .late_responses
                    .push((response.oracle, response.status));
            }
            ResponseOutcome::Counted { .. } | ResponseOutcome::Resolved(_) => {
                let oracles = request.responses.entry(response.status).or_default();
                if !oracles.contains(&response.oracle) {
                    oracles.push(response.oracle);
                }
                if let ResponseOutcome::Resolved(status) = response.outcome {
                    request.state = RequestState::Resolved(status);
                    info!(
                        "Request resolved: index:{}, flight:{}, status:{status}",
                        response.key.index, response.key.flight
                    );
                }
            }
        }
    }

    /// Closes the other open requests for the flight of `resolved`.
    pub(crate) fn supersede(&mut self, resolved: &RequestKey) -> usize {
        let mut superseded = 0;
        for request in self.requests.values_mut() {
            if request.key.flight == resolved.flight && request.key != *resolved && request.is_open()
            {
                request.state = RequestState::Superseded;
                superseded += 1;
            }
        }
        if superseded > 0 {
            debug!("{superseded} request(s) superseded for {}", resolved.flight);
        }
        superseded
    }

    /// Marks every overdue open request as expired.
    pub(crate) fn expire(&mut self, now: u64, rules: &Rules) -> Vec<RequestKey> {
        let mut expired = Vec::new();
        for request in self.requests.values_mut() {
            if request.is_open() && request.is_overdue(now, rules) {
                request.state = RequestState::Expired;
                expired.push(request.key.clone());
            }
        }
        if !expired.is_empty() {
            info!("{} request(s) expired", expired.len());
        }
        expired
    }

    #[cfg(test)]
    pub(crate) fn insert_oracle(&mut self, oracle: AccountId, indexes: [u8; INDEXES_PER_ORACLE]) {
        self.oracles.insert(
            oracle,
            Oracle {
                id: oracle,
                indexes,
                fee: Amount::ZERO,
            },
        );
    }
}

/// A generator that depends only on the identity and a counter.
fn rng_for(id: &AccountId, counter: u64) -> StdRng {
    let mut seed = [0u8; 32];
    seed[..20].copy_from_slice(id.as_bytes());
    seed[20..28].copy_from_slice(&counter.to_le_bytes());
    StdRng::from_seed(seed)
}

fn draw_indexes(id: &AccountId, counter: u64, index_space: u8) -> [u8; INDEXES_PER_ORACLE] {
    let mut rng = rng_for(id, counter);
    let mut indexes = [0u8; INDEXES_PER_ORACLE];
    let mut drawn = 0;
    while drawn < INDEXES_PER_ORACLE {
        let index = rng.random_range(0..index_space);
        if !indexes[..drawn].contains(&index) {
            indexes[drawn] = index;
            drawn += 1;
        }
    }
    indexes
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn flight() -> FlightKey {
        FlightKey::new(AccountId::derive(1), "ND1309", 1_700_000_000)
    }

    fn oracle(n: u64) -> AccountId {
        AccountId::derive(300 + n)
    }

    /// A consensus with `count` oracles all holding index 7, and a request open on it.
    fn consensus_with_request(count: u64) -> (OracleConsensus, RequestKey) {
        let mut consensus = OracleConsensus::default();
        for n in 0..count {
            consensus.insert_oracle(oracle(n), [2, 7, 9]);
        }
        let key = RequestKey {
            index: 7,
            flight: flight(),
        };
        consensus.requests.insert(
            key.clone(),
            OracleRequest::new(key.clone(), AccountId::derive(1), 0),
        );
        (consensus, key)
    }

    fn submit(
        consensus: &mut OracleConsensus,
        key: &RequestKey,
        n: u64,
        status: FlightStatus,
    ) -> Result<ResponseOutcome, Error> {
        let response =
            consensus.accept_response(key.clone(), status, oracle(n), 0, &Rules::default())?;
        consensus.record_response(&response);
        Ok(response.outcome)
    }

    #[test]
    fn registration_requires_fee_and_is_once() {
        let rules = Rules::default();
        let mut consensus = OracleConsensus::default();
        assert_eq!(
            consensus.register(oracle(0), Amount::ether_fraction(9, 1), &rules),
            Err(Error::InsufficientFee {
                paid: Amount::ether_fraction(9, 1),
                required: Amount::ether(1)
            })
        );
        assert!(consensus.indexes(&oracle(0)).is_none());

        let indexes = consensus
            .register(oracle(0), Amount::ether(1), &rules)
            .unwrap();
        assert_eq!(consensus.indexes(&oracle(0)), Some(indexes));
        assert_eq!(
            consensus.register(oracle(0), Amount::ether(1), &rules),
            Err(Error::DuplicateOracle(oracle(0)))
        );
        assert_eq!(consensus.indexes(&oracle(0)), Some(indexes));
    }

    #[test]
    fn indexes_are_distinct_bounded_and_deterministic() {
        for space in [3u8, 10, 20] {
            for n in 0..50 {
                let indexes = draw_indexes(&oracle(n), n, space);
                assert!(indexes.iter().all(|i| *i < space));
                assert_ne!(indexes[0], indexes[1]);
                assert_ne!(indexes[1], indexes[2]);
                assert_ne!(indexes[0], indexes[2]);
                assert_eq!(indexes, draw_indexes(&oracle(n), n, space));
            }
        }
    }

    #[test]
    fn same_registration_history_gives_same_indexes() {
        let rules = Rules::default();
        let mut a = OracleConsensus::default();
        let mut b = OracleConsensus::default();
        for n in 0..5 {
            assert_eq!(
                a.register(oracle(n), Amount::ether(1), &rules),
                b.register(oracle(n), Amount::ether(1), &rules)
            );
        }
    }

    #[test]
    fn index_mismatch_and_unknown_request() {
        let (mut consensus, key) = consensus_with_request(1);
        consensus.insert_oracle(oracle(9), [2, 7, 19]);

        let wrong = RequestKey {
            index: 19,
            flight: flight(),
        };
        // Index 19 is assigned, but the flight's request is on index 7.
        assert_eq!(
            submit(&mut consensus, &wrong, 9, FlightStatus::OnTime),
            Err(Error::IndexMismatch {
                oracle: oracle(9),
                index: 19
            })
        );
        // No request at all for another flight.
        let other = RequestKey {
            index: 7,
            flight: FlightKey::new(AccountId::derive(1), "ND2000", 0),
        };
        assert_eq!(
            submit(&mut consensus, &other, 9, FlightStatus::OnTime),
            Err(Error::UnknownRequest {
                index: 7,
                flight: other.flight.clone()
            })
        );
        // Index 3 is not assigned at all.
        let unassigned = RequestKey {
            index: 3,
            flight: flight(),
        };
        assert_eq!(
            submit(&mut consensus, &unassigned, 9, FlightStatus::OnTime),
            Err(Error::IndexMismatch {
                oracle: oracle(9),
                index: 3
            })
        );
        // Unregistered oracles have no indexes.
        assert_eq!(
            submit(&mut consensus, &key, 42, FlightStatus::OnTime),
            Err(Error::IndexMismatch {
                oracle: oracle(42),
                index: 7
            })
        );
        assert_eq!(
            submit(&mut consensus, &key, 9, FlightStatus::OnTime),
            Ok(ResponseOutcome::Counted { responses: 1 })
        );
    }

    #[test]
    fn quorum_resolves_once() {
        let (mut consensus, key) = consensus_with_request(6);

        assert_eq!(
            submit(&mut consensus, &key, 0, FlightStatus::LateAirline),
            Ok(ResponseOutcome::Counted { responses: 1 })
        );
        assert_eq!(
            submit(&mut consensus, &key, 1, FlightStatus::OnTime),
            Ok(ResponseOutcome::Counted { responses: 1 })
        );
        // Same oracle twice counts once.
        assert_eq!(
            submit(&mut consensus, &key, 0, FlightStatus::LateAirline),
            Ok(ResponseOutcome::Counted { responses: 1 })
        );
        assert_eq!(
            submit(&mut consensus, &key, 2, FlightStatus::LateAirline),
            Ok(ResponseOutcome::Counted { responses: 2 })
        );
        assert_eq!(
            submit(&mut consensus, &key, 3, FlightStatus::LateAirline),
            Ok(ResponseOutcome::Resolved(FlightStatus::LateAirline))
        );
        assert_eq!(
            consensus.request(&key).unwrap().state,
            RequestState::Resolved(FlightStatus::LateAirline)
        );

        // Later responses never resolve again, even on another status reaching quorum.
        assert_eq!(
            submit(&mut consensus, &key, 4, FlightStatus::OnTime),
            Ok(ResponseOutcome::AfterResolution)
        );
        assert_eq!(
            submit(&mut consensus, &key, 5, FlightStatus::OnTime),
            Ok(ResponseOutcome::AfterResolution)
        );
        let request = consensus.request(&key).unwrap();
        assert_eq!(
            request.state,
            RequestState::Resolved(FlightStatus::LateAirline)
        );
        assert_eq!(request.late_responses.len(), 2);
    }

    #[test]
    fn resolution_is_independent_of_arrival_order() {
        let reports = [
            (0, FlightStatus::OnTime),
            (1, FlightStatus::LateWeather),
            (2, FlightStatus::OnTime),
            (3, FlightStatus::LateWeather),
            (4, FlightStatus::OnTime),
            (5, FlightStatus::LateWeather),
        ];
        // Rotate the arrival order and check that exactly one status resolves.
        for shift in 0..reports.len() {
            let (mut consensus, key) = consensus_with_request(6);
            let mut resolutions = 0;
            for i in 0..reports.len() {
                let (n, status) = reports[(i + shift) % reports.len()];
                if let Ok(ResponseOutcome::Resolved(_)) = submit(&mut consensus, &key, n, status)
                {
                    resolutions += 1;
                }
            }
            assert_eq!(resolutions, 1);
        }
    }

    #[test]
    fn open_request_is_deterministic_and_reused() {
        let rules = Rules::default();
        let requester = AccountId::derive(1);
        let mut a = OracleConsensus::default();
        let mut b = OracleConsensus::default();
        let (key_a, opened) = a.open_request(flight(), requester, 0, &rules);
        assert_eq!(opened, Opened::New);
        let (key_b, _) = b.open_request(flight(), requester, 0, &rules);
        assert_eq!(key_a, key_b);
        assert!(key_a.index < rules.index_space);

        // Keep fetching until the same index comes up again.
        let opened = std::iter::repeat_with(|| a.open_request(flight(), requester, 0, &rules))
            .take(200)
            .find(|(key, _)| *key == key_a)
            .map(|(_, opened)| opened);
        assert_eq!(opened, Some(Opened::AlreadyOpen));
    }

    #[test]
    fn supersede_closes_sibling_requests() {
        let (mut consensus, key) = consensus_with_request(1);
        let sibling = RequestKey {
            index: 2,
            flight: flight(),
        };
        consensus.requests.insert(
            sibling.clone(),
            OracleRequest::new(sibling.clone(), AccountId::derive(1), 0),
        );
        assert_eq!(consensus.supersede(&key), 1);
        assert_eq!(
            consensus.request(&sibling).unwrap().state,
            RequestState::Superseded
        );
        assert!(consensus.request(&key).unwrap().is_open());

        // A response on a superseded request is accepted without effect.
        assert_eq!(
            submit(&mut consensus, &sibling, 0, FlightStatus::OnTime),
            Ok(ResponseOutcome::AfterResolution)
        );
    }

    #[test]
    fn overdue_requests_reject_responses_and_expire() {
        let rules = Rules {
            request_ttl: Some(Duration::from_secs(60)),
            ..Default::default()
        };
        let (mut consensus, key) = consensus_with_request(1);

        consensus
            .accept_response(key.clone(), FlightStatus::OnTime, oracle(0), 59, &rules)
            .unwrap();
        let expired = Err(Error::RequestExpired {
            index: 7,
            flight: flight(),
        });
        assert_eq!(
            consensus.accept_response(key.clone(), FlightStatus::OnTime, oracle(0), 60, &rules),
            expired
        );
        // Rejection leaves the request open until it is expired explicitly.
        assert!(consensus.request(&key).unwrap().is_open());

        assert!(consensus.expire(59, &rules).is_empty());
        assert_eq!(consensus.expire(60, &rules), vec![key.clone()]);
        assert_eq!(
            consensus.request(&key).unwrap().state,
            RequestState::Expired
        );
        assert_eq!(
            consensus.accept_response(key.clone(), FlightStatus::OnTime, oracle(0), 0, &rules),
            expired
        );
    }
}
