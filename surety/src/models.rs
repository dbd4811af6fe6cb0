use std::{
    fmt::{self, Display, Formatter},
    str::FromStr,
};

use rand::{Rng as _, SeedableRng as _, rngs::StdRng};
use serde::{Deserialize, Deserializer, Serialize, Serializer, de::Error as _};

const ACCOUNT_ID_LEN: usize = 20;
const WEI_PER_ETHER: u128 = 1_000_000_000_000_000_000;

/// An opaque participant identity: an airline, passenger, oracle or the owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct AccountId([u8; ACCOUNT_ID_LEN]);

impl AccountId {
    /// The sentinel identity. Never listed as an airline.
    pub const ZERO: Self = Self([0; ACCOUNT_ID_LEN]);

    pub const fn from_bytes(bytes: [u8; ACCOUNT_ID_LEN]) -> Self {
        Self(bytes)
    }

    /// Derives a stable identity from a seed. Used for simulated participants.
    pub fn derive(seed: u64) -> Self {
        let mut bytes = [0u8; ACCOUNT_ID_LEN];
        StdRng::seed_from_u64(seed).fill(&mut bytes);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; ACCOUNT_ID_LEN] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    /// A short form for log lines, the way the relay prints oracles.
    pub fn short(&self) -> String {
        format!("0x{}", hex::encode(&self.0[..3]))
    }
}

impl Display for AccountId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl FromStr for AccountId {
    type Err = AccountIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s)?;
        let bytes: [u8; ACCOUNT_ID_LEN] = bytes
            .try_into()
            .map_err(|bytes: Vec<u8>| AccountIdError::InvalidLength(bytes.len()))?;
        Ok(Self(bytes))
    }
}

impl Serialize for AccountId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for AccountId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(|e| D::Error::custom(format!("{e}")))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AccountIdError {
    #[error("Hex decode error: {0}")]
    HexDecodeError(#[from] hex::FromHexError),
    #[error("Invalid account id length: {0} bytes")]
    InvalidLength(usize),
}

/// An amount of currency in its smallest unit.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Amount(u128);

impl Amount {
    pub const ZERO: Self = Self(0);

    pub const fn from_wei(wei: u128) -> Self {
        Self(wei)
    }

    pub const fn ether(ether: u128) -> Self {
        Self(ether * WEI_PER_ETHER)
    }

    /// `ether / 10^decimals`. e.g. `Amount::ether_fraction(1, 1)` is 0.1 ether.
    pub const fn ether_fraction(units: u128, decimals: u32) -> Self {
        Self(units * WEI_PER_ETHER / 10u128.pow(decimals))
    }

    pub const fn as_wei(&self) -> u128 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, other: Self) -> Option<Self> {
        self.0.checked_add(other.0).map(Self)
    }

    /// Scales the amount by `percent / 100`, rounding down.
    pub fn checked_percent(self, percent: u32) -> Option<Self> {
        self.0
            .checked_mul(u128::from(percent))
            .map(|scaled| Self(scaled / 100))
    }
}

impl Display for Amount {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let whole = self.0 / WEI_PER_ETHER;
        let frac = self.0 % WEI_PER_ETHER;
        if frac == 0 {
            return write!(f, "{whole} ether");
        }
        let frac = format!("{frac:018}");
        write!(f, "{whole}.{} ether", frac.trim_end_matches('0'))
    }
}

/// Parses a decimal ether amount such as `1`, `0.25` or `0.5 ether`.
impl FromStr for Amount {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let trimmed = trimmed.strip_suffix("ether").unwrap_or(trimmed).trim_end();
        let invalid = || AmountError(s.to_string());
        let (whole, frac) = trimmed.split_once('.').unwrap_or((trimmed, ""));
        if (whole.is_empty() && frac.is_empty()) || frac.len() > 18 {
            return Err(invalid());
        }
        let parse = |digits: &str| -> Result<u128, AmountError> {
            if digits.is_empty() {
                return Ok(0);
            }
            if !digits.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid());
            }
            digits.parse().map_err(|_| invalid())
        };
        let frac_wei = parse(frac)? * 10u128.pow(18 - frac.len() as u32);
        parse(whole)?
            .checked_mul(WEI_PER_ETHER)
            .and_then(|wei| wei.checked_add(frac_wei))
            .map(Self)
            .ok_or_else(invalid)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Invalid ether amount: {0}")]
pub struct AmountError(String);

/// The status of a flight as reported by the oracles.
///
/// The discriminants are the wire codes oracles submit.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[repr(u8)]
pub enum FlightStatus {
    #[default]
    Unknown = 0,
    OnTime = 10,
    LateAirline = 20,
    LateWeather = 30,
    LateTechnical = 40,
    LateOther = 50,
}

impl FlightStatus {
    pub const ALL: [Self; 6] = [
        Self::Unknown,
        Self::OnTime,
        Self::LateAirline,
        Self::LateWeather,
        Self::LateTechnical,
        Self::LateOther,
    ];

    pub fn code(&self) -> u8 {
        *self as u8
    }

    /// Whether a flight with this status is settled and cannot be re-queried.
    pub fn is_final(&self) -> bool {
        *self != Self::Unknown
    }
}

impl Display for FlightStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}({})", self.code())
    }
}

impl TryFrom<u8> for FlightStatus {
    type Error = StatusCodeError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Self::ALL
            .into_iter()
            .find(|status| status.code() == code)
            .ok_or(StatusCodeError(code))
    }
}

impl FromStr for FlightStatus {
    type Err = StatusCodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(code) = s.parse::<u8>() {
            return Self::try_from(code);
        }
        Self::ALL
            .into_iter()
            .find(|status| format!("{status:?}").eq_ignore_ascii_case(s))
            .ok_or(StatusCodeError(u8::MAX))
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Unknown flight status code: {0}")]
pub struct StatusCodeError(pub u8);

/// Identifies a flight: (airline, flight code, departure timestamp).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlightKey {
    pub airline: AccountId,
    pub code: String,
    pub departure: u64,
}

impl FlightKey {
    pub fn new(airline: AccountId, code: impl Into<String>, departure: u64) -> Self {
        Self {
            airline,
            code: code.into(),
            departure,
        }
    }
}

impl Display for FlightKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{} ({})", self.code, self.departure, self.airline.short())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_id_hex_roundtrip() {
        let id = AccountId::derive(7);
        let parsed: AccountId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);

        // The 0x prefix is optional.
        let parsed: AccountId = hex::encode(id.as_bytes()).parse().unwrap();
        assert_eq!(parsed, id);

        assert!(matches!(
            "0x1234".parse::<AccountId>(),
            Err(AccountIdError::InvalidLength(2))
        ));
        assert!(matches!(
            "0xzz".parse::<AccountId>(),
            Err(AccountIdError::HexDecodeError(_))
        ));
    }

    #[test]
    fn derived_ids_are_stable_and_distinct() {
        assert_eq!(AccountId::derive(1), AccountId::derive(1));
        assert_ne!(AccountId::derive(1), AccountId::derive(2));
        assert!(!AccountId::derive(1).is_zero());
        assert!(AccountId::ZERO.is_zero());
    }

    #[test]
    fn amount_display_and_percent() {
        assert_eq!(Amount::ether(10).to_string(), "10 ether");
        assert_eq!(Amount::ether_fraction(15, 2).to_string(), "0.15 ether");

        let premium = Amount::ether_fraction(1, 1);
        assert_eq!(
            premium.checked_percent(150),
            Some(Amount::ether_fraction(15, 2))
        );
        assert_eq!(Amount::from_wei(u128::MAX).checked_percent(150), None);
        assert_eq!(Amount::from_wei(u128::MAX).checked_add(Amount::from_wei(1)), None);
    }

    #[test]
    fn amount_parsing() {
        assert_eq!("1".parse::<Amount>().unwrap(), Amount::ether(1));
        assert_eq!("0.25".parse::<Amount>().unwrap(), Amount::ether_fraction(25, 2));
        assert_eq!("0.5 ether".parse::<Amount>().unwrap(), Amount::ether_fraction(5, 1));
        assert_eq!(".1".parse::<Amount>().unwrap(), Amount::ether_fraction(1, 1));
        assert_eq!(
            "0.000000000000000001".parse::<Amount>().unwrap(),
            Amount::from_wei(1)
        );
        assert!("".parse::<Amount>().is_err());
        assert!("-1".parse::<Amount>().is_err());
        assert!("1.2.3".parse::<Amount>().is_err());
        assert!("0.0000000000000000001".parse::<Amount>().is_err());
    }

    #[test]
    fn status_codes() {
        assert_eq!(FlightStatus::try_from(20).unwrap(), FlightStatus::LateAirline);
        assert!(FlightStatus::try_from(21).is_err());
        assert_eq!("30".parse::<FlightStatus>().unwrap(), FlightStatus::LateWeather);
        assert_eq!("onTime".parse::<FlightStatus>().unwrap(), FlightStatus::OnTime);
        assert!(!FlightStatus::Unknown.is_final());
        assert!(FlightStatus::LateOther.is_final());
    }
}
