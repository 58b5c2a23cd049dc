//! Domain model shared by every bustrack crate

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Identity record of a tracked bus.
///
/// Buses are created by the registration flow; the tracking core only reads
/// them to validate a producer's target and to annotate snapshots.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bus {
    pub id: i64,
    pub username: String,
    pub plate_number: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route: Option<String>,
    pub active: bool,
}

/// Lookup key for a bus: numeric id or unique username.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum BusKey {
    Id(i64),
    Username(String),
}

impl BusKey {
    /// Returns true if `bus` is the record this key refers to
    pub fn matches(&self, bus: &Bus) -> bool {
        match self {
            BusKey::Id(id) => bus.id == *id,
            BusKey::Username(username) => bus.username == *username,
        }
    }
}

impl fmt::Display for BusKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusKey::Id(id) => write!(f, "{}", id),
            BusKey::Username(username) => write!(f, "{}", username),
        }
    }
}

impl FromStr for BusKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err("bus key is empty".to_string());
        }
        if s.bytes().all(|b| b.is_ascii_digit()) {
            s.parse::<i64>()
                .map(BusKey::Id)
                .map_err(|e| format!("Invalid bus id '{}': {}", s, e))
        } else {
            Ok(BusKey::Username(s.to_string()))
        }
    }
}

/// One timestamped position reading for a bus.
///
/// Samples are append-only: once written to the location store they are
/// never modified. `timestamp` is epoch milliseconds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionSample {
    pub bus_id: i64,
    pub latitude: f64,
    pub longitude: f64,
    pub speed: f64,
    pub heading: f64,
    pub timestamp: i64,
}

/// Current epoch time in milliseconds
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bus() -> Bus {
        Bus {
            id: 7,
            username: "line-7".to_string(),
            plate_number: "B 1234 XY".to_string(),
            route: Some("Terminal A - Campus".to_string()),
            active: true,
        }
    }

    #[test]
    fn test_bus_key_parse() {
        assert_eq!("42".parse::<BusKey>().unwrap(), BusKey::Id(42));
        assert_eq!(
            "line-7".parse::<BusKey>().unwrap(),
            BusKey::Username("line-7".to_string())
        );
        assert_eq!(
            " B1 ".parse::<BusKey>().unwrap(),
            BusKey::Username("B1".to_string())
        );
        assert!("".parse::<BusKey>().is_err());
        assert!("   ".parse::<BusKey>().is_err());
    }

    #[test]
    fn test_bus_key_matches() {
        let bus = bus();
        assert!(BusKey::Id(7).matches(&bus));
        assert!(BusKey::Username("line-7".to_string()).matches(&bus));
        assert!(!BusKey::Id(8).matches(&bus));
    }

    #[test]
    fn test_bus_serialization_is_camel_case() {
        let json = serde_json::to_value(bus()).unwrap();
        assert_eq!(json["plateNumber"], "B 1234 XY");
        assert_eq!(json["active"], true);
    }

    #[test]
    fn test_sample_serialization() {
        let sample = PositionSample {
            bus_id: 7,
            latitude: 1.0,
            longitude: 2.0,
            speed: 10.0,
            heading: 90.0,
            timestamp: 100,
        };
        let json = serde_json::to_value(&sample).unwrap();
        assert_eq!(json["busId"], 7);
        assert_eq!(json["timestamp"], 100);
    }
}
