//! Session handshakes and the wire messages exchanged over a session

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use bustrack_common::{
    Bus, BusKey, ErrorCode, PositionSample, ROLE_CLIENT, ROLE_DRIVER, now_millis,
};
use serde::{Deserialize, Serialize};

use crate::error::{HubError, SampleError};

pub const DEFAULT_CONSUMER_CADENCE_MS: u64 = 1000;
pub const DEFAULT_PRODUCER_IDLE_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_OUTBOUND_BUFFER: usize = 16;
pub const DEFAULT_MIRROR_QUEUE_CAPACITY: usize = 1024;
pub const DEFAULT_BUS_REFRESH_SECS: u64 = 10;

const UNKNOWN_PEER: &str = "unknown";

/// Connection role negotiated at handshake time
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Producer,
    Consumer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Producer => "producer",
            Role::Consumer => "consumer",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Role {
    type Err = HubError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            ROLE_DRIVER | "producer" => Ok(Role::Producer),
            ROLE_CLIENT | "consumer" => Ok(Role::Consumer),
            other => Err(HubError::InvalidHandshake(format!(
                "unknown connection type '{}'",
                other
            ))),
        }
    }
}

/// Which buses a consumer wants to see
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BusFilter {
    All,
    Single(BusKey),
}

impl BusFilter {
    pub fn is_all(&self) -> bool {
        matches!(self, BusFilter::All)
    }

    /// Whether `bus` passes this filter. `All` only passes active buses.
    pub fn admits(&self, bus: &Bus) -> bool {
        match self {
            BusFilter::All => bus.active,
            BusFilter::Single(key) => key.matches(bus),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProducerHandshake {
    pub credential: String,
    pub bus: BusKey,
    pub peer: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConsumerHandshake {
    pub filter: BusFilter,
    pub experimental: bool,
    pub experimental_id: Option<BusKey>,
    pub peer: String,
}

impl ConsumerHandshake {
    pub fn new(filter: BusFilter) -> Self {
        Self {
            filter,
            experimental: false,
            experimental_id: None,
            peer: UNKNOWN_PEER.to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Handshake {
    Producer(ProducerHandshake),
    Consumer(ConsumerHandshake),
}

/// Raw handshake parameters as they arrive on the stream endpoint query
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionQuery {
    #[serde(rename = "type")]
    pub role: Option<String>,
    pub token: Option<String>,
    pub bus_id: Option<String>,
    pub experimental: Option<String>,
    pub experimental_id: Option<String>,
}

impl SessionQuery {
    /// Resolve the query into a typed handshake.
    ///
    /// `type` defaults to the client role and `experimental` falls back to
    /// `experimental_default` when absent.
    pub fn into_handshake(
        self,
        peer: Option<String>,
        experimental_default: bool,
    ) -> Result<Handshake, HubError> {
        let peer = peer.unwrap_or_else(|| UNKNOWN_PEER.to_string());
        let role = match self.role.as_deref() {
            Some(role) if !role.trim().is_empty() => role.parse::<Role>()?,
            _ => Role::Consumer,
        };

        match role {
            Role::Producer => {
                let bus = self
                    .bus_id
                    .as_deref()
                    .ok_or_else(|| {
                        HubError::InvalidHandshake("busId is required for drivers".to_string())
                    })?
                    .parse::<BusKey>()
                    .map_err(HubError::InvalidHandshake)?;

                Ok(Handshake::Producer(ProducerHandshake {
                    credential: self.token.unwrap_or_default(),
                    bus,
                    peer,
                }))
            }
            Role::Consumer => {
                let filter = match non_empty(self.bus_id.as_deref()) {
                    Some(key) => {
                        BusFilter::Single(key.parse().map_err(HubError::InvalidHandshake)?)
                    }
                    None => BusFilter::All,
                };
                let experimental = match non_empty(self.experimental.as_deref()) {
                    Some(flag) => parse_flag(flag)?,
                    None => experimental_default,
                };
                let experimental_id = non_empty(self.experimental_id.as_deref())
                    .map(|key| key.parse::<BusKey>().map_err(HubError::InvalidHandshake))
                    .transpose()?;

                Ok(Handshake::Consumer(ConsumerHandshake {
                    filter,
                    experimental,
                    experimental_id,
                    peer,
                }))
            }
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn parse_flag(value: &str) -> Result<bool, HubError> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => Err(HubError::InvalidHandshake(format!(
            "invalid experimental flag '{}'",
            other
        ))),
    }
}

/// Position update sent by a producer as one JSON text frame
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct LocationUpdate {
    #[serde(alias = "lat")]
    pub latitude: f64,
    #[serde(alias = "lon", alias = "lng")]
    pub longitude: f64,
    pub speed: f64,
    pub heading: f64,
    #[serde(default)]
    pub timestamp: Option<i64>,
}

impl LocationUpdate {
    /// Decode and validate one inbound frame
    pub fn parse(text: &str) -> Result<Self, SampleError> {
        let update: LocationUpdate =
            serde_json::from_str(text).map_err(|e| SampleError::Malformed(e.to_string()))?;
        update.validate()?;
        Ok(update)
    }

    pub fn validate(&self) -> Result<(), SampleError> {
        check_range("latitude", self.latitude, -90.0, 90.0)?;
        check_range("longitude", self.longitude, -180.0, 180.0)?;
        check_range("speed", self.speed, 0.0, f64::MAX)?;
        check_range("heading", self.heading, 0.0, 360.0)?;
        Ok(())
    }

    /// Bind the update to its bus, stamping it with the server clock when the
    /// producer did not send a timestamp
    pub fn into_sample(self, bus_id: i64) -> PositionSample {
        PositionSample {
            bus_id,
            latitude: self.latitude,
            longitude: self.longitude,
            speed: self.speed,
            heading: self.heading,
            timestamp: self.timestamp.unwrap_or_else(now_millis),
        }
    }
}

fn check_range(field: &'static str, value: f64, min: f64, max: f64) -> Result<(), SampleError> {
    if value.is_finite() && value >= min && value <= max {
        Ok(())
    } else {
        Err(SampleError::OutOfRange { field, value })
    }
}

/// One entry of a consumer snapshot
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusPosition {
    #[serde(flatten)]
    pub sample: PositionSample,
    /// Bus metadata, only attached to "all buses" snapshots
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bus: Option<Bus>,
}

/// Message the hub pushes to a session's peer
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    #[serde(rename_all = "camelCase")]
    Ack {
        bus_id: i64,
        timestamp: i64,
        sequence: u64,
    },
    SampleRejected {
        reason: String,
    },
    #[serde(rename_all = "camelCase")]
    Snapshot {
        buses: Vec<BusPosition>,
        generated_at: i64,
    },
    Error {
        code: i32,
        message: String,
    },
}

impl ServerMessage {
    pub fn error(code: &ErrorCode<'_>, message: impl Into<String>) -> Self {
        ServerMessage::Error {
            code: code.code,
            message: message.into(),
        }
    }

    pub fn from_hub_error(err: &HubError) -> Self {
        Self::error(&err.error_code(), err.to_string())
    }
}

/// How a session that ran to completion ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionEnd {
    /// Inbound stream finished
    PeerClosed,
    /// The outbound side was dropped by the transport
    OutboundClosed,
    /// Producer sent nothing within the idle timeout
    IdleTimeout,
    /// The hub is shutting down
    Shutdown,
}

#[derive(Clone, Debug)]
pub struct HubConfig {
    pub consumer_cadence: Duration,
    pub producer_idle_timeout: Duration,
    /// Capacity of each session's outbound channel
    pub outbound_buffer: usize,
    pub mirror_queue_capacity: usize,
    /// How often cached bus metadata is reloaded from the location store
    pub bus_refresh_interval: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            consumer_cadence: Duration::from_millis(DEFAULT_CONSUMER_CADENCE_MS),
            producer_idle_timeout: Duration::from_secs(DEFAULT_PRODUCER_IDLE_TIMEOUT_SECS),
            outbound_buffer: DEFAULT_OUTBOUND_BUFFER,
            mirror_queue_capacity: DEFAULT_MIRROR_QUEUE_CAPACITY,
            bus_refresh_interval: Duration::from_secs(DEFAULT_BUS_REFRESH_SECS),
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn query(pairs: &[(&str, &str)]) -> SessionQuery {
        let mut query = SessionQuery::default();
        for (key, value) in pairs {
            let value = Some(value.to_string());
            match *key {
                "type" => query.role = value,
                "token" => query.token = value,
                "busId" => query.bus_id = value,
                "experimental" => query.experimental = value,
                "experimentalId" => query.experimental_id = value,
                _ => unreachable!(),
            }
        }
        query
    }

    #[test]
    fn test_role_parse() {
        assert_eq!("driver".parse::<Role>().unwrap(), Role::Producer);
        assert_eq!("Client".parse::<Role>().unwrap(), Role::Consumer);
        assert!("admin".parse::<Role>().is_err());
    }

    #[test]
    fn test_default_role_is_client() {
        let handshake = query(&[]).into_handshake(None, false).unwrap();
        assert_eq!(handshake, Handshake::Consumer(ConsumerHandshake::new(BusFilter::All)));
    }

    #[test]
    fn test_driver_handshake() {
        let handshake = query(&[("type", "driver"), ("token", "t0k"), ("busId", "12")])
            .into_handshake(Some("10.0.0.1:4000".to_string()), false)
            .unwrap();

        match handshake {
            Handshake::Producer(p) => {
                assert_eq!(p.credential, "t0k");
                assert_eq!(p.bus, BusKey::Id(12));
                assert_eq!(p.peer, "10.0.0.1:4000");
            }
            other => panic!("expected producer handshake, got {:?}", other),
        }
    }

    #[test]
    fn test_driver_requires_bus() {
        let err = query(&[("type", "driver"), ("token", "t0k")])
            .into_handshake(None, false)
            .unwrap_err();
        assert!(matches!(err, HubError::InvalidHandshake(_)));
    }

    #[test]
    fn test_consumer_filter_and_experimental() {
        let handshake = query(&[("busId", "B1"), ("experimentalId", "7")])
            .into_handshake(None, true)
            .unwrap();

        match handshake {
            Handshake::Consumer(c) => {
                assert_eq!(c.filter, BusFilter::Single(BusKey::Username("B1".to_string())));
                assert!(c.experimental);
                assert_eq!(c.experimental_id, Some(BusKey::Id(7)));
            }
            other => panic!("expected consumer handshake, got {:?}", other),
        }

        let handshake = query(&[("experimental", "false")])
            .into_handshake(None, true)
            .unwrap();
        assert!(matches!(handshake, Handshake::Consumer(c) if !c.experimental));

        assert!(query(&[("experimental", "maybe")]).into_handshake(None, false).is_err());
    }

    #[test]
    fn test_location_update_aliases() {
        let update =
            LocationUpdate::parse(r#"{"lat":1.0,"lng":2.0,"speed":10,"heading":90}"#).unwrap();
        assert_eq!(update.latitude, 1.0);
        assert_eq!(update.longitude, 2.0);
        assert!(update.timestamp.is_none());

        let sample = update.into_sample(3);
        assert_eq!(sample.bus_id, 3);
        assert!(sample.timestamp > 0);
    }

    #[test]
    fn test_location_update_keeps_producer_timestamp() {
        let sample = LocationUpdate::parse(
            r#"{"latitude":1.1,"longitude":2.1,"speed":12,"heading":95,"timestamp":101}"#,
        )
        .unwrap()
        .into_sample(1);
        assert_eq!(sample.timestamp, 101);
    }

    #[test]
    fn test_location_update_malformed() {
        assert!(matches!(
            LocationUpdate::parse("not json"),
            Err(SampleError::Malformed(_))
        ));
        assert!(matches!(
            LocationUpdate::parse(r#"{"latitude":1.0}"#),
            Err(SampleError::Malformed(_))
        ));
        assert_eq!(
            LocationUpdate::parse(r#"{"latitude":91,"longitude":0,"speed":0,"heading":0}"#),
            Err(SampleError::OutOfRange {
                field: "latitude",
                value: 91.0
            })
        );
    }

    #[test]
    fn test_server_message_wire_format() {
        let ack = serde_json::to_value(ServerMessage::Ack {
            bus_id: 1,
            timestamp: 100,
            sequence: 1,
        })
        .unwrap();
        assert_eq!(ack["type"], "ack");
        assert_eq!(ack["busId"], 1);

        let snapshot = serde_json::to_value(ServerMessage::Snapshot {
            buses: vec![BusPosition {
                sample: PositionSample {
                    bus_id: 1,
                    latitude: 1.0,
                    longitude: 2.0,
                    speed: 10.0,
                    heading: 90.0,
                    timestamp: 100,
                },
                bus: None,
            }],
            generated_at: 5,
        })
        .unwrap();
        assert_eq!(snapshot["type"], "snapshot");
        assert_eq!(snapshot["generatedAt"], 5);
        assert_eq!(snapshot["buses"][0]["busId"], 1);
        assert!(snapshot["buses"][0].get("bus").is_none());

        let rejected = serde_json::to_value(ServerMessage::SampleRejected {
            reason: "bad".to_string(),
        })
        .unwrap();
        assert_eq!(rejected["type"], "sampleRejected");
    }

    proptest! {
        #[test]
        fn prop_in_range_updates_are_valid(
            latitude in -90.0f64..=90.0,
            longitude in -180.0f64..=180.0,
            speed in 0.0f64..300.0,
            heading in 0.0f64..=360.0,
        ) {
            let update = LocationUpdate { latitude, longitude, speed, heading, timestamp: None };
            prop_assert!(update.validate().is_ok());
        }

        #[test]
        fn prop_out_of_range_latitude_is_rejected(
            latitude in prop_oneof![-1000.0f64..-90.001, 90.001f64..1000.0],
        ) {
            let update = LocationUpdate {
                latitude,
                longitude: 0.0,
                speed: 0.0,
                heading: 0.0,
                timestamp: None,
            };
            let rejected = matches!(
                update.validate(),
                Err(SampleError::OutOfRange { field: "latitude", .. })
            );
            prop_assert!(rejected);
        }

        #[test]
        fn prop_negative_speed_is_rejected(speed in -500.0f64..-0.001) {
            let update = LocationUpdate {
                latitude: 0.0,
                longitude: 0.0,
                speed,
                heading: 0.0,
                timestamp: None,
            };
            prop_assert!(update.validate().is_err());
        }
    }
}
