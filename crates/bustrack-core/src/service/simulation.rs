//! Simulated fleet for experimental consumer streams
//!
//! Each configured bus drives around a closed loop of waypoints at a constant
//! speed. Positions are a pure function of the time elapsed since the fleet
//! was created.

use std::time::{Duration, Instant};

use bustrack_common::{Bus, PositionSample, TrackerError, now_millis};
use serde::Deserialize;

use super::cache::PositionSource;
use crate::model::{BusFilter, BusPosition};

const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

fn default_speed_kmh() -> f64 {
    30.0
}

/// Route configuration for one simulated bus
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct SimulatedRoute {
    pub bus_id: i64,
    pub username: String,
    #[serde(default)]
    pub plate_number: String,
    /// `[latitude, longitude]` pairs, walked in order and closed back to the
    /// first point
    pub waypoints: Vec<[f64; 2]>,
    #[serde(default = "default_speed_kmh")]
    pub speed_kmh: f64,
}

struct Leg {
    from: [f64; 2],
    to: [f64; 2],
    length_m: f64,
    heading: f64,
}

struct PreparedRoute {
    bus: Bus,
    legs: Vec<Leg>,
    loop_length_m: f64,
    speed_kmh: f64,
}

impl PreparedRoute {
    fn position_at(&self, elapsed: Duration) -> ([f64; 2], f64) {
        let speed_mps = self.speed_kmh / 3.6;
        let mut remaining = (speed_mps * elapsed.as_secs_f64()) % self.loop_length_m;

        for leg in &self.legs {
            if remaining < leg.length_m {
                let t = remaining / leg.length_m;
                let point = [
                    leg.from[0] + (leg.to[0] - leg.from[0]) * t,
                    leg.from[1] + (leg.to[1] - leg.from[1]) * t,
                ];
                return (point, leg.heading);
            }
            remaining -= leg.length_m;
        }

        // Rounding left us at the very end of the loop
        let first = &self.legs[0];
        (first.from, first.heading)
    }
}

pub struct SimulatedFleet {
    routes: Vec<PreparedRoute>,
    started_at: Instant,
    started_millis: i64,
}

impl SimulatedFleet {
    pub fn new(routes: Vec<SimulatedRoute>) -> anyhow::Result<Self> {
        let routes = routes
            .into_iter()
            .map(prepare_route)
            .collect::<anyhow::Result<Vec<_>>>()?;

        Ok(Self {
            routes,
            started_at: Instant::now(),
            started_millis: now_millis(),
        })
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Positions `elapsed` after the fleet started
    pub fn positions_at(&self, elapsed: Duration, filter: &BusFilter) -> Vec<BusPosition> {
        let timestamp = self.started_millis + elapsed.as_millis() as i64;

        self.routes
            .iter()
            .filter(|route| filter.admits(&route.bus))
            .map(|route| {
                let (point, heading) = route.position_at(elapsed);
                BusPosition {
                    sample: PositionSample {
                        bus_id: route.bus.id,
                        latitude: point[0],
                        longitude: point[1],
                        speed: route.speed_kmh,
                        heading,
                        timestamp,
                    },
                    bus: filter.is_all().then(|| route.bus.clone()),
                }
            })
            .collect()
    }
}

impl PositionSource for SimulatedFleet {
    fn positions(&self, filter: &BusFilter) -> Vec<BusPosition> {
        self.positions_at(self.started_at.elapsed(), filter)
    }
}

fn prepare_route(route: SimulatedRoute) -> anyhow::Result<PreparedRoute> {
    if route.waypoints.len() < 2 {
        return Err(TrackerError::ConfigError(format!(
            "simulated bus {} needs at least two waypoints",
            route.bus_id
        ))
        .into());
    }
    if !(route.speed_kmh.is_finite() && route.speed_kmh > 0.0) {
        return Err(TrackerError::ConfigError(format!(
            "simulated bus {} has invalid speed {}",
            route.bus_id, route.speed_kmh
        ))
        .into());
    }

    let count = route.waypoints.len();
    let legs: Vec<Leg> = (0..count)
        .map(|i| {
            let from = route.waypoints[i];
            let to = route.waypoints[(i + 1) % count];
            Leg {
                from,
                to,
                length_m: haversine_meters(from, to),
                heading: initial_bearing(from, to),
            }
        })
        .filter(|leg| leg.length_m > 0.0)
        .collect();

    let loop_length_m: f64 = legs.iter().map(|leg| leg.length_m).sum();
    if legs.is_empty() || loop_length_m <= 0.0 {
        return Err(TrackerError::ConfigError(format!(
            "simulated bus {} has a zero length route",
            route.bus_id
        ))
        .into());
    }

    Ok(PreparedRoute {
        bus: Bus {
            id: route.bus_id,
            username: route.username,
            plate_number: route.plate_number,
            route: Some("simulated".to_string()),
            active: true,
        },
        legs,
        loop_length_m,
        speed_kmh: route.speed_kmh,
    })
}

/// Great-circle distance between two `[lat, lon]` points in meters
pub fn haversine_meters(from: [f64; 2], to: [f64; 2]) -> f64 {
    let (lat1, lat2) = (from[0].to_radians(), to[0].to_radians());
    let d_lat = lat2 - lat1;
    let d_lon = (to[1] - from[1]).to_radians();

    let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_METERS * a.sqrt().atan2((1.0 - a).sqrt())
}

/// Initial bearing from `from` towards `to`, in degrees within [0, 360)
pub fn initial_bearing(from: [f64; 2], to: [f64; 2]) -> f64 {
    let (lat1, lat2) = (from[0].to_radians(), to[0].to_radians());
    let d_lon = (to[1] - from[1]).to_radians();

    let y = d_lon.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * d_lon.cos();
    (y.atan2(x).to_degrees() + 360.0) % 360.0
}
