//! Heading math for position fixes.
//!
//! Diagnostic tools derive a robot's `direction` field from consecutive
//! fixes: the initial great-circle bearing from the previous position to the
//! current one, in degrees with 0 = north and 90 = east.

use serde::{Deserialize, Serialize};

/// A geographic coordinate pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    pub lat: f64,
    pub lng: f64,
}

impl Waypoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

/// Initial great-circle bearing from `from` to `to`.
///
/// Returns degrees normalized to `[0, 360)`, 0 = north.
pub fn initial_bearing(from: Waypoint, to: Waypoint) -> f64 {
    let lat1 = from.lat.to_radians();
    let lat2 = to.lat.to_radians();
    let delta_lng = (to.lng - from.lng).to_radians();

    let y = delta_lng.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * delta_lng.cos();

    let bearing = y.atan2(x).to_degrees();
    (bearing + 360.0) % 360.0
}
