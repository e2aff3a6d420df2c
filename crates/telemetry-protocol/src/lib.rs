//! Typed telemetry messages exchanged over a controller link.
//!
//! The link client treats payloads opaquely; this crate is for the
//! collaborators on either side of it. It provides:
//! - Wire message shapes (ping, location, status, routes, pins, broadcasts)
//! - Heading math for deriving a robot's direction from consecutive fixes

mod heading;
mod messages;

pub use heading::{initial_bearing, Waypoint};
pub use messages::{
    IconPin, LocationFix, RoutePlan, StatusReport, TelemetryMessage, TelemetryMessageType,
};
