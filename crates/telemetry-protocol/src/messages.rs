//! Telemetry protocol messages.

use serde::{Deserialize, Serialize};

use crate::heading::Waypoint;

/// Telemetry message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TelemetryMessageType {
    // Liveness
    Ping,
    Pong,

    // Robot -> controller
    Location,
    LocationTrack,
    Status,
    RouteWaypoints,
    IconPin,

    // Controller broadcasts
    RobotLocation,
    RobotStatus,
}

impl TelemetryMessageType {
    /// The wire discriminant, usable as a dispatch key.
    pub fn as_str(&self) -> &'static str {
        match self {
            TelemetryMessageType::Ping => "ping",
            TelemetryMessageType::Pong => "pong",
            TelemetryMessageType::Location => "location",
            TelemetryMessageType::LocationTrack => "location_track",
            TelemetryMessageType::Status => "status",
            TelemetryMessageType::RouteWaypoints => "route_waypoints",
            TelemetryMessageType::IconPin => "icon_pin",
            TelemetryMessageType::RobotLocation => "robot_location",
            TelemetryMessageType::RobotStatus => "robot_status",
        }
    }
}

/// A message sent to/from the controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryMessage {
    #[serde(rename = "type")]
    pub msg_type: TelemetryMessageType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub robot_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl TelemetryMessage {
    /// Create a new message with the current timestamp.
    pub fn new(msg_type: TelemetryMessageType) -> Self {
        Self {
            msg_type,
            action: None,
            robot_id: None,
            data: None,
            timestamp: Some(chrono::Utc::now().to_rfc3339()),
            source: None,
        }
    }

    /// Create a PING message.
    pub fn ping() -> Self {
        Self::new(TelemetryMessageType::Ping)
    }

    /// Create a LOCATION message.
    pub fn location(fix: LocationFix) -> Self {
        Self::new(TelemetryMessageType::Location).with_data(fix.into_value())
    }

    /// Create a LOCATION_TRACK message (live-tracking variant of LOCATION).
    pub fn location_track(fix: LocationFix) -> Self {
        Self::new(TelemetryMessageType::LocationTrack).with_data(fix.into_value())
    }

    /// Create a STATUS message.
    pub fn status(report: StatusReport) -> Self {
        Self::new(TelemetryMessageType::Status).with_data(report.into_value())
    }

    /// Create a ROUTE_WAYPOINTS message.
    pub fn route_waypoints(plan: RoutePlan) -> Self {
        let mut msg = Self::new(TelemetryMessageType::RouteWaypoints).with_data(plan.into_value());
        msg.action = Some("send_route".to_string());
        msg.source = Some("robot".to_string());
        msg
    }

    /// Create an ICON_PIN message.
    pub fn icon_pin(pin: IconPin) -> Self {
        // Pins carry no timestamp on the wire.
        let mut msg = Self::new(TelemetryMessageType::IconPin).with_data(pin.into_value());
        msg.timestamp = None;
        msg
    }

    /// Set the robot ID.
    pub fn with_robot_id(mut self, robot_id: &str) -> Self {
        self.robot_id = Some(robot_id.to_string());
        self
    }

    /// Set the payload.
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Convert to a JSON value, as the link client's `send` expects.
    pub fn to_value(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

/// A position fix: coordinates, optional heading, capture time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationFix {
    pub lat: f64,
    pub lng: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direction: Option<f64>,
    pub timestamp: String,
}

impl LocationFix {
    /// A fix at the given coordinates, stamped now.
    pub fn new(lat: f64, lng: f64) -> Self {
        Self {
            lat,
            lng,
            direction: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Set the heading in degrees (0 = north, 90 = east).
    pub fn with_direction(mut self, direction: f64) -> Self {
        self.direction = Some(direction);
        self
    }

    fn into_value(self) -> serde_json::Value {
        serde_json::to_value(self).expect("location fix serializes")
    }
}

/// A status report: battery, speed, operating mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub battery: u8,
    pub speed: f64,
    pub mode: String,
    pub timestamp: String,
}

impl StatusReport {
    pub fn new(battery: u8, speed: f64, mode: &str) -> Self {
        Self {
            battery,
            speed,
            mode: mode.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    fn into_value(self) -> serde_json::Value {
        serde_json::to_value(self).expect("status report serializes")
    }
}

/// A planned route: ordered waypoints plus display metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutePlan {
    pub waypoints: Vec<Waypoint>,
    pub route_name: String,
    pub route_type: String,
    pub total_stops: u32,
    pub start_location: String,
    pub end_location: String,
}

impl RoutePlan {
    fn into_value(self) -> serde_json::Value {
        serde_json::to_value(self).expect("route plan serializes")
    }
}

/// A map pin with an icon class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IconPin {
    pub lat: f64,
    pub lng: f64,
    #[serde(rename = "type")]
    pub icon_type: String,
}

impl IconPin {
    fn into_value(self) -> serde_json::Value {
        serde_json::to_value(self).expect("icon pin serializes")
    }
}
