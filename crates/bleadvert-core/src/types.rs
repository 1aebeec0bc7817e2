//! Shared domain types and OpenAPI schemas.
//!
//! Every document type decodes with explicit defaults for missing fields, so a
//! partially written document from the store never fails to load.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Default eligibility radius of a beacon, in meters.
pub const DEFAULT_MAX_ADVERTISEMENT_DISTANCE: f64 = 1.25;

/// Separator between address and url in a [`BeaconIdentity`].
const IDENTITY_SEPARATOR: &str = "//";

/// Planar position of a beacon inside the venue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct Position {
    /// Horizontal coordinate.
    pub x: f64,
    /// Vertical coordinate.
    pub y: f64,
}

/// A physical BLE beacon placed by an administrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(default)]
#[schema(example = json!({
    "id": "b-entrance",
    "address": "AA:BB:CC:DD:EE:01",
    "url": "https://example.com/entrance",
    "position": { "x": 0.0, "y": 0.0 },
    "max_advertisement_distance": 1.25
}))]
pub struct Beacon {
    /// Document id.
    pub id: String,

    /// Stable hardware address (`XX:XX:XX:XX:XX:XX`).
    pub address: String,

    /// Content advertised by the beacon.
    pub url: String,

    /// Position in the venue.
    pub position: Position,

    /// Eligibility radius in meters.
    pub max_advertisement_distance: f64,
}

impl Default for Beacon {
    fn default() -> Self {
        Self {
            id: String::new(),
            address: String::new(),
            url: String::new(),
            position: Position::default(),
            max_advertisement_distance: DEFAULT_MAX_ADVERTISEMENT_DISTANCE,
        }
    }
}

impl Beacon {
    /// Identity used by the idempotency set.
    #[must_use]
    pub fn identity(&self) -> BeaconIdentity {
        BeaconIdentity::new(&self.address, &self.url)
    }
}

/// `address + "//" + url`, the key credited at most once per user and event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
pub struct BeaconIdentity(String);

impl BeaconIdentity {
    /// Builds the identity from a beacon address and url.
    #[must_use]
    pub fn new(address: &str, url: &str) -> Self {
        Self(format!("{address}{IDENTITY_SEPARATOR}{url}"))
    }

    /// The raw identity string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The address half of the identity.
    #[must_use]
    pub fn address(&self) -> &str {
        self.0
            .split_once(IDENTITY_SEPARATOR)
            .map_or(self.0.as_str(), |(address, _)| address)
    }
}

impl fmt::Display for BeaconIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A reward unlocked once a user reaches `required_scans` in an event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(default)]
#[schema(example = json!({
    "title": "Free coffee",
    "description": "Show this at the bar",
    "image": "",
    "required_scans": 3
}))]
pub struct Reward {
    /// Short title.
    pub title: String,

    /// Longer description shown to the user.
    pub description: String,

    /// Image reference (opaque to the core).
    pub image: String,

    /// Scans needed before the reward unlocks.
    pub required_scans: u32,
}

/// A time-boxed campaign with an ordered reward ladder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct Event {
    /// Document id.
    pub id: String,

    /// Human readable title. Also the analytics partition key.
    pub title: String,

    /// Description shown to users.
    pub description: String,

    /// Start of the event window (inclusive).
    pub start: DateTime<Utc>,

    /// End of the event window (exclusive).
    pub end: DateTime<Utc>,

    /// Rewards in declared order.
    pub rewards: Vec<Reward>,
}

impl Default for Event {
    fn default() -> Self {
        Self {
            id: String::new(),
            title: String::new(),
            description: String::new(),
            start: DateTime::<Utc>::default(),
            end: DateTime::<Utc>::default(),
            rewards: Vec::new(),
        }
    }
}

impl Event {
    /// Whether `now` lies inside `[start, end)`.
    #[must_use]
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.start <= now && now < self.end
    }

    /// Whether the event window closed before `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.end
    }
}

/// A registered user.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct User {
    /// Account id. Used as the analytics key.
    pub id: String,

    /// Display name.
    pub name: String,

    /// Whether the user may administer beacons and events.
    pub is_admin: bool,
}

/// Per-user global counters, mirrored across every event the user scanned in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct UserInfo {
    /// Total qualifying scans across events.
    pub scans: u64,

    /// Every reward the user holds, in unlock order, without duplicates.
    pub rewards: Vec<Reward>,
}

/// Progress of one user inside one event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct UserEventProgress {
    /// Number of distinct beacons credited.
    pub scans: u32,

    /// Rewards unlocked in this event, in unlock order.
    pub unlocked_rewards: Vec<Reward>,

    /// Idempotency set of credited beacon identities.
    pub scanned_beacon_addresses: Vec<BeaconIdentity>,
}

impl UserEventProgress {
    /// A document with no scans, rewards or identities counts as absent.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.scans == 0 && self.unlocked_rewards.is_empty() && self.scanned_beacon_addresses.is_empty()
    }

    /// Whether `identity` has already been credited.
    #[must_use]
    pub fn has_scanned(&self, identity: &BeaconIdentity) -> bool {
        self.scanned_beacon_addresses.contains(identity)
    }
}

/// One RSSI reading from the radio layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "address": "AA:BB:CC:DD:EE:01",
    "rssi": -62,
    "timestamp": "2025-01-15T03:30:00Z"
}))]
pub struct BeaconSample {
    /// Hardware address of the advertiser.
    pub address: String,

    /// Signal strength in dBm.
    pub rssi: i16,

    /// When the reading was taken.
    pub timestamp: DateTime<Utc>,

    /// Raw Eddystone service data, if the advertisement carried any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_data: Option<Vec<u8>>,
}

impl BeaconSample {
    /// A sample stamped with the current time and no service data.
    #[must_use]
    pub fn now(address: impl Into<String>, rssi: i16) -> Self {
        Self {
            address: address.into(),
            rssi,
            timestamp: Utc::now(),
            service_data: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_beacon_identity_format() {
        let beacon = Beacon {
            address: "AA:BB:CC:DD:EE:FF".into(),
            url: "https://shop.example".into(),
            ..Beacon::default()
        };
        let identity = beacon.identity();
        assert_eq!(identity.as_str(), "AA:BB:CC:DD:EE:FF//https://shop.example");
        assert_eq!(identity.address(), "AA:BB:CC:DD:EE:FF");
    }

    #[test]
    fn test_missing_fields_decode_to_defaults() {
        let beacon: Beacon = serde_json::from_str(r#"{"address": "AA:BB:CC:DD:EE:FF"}"#).unwrap();
        assert!((beacon.max_advertisement_distance - DEFAULT_MAX_ADVERTISEMENT_DISTANCE).abs() < f64::EPSILON);
        assert!(beacon.url.is_empty());

        let progress: UserEventProgress = serde_json::from_str("{}").unwrap();
        assert!(progress.is_empty());

        let reward: Reward = serde_json::from_str(r#"{"title": "Sticker"}"#).unwrap();
        assert_eq!(reward.required_scans, 0);
    }

    #[test]
    fn test_event_window_is_half_open() {
        let event = Event {
            start: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2025, 1, 2, 0, 0, 0).unwrap(),
            ..Event::default()
        };
        assert!(event.is_active_at(event.start));
        assert!(!event.is_active_at(event.end));
        assert!(event.is_expired_at(event.end));
    }

    #[test]
    fn test_identity_serializes_as_plain_string() {
        let progress = UserEventProgress {
            scans: 1,
            unlocked_rewards: Vec::new(),
            scanned_beacon_addresses: vec![BeaconIdentity::new("A", "u")],
        };
        let json = serde_json::to_string(&progress).unwrap();
        assert!(json.contains("\"A//u\""));
    }
}
