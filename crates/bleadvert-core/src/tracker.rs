//! Closest eligible beacon selection.
//!
//! Each poll the tracker ranks beacons by smoothed distance, ignoring those
//! farther than their own advertisement radius, and remembers the winner. A
//! [`Transition`] is emitted only when the winner changes, which is what starts
//! and cancels dwell timing. Winners are compared by hardware address: a URL
//! learned mid-session refreshes the selection without restarting the dwell.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::sampler::SignalSampler;
use crate::types::{Beacon, BeaconIdentity};

/// Result of one poll: the closest eligible beacon, or none.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ClosestBeacon {
    /// The selected beacon; `None` when no beacon is eligible.
    pub beacon: Option<Beacon>,

    /// Smoothed distance in meters; infinite when `beacon` is `None`.
    #[schema(value_type = Option<f64>)]
    #[serde(with = "finite_or_null")]
    pub distance: f64,
}

impl ClosestBeacon {
    /// The sentinel "no beacon in range" value.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            beacon: None,
            distance: f64::INFINITY,
        }
    }

    /// Whether this is the sentinel.
    #[must_use]
    pub const fn is_none(&self) -> bool {
        self.beacon.is_none()
    }

    /// Identity of the selected beacon.
    #[must_use]
    pub fn identity(&self) -> Option<BeaconIdentity> {
        self.beacon.as_ref().map(Beacon::identity)
    }

    /// Hardware address of the selected beacon.
    #[must_use]
    pub fn address(&self) -> Option<&str> {
        self.beacon.as_ref().map(|b| b.address.as_str())
    }
}

impl Default for ClosestBeacon {
    fn default() -> Self {
        Self::none()
    }
}

/// JSON has no infinity; the sentinel distance travels as `null`.
mod finite_or_null {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_finite() {
            serializer.serialize_some(value)
        } else {
            serializer.serialize_none()
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::INFINITY))
    }
}

/// Change of the closest beacon between two polls.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    /// Selection before this poll.
    pub previous: ClosestBeacon,
    /// Selection after this poll.
    pub current: ClosestBeacon,
}

/// Picks the closest eligible beacon every poll and reports identity changes.
#[derive(Debug, Default)]
pub struct ProximityTracker {
    current: ClosestBeacon,
}

impl ProximityTracker {
    /// Create a tracker with nothing selected.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run one poll over `beacons`.
    ///
    /// Returns a [`Transition`] only when the selected beacon differs from
    /// the previous poll; distance or URL changes alone update
    /// [`Self::current`] silently.
    pub fn tick(&mut self, beacons: &[Beacon], sampler: &SignalSampler) -> Option<Transition> {
        let next = select_closest(beacons, sampler);
        if next.address() == self.current.address() {
            self.current = next;
            return None;
        }
        let previous = std::mem::replace(&mut self.current, next.clone());
        tracing::debug!(
            from = ?previous.identity().map(|i| i.to_string()),
            to = ?next.identity().map(|i| i.to_string()),
            distance = next.distance,
            "Closest beacon changed"
        );
        Some(Transition {
            previous,
            current: next,
        })
    }

    /// Latest selection.
    #[must_use]
    pub const fn current(&self) -> &ClosestBeacon {
        &self.current
    }

    /// Forget the current selection without emitting a transition.
    pub fn reset(&mut self) {
        self.current = ClosestBeacon::none();
    }
}

/// Closest beacon within its own advertisement radius. On exact ties the
/// beacon listed first wins, so the choice is stable between polls.
#[must_use]
pub fn select_closest(beacons: &[Beacon], sampler: &SignalSampler) -> ClosestBeacon {
    let mut best: Option<(&Beacon, f64)> = None;
    for beacon in beacons {
        let distance = sampler.estimated_distance(&beacon.address);
        if distance > beacon.max_advertisement_distance {
            continue;
        }
        if best.map_or(true, |(_, best_distance)| distance < best_distance) {
            best = Some((beacon, distance));
        }
    }
    best.map_or_else(ClosestBeacon::none, |(beacon, distance)| ClosestBeacon {
        beacon: Some(beacon.clone()),
        distance,
    })
}
