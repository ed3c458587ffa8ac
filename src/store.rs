//! Narrow contracts to the external collaborators: the read-only restriction
//! reference store, the read-only user profile store, and the write-only
//! delivery layer. Methods may block (they are typically backed by SQL or
//! HTTP); the evaluator always calls them through `spawn_blocking` under a
//! timeout.

use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::geo::{distance_to_polyline_m, point_in_polygon};
use crate::notify::NotifyDecision;
use crate::rules::{CleaningZone, PermitZoneRecord, SnowRoute};

/// Read-only lookups against the materialized restriction reference tables.
pub trait RestrictionStore: Send + Sync + 'static {
    fn cleaning_zones_near(&self, lat: f64, lng: f64, radius_m: f64) -> Result<Vec<CleaningZone>>;
    fn winter_ban_member(&self, lat: f64, lng: f64) -> Result<bool>;
    fn snow_routes_near(&self, lat: f64, lng: f64, radius_m: f64) -> Result<Vec<SnowRoute>>;
    /// Externally driven by snowfall-threshold weather state.
    fn snow_ban_active(&self) -> Result<bool>;
    fn permit_zones_near(&self, lat: f64, lng: f64, radius_m: f64)
        -> Result<Vec<PermitZoneRecord>>;
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum NotificationChannel {
    Push,
    Sms,
    Email,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    /// Registered home permit zone, used for self-zone suppression.
    pub home_permit_zone: Option<String>,
    /// Consumed by the external delivery layer, carried through untouched.
    pub notification_channels: Vec<NotificationChannel>,
}

pub trait ProfileStore: Send + Sync + 'static {
    fn profile(&self) -> Result<UserProfile>;
}

/// Fire-and-forget hand-off to the delivery layer. Errors are logged by the
/// caller and never propagate into the monitor loop.
pub trait DeliverySink: Send + Sync + 'static {
    fn deliver(&self, decision: &NotifyDecision) -> Result<()>;
}

/// In-memory reference store over pre-materialized tables. Backs the tests
/// and any host that loads its zone data into memory at startup.
#[derive(Default)]
pub struct MemoryRestrictionStore {
    cleaning_zones: Vec<CleaningZone>,
    /// Streets in the winter-ban address registry, as centerlines with a
    /// membership tolerance.
    winter_streets: Vec<Vec<(f64, f64)>>,
    winter_tolerance_m: f64,
    snow_routes: Vec<SnowRoute>,
    snow_ban_active: AtomicBool,
    permit_zones: Vec<PermitZoneRecord>,
}

impl MemoryRestrictionStore {
    pub fn new() -> Self {
        Self {
            winter_tolerance_m: 30.0,
            ..Default::default()
        }
    }

    pub fn with_cleaning_zones(mut self, zones: Vec<CleaningZone>) -> Self {
        self.cleaning_zones = zones;
        self
    }

    pub fn with_winter_streets(mut self, streets: Vec<Vec<(f64, f64)>>) -> Self {
        self.winter_streets = streets;
        self
    }

    pub fn with_snow_routes(mut self, routes: Vec<SnowRoute>) -> Self {
        self.snow_routes = routes;
        self
    }

    pub fn with_permit_zones(mut self, zones: Vec<PermitZoneRecord>) -> Self {
        self.permit_zones = zones;
        self
    }

    pub fn set_snow_ban_active(&self, active: bool) {
        self.snow_ban_active.store(active, Ordering::SeqCst);
    }
}

impl RestrictionStore for MemoryRestrictionStore {
    fn cleaning_zones_near(&self, lat: f64, lng: f64, radius_m: f64) -> Result<Vec<CleaningZone>> {
        Ok(self
            .cleaning_zones
            .iter()
            .filter(|zone| {
                distance_to_polyline_m(lat, lng, &zone.geometry)
                    .map(|d| d <= radius_m)
                    .unwrap_or(false)
            })
            .cloned()
            .collect())
    }

    fn winter_ban_member(&self, lat: f64, lng: f64) -> Result<bool> {
        Ok(self.winter_streets.iter().any(|street| {
            distance_to_polyline_m(lat, lng, street)
                .map(|d| d <= self.winter_tolerance_m)
                .unwrap_or(false)
        }))
    }

    fn snow_routes_near(&self, lat: f64, lng: f64, radius_m: f64) -> Result<Vec<SnowRoute>> {
        Ok(self
            .snow_routes
            .iter()
            .filter(|route| {
                distance_to_polyline_m(lat, lng, &route.geometry)
                    .map(|d| d <= radius_m)
                    .unwrap_or(false)
            })
            .cloned()
            .collect())
    }

    fn snow_ban_active(&self) -> Result<bool> {
        Ok(self.snow_ban_active.load(Ordering::SeqCst))
    }

    fn permit_zones_near(
        &self,
        lat: f64,
        lng: f64,
        _radius_m: f64,
    ) -> Result<Vec<PermitZoneRecord>> {
        // Containment is the useful filter for polygons; the radius exists
        // for stores that pre-filter by bounding box.
        Ok(self
            .permit_zones
            .iter()
            .filter(|zone| point_in_polygon(lat, lng, &zone.polygon))
            .cloned()
            .collect())
    }
}

/// Profile store with a fixed profile, for tests and single-user hosts.
#[derive(Debug, Clone)]
pub struct StaticProfileStore {
    profile: UserProfile,
}

impl StaticProfileStore {
    pub fn new(profile: UserProfile) -> Self {
        Self { profile }
    }
}

impl ProfileStore for StaticProfileStore {
    fn profile(&self) -> Result<UserProfile> {
        Ok(self.profile.clone())
    }
}

/// Delivery sink that only logs; the default until a host wires a real
/// channel layer in.
#[derive(Debug, Clone, Default)]
pub struct LogDeliverySink;

impl DeliverySink for LogDeliverySink {
    fn deliver(&self, decision: &NotifyDecision) -> Result<()> {
        log::info!(
            "delivering alert (severity {:?}): {}",
            decision.severity,
            decision.message
        );
        Ok(())
    }
}
