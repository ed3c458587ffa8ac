//! Concurrent four-way rule evaluation with per-rule timeouts inside one
//! bounded overall deadline. A slow or failing rule degrades to `Unknown`
//! for that rule only; the verdict always carries all four entries.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};
use log::warn;
use tokio::task::JoinSet;
use tokio::time::{timeout, timeout_at, Instant};

use crate::config::MonitorConfig;
use crate::geo::LocationFix;
use crate::rules::{
    permit_zone, snow_ban, street_cleaning, winter_ban, RestrictionVerdict, RuleKind, RuleResult,
};
use crate::store::{ProfileStore, RestrictionStore};

pub struct RestrictionEvaluator {
    store: Arc<dyn RestrictionStore>,
    profiles: Arc<dyn ProfileStore>,
    config: MonitorConfig,
}

impl RestrictionEvaluator {
    pub fn new(
        store: Arc<dyn RestrictionStore>,
        profiles: Arc<dyn ProfileStore>,
        config: &MonitorConfig,
    ) -> Self {
        Self {
            store,
            profiles,
            config: config.clone(),
        }
    }

    /// Evaluate one location/timestamp pair. Deterministic for fixed inputs
    /// and unchanged reference data; `observed_at` doubles as the verdict's
    /// `evaluated_at` so repeated evaluations compare equal.
    pub async fn evaluate(
        &self,
        location: Option<LocationFix>,
        observed_at: DateTime<Utc>,
    ) -> RestrictionVerdict {
        let Some(fix) = location else {
            // Degraded path: without a fix every location-dependent check is
            // honestly Unknown, never silently omitted.
            let mut per_rule = BTreeMap::new();
            for kind in RuleKind::ALL {
                per_rule.insert(kind, RuleResult::unknown("No location available"));
            }
            return RestrictionVerdict::merge(per_rule, false, observed_at);
        };

        let local = observed_at
            .with_timezone(&self.config.local_offset)
            .naive_local();

        let slots: Arc<Mutex<BTreeMap<RuleKind, RuleResult>>> =
            Arc::new(Mutex::new(BTreeMap::new()));
        let permit_zone_id: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));

        let mut tasks = JoinSet::new();
        self.spawn_street_cleaning(&mut tasks, Arc::clone(&slots), fix, local);
        self.spawn_snow_ban(&mut tasks, Arc::clone(&slots), fix);
        self.spawn_winter_ban(&mut tasks, Arc::clone(&slots), fix, local);
        self.spawn_permit_zone(
            &mut tasks,
            Arc::clone(&slots),
            Arc::clone(&permit_zone_id),
            fix,
            local,
        );

        // Bounded join: whatever has not landed by the deadline stays Unknown.
        let deadline = Instant::now() + self.config.evaluation_deadline;
        loop {
            match timeout_at(deadline, tasks.join_next()).await {
                Ok(Some(Ok(()))) => continue,
                Ok(Some(Err(err))) => {
                    warn!("rule task join failed: {err}");
                    continue;
                }
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        "evaluation deadline ({:?}) expired with rules outstanding",
                        self.config.evaluation_deadline
                    );
                    tasks.abort_all();
                    break;
                }
            }
        }

        let mut completed = match slots.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };

        let mut per_rule = BTreeMap::new();
        for kind in RuleKind::ALL {
            let result = completed
                .remove(&kind)
                .unwrap_or_else(|| RuleResult::unknown("Evaluation deadline exceeded"));
            per_rule.insert(kind, result);
        }

        let matched_zone = match permit_zone_id.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        let suppressed = self.home_zone_suppression(&mut per_rule, matched_zone);

        RestrictionVerdict::merge(per_rule, suppressed, observed_at)
    }

    /// Demote a permit-zone finding that matches the user's registered home
    /// zone to informational; residents parked at home must not get a daily
    /// alert.
    fn home_zone_suppression(
        &self,
        per_rule: &mut BTreeMap<RuleKind, RuleResult>,
        matched_zone: Option<String>,
    ) -> bool {
        let Some(zone_id) = matched_zone else {
            return false;
        };

        let home_zone = match self.profiles.profile() {
            Ok(profile) => profile.home_permit_zone,
            Err(err) => {
                warn!("profile lookup failed, skipping home-zone suppression: {err:?}");
                None
            }
        };

        if home_zone.as_deref() != Some(zone_id.as_str()) {
            return false;
        }

        if let Some(result) = per_rule.get_mut(&RuleKind::PermitZone) {
            if result.has_restriction {
                result.severity = crate::rules::Severity::Info;
                result.message = format!("Parked in your home zone {zone_id}");
                return true;
            }
        }
        false
    }

    fn spawn_street_cleaning(
        &self,
        tasks: &mut JoinSet<()>,
        slots: Arc<Mutex<BTreeMap<RuleKind, RuleResult>>>,
        fix: LocationFix,
        local: NaiveDateTime,
    ) {
        let store = Arc::clone(&self.store);
        let radius = self.config.cleaning_radius_m;
        let upcoming_days = self.config.upcoming_days;
        let rule_timeout = self.config.rule_timeout;

        tasks.spawn(async move {
            let lookup = tokio::task::spawn_blocking(move || {
                store.cleaning_zones_near(fix.lat, fix.lng, radius)
            });
            let result = match bounded(rule_timeout, lookup).await {
                Ok(zones) => street_cleaning::check(&zones, &fix, local, radius, upcoming_days),
                Err(reason) => {
                    warn!("street cleaning check degraded: {reason}");
                    RuleResult::unknown("Street cleaning check unavailable")
                }
            };
            record(&slots, RuleKind::StreetCleaning, result);
        });
    }

    fn spawn_snow_ban(
        &self,
        tasks: &mut JoinSet<()>,
        slots: Arc<Mutex<BTreeMap<RuleKind, RuleResult>>>,
        fix: LocationFix,
    ) {
        let store = Arc::clone(&self.store);
        let radius = self.config.snow_route_radius_m;
        let rule_timeout = self.config.rule_timeout;

        tasks.spawn(async move {
            let lookup = tokio::task::spawn_blocking(move || {
                let routes = store.snow_routes_near(fix.lat, fix.lng, radius)?;
                let active = store.snow_ban_active()?;
                anyhow::Ok((routes, active))
            });
            let result = match bounded(rule_timeout, lookup).await {
                Ok((routes, active)) => snow_ban::check(&routes, &fix, active, radius),
                Err(reason) => {
                    warn!("snow ban check degraded: {reason}");
                    RuleResult::unknown("Snow ban check unavailable")
                }
            };
            record(&slots, RuleKind::SnowBan, result);
        });
    }

    fn spawn_winter_ban(
        &self,
        tasks: &mut JoinSet<()>,
        slots: Arc<Mutex<BTreeMap<RuleKind, RuleResult>>>,
        fix: LocationFix,
        local: NaiveDateTime,
    ) {
        let store = Arc::clone(&self.store);
        let rule_timeout = self.config.rule_timeout;

        tasks.spawn(async move {
            let lookup =
                tokio::task::spawn_blocking(move || store.winter_ban_member(fix.lat, fix.lng));
            let result = match bounded(rule_timeout, lookup).await {
                Ok(is_member) => winter_ban::check(is_member, local),
                Err(reason) => {
                    warn!("winter ban check degraded: {reason}");
                    RuleResult::unknown("Winter ban check unavailable")
                }
            };
            record(&slots, RuleKind::WinterBan, result);
        });
    }

    fn spawn_permit_zone(
        &self,
        tasks: &mut JoinSet<()>,
        slots: Arc<Mutex<BTreeMap<RuleKind, RuleResult>>>,
        permit_zone_id: Arc<Mutex<Option<String>>>,
        fix: LocationFix,
        local: NaiveDateTime,
    ) {
        let store = Arc::clone(&self.store);
        let radius = self.config.permit_radius_m;
        let rule_timeout = self.config.rule_timeout;

        tasks.spawn(async move {
            let lookup = tokio::task::spawn_blocking(move || {
                store.permit_zones_near(fix.lat, fix.lng, radius)
            });
            let result = match bounded(rule_timeout, lookup).await {
                Ok(zones) => {
                    let (result, zone_id) = permit_zone::check(&zones, &fix, local);
                    if let Ok(mut guard) = permit_zone_id.lock() {
                        *guard = zone_id;
                    }
                    result
                }
                Err(reason) => {
                    warn!("permit zone check degraded: {reason}");
                    RuleResult::unknown("Permit zone check unavailable")
                }
            };
            record(&slots, RuleKind::PermitZone, result);
        });
    }
}

/// Flatten timeout + join + lookup errors into one degradation reason.
async fn bounded<T: Send + 'static>(
    limit: Duration,
    lookup: tokio::task::JoinHandle<anyhow::Result<T>>,
) -> Result<T, String> {
    match timeout(limit, lookup).await {
        Ok(Ok(Ok(value))) => Ok(value),
        Ok(Ok(Err(err))) => Err(format!("lookup failed: {err:?}")),
        Ok(Err(err)) => Err(format!("lookup worker join failed: {err}")),
        Err(_) => Err(format!("lookup timed out (> {limit:?})")),
    }
}

fn record(slots: &Mutex<BTreeMap<RuleKind, RuleResult>>, kind: RuleKind, result: RuleResult) {
    match slots.lock() {
        Ok(mut guard) => {
            guard.insert(kind, result);
        }
        Err(poisoned) => {
            poisoned.into_inner().insert(kind, result);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use chrono::TimeZone;
    use std::time::Duration;

    use crate::rules::{
        CleaningSchedule, CleaningZone, PermitZoneRecord, Severity, SnowRoute, Timing,
    };
    use crate::store::{MemoryRestrictionStore, StaticProfileStore, UserProfile};

    fn fix() -> LocationFix {
        LocationFix {
            lat: 41.9400,
            lng: -87.6550,
            accuracy_m: 10.0,
            captured_at: Utc::now(),
        }
    }

    fn cleaning_zone() -> CleaningZone {
        CleaningZone {
            ward: "44".into(),
            section: "2".into(),
            geometry: vec![(41.9400, -87.6600), (41.9400, -87.6500)],
            schedule: CleaningSchedule {
                weekday: chrono::Weekday::Mon,
                weeks_of_month: vec![],
                start: chrono::NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
                end: chrono::NaiveTime::from_hms_opt(11, 0, 0).unwrap(),
                season_start: (4, 1),
                season_end: (11, 30),
            },
        }
    }

    fn permit_zone_record() -> PermitZoneRecord {
        PermitZoneRecord {
            zone_id: "383".into(),
            name: "Lakeview East".into(),
            permit_required: true,
            polygon: vec![
                (41.9350, -87.6600),
                (41.9350, -87.6500),
                (41.9450, -87.6500),
                (41.9450, -87.6600),
            ],
            schedule: None,
        }
    }

    fn profile(home_zone: Option<&str>) -> Arc<StaticProfileStore> {
        Arc::new(StaticProfileStore::new(UserProfile {
            home_permit_zone: home_zone.map(str::to_string),
            notification_channels: vec![],
        }))
    }

    /// Monday 2025-06-02 08:30 Chicago time expressed in UTC (CST = UTC-6).
    fn monday_830_local() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 2, 14, 30, 0).unwrap()
    }

    fn evaluator(
        store: Arc<dyn RestrictionStore>,
        profiles: Arc<StaticProfileStore>,
    ) -> RestrictionEvaluator {
        let config = MonitorConfig {
            rule_timeout: Duration::from_millis(100),
            evaluation_deadline: Duration::from_millis(400),
            ..MonitorConfig::default()
        };
        RestrictionEvaluator::new(store, profiles, &config)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn verdict_always_has_four_defined_entries() {
        let store = Arc::new(MemoryRestrictionStore::new());
        let verdict = evaluator(store, profile(None))
            .evaluate(Some(fix()), monday_830_local())
            .await;

        assert_eq!(verdict.per_rule.len(), 4);
        for kind in RuleKind::ALL {
            assert_ne!(verdict.rule(kind).unwrap().timing, Timing::Unknown);
        }
        assert_eq!(verdict.overall_severity, Severity::None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cleaning_morning_scenario_warns_today() {
        let store = Arc::new(
            MemoryRestrictionStore::new().with_cleaning_zones(vec![cleaning_zone()]),
        );
        let verdict = evaluator(store, profile(None))
            .evaluate(Some(fix()), monday_830_local())
            .await;

        let cleaning = verdict.rule(RuleKind::StreetCleaning).unwrap();
        assert_eq!(cleaning.timing, Timing::Today);
        assert!(verdict.overall_severity >= Severity::Warning);
        assert_eq!(verdict.primary_rule, Some(RuleKind::StreetCleaning));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn home_zone_finding_is_suppressed() {
        let store = Arc::new(
            MemoryRestrictionStore::new().with_permit_zones(vec![permit_zone_record()]),
        );
        let verdict = evaluator(store, profile(Some("383")))
            .evaluate(Some(fix()), monday_830_local())
            .await;

        assert!(verdict.suppressed_home_zone);
        assert_eq!(verdict.overall_severity, Severity::None);
        let permit = verdict.rule(RuleKind::PermitZone).unwrap();
        assert_eq!(permit.severity, Severity::Info);
        assert!(permit.has_restriction);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn foreign_zone_finding_is_not_suppressed() {
        let store = Arc::new(
            MemoryRestrictionStore::new().with_permit_zones(vec![permit_zone_record()]),
        );
        let verdict = evaluator(store, profile(Some("142")))
            .evaluate(Some(fix()), monday_830_local())
            .await;

        assert!(!verdict.suppressed_home_zone);
        assert_eq!(verdict.overall_severity, Severity::Warning);
        assert_eq!(verdict.primary_rule, Some(RuleKind::PermitZone));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn missing_location_degrades_every_rule_to_unknown() {
        let store = Arc::new(MemoryRestrictionStore::new());
        let verdict = evaluator(store, profile(None))
            .evaluate(None, monday_830_local())
            .await;

        assert_eq!(verdict.per_rule.len(), 4);
        for kind in RuleKind::ALL {
            assert_eq!(verdict.rule(kind).unwrap().timing, Timing::Unknown);
        }
    }

    /// Store whose snow and winter lookups hang past the rule timeout.
    struct PartiallySlowStore {
        inner: MemoryRestrictionStore,
        stall: Duration,
    }

    impl RestrictionStore for PartiallySlowStore {
        fn cleaning_zones_near(&self, lat: f64, lng: f64, radius_m: f64) -> Result<Vec<CleaningZone>> {
            self.inner.cleaning_zones_near(lat, lng, radius_m)
        }

        fn winter_ban_member(&self, _lat: f64, _lng: f64) -> Result<bool> {
            std::thread::sleep(self.stall);
            Ok(true)
        }

        fn snow_routes_near(&self, _lat: f64, _lng: f64, _radius_m: f64) -> Result<Vec<SnowRoute>> {
            std::thread::sleep(self.stall);
            Ok(vec![])
        }

        fn snow_ban_active(&self) -> Result<bool> {
            Ok(false)
        }

        fn permit_zones_near(&self, lat: f64, lng: f64, radius_m: f64) -> Result<Vec<PermitZoneRecord>> {
            self.inner.permit_zones_near(lat, lng, radius_m)
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn slow_rules_degrade_in_isolation() {
        let store = Arc::new(PartiallySlowStore {
            inner: MemoryRestrictionStore::new()
                .with_cleaning_zones(vec![cleaning_zone()])
                .with_permit_zones(vec![permit_zone_record()]),
            stall: Duration::from_millis(300),
        });
        let started = std::time::Instant::now();
        let verdict = evaluator(store, profile(None))
            .evaluate(Some(fix()), monday_830_local())
            .await;

        // Bounded: well under stall * rules.
        assert!(started.elapsed() < Duration::from_millis(600));

        assert_eq!(verdict.rule(RuleKind::SnowBan).unwrap().timing, Timing::Unknown);
        assert_eq!(verdict.rule(RuleKind::WinterBan).unwrap().timing, Timing::Unknown);
        // The healthy rules still landed.
        assert_eq!(verdict.rule(RuleKind::StreetCleaning).unwrap().timing, Timing::Today);
        assert_eq!(verdict.rule(RuleKind::PermitZone).unwrap().timing, Timing::Now);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn evaluation_is_idempotent() {
        let store = Arc::new(
            MemoryRestrictionStore::new()
                .with_cleaning_zones(vec![cleaning_zone()])
                .with_permit_zones(vec![permit_zone_record()]),
        );
        let profiles = profile(Some("383"));
        let evaluator = evaluator(store, profiles);

        let first = evaluator.evaluate(Some(fix()), monday_830_local()).await;
        let second = evaluator.evaluate(Some(fix()), monday_830_local()).await;
        assert_eq!(first, second);
    }
}
