//! Residential permit zone: point-in-polygon search, then the zone's
//! restriction schedule. The evaluator compares the returned zone id against
//! the user's registered home zone for self-zone suppression.

use chrono::{Datelike, NaiveDateTime, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};

use crate::geo::{point_in_polygon, LocationFix};
use crate::rules::{RuleResult, Severity, Timing};

/// When the permit requirement applies. Absent on zones restricted at all
/// times.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PermitSchedule {
    /// Empty means every day.
    pub weekdays: Vec<Weekday>,
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl PermitSchedule {
    fn applies_today(&self, weekday: Weekday) -> bool {
        self.weekdays.is_empty() || self.weekdays.contains(&weekday)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PermitZoneRecord {
    pub zone_id: String,
    pub name: String,
    pub permit_required: bool,
    /// Zone boundary as (lat, lng) vertices.
    pub polygon: Vec<(f64, f64)>,
    pub schedule: Option<PermitSchedule>,
}

/// Returns the rule result plus the matched zone id (for home-zone
/// suppression upstream).
pub(crate) fn check(
    zones: &[PermitZoneRecord],
    fix: &LocationFix,
    local: NaiveDateTime,
) -> (RuleResult, Option<String>) {
    let containing = zones
        .iter()
        .find(|zone| point_in_polygon(fix.lat, fix.lng, &zone.polygon));

    let Some(zone) = containing else {
        return (RuleResult::clear("Not inside a permit zone"), None);
    };

    let zone_id = Some(zone.zone_id.clone());

    if !zone.permit_required {
        return (
            RuleResult::clear(format!("Zone {} does not require a permit", zone.zone_id)),
            zone_id,
        );
    }

    let result = match &zone.schedule {
        // Restricted around the clock.
        None => RuleResult {
            has_restriction: true,
            timing: Timing::Now,
            message: format!("Permit required in zone {} ({})", zone.zone_id, zone.name),
            severity: Severity::Warning,
        },
        Some(schedule) => {
            let time = local.time();
            if schedule.applies_today(local.date().weekday())
                && time >= schedule.start
                && time < schedule.end
            {
                RuleResult {
                    has_restriction: true,
                    timing: Timing::Now,
                    message: format!(
                        "Permit required in zone {} until {}",
                        zone.zone_id,
                        schedule.end.format("%-I:%M%P")
                    ),
                    severity: Severity::Warning,
                }
            } else if schedule.applies_today(local.date().weekday()) && time < schedule.start {
                RuleResult {
                    has_restriction: true,
                    timing: Timing::Today,
                    message: format!(
                        "Permit required in zone {} from {}",
                        zone.zone_id,
                        schedule.start.format("%-I:%M%P")
                    ),
                    severity: Severity::Info,
                }
            } else {
                RuleResult::clear(format!(
                    "Zone {} permit hours not in effect",
                    zone.zone_id
                ))
            }
        }
    };

    (result, zone_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};

    fn fix() -> LocationFix {
        LocationFix {
            lat: 41.9450,
            lng: -87.6550,
            accuracy_m: 10.0,
            captured_at: Utc::now(),
        }
    }

    fn zone(schedule: Option<PermitSchedule>) -> PermitZoneRecord {
        PermitZoneRecord {
            zone_id: "383".into(),
            name: "Lakeview East".into(),
            permit_required: true,
            polygon: vec![
                (41.9400, -87.6600),
                (41.9400, -87.6500),
                (41.9500, -87.6500),
                (41.9500, -87.6600),
            ],
            schedule,
        }
    }

    fn evening_schedule() -> PermitSchedule {
        PermitSchedule {
            weekdays: vec![],
            start: NaiveTime::from_hms_opt(18, 0, 0).unwrap(),
            end: NaiveTime::from_hms_opt(23, 59, 0).unwrap(),
        }
    }

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 6, 2)
            .unwrap()
            .and_time(NaiveTime::from_hms_opt(h, m, 0).unwrap())
    }

    #[test]
    fn unscheduled_zone_restricts_now() {
        let (result, zone_id) = check(&[zone(None)], &fix(), at(12, 0));
        assert_eq!(result.timing, Timing::Now);
        assert_eq!(result.severity, Severity::Warning);
        assert_eq!(zone_id.as_deref(), Some("383"));
    }

    #[test]
    fn scheduled_zone_inside_hours_is_now() {
        let (result, _) = check(&[zone(Some(evening_schedule()))], &fix(), at(20, 0));
        assert_eq!(result.timing, Timing::Now);
    }

    #[test]
    fn scheduled_zone_before_hours_is_today() {
        let (result, zone_id) = check(&[zone(Some(evening_schedule()))], &fix(), at(12, 0));
        assert_eq!(result.timing, Timing::Today);
        assert_eq!(result.severity, Severity::Info);
        assert!(zone_id.is_some());
    }

    #[test]
    fn outside_any_polygon_is_clear_with_no_zone() {
        let away = LocationFix {
            lat: 41.9600,
            ..fix()
        };
        let (result, zone_id) = check(&[zone(None)], &away, at(12, 0));
        assert!(!result.has_restriction);
        assert!(zone_id.is_none());
    }

    #[test]
    fn permit_not_required_reports_zone_but_no_restriction() {
        let mut open_zone = zone(None);
        open_zone.permit_required = false;
        let (result, zone_id) = check(&[open_zone], &fix(), at(12, 0));
        assert!(!result.has_restriction);
        assert_eq!(zone_id.as_deref(), Some("383"));
    }

    #[test]
    fn weekday_filter_respected() {
        let weekday_only = PermitSchedule {
            weekdays: vec![Weekday::Sat, Weekday::Sun],
            start: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            end: NaiveTime::from_hms_opt(18, 0, 0).unwrap(),
        };
        // 2025-06-02 is a Monday.
        let (result, _) = check(&[zone(Some(weekday_only))], &fix(), at(12, 0));
        assert!(!result.has_restriction);
    }
}
