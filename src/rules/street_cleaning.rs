//! Street-cleaning rule: nearest-zone search against street-segment
//! polylines, then schedule bucketing against the zone's cleaning calendar.

use chrono::{Datelike, Days, NaiveDateTime, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};

use crate::geo::{distance_to_polyline_m, LocationFix};
use crate::rules::{RuleResult, Severity, Timing};

/// Cleaning calendar for one ward/section: a weekday, which weeks of the
/// month it applies (empty = every week), a daily time window, and the
/// season it runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CleaningSchedule {
    pub weekday: Weekday,
    /// 1-based weeks of the month; empty means every matching weekday.
    pub weeks_of_month: Vec<u8>,
    pub start: NaiveTime,
    pub end: NaiveTime,
    /// Inclusive (month, day) season bounds, e.g. (4, 1) through (11, 30).
    pub season_start: (u32, u32),
    pub season_end: (u32, u32),
}

impl CleaningSchedule {
    fn in_season(&self, month: u32, day: u32) -> bool {
        let after_start =
            month > self.season_start.0 || (month == self.season_start.0 && day >= self.season_start.1);
        let before_end =
            month < self.season_end.0 || (month == self.season_end.0 && day <= self.season_end.1);
        after_start && before_end
    }

    /// Does cleaning happen on this calendar date?
    fn applies_on(&self, date: chrono::NaiveDate) -> bool {
        if !self.in_season(date.month(), date.day()) {
            return false;
        }
        if date.weekday() != self.weekday {
            return false;
        }
        if self.weeks_of_month.is_empty() {
            return true;
        }
        let week = ((date.day() - 1) / 7 + 1) as u8;
        self.weeks_of_month.contains(&week)
    }
}

/// One cleaning zone as materialized by the reference-data store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CleaningZone {
    pub ward: String,
    pub section: String,
    /// Street centerline as (lat, lng) vertices.
    pub geometry: Vec<(f64, f64)>,
    pub schedule: CleaningSchedule,
}

/// Bucket the nearest in-radius zone's next cleaning occurrence.
pub(crate) fn check(
    zones: &[CleaningZone],
    fix: &LocationFix,
    local: NaiveDateTime,
    radius_m: f64,
    upcoming_days: i64,
) -> RuleResult {
    let nearest = zones
        .iter()
        .filter_map(|zone| {
            distance_to_polyline_m(fix.lat, fix.lng, &zone.geometry)
                .filter(|d| *d <= radius_m)
                .map(|d| (d, zone))
        })
        .min_by(|a, b| a.0.total_cmp(&b.0));

    let Some((_, zone)) = nearest else {
        return RuleResult::clear("No street cleaning zone nearby");
    };

    let schedule = &zone.schedule;
    let today = local.date();

    for offset in 0..=upcoming_days.max(0) {
        let Some(date) = today.checked_add_days(Days::new(offset as u64)) else {
            break;
        };
        if !schedule.applies_on(date) {
            continue;
        }

        let label = format!(
            "Ward {}, Section {}: street cleaning {} {}\u{2013}{}",
            zone.ward,
            zone.section,
            date.format("%a %b %-d"),
            schedule.start.format("%-I:%M%P"),
            schedule.end.format("%-I:%M%P"),
        );

        if offset == 0 {
            let time = local.time();
            if time >= schedule.start && time < schedule.end {
                return RuleResult {
                    has_restriction: true,
                    timing: Timing::Now,
                    message: format!("{label} (in progress, move your car)"),
                    severity: Severity::Critical,
                };
            }
            if time < schedule.start {
                return RuleResult {
                    has_restriction: true,
                    timing: Timing::Today,
                    message: label,
                    severity: Severity::Warning,
                };
            }
            // Today's window already passed; keep scanning forward.
            continue;
        }

        return RuleResult {
            has_restriction: true,
            timing: Timing::Upcoming,
            message: label,
            severity: Severity::Info,
        };
    }

    RuleResult::clear(format!(
        "Ward {}, Section {}: no cleaning scheduled soon",
        zone.ward, zone.section
    ))
}
