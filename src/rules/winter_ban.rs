//! Winter overnight ban: address-registry membership plus a fixed seasonal
//! date range and a fixed overnight window. Purely temporal once membership
//! is established; no geometry math.

use chrono::{Datelike, NaiveDateTime, NaiveTime};

use crate::rules::{RuleResult, Severity, Timing};

// Dec 1 through Apr 1, 3:00am-7:00am, every night regardless of snowfall.
const SEASON_START: (u32, u32) = (12, 1);
const SEASON_END: (u32, u32) = (4, 1);
const WINDOW_START: (u32, u32) = (3, 0);
const WINDOW_END: (u32, u32) = (7, 0);
const UPCOMING_LEAD_DAYS: i64 = 14;

fn in_season(month: u32, day: u32) -> bool {
    // The season wraps the new year.
    month > SEASON_START.0
        || (month == SEASON_START.0 && day >= SEASON_START.1)
        || month < SEASON_END.0
        || (month == SEASON_END.0 && day <= SEASON_END.1)
}

pub(crate) fn check(is_member: bool, local: NaiveDateTime) -> RuleResult {
    if !is_member {
        return RuleResult::clear("Not on a winter overnight ban street");
    }

    let window_start = NaiveTime::from_hms_opt(WINDOW_START.0, WINDOW_START.1, 0)
        .unwrap_or(NaiveTime::MIN);
    let window_end =
        NaiveTime::from_hms_opt(WINDOW_END.0, WINDOW_END.1, 0).unwrap_or(NaiveTime::MIN);

    let date = local.date();
    if in_season(date.month(), date.day()) {
        let time = local.time();
        if time >= window_start && time < window_end {
            return RuleResult {
                has_restriction: true,
                timing: Timing::Now,
                message: "Winter overnight ban in effect (3am-7am), tow zone".into(),
                severity: Severity::Critical,
            };
        }
        // The ban recurs nightly for the whole season.
        return RuleResult {
            has_restriction: true,
            timing: Timing::Today,
            message: "Winter overnight ban street: no parking 3am-7am tonight".into(),
            severity: Severity::Warning,
        };
    }

    // Approaching Dec 1?
    let season_start = chrono::NaiveDate::from_ymd_opt(date.year(), SEASON_START.0, SEASON_START.1);
    if let Some(start) = season_start {
        let days_until = (start - date).num_days();
        if days_until > 0 && days_until <= UPCOMING_LEAD_DAYS {
            return RuleResult {
                has_restriction: true,
                timing: Timing::Upcoming,
                message: format!(
                    "Winter overnight ban starts Dec 1 ({days_until} days away) on this street"
                ),
                severity: Severity::Info,
            };
        }
    }

    RuleResult::clear("Winter overnight ban not in season")
}
