//! Snow-route ban: spatial route membership gated by an externally supplied
//! "currently active" flag (driven by the 2-inch snowfall threshold). When
//! the flag is off, membership alone restricts nothing.

use serde::{Deserialize, Serialize};

use crate::geo::{distance_to_polyline_m, LocationFix};
use crate::rules::{RuleResult, Severity, Timing};

/// One designated snow route as materialized by the reference-data store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SnowRoute {
    pub name: String,
    /// Route centerline as (lat, lng) vertices.
    pub geometry: Vec<(f64, f64)>,
}

pub(crate) fn check(
    routes: &[SnowRoute],
    fix: &LocationFix,
    ban_active: bool,
    radius_m: f64,
) -> RuleResult {
    let on_route = routes.iter().find(|route| {
        distance_to_polyline_m(fix.lat, fix.lng, &route.geometry)
            .map(|d| d <= radius_m)
            .unwrap_or(false)
    });

    let Some(route) = on_route else {
        return RuleResult::clear("Not on a snow route");
    };

    if !ban_active {
        return RuleResult::clear(format!(
            "On snow route {} but no ban is active",
            route.name
        ));
    }

    RuleResult {
        has_restriction: true,
        timing: Timing::Now,
        message: format!(
            "Snow ban active on {} (2-inch rule), tow zone",
            route.name
        ),
        severity: Severity::Critical,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn fix() -> LocationFix {
        LocationFix {
            lat: 41.9400,
            lng: -87.6550,
            accuracy_m: 10.0,
            captured_at: Utc::now(),
        }
    }

    fn route() -> SnowRoute {
        SnowRoute {
            name: "N Clark St".into(),
            geometry: vec![(41.9400, -87.6600), (41.9400, -87.6500)],
        }
    }

    #[test]
    fn member_with_active_ban_is_critical_now() {
        let result = check(&[route()], &fix(), true, 50.0);
        assert!(result.has_restriction);
        assert_eq!(result.timing, Timing::Now);
        assert_eq!(result.severity, Severity::Critical);
        assert!(result.message.contains("N Clark St"));
    }

    #[test]
    fn member_with_inactive_ban_is_none_regardless() {
        let result = check(&[route()], &fix(), false, 50.0);
        assert!(!result.has_restriction);
        assert_eq!(result.timing, Timing::None);
    }

    #[test]
    fn non_member_is_clear_even_when_active() {
        let far = SnowRoute {
            name: "W Irving Park Rd".into(),
            geometry: vec![(41.9540, -87.6600), (41.9540, -87.6500)],
        };
        let result = check(&[far], &fix(), true, 50.0);
        assert!(!result.has_restriction);
    }
}
