use std::time::Duration;

use chrono::FixedOffset;

use crate::rules::Severity;

/// Tunable thresholds for the parking monitor. Every duration here is a
/// product-tuned constant, not a behavioral invariant, so callers can
/// override individual fields after `Default::default()`.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Hold window before a peripheral disconnect counts as a confirmed stop.
    pub disconnect_hold: Duration,

    /// Minimum continuous "automotive" classification before a driving claim
    /// is honored (filters red-light stops).
    pub automotive_hold: Duration,

    /// Motion-classifier events below this confidence are dropped at the
    /// adapter.
    pub min_motion_confidence: f32,

    /// How long ParkingPending waits for a contradicting driving signal
    /// before committing to Parked.
    pub pending_confirmation: Duration,

    /// Location-fix acquisition bound (per attempt) and retry count.
    pub fix_timeout: Duration,
    pub fix_retries: u32,

    /// Sampling cadence while driving / while parked. The keepalive interval
    /// is the floor: sampling never fully suspends.
    pub high_sampling_interval: Duration,
    pub keepalive_interval: Duration,

    /// A keepalive fix this far from the parked anchor means the vehicle left.
    pub displacement_radius_m: f64,
    /// Accuracy worse than this makes a keepalive fix unusable for the
    /// displacement check.
    pub coarse_check_radius_m: f64,

    /// Spatial search radii for the rule lookups.
    pub cleaning_radius_m: f64,
    pub snow_route_radius_m: f64,
    pub permit_radius_m: f64,

    /// A cleaning window starting within this many days buckets as Upcoming.
    pub upcoming_days: i64,

    /// Per-rule lookup bound and the overall evaluation deadline.
    pub rule_timeout: Duration,
    pub evaluation_deadline: Duration,

    /// Minimum overall severity worth notifying about.
    pub notify_threshold: Severity,

    /// Offset used to evaluate civil schedules (cleaning windows, overnight
    /// bans) against UTC timestamps.
    pub local_offset: FixedOffset,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            disconnect_hold: Duration::from_secs(10),
            automotive_hold: Duration::from_secs(10),
            min_motion_confidence: 0.5,
            pending_confirmation: Duration::from_secs(90),
            fix_timeout: Duration::from_secs(20),
            fix_retries: 2,
            high_sampling_interval: Duration::from_secs(5),
            keepalive_interval: Duration::from_secs(300),
            displacement_radius_m: 150.0,
            coarse_check_radius_m: 500.0,
            cleaning_radius_m: 50.0,
            snow_route_radius_m: 50.0,
            permit_radius_m: 50.0,
            upcoming_days: 3,
            rule_timeout: Duration::from_secs(3),
            evaluation_deadline: Duration::from_secs(8),
            notify_threshold: Severity::Warning,
            // Central Standard Time; the reference data is Chicago's.
            local_offset: FixedOffset::west_opt(6 * 3600).expect("static offset"),
        }
    }
}
