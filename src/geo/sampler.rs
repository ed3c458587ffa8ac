use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use log::{info, warn};
use tokio::time::timeout;

use crate::config::MonitorConfig;
use crate::detection::ParkingState;
use crate::geo::{haversine_m, LocationFix};

/// Host-supplied positioning backend. Calls may block (platform location
/// APIs usually do); the sampler always invokes them through
/// `spawn_blocking` with a bounded timeout.
pub trait LocationProvider: Send + Sync + 'static {
    fn acquire_fix(&self, high_accuracy: bool) -> Result<LocationFix>;
}

/// Sampling cadence, derived purely from the parking state so the throttling
/// policy stays auditable in one place. There is no "off": once parked the
/// sampler drops to keepalive, never to silence, so a missed departure is
/// still observable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplingRate {
    High,
    Keepalive,
}

impl SamplingRate {
    pub fn for_state(state: &ParkingState) -> SamplingRate {
        match state {
            ParkingState::Parked => SamplingRate::Keepalive,
            ParkingState::Unknown | ParkingState::Driving | ParkingState::ParkingPending => {
                SamplingRate::High
            }
        }
    }

    pub fn interval(&self, config: &MonitorConfig) -> Duration {
        match self {
            SamplingRate::High => config.high_sampling_interval,
            SamplingRate::Keepalive => config.keepalive_interval,
        }
    }
}

/// Acquires and throttles location fixes for the monitor.
pub struct GeoSampler {
    provider: Arc<dyn LocationProvider>,
    fix_timeout: Duration,
    fix_retries: u32,
    displacement_radius_m: f64,
    coarse_check_radius_m: f64,
    last_fix: Option<LocationFix>,
}

impl GeoSampler {
    pub fn new(provider: Arc<dyn LocationProvider>, config: &MonitorConfig) -> Self {
        Self {
            provider,
            fix_timeout: config.fix_timeout,
            fix_retries: config.fix_retries,
            displacement_radius_m: config.displacement_radius_m,
            coarse_check_radius_m: config.coarse_check_radius_m,
            last_fix: None,
        }
    }

    /// Bounded acquisition: each attempt runs the blocking provider call on a
    /// worker thread under a timeout, retrying up to the configured count.
    /// On exhaustion the last known fix (if any) is returned so evaluation
    /// can proceed degraded rather than block.
    pub async fn current_fix(&mut self, high_accuracy: bool) -> Option<LocationFix> {
        let attempts = self.fix_retries.saturating_add(1);

        for attempt in 1..=attempts {
            let provider = Arc::clone(&self.provider);
            let fut = tokio::task::spawn_blocking(move || provider.acquire_fix(high_accuracy));

            match timeout(self.fix_timeout, fut).await {
                Ok(Ok(Ok(fix))) => {
                    self.last_fix = Some(fix);
                    return Some(fix);
                }
                Ok(Ok(Err(err))) => {
                    warn!("location fix attempt {attempt}/{attempts} failed: {err:?}");
                }
                Ok(Err(err)) => {
                    warn!("location fix worker join failed: {err}");
                }
                Err(_) => {
                    warn!(
                        "location fix attempt {attempt}/{attempts} timed out (> {:?})",
                        self.fix_timeout
                    );
                }
            }
        }

        match self.last_fix {
            Some(fix) => {
                info!("falling back to last known fix from {}", fix.captured_at);
                Some(fix)
            }
            None => None,
        }
    }

    pub fn last_known(&self) -> Option<LocationFix> {
        self.last_fix
    }

    /// True when a keepalive fix shows the vehicle left the parked anchor.
    /// Fixes coarser than the check radius are ignored; a bad fix must not
    /// fabricate a departure.
    pub fn displaced(&self, anchor: &LocationFix, fix: &LocationFix) -> bool {
        if fix.accuracy_m > self.coarse_check_radius_m {
            return false;
        }
        haversine_m(anchor.lat, anchor.lng, fix.lat, fix.lng) > self.displacement_radius_m
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fix_at(lat: f64, lng: f64, accuracy_m: f64) -> LocationFix {
        LocationFix {
            lat,
            lng,
            accuracy_m,
            captured_at: Utc::now(),
        }
    }

    struct FlakyProvider {
        calls: AtomicU32,
        fail_first: u32,
    }

    impl LocationProvider for FlakyProvider {
        fn acquire_fix(&self, _high_accuracy: bool) -> Result<LocationFix> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                anyhow::bail!("gps not ready");
            }
            Ok(fix_at(41.9446, -87.6563, 12.0))
        }
    }

    struct DeadProvider;

    impl LocationProvider for DeadProvider {
        fn acquire_fix(&self, _high_accuracy: bool) -> Result<LocationFix> {
            anyhow::bail!("no gps hardware")
        }
    }

    fn test_config() -> MonitorConfig {
        MonitorConfig {
            fix_timeout: Duration::from_millis(200),
            fix_retries: 2,
            ..MonitorConfig::default()
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn retries_until_provider_succeeds() {
        let provider = Arc::new(FlakyProvider {
            calls: AtomicU32::new(0),
            fail_first: 2,
        });
        let mut sampler = GeoSampler::new(provider.clone(), &test_config());

        let fix = sampler.current_fix(true).await.unwrap();
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
        assert!((fix.lat - 41.9446).abs() < 1e-9);
        assert_eq!(sampler.last_known(), Some(fix));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn exhausted_retries_fall_back_to_last_known() {
        let good = Arc::new(FlakyProvider {
            calls: AtomicU32::new(0),
            fail_first: 0,
        });
        let mut sampler = GeoSampler::new(good, &test_config());
        let first = sampler.current_fix(true).await.unwrap();

        // Swap in a dead provider; the cached fix survives.
        sampler.provider = Arc::new(DeadProvider);
        let degraded = sampler.current_fix(true).await.unwrap();
        assert_eq!(degraded, first);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn no_fix_and_no_history_returns_none() {
        let mut sampler = GeoSampler::new(Arc::new(DeadProvider), &test_config());
        assert!(sampler.current_fix(true).await.is_none());
    }

    #[test]
    fn displacement_requires_usable_accuracy() {
        let sampler = GeoSampler::new(Arc::new(DeadProvider), &MonitorConfig::default());
        let anchor = fix_at(41.9446, -87.6563, 10.0);

        // ~550 m north of the anchor.
        let moved = fix_at(41.9496, -87.6563, 20.0);
        assert!(sampler.displaced(&anchor, &moved));

        // Same spot: no displacement.
        let near = fix_at(41.9447, -87.6563, 20.0);
        assert!(!sampler.displaced(&anchor, &near));

        // Coarse garbage fix: ignored even though it is far away.
        let coarse = fix_at(41.9996, -87.6563, 900.0);
        assert!(!sampler.displaced(&anchor, &coarse));
    }

    #[test]
    fn sampling_rate_tracks_parking_state() {
        assert_eq!(
            SamplingRate::for_state(&ParkingState::Driving),
            SamplingRate::High
        );
        assert_eq!(
            SamplingRate::for_state(&ParkingState::Parked),
            SamplingRate::Keepalive
        );
        assert_eq!(
            SamplingRate::for_state(&ParkingState::Unknown),
            SamplingRate::High
        );
    }
}
