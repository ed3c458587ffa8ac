//! Hold-timer debouncing for the two signal pipelines.
//!
//! Each source owns one independent countdown. A transition is only released
//! once its hold window elapses uncontested; a contradicting event inside the
//! window cancels the pending transition without emitting anything. The layer
//! is deadline-based rather than sleep-based so the monitor loop can `select!`
//! on `next_deadline()` and tests can drive it with synthetic instants.
//!
//! A stalled sensor stream leaves its timer pending forever. That is
//! intentional: absence of data never forces a state change.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::config::MonitorConfig;
use crate::signal::{MotionEvent, MotionEventKind, SignalSource};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum TransitionDirection {
    /// The vehicle started (or resumed) driving.
    Start,
    /// The vehicle stopped.
    Stop,
}

/// A signal transition that survived its hold window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebouncedTransition {
    pub source: SignalSource,
    pub direction: TransitionDirection,
    pub confirmed_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct DebounceLayer {
    disconnect_hold: std::time::Duration,
    automotive_hold: std::time::Duration,
    /// Pending Stop confirmation for the peripheral link.
    disconnect_deadline: Option<Instant>,
    /// Pending Start confirmation for the activity classifier.
    automotive_deadline: Option<Instant>,
}

impl DebounceLayer {
    pub fn new(config: &MonitorConfig) -> Self {
        Self {
            disconnect_hold: config.disconnect_hold,
            automotive_hold: config.automotive_hold,
            disconnect_deadline: None,
            automotive_deadline: None,
        }
    }

    /// Feed one normalized event through the layer. Returns a transition only
    /// for the kinds that confirm immediately; held kinds arm (or cancel)
    /// their timer and return `None` until [`poll`](Self::poll) releases them.
    pub fn observe(&mut self, event: &MotionEvent, now: Instant) -> Option<DebouncedTransition> {
        match event.kind {
            MotionEventKind::Connected => {
                // Contradicts a pending disconnect; the link coming back up is
                // itself an immediate driving confirmation.
                self.disconnect_deadline = None;
                Some(DebouncedTransition {
                    source: SignalSource::Connectivity,
                    direction: TransitionDirection::Start,
                    confirmed_at: event.observed_at,
                })
            }
            MotionEventKind::Disconnected => {
                // Restartable, not stackable: a repeat disconnect resets the
                // countdown from the newest event.
                self.disconnect_deadline = Some(now + self.disconnect_hold);
                None
            }
            MotionEventKind::Automotive => {
                // Repeat automotive events evidence continuity; the hold keeps
                // counting from the first one.
                if self.automotive_deadline.is_none() {
                    self.automotive_deadline = Some(now + self.automotive_hold);
                }
                None
            }
            MotionEventKind::Stationary | MotionEventKind::Walking => {
                self.automotive_deadline = None;
                Some(DebouncedTransition {
                    source: SignalSource::MotionClassifier,
                    direction: TransitionDirection::Stop,
                    confirmed_at: event.observed_at,
                })
            }
        }
    }

    /// Release transitions whose hold window has elapsed. When both holds
    /// expire in the same poll the connectivity transition is returned first,
    /// so simultaneous contradictory confirmations resolve in source-priority
    /// order.
    pub fn poll(&mut self, now: Instant, wall_now: DateTime<Utc>) -> Vec<DebouncedTransition> {
        let mut released = Vec::new();

        if let Some(deadline) = self.disconnect_deadline {
            if now >= deadline {
                self.disconnect_deadline = None;
                released.push(DebouncedTransition {
                    source: SignalSource::Connectivity,
                    direction: TransitionDirection::Stop,
                    confirmed_at: wall_now,
                });
            }
        }

        if let Some(deadline) = self.automotive_deadline {
            if now >= deadline {
                self.automotive_deadline = None;
                released.push(DebouncedTransition {
                    source: SignalSource::MotionClassifier,
                    direction: TransitionDirection::Start,
                    confirmed_at: wall_now,
                });
            }
        }

        released
    }

    /// Earliest pending hold expiry, if any. The monitor loop sleeps until
    /// this instant.
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.disconnect_deadline, self.automotive_deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (None, None) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn layer() -> DebounceLayer {
        DebounceLayer::new(&MonitorConfig::default())
    }

    fn event(source: SignalSource, kind: MotionEventKind) -> MotionEvent {
        MotionEvent {
            source,
            kind,
            observed_at: Utc::now(),
            confidence: None,
        }
    }

    fn connectivity(kind: MotionEventKind) -> MotionEvent {
        event(SignalSource::Connectivity, kind)
    }

    fn motion(kind: MotionEventKind) -> MotionEvent {
        event(SignalSource::MotionClassifier, kind)
    }

    #[test]
    fn disconnect_held_then_released_after_window() {
        let mut layer = layer();
        let t0 = Instant::now();

        assert!(layer
            .observe(&connectivity(MotionEventKind::Disconnected), t0)
            .is_none());

        // Before the hold elapses nothing is released.
        assert!(layer.poll(t0 + Duration::from_secs(9), Utc::now()).is_empty());

        let released = layer.poll(t0 + Duration::from_secs(11), Utc::now());
        assert_eq!(released.len(), 1);
        assert_eq!(released[0].source, SignalSource::Connectivity);
        assert_eq!(released[0].direction, TransitionDirection::Stop);

        // One-shot: the timer cleared on release.
        assert!(layer.poll(t0 + Duration::from_secs(20), Utc::now()).is_empty());
    }

    #[test]
    fn reconnect_within_hold_cancels_and_confirms_driving() {
        let mut layer = layer();
        let t0 = Instant::now();

        layer.observe(&connectivity(MotionEventKind::Disconnected), t0);
        let confirmed = layer
            .observe(
                &connectivity(MotionEventKind::Connected),
                t0 + Duration::from_secs(4),
            )
            .unwrap();
        assert_eq!(confirmed.direction, TransitionDirection::Start);

        // The pending stop must never surface.
        assert!(layer.poll(t0 + Duration::from_secs(30), Utc::now()).is_empty());
        assert!(layer.next_deadline().is_none());
    }

    #[test]
    fn repeat_disconnect_restarts_rather_than_stacks() {
        let mut layer = layer();
        let t0 = Instant::now();

        layer.observe(&connectivity(MotionEventKind::Disconnected), t0);
        layer.observe(
            &connectivity(MotionEventKind::Disconnected),
            t0 + Duration::from_secs(6),
        );

        // Original deadline (t0 + 10s) passed, restarted one has not.
        assert!(layer.poll(t0 + Duration::from_secs(12), Utc::now()).is_empty());

        let released = layer.poll(t0 + Duration::from_secs(17), Utc::now());
        assert_eq!(released.len(), 1);
    }

    #[test]
    fn automotive_requires_continuous_hold() {
        let mut layer = layer();
        let t0 = Instant::now();

        assert!(layer
            .observe(&motion(MotionEventKind::Automotive), t0)
            .is_none());
        // A repeat event does not restart the countdown.
        layer.observe(
            &motion(MotionEventKind::Automotive),
            t0 + Duration::from_secs(8),
        );

        let released = layer.poll(t0 + Duration::from_secs(10), Utc::now());
        assert_eq!(released.len(), 1);
        assert_eq!(released[0].source, SignalSource::MotionClassifier);
        assert_eq!(released[0].direction, TransitionDirection::Start);
    }

    #[test]
    fn stationary_within_hold_cancels_automotive_claim() {
        let mut layer = layer();
        let t0 = Instant::now();

        layer.observe(&motion(MotionEventKind::Automotive), t0);
        let stop = layer
            .observe(&motion(MotionEventKind::Stationary), t0 + Duration::from_secs(5))
            .unwrap();
        assert_eq!(stop.direction, TransitionDirection::Stop);

        // The driving claim was contested; it never confirms.
        assert!(layer.poll(t0 + Duration::from_secs(60), Utc::now()).is_empty());
    }

    #[test]
    fn stalled_stream_stays_pending_forever() {
        let mut layer = layer();
        let t0 = Instant::now();

        layer.observe(&connectivity(MotionEventKind::Disconnected), t0);
        // No further events, no poll: the deadline simply remains armed.
        assert!(layer.next_deadline().is_some());
        assert!(layer.poll(t0 + Duration::from_secs(5), Utc::now()).is_empty());
        assert!(layer.next_deadline().is_some());
    }

    #[test]
    fn simultaneous_expiry_releases_connectivity_first() {
        let mut layer = layer();
        let t0 = Instant::now();

        layer.observe(&connectivity(MotionEventKind::Disconnected), t0);
        layer.observe(&motion(MotionEventKind::Automotive), t0);

        let released = layer.poll(t0 + Duration::from_secs(10), Utc::now());
        assert_eq!(released.len(), 2);
        assert_eq!(released[0].source, SignalSource::Connectivity);
        assert_eq!(released[1].source, SignalSource::MotionClassifier);
    }

    #[test]
    fn next_deadline_is_the_earliest_pending_hold() {
        let mut layer = layer();
        let t0 = Instant::now();

        layer.observe(&motion(MotionEventKind::Automotive), t0);
        layer.observe(
            &connectivity(MotionEventKind::Disconnected),
            t0 + Duration::from_secs(3),
        );

        // Automotive hold (t0 + 10s) beats disconnect hold (t0 + 13s).
        assert_eq!(layer.next_deadline(), Some(t0 + Duration::from_secs(10)));
    }
}
