use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::MonitorConfig;

/// Which of the two independent motion pipelines produced an event.
///
/// Ordering doubles as the conflict-resolution priority: the peripheral link
/// is a direct physical observation of the vehicle, the activity classifier
/// is inferred, so `Connectivity` sorts first.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "camelCase")]
pub enum SignalSource {
    Connectivity,
    MotionClassifier,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum MotionEventKind {
    Connected,
    Disconnected,
    Stationary,
    Walking,
    Automotive,
}

impl MotionEventKind {
    /// True for kinds that claim the vehicle is (or is about to be) moving.
    pub fn is_driving_claim(&self) -> bool {
        matches!(self, MotionEventKind::Connected | MotionEventKind::Automotive)
    }
}

/// Normalized internal event, the only shape the debounce layer sees.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MotionEvent {
    pub source: SignalSource,
    pub kind: MotionEventKind,
    pub observed_at: DateTime<Utc>,
    pub confidence: Option<f32>,
}

/// Platform callback payloads as the host delivers them. The two sources
/// arrive through separate OS mechanisms; no ordering across them is assumed.
#[derive(Debug, Clone, PartialEq)]
pub enum RawSignal {
    PeripheralConnected,
    PeripheralDisconnected,
    Activity {
        kind: MotionEventKind,
        confidence: f32,
    },
}

/// Normalizes raw platform signals into `MotionEvent`s, enforcing the
/// source/kind pairing and dropping low-confidence classifier output.
#[derive(Debug, Clone)]
pub struct SignalAdapter {
    min_motion_confidence: f32,
}

impl SignalAdapter {
    pub fn new(config: &MonitorConfig) -> Self {
        Self {
            min_motion_confidence: config.min_motion_confidence,
        }
    }

    /// Returns `None` for signals that should never reach the debounce layer:
    /// connectivity kinds smuggled through the activity stream, and
    /// classifications below the confidence floor.
    pub fn normalize(&self, raw: RawSignal, observed_at: DateTime<Utc>) -> Option<MotionEvent> {
        match raw {
            RawSignal::PeripheralConnected => Some(MotionEvent {
                source: SignalSource::Connectivity,
                kind: MotionEventKind::Connected,
                observed_at,
                confidence: None,
            }),
            RawSignal::PeripheralDisconnected => Some(MotionEvent {
                source: SignalSource::Connectivity,
                kind: MotionEventKind::Disconnected,
                observed_at,
                confidence: None,
            }),
            RawSignal::Activity { kind, confidence } => {
                if matches!(
                    kind,
                    MotionEventKind::Connected | MotionEventKind::Disconnected
                ) {
                    return None;
                }
                if confidence < self.min_motion_confidence {
                    return None;
                }
                Some(MotionEvent {
                    source: SignalSource::MotionClassifier,
                    kind,
                    observed_at,
                    confidence: Some(confidence),
                })
            }
        }
    }
}
