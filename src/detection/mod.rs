mod monitor;

pub use monitor::{MonitorDeps, MonitorHandle, ParkingMonitor};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::signal::{DebouncedTransition, TransitionDirection};

/// The single source of truth for whether the vehicle is driving or parked.
/// Owned exclusively by the monitor actor; every other component observes
/// transitions through the watch channel and never re-derives state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ParkingState {
    Unknown,
    Driving,
    ParkingPending,
    Parked,
}

/// A committed state transition, emitted as a fact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateChange {
    pub from: ParkingState,
    pub to: ParkingState,
    pub at: DateTime<Utc>,
}

/// Pure transition table over debounced signal confirmations. Both signal
/// pipelines feed this one machine; there is deliberately no per-source
/// state to reconcile, so either source alone is enough to drive it.
#[derive(Debug, Clone)]
pub struct ParkingStateMachine {
    state: ParkingState,
}

impl ParkingStateMachine {
    pub fn new() -> Self {
        Self {
            state: ParkingState::Unknown,
        }
    }

    pub fn state(&self) -> ParkingState {
        self.state
    }

    /// Apply one confirmed transition. Returns the state change, if any.
    pub fn apply(&mut self, transition: &DebouncedTransition) -> Option<StateChange> {
        let to = match (self.state, transition.direction) {
            // First confirmed driving signal from either source.
            (ParkingState::Unknown, TransitionDirection::Start) => ParkingState::Driving,
            // A confirmed stop opens the corroboration window.
            (ParkingState::Driving, TransitionDirection::Stop) => ParkingState::ParkingPending,
            // Contradicting driving evidence aborts the pending park.
            (ParkingState::ParkingPending, TransitionDirection::Start) => ParkingState::Driving,
            // Departure; the latency-critical transition.
            (ParkingState::Parked, TransitionDirection::Start) => ParkingState::Driving,
            // A stop while Unknown carries no information about whether the
            // car was ever driven; a second stop while pending corroborates
            // but changes nothing.
            _ => return None,
        };

        self.commit(to, transition.confirmed_at)
    }

    /// The confirmation window elapsed uncontested.
    pub fn confirm_parked(&mut self, at: DateTime<Utc>) -> Option<StateChange> {
        match self.state {
            ParkingState::ParkingPending => self.commit(ParkingState::Parked, at),
            _ => None,
        }
    }

    /// A keepalive fix showed the vehicle beyond the displacement radius.
    /// Position-verified, so it bypasses the signal holds.
    pub fn displacement_exit(&mut self, at: DateTime<Utc>) -> Option<StateChange> {
        match self.state {
            ParkingState::Parked => self.commit(ParkingState::Driving, at),
            _ => None,
        }
    }

    fn commit(&mut self, to: ParkingState, at: DateTime<Utc>) -> Option<StateChange> {
        let from = self.state;
        if from == to {
            return None;
        }
        self.state = to;
        Some(StateChange { from, to, at })
    }
}

impl Default for ParkingStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
