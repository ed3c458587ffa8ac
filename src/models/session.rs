use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::geo::LocationFix;
use crate::rules::RestrictionVerdict;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum SessionStatus {
    /// Vehicle is parked and the session is open.
    Active,
    /// Closed normally with a departure timestamp.
    Departed,
    /// Left open by a previous process; closed at startup recovery.
    Interrupted,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "Active",
            SessionStatus::Departed => "Departed",
            SessionStatus::Interrupted => "Interrupted",
        }
    }
}

/// One parked-car episode: opened on the Parked transition, closed on the
/// Driving transition. The verdict snapshot is attached once evaluation
/// completes and is never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParkingSession {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub status: SessionStatus,
    pub location: Option<LocationFix>,
    pub verdict: Option<RestrictionVerdict>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ParkingSession {
    pub fn open(id: String, started_at: DateTime<Utc>, location: Option<LocationFix>) -> Self {
        Self {
            id,
            started_at,
            ended_at: None,
            status: SessionStatus::Active,
            location,
            verdict: None,
            created_at: started_at,
            updated_at: started_at,
        }
    }
}
