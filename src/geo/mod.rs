mod geometry;
mod sampler;

pub use geometry::{distance_to_polyline_m, haversine_m, point_in_polygon};
pub use sampler::{GeoSampler, LocationProvider, SamplingRate};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single location sample. Ephemeral: not persisted beyond the session
/// snapshot it ends up in.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LocationFix {
    pub lat: f64,
    pub lng: f64,
    pub accuracy_m: f64,
    pub captured_at: DateTime<Utc>,
}
