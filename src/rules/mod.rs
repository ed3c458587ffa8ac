mod evaluator;
mod permit_zone;
mod snow_ban;
mod street_cleaning;
mod types;
mod winter_ban;

pub use evaluator::RestrictionEvaluator;
pub use permit_zone::{PermitSchedule, PermitZoneRecord};
pub use snow_ban::SnowRoute;
pub use street_cleaning::{CleaningSchedule, CleaningZone};
pub use types::{RestrictionVerdict, RuleKind, RuleResult, Severity, Timing};
