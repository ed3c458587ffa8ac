use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The four independent restriction regimes. Declaration order is the fixed
/// tie-break priority: street-cleaning fines are the most frequent and least
/// forgiving, so that rule wins severity ties.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "camelCase")]
pub enum RuleKind {
    StreetCleaning,
    SnowBan,
    WinterBan,
    PermitZone,
}

impl RuleKind {
    pub const ALL: [RuleKind; 4] = [
        RuleKind::StreetCleaning,
        RuleKind::SnowBan,
        RuleKind::WinterBan,
        RuleKind::PermitZone,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RuleKind::StreetCleaning => "StreetCleaning",
            RuleKind::SnowBan => "SnowBan",
            RuleKind::WinterBan => "WinterBan",
            RuleKind::PermitZone => "PermitZone",
        }
    }
}

/// Urgency bucket for a restriction. `Unknown` is a first-class outcome for
/// a failed or timed-out check, distinct from "no restriction".
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Timing {
    Now,
    Today,
    Upcoming,
    None,
    Unknown,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "camelCase")]
pub enum Severity {
    None,
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RuleResult {
    pub has_restriction: bool,
    pub timing: Timing,
    pub message: String,
    pub severity: Severity,
}

impl RuleResult {
    pub fn clear(message: impl Into<String>) -> Self {
        Self {
            has_restriction: false,
            timing: Timing::None,
            message: message.into(),
            severity: Severity::None,
        }
    }

    /// The degraded outcome for a failed, timed-out, or location-less check.
    pub fn unknown(message: impl Into<String>) -> Self {
        Self {
            has_restriction: false,
            timing: Timing::Unknown,
            message: message.into(),
            severity: Severity::None,
        }
    }
}

/// One ranked evaluation outcome. Always carries exactly one entry per rule;
/// immutable after creation and superseded, never mutated, by the next
/// evaluation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RestrictionVerdict {
    pub per_rule: BTreeMap<RuleKind, RuleResult>,
    pub overall_severity: Severity,
    /// The rule that set the overall severity, ties broken by `RuleKind`
    /// order. `None` when nothing restricts.
    pub primary_rule: Option<RuleKind>,
    /// True when the permit-zone finding matched the user's home zone and was
    /// demoted to informational.
    pub suppressed_home_zone: bool,
    pub evaluated_at: DateTime<Utc>,
}

impl RestrictionVerdict {
    /// Merge per-rule results into a ranked verdict. A suppressed home-zone
    /// permit result keeps its entry but contributes nothing to the overall
    /// severity.
    pub fn merge(
        per_rule: BTreeMap<RuleKind, RuleResult>,
        suppressed_home_zone: bool,
        evaluated_at: DateTime<Utc>,
    ) -> Self {
        debug_assert_eq!(per_rule.len(), RuleKind::ALL.len());

        let mut overall = Severity::None;
        let mut primary = None;

        for kind in RuleKind::ALL {
            if suppressed_home_zone && kind == RuleKind::PermitZone {
                continue;
            }
            if let Some(result) = per_rule.get(&kind) {
                if result.has_restriction && result.severity > overall {
                    overall = result.severity;
                    primary = Some(kind);
                }
            }
        }

        Self {
            per_rule,
            overall_severity: overall,
            primary_rule: primary,
            suppressed_home_zone,
            evaluated_at,
        }
    }

    pub fn rule(&self, kind: RuleKind) -> Option<&RuleResult> {
        self.per_rule.get(&kind)
    }

    /// Material-difference test used for duplicate-alert suppression: a
    /// re-evaluation only warrants a fresh notification when the headline
    /// changed.
    pub fn differs_materially(&self, other: &RestrictionVerdict) -> bool {
        if self.overall_severity != other.overall_severity {
            return true;
        }
        if self.primary_rule != other.primary_rule {
            return true;
        }
        match (self.primary_rule, other.primary_rule) {
            (Some(kind), Some(_)) => {
                let a = self.rule(kind).map(|r| r.timing);
                let b = other.rule(kind).map(|r| r.timing);
                a != b
            }
            _ => false,
        }
    }
}
