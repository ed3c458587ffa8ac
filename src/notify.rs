//! Decides whether a verdict is worth surfacing. Severity must cross the
//! actionable threshold and the verdict must differ materially from the last
//! one delivered for the session, so re-evaluations do not spam the owner.

use std::collections::BTreeMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::config::MonitorConfig;
use crate::models::ParkingSession;
use crate::rules::{RestrictionVerdict, RuleKind, RuleResult, Severity};

/// Payload handed to the delivery layer. Channel selection and retry live
/// out there; from here it is fire-and-forget.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NotifyDecision {
    pub notify: bool,
    pub severity: Severity,
    pub message: String,
    pub rule_breakdown: BTreeMap<RuleKind, RuleResult>,
}

#[derive(Debug, Clone)]
pub struct NotificationPolicy {
    threshold: Severity,
}

impl NotificationPolicy {
    pub fn new(config: &MonitorConfig) -> Self {
        Self {
            threshold: config.notify_threshold,
        }
    }

    pub fn decide(
        &self,
        verdict: &RestrictionVerdict,
        previous_delivered: Option<&RestrictionVerdict>,
    ) -> NotifyDecision {
        let actionable = verdict.overall_severity >= self.threshold;
        let fresh = previous_delivered
            .map(|previous| verdict.differs_materially(previous))
            .unwrap_or(true);

        let message = verdict
            .primary_rule
            .and_then(|kind| verdict.rule(kind))
            .map(|result| result.message.clone())
            .unwrap_or_else(|| "No parking restrictions found".to_string());

        NotifyDecision {
            notify: actionable && fresh,
            severity: verdict.overall_severity,
            message,
            rule_breakdown: verdict.per_rule.clone(),
        }
    }

    /// Departure itself is silent; a session-close summary exists only for
    /// callers that explicitly ask for one.
    pub fn session_summary(&self, session: &ParkingSession) -> NotifyDecision {
        let ended = session.ended_at.unwrap_or_else(Utc::now);
        let minutes = (ended - session.started_at).num_minutes().max(0);

        NotifyDecision {
            notify: true,
            severity: Severity::Info,
            message: format!("Parked for {minutes} min, departed without a pending restriction"),
            rule_breakdown: session
                .verdict
                .as_ref()
                .map(|verdict| verdict.per_rule.clone())
                .unwrap_or_default(),
        }
    }
}
