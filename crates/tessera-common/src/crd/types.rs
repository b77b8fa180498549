//! Shared status types used by composites and composed resources

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// The "Ready" condition type
pub const CONDITION_READY: &str = "Ready";

/// Reason set on the Ready condition while some composed resources are not ready
pub const REASON_CREATING: &str = "Creating";

/// Reason set on the Ready condition once every composed resource is ready
pub const REASON_AVAILABLE: &str = "Available";

/// Condition status following Kubernetes conventions
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    /// Condition is true
    True,
    /// Condition is false
    False,
    /// Condition status is unknown
    #[default]
    Unknown,
}

impl std::fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::True => write!(f, "True"),
            Self::False => write!(f, "False"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Kubernetes-style condition for status reporting
///
/// Composed resources are written by arbitrary controllers, so everything
/// except the type and status is optional on the way in.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct Condition {
    /// Type of condition (e.g., Ready, Synced)
    #[serde(rename = "type")]
    pub type_: String,

    /// Status of the condition (True, False, Unknown)
    pub status: ConditionStatus,

    /// Machine-readable reason for the condition
    #[serde(default)]
    pub reason: String,

    /// Human-readable message
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,

    /// Last time the condition transitioned
    #[serde(rename = "lastTransitionTime", default = "Utc::now")]
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    /// Create a new condition with the current timestamp
    pub fn new(
        type_: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_: type_.into(),
            status,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: Utc::now(),
        }
    }

    /// Ready=True with reason Available
    pub fn available() -> Self {
        Self::new(CONDITION_READY, ConditionStatus::True, REASON_AVAILABLE, "")
    }

    /// Ready=False with reason Creating
    pub fn creating(message: impl Into<String>) -> Self {
        Self::new(CONDITION_READY, ConditionStatus::False, REASON_CREATING, message)
    }

    /// Whether two conditions say the same thing, ignoring the timestamp
    pub fn equivalent(&self, other: &Condition) -> bool {
        self.type_ == other.type_
            && self.status == other.status
            && self.reason == other.reason
            && self.message == other.message
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_conditions_written_by_other_controllers() {
        let cond: Condition = serde_json::from_value(json!({
            "type": "Ready",
            "status": "True",
        }))
        .unwrap();
        assert_eq!(cond.type_, CONDITION_READY);
        assert_eq!(cond.status, ConditionStatus::True);
        assert!(cond.reason.is_empty());
    }

    #[test]
    fn equivalence_ignores_timestamps() {
        let mut a = Condition::available();
        let b = Condition::available();
        a.last_transition_time = DateTime::<Utc>::MIN_UTC;
        assert!(a.equivalent(&b));
        assert!(!a.equivalent(&Condition::creating("waiting")));
    }

    #[test]
    fn status_display_matches_kubernetes_strings() {
        assert_eq!(ConditionStatus::True.to_string(), "True");
        assert_eq!(ConditionStatus::False.to_string(), "False");
        assert_eq!(ConditionStatus::Unknown.to_string(), "Unknown");
    }
}
