//! Readiness of composed resources

use serde_json::Value;

#[cfg(test)]
use mockall::automock;

use tessera_common::crd::{ReadinessCheck, ReadinessCheckType};
use tessera_common::fieldpath;
use tessera_common::resource::DynamicObjectExt;
use tessera_common::Composed;

use crate::{ComposeError, Result};

/// Decides whether a composed resource is ready
#[cfg_attr(test, automock)]
pub trait ReadinessChecker: Send + Sync {
    /// Evaluate `checks` against `composed`.
    ///
    /// A missing field makes a check fail, not error.
    fn check_readiness(&self, composed: &Composed, checks: &[ReadinessCheck]) -> Result<bool>;
}

/// Evaluates the readiness checks configured on a template.
///
/// With no checks configured, a resource is ready when its `Ready` condition
/// is `True`. Otherwise every check must pass.
#[derive(Clone, Copy, Debug, Default)]
pub struct ConfiguredReadinessChecker;

impl ReadinessChecker for ConfiguredReadinessChecker {
    fn check_readiness(&self, composed: &Composed, checks: &[ReadinessCheck]) -> Result<bool> {
        if checks.is_empty() {
            return Ok(composed.is_ready());
        }

        let json = composed.to_json().map_err(|source| ComposeError::Resource {
            resource: composed.metadata.name.clone().unwrap_or_default(),
            source,
        })?;
        for (index, check) in checks.iter().enumerate() {
            if !evaluate(index, check, composed, &json)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

fn evaluate(index: usize, check: &ReadinessCheck, composed: &Composed, json: &Value) -> Result<bool> {
    let err = |message: String| ComposeError::Readiness {
        index,
        check_type: check.type_,
        message,
    };

    if check.type_ == ReadinessCheckType::None {
        return Ok(true);
    }
    if check.type_ == ReadinessCheckType::MatchCondition {
        let want = check
            .match_condition
            .as_ref()
            .ok_or_else(|| err("matchCondition is required".to_string()))?;
        return Ok(composed
            .condition(&want.type_)
            .is_some_and(|c| c.status == want.status));
    }

    let path = check
        .field_path
        .as_deref()
        .ok_or_else(|| err("fieldPath is required".to_string()))?;
    let Some(value) = fieldpath::get(json, path).map_err(|e| err(e.to_string()))? else {
        return Ok(false);
    };

    Ok(match check.type_ {
        ReadinessCheckType::NonEmpty => !is_empty(value),
        ReadinessCheckType::MatchString => {
            let want = check
                .match_string
                .as_deref()
                .ok_or_else(|| err("matchString is required".to_string()))?;
            value.as_str() == Some(want)
        }
        ReadinessCheckType::MatchInteger => {
            let want = check
                .match_integer
                .ok_or_else(|| err("matchInteger is required".to_string()))?;
            value.as_i64() == Some(want)
        }
        ReadinessCheckType::MatchTrue => value.as_bool() == Some(true),
        ReadinessCheckType::MatchFalse => value.as_bool() == Some(false),
        ReadinessCheckType::None | ReadinessCheckType::MatchCondition => true,
    })
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(fields) => fields.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tessera_common::crd::{Condition, ConditionStatus, MatchConditionReadinessCheck};
    use tessera_common::resource::object_from_json;

    fn composed() -> Composed {
        Composed::new(
            object_from_json(json!({
                "apiVersion": "s3.example.org/v1",
                "kind": "Bucket",
                "metadata": {"name": "ola-abcde"},
                "status": {
                    "phase": "Available",
                    "replicas": 3,
                    "healthy": true,
                    "degraded": false,
                    "endpoint": "",
                    "conditions": [{"type": "Synced", "status": "True"}],
                },
            }))
            .unwrap(),
        )
    }

    fn check(type_: ReadinessCheckType, path: &str) -> ReadinessCheck {
        ReadinessCheck {
            type_,
            field_path: Some(path.to_string()),
            ..Default::default()
        }
    }

    fn ready(checks: &[ReadinessCheck]) -> bool {
        ConfiguredReadinessChecker
            .check_readiness(&composed(), checks)
            .unwrap()
    }

    #[test]
    fn no_checks_means_ready_condition() {
        let checker = ConfiguredReadinessChecker;
        let mut cd = composed();
        assert!(!checker.check_readiness(&cd, &[]).unwrap());

        cd.set_condition(Condition::available()).unwrap();
        assert!(checker.check_readiness(&cd, &[]).unwrap());
    }

    #[test]
    fn field_checks() {
        assert!(ready(&[check(ReadinessCheckType::NonEmpty, "status.phase")]));
        assert!(!ready(&[check(ReadinessCheckType::NonEmpty, "status.endpoint")]));
        assert!(!ready(&[check(ReadinessCheckType::NonEmpty, "status.missing")]));

        let mut matches = check(ReadinessCheckType::MatchString, "status.phase");
        matches.match_string = Some("Available".into());
        assert!(ready(&[matches.clone()]));
        matches.match_string = Some("Pending".into());
        assert!(!ready(&[matches]));

        let mut count = check(ReadinessCheckType::MatchInteger, "status.replicas");
        count.match_integer = Some(3);
        assert!(ready(&[count.clone()]));
        count.match_integer = Some(4);
        assert!(!ready(&[count]));

        assert!(ready(&[check(ReadinessCheckType::MatchTrue, "status.healthy")]));
        assert!(!ready(&[check(ReadinessCheckType::MatchTrue, "status.degraded")]));
        assert!(ready(&[check(ReadinessCheckType::MatchFalse, "status.degraded")]));
        assert!(!ready(&[check(ReadinessCheckType::MatchFalse, "status.missing")]));
    }

    #[test]
    fn all_checks_must_pass() {
        let none = ReadinessCheck {
            type_: ReadinessCheckType::None,
            ..Default::default()
        };
        assert!(ready(&[none.clone()]));
        assert!(!ready(&[none, check(ReadinessCheckType::NonEmpty, "status.missing")]));
    }

    #[test]
    fn match_condition() {
        let mut c = ReadinessCheck {
            type_: ReadinessCheckType::MatchCondition,
            match_condition: Some(MatchConditionReadinessCheck {
                type_: "Synced".into(),
                status: ConditionStatus::True,
            }),
            ..Default::default()
        };
        assert!(ready(&[c.clone()]));

        c.match_condition = Some(MatchConditionReadinessCheck {
            type_: "Ready".into(),
            status: ConditionStatus::True,
        });
        assert!(!ready(&[c]));
    }

    #[test]
    fn misconfigured_checks_are_errors() {
        let checker = ConfiguredReadinessChecker;
        let cases = [
            ReadinessCheck {
                type_: ReadinessCheckType::MatchString,
                field_path: Some("status.phase".into()),
                ..Default::default()
            },
            ReadinessCheck {
                type_: ReadinessCheckType::NonEmpty,
                ..Default::default()
            },
            check(ReadinessCheckType::NonEmpty, "status[phase"),
            ReadinessCheck {
                type_: ReadinessCheckType::MatchCondition,
                ..Default::default()
            },
        ];
        for c in cases {
            let err = checker.check_readiness(&composed(), &[c]).unwrap_err();
            assert!(matches!(err, ComposeError::Readiness { index: 0, .. }), "{err:?}");
        }
    }
}
