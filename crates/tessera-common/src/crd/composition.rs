//! CompositionRevision CRD types
//!
//! A `CompositionRevision` is an immutable snapshot of a composition: the
//! ordered list of templates used to compose resources for a composite, plus
//! the named patch sets those templates may reference.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// =============================================================================
// Revision
// =============================================================================

/// Spec of a CompositionRevision
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "apiextensions.tessera.dev",
    version = "v1",
    kind = "CompositionRevision",
    plural = "compositionrevisions",
    shortname = "comprev",
    printcolumn = r#"{"name":"Revision","type":"integer","jsonPath":".spec.revision"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct CompositionRevisionSpec {
    /// Type of composite this revision composes
    #[serde(default)]
    pub composite_type_ref: TypeReference,

    /// Named sets of patches templates may pull in with a `PatchSet` patch
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub patch_sets: Vec<PatchSet>,

    /// Ordered resource templates
    #[serde(default)]
    pub resources: Vec<ComposedTemplate>,

    /// Namespace composite connection secrets are written to, when the
    /// composite does not pick one itself
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write_connection_secrets_to_namespace: Option<String>,

    /// Monotonic revision number
    #[serde(default)]
    pub revision: i64,
}

/// apiVersion and kind of a referenced type
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TypeReference {
    /// apiVersion of the type
    pub api_version: String,
    /// Kind of the type
    pub kind: String,
}

// =============================================================================
// Templates
// =============================================================================

/// One resource template of a composition
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ComposedTemplate {
    /// Stable name identifying resources rendered from this template.
    ///
    /// Either every template in a composition is named, or resources are
    /// matched to templates by position.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// The object the composed resource starts out as
    #[serde(default)]
    pub base: serde_json::Value,

    /// Patches applied between the composite and this resource
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub patches: Vec<Patch>,

    /// Connection details this resource contributes to the composite
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub connection_details: Vec<ConnectionDetail>,

    /// Checks that decide whether this resource is ready
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub readiness_checks: Vec<ReadinessCheck>,
}

impl ComposedTemplate {
    /// Name used to refer to this template in events and logs
    pub fn display_name(&self, index: usize) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("resources[{index}]"),
        }
    }
}

/// A named, reusable list of patches
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PatchSet {
    /// Name templates use to reference this set
    pub name: String,
    /// Patches in the set
    #[serde(default)]
    pub patches: Vec<Patch>,
}

// =============================================================================
// Patches
// =============================================================================

/// Where a patch copies from and to
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum PatchType {
    /// Composite field → composed field
    #[default]
    FromCompositeFieldPath,
    /// Environment field → composed field
    FromEnvironmentFieldPath,
    /// Composed field → composite field
    ToCompositeFieldPath,
    /// Placeholder for the patches of a named patch set
    PatchSet,
}

impl std::fmt::Display for PatchType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FromCompositeFieldPath => write!(f, "FromCompositeFieldPath"),
            Self::FromEnvironmentFieldPath => write!(f, "FromEnvironmentFieldPath"),
            Self::ToCompositeFieldPath => write!(f, "ToCompositeFieldPath"),
            Self::PatchSet => write!(f, "PatchSet"),
        }
    }
}

/// What to do when a patch's source field is missing
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum FromFieldPathPolicy {
    /// Skip the patch
    #[default]
    Optional,
    /// Fail the render
    Required,
}

/// Patch policy
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PatchPolicy {
    /// Behaviour when the source field is missing
    #[serde(default)]
    pub from_field_path: FromFieldPathPolicy,
}

/// A single field copy between the composite (or environment) and a composed resource
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Patch {
    /// Patch direction
    #[serde(default, rename = "type")]
    pub type_: PatchType,

    /// Source field path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_field_path: Option<String>,

    /// Destination field path; defaults to the source path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_field_path: Option<String>,

    /// Name of the patch set to inline, for `PatchSet` patches
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch_set_name: Option<String>,

    /// Patch policy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<PatchPolicy>,
}

impl Patch {
    /// Whether a missing source field should fail the patch
    pub fn source_required(&self) -> bool {
        self.policy
            .as_ref()
            .is_some_and(|p| p.from_field_path == FromFieldPathPolicy::Required)
    }
}

// =============================================================================
// Connection details
// =============================================================================

/// How a connection detail gets its value
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConnectionDetailType {
    /// Copy a key from the composed resource's connection secret
    FromConnectionSecretKey,
    /// Read a field of the composed resource
    FromFieldPath,
    /// A literal value
    FromValue,
}

impl std::fmt::Display for ConnectionDetailType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FromConnectionSecretKey => write!(f, "FromConnectionSecretKey"),
            Self::FromFieldPath => write!(f, "FromFieldPath"),
            Self::FromValue => write!(f, "FromValue"),
        }
    }
}

/// A connection detail a composed resource contributes to its composite
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionDetail {
    /// Key of the detail in the composite's connection secret
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// How the value is obtained; inferred from the other fields when unset
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_: Option<ConnectionDetailType>,

    /// Key to copy from the composed resource's connection secret
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_connection_secret_key: Option<String>,

    /// Field of the composed resource to read
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_field_path: Option<String>,

    /// Literal value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

// =============================================================================
// Readiness checks
// =============================================================================

/// Kind of readiness check
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ReadinessCheckType {
    /// Field must be present
    #[default]
    NonEmpty,
    /// Field must equal a string
    MatchString,
    /// Field must equal an integer
    MatchInteger,
    /// Field must be boolean true
    MatchTrue,
    /// Field must be boolean false
    MatchFalse,
    /// A status condition must have the given status
    MatchCondition,
    /// Always ready
    None,
}

impl std::fmt::Display for ReadinessCheckType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::NonEmpty => "NonEmpty",
            Self::MatchString => "MatchString",
            Self::MatchInteger => "MatchInteger",
            Self::MatchTrue => "MatchTrue",
            Self::MatchFalse => "MatchFalse",
            Self::MatchCondition => "MatchCondition",
            Self::None => "None",
        };
        f.write_str(s)
    }
}

/// Condition a `MatchCondition` check looks for
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MatchConditionReadinessCheck {
    /// Condition type
    #[serde(rename = "type")]
    pub type_: String,
    /// Required condition status
    pub status: super::ConditionStatus,
}

/// A check that decides whether a composed resource is ready
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReadinessCheck {
    /// Kind of check
    #[serde(default, rename = "type")]
    pub type_: ReadinessCheckType,

    /// Field the check reads
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_path: Option<String>,

    /// Expected string for `MatchString`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_string: Option<String>,

    /// Expected integer for `MatchInteger`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_integer: Option<i64>,

    /// Expected condition for `MatchCondition`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_condition: Option<MatchConditionReadinessCheck>,
}
