//! Custom Resource Definitions and shared status types

mod composition;
mod types;

pub use composition::{
    ComposedTemplate, CompositionRevision, CompositionRevisionSpec, ConnectionDetail,
    ConnectionDetailType, FromFieldPathPolicy, MatchConditionReadinessCheck, Patch, PatchPolicy,
    PatchSet, PatchType, ReadinessCheck, ReadinessCheckType, TypeReference,
};
pub use types::{Condition, ConditionStatus, CONDITION_READY, REASON_AVAILABLE, REASON_CREATING};
