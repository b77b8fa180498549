//! Composite and composed resource wrappers
//!
//! Both composites and the resources composed for them are arbitrary kinds,
//! so they are carried as `DynamicObject`s. The `Composite` and `Composed`
//! newtypes keep the two roles apart in signatures and add the accessors each
//! role needs; everything else is reached through `Deref` and
//! [`DynamicObjectExt`].

use std::ops::{Deref, DerefMut};

use k8s_openapi::api::core::v1::ObjectReference;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::api::{DynamicObject, TypeMeta};
use kube::ResourceExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::crd::{Condition, CONDITION_READY};
use crate::{fieldpath, Error, Result};
use crate::{
    ANNOTATION_COMPOSITION_RESOURCE_NAME, LABEL_CLAIM_NAME, LABEL_CLAIM_NAMESPACE,
    LABEL_NAME_PREFIX,
};

/// Reference to the secret a resource writes its connection details to
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSecretRef {
    /// Secret name
    pub name: String,
    /// Secret namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

// =============================================================================
// DynamicObject helpers
// =============================================================================

/// Accessors shared by composites and composed resources
pub trait DynamicObjectExt {
    /// apiVersion, or an empty string when unset
    fn api_version(&self) -> &str;

    /// Kind, or an empty string when unset
    fn kind(&self) -> &str;

    /// Serialize the whole object (type, metadata, and body) to JSON
    fn to_json(&self) -> Result<Value>;

    /// Reference to this object suitable for `spec.resourceRefs`
    fn object_reference(&self) -> ObjectReference;

    /// The owner reference marked as controller, if any
    fn controller_reference(&self) -> Option<&OwnerReference>;

    /// Status conditions; entries that don't parse are skipped
    fn conditions(&self) -> Vec<Condition>;

    /// Condition of the given type, if present
    fn condition(&self, type_: &str) -> Option<Condition> {
        self.conditions().into_iter().find(|c| c.type_ == type_)
    }

    /// Whether the Ready condition is True
    fn is_ready(&self) -> bool {
        self.condition(CONDITION_READY)
            .is_some_and(|c| c.status == crate::crd::ConditionStatus::True)
    }

    /// Set a condition, keeping its transition time when nothing changed.
    ///
    /// Returns `true` if the stored condition changed.
    fn set_condition(&mut self, condition: Condition) -> Result<bool>;

    /// `spec.writeConnectionSecretToRef`, if the object declares one
    fn connection_secret_ref(&self) -> Result<Option<ConnectionSecretRef>>;
}

impl DynamicObjectExt for DynamicObject {
    fn api_version(&self) -> &str {
        self.types.as_ref().map(|t| t.api_version.as_str()).unwrap_or_default()
    }

    fn kind(&self) -> &str {
        self.types.as_ref().map(|t| t.kind.as_str()).unwrap_or_default()
    }

    fn to_json(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    fn object_reference(&self) -> ObjectReference {
        ObjectReference {
            api_version: non_empty(self.api_version()),
            kind: non_empty(self.kind()),
            name: self.metadata.name.clone(),
            namespace: self.metadata.namespace.clone(),
            ..Default::default()
        }
    }

    fn controller_reference(&self) -> Option<&OwnerReference> {
        self.metadata
            .owner_references
            .as_ref()?
            .iter()
            .find(|r| r.controller == Some(true))
    }

    fn conditions(&self) -> Vec<Condition> {
        let Ok(Some(Value::Array(items))) = fieldpath::get(&self.data, "status.conditions") else {
            return Vec::new();
        };
        items
            .iter()
            .filter_map(|item| match serde_json::from_value::<Condition>(item.clone()) {
                Ok(c) => Some(c),
                Err(e) => {
                    debug!(error = %e, "skipping unparseable condition");
                    None
                }
            })
            .collect()
    }

    fn set_condition(&mut self, mut condition: Condition) -> Result<bool> {
        let mut conditions = self.conditions();
        match conditions.iter_mut().find(|c| c.type_ == condition.type_) {
            Some(existing) if existing.equivalent(&condition) => return Ok(false),
            Some(existing) => {
                if existing.status == condition.status {
                    condition.last_transition_time = existing.last_transition_time;
                }
                *existing = condition;
            }
            None => conditions.push(condition),
        }
        fieldpath::set(
            &mut self.data,
            "status.conditions",
            serde_json::to_value(&conditions)?,
        )?;
        Ok(true)
    }

    fn connection_secret_ref(&self) -> Result<Option<ConnectionSecretRef>> {
        match fieldpath::get(&self.data, "spec.writeConnectionSecretToRef")? {
            Some(v) => Ok(Some(serde_json::from_value(v.clone()).map_err(|e| {
                Error::serialization_for_kind(
                    self.kind().to_string(),
                    format!("invalid spec.writeConnectionSecretToRef: {e}"),
                )
            })?)),
            None => Ok(None),
        }
    }
}

fn non_empty(s: &str) -> Option<String> {
    (!s.is_empty()).then(|| s.to_string())
}

/// Rebuild a `DynamicObject` from its full JSON form
pub fn object_from_json(value: Value) -> Result<DynamicObject> {
    Ok(serde_json::from_value(value)?)
}

/// Set an owner reference, replacing any existing reference to the same owner
pub fn upsert_owner_reference(obj: &mut DynamicObject, owner: OwnerReference) {
    let refs = obj.owner_references_mut();
    match refs.iter_mut().find(|r| r.uid == owner.uid) {
        Some(existing) => *existing = owner,
        None => refs.push(owner),
    }
}

// =============================================================================
// Composite
// =============================================================================

/// The high-level resource a composition is rendered for
#[derive(Clone, Debug)]
pub struct Composite(DynamicObject);

impl Composite {
    /// Wrap a composite object
    pub fn new(obj: DynamicObject) -> Self {
        Self(obj)
    }

    /// Unwrap into the underlying object
    pub fn into_inner(self) -> DynamicObject {
        self.0
    }

    /// The prefix used to generate names of composed resources, if set and non-empty
    pub fn name_prefix(&self) -> Option<&str> {
        self.labels()
            .get(LABEL_NAME_PREFIX)
            .map(String::as_str)
            .filter(|p| !p.is_empty())
    }

    /// Labels that identify the composite (and its claim) on composed resources
    pub fn identifying_labels(&self) -> Vec<(String, String)> {
        [LABEL_NAME_PREFIX, LABEL_CLAIM_NAME, LABEL_CLAIM_NAMESPACE]
            .into_iter()
            .filter_map(|key| {
                self.labels()
                    .get(key)
                    .map(|value| (key.to_string(), value.clone()))
            })
            .collect()
    }

    /// References to the composed resources this composite holds, in order
    pub fn resource_refs(&self) -> Result<Vec<ObjectReference>> {
        match fieldpath::get(&self.data, "spec.resourceRefs")? {
            Some(v) => serde_json::from_value(v.clone())
                .map_err(|e| Error::validation_for(self.name_any(), format!("invalid spec.resourceRefs: {e}"))),
            None => Ok(Vec::new()),
        }
    }

    /// Replace the composite's composed resource references
    pub fn set_resource_refs(&mut self, refs: &[ObjectReference]) -> Result<()> {
        fieldpath::set(&mut self.0.data, "spec.resourceRefs", serde_json::to_value(refs)?)
    }

    /// Owner reference that makes this composite the controller of another object
    pub fn controller_owner_reference(&self) -> OwnerReference {
        OwnerReference {
            api_version: self.api_version().to_string(),
            kind: self.kind().to_string(),
            name: self.name_any(),
            uid: self.uid().unwrap_or_default(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        }
    }

    /// Whether `obj` is controlled by this composite
    pub fn controls(&self, obj: &DynamicObject) -> bool {
        let uid = self.uid().unwrap_or_default();
        obj.controller_reference()
            .is_some_and(|c| !uid.is_empty() && c.uid == uid)
    }
}

impl Deref for Composite {
    type Target = DynamicObject;

    fn deref(&self) -> &DynamicObject {
        &self.0
    }
}

impl DerefMut for Composite {
    fn deref_mut(&mut self) -> &mut DynamicObject {
        &mut self.0
    }
}

impl From<DynamicObject> for Composite {
    fn from(obj: DynamicObject) -> Self {
        Self(obj)
    }
}

// =============================================================================
// Composed
// =============================================================================

/// A resource rendered from one template of a composition
#[derive(Clone, Debug)]
pub struct Composed(DynamicObject);

impl Composed {
    /// Wrap a composed object
    pub fn new(obj: DynamicObject) -> Self {
        Self(obj)
    }

    /// An empty placeholder with no type or identity yet
    pub fn empty() -> Self {
        Self(DynamicObject {
            types: None,
            metadata: ObjectMeta::default(),
            data: Value::Object(Default::default()),
        })
    }

    /// A placeholder carrying only the identity recorded in `reference`
    pub fn from_reference(reference: &ObjectReference) -> Self {
        let types = match (&reference.api_version, &reference.kind) {
            (Some(api_version), Some(kind)) => Some(TypeMeta {
                api_version: api_version.clone(),
                kind: kind.clone(),
            }),
            _ => None,
        };
        Self(DynamicObject {
            types,
            metadata: ObjectMeta {
                name: reference.name.clone(),
                namespace: reference.namespace.clone(),
                ..Default::default()
            },
            data: Value::Object(Default::default()),
        })
    }

    /// Unwrap into the underlying object
    pub fn into_inner(self) -> DynamicObject {
        self.0
    }

    /// Name of the template this resource was rendered from, if annotated
    pub fn composition_resource_name(&self) -> Option<&str> {
        self.annotations()
            .get(ANNOTATION_COMPOSITION_RESOURCE_NAME)
            .map(String::as_str)
            .filter(|n| !n.is_empty())
    }

    /// Record the name of the template this resource was rendered from
    pub fn set_composition_resource_name(&mut self, name: &str) {
        self.annotations_mut().insert(
            ANNOTATION_COMPOSITION_RESOURCE_NAME.to_string(),
            name.to_string(),
        );
    }
}

impl Deref for Composed {
    type Target = DynamicObject;

    fn deref(&self) -> &DynamicObject {
        &self.0
    }
}

impl DerefMut for Composed {
    fn deref_mut(&mut self) -> &mut DynamicObject {
        &mut self.0
    }
}

impl From<DynamicObject> for Composed {
    fn from(obj: DynamicObject) -> Self {
        Self(obj)
    }
}
