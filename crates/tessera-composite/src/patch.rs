//! Field-path patches
//!
//! Patches copy a single field between the composite (or the environment) and
//! a composed resource. They operate on the full JSON form of each object, so
//! `metadata.*` paths work the same as `spec.*` ones.

use kube::api::DynamicObject;
use kube::ResourceExt;
use serde_json::Value;
use tracing::trace;

use tessera_common::crd::{Patch, PatchType};
use tessera_common::fieldpath;
use tessera_common::resource::{object_from_json, DynamicObjectExt};

use crate::{ComposeError, Result};

/// Apply the patches that write to the composed resource
pub fn apply_to_composed(
    patches: &[Patch],
    composite: &DynamicObject,
    environment: &Value,
    composed: &mut DynamicObject,
) -> Result<()> {
    let applies = patches.iter().any(|p| {
        matches!(
            p.type_,
            PatchType::FromCompositeFieldPath | PatchType::FromEnvironmentFieldPath
        )
    });
    if !applies {
        return Ok(());
    }

    let from_composite = to_json(composite)?;
    let mut to = to_json(composed)?;
    for (index, patch) in patches.iter().enumerate() {
        let from = match patch.type_ {
            PatchType::FromCompositeFieldPath => &from_composite,
            PatchType::FromEnvironmentFieldPath => environment,
            _ => continue,
        };
        copy_field(index, patch, from, &mut to)?;
    }
    *composed = from_json(composed, to)?;
    Ok(())
}

/// Apply the patches that write back to the composite
pub fn apply_to_composite(
    patches: &[Patch],
    composed: &DynamicObject,
    composite: &mut DynamicObject,
) -> Result<()> {
    if !patches
        .iter()
        .any(|p| p.type_ == PatchType::ToCompositeFieldPath)
    {
        return Ok(());
    }

    let from = to_json(composed)?;
    let mut to = to_json(composite)?;
    for (index, patch) in patches.iter().enumerate() {
        if patch.type_ == PatchType::ToCompositeFieldPath {
            copy_field(index, patch, &from, &mut to)?;
        }
    }
    *composite = from_json(composite, to)?;
    Ok(())
}

fn copy_field(index: usize, patch: &Patch, from: &Value, to: &mut Value) -> Result<()> {
    let err = |source| ComposeError::Patch {
        index,
        patch_type: patch.type_,
        source,
    };

    let Some(from_path) = patch.from_field_path.as_deref() else {
        return Err(err(tessera_common::Error::field_path(
            "",
            "fromFieldPath is required",
        )));
    };
    let to_path = patch.to_field_path.as_deref().unwrap_or(from_path);

    match fieldpath::get(from, from_path).map_err(err)? {
        Some(value) => {
            trace!(from = from_path, to = to_path, "copying field");
            fieldpath::set(to, to_path, value.clone()).map_err(err)
        }
        None if patch.source_required() => Err(err(tessera_common::Error::field_path(
            from_path,
            "required field is missing",
        ))),
        None => Ok(()),
    }
}

fn to_json(obj: &DynamicObject) -> Result<Value> {
    obj.to_json().map_err(|source| ComposeError::Resource {
        resource: obj.name_any(),
        source,
    })
}

fn from_json(original: &DynamicObject, value: Value) -> Result<DynamicObject> {
    object_from_json(value).map_err(|source| ComposeError::Resource {
        resource: original.name_any(),
        source,
    })
}
