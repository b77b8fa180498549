//! Patch set inlining
//!
//! Templates may pull in a named list of patches with a `PatchSet` patch.
//! Inlining replaces each such patch with the patches of the set it names, in
//! place, so nothing downstream ever sees a `PatchSet` patch.

use std::collections::HashMap;

use tessera_common::crd::{ComposedTemplate, CompositionRevisionSpec, Patch, PatchType};

use crate::{ComposeError, Result};

/// Return the revision's templates with every `PatchSet` patch expanded
pub fn inline_patch_sets(revision: &CompositionRevisionSpec) -> Result<Vec<ComposedTemplate>> {
    let mut sets: HashMap<&str, &[Patch]> = HashMap::with_capacity(revision.patch_sets.len());
    for set in &revision.patch_sets {
        if set.patches.iter().any(|p| p.type_ == PatchType::PatchSet) {
            return Err(ComposeError::NestedPatchSet {
                name: set.name.clone(),
            });
        }
        sets.insert(set.name.as_str(), &set.patches);
    }

    revision
        .resources
        .iter()
        .enumerate()
        .map(|(index, template)| {
            let mut patches = Vec::with_capacity(template.patches.len());
            for patch in &template.patches {
                if patch.type_ != PatchType::PatchSet {
                    patches.push(patch.clone());
                    continue;
                }
                let name = patch.patch_set_name.as_deref().ok_or_else(|| {
                    ComposeError::MissingPatchSetName {
                        template: template.display_name(index),
                    }
                })?;
                let set = sets
                    .get(name)
                    .ok_or_else(|| ComposeError::UndefinedPatchSet {
                        name: name.to_string(),
                    })?;
                patches.extend(set.iter().cloned());
            }
            Ok(ComposedTemplate {
                patches,
                ..template.clone()
            })
        })
        .collect()
}
