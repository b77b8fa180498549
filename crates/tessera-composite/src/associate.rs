//! Template association
//!
//! Before rendering, each template is matched with the composed resource it
//! produced on a previous reconcile (if any), so repeated reconciles update
//! the same objects instead of creating new ones.
//!
//! Two strategies exist:
//!
//! - [`OrderAssociator`] pairs templates with `spec.resourceRefs` by position.
//! - [`GarbageCollectingAssociator`] pairs them by the template-name annotation
//!   on each composed resource, and deletes resources whose template has been
//!   removed from the composition. It falls back to positional association
//!   when names are not available.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::ResourceExt;
use tracing::{debug, info, instrument};

#[cfg(test)]
use mockall::automock;

use tessera_common::crd::ComposedTemplate;
use tessera_common::{Composed, Composite};

use crate::store::ObjectStore;
use crate::{ComposeError, Result};

/// A template paired with the composed resource it previously produced
#[derive(Clone, Debug, PartialEq)]
pub struct TemplateAssociation {
    /// The template
    pub template: ComposedTemplate,
    /// Reference to the existing composed resource, if there is one
    pub reference: Option<ObjectReference>,
}

/// Strategy for pairing templates with existing composed resources.
///
/// Implementations return exactly one association per template, in template
/// order.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Associator: Send + Sync {
    /// Associate `templates` with the composite's existing resources
    async fn associate_templates(
        &self,
        composite: &Composite,
        templates: &[ComposedTemplate],
    ) -> Result<Vec<TemplateAssociation>>;
}

/// Pair templates with references by position.
///
/// References beyond the last template are dropped; templates beyond the last
/// reference get none.
pub fn associate_by_order(
    templates: &[ComposedTemplate],
    refs: &[ObjectReference],
) -> Vec<TemplateAssociation> {
    templates
        .iter()
        .enumerate()
        .map(|(i, template)| TemplateAssociation {
            template: template.clone(),
            reference: refs.get(i).cloned(),
        })
        .collect()
}

fn resource_refs(composite: &Composite) -> Result<Vec<ObjectReference>> {
    composite
        .resource_refs()
        .map_err(|source| ComposeError::Resource {
            resource: composite.name_any(),
            source,
        })
}

/// Associates templates with the composite's resource references by position
#[derive(Clone, Copy, Debug, Default)]
pub struct OrderAssociator;

#[async_trait]
impl Associator for OrderAssociator {
    async fn associate_templates(
        &self,
        composite: &Composite,
        templates: &[ComposedTemplate],
    ) -> Result<Vec<TemplateAssociation>> {
        Ok(associate_by_order(templates, &resource_refs(composite)?))
    }
}

/// Associates templates with composed resources by template name, deleting
/// resources this composite controls whose template no longer exists.
#[derive(Clone)]
pub struct GarbageCollectingAssociator {
    store: Arc<dyn ObjectStore>,
    fallback: OrderAssociator,
}

impl GarbageCollectingAssociator {
    /// Create an associator reading and deleting through the given store
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            fallback: OrderAssociator,
        }
    }
}

pub(crate) fn describe(reference: &ObjectReference) -> String {
    format!(
        "{} {}",
        reference.kind.as_deref().unwrap_or_default(),
        reference.name.as_deref().unwrap_or_default()
    )
}

#[async_trait]
impl Associator for GarbageCollectingAssociator {
    #[instrument(skip_all, fields(composite = %composite.name_any(), templates = templates.len()))]
    async fn associate_templates(
        &self,
        composite: &Composite,
        templates: &[ComposedTemplate],
    ) -> Result<Vec<TemplateAssociation>> {
        // Without a name on every template there is nothing to match on.
        if templates.iter().any(|t| t.name.is_none()) {
            debug!("anonymous template found, associating by order");
            return self.fallback.associate_templates(composite, templates).await;
        }

        let by_name: HashMap<&str, usize> = templates
            .iter()
            .enumerate()
            .filter_map(|(i, t)| t.name.as_deref().map(|n| (n, i)))
            .collect();
        let mut bound: Vec<Option<ObjectReference>> = vec![None; templates.len()];

        let refs = resource_refs(composite)?;
        for reference in &refs {
            let obj = match self.store.get(reference).await {
                Ok(Some(obj)) => obj,
                Ok(None) => {
                    debug!(resource = %describe(reference), "referenced resource no longer exists");
                    continue;
                }
                Err(e) if e.is_not_found() => continue,
                Err(source) => {
                    return Err(ComposeError::GetComposed {
                        reference: describe(reference),
                        source,
                    })
                }
            };
            let composed = Composed::new(obj);

            // Resources composed before template names were recorded can only
            // be matched by position.
            let Some(name) = composed.composition_resource_name() else {
                debug!(resource = %describe(reference), "resource has no template name, associating by order");
                return Ok(associate_by_order(templates, &refs));
            };

            if let Some(&i) = by_name.get(name) {
                bound[i] = Some(reference.clone());
                continue;
            }

            if !composite.controls(&composed) {
                debug!(
                    resource = %describe(reference),
                    template = name,
                    "orphaned resource is not controlled by this composite, leaving it alone"
                );
                continue;
            }

            self.store
                .delete(&composed)
                .await
                .map_err(|source| ComposeError::GarbageCollect {
                    name: composed.name_any(),
                    source,
                })?;
            info!(
                resource = %describe(reference),
                template = name,
                "deleted composed resource whose template was removed"
            );
        }

        Ok(templates
            .iter()
            .zip(bound)
            .map(|(template, reference)| TemplateAssociation {
                template: template.clone(),
                reference,
            })
            .collect())
    }
}
