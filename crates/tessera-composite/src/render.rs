//! Rendering composed resources and the composite
//!
//! A composition renders in two directions for every template: the composed
//! resource is rendered from the composite (base, identity, and patches into
//! the composed resource), then the composite is rendered from the composed
//! resource (patches back into the composite).

use std::sync::Arc;

use async_trait::async_trait;
use kube::ResourceExt;
use serde_json::Value;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use tessera_common::crd::ComposedTemplate;
use tessera_common::fieldpath;
use tessera_common::resource::{object_from_json, upsert_owner_reference, DynamicObjectExt};
use tessera_common::{Composed, Composite};

use crate::patch;
use crate::store::ObjectStore;
use crate::{ComposeError, Result};

/// Opaque data patches may read with `FromEnvironmentFieldPath`
#[derive(Clone, Debug, PartialEq)]
pub struct Environment(pub Value);

impl Default for Environment {
    fn default() -> Self {
        Self(Value::Object(Default::default()))
    }
}

impl From<Value> for Environment {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

/// Renders one side of a template
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Render `template` into `composed` and/or `composite`
    async fn render(
        &self,
        composite: &mut Composite,
        composed: &mut Composed,
        template: &ComposedTemplate,
        environment: &Environment,
    ) -> Result<()>;
}

/// Renders composed resources: base, name, labels, ownership, and patches.
///
/// Names are resolved by the server: unnamed resources get a `generateName`
/// from the composite's name prefix and a dry-run create reports the name the
/// server would allocate. The resource is not persisted here.
#[derive(Clone)]
pub struct DryRunRenderer {
    store: Arc<dyn ObjectStore>,
}

impl DryRunRenderer {
    /// Create a renderer that resolves names through the given store
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Renderer for DryRunRenderer {
    async fn render(
        &self,
        composite: &mut Composite,
        composed: &mut Composed,
        template: &ComposedTemplate,
        environment: &Environment,
    ) -> Result<()> {
        let prior_kind = composed.kind().to_string();
        let name = composed.metadata.name.clone();
        let namespace = composed.metadata.namespace.clone();

        if !template.base.is_object() {
            return Err(ComposeError::Unmarshal {
                message: "base must be a JSON object".to_string(),
            });
        }
        let mut json = composed.to_json().map_err(|source| ComposeError::Resource {
            resource: composed.name_any(),
            source,
        })?;
        fieldpath::merge(&mut json, &template.base);
        let rendered = object_from_json(json).map_err(|e| ComposeError::Unmarshal {
            message: e.to_string(),
        })?;

        if !prior_kind.is_empty() && rendered.kind() != prior_kind {
            return Err(ComposeError::KindChanged {
                from: prior_kind,
                to: rendered.kind().to_string(),
            });
        }

        let prefix = composite
            .name_prefix()
            .ok_or(ComposeError::MissingNamePrefix)?
            .to_string();

        let mut rendered = Composed::new(rendered);
        rendered.metadata.generate_name = Some(format!("{prefix}-"));
        for (key, value) in composite.identifying_labels() {
            rendered.labels_mut().insert(key, value);
        }
        rendered.metadata.name = name;
        rendered.metadata.namespace = namespace;
        if let Some(template_name) = template.name.as_deref() {
            rendered.set_composition_resource_name(template_name);
        }

        patch::apply_to_composed(&template.patches, composite, &environment.0, &mut rendered)?;

        let owner = composite.controller_owner_reference();
        if let Some(existing) = rendered.controller_reference() {
            if existing.uid != owner.uid {
                return Err(ComposeError::ControllerConflict {
                    kind: rendered.kind().to_string(),
                    name: rendered.name_any(),
                    owner_kind: existing.kind.clone(),
                    owner_name: existing.name.clone(),
                    owner_uid: existing.uid.clone(),
                });
            }
        }
        upsert_owner_reference(&mut rendered, owner);

        let unnamed = rendered.metadata.name.as_deref().unwrap_or_default().is_empty();
        if unnamed {
            let dry_run = self
                .store
                .create(&rendered, true)
                .await
                .map_err(|source| ComposeError::Name { source })?;
            let allocated = dry_run.metadata.name.filter(|n| !n.is_empty()).ok_or_else(|| {
                ComposeError::Name {
                    source: tessera_common::Error::internal_with_context(
                        "dry-run",
                        "server did not allocate a name",
                    ),
                }
            })?;
            debug!(kind = rendered.kind(), name = %allocated, "resolved composed resource name");
            rendered.metadata.name = Some(allocated);
        }

        *composed = rendered;
        Ok(())
    }
}

/// Renders the composite from a composed resource with `ToCompositeFieldPath`
/// patches
#[derive(Clone, Copy, Debug, Default)]
pub struct CompositeRenderer;

#[async_trait]
impl Renderer for CompositeRenderer {
    async fn render(
        &self,
        composite: &mut Composite,
        composed: &mut Composed,
        template: &ComposedTemplate,
        _environment: &Environment,
    ) -> Result<()> {
        patch::apply_to_composite(&template.patches, composed, composite)
    }
}
