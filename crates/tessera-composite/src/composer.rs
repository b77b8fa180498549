//! The Composer
//!
//! Composes the resources of one composite from one composition revision:
//!
//! 1. Inline patch sets
//! 2. Associate templates with existing composed resources
//! 3. For each template, in order: observe the referenced resource and
//!    render the composed resource onto it
//! 4. Persist the composite's resource references
//! 5. For each rendered resource, in order: render the composite, apply,
//!    fetch and extract connection details, check readiness
//! 6. Persist the composite and its status
//!
//! A composed resource that fails to render is reported as a warning event
//! and skipped, unless it is controlled by someone else. Every other failure
//! aborts the composition.

use std::sync::Arc;

use k8s_openapi::api::core::v1::ObjectReference;
use kube::ResourceExt;
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use tessera_common::crd::CompositionRevision;
use tessera_common::events::reasons;
use tessera_common::resource::DynamicObjectExt;
use tessera_common::{Composed, Composite, Event};

use crate::apply::PatchingApplicator;
use crate::associate::{describe, Associator, GarbageCollectingAssociator, TemplateAssociation};
use crate::connection::{
    ConfiguredExtractor, ConnectionDetails, ConnectionDetailsExtractor, ConnectionDetailsFetcher,
    SecretConnectionDetailsFetcher,
};
use crate::patchset::inline_patch_sets;
use crate::ready::{ConfiguredReadinessChecker, ReadinessChecker};
use crate::render::{CompositeRenderer, DryRunRenderer, Environment, Renderer};
use crate::store::ObjectStore;
use crate::{ComposeError, Result, Stage};

/// What to compose
#[derive(Clone, Debug)]
pub struct CompositionRequest {
    /// The composition revision to compose from
    pub revision: CompositionRevision,
    /// Data available to `FromEnvironmentFieldPath` patches
    pub environment: Environment,
}

impl CompositionRequest {
    /// A request with an empty environment
    pub fn new(revision: CompositionRevision) -> Self {
        Self {
            revision,
            environment: Environment::default(),
        }
    }

    /// Set the environment
    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }
}

/// A composed resource that made it through composition
#[derive(Clone, Debug)]
pub struct ComposedResource {
    /// Name of the template it was rendered from; empty for anonymous templates
    pub resource_name: String,
    /// The resource as last returned by the server
    pub object: Composed,
    /// Whether the resource's readiness checks passed
    pub ready: bool,
}

/// Outcome of a successful composition
#[derive(Clone, Debug, Default)]
pub struct CompositionResult {
    /// One entry per template that was rendered and applied, in template order
    pub composed: Vec<ComposedResource>,
    /// Connection details merged across composed resources
    pub connection_details: ConnectionDetails,
    /// Events to record on the composite
    pub events: Vec<Event>,
}

impl CompositionResult {
    /// Whether every composed resource is ready
    pub fn all_ready(&self) -> bool {
        self.composed.iter().all(|c| c.ready)
    }
}

/// Collaborators of a [`Composer`]; each defaults to the production
/// implementation over the store
pub struct ComposerConfig {
    store: Arc<dyn ObjectStore>,
    associator: Option<Arc<dyn Associator>>,
    composed_renderer: Option<Arc<dyn Renderer>>,
    composite_renderer: Option<Arc<dyn Renderer>>,
    details_fetcher: Option<Arc<dyn ConnectionDetailsFetcher>>,
    details_extractor: Option<Arc<dyn ConnectionDetailsExtractor>>,
    readiness_checker: Option<Arc<dyn ReadinessChecker>>,
}

impl ComposerConfig {
    /// Start a configuration over the given store
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            associator: None,
            composed_renderer: None,
            composite_renderer: None,
            details_fetcher: None,
            details_extractor: None,
            readiness_checker: None,
        }
    }

    /// Use a different template associator
    pub fn associator(mut self, associator: Arc<dyn Associator>) -> Self {
        self.associator = Some(associator);
        self
    }

    /// Use a different composed resource renderer
    pub fn composed_renderer(mut self, renderer: Arc<dyn Renderer>) -> Self {
        self.composed_renderer = Some(renderer);
        self
    }

    /// Use a different composite renderer
    pub fn composite_renderer(mut self, renderer: Arc<dyn Renderer>) -> Self {
        self.composite_renderer = Some(renderer);
        self
    }

    /// Use a different connection details fetcher
    pub fn details_fetcher(mut self, fetcher: Arc<dyn ConnectionDetailsFetcher>) -> Self {
        self.details_fetcher = Some(fetcher);
        self
    }

    /// Use a different connection details extractor
    pub fn details_extractor(mut self, extractor: Arc<dyn ConnectionDetailsExtractor>) -> Self {
        self.details_extractor = Some(extractor);
        self
    }

    /// Use a different readiness checker
    pub fn readiness_checker(mut self, checker: Arc<dyn ReadinessChecker>) -> Self {
        self.readiness_checker = Some(checker);
        self
    }

    /// Build the composer
    pub fn build(self) -> Composer {
        let store = self.store;
        Composer {
            associator: self
                .associator
                .unwrap_or_else(|| Arc::new(GarbageCollectingAssociator::new(store.clone()))),
            composed_renderer: self
                .composed_renderer
                .unwrap_or_else(|| Arc::new(DryRunRenderer::new(store.clone()))),
            composite_renderer: self
                .composite_renderer
                .unwrap_or_else(|| Arc::new(CompositeRenderer)),
            details_fetcher: self
                .details_fetcher
                .unwrap_or_else(|| Arc::new(SecretConnectionDetailsFetcher::new(store.clone()))),
            details_extractor: self
                .details_extractor
                .unwrap_or_else(|| Arc::new(ConfiguredExtractor)),
            readiness_checker: self
                .readiness_checker
                .unwrap_or_else(|| Arc::new(ConfiguredReadinessChecker)),
            applicator: PatchingApplicator::new(store.clone()),
            store,
        }
    }
}

/// Composes resources for composites. Holds no per-composite state, so one
/// composer can serve any number of concurrent reconciles.
#[derive(Clone)]
pub struct Composer {
    associator: Arc<dyn Associator>,
    composed_renderer: Arc<dyn Renderer>,
    composite_renderer: Arc<dyn Renderer>,
    details_fetcher: Arc<dyn ConnectionDetailsFetcher>,
    details_extractor: Arc<dyn ConnectionDetailsExtractor>,
    readiness_checker: Arc<dyn ReadinessChecker>,
    applicator: PatchingApplicator,
    store: Arc<dyn ObjectStore>,
}

impl Composer {
    /// A composer with production collaborators over the given store
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        ComposerConfig::new(store).build()
    }

    /// Compose the resources of `composite`.
    ///
    /// On success the composite has been persisted with references to its
    /// composed resources and reflects any patches rendered into it. On error
    /// the error is tagged with the [`Stage`] it occurred in.
    #[instrument(
        skip_all,
        fields(
            composite = %composite.name_any(),
            revision = request.revision.spec.revision,
        )
    )]
    pub async fn compose(
        &self,
        composite: &mut Composite,
        request: &CompositionRequest,
    ) -> Result<CompositionResult> {
        let templates =
            inline_patch_sets(&request.revision.spec).map_err(ComposeError::at(Stage::Inline))?;

        let associations = self
            .associator
            .associate_templates(composite, &templates)
            .await
            .map_err(ComposeError::at(Stage::Associate))?;

        let mut result = CompositionResult::default();
        let mut refs: Vec<ObjectReference> = Vec::with_capacity(associations.len());
        let mut rendered: Vec<(&TemplateAssociation, Composed)> =
            Vec::with_capacity(associations.len());

        for (index, association) in associations.iter().enumerate() {
            let template = &association.template;
            let display_name = template.display_name(index);

            let mut composed = self
                .observe(association.reference.as_ref())
                .await
                .map_err(ComposeError::at(Stage::Observe))?;

            match self
                .composed_renderer
                .render(composite, &mut composed, template, &request.environment)
                .await
            {
                Ok(()) => {
                    refs.push(composed.object_reference());
                    rendered.push((association, composed));
                }
                Err(e) if e.is_identity_conflict() => {
                    return Err(ComposeError::at(Stage::RenderComposed)(e));
                }
                Err(e) => {
                    warn!(template = %display_name, error = %e, "cannot render composed resource");
                    result.events.push(Event::warning(
                        reasons::CANNOT_COMPOSE_RESOURCES,
                        format!("cannot compose resource {display_name}: {e}"),
                    ));
                    // Keep the previous reference so the resource stays owned.
                    if let Some(reference) = &association.reference {
                        refs.push(reference.clone());
                    }
                }
            }
        }

        // Every resource is referenced before any of them is created, so a
        // failure below can never leave an unreferenced resource behind.
        composite
            .set_resource_refs(&refs)
            .map_err(|source| ComposeError::Resource {
                resource: composite.name_any(),
                source,
            })
            .map_err(ComposeError::at(Stage::Update))?;
        self.applicator
            .apply(composite)
            .await
            .map_err(ComposeError::at(Stage::Update))?;

        for (association, mut composed) in rendered {
            let template = &association.template;

            self.composite_renderer
                .render(composite, &mut composed, template, &request.environment)
                .await
                .map_err(ComposeError::at(Stage::RenderComposite))?;

            self.applicator
                .apply(&mut composed)
                .await
                .map_err(ComposeError::at(Stage::Apply))?;

            let fetched = self
                .details_fetcher
                .fetch_connection_details(&composed)
                .await
                .map_err(ComposeError::at(Stage::FetchDetails))?;

            let extracted = self
                .details_extractor
                .extract_connection_details(&composed, &fetched, &template.connection_details)
                .map_err(ComposeError::at(Stage::ExtractDetails))?;

            let ready = self
                .readiness_checker
                .check_readiness(&composed, &template.readiness_checks)
                .map_err(ComposeError::at(Stage::Readiness))?;

            debug!(
                template = %template.name.as_deref().unwrap_or_default(),
                kind = composed.kind(),
                name = %composed.name_any(),
                ready,
                "composed resource"
            );

            result.connection_details.extend(extracted);
            result.composed.push(ComposedResource {
                resource_name: template.name.clone().unwrap_or_default(),
                object: composed,
                ready,
            });
        }

        self.persist_composite(composite)
            .await
            .map_err(ComposeError::at(Stage::Update))?;

        info!(
            resources = result.composed.len(),
            ready = result.composed.iter().filter(|c| c.ready).count(),
            warnings = result.events.len(),
            "composed resources"
        );
        Ok(result)
    }

    /// The current state of a referenced composed resource, or an empty
    /// placeholder. A reference to a resource that no longer exists keeps its
    /// identity so the resource is recreated under the same name.
    async fn observe(&self, reference: Option<&ObjectReference>) -> Result<Composed> {
        let Some(reference) = reference else {
            return Ok(Composed::empty());
        };
        match self.store.get(reference).await {
            Ok(Some(obj)) => Ok(Composed::new(obj)),
            Ok(None) => Ok(Composed::from_reference(reference)),
            Err(e) if e.is_not_found() => Ok(Composed::from_reference(reference)),
            Err(source) => Err(ComposeError::GetComposed {
                reference: describe(reference),
                source,
            }),
        }
    }

    /// Upsert the composite, then write its rendered status through the
    /// status subresource when the main resource endpoint did not keep it.
    async fn persist_composite(&self, composite: &mut Composite) -> Result<()> {
        let status = composite.data.get("status").cloned();
        self.applicator.apply(composite).await?;

        let Some(status) = status else {
            return Ok(());
        };
        if composite.data.get("status") == Some(&status) {
            return Ok(());
        }
        let patch = json!({ "status": status });
        let updated = self
            .store
            .patch_status(composite, &patch)
            .await
            .map_err(ComposeError::store("patch status"))?;
        **composite = updated;
        Ok(())
    }
}
