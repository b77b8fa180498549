//! Composition engine for Tessera composites
//!
//! Given a composite resource and a composition revision, the [`Composer`]
//! renders, applies, and garbage collects the composed resources that make
//! up the composite, and derives the composite's connection details and
//! readiness from them.
//!
//! Every collaborator sits behind a trait so it can be replaced or mocked:
//!
//! - [`ObjectStore`]: reads and writes objects of any kind
//! - [`Associator`]: pairs templates with existing composed resources
//! - [`Renderer`]: renders composed resources and the composite
//! - [`ConnectionDetailsFetcher`] / [`ConnectionDetailsExtractor`]
//! - [`ReadinessChecker`]
//!
//! # Running in a controller
//!
//! A controller embedding the engine initializes logging once, builds a
//! [`CompositeContext`] over the cluster, and calls [`reconcile`] for each
//! composite with the revision it selected:
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use kube::api::DynamicObject;
//! use tessera_common::telemetry::{init_telemetry, TelemetryConfig};
//! use tessera_common::KubeEventPublisher;
//! use tessera_composite::{reconcile, CompositeContext, CompositionRequest, KubeObjectStore};
//!
//! async fn run(
//!     composite: Arc<DynamicObject>,
//!     request: CompositionRequest,
//! ) -> Result<(), Box<dyn std::error::Error>> {
//!     init_telemetry(TelemetryConfig::default())?;
//!     let client = kube::Client::try_default().await?;
//!     let ctx = Arc::new(CompositeContext::new(
//!         Arc::new(KubeObjectStore::new(client.clone())),
//!         Arc::new(KubeEventPublisher::new(client, "tessera-composite")),
//!         None,
//!     ));
//!     let action = reconcile(composite, &request, ctx).await?;
//!     tracing::info!(?action, "reconciled composite");
//!     Ok(())
//! }
//! ```

#![deny(missing_docs)]

pub mod apply;
pub mod associate;
pub mod composer;
pub mod connection;
mod error;
pub mod patch;
pub mod patchset;
pub mod ready;
pub mod reconciler;
pub mod render;
pub mod store;

pub use apply::PatchingApplicator;
pub use associate::{
    associate_by_order, Associator, GarbageCollectingAssociator, OrderAssociator,
    TemplateAssociation,
};
pub use composer::{
    ComposedResource, Composer, ComposerConfig, CompositionRequest, CompositionResult,
};
pub use connection::{
    ConfiguredExtractor, ConnectionDetailExtractConfig, ConnectionDetails,
    ConnectionDetailsExtractor, ConnectionDetailsFetcher, SecretConnectionDetailsFetcher,
    SecretConnectionPublisher,
};
pub use error::{ComposeError, Stage};
pub use patchset::inline_patch_sets;
pub use ready::{ConfiguredReadinessChecker, ReadinessChecker};
pub use reconciler::{error_policy, reconcile, CompositeContext};
pub use render::{CompositeRenderer, DryRunRenderer, Environment, Renderer};
pub use store::{KubeObjectStore, ObjectStore};

/// Result type for composition operations
pub type Result<T, E = ComposeError> = std::result::Result<T, E>;
