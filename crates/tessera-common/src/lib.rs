//! Common types for Tessera: composition CRDs, resource wrappers, errors, and utilities

#![deny(missing_docs)]

pub mod crd;
pub mod error;
pub mod events;
pub mod fieldpath;
pub mod kube_utils;
pub mod resource;
pub mod telemetry;

pub use error::Error;
pub use events::{Event, EventPublisher, KubeEventPublisher, NoopEventPublisher};
pub use resource::{Composed, Composite};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Field manager recorded on every object the composer creates or patches
pub const FIELD_MANAGER: &str = "tessera-composer";

/// Label carrying the prefix used to generate names for composed resources.
///
/// Set on every composite; copied onto composed resources so that a composed
/// resource which is itself a composite can name its own children.
pub const LABEL_NAME_PREFIX: &str = "tessera.dev/composite";

/// Label naming the claim a composite was created for
pub const LABEL_CLAIM_NAME: &str = "tessera.dev/claim-name";

/// Label naming the namespace of the claim a composite was created for
pub const LABEL_CLAIM_NAMESPACE: &str = "tessera.dev/claim-namespace";

/// Annotation recording the name of the template a composed resource was rendered from
pub const ANNOTATION_COMPOSITION_RESOURCE_NAME: &str = "tessera.dev/composition-resource-name";
