//! Composition error types
//!
//! Leaf variants say what went wrong; [`ComposeError::Stage`] records which
//! step of a composition it went wrong in. The composer wraps every fatal
//! error in exactly one stage, so callers can branch on
//! [`ComposeError::stage`] instead of matching on messages.

use std::fmt;

use tessera_common::crd::{PatchType, ReadinessCheckType};

/// Step of a composition a fatal error occurred in
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    /// Expanding `PatchSet` patches into templates
    Inline,
    /// Matching templates with existing composed resources
    Associate,
    /// Reading the current state of a referenced composed resource
    Observe,
    /// Establishing the identity and ownership of a composed resource
    RenderComposed,
    /// Patching the composite from a composed resource
    RenderComposite,
    /// Creating or patching a composed resource
    Apply,
    /// Reading a composed resource's connection secret
    FetchDetails,
    /// Deriving connection details from a composed resource
    ExtractDetails,
    /// Evaluating readiness checks
    Readiness,
    /// Persisting the composite
    Update,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Inline => "cannot inline composition patch sets",
            Stage::Associate => "cannot associate composed resources with composition resource templates",
            Stage::Observe => "cannot observe composed resource",
            Stage::RenderComposed => "cannot render composed resource",
            Stage::RenderComposite => "cannot render composite resource",
            Stage::Apply => "cannot apply composed resource",
            Stage::FetchDetails => "cannot fetch connection details",
            Stage::ExtractDetails => "cannot extract composite resource connection details from composed resource",
            Stage::Readiness => "cannot check whether composed resource is ready",
            Stage::Update => "cannot update composite resource",
        };
        f.write_str(s)
    }
}

/// Errors produced while composing resources for a composite
#[derive(Debug, thiserror::Error)]
pub enum ComposeError {
    /// A template references a patch set the revision does not define
    #[error("cannot find PatchSet by name {name}")]
    UndefinedPatchSet {
        /// Name of the missing patch set
        name: String,
    },

    /// A patch set contains a `PatchSet` patch
    #[error("cannot define nested patch sets: patch set {name} contains a PatchSet patch")]
    NestedPatchSet {
        /// Name of the offending patch set
        name: String,
    },

    /// A `PatchSet` patch has no `patchSetName`
    #[error("PatchSet patch in template {template} has no patchSetName")]
    MissingPatchSetName {
        /// Template the patch belongs to
        template: String,
    },

    /// A referenced composed resource could not be read
    #[error("cannot get composed resource {reference}: {source}")]
    GetComposed {
        /// Human-readable reference to the resource
        reference: String,
        /// Underlying store error
        source: tessera_common::Error,
    },

    /// An orphaned composed resource could not be deleted
    #[error("cannot garbage collect composed resource {name}: {source}")]
    GarbageCollect {
        /// Name of the orphan
        name: String,
        /// Underlying store error
        source: tessera_common::Error,
    },

    /// A template base could not be turned into an object
    #[error("cannot unmarshal base template: {message}")]
    Unmarshal {
        /// What was wrong with the base
        message: String,
    },

    /// Rendering would change the kind of an existing composed resource
    #[error("cannot change the kind of a composed resource from {from} to {to} (composed resource kinds are immutable)")]
    KindChanged {
        /// Kind the resource already has
        from: String,
        /// Kind the template renders
        to: String,
    },

    /// The composite has no (or an empty) name prefix label
    #[error("composite resource is missing the tessera.dev/composite name prefix label")]
    MissingNamePrefix,

    /// The server could not allocate a name for a composed resource
    #[error("cannot generate a name for composed resource: {source}")]
    Name {
        /// Underlying store error
        source: tessera_common::Error,
    },

    /// A composed resource is controlled by someone else
    #[error("cannot set controller reference: {kind} {name} is already controlled by {owner_kind} {owner_name} (UID {owner_uid})")]
    ControllerConflict {
        /// Kind of the composed resource
        kind: String,
        /// Name of the composed resource
        name: String,
        /// Kind of the existing controller
        owner_kind: String,
        /// Name of the existing controller
        owner_name: String,
        /// UID of the existing controller
        owner_uid: String,
    },

    /// A patch could not be applied
    #[error("cannot apply the {patch_type} patch at index {index}: {source}")]
    Patch {
        /// Position of the patch in its template
        index: usize,
        /// Type of the patch
        patch_type: PatchType,
        /// Underlying field path error
        source: tessera_common::Error,
    },

    /// A connection detail is misconfigured or unreadable
    #[error("connection detail at index {index}: {message}")]
    ConnectionDetail {
        /// Position of the detail in its template
        index: usize,
        /// What went wrong
        message: String,
    },

    /// A readiness check is misconfigured or unreadable
    #[error("readiness check at index {index} ({check_type}): {message}")]
    Readiness {
        /// Position of the check in its template
        index: usize,
        /// Type of the check
        check_type: ReadinessCheckType,
        /// What went wrong
        message: String,
    },

    /// An object could not be converted to or from its JSON form
    #[error("cannot process resource {resource}: {source}")]
    Resource {
        /// Name or kind of the resource
        resource: String,
        /// Underlying error
        source: tessera_common::Error,
    },

    /// An object store call failed
    #[error("cannot {operation} object: {source}")]
    Store {
        /// The store operation ("get", "create", "patch", ...)
        operation: &'static str,
        /// Underlying store error
        source: tessera_common::Error,
    },

    /// A fatal error, tagged with the composition step it occurred in
    #[error("{stage}: {source}")]
    Stage {
        /// Step the error occurred in
        stage: Stage,
        /// The error itself
        source: Box<ComposeError>,
    },
}

impl ComposeError {
    /// Returns a closure that wraps an error in the given stage, for `map_err`
    pub fn at(stage: Stage) -> impl FnOnce(ComposeError) -> ComposeError {
        move |source| ComposeError::Stage {
            stage,
            source: Box::new(source),
        }
    }

    /// Create a store error for the given operation
    pub fn store(operation: &'static str) -> impl FnOnce(tessera_common::Error) -> ComposeError {
        move |source| ComposeError::Store { operation, source }
    }

    /// The stage this error was tagged with, if any
    pub fn stage(&self) -> Option<Stage> {
        match self {
            ComposeError::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// Whether a composed render failure must abort the composition rather
    /// than skip the template
    ///
    /// A resource controlled by another owner must never be taken over.
    pub fn is_identity_conflict(&self) -> bool {
        matches!(self.root(), ComposeError::ControllerConflict { .. })
    }

    /// The error with any stage wrapping removed
    pub fn root(&self) -> &ComposeError {
        match self {
            ComposeError::Stage { source, .. } => source.root(),
            other => other,
        }
    }

    /// Check if this error is retryable
    ///
    /// Store failures inherit the retryability of the underlying error.
    /// Template and configuration problems need a revision fix and are not
    /// retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            ComposeError::Stage { source, .. } => source.is_retryable(),
            ComposeError::GetComposed { source, .. }
            | ComposeError::GarbageCollect { source, .. }
            | ComposeError::Name { source }
            | ComposeError::Store { source, .. } => source.is_retryable(),
            ComposeError::UndefinedPatchSet { .. }
            | ComposeError::NestedPatchSet { .. }
            | ComposeError::MissingPatchSetName { .. }
            | ComposeError::Unmarshal { .. }
            | ComposeError::KindChanged { .. }
            | ComposeError::MissingNamePrefix
            | ComposeError::ControllerConflict { .. }
            | ComposeError::Patch { .. }
            | ComposeError::ConnectionDetail { .. }
            | ComposeError::Readiness { .. }
            | ComposeError::Resource { .. } => false,
        }
    }
}
