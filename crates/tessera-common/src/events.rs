//! Kubernetes Event recording for composites.
//!
//! Composition produces [`Event`]s as plain values so the caller decides
//! when (and whether) to publish them. Publishing goes through the
//! [`EventPublisher`] trait, an abstraction over
//! `kube::runtime::events::Recorder`.
//!
//! Publishing is **fire-and-forget**: failures are logged as warnings and never
//! propagate errors. A failed event must never break reconciliation.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{EventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

/// An event about a composite, produced during composition
#[derive(Clone, Debug)]
pub struct Event {
    /// Normal or Warning
    pub type_: EventType,
    /// Machine-readable reason string (e.g. "CannotComposeResources")
    pub reason: String,
    /// Human-readable message
    pub message: String,
}

impl Event {
    /// A Warning event
    pub fn warning(reason: &str, message: impl Into<String>) -> Self {
        Self {
            type_: EventType::Warning,
            reason: reason.to_string(),
            message: message.into(),
        }
    }

    /// A Normal event
    pub fn normal(reason: &str, message: impl Into<String>) -> Self {
        Self {
            type_: EventType::Normal,
            reason: reason.to_string(),
            message: message.into(),
        }
    }

    /// Whether this is a Warning event
    pub fn is_warning(&self) -> bool {
        matches!(self.type_, EventType::Warning)
    }
}

/// Trait for publishing Kubernetes Events.
///
/// Implementations are expected to be fire-and-forget: `publish()` logs a
/// warning on failure but never returns an error.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish a Kubernetes Event on the given resource.
    ///
    /// # Arguments
    ///
    /// * `resource_ref` - The Kubernetes object this event is about
    /// * `event` - Type, reason, and message of the event
    /// * `action` - What action was taken (e.g. "Compose")
    async fn publish(&self, resource_ref: &ObjectReference, event: &Event, action: &str);
}

/// Production implementation wrapping `kube::runtime::events::Recorder`.
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    /// Create a new publisher for the given controller name.
    ///
    /// The controller name appears as the "reportingComponent" on Events
    /// (e.g. "tessera-composite-controller").
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: None,
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(&self, resource_ref: &ObjectReference, event: &Event, action: &str) {
        let kube_event = kube::runtime::events::Event {
            type_: event.type_,
            reason: event.reason.clone(),
            note: Some(event.message.clone()),
            action: action.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&kube_event, resource_ref).await {
            warn!(
                reason = %event.reason,
                action,
                error = %e,
                "Failed to publish Kubernetes event"
            );
        }
    }
}

/// No-op implementation for tests.
pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn publish(&self, _resource_ref: &ObjectReference, _event: &Event, _action: &str) {}
}

/// Well-known event reason strings.
///
/// These appear in `kubectl get events` under the REASON column.
pub mod reasons {
    /// A composed resource could not be rendered or applied
    pub const CANNOT_COMPOSE_RESOURCES: &str = "CannotComposeResources";
    /// Composed resources were applied
    pub const COMPOSE_RESOURCES: &str = "ComposeResources";
    /// Connection details could not be written to the composite's secret
    pub const CANNOT_PUBLISH_CONNECTION_DETAILS: &str = "CannotPublishConnectionDetails";
    /// Connection details were written to the composite's secret
    pub const PUBLISH_CONNECTION_DETAILS: &str = "PublishConnectionDetails";
}

/// Well-known event action strings.
pub mod actions {
    /// Composing resources for a composite
    pub const COMPOSE: &str = "Compose";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_publisher_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<NoopEventPublisher>();
    }

    #[test]
    fn event_constructors_set_type() {
        let warning = Event::warning(reasons::CANNOT_COMPOSE_RESOURCES, "boom");
        assert!(warning.is_warning());
        assert_eq!(warning.reason, "CannotComposeResources");
        assert_eq!(warning.message, "boom");

        let normal = Event::normal(reasons::COMPOSE_RESOURCES, "ok");
        assert!(!normal.is_warning());
    }

    #[tokio::test]
    async fn noop_publisher_does_not_panic() {
        let publisher = NoopEventPublisher;
        publisher
            .publish(
                &ObjectReference::default(),
                &Event::normal(reasons::COMPOSE_RESOURCES, "test"),
                actions::COMPOSE,
            )
            .await;
    }
}
