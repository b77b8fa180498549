//! Composite reconciliation
//!
//! One reconcile pass composes the composite's resources, records the
//! resulting events, publishes the composite's connection details, and
//! reflects overall readiness in the composite's `Ready` condition.
//!
//! Choosing the composition revision is the caller's job; the reconciler is
//! handed a [`CompositionRequest`] along with the composite.

use std::sync::Arc;
use std::time::Duration;

use kube::api::DynamicObject;
use kube::runtime::controller::Action;
use kube::ResourceExt;
use serde_json::json;
use tracing::{debug, error, info, instrument, warn};

use tessera_common::crd::Condition;
use tessera_common::events::{actions, reasons};
use tessera_common::resource::DynamicObjectExt;
use tessera_common::{Composite, Event, EventPublisher};

use crate::composer::{Composer, CompositionRequest, CompositionResult};
use crate::connection::SecretConnectionPublisher;
use crate::store::ObjectStore;
use crate::{ComposeError, Result};

/// How long to wait before re-checking a composite whose resources are not
/// all ready yet
const NOT_READY_REQUEUE: Duration = Duration::from_secs(15);

/// How long to wait before re-checking a ready composite
const READY_REQUEUE: Duration = Duration::from_secs(60);

/// Requeue delay after a retryable error
const ERROR_REQUEUE: Duration = Duration::from_secs(30);

/// Dependencies of the composite reconciler
pub struct CompositeContext {
    /// Composes resources for composites
    pub composer: Composer,
    /// Object store used to persist the composite's status
    pub store: Arc<dyn ObjectStore>,
    /// Writes composite connection details
    pub publisher: SecretConnectionPublisher,
    /// Event publisher for emitting Kubernetes Events
    pub events: Arc<dyn EventPublisher>,
}

impl CompositeContext {
    /// Create a context whose composer and publisher use `store`
    pub fn new(
        store: Arc<dyn ObjectStore>,
        events: Arc<dyn EventPublisher>,
        default_secret_namespace: Option<String>,
    ) -> Self {
        Self {
            composer: Composer::new(store.clone()),
            publisher: SecretConnectionPublisher::new(store.clone(), default_secret_namespace),
            store,
            events,
        }
    }

    /// Replace the composer
    pub fn with_composer(mut self, composer: Composer) -> Self {
        self.composer = composer;
        self
    }
}

/// Reconcile a composite against a composition revision
#[instrument(skip_all, fields(composite = %composite.name_any()))]
pub async fn reconcile(
    composite: Arc<DynamicObject>,
    request: &CompositionRequest,
    ctx: Arc<CompositeContext>,
) -> Result<Action> {
    let mut xr = Composite::new((*composite).clone());
    let reference = xr.object_reference();

    let result = match ctx.composer.compose(&mut xr, request).await {
        Ok(result) => result,
        Err(e) => {
            ctx.events
                .publish(
                    &reference,
                    &Event::warning(reasons::CANNOT_COMPOSE_RESOURCES, e.to_string()),
                    actions::COMPOSE,
                )
                .await;
            return Err(e);
        }
    };

    for event in &result.events {
        ctx.events.publish(&reference, event, actions::COMPOSE).await;
    }

    publish_connection_details(&xr, &result, &ctx).await?;

    let ready = result.all_ready();
    let condition = ready_condition(&result);
    if xr.set_condition(condition).map_err(|source| ComposeError::Resource {
        resource: xr.name_any(),
        source,
    })? {
        let patch = json!({ "status": xr.data["status"] });
        ctx.store
            .patch_status(&xr, &patch)
            .await
            .map_err(ComposeError::store("patch status"))?;
        debug!(ready, "updated composite Ready condition");
    }

    if ready {
        info!(resources = result.composed.len(), "composite is ready");
        Ok(Action::requeue(READY_REQUEUE))
    } else {
        Ok(Action::requeue(NOT_READY_REQUEUE))
    }
}

async fn publish_connection_details(
    xr: &Composite,
    result: &CompositionResult,
    ctx: &CompositeContext,
) -> Result<()> {
    let reference = xr.object_reference();
    match ctx.publisher.publish(xr, &result.connection_details).await {
        Ok(true) => {
            ctx.events
                .publish(
                    &reference,
                    &Event::normal(
                        reasons::PUBLISH_CONNECTION_DETAILS,
                        "Successfully published connection details",
                    ),
                    actions::COMPOSE,
                )
                .await;
            Ok(())
        }
        Ok(false) => Ok(()),
        Err(e) => {
            warn!(error = %e, "cannot publish connection details");
            ctx.events
                .publish(
                    &reference,
                    &Event::warning(reasons::CANNOT_PUBLISH_CONNECTION_DETAILS, e.to_string()),
                    actions::COMPOSE,
                )
                .await;
            Err(e)
        }
    }
}

/// Ready=True when every composed resource is ready, otherwise Ready=False
/// naming the resources still being created
fn ready_condition(result: &CompositionResult) -> Condition {
    let pending: Vec<&str> = result
        .composed
        .iter()
        .filter(|c| !c.ready)
        .map(|c| c.resource_name.as_str())
        .collect();
    if pending.is_empty() {
        return Condition::available();
    }
    let names = pending
        .into_iter()
        .map(|n| if n.is_empty() { "(anonymous)" } else { n })
        .collect::<Vec<_>>()
        .join(", ");
    Condition::creating(format!("Unready resources: {names}"))
}

/// Error policy for the composite reconciler
///
/// Retryable errors (transient store failures) requeue after 30 seconds.
/// Everything else needs a change to the composite or its composition.
pub fn error_policy(
    composite: Arc<DynamicObject>,
    error: &ComposeError,
    _ctx: Arc<CompositeContext>,
) -> Action {
    error!(
        ?error,
        composite = %composite.name_any(),
        stage = ?error.stage(),
        retryable = error.is_retryable(),
        "reconciliation failed"
    );

    if error.is_retryable() {
        Action::requeue(ERROR_REQUEUE)
    } else {
        Action::await_change()
    }
}
