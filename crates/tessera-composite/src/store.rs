//! Object store seam
//!
//! The composer reads and writes arbitrary kinds, so it talks to the API
//! server through [`ObjectStore`] rather than typed `Api<K>` handles. Tests
//! substitute the mockall-generated `MockObjectStore` or an in-memory store.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::api::{DeleteParams, DynamicObject, Patch, PatchParams, PostParams};
use kube::Client;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use tessera_common::kube_utils::api_for;
use tessera_common::resource::DynamicObjectExt;
use tessera_common::{Composed, Error, Result, FIELD_MANAGER};

/// CRUD access to objects of any kind
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Get the referenced object; `None` if it does not exist
    async fn get(&self, reference: &ObjectReference) -> Result<Option<DynamicObject>>;

    /// Create an object. With `dry_run` the server validates the request and
    /// allocates a name but persists nothing.
    async fn create(&self, obj: &DynamicObject, dry_run: bool) -> Result<DynamicObject>;

    /// Replace an object
    async fn update(&self, obj: &DynamicObject) -> Result<DynamicObject>;

    /// Apply a JSON merge patch to an object
    async fn patch(&self, obj: &DynamicObject, patch: &serde_json::Value) -> Result<DynamicObject>;

    /// Apply a JSON merge patch to an object's status subresource
    async fn patch_status(
        &self,
        obj: &DynamicObject,
        patch: &serde_json::Value,
    ) -> Result<DynamicObject>;

    /// Delete an object; deleting an object that is already gone succeeds
    async fn delete(&self, obj: &DynamicObject) -> Result<()>;
}

/// [`ObjectStore`] backed by the Kubernetes API server
#[derive(Clone)]
pub struct KubeObjectStore {
    client: Client,
}

impl KubeObjectStore {
    /// Create a store using the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn post_params(dry_run: bool) -> PostParams {
        PostParams {
            dry_run,
            field_manager: Some(FIELD_MANAGER.to_string()),
        }
    }

    fn patch_params() -> PatchParams {
        PatchParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        }
    }
}

fn required_name(obj: &DynamicObject) -> Result<&str> {
    obj.metadata
        .name
        .as_deref()
        .filter(|n| !n.is_empty())
        .ok_or_else(|| Error::validation_for(obj.kind().to_string(), "object has no name"))
}

#[async_trait]
impl ObjectStore for KubeObjectStore {
    async fn get(&self, reference: &ObjectReference) -> Result<Option<DynamicObject>> {
        let placeholder = Composed::from_reference(reference).into_inner();
        let name = required_name(&placeholder)?;
        let api = api_for(&self.client, &placeholder)?;
        Ok(api.get_opt(name).await?)
    }

    async fn create(&self, obj: &DynamicObject, dry_run: bool) -> Result<DynamicObject> {
        let api = api_for(&self.client, obj)?;
        let created = api.create(&Self::post_params(dry_run), obj).await?;
        debug!(
            kind = obj.kind(),
            name = created.metadata.name.as_deref().unwrap_or_default(),
            dry_run,
            "created object"
        );
        Ok(created)
    }

    async fn update(&self, obj: &DynamicObject) -> Result<DynamicObject> {
        let name = required_name(obj)?;
        let api = api_for(&self.client, obj)?;
        Ok(api.replace(name, &Self::post_params(false), obj).await?)
    }

    async fn patch(&self, obj: &DynamicObject, patch: &serde_json::Value) -> Result<DynamicObject> {
        let name = required_name(obj)?;
        let api = api_for(&self.client, obj)?;
        Ok(api
            .patch(name, &Self::patch_params(), &Patch::Merge(patch))
            .await?)
    }

    async fn patch_status(
        &self,
        obj: &DynamicObject,
        patch: &serde_json::Value,
    ) -> Result<DynamicObject> {
        let name = required_name(obj)?;
        let api = api_for(&self.client, obj)?;
        Ok(api
            .patch_status(name, &Self::patch_params(), &Patch::Merge(patch))
            .await?)
    }

    async fn delete(&self, obj: &DynamicObject) -> Result<()> {
        let name = required_name(obj)?;
        let api = api_for(&self.client, obj)?;
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                debug!(kind = obj.kind(), name, "object already deleted");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
