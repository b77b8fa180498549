//! Create-or-patch of composed and composite resources

use std::sync::Arc;

use kube::api::DynamicObject;
use kube::ResourceExt;
use tracing::debug;

use tessera_common::resource::DynamicObjectExt;

use crate::store::ObjectStore;
use crate::{ComposeError, Result};

/// Applies objects with a JSON merge patch, creating them when absent.
///
/// Objects with no name but a `generateName` are always created, letting the
/// server pick the name.
#[derive(Clone)]
pub struct PatchingApplicator {
    store: Arc<dyn ObjectStore>,
}

impl PatchingApplicator {
    /// Create an applicator writing through the given store
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Apply `obj`, replacing it with the object the server returns
    pub async fn apply(&self, obj: &mut DynamicObject) -> Result<()> {
        let unnamed = obj.metadata.name.as_deref().unwrap_or_default().is_empty();
        if unnamed && obj.metadata.generate_name.is_some() {
            return self.create(obj).await;
        }

        let existing = self
            .store
            .get(&obj.object_reference())
            .await
            .map_err(ComposeError::store("get"))?;
        if existing.is_none() {
            return self.create(obj).await;
        }

        let patch = obj.to_json().map_err(|source| ComposeError::Resource {
            resource: obj.name_any(),
            source,
        })?;
        *obj = self
            .store
            .patch(obj, &patch)
            .await
            .map_err(ComposeError::store("patch"))?;
        debug!(kind = obj.kind(), name = %obj.name_any(), "patched object");
        Ok(())
    }

    async fn create(&self, obj: &mut DynamicObject) -> Result<()> {
        *obj = self
            .store
            .create(obj, false)
            .await
            .map_err(ComposeError::store("create"))?;
        debug!(kind = obj.kind(), name = %obj.name_any(), "created object");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MockObjectStore;
    use serde_json::json;
    use tessera_common::resource::object_from_json;

    fn bucket(name: Option<&str>) -> DynamicObject {
        let mut metadata = json!({"generateName": "ola-"});
        if let Some(name) = name {
            metadata["name"] = json!(name);
        }
        object_from_json(json!({
            "apiVersion": "s3.example.org/v1",
            "kind": "Bucket",
            "metadata": metadata,
            "spec": {"region": "us-east-1"},
        }))
        .unwrap()
    }

    fn boom() -> tessera_common::Error {
        tessera_common::Error::internal("boom")
    }

    #[tokio::test]
    async fn unnamed_objects_with_generate_name_are_created() {
        let mut store = MockObjectStore::new();
        store.expect_get().never();
        store
            .expect_create()
            .withf(|_, dry_run| !*dry_run)
            .returning(|obj, _| {
                let mut created = obj.clone();
                created.metadata.name = Some("ola-abcde".into());
                Ok(created)
            });

        let mut obj = bucket(None);
        PatchingApplicator::new(Arc::new(store))
            .apply(&mut obj)
            .await
            .unwrap();
        assert_eq!(obj.metadata.name.as_deref(), Some("ola-abcde"));
    }

    #[tokio::test]
    async fn missing_named_objects_are_created() {
        let mut store = MockObjectStore::new();
        store.expect_get().returning(|_| Ok(None));
        store.expect_create().times(1).returning(|obj, _| Ok(obj.clone()));
        store.expect_patch().never();

        let mut obj = bucket(Some("ola-abcde"));
        PatchingApplicator::new(Arc::new(store))
            .apply(&mut obj)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn existing_objects_are_merge_patched() {
        let mut store = MockObjectStore::new();
        store
            .expect_get()
            .returning(|_| Ok(Some(bucket(Some("ola-abcde")))));
        store
            .expect_patch()
            .withf(|_, patch| patch["spec"]["region"] == "us-east-1")
            .returning(|obj, _| {
                let mut patched = obj.clone();
                patched.metadata.resource_version = Some("2".into());
                Ok(patched)
            });

        let mut obj = bucket(Some("ola-abcde"));
        PatchingApplicator::new(Arc::new(store))
            .apply(&mut obj)
            .await
            .unwrap();
        assert_eq!(obj.metadata.resource_version.as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn store_errors_name_the_failed_operation() {
        let mut store = MockObjectStore::new();
        store.expect_get().returning(|_| Err(boom()));
        let err = PatchingApplicator::new(Arc::new(store))
            .apply(&mut bucket(Some("ola-abcde")))
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("cannot get object"));

        let mut store = MockObjectStore::new();
        store.expect_create().returning(|_, _| Err(boom()));
        let err = PatchingApplicator::new(Arc::new(store))
            .apply(&mut bucket(None))
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("cannot create object"));

        let mut store = MockObjectStore::new();
        store
            .expect_get()
            .returning(|_| Ok(Some(bucket(Some("ola-abcde")))));
        store.expect_patch().returning(|_, _| Err(boom()));
        let err = PatchingApplicator::new(Arc::new(store))
            .apply(&mut bucket(Some("ola-abcde")))
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("cannot patch object"));
    }
}
