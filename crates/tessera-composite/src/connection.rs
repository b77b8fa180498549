//! Connection details
//!
//! Composed resources expose credentials and endpoints through a connection
//! secret. For each composed resource the composer fetches that secret,
//! extracts the details its template asks for, and merges them into the
//! composite's details, which [`SecretConnectionPublisher`] then writes to
//! the composite's own connection secret.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ObjectReference, Secret};
use k8s_openapi::ByteString;
use kube::ResourceExt;
use serde_json::{json, Value};
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

use tessera_common::crd::{ConnectionDetail, ConnectionDetailType};
use tessera_common::fieldpath;
use tessera_common::resource::{object_from_json, ConnectionSecretRef, DynamicObjectExt};
use tessera_common::{Composed, Composite};

use crate::store::ObjectStore;
use crate::{ComposeError, Result};

/// Connection details keyed by name
pub type ConnectionDetails = BTreeMap<String, Vec<u8>>;

fn secret_reference(secret_ref: &ConnectionSecretRef, default_namespace: Option<&str>) -> ObjectReference {
    ObjectReference {
        api_version: Some("v1".to_string()),
        kind: Some("Secret".to_string()),
        name: Some(secret_ref.name.clone()),
        namespace: secret_ref
            .namespace
            .clone()
            .or_else(|| default_namespace.map(String::from)),
        ..Default::default()
    }
}

fn resource_error(obj: &kube::api::DynamicObject, source: tessera_common::Error) -> ComposeError {
    ComposeError::Resource {
        resource: obj.name_any(),
        source,
    }
}

// =============================================================================
// Fetching
// =============================================================================

/// Reads the connection details a composed resource has published
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ConnectionDetailsFetcher: Send + Sync {
    /// Fetch the details from the resource's connection secret
    async fn fetch_connection_details(&self, composed: &Composed) -> Result<ConnectionDetails>;
}

/// Fetches connection details from the secret named by
/// `spec.writeConnectionSecretToRef`
#[derive(Clone)]
pub struct SecretConnectionDetailsFetcher {
    store: Arc<dyn ObjectStore>,
}

impl SecretConnectionDetailsFetcher {
    /// Create a fetcher reading secrets through the given store
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ConnectionDetailsFetcher for SecretConnectionDetailsFetcher {
    async fn fetch_connection_details(&self, composed: &Composed) -> Result<ConnectionDetails> {
        let Some(secret_ref) = composed
            .connection_secret_ref()
            .map_err(|e| resource_error(composed, e))?
        else {
            return Ok(ConnectionDetails::new());
        };

        let reference = secret_reference(&secret_ref, composed.metadata.namespace.as_deref());
        let obj = match self.store.get(&reference).await {
            Ok(Some(obj)) => obj,
            Ok(None) => {
                debug!(secret = %secret_ref.name, "connection secret does not exist yet");
                return Ok(ConnectionDetails::new());
            }
            Err(e) if e.is_not_found() => return Ok(ConnectionDetails::new()),
            Err(e) => return Err(ComposeError::store("get")(e)),
        };

        let secret: Secret = obj
            .to_json()
            .and_then(|v| Ok(serde_json::from_value(v)?))
            .map_err(|e| resource_error(&obj, e))?;
        Ok(secret
            .data
            .unwrap_or_default()
            .into_iter()
            .map(|(k, ByteString(v))| (k, v))
            .collect())
    }
}

// =============================================================================
// Extraction
// =============================================================================

/// Derives composite connection details from a composed resource
#[cfg_attr(test, automock)]
pub trait ConnectionDetailsExtractor: Send + Sync {
    /// Extract the details `configs` ask for from `composed` and its
    /// fetched connection secret
    fn extract_connection_details(
        &self,
        composed: &Composed,
        fetched: &ConnectionDetails,
        configs: &[ConnectionDetail],
    ) -> Result<ConnectionDetails>;
}

/// A validated connection detail with its type resolved
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectionDetailExtractConfig {
    /// Copy `key` from the fetched secret, storing it as `name`
    FromConnectionSecretKey {
        /// Key in the composite's details
        name: String,
        /// Key in the composed resource's secret
        key: String,
    },
    /// Read `path` from the composed resource
    FromFieldPath {
        /// Key in the composite's details
        name: String,
        /// Field path to read
        path: String,
    },
    /// A literal value
    FromValue {
        /// Key in the composite's details
        name: String,
        /// The value
        value: String,
    },
}

impl ConnectionDetailExtractConfig {
    /// Validate a connection detail, inferring its type when unset.
    ///
    /// A `FromConnectionSecretKey` detail without a name is stored under its
    /// key.
    pub fn from_detail(index: usize, detail: &ConnectionDetail) -> Result<Self> {
        let err = |message: &str| ComposeError::ConnectionDetail {
            index,
            message: message.to_string(),
        };

        let detail_type = detail
            .type_
            .or_else(|| infer_type(detail))
            .ok_or_else(|| err("cannot infer connection detail type: no value, key, or field path set"))?;

        match detail_type {
            ConnectionDetailType::FromConnectionSecretKey => {
                let key = detail
                    .from_connection_secret_key
                    .clone()
                    .ok_or_else(|| err("fromConnectionSecretKey is required"))?;
                Ok(Self::FromConnectionSecretKey {
                    name: detail.name.clone().unwrap_or_else(|| key.clone()),
                    key,
                })
            }
            ConnectionDetailType::FromFieldPath => Ok(Self::FromFieldPath {
                name: detail.name.clone().ok_or_else(|| err("name is required"))?,
                path: detail
                    .from_field_path
                    .clone()
                    .ok_or_else(|| err("fromFieldPath is required"))?,
            }),
            ConnectionDetailType::FromValue => Ok(Self::FromValue {
                name: detail.name.clone().ok_or_else(|| err("name is required"))?,
                value: detail.value.clone().ok_or_else(|| err("value is required"))?,
            }),
        }
    }
}

fn infer_type(detail: &ConnectionDetail) -> Option<ConnectionDetailType> {
    if detail.value.is_some() {
        Some(ConnectionDetailType::FromValue)
    } else if detail.from_connection_secret_key.is_some() {
        Some(ConnectionDetailType::FromConnectionSecretKey)
    } else if detail.from_field_path.is_some() {
        Some(ConnectionDetailType::FromFieldPath)
    } else {
        None
    }
}

/// Extracts connection details as configured on the template
#[derive(Clone, Copy, Debug, Default)]
pub struct ConfiguredExtractor;

impl ConnectionDetailsExtractor for ConfiguredExtractor {
    fn extract_connection_details(
        &self,
        composed: &Composed,
        fetched: &ConnectionDetails,
        configs: &[ConnectionDetail],
    ) -> Result<ConnectionDetails> {
        let mut out = ConnectionDetails::new();
        if configs.is_empty() {
            return Ok(out);
        }

        let json = composed.to_json().map_err(|e| resource_error(composed, e))?;
        for (index, detail) in configs.iter().enumerate() {
            match ConnectionDetailExtractConfig::from_detail(index, detail)? {
                ConnectionDetailExtractConfig::FromConnectionSecretKey { name, key } => {
                    if let Some(v) = fetched.get(&key) {
                        out.insert(name, v.clone());
                    }
                }
                ConnectionDetailExtractConfig::FromValue { name, value } => {
                    out.insert(name, value.into_bytes());
                }
                ConnectionDetailExtractConfig::FromFieldPath { name, path } => {
                    let value = fieldpath::get(&json, &path).map_err(|e| {
                        ComposeError::ConnectionDetail {
                            index,
                            message: e.to_string(),
                        }
                    })?;
                    match value {
                        Some(Value::String(s)) => {
                            out.insert(name, s.clone().into_bytes());
                        }
                        Some(other) => {
                            out.insert(name, other.to_string().into_bytes());
                        }
                        None => debug!(index, path = %path, "connection detail field is not set"),
                    }
                }
            }
        }
        Ok(out)
    }
}

// =============================================================================
// Publishing
// =============================================================================

/// Writes a composite's connection details to its connection secret
#[derive(Clone)]
pub struct SecretConnectionPublisher {
    store: Arc<dyn ObjectStore>,
    default_namespace: Option<String>,
}

impl SecretConnectionPublisher {
    /// Create a publisher writing secrets through the given store.
    ///
    /// `default_namespace` is used when the composite's secret reference has
    /// no namespace of its own.
    pub fn new(store: Arc<dyn ObjectStore>, default_namespace: Option<String>) -> Self {
        Self {
            store,
            default_namespace,
        }
    }

    /// Publish `details` to the composite's connection secret.
    ///
    /// Returns `true` if the secret was created or changed. Composites with
    /// no `spec.writeConnectionSecretToRef` publish nothing.
    pub async fn publish(&self, composite: &Composite, details: &ConnectionDetails) -> Result<bool> {
        let Some(secret_ref) = composite
            .connection_secret_ref()
            .map_err(|e| resource_error(composite, e))?
        else {
            return Ok(false);
        };
        let default_namespace = composite
            .metadata
            .namespace
            .as_deref()
            .or(self.default_namespace.as_deref());
        let reference = secret_reference(&secret_ref, default_namespace);

        let data: BTreeMap<String, ByteString> = details
            .iter()
            .map(|(k, v)| (k.clone(), ByteString(v.clone())))
            .collect();
        let mut desired = object_from_json(json!({
            "apiVersion": "v1",
            "kind": "Secret",
            "metadata": {
                "name": secret_ref.name,
                "namespace": reference.namespace,
            },
            "type": "connection.tessera.dev/v1",
            "data": data,
        }))
        .map_err(|source| ComposeError::Resource {
            resource: secret_ref.name.clone(),
            source,
        })?;
        desired
            .owner_references_mut()
            .push(composite.controller_owner_reference());

        match self
            .store
            .get(&reference)
            .await
            .map_err(ComposeError::store("get"))?
        {
            None => {
                self.store
                    .create(&desired, false)
                    .await
                    .map_err(ComposeError::store("create"))?;
                info!(secret = %secret_ref.name, keys = details.len(), "created connection secret");
                Ok(true)
            }
            Some(existing) if same_data(&existing.data, &desired.data) => Ok(false),
            Some(existing) => {
                desired.metadata.resource_version = existing.metadata.resource_version.clone();
                self.store
                    .update(&desired)
                    .await
                    .map_err(ComposeError::store("update"))?;
                info!(secret = %secret_ref.name, keys = details.len(), "updated connection secret");
                Ok(true)
            }
        }
    }
}

/// Secret data equality, where an absent or null `data` is an empty map
fn same_data(existing: &Value, desired: &Value) -> bool {
    let empty = Value::Object(Default::default());
    let data = |v: &Value| match v.get("data") {
        None | Some(Value::Null) => empty.clone(),
        Some(d) => d.clone(),
    };
    data(existing) == data(desired)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MockObjectStore;

    fn composed(spec: Value) -> Composed {
        Composed::new(
            object_from_json(json!({
                "apiVersion": "s3.example.org/v1",
                "kind": "Bucket",
                "metadata": {"name": "ola-abcde", "namespace": "team-a"},
                "spec": spec,
                "status": {"endpoint": "https://ola.example.org", "port": 443},
            }))
            .unwrap(),
        )
    }

    fn secret(data: Value) -> kube::api::DynamicObject {
        object_from_json(json!({
            "apiVersion": "v1",
            "kind": "Secret",
            "metadata": {"name": "conn", "namespace": "team-a", "resourceVersion": "7"},
            "data": data,
        }))
        .unwrap()
    }

    fn detail(name: Option<&str>) -> ConnectionDetail {
        ConnectionDetail {
            name: name.map(String::from),
            ..Default::default()
        }
    }

    // =========================================================================
    // Fetcher
    // =========================================================================

    #[tokio::test]
    async fn resource_without_secret_ref_has_no_details() {
        let mut store = MockObjectStore::new();
        store.expect_get().never();
        let got = SecretConnectionDetailsFetcher::new(Arc::new(store))
            .fetch_connection_details(&composed(json!({})))
            .await
            .unwrap();
        assert!(got.is_empty());
    }

    #[tokio::test]
    async fn secret_data_is_decoded() {
        let mut store = MockObjectStore::new();
        store
            .expect_get()
            .withf(|r| {
                r.kind.as_deref() == Some("Secret")
                    && r.name.as_deref() == Some("conn")
                    && r.namespace.as_deref() == Some("team-a")
            })
            .returning(|_| Ok(Some(secret(json!({"password": "aHVudGVyMg=="})))));

        let got = SecretConnectionDetailsFetcher::new(Arc::new(store))
            .fetch_connection_details(&composed(json!({"writeConnectionSecretToRef": {"name": "conn"}})))
            .await
            .unwrap();
        assert_eq!(got.get("password").map(Vec::as_slice), Some(b"hunter2".as_slice()));
    }

    #[tokio::test]
    async fn missing_secret_has_no_details_but_errors_are_fatal() {
        let mut store = MockObjectStore::new();
        store.expect_get().returning(|_| Ok(None));
        let fetcher = SecretConnectionDetailsFetcher::new(Arc::new(store));
        let cd = composed(json!({"writeConnectionSecretToRef": {"name": "conn"}}));
        assert!(fetcher.fetch_connection_details(&cd).await.unwrap().is_empty());

        let mut store = MockObjectStore::new();
        store
            .expect_get()
            .returning(|_| Err(tessera_common::Error::internal("boom")));
        let err = SecretConnectionDetailsFetcher::new(Arc::new(store))
            .fetch_connection_details(&cd)
            .await
            .unwrap_err();
        assert!(matches!(err, ComposeError::Store { operation: "get", .. }));
    }

    // =========================================================================
    // Extractor
    // =========================================================================

    #[test]
    fn extracts_each_detail_type() {
        let fetched = ConnectionDetails::from([
            ("password".to_string(), b"hunter2".to_vec()),
            ("username".to_string(), b"admin".to_vec()),
        ]);
        let configs = vec![
            ConnectionDetail {
                from_connection_secret_key: Some("password".into()),
                ..detail(Some("pw"))
            },
            ConnectionDetail {
                from_connection_secret_key: Some("username".into()),
                ..detail(None)
            },
            ConnectionDetail {
                from_connection_secret_key: Some("missing".into()),
                ..detail(None)
            },
            ConnectionDetail {
                value: Some("literal".into()),
                ..detail(Some("static"))
            },
            ConnectionDetail {
                from_field_path: Some("status.endpoint".into()),
                ..detail(Some("endpoint"))
            },
            ConnectionDetail {
                from_field_path: Some("status.port".into()),
                ..detail(Some("port"))
            },
            ConnectionDetail {
                from_field_path: Some("status.missing".into()),
                ..detail(Some("nope"))
            },
        ];

        let got = ConfiguredExtractor
            .extract_connection_details(&composed(json!({})), &fetched, &configs)
            .unwrap();

        let want = ConnectionDetails::from([
            ("pw".to_string(), b"hunter2".to_vec()),
            ("username".to_string(), b"admin".to_vec()),
            ("static".to_string(), b"literal".to_vec()),
            ("endpoint".to_string(), b"https://ola.example.org".to_vec()),
            ("port".to_string(), b"443".to_vec()),
        ]);
        assert_eq!(got, want);
    }

    #[test]
    fn explicit_type_wins_over_inference() {
        let d = ConnectionDetail {
            type_: Some(ConnectionDetailType::FromFieldPath),
            from_field_path: Some("status.endpoint".into()),
            value: Some("ignored".into()),
            ..detail(Some("endpoint"))
        };
        assert_eq!(
            ConnectionDetailExtractConfig::from_detail(0, &d).unwrap(),
            ConnectionDetailExtractConfig::FromFieldPath {
                name: "endpoint".into(),
                path: "status.endpoint".into(),
            }
        );
    }

    #[test]
    fn misconfigured_details_are_errors() {
        let cases = [
            detail(Some("no-source")),
            ConnectionDetail {
                value: Some("v".into()),
                ..detail(None)
            },
            ConnectionDetail {
                type_: Some(ConnectionDetailType::FromFieldPath),
                ..detail(Some("no-path"))
            },
            ConnectionDetail {
                type_: Some(ConnectionDetailType::FromConnectionSecretKey),
                ..detail(Some("no-key"))
            },
        ];
        for (i, d) in cases.iter().enumerate() {
            let err = ConfiguredExtractor
                .extract_connection_details(&composed(json!({})), &ConnectionDetails::new(), std::slice::from_ref(d))
                .unwrap_err();
            assert!(
                matches!(err, ComposeError::ConnectionDetail { index: 0, .. }),
                "case {i}: {err:?}"
            );
        }
    }

    // =========================================================================
    // Publisher
    // =========================================================================

    fn composite_with_secret() -> Composite {
        Composite::new(
            object_from_json(json!({
                "apiVersion": "example.org/v1",
                "kind": "XBucket",
                "metadata": {"name": "my-xr", "uid": "very-unique"},
                "spec": {"writeConnectionSecretToRef": {"name": "conn", "namespace": "team-a"}},
            }))
            .unwrap(),
        )
    }

    fn details() -> ConnectionDetails {
        ConnectionDetails::from([("password".to_string(), b"hunter2".to_vec())])
    }

    #[tokio::test]
    async fn publisher_creates_missing_secret() {
        let mut store = MockObjectStore::new();
        store.expect_get().returning(|_| Ok(None));
        store
            .expect_create()
            .withf(|obj, dry_run| {
                !*dry_run
                    && obj.data["data"]["password"] == "aHVudGVyMg=="
                    && obj.metadata.namespace.as_deref() == Some("team-a")
                    && obj.owner_references().len() == 1
            })
            .times(1)
            .returning(|obj, _| Ok(obj.clone()));

        let published = SecretConnectionPublisher::new(Arc::new(store), None)
            .publish(&composite_with_secret(), &details())
            .await
            .unwrap();
        assert!(published);
    }

    #[tokio::test]
    async fn publisher_skips_unchanged_secret() {
        let mut store = MockObjectStore::new();
        store
            .expect_get()
            .returning(|_| Ok(Some(secret(json!({"password": "aHVudGVyMg=="})))));
        store.expect_update().never();

        let published = SecretConnectionPublisher::new(Arc::new(store), None)
            .publish(&composite_with_secret(), &details())
            .await
            .unwrap();
        assert!(!published);
    }

    #[tokio::test]
    async fn publisher_treats_missing_data_as_empty() {
        let mut store = MockObjectStore::new();
        store.expect_get().returning(|_| {
            let mut existing = secret(Value::Null);
            if let Some(fields) = existing.data.as_object_mut() {
                fields.remove("data");
            }
            Ok(Some(existing))
        });
        store.expect_update().never();

        let published = SecretConnectionPublisher::new(Arc::new(store), None)
            .publish(&composite_with_secret(), &ConnectionDetails::new())
            .await
            .unwrap();
        assert!(!published);
    }

    #[tokio::test]
    async fn publisher_updates_changed_secret() {
        let mut store = MockObjectStore::new();
        store
            .expect_get()
            .returning(|_| Ok(Some(secret(json!({"password": "b2xk"})))));
        store
            .expect_update()
            .withf(|obj| obj.metadata.resource_version.as_deref() == Some("7"))
            .times(1)
            .returning(|obj| Ok(obj.clone()));

        let published = SecretConnectionPublisher::new(Arc::new(store), None)
            .publish(&composite_with_secret(), &details())
            .await
            .unwrap();
        assert!(published);
    }

    #[tokio::test]
    async fn composite_without_secret_ref_publishes_nothing() {
        let mut store = MockObjectStore::new();
        store.expect_get().never();
        let mut xr = composite_with_secret();
        xr.data = json!({"spec": {}});

        let published = SecretConnectionPublisher::new(Arc::new(store), None)
            .publish(&xr, &details())
            .await
            .unwrap();
        assert!(!published);
    }
}
