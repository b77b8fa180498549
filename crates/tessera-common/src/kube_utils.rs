//! Shared Kubernetes utilities using kube-rs
//!
//! Composed resources are arbitrary kinds known only at runtime, so every API
//! call goes through `Api<DynamicObject>` with an `ApiResource` built from the
//! object's apiVersion and kind.

use kube::api::{Api, DynamicObject};
use kube::discovery::ApiResource;
use kube::Client;

use crate::resource::DynamicObjectExt;
use crate::{Error, Result};

/// Build an ApiResource from a known apiVersion and kind.
///
/// The plural is derived from the kind; see [`pluralize_kind`].
pub fn build_api_resource(api_version: &str, kind: &str) -> ApiResource {
    let (group, version) = parse_api_version(api_version);
    ApiResource {
        group,
        version,
        kind: kind.to_string(),
        api_version: api_version.to_string(),
        plural: pluralize_kind(kind),
    }
}

/// Build the dynamic API handle for an object.
///
/// Objects with a namespace get a namespaced handle; everything else is
/// treated as cluster-scoped.
pub fn api_for(client: &Client, obj: &DynamicObject) -> Result<Api<DynamicObject>> {
    let (api_version, kind) = (obj.api_version(), obj.kind());
    if api_version.is_empty() || kind.is_empty() {
        return Err(Error::validation_for(
            obj.metadata.name.clone().unwrap_or_default(),
            "object has no apiVersion or kind",
        ));
    }
    let ar = build_api_resource(api_version, kind);
    Ok(match obj.metadata.namespace.as_deref() {
        Some(ns) if !ns.is_empty() => Api::namespaced_with(client.clone(), ns, &ar),
        _ => Api::all_with(client.clone(), &ar),
    })
}

/// Split an apiVersion into (group, version); the core group is empty
pub fn parse_api_version(api_version: &str) -> (String, String) {
    match api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

/// Kinds whose plural doesn't follow the simple rules below
const KIND_PLURALS: &[(&str, &str)] = &[
    ("endpoints", "endpoints"),
    ("ingress", "ingresses"),
    ("networkpolicy", "networkpolicies"),
];

/// Pluralize a Kubernetes resource kind
///
/// Uses a lookup table for irregular kinds, falling back to simple English
/// pluralization rules.
pub fn pluralize_kind(kind: &str) -> String {
    let lower = kind.to_lowercase();

    for (singular, plural) in KIND_PLURALS {
        if *singular == lower {
            return (*plural).to_string();
        }
    }

    if lower.ends_with('s') || lower.ends_with("ch") || lower.ends_with("sh") || lower.ends_with('x') {
        format!("{}es", lower)
    } else if lower.ends_with('y') && !lower.ends_with("ay") && !lower.ends_with("ey") {
        format!("{}ies", &lower[..lower.len() - 1])
    } else {
        format!("{}s", lower)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pluralize_kind() {
        assert_eq!(pluralize_kind("Deployment"), "deployments");
        assert_eq!(pluralize_kind("Policy"), "policies");
        assert_eq!(pluralize_kind("Ingress"), "ingresses");
        assert_eq!(pluralize_kind("Secret"), "secrets");
        assert_eq!(pluralize_kind("Gateway"), "gateways");
        assert_eq!(pluralize_kind("Endpoints"), "endpoints");
        assert_eq!(pluralize_kind("XBucket"), "xbuckets");
        assert_eq!(pluralize_kind("Mailbox"), "mailboxes");
    }

    #[test]
    fn test_parse_api_version() {
        assert_eq!(
            parse_api_version("s3.example.org/v1beta1"),
            ("s3.example.org".to_string(), "v1beta1".to_string())
        );
        assert_eq!(parse_api_version("v1"), (String::new(), "v1".to_string()));
    }

    #[test]
    fn test_build_api_resource() {
        let ar = build_api_resource("apiextensions.tessera.dev/v1", "CompositionRevision");
        assert_eq!(ar.group, "apiextensions.tessera.dev");
        assert_eq!(ar.version, "v1");
        assert_eq!(ar.kind, "CompositionRevision");
        assert_eq!(ar.plural, "compositionrevisions");
    }
}
