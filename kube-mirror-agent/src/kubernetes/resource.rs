use std::collections::BTreeMap;
use std::fmt;

use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::{Resource, ResourceExt};

/// The two resource kinds the agent mirrors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    ConfigMap,
    Secret,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::ConfigMap => f.write_str("ConfigMap"),
            ResourceKind::Secret => f.write_str("Secret"),
        }
    }
}

/// Identity of one watched object.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceId {
    pub kind: ResourceKind,
    pub namespace: String,
    pub name: String,
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.kind, self.namespace, self.name)
    }
}

/// Point-in-time view of one object, decoupled from the API types.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub id: ResourceId,
    pub resource_version: String,
    pub payload: BTreeMap<String, Vec<u8>>,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
}

/// Watched kinds know how to flatten their keyed payload into bytes.
pub trait Mirrored:
    Resource<DynamicType = (), Scope = NamespaceResourceScope> + Sized
{
    const KIND: ResourceKind;

    fn payload(&self) -> BTreeMap<String, Vec<u8>>;

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            id: ResourceId {
                kind: Self::KIND,
                namespace: self.namespace().unwrap_or_default(),
                name: self.name_any(),
            },
            resource_version: self.resource_version().unwrap_or_default(),
            payload: self.payload(),
            labels: self.labels().clone(),
            annotations: self.annotations().clone(),
        }
    }
}

impl Mirrored for ConfigMap {
    const KIND: ResourceKind = ResourceKind::ConfigMap;

    /// Textual `data` and `binaryData` merged; the API keeps the key sets
    /// disjoint.
    fn payload(&self) -> BTreeMap<String, Vec<u8>> {
        let mut payload = BTreeMap::new();
        if let Some(data) = &self.data {
            for (key, value) in data {
                payload.insert(key.clone(), value.clone().into_bytes());
            }
        }
        if let Some(binary) = &self.binary_data {
            for (key, value) in binary {
                payload.insert(key.clone(), value.0.clone());
            }
        }
        payload
    }
}

impl Mirrored for Secret {
    const KIND: ResourceKind = ResourceKind::Secret;

    fn payload(&self) -> BTreeMap<String, Vec<u8>> {
        self.data
            .iter()
            .flatten()
            .map(|(key, value)| (key.clone(), value.0.clone()))
            .collect()
    }
}

/// Typed event sum delivered to the dispatcher.
#[derive(Debug, Clone)]
pub enum ResourceEvent {
    Applied(Snapshot),
    Deleted(Snapshot),
}

impl ResourceEvent {
    pub fn snapshot(&self) -> &Snapshot {
        match self {
            Self::Applied(snapshot) | Self::Deleted(snapshot) => snapshot,
        }
    }

    pub fn is_delete(&self) -> bool {
        matches!(self, Self::Deleted(_))
    }

    pub fn action(&self) -> &'static str {
        match self {
            Self::Applied(_) => "applied",
            Self::Deleted(_) => "deleted",
        }
    }
}
