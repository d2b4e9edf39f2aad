//! Cluster state store.
//!
//! The reconciler reads and writes Foos and Deployments only through
//! `ClusterStore`, so tests can swap the API server for an in-memory store.

use crate::error::StoreError;
use async_trait::async_trait;
use crds::{Foo, FooStatus};
use k8s_openapi::api::apps::v1::Deployment;
use kube::api::{Patch, PatchParams, PostParams};
use kube::{Api, Client, Resource, ResourceExt};
use serde_json::json;
use std::fmt;

const FIELD_MANAGER: &str = "foo-controller";

/// Reads and writes the objects the Foo controller works with.
#[async_trait]
pub trait ClusterStore: Send + Sync {
    /// Fetches a Foo; `None` if it does not exist.
    async fn get_foo(&self, namespace: &str, name: &str) -> Result<Option<Foo>, StoreError>;

    /// Fetches a Deployment; `None` if it does not exist.
    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Option<Deployment>, StoreError>;

    /// Creates a Deployment and returns the stored object.
    async fn create_deployment(&self, deployment: &Deployment) -> Result<Deployment, StoreError>;

    /// Replaces an existing Deployment and returns the stored object.
    async fn update_deployment(&self, deployment: &Deployment) -> Result<Deployment, StoreError>;

    /// Writes `status` through the Foo's status subresource.
    async fn update_foo_status(&self, foo: &Foo, status: &FooStatus) -> Result<(), StoreError>;
}

/// `ClusterStore` backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl fmt::Debug for KubeStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KubeStore")
            .field("field_manager", &FIELD_MANAGER)
            .finish_non_exhaustive()
    }
}

impl KubeStore {
    /// Creates a store that talks to the API server through `client`.
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn deployments(&self, namespace: &str) -> Api<Deployment> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn foos(&self, namespace: &str) -> Api<Foo> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

/// Namespace and name of `obj`, which every stored object must have.
fn object_key<K: Resource>(obj: &K, kind: &str) -> Result<(String, String), StoreError> {
    let namespace = obj
        .namespace()
        .ok_or_else(|| StoreError::InvalidObject(format!("{} has no namespace", kind)))?;
    let name = obj.meta().name.clone().ok_or_else(|| {
        StoreError::InvalidObject(format!("{} in namespace {} has no name", kind, namespace))
    })?;
    Ok((namespace, name))
}

fn post_params() -> PostParams {
    PostParams {
        field_manager: Some(FIELD_MANAGER.to_string()),
        ..Default::default()
    }
}

fn patch_params() -> PatchParams {
    PatchParams {
        field_manager: Some(FIELD_MANAGER.to_string()),
        ..Default::default()
    }
}

#[async_trait]
impl ClusterStore for KubeStore {
    async fn get_foo(&self, namespace: &str, name: &str) -> Result<Option<Foo>, StoreError> {
        Ok(self.foos(namespace).get_opt(name).await?)
    }

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Option<Deployment>, StoreError> {
        Ok(self.deployments(namespace).get_opt(name).await?)
    }

    async fn create_deployment(&self, deployment: &Deployment) -> Result<Deployment, StoreError> {
        let (namespace, _) = object_key(deployment, "Deployment")?;
        Ok(self.deployments(&namespace).create(&post_params(), deployment).await?)
    }

    async fn update_deployment(&self, deployment: &Deployment) -> Result<Deployment, StoreError> {
        let (namespace, name) = object_key(deployment, "Deployment")?;
        // Carries the resourceVersion we read, so a concurrent write surfaces as a conflict
        Ok(self.deployments(&namespace).replace(&name, &post_params(), deployment).await?)
    }

    async fn update_foo_status(&self, foo: &Foo, status: &FooStatus) -> Result<(), StoreError> {
        let (namespace, name) = object_key(foo, "Foo")?;
        let patch = json!({ "status": status });
        self.foos(&namespace)
            .patch_status(&name, &patch_params(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}
