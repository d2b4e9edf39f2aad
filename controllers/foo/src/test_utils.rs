//! Test utilities for unit testing the reconciler
//!
//! Provides an in-memory `ClusterStore` and helpers for creating test data.

use crate::error::StoreError;
use crate::store::ClusterStore;
use async_trait::async_trait;
use crds::{Foo, FooSpec, FooStatus};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

/// Helper to create a test Foo with a uid, so it can own a Deployment
pub fn create_test_foo(name: &str, namespace: &str, deployment_name: &str, replicas: i32) -> Foo {
    Foo {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            uid: Some(format!("uid-{}-{}", namespace, name)),
            ..Default::default()
        },
        spec: FooSpec {
            deployment_name: deployment_name.to_string(),
            replicas,
        },
        status: None,
    }
}

/// Store operations that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    GetFoo,
    GetDeployment,
    CreateDeployment,
    UpdateDeployment,
    UpdateFooStatus,
}

type Key = (String, String);

#[derive(Default)]
struct Objects {
    foos: HashMap<Key, Foo>,
    deployments: HashMap<Key, Deployment>,
    reads: usize,
    writes: Vec<StoreOp>,
    failing: HashSet<StoreOp>,
    next_version: u64,
}

/// In-memory `ClusterStore`
///
/// Created Deployments get a few server-side defaults filled in, the way the
/// API server would, so tests notice if those are mistaken for drift.
#[derive(Default)]
pub struct MockStore {
    objects: Mutex<Objects>,
}

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

fn meta_key(meta: &ObjectMeta) -> Result<Key, StoreError> {
    match (&meta.namespace, &meta.name) {
        (Some(namespace), Some(name)) => Ok(key(namespace, name)),
        _ => Err(StoreError::InvalidObject("missing namespace or name".to_string())),
    }
}

fn apply_server_defaults(deployment: &mut Deployment) {
    let Some(spec) = deployment.spec.as_mut() else {
        return;
    };
    spec.progress_deadline_seconds.get_or_insert(600);
    spec.revision_history_limit.get_or_insert(10);
    if let Some(pod) = spec.template.spec.as_mut() {
        pod.restart_policy.get_or_insert_with(|| "Always".to_string());
        for container in &mut pod.containers {
            container.image_pull_policy.get_or_insert_with(|| "Always".to_string());
            container
                .termination_message_path
                .get_or_insert_with(|| "/dev/termination-log".to_string());
        }
    }
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn objects(&self) -> MutexGuard<'_, Objects> {
        self.objects.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn insert_foo(&self, foo: Foo) {
        let key = meta_key(&foo.metadata).unwrap();
        self.objects().foos.insert(key, foo);
    }

    pub fn remove_foo(&self, namespace: &str, name: &str) {
        self.objects().foos.remove(&key(namespace, name));
    }

    /// Changes `spec.replicas` of a stored Foo
    pub fn scale_foo(&self, namespace: &str, name: &str, replicas: i32) {
        let mut objects = self.objects();
        let foo = objects.foos.get_mut(&key(namespace, name)).unwrap();
        foo.spec.replicas = replicas;
    }

    pub fn foo_status(&self, namespace: &str, name: &str) -> Option<FooStatus> {
        self.objects()
            .foos
            .get(&key(namespace, name))
            .and_then(|f| f.status.clone())
    }

    /// Places a Deployment in the store directly, bypassing the write log
    pub fn insert_deployment(&self, deployment: Deployment) {
        let key = meta_key(&deployment.metadata).unwrap();
        self.objects().deployments.insert(key, deployment);
    }

    pub fn deployment(&self, namespace: &str, name: &str) -> Option<Deployment> {
        self.objects().deployments.get(&key(namespace, name)).cloned()
    }

    pub fn deployment_count(&self) -> usize {
        self.objects().deployments.len()
    }

    /// Edits a stored Deployment in place, as another client would
    pub fn edit_deployment(&self, namespace: &str, name: &str, edit: impl FnOnce(&mut Deployment)) {
        let mut objects = self.objects();
        edit(objects.deployments.get_mut(&key(namespace, name)).unwrap());
    }

    /// Simulates the Deployment controller reporting availability
    pub fn set_available_replicas(&self, namespace: &str, name: &str, available: i32) {
        self.edit_deployment(namespace, name, |d| {
            d.status = Some(DeploymentStatus {
                available_replicas: Some(available),
                ..Default::default()
            });
        });
    }

    pub fn set_failing(&self, op: StoreOp, failing: bool) {
        let mut objects = self.objects();
        if failing {
            objects.failing.insert(op);
        } else {
            objects.failing.remove(&op);
        }
    }

    /// Number of read calls received
    pub fn reads(&self) -> usize {
        self.objects().reads
    }

    /// Every successful write, in order
    pub fn writes(&self) -> Vec<StoreOp> {
        self.objects().writes.clone()
    }

    pub fn write_count(&self, op: StoreOp) -> usize {
        self.objects().writes.iter().filter(|w| **w == op).count()
    }

    fn check(objects: &Objects, op: StoreOp) -> Result<(), StoreError> {
        if objects.failing.contains(&op) {
            return Err(StoreError::Unavailable(format!("injected failure for {:?}", op)));
        }
        Ok(())
    }

    fn stamp(objects: &mut Objects, deployment: &mut Deployment) {
        objects.next_version += 1;
        deployment.metadata.resource_version = Some(objects.next_version.to_string());
    }
}

#[async_trait]
impl ClusterStore for MockStore {
    async fn get_foo(&self, namespace: &str, name: &str) -> Result<Option<Foo>, StoreError> {
        let mut objects = self.objects();
        objects.reads += 1;
        Self::check(&objects, StoreOp::GetFoo)?;
        Ok(objects.foos.get(&key(namespace, name)).cloned())
    }

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Option<Deployment>, StoreError> {
        let mut objects = self.objects();
        objects.reads += 1;
        Self::check(&objects, StoreOp::GetDeployment)?;
        Ok(objects.deployments.get(&key(namespace, name)).cloned())
    }

    async fn create_deployment(&self, deployment: &Deployment) -> Result<Deployment, StoreError> {
        let mut objects = self.objects();
        Self::check(&objects, StoreOp::CreateDeployment)?;
        let key = meta_key(&deployment.metadata)?;
        if objects.deployments.contains_key(&key) {
            return Err(StoreError::Unavailable(format!("deployment {}/{} already exists", key.0, key.1)));
        }

        let mut stored = deployment.clone();
        apply_server_defaults(&mut stored);
        Self::stamp(&mut objects, &mut stored);
        objects.deployments.insert(key, stored.clone());
        objects.writes.push(StoreOp::CreateDeployment);
        Ok(stored)
    }

    async fn update_deployment(&self, deployment: &Deployment) -> Result<Deployment, StoreError> {
        let mut objects = self.objects();
        Self::check(&objects, StoreOp::UpdateDeployment)?;
        let key = meta_key(&deployment.metadata)?;
        let Some(existing) = objects.deployments.get(&key) else {
            return Err(StoreError::Unavailable(format!("deployment {}/{} not found", key.0, key.1)));
        };

        // Updates go through the spec; status belongs to the Deployment controller
        let mut stored = deployment.clone();
        stored.status = existing.status.clone();
        Self::stamp(&mut objects, &mut stored);
        objects.deployments.insert(key, stored.clone());
        objects.writes.push(StoreOp::UpdateDeployment);
        Ok(stored)
    }

    async fn update_foo_status(&self, foo: &Foo, status: &FooStatus) -> Result<(), StoreError> {
        let mut objects = self.objects();
        Self::check(&objects, StoreOp::UpdateFooStatus)?;
        let key = meta_key(&foo.metadata)?;
        let Some(stored) = objects.foos.get_mut(&key) else {
            return Err(StoreError::Unavailable(format!("foo {}/{} not found", key.0, key.1)));
        };

        stored.status = Some(status.clone());
        objects.writes.push(StoreOp::UpdateFooStatus);
        Ok(())
    }
}
