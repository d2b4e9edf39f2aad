//! Child Deployment rendering and owned-field drift handling.
//!
//! The controller owns only a handful of Deployment fields: replica count,
//! selector labels, its own pod template label, and the name and image of
//! the managed container. Everything else (server-side defaults, extra
//! containers, annotations added by other tools) is left alone.

use crate::error::ControllerError;
use crds::Foo;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{Container, PodSpec, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use kube::{Resource, ResourceExt};
use std::collections::BTreeMap;

/// Name of the container the controller manages in each child.
pub const CONTAINER_NAME: &str = "nginx";

/// Label key used on the selector and pod template.
pub const SELECTOR_LABEL: &str = "deployment";

fn selector_labels(deployment_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(SELECTOR_LABEL.to_string(), deployment_name.to_string())])
}

/// Renders the Deployment `foo` asks for.
///
/// Deterministic: the same Foo and image always yield the same object.
pub fn desired_deployment(foo: &Foo, image: &str) -> Result<Deployment, ControllerError> {
    foo.spec
        .validate()
        .map_err(|e| ControllerError::InvalidResource(format!("Foo {}: {}", foo.name_any(), e)))?;

    let namespace = foo.namespace().ok_or_else(|| {
        ControllerError::InvalidResource(format!("Foo {} has no namespace", foo.name_any()))
    })?;
    let owner = foo.controller_owner_ref(&()).ok_or_else(|| {
        ControllerError::InvalidResource(format!(
            "Foo {}/{} has no name or uid to own a Deployment with",
            namespace,
            foo.name_any()
        ))
    })?;

    let name = foo.spec.deployment_name.clone();
    let labels = selector_labels(&name);

    Ok(Deployment {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: Some(namespace),
            owner_references: Some(vec![owner]),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(foo.spec.replicas),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: CONTAINER_NAME.to_string(),
                        image: Some(image.to_string()),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    })
}

fn replicas(deployment: &Deployment) -> Option<i32> {
    deployment.spec.as_ref().and_then(|s| s.replicas)
}

fn match_labels(deployment: &Deployment) -> Option<&BTreeMap<String, String>> {
    deployment.spec.as_ref().and_then(|s| s.selector.match_labels.as_ref())
}

fn template_labels(deployment: &Deployment) -> Option<&BTreeMap<String, String>> {
    deployment
        .spec
        .as_ref()
        .and_then(|s| s.template.metadata.as_ref())
        .and_then(|m| m.labels.as_ref())
}

fn managed_container(deployment: &Deployment) -> Option<&Container> {
    deployment
        .spec
        .as_ref()
        .and_then(|s| s.template.spec.as_ref())
        .and_then(|p| p.containers.iter().find(|c| c.name == CONTAINER_NAME))
}

/// Whether `actual` differs from `target` in any field the controller owns.
pub fn drifted(target: &Deployment, actual: &Deployment) -> bool {
    if replicas(target) != replicas(actual) {
        return true;
    }
    if match_labels(target) != match_labels(actual) {
        return true;
    }

    let actual_template = template_labels(actual);
    let template_ok = template_labels(target)
        .into_iter()
        .flatten()
        .all(|(k, v)| actual_template.and_then(|labels| labels.get(k)) == Some(v));
    if !template_ok {
        return true;
    }

    match (managed_container(target), managed_container(actual)) {
        (Some(want), Some(have)) => want.image != have.image,
        (Some(_), None) => true,
        (None, _) => false,
    }
}

/// Copies the owned fields of `target` into `actual`, preserving the rest.
pub fn apply_owned(target: &Deployment, actual: &mut Deployment) {
    let Some(target_spec) = target.spec.as_ref() else {
        return;
    };
    let spec = actual.spec.get_or_insert_with(Default::default);

    spec.replicas = target_spec.replicas;
    spec.selector.match_labels = target_spec.selector.match_labels.clone();

    if let Some(want) = target_spec.template.metadata.as_ref().and_then(|m| m.labels.as_ref()) {
        let labels = spec
            .template
            .metadata
            .get_or_insert_with(Default::default)
            .labels
            .get_or_insert_with(Default::default);
        labels.extend(want.iter().map(|(k, v)| (k.clone(), v.clone())));
    }

    let Some(want) = target_spec
        .template
        .spec
        .as_ref()
        .and_then(|p| p.containers.iter().find(|c| c.name == CONTAINER_NAME))
    else {
        return;
    };
    let pod = spec.template.spec.get_or_insert_with(Default::default);
    match pod.containers.iter_mut().find(|c| c.name == CONTAINER_NAME) {
        Some(have) => have.image = want.image.clone(),
        None => pod.containers.insert(0, want.clone()),
    }
}

/// Available replicas reported by `deployment`, 0 if not yet reported.
pub fn available_replicas(deployment: &Deployment) -> i32 {
    deployment
        .status
        .as_ref()
        .and_then(|s| s.available_replicas)
        .unwrap_or(0)
}
