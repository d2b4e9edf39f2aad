//! Foo CRD
//!
//! Declares a Deployment that the Foo controller keeps converged.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[kube(
    group = "tools.example.com",
    version = "v1beta1",
    kind = "Foo",
    namespaced,
    status = "FooStatus",
    shortname = "foo",
    printcolumn = r#"{"name":"Deployment","type":"string","jsonPath":".spec.deploymentName"}"#,
    printcolumn = r#"{"name":"Desired","type":"integer","jsonPath":".spec.replicas"}"#,
    printcolumn = r#"{"name":"Available","type":"integer","jsonPath":".status.availableReplicas"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct FooSpec {
    /// Name of the Deployment owned by this Foo (same namespace)
    pub deployment_name: String,

    /// Desired replica count of the Deployment
    pub replicas: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FooStatus {
    /// Available replicas last observed on the owned Deployment
    #[serde(default)]
    pub available_replicas: i32,
}

/// Reasons a `FooSpec` cannot be rendered into a Deployment.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FooSpecError {
    #[error("spec.deploymentName must not be empty")]
    EmptyDeploymentName,

    #[error("spec.replicas must not be negative (got {0})")]
    NegativeReplicas(i32),
}

impl FooSpec {
    /// Checks the invariants the schema cannot express on its own.
    pub fn validate(&self) -> Result<(), FooSpecError> {
        if self.deployment_name.trim().is_empty() {
            return Err(FooSpecError::EmptyDeploymentName);
        }
        if self.replicas < 0 {
            return Err(FooSpecError::NegativeReplicas(self.replicas));
        }
        Ok(())
    }
}
