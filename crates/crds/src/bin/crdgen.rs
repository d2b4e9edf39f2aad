//! Prints the CustomResourceDefinition manifests for all Foo controller CRDs.
//!
//! Usage: `cargo run -p crds --bin crdgen > config/crd/foo.yaml`

use anyhow::Result;
use crds::Foo;
use kube::CustomResourceExt;

fn main() -> Result<()> {
    print!("{}", serde_yaml::to_string(&Foo::crd())?);
    Ok(())
}
