//! Prints the Onload CRD as YAML.
//!
//! Usage: `cargo run -p crds --bin crdgen > config/crd/onload.yaml`

use crds::Onload;
use kube::CustomResourceExt;

fn main() -> Result<(), serde_yaml::Error> {
    print!("{}", serde_yaml::to_string(&Onload::crd())?);
    Ok(())
}
