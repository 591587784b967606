//! Cluster API Client
//!
//! Kubernetes access for the Onload operator. Every read and write the
//! reconciler performs goes through `ClusterClientTrait`, so the
//! reconciliation logic can run against the real API server
//! (`KubeClusterClient`) or an in-memory cluster (`MockClusterClient`,
//! behind the `test-util` feature).
//!
//! # Example
//!
//! ```no_run
//! use cluster_client::{ClusterClientTrait, KubeClusterClient, LabelQuery};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = KubeClusterClient::new(kube::Client::try_default().await?, Duration::from_secs(10));
//!
//! // Nodes carrying a label, whatever its value
//! let nodes = client.list_nodes(&LabelQuery::has_key("onload.amd.com/onload.demo")).await?;
//! println!("{} nodes ready", nodes.len());
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod selector;
#[path = "trait.rs"]
pub mod cluster_trait;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use client::KubeClusterClient;
pub use cluster_trait::{ClusterClientTrait, LabelChanges};
pub use error::ClusterError;
pub use selector::{LabelQuery, LabelRequirement, PodQuery};
#[cfg(any(test, feature = "test-util"))]
pub use mock::{helpers as mock_helpers, MockClusterClient};
