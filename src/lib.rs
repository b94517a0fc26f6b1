//! openshift-build-annotate library crate
//!
//! A mutating admission webhook that tags Pods with build-provenance
//! annotations. This module exports the policy, patch and response pieces,
//! the HTTP servers, and the optional registry label resolver.

pub mod config;
pub mod error;
pub mod health;
pub mod registry;
pub mod supervisor;
pub mod webhooks;

pub use config::{ObjectDecodeFailurePolicy, PolicyConfig, ServerConfig};
pub use error::{Error, Result};
pub use health::HealthState;
pub use registry::{ProvenanceLabels, RegistryError, RegistryLabelResolver};
pub use supervisor::supervise;
pub use webhooks::{WebhookState, mutate, run_webhook_server};
