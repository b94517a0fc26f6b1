//! Mutating admission webhook for Pods.
//!
//! - [`policy`]: decides whether a Pod needs the provenance annotations
//! - [`patch`]: builds the JSON Patch against the Pod's annotation map
//! - [`mutate`]: decodes the review, runs both, and assembles the response
//! - `server`: HTTPS endpoints

pub mod mutate;
pub mod patch;
pub mod policy;
mod server;

pub use mutate::{AdmissionOutcome, PodAdmission, mutate, review};
pub use patch::{PatchOperation, PatchValue, build_patch};
pub use policy::{PolicyDecision, SkipReason, evaluate, should_mutate};
pub use server::{WebhookState, create_webhook_router, escape_html, run_webhook_server};

// Re-export kube-rs admission types for contract testing
pub use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation};
