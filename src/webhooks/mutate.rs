//! Pod mutation: turns an admission review into an admission response.
//!
//! Flow:
//! 1. Decode the review envelope (failures are errors)
//! 2. Decode the embedded object as a Pod (failures follow
//!    [`ObjectDecodeFailurePolicy`])
//! 3. Evaluate the mutation policy
//! 4. Patch the status annotation in when required
//!
//! The object is never modified; only a patch is returned.

use std::collections::BTreeMap;
use std::fmt;

use k8s_openapi::api::core::v1::Pod;
use kube::core::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::config::{ObjectDecodeFailurePolicy, PolicyConfig};
use crate::error::{Error, Result};
use crate::webhooks::patch::{build_patch, to_json_patch};
use crate::webhooks::policy::{PolicyDecision, SkipReason, evaluate};

/// What happened to a single admission request
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AdmissionOutcome {
    /// Patch attached
    Mutated { operations: usize },
    /// Allowed without a patch
    Skipped(SkipReason),
    /// Embedded object was not a Pod
    ObjectDecodeFailed,
    /// Patch could not be attached; allowed unmodified
    PatchFailed,
}

impl AdmissionOutcome {
    /// Short label used for metrics
    pub fn label(&self) -> &'static str {
        match self {
            AdmissionOutcome::Mutated { .. } => "mutated",
            AdmissionOutcome::Skipped(SkipReason::IgnoredNamespace) => "skipped_namespace",
            AdmissionOutcome::Skipped(SkipReason::AlreadyInjected) => "skipped_injected",
            AdmissionOutcome::Skipped(SkipReason::OptedOut) => "skipped_opt_out",
            AdmissionOutcome::ObjectDecodeFailed => "object_decode_error",
            AdmissionOutcome::PatchFailed => "patch_error",
        }
    }
}

impl fmt::Display for AdmissionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// An admission request whose embedded object is still raw JSON.
///
/// The object is kept out of the envelope decode so a malformed Pod is handled
/// by [`ObjectDecodeFailurePolicy`] instead of failing the whole review.
#[derive(Debug)]
pub struct PodAdmission {
    pub request: AdmissionRequest<DynamicObject>,
    pub object: Option<Value>,
}

/// Decode a raw request body into an admission request
pub fn decode_request(body: &[u8]) -> Result<PodAdmission> {
    let mut envelope: Value = serde_json::from_slice(body).map_err(Error::Decode)?;

    let mut object = None;
    if let Some(request) = envelope.get_mut("request").and_then(Value::as_object_mut) {
        object = request.remove("object").filter(|o| !o.is_null());
        // oldObject is never read
        request.remove("oldObject");
    }

    let review: AdmissionReview<DynamicObject> =
        serde_json::from_value(envelope).map_err(Error::Decode)?;
    let request = review
        .try_into()
        .map_err(|e| Error::InvalidReview(format!("{e}")))?;
    Ok(PodAdmission { request, object })
}

/// Encode an admission response as a review envelope
pub fn encode_response(response: AdmissionResponse) -> Result<Vec<u8>> {
    serde_json::to_vec(&response.into_review()).map_err(Error::Encode)
}

fn decode_pod(object: Option<&Value>) -> Result<Pod> {
    let object = object
        .ok_or_else(|| Error::ObjectDecode("admission request carries no object".to_string()))?;
    Pod::deserialize(object).map_err(|e| Error::ObjectDecode(e.to_string()))
}

/// Build the admission response for one request.
pub fn review(
    admission: &PodAdmission,
    config: &PolicyConfig,
) -> (AdmissionResponse, AdmissionOutcome) {
    let request = &admission.request;
    let uid = &request.uid;
    debug!(
        uid = %uid,
        kind = %request.kind.kind,
        operation = ?request.operation,
        namespace = ?request.namespace,
        name = %request.name,
        "Processing admission request"
    );

    let pod = match decode_pod(admission.object.as_ref()) {
        Ok(pod) => pod,
        Err(e) => {
            error!(uid = %uid, error = %e, "Could not decode object as Pod");
            let response = match config.on_object_decode_failure {
                ObjectDecodeFailurePolicy::Allow => AdmissionResponse::from(request),
                ObjectDecodeFailurePolicy::Deny => {
                    AdmissionResponse::from(request).deny(e.to_string())
                }
            };
            return (response, AdmissionOutcome::ObjectDecodeFailed);
        }
    };

    // CREATE requests usually arrive before the namespace is defaulted into the object
    let namespace = pod
        .metadata
        .namespace
        .as_deref()
        .filter(|ns| !ns.is_empty())
        .or(request.namespace.as_deref())
        .unwrap_or_default();
    let name = pod
        .metadata
        .name
        .as_deref()
        .or(pod.metadata.generate_name.as_deref())
        .unwrap_or_default();
    let annotations = pod.metadata.annotations.as_ref();

    if let PolicyDecision::Skip(reason) = evaluate(namespace, annotations, config) {
        info!(
            uid = %uid,
            namespace = %namespace,
            name = %name,
            reason = %reason,
            "Skipping mutation due to policy check"
        );
        return (
            AdmissionResponse::from(request),
            AdmissionOutcome::Skipped(reason),
        );
    }

    let desired = BTreeMap::from([(
        config.status_key.as_str(),
        config.injected_value.as_str(),
    )]);
    let ops = build_patch(annotations, &desired);
    let operations = ops.len();

    match AdmissionResponse::from(request).with_patch(to_json_patch(ops)) {
        Ok(response) => {
            info!(
                uid = %uid,
                namespace = %namespace,
                name = %name,
                patch_ops = operations,
                "Mutating pod"
            );
            (response, AdmissionOutcome::Mutated { operations })
        }
        Err(e) => {
            let err = Error::Patch(e.to_string());
            warn!(uid = %uid, error = %err, "Admitting pod without patch");
            (AdmissionResponse::from(request), AdmissionOutcome::PatchFailed)
        }
    }
}

/// Handle a raw admission review body and return the encoded response.
pub fn mutate(body: &[u8], config: &PolicyConfig) -> Result<(Vec<u8>, AdmissionOutcome)> {
    let admission = decode_request(body)?;
    let (response, outcome) = review(&admission, config);
    Ok((encode_response(response)?, outcome))
}
