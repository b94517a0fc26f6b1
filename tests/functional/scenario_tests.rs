//! End-to-end admission scenarios.

use openshift_build_annotate::config::STATUS_ANNOTATION_KEY;
use openshift_build_annotate::webhooks::{AdmissionOutcome, SkipReason};
use openshift_build_annotate::{Error, ObjectDecodeFailurePolicy, PolicyConfig, mutate};
use serde_json::json;

use crate::common::fixtures::{PodBuilder, patch_of, pod_review, response_of, review_body};

#[test]
fn test_default_namespace_pod_is_annotated() {
    let pod = PodBuilder::new("web-1")
        .namespace("default")
        .empty_annotations()
        .build();
    let (bytes, outcome) = mutate(&pod_review("abc-123", &pod), &PolicyConfig::default()).unwrap();

    assert_eq!(outcome, AdmissionOutcome::Mutated { operations: 1 });

    let review: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(review["apiVersion"], "admission.k8s.io/v1");
    assert_eq!(review["kind"], "AdmissionReview");

    let response = response_of(&bytes);
    assert_eq!(response["uid"], "abc-123");
    assert_eq!(response["allowed"], true);
    assert_eq!(response["patchType"], "JSONPatch");
    assert_eq!(
        patch_of(&response).unwrap(),
        json!([{
            "op": "add",
            "path": "/metadata/annotations",
            "value": {"openshift-build-annotate/status": "injected"}
        }])
    );
}

#[test]
fn test_kube_system_pod_is_untouched() {
    let pod = PodBuilder::new("coredns-abc")
        .namespace("kube-system")
        .annotation("openshift-build-annotate/mutate", "yes")
        .build();
    let (bytes, outcome) = mutate(&pod_review("sys-1", &pod), &PolicyConfig::default()).unwrap();

    assert_eq!(
        outcome,
        AdmissionOutcome::Skipped(SkipReason::IgnoredNamespace)
    );
    let response = response_of(&bytes);
    assert_eq!(response["uid"], "sys-1");
    assert_eq!(response["allowed"], true);
    assert!(response.get("patch").is_none());
}

#[test]
fn test_retried_admission_is_idempotent() {
    let pod = PodBuilder::new("web-1")
        .namespace("default")
        .annotation(STATUS_ANNOTATION_KEY, "Injected")
        .build();
    let (bytes, outcome) = mutate(&pod_review("retry-1", &pod), &PolicyConfig::default()).unwrap();

    assert_eq!(
        outcome,
        AdmissionOutcome::Skipped(SkipReason::AlreadyInjected)
    );
    assert!(patch_of(&response_of(&bytes)).is_none());
}

#[test]
fn test_opted_out_pod_is_untouched() {
    let pod = PodBuilder::new("batch-7")
        .namespace("jobs")
        .annotation("openshift-build-annotate/mutate", "false")
        .build();
    let (bytes, outcome) = mutate(&pod_review("opt-1", &pod), &PolicyConfig::default()).unwrap();

    assert_eq!(outcome, AdmissionOutcome::Skipped(SkipReason::OptedOut));
    assert_eq!(response_of(&bytes)["allowed"], true);
}

#[test]
fn test_existing_annotations_are_preserved() {
    let pod = PodBuilder::new("web-2")
        .namespace("default")
        .annotation("team", "payments")
        .annotation("prometheus.io/scrape", "true")
        .build();
    let (bytes, _) = mutate(&pod_review("keep-1", &pod), &PolicyConfig::default()).unwrap();

    assert_eq!(
        patch_of(&response_of(&bytes)).unwrap(),
        json!([{
            "op": "add",
            "path": "/metadata/annotations/openshift-build-annotate~1status",
            "value": "injected"
        }])
    );
}

#[test]
fn test_stale_status_is_replaced() {
    let pod = PodBuilder::new("web-3")
        .namespace("default")
        .annotation(STATUS_ANNOTATION_KEY, "pending")
        .build();
    let (bytes, _) = mutate(&pod_review("stale-1", &pod), &PolicyConfig::default()).unwrap();

    assert_eq!(
        patch_of(&response_of(&bytes)).unwrap(),
        json!([{
            "op": "replace",
            "path": "/metadata/annotations/openshift-build-annotate~1status",
            "value": "injected"
        }])
    );
}

#[test]
fn test_patch_applies_cleanly_to_pod() {
    let pod = PodBuilder::new("web-4")
        .namespace("default")
        .annotation("team", "payments")
        .build();
    let (bytes, _) = mutate(&pod_review("apply-1", &pod), &PolicyConfig::default()).unwrap();

    let patch: json_patch::Patch =
        serde_json::from_value(patch_of(&response_of(&bytes)).unwrap()).unwrap();
    let mut doc = serde_json::to_value(&pod).unwrap();
    json_patch::patch(&mut doc, &patch.0).unwrap();

    assert_eq!(doc["metadata"]["annotations"]["team"], "payments");
    assert_eq!(
        doc["metadata"]["annotations"]["openshift-build-annotate/status"],
        "injected"
    );
}

#[test]
fn test_namespace_taken_from_request_when_pod_has_none() {
    let pod = PodBuilder::new("web-5").build();
    let object = crate::common::fixtures::pod_object(&pod);
    let body = review_body("ns-1", Some("kube-public"), object);
    let (_, outcome) = mutate(&body, &PolicyConfig::default()).unwrap();

    assert_eq!(
        outcome,
        AdmissionOutcome::Skipped(SkipReason::IgnoredNamespace)
    );
}

#[test]
fn test_malformed_object_fails_open() {
    let object = json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": {"name": "broken", "namespace": "default"},
        "spec": {"containers": {"name": "not-a-list"}}
    });
    let body = review_body("broken-1", Some("default"), object);
    let (bytes, outcome) = mutate(&body, &PolicyConfig::default()).unwrap();

    assert_eq!(outcome, AdmissionOutcome::ObjectDecodeFailed);
    let response = response_of(&bytes);
    assert_eq!(response["uid"], "broken-1");
    assert_eq!(response["allowed"], true);
    assert!(response.get("patch").is_none());
}

#[test]
fn test_malformed_object_fails_closed_when_configured() {
    let object = json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": {"name": "broken", "namespace": "default"},
        "spec": {"containers": true}
    });
    let body = review_body("broken-2", Some("default"), object);
    let config =
        PolicyConfig::default().with_object_decode_failure(ObjectDecodeFailurePolicy::Deny);
    let (bytes, _) = mutate(&body, &config).unwrap();

    let response = response_of(&bytes);
    assert_eq!(response["uid"], "broken-2");
    assert_eq!(response["allowed"], false);
    assert!(response.get("patch").is_none());
}

#[test]
fn test_non_string_annotation_value_fails_open() {
    let object = json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": {"name": "odd", "namespace": "default", "annotations": {"team": 5}},
        "spec": {"containers": [{"name": "odd", "image": "nginx:1.27"}]}
    });
    let body = review_body("odd-1", Some("default"), object);
    let (bytes, outcome) = mutate(&body, &PolicyConfig::default()).unwrap();

    assert_eq!(outcome, AdmissionOutcome::ObjectDecodeFailed);
    let response = response_of(&bytes);
    assert_eq!(response["uid"], "odd-1");
    assert_eq!(response["allowed"], true);
    assert!(response.get("patch").is_none());
}

#[test]
fn test_string_object_fails_open() {
    let body = review_body("odd-2", Some("default"), json!("not-a-pod"));
    let (bytes, outcome) = mutate(&body, &PolicyConfig::default()).unwrap();

    assert_eq!(outcome, AdmissionOutcome::ObjectDecodeFailed);
    let response = response_of(&bytes);
    assert_eq!(response["uid"], "odd-2");
    assert_eq!(response["allowed"], true);
    assert!(response.get("patch").is_none());
}

#[test]
fn test_string_object_fails_closed_when_configured() {
    let body = review_body("odd-3", Some("default"), json!("not-a-pod"));
    let config =
        PolicyConfig::default().with_object_decode_failure(ObjectDecodeFailurePolicy::Deny);
    let (bytes, outcome) = mutate(&body, &config).unwrap();

    assert_eq!(outcome, AdmissionOutcome::ObjectDecodeFailed);
    let response = response_of(&bytes);
    assert_eq!(response["uid"], "odd-3");
    assert_eq!(response["allowed"], false);
}

#[test]
fn test_missing_object_fails_open() {
    let body = serde_json::to_vec(&json!({
        "apiVersion": "admission.k8s.io/v1",
        "kind": "AdmissionReview",
        "request": {
            "uid": "no-object",
            "kind": {"group": "", "version": "v1", "kind": "Pod"},
            "resource": {"group": "", "version": "v1", "resource": "pods"},
            "operation": "CREATE",
            "userInfo": {}
        }
    }))
    .unwrap();
    let (bytes, outcome) = mutate(&body, &PolicyConfig::default()).unwrap();

    assert_eq!(outcome, AdmissionOutcome::ObjectDecodeFailed);
    assert_eq!(response_of(&bytes)["allowed"], true);
}

#[test]
fn test_garbage_body_is_decode_error() {
    let err = mutate(b"not an admission review", &PolicyConfig::default()).unwrap_err();
    assert!(matches!(err, Error::Decode(_)));
    assert!(err.to_string().contains("unmarshaling request failed"));
}
