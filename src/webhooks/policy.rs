//! Mutation policy for incoming Pods.
//!
//! Checks run in order and the first match wins:
//! 1. Ignored namespace: never mutated
//! 2. Status annotation already `injected`: never mutated again
//! 3. Opt-out annotation set to a disable token: skipped
//!
//! Anything else is mutated (default-on).

use std::collections::BTreeMap;
use std::fmt;

use tracing::debug;

use crate::config::PolicyConfig;

/// Why a Pod was left alone
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SkipReason {
    /// Namespace is on the ignore list
    IgnoredNamespace,
    /// Status annotation already marks the Pod as injected
    AlreadyInjected,
    /// Opt-out annotation carries a disable token
    OptedOut,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::IgnoredNamespace => write!(f, "IgnoredNamespace"),
            SkipReason::AlreadyInjected => write!(f, "AlreadyInjected"),
            SkipReason::OptedOut => write!(f, "OptedOut"),
        }
    }
}

/// Outcome of the policy check
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PolicyDecision {
    Mutate,
    Skip(SkipReason),
}

impl PolicyDecision {
    /// Check if the Pod should be patched
    pub fn is_mutate(&self) -> bool {
        matches!(self, PolicyDecision::Mutate)
    }
}

/// Evaluate the mutation policy for a Pod.
pub fn evaluate(
    namespace: &str,
    annotations: Option<&BTreeMap<String, String>>,
    config: &PolicyConfig,
) -> PolicyDecision {
    if config.is_ignored_namespace(namespace) {
        debug!(namespace = %namespace, "Namespace is ignored");
        return PolicyDecision::Skip(SkipReason::IgnoredNamespace);
    }

    let status = annotation(annotations, &config.status_key);
    let decision = if status.eq_ignore_ascii_case(&config.injected_value) {
        PolicyDecision::Skip(SkipReason::AlreadyInjected)
    } else if config.is_disable_token(annotation(annotations, &config.inject_key)) {
        PolicyDecision::Skip(SkipReason::OptedOut)
    } else {
        PolicyDecision::Mutate
    };

    debug!(
        namespace = %namespace,
        status = %status,
        required = decision.is_mutate(),
        "Mutation policy evaluated"
    );
    decision
}

/// Missing annotations read as the empty string
fn annotation<'a>(annotations: Option<&'a BTreeMap<String, String>>, key: &str) -> &'a str {
    annotations
        .and_then(|a| a.get(key))
        .map(String::as_str)
        .unwrap_or_default()
}

/// Check whether a Pod needs the provenance annotations.
pub fn should_mutate(
    namespace: &str,
    annotations: Option<&BTreeMap<String, String>>,
    config: &PolicyConfig,
) -> bool {
    evaluate(namespace, annotations, config).is_mutate()
}
