//! Process-wide configuration.
//!
//! [`PolicyConfig`] holds the annotation keys and namespace ignore list the
//! policy evaluator works against. It is built once at startup, wrapped in an
//! `Arc`, and never mutated afterwards.
//!
//! [`ServerConfig`] holds listener settings. Defaults are compiled in; a few
//! environment variables may override them.

use std::collections::BTreeSet;
use std::time::Duration;

use tracing::warn;

/// Annotation that lets a Pod opt out of mutation
pub const INJECT_ANNOTATION_KEY: &str = "openshift-build-annotate/mutate";
/// Annotation recording that the Pod has already been mutated
pub const STATUS_ANNOTATION_KEY: &str = "openshift-build-annotate/status";
/// Value written to [`STATUS_ANNOTATION_KEY`] once mutated
pub const INJECTED_STATUS: &str = "injected";

/// Values of [`INJECT_ANNOTATION_KEY`] that disable mutation (matched case-insensitively).
///
/// `of` is kept as-is: Pods in the wild already carry it.
pub const DISABLE_TOKENS: &[&str] = &["n", "no", "false", "of"];

/// Namespaces that are never mutated
pub const IGNORED_NAMESPACES: &[&str] = &["kube-system", "kube-public"];

/// Default path to webhook TLS certificate
pub const WEBHOOK_CERT_PATH: &str = "./tls/tls.crt";
/// Default path to webhook TLS private key
pub const WEBHOOK_KEY_PATH: &str = "./tls/tls.key";
/// Default webhook server port
pub const WEBHOOK_PORT: u16 = 8443;
/// Default health server port
pub const HEALTH_PORT: u16 = 8080;
/// Default deadline for reading and answering one request
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// What to do when the embedded object cannot be decoded as a Pod.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ObjectDecodeFailurePolicy {
    /// Admit the Pod unmodified.
    #[default]
    Allow,
    /// Reject the Pod with the decode error as the status message.
    Deny,
}

/// Immutable policy configuration shared by every request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PolicyConfig {
    /// Opt-out annotation key
    pub inject_key: String,
    /// Mutation status annotation key
    pub status_key: String,
    /// Status value marking a Pod as already mutated
    pub injected_value: String,
    /// Lowercase opt-out values for `inject_key`
    pub disable_tokens: BTreeSet<String>,
    /// Namespaces skipped regardless of annotations
    pub ignored_namespaces: BTreeSet<String>,
    /// Behaviour when the embedded object is not a valid Pod
    pub on_object_decode_failure: ObjectDecodeFailurePolicy,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            inject_key: INJECT_ANNOTATION_KEY.to_string(),
            status_key: STATUS_ANNOTATION_KEY.to_string(),
            injected_value: INJECTED_STATUS.to_string(),
            disable_tokens: DISABLE_TOKENS.iter().map(|t| t.to_string()).collect(),
            ignored_namespaces: IGNORED_NAMESPACES.iter().map(|n| n.to_string()).collect(),
            on_object_decode_failure: ObjectDecodeFailurePolicy::default(),
        }
    }
}

impl PolicyConfig {
    /// Replace the object decode failure policy
    pub fn with_object_decode_failure(mut self, policy: ObjectDecodeFailurePolicy) -> Self {
        self.on_object_decode_failure = policy;
        self
    }

    /// Replace the ignored namespace set
    pub fn with_ignored_namespaces<I, S>(mut self, namespaces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ignored_namespaces = namespaces.into_iter().map(Into::into).collect();
        self
    }

    /// Check whether a namespace is on the ignore list
    pub fn is_ignored_namespace(&self, namespace: &str) -> bool {
        self.ignored_namespaces.contains(namespace)
    }

    /// Check whether an opt-out annotation value disables mutation
    pub fn is_disable_token(&self, value: &str) -> bool {
        self.disable_tokens.contains(&value.to_lowercase())
    }
}

/// Listener configuration for the webhook and health servers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerConfig {
    pub webhook_port: u16,
    pub health_port: u16,
    pub cert_path: String,
    pub key_path: String,
    pub request_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            webhook_port: WEBHOOK_PORT,
            health_port: HEALTH_PORT,
            cert_path: WEBHOOK_CERT_PATH.to_string(),
            key_path: WEBHOOK_KEY_PATH.to_string(),
            request_timeout: REQUEST_TIMEOUT,
        }
    }
}

impl ServerConfig {
    /// Build from process environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup.
    ///
    /// Unparsable values are logged and ignored.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let parse_port = |key: &str, default: u16| match lookup(key) {
            Some(raw) => raw.parse::<u16>().unwrap_or_else(|_| {
                warn!(variable = key, value = %raw, "Invalid port, using default");
                default
            }),
            None => default,
        };

        let request_timeout = match lookup("WEBHOOK_REQUEST_TIMEOUT_SECS") {
            Some(raw) => match raw.parse::<u64>() {
                Ok(secs) if secs > 0 => Duration::from_secs(secs),
                _ => {
                    warn!(
                        variable = "WEBHOOK_REQUEST_TIMEOUT_SECS",
                        value = %raw,
                        "Invalid timeout, using default"
                    );
                    defaults.request_timeout
                }
            },
            None => defaults.request_timeout,
        };

        Self {
            webhook_port: parse_port("WEBHOOK_PORT", defaults.webhook_port),
            health_port: parse_port("HEALTH_PORT", defaults.health_port),
            cert_path: lookup("WEBHOOK_CERT_PATH").unwrap_or(defaults.cert_path),
            key_path: lookup("WEBHOOK_KEY_PATH").unwrap_or(defaults.key_path),
            request_timeout,
        }
    }
}
