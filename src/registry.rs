//! Registry label resolver.
//!
//! Looks up an image's configuration blob in its registry and extracts
//! build-provenance labels from `config.Labels`. Lookups are best-effort:
//! callers are expected to log a [`RegistryError`] and carry on, and nothing
//! on the admission path waits on a registry.
//!
//! Labels read:
//!
//! | Label | Field |
//! |-------|-------|
//! | `maintainer` | `commit_author` |
//! | `io.openshift.build.commit.author` | `commit_author` (when `maintainer` is absent) |
//! | `io.openshift.build.commit.date` | `commit_date` |
//! | `io.openshift.build.commit.id` | `commit_id` |
//! | `io.openshift.build.commit.message` | `commit_message` |
//! | `io.openshift.build.commit.ref` | `commit_ref` |

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use oci_distribution::client::{ClientConfig, ClientProtocol};
use oci_distribution::secrets::RegistryAuth;
use oci_distribution::{Client, Reference};
use serde::Deserialize;
use tracing::{debug, info};

/// Maximum accepted image reference length
pub const MAX_IMAGE_REF_LEN: usize = 512;
/// Default bound on a single registry lookup
pub const REGISTRY_TIMEOUT: Duration = Duration::from_secs(10);
/// Prefix for annotations rendered from provenance labels
pub const PROVENANCE_ANNOTATION_PREFIX: &str = "openshift-build-annotate/";

const MAINTAINER_LABEL: &str = "maintainer";
const COMMIT_AUTHOR_LABEL: &str = "io.openshift.build.commit.author";
const COMMIT_DATE_LABEL: &str = "io.openshift.build.commit.date";
const COMMIT_ID_LABEL: &str = "io.openshift.build.commit.id";
const COMMIT_MESSAGE_LABEL: &str = "io.openshift.build.commit.message";
const COMMIT_REF_LABEL: &str = "io.openshift.build.commit.ref";

/// Errors from registry lookups
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Reference is malformed or too long
    #[error("invalid image reference '{reference}': {reason}")]
    InvalidReference { reference: String, reason: String },

    /// Registry could not be reached or refused the request
    #[error("could not get defaults about image {reference}: {reason}")]
    Fetch { reference: String, reason: String },

    /// Configuration blob is not valid JSON
    #[error("could not parse response from registry for image {reference}: {source}")]
    Parse {
        reference: String,
        #[source]
        source: serde_json::Error,
    },

    /// Lookup exceeded its deadline
    #[error("registry lookup for {reference} timed out after {duration:?}")]
    Timeout { reference: String, duration: Duration },
}

/// Build provenance extracted from image labels.
///
/// Every field is optional; the default value means nothing was found.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProvenanceLabels {
    pub commit_author: Option<String>,
    pub commit_date: Option<String>,
    pub commit_id: Option<String>,
    pub commit_message: Option<String>,
    pub commit_ref: Option<String>,
}

impl ProvenanceLabels {
    /// Check if no provenance was found
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Render populated fields as Pod annotations.
    ///
    /// Keys are `openshift-build-annotate/commit-author` and so on.
    pub fn to_annotations(&self) -> BTreeMap<String, String> {
        [
            ("commit-author", &self.commit_author),
            ("commit-date", &self.commit_date),
            ("commit-id", &self.commit_id),
            ("commit-message", &self.commit_message),
            ("commit-ref", &self.commit_ref),
        ]
        .into_iter()
        .filter_map(|(name, value)| {
            value
                .as_ref()
                .map(|v| (format!("{PROVENANCE_ANNOTATION_PREFIX}{name}"), v.clone()))
        })
        .collect()
    }
}

#[derive(Deserialize)]
struct ImageConfig {
    #[serde(default)]
    config: Option<ImageConfigBody>,
}

#[derive(Deserialize)]
struct ImageConfigBody {
    #[serde(rename = "Labels", default)]
    labels: Option<BTreeMap<String, String>>,
}

/// Extract provenance labels from a raw image configuration blob.
///
/// A configuration without labels yields [`ProvenanceLabels::default`].
pub fn labels_from_config(
    reference: &str,
    config_json: &str,
) -> Result<ProvenanceLabels, RegistryError> {
    let config: ImageConfig =
        serde_json::from_str(config_json).map_err(|source| RegistryError::Parse {
            reference: reference.to_string(),
            source,
        })?;

    let Some(labels) = config.config.and_then(|c| c.labels) else {
        debug!(image = %reference, "Image config has no labels");
        return Ok(ProvenanceLabels::default());
    };

    let get = |key: &str| labels.get(key).filter(|v| !v.is_empty()).cloned();

    Ok(ProvenanceLabels {
        commit_author: get(MAINTAINER_LABEL).or_else(|| get(COMMIT_AUTHOR_LABEL)),
        commit_date: get(COMMIT_DATE_LABEL),
        commit_id: get(COMMIT_ID_LABEL),
        commit_message: get(COMMIT_MESSAGE_LABEL),
        commit_ref: get(COMMIT_REF_LABEL),
    })
}

/// Validate and parse an image reference
pub fn parse_reference(image_ref: &str) -> Result<Reference, RegistryError> {
    let invalid = |reason: String| RegistryError::InvalidReference {
        reference: image_ref.to_string(),
        reason,
    };

    if image_ref.is_empty() {
        return Err(invalid("empty reference".to_string()));
    }

    if image_ref.len() > MAX_IMAGE_REF_LEN {
        return Err(invalid(format!("exceeds {} bytes", MAX_IMAGE_REF_LEN)));
    }

    if !image_ref
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | ':' | '.' | '-' | '_' | '@'))
    {
        return Err(invalid("contains invalid characters".to_string()));
    }

    image_ref.parse().map_err(|e| invalid(format!("{}", e)))
}

/// Source of raw image configuration blobs
#[async_trait]
pub trait ImageConfigFetcher: Send + Sync {
    /// Fetch the configuration JSON for an image
    async fn fetch_config(&self, reference: &Reference) -> Result<String, RegistryError>;
}

/// Fetcher backed by an OCI distribution client.
pub struct OciConfigFetcher {
    client: Client,
    auth: RegistryAuth,
}

impl OciConfigFetcher {
    /// Create a fetcher with anonymous auth
    pub fn new() -> Self {
        Self {
            client: Client::new(ClientConfig {
                protocol: ClientProtocol::Https,
                ..Default::default()
            }),
            auth: RegistryAuth::Anonymous,
        }
    }

    /// Create a fetcher with basic auth
    pub fn with_auth(username: &str, password: &str) -> Self {
        Self {
            auth: RegistryAuth::Basic(username.to_string(), password.to_string()),
            ..Self::new()
        }
    }
}

impl Default for OciConfigFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ImageConfigFetcher for OciConfigFetcher {
    async fn fetch_config(&self, reference: &Reference) -> Result<String, RegistryError> {
        let (_manifest, digest, config) = self
            .client
            .pull_manifest_and_config(reference, &self.auth)
            .await
            .map_err(|e| RegistryError::Fetch {
                reference: reference.whole(),
                reason: e.to_string(),
            })?;
        debug!(image = %reference.whole(), digest = %digest, "Fetched image config");
        Ok(config)
    }
}

/// Resolves provenance labels for image references.
pub struct RegistryLabelResolver<F = OciConfigFetcher> {
    fetcher: F,
    timeout: Duration,
}

impl RegistryLabelResolver<OciConfigFetcher> {
    /// Create a resolver using anonymous registry access
    pub fn new() -> Self {
        Self::with_fetcher(OciConfigFetcher::new())
    }
}

impl Default for RegistryLabelResolver<OciConfigFetcher> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: ImageConfigFetcher> RegistryLabelResolver<F> {
    /// Create a resolver over a custom fetcher
    pub fn with_fetcher(fetcher: F) -> Self {
        Self {
            fetcher,
            timeout: REGISTRY_TIMEOUT,
        }
    }

    /// Override the per-lookup deadline
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Resolve provenance labels for an image.
    ///
    /// # Errors
    ///
    /// - [`RegistryError::InvalidReference`]: malformed reference
    /// - [`RegistryError::Fetch`]: registry unreachable or image not found
    /// - [`RegistryError::Parse`]: configuration is not JSON
    /// - [`RegistryError::Timeout`]: lookup exceeded the deadline
    pub async fn resolve(&self, image_ref: &str) -> Result<ProvenanceLabels, RegistryError> {
        let reference = parse_reference(image_ref)?;

        info!(image = %image_ref, "Resolving image labels");

        let config = tokio::time::timeout(self.timeout, self.fetcher.fetch_config(&reference))
            .await
            .map_err(|_| RegistryError::Timeout {
                reference: image_ref.to_string(),
                duration: self.timeout,
            })??;

        labels_from_config(image_ref, &config)
    }
}
