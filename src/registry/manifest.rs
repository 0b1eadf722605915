//! OCI image manifest deserialization.
//!
//! Only the fields the puller needs are modelled: the layer descriptors and
//! the provenance annotations. Validation runs at parse time so the session
//! never sees a manifest without layers or with malformed digests.

use super::digest::Sha256Digest;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// `Accept` header value listing the manifest formats the puller understands.
pub const MANIFEST_ACCEPT: &str = concat!(
    "application/vnd.oci.image.manifest.v1+json, ",
    "application/vnd.docker.distribution.manifest.v2+json"
);

/// Annotation naming the source repository the module was built from.
pub const SOURCE_ANNOTATION: &str = "org.opencontainers.image.source";

/// Annotation naming the source revision the module was built from.
pub const REVISION_ANNOTATION: &str = "org.opencontainers.image.revision";

/// The only manifest schema version in use.
const SUPPORTED_SCHEMA_VERSION: u32 = 2;

/// Errors arising from manifest parsing.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// JSON deserialization or field validation failed.
    #[error("manifest parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// The manifest declares a schema version other than 2.
    #[error("unsupported manifest schema version {0}")]
    UnsupportedSchemaVersion(u32),

    /// The manifest lists no layers.
    #[error("manifest contains no layers")]
    NoLayers,
}

/// How a layer blob is compressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayerCompression {
    /// A gzip-compressed tar stream.
    Gzip,
    /// A zstd-compressed tar stream.
    Zstd,
}

impl LayerCompression {
    /// Classify a layer media type by its `.tar+gzip`, `.tar.gzip`, or
    /// `.tar+zstd` suffix.
    ///
    /// Returns `None` for media types that are not compressed tar streams.
    ///
    /// # Examples
    ///
    /// ```
    /// use modpull::registry::manifest::LayerCompression;
    ///
    /// assert_eq!(
    ///     LayerCompression::from_media_type("application/vnd.oci.image.layer.v1.tar+gzip"),
    ///     Some(LayerCompression::Gzip),
    /// );
    /// assert_eq!(LayerCompression::from_media_type("application/json"), None);
    /// ```
    #[must_use]
    pub fn from_media_type(media_type: &str) -> Option<Self> {
        if media_type.ends_with(".tar+gzip") || media_type.ends_with(".tar.gzip") {
            Some(Self::Gzip)
        } else if media_type.ends_with(".tar+zstd") {
            Some(Self::Zstd)
        } else {
            None
        }
    }
}

impl fmt::Display for LayerCompression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gzip => f.write_str("gzip"),
            Self::Zstd => f.write_str("zstd"),
        }
    }
}

/// A content descriptor from the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    /// Media type of the referenced content.
    pub media_type: String,
    /// Content address.
    pub digest: Sha256Digest,
    /// Declared size in bytes.
    pub size: u64,
}

/// A parsed image manifest.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageManifest {
    schema_version: u32,
    config: Descriptor,
    layers: Vec<Descriptor>,
    #[serde(default)]
    annotations: BTreeMap<String, String>,
}

impl ImageManifest {
    /// Return the config descriptor.
    #[must_use]
    pub fn config(&self) -> &Descriptor {
        &self.config
    }

    /// Return the layer descriptors in application order.
    #[must_use]
    pub fn layers(&self) -> &[Descriptor] {
        &self.layers
    }

    /// Return the annotation stored under `key`, if any.
    #[must_use]
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.get(key).map(String::as_str)
    }
}

/// Parse and validate a manifest document.
///
/// # Errors
///
/// Returns [`ManifestError`] when the JSON is malformed, a digest is
/// invalid, the schema version is not 2, or no layers are listed.
pub fn parse_manifest(bytes: &[u8]) -> Result<ImageManifest, ManifestError> {
    let manifest: ImageManifest = serde_json::from_slice(bytes)?;
    if manifest.schema_version != SUPPORTED_SCHEMA_VERSION {
        return Err(ManifestError::UnsupportedSchemaVersion(
            manifest.schema_version,
        ));
    }
    if manifest.layers.is_empty() {
        return Err(ManifestError::NoLayers);
    }
    Ok(manifest)
}
