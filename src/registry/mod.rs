//! Registry session: authentication, content fetch, and extraction.
//!
//! The session talks to a registry through the [`RegistryTransport`] trait
//! and unpacks layers through the [`LayerExtractor`] trait, so the workflow
//! can be exercised in tests without network access. [`http::HttpRegistry`]
//! and [`extraction::TarExtractor`] are the production implementations.

pub mod challenge;
pub mod digest;
pub mod extraction;
pub mod http;
pub mod manifest;
pub mod staging;

use crate::credentials::{CredentialKind, Credentials};
use crate::deadline::{Deadline, DeadlineExceeded};
use crate::reference::ArtifactReference;
use digest::{Sha256Digest, compute_sha256};
use extraction::{ExtractionError, LayerExtractor};
use manifest::{LayerCompression, ManifestError, REVISION_ANNOTATION, SOURCE_ANNOTATION};
use staging::StagingArea;
use std::fmt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use thiserror::Error;

/// Authentication material presented to a registry.
#[derive(Clone, Default, PartialEq, Eq)]
pub enum RegistryAuth {
    /// No credentials; anonymous tokens may still be negotiated.
    #[default]
    Anonymous,
    /// HTTP basic credentials.
    Basic {
        /// User name.
        username: String,
        /// Password or access token.
        secret: String,
    },
    /// A pre-issued bearer token.
    Bearer(String),
}

impl From<CredentialKind> for RegistryAuth {
    fn from(kind: CredentialKind) -> Self {
        match kind {
            CredentialKind::Basic { username, secret } => Self::Basic { username, secret },
            CredentialKind::Token(token) => Self::Bearer(token),
        }
    }
}

impl fmt::Debug for RegistryAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Anonymous => f.write_str("Anonymous"),
            Self::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("secret", &"<redacted>")
                .finish(),
            Self::Bearer(_) => f.write_str("Bearer(<redacted>)"),
        }
    }
}

/// Errors raised by a registry transport or while fetching content.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The registry rejected the request's credentials.
    #[error("unauthorized request to {url}: {reason}")]
    Unauthorized {
        /// The URL that was requested.
        url: String,
        /// Description of the rejection.
        reason: String,
    },

    /// The requested manifest or blob does not exist.
    #[error("not found: {url}")]
    NotFound {
        /// The URL that returned 404.
        url: String,
    },

    /// The request failed for any other reason.
    #[error("request to {url} failed: {reason}")]
    Http {
        /// The URL that was requested.
        url: String,
        /// A human-readable description of the failure.
        reason: String,
    },

    /// The run's deadline passed while the request was in flight.
    #[error(transparent)]
    Timeout(#[from] DeadlineExceeded),

    /// The manifest could not be parsed or failed validation.
    #[error("invalid manifest: {0}")]
    InvalidManifest(#[from] ManifestError),

    /// Downloaded content does not hash to the digest it was expected to
    /// have: a layer's descriptor digest, or the signed manifest digest.
    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch {
        /// Digest from the manifest descriptor.
        expected: Sha256Digest,
        /// Digest of the downloaded bytes.
        actual: Sha256Digest,
    },

    /// A layer is not a compressed tar stream.
    #[error("unsupported layer media type {media_type}")]
    UnsupportedMediaType {
        /// The rejected media type.
        media_type: String,
    },

    /// Local I/O failed while storing downloaded content.
    #[error("I/O error storing registry content: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from [`RegistrySession::pull`], split by whether the registry or
/// the local extraction failed.
#[derive(Debug, Error)]
pub enum PullError {
    /// Fetching the manifest or a layer failed.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Unpacking or promoting the content failed.
    #[error(transparent)]
    Extraction(#[from] ExtractionError),
}

/// Network operations a registry session needs.
#[cfg_attr(test, mockall::automock)]
pub trait RegistryTransport {
    /// Perform the login handshake for `reference`'s registry.
    ///
    /// Implementations may cache any token obtained for later requests.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Unauthorized`] when the registry rejects the
    /// credentials, [`RegistryError::Timeout`] when the deadline passes, and
    /// another [`RegistryError`] when the registry cannot be reached.
    fn login(
        &self,
        reference: &ArtifactReference,
        auth: &RegistryAuth,
        deadline: Deadline,
    ) -> Result<(), RegistryError>;

    /// Fetch the raw manifest document for `reference`.
    ///
    /// # Errors
    ///
    /// Returns a [`RegistryError`] if the request fails.
    fn fetch_manifest(
        &self,
        reference: &ArtifactReference,
        auth: &RegistryAuth,
        deadline: Deadline,
    ) -> Result<Vec<u8>, RegistryError>;

    /// Download the blob `digest` from `reference`'s repository into `dest`.
    ///
    /// # Errors
    ///
    /// Returns a [`RegistryError`] if the request or the file write fails.
    fn fetch_blob(
        &self,
        reference: &ArtifactReference,
        digest: &Sha256Digest,
        auth: &RegistryAuth,
        dest: &Path,
        deadline: Deadline,
    ) -> Result<(), RegistryError>;
}

/// A downloaded, digest-checked layer awaiting extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedLayer {
    /// Location of the blob in the scratch directory.
    pub path: PathBuf,
    /// The layer's content digest.
    pub digest: Sha256Digest,
    /// How the layer is compressed.
    pub compression: LayerCompression,
}

/// Manifest metadata and downloaded layers for one artifact.
///
/// The layers live in a scratch directory that is removed when this value
/// is dropped.
#[derive(Debug)]
pub struct FetchedArtifact {
    /// The manifest digest.
    pub digest: Sha256Digest,
    /// Source annotation, if present.
    pub source: Option<String>,
    /// Revision annotation, if present.
    pub revision: Option<String>,
    /// Layers in manifest order.
    pub layers: Vec<FetchedLayer>,
    _scratch: TempDir,
}

/// The result of a completed pull.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PulledArtifact {
    /// The manifest digest.
    pub digest: Sha256Digest,
    /// Source annotation, if present.
    pub source: Option<String>,
    /// Revision annotation, if present.
    pub revision: Option<String>,
    /// Sorted top-level entries written to the destination.
    pub files: Vec<String>,
}

/// An optionally authenticated handle to a registry.
///
/// # Examples
///
/// ```no_run
/// use modpull::deadline::Deadline;
/// use modpull::reference::resolve;
/// use modpull::registry::RegistrySession;
/// use modpull::registry::extraction::TarExtractor;
/// use modpull::registry::http::HttpRegistry;
/// use std::path::Path;
/// use std::time::Duration;
///
/// let transport = HttpRegistry::new(false);
/// let session = RegistrySession::new(&transport, &TarExtractor);
/// let reference = resolve("oci://ghcr.io/org/app", "1.0.0")?;
/// let deadline = Deadline::after(Duration::from_secs(60));
/// let pulled = session.pull(&reference, Path::new("./app"), deadline)?;
/// println!("pulled {}", pulled.digest);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct RegistrySession<'a> {
    transport: &'a dyn RegistryTransport,
    extractor: &'a dyn LayerExtractor,
    auth: RegistryAuth,
}

impl<'a> RegistrySession<'a> {
    /// Create an anonymous session.
    #[must_use]
    pub fn new(transport: &'a dyn RegistryTransport, extractor: &'a dyn LayerExtractor) -> Self {
        Self {
            transport,
            extractor,
            auth: RegistryAuth::Anonymous,
        }
    }

    /// Return the authentication the session presents.
    #[must_use]
    pub const fn auth(&self) -> &RegistryAuth {
        &self.auth
    }

    /// Install `credentials` on the session and log in to the registry.
    ///
    /// Empty credentials leave the session anonymous and perform no network
    /// call. Returns whether a login took place.
    ///
    /// # Errors
    ///
    /// Returns a [`RegistryError`] if the login handshake fails; the session
    /// stays anonymous in that case.
    pub fn authenticate(
        &mut self,
        reference: &ArtifactReference,
        credentials: Credentials,
        deadline: Deadline,
    ) -> Result<bool, RegistryError> {
        let Some(kind) = credentials.into_kind() else {
            log::debug!("no credentials supplied; using anonymous access");
            return Ok(false);
        };
        let auth = RegistryAuth::from(kind);
        self.transport.login(reference, &auth, deadline)?;
        log::debug!("logged in to {}", reference.registry());
        self.auth = auth;
        Ok(true)
    }

    /// Fetch the manifest and download every layer into a scratch directory.
    ///
    /// When `pinned` is given the manifest must hash to it, so a tag moved
    /// after verification is refused before any layer is downloaded. Layer
    /// media types are checked before any blob is downloaded, and each blob
    /// is hashed against its descriptor after download.
    ///
    /// # Errors
    ///
    /// Returns a [`RegistryError`] if the manifest is unusable, a download
    /// fails, or a digest does not match.
    pub fn fetch(
        &self,
        reference: &ArtifactReference,
        pinned: Option<&Sha256Digest>,
        deadline: Deadline,
    ) -> Result<FetchedArtifact, RegistryError> {
        let raw = self
            .transport
            .fetch_manifest(reference, &self.auth, deadline)?;
        let digest = Sha256Digest::of_bytes(&raw);
        if let Some(expected) = pinned.filter(|signed| **signed != digest) {
            return Err(RegistryError::DigestMismatch {
                expected: expected.clone(),
                actual: digest,
            });
        }
        let manifest = manifest::parse_manifest(&raw)?;
        log::debug!(
            "manifest {digest} lists {} layer(s)",
            manifest.layers().len()
        );

        let planned = manifest
            .layers()
            .iter()
            .map(|layer| {
                LayerCompression::from_media_type(&layer.media_type)
                    .map(|compression| (layer, compression))
                    .ok_or_else(|| RegistryError::UnsupportedMediaType {
                        media_type: layer.media_type.clone(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let scratch = tempfile::Builder::new().prefix("modpull-blobs-").tempdir()?;
        let mut layers = Vec::with_capacity(planned.len());
        for (descriptor, compression) in planned {
            let path = scratch.path().join(descriptor.digest.hex());
            self.transport.fetch_blob(
                reference,
                &descriptor.digest,
                &self.auth,
                &path,
                deadline,
            )?;
            let actual = compute_sha256(&path)?;
            if actual != descriptor.digest {
                return Err(RegistryError::DigestMismatch {
                    expected: descriptor.digest.clone(),
                    actual,
                });
            }
            log::trace!("layer {} verified", descriptor.digest);
            layers.push(FetchedLayer {
                path,
                digest: descriptor.digest.clone(),
                compression,
            });
        }

        Ok(FetchedArtifact {
            digest,
            source: manifest.annotation(SOURCE_ANNOTATION).map(str::to_owned),
            revision: manifest.annotation(REVISION_ANNOTATION).map(str::to_owned),
            layers,
            _scratch: scratch,
        })
    }

    /// Extract fetched layers in order and promote them into `destination`.
    ///
    /// # Errors
    ///
    /// Returns an [`ExtractionError`] if any layer fails to unpack or the
    /// staged content cannot be promoted; `destination` is left unchanged.
    pub fn unpack(
        &self,
        fetched: FetchedArtifact,
        destination: &Path,
    ) -> Result<PulledArtifact, ExtractionError> {
        let staging = StagingArea::create(destination)?;
        for layer in &fetched.layers {
            let entries = self
                .extractor
                .extract(&layer.path, layer.compression, staging.path())?;
            log::debug!(
                "extracted {} entries from {} layer {}",
                entries.len(),
                layer.compression,
                layer.digest
            );
        }
        let files = staging.promote()?;

        Ok(PulledArtifact {
            digest: fetched.digest,
            source: fetched.source,
            revision: fetched.revision,
            files,
        })
    }

    /// Fetch `reference` and extract it into `destination`.
    ///
    /// # Errors
    ///
    /// Returns [`PullError::Registry`] for fetch failures and
    /// [`PullError::Extraction`] for local unpacking failures.
    pub fn pull(
        &self,
        reference: &ArtifactReference,
        destination: &Path,
        deadline: Deadline,
    ) -> Result<PulledArtifact, PullError> {
        let fetched = self.fetch(reference, None, deadline)?;
        Ok(self.unpack(fetched, destination)?)
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
