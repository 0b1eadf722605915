//! Shared test utilities: stub collaborators and layer builders.
//!
//! Available to unit tests and, through the `test-support` feature, to the
//! behaviour tests under `tests/`.
#![cfg_attr(
    not(test),
    expect(clippy::expect_used, reason = "fixture builders fail loudly")
)]

use crate::deadline::Deadline;
use crate::reference::ArtifactReference;
use crate::registry::digest::Sha256Digest;
use crate::registry::{RegistryAuth, RegistryError, RegistryTransport};
use crate::trust::cosign::{BackendError, SignatureBackend, SignerCertificate};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use std::process::{ExitStatus, Output};
use std::sync::Mutex;

/// Media type of a gzip-compressed OCI layer.
pub const GZIP_LAYER: &str = "application/vnd.oci.image.layer.v1.tar+gzip";

/// Media type of a zstd-compressed OCI layer.
pub const ZSTD_LAYER: &str = "application/vnd.oci.image.layer.v1.tar+zstd";

/// Creates an `ExitStatus` from an exit code (Unix implementation).
#[cfg(unix)]
#[must_use]
pub fn exit_status(code: i32) -> ExitStatus {
    use std::os::unix::process::ExitStatusExt;

    ExitStatus::from_raw(code << 8)
}

/// Creates an `ExitStatus` from an exit code (Windows implementation).
#[cfg(windows)]
#[must_use]
pub fn exit_status(code: i32) -> ExitStatus {
    use std::os::windows::process::ExitStatusExt;

    ExitStatus::from_raw(code.unsigned_abs())
}

/// Creates a successful command `Output` with the given stdout.
#[must_use]
pub fn success_output(stdout: &str) -> Output {
    Output {
        status: exit_status(0),
        stdout: stdout.as_bytes().to_vec(),
        stderr: Vec::new(),
    }
}

/// Creates a failed command `Output` with the given stderr message.
#[must_use]
pub fn failure_output(stderr: &str) -> Output {
    Output {
        status: exit_status(1),
        stdout: Vec::new(),
        stderr: stderr.as_bytes().to_vec(),
    }
}

/// Build an uncompressed tar stream holding `files`.
///
/// # Panics
///
/// Panics if the in-memory archive cannot be written.
#[must_use]
pub fn tar_bytes(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (path, contents) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, path, *contents)
            .expect("append tar entry");
    }
    builder.into_inner().expect("finish tar stream")
}

/// Build a gzip-compressed tar layer holding `files`.
///
/// # Panics
///
/// Panics if compression fails.
#[must_use]
pub fn gzip_layer(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder
        .write_all(&tar_bytes(files))
        .expect("gzip tar stream");
    encoder.finish().expect("finish gzip stream")
}

/// Build a zstd-compressed tar layer holding `files`.
///
/// # Panics
///
/// Panics if compression fails.
#[must_use]
pub fn zstd_layer(files: &[(&str, &[u8])]) -> Vec<u8> {
    zstd::encode_all(tar_bytes(files).as_slice(), 0).expect("zstd tar stream")
}

/// Render an OCI manifest listing `layers` (media type, blob bytes).
#[must_use]
pub fn manifest_json(
    layers: &[(String, Vec<u8>)],
    annotations: &BTreeMap<String, String>,
) -> Vec<u8> {
    let config = b"{}";
    let layer_descriptors: Vec<serde_json::Value> = layers
        .iter()
        .map(|(media_type, blob)| {
            serde_json::json!({
                "mediaType": media_type,
                "digest": Sha256Digest::of_bytes(blob).to_string(),
                "size": blob.len(),
            })
        })
        .collect();
    serde_json::json!({
        "schemaVersion": 2,
        "mediaType": "application/vnd.oci.image.manifest.v1+json",
        "config": {
            "mediaType": "application/vnd.oci.image.config.v1+json",
            "digest": Sha256Digest::of_bytes(config).to_string(),
            "size": config.len(),
        },
        "layers": layer_descriptors,
        "annotations": annotations,
    })
    .to_string()
    .into_bytes()
}

/// An in-memory registry serving one artifact.
///
/// Records each call as `login`, `manifest`, or `blob` so tests can assert
/// which network operations happened.
#[derive(Debug)]
pub struct StubTransport {
    layers: Vec<(String, Vec<u8>)>,
    annotations: BTreeMap<String, String>,
    manifest: Vec<u8>,
    blobs: BTreeMap<String, Vec<u8>>,
    required_auth: Option<RegistryAuth>,
    calls: Mutex<Vec<String>>,
}

impl StubTransport {
    /// Serve a manifest listing `layers` (media type, blob bytes).
    #[must_use]
    pub fn serving(served: &[(&str, Vec<u8>)]) -> Self {
        let layers: Vec<(String, Vec<u8>)> = served
            .iter()
            .map(|(media_type, blob)| ((*media_type).to_owned(), blob.clone()))
            .collect();
        let blobs = layers
            .iter()
            .map(|(_, blob)| (Sha256Digest::of_bytes(blob).hex().to_owned(), blob.clone()))
            .collect();
        let annotations = BTreeMap::new();
        Self {
            manifest: manifest_json(&layers, &annotations),
            layers,
            annotations,
            blobs,
            required_auth: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Add a manifest annotation.
    #[must_use]
    pub fn with_annotation(mut self, key: &str, value: &str) -> Self {
        self.annotations.insert(key.to_owned(), value.to_owned());
        self.manifest = manifest_json(&self.layers, &self.annotations);
        self
    }

    /// Serve `bytes` for `digest` regardless of the manifest.
    #[must_use]
    pub fn with_blob(mut self, digest: &Sha256Digest, bytes: Vec<u8>) -> Self {
        self.blobs.insert(digest.hex().to_owned(), bytes);
        self
    }

    /// Reject every request not presenting `auth`.
    #[must_use]
    pub fn requiring(mut self, auth: RegistryAuth) -> Self {
        self.required_auth = Some(auth);
        self
    }

    /// Return the served manifest document.
    #[must_use]
    pub fn manifest(&self) -> &[u8] {
        &self.manifest
    }

    /// Return the calls made so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
    }

    fn record(&self, call: &str) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call.to_owned());
        }
    }

    fn authorize(&self, url: &str, auth: &RegistryAuth) -> Result<(), RegistryError> {
        match &self.required_auth {
            Some(required) if required != auth => Err(RegistryError::Unauthorized {
                url: url.to_owned(),
                reason: "HTTP 401".to_owned(),
            }),
            _ => Ok(()),
        }
    }
}

impl RegistryTransport for StubTransport {
    fn login(
        &self,
        reference: &ArtifactReference,
        auth: &RegistryAuth,
        deadline: Deadline,
    ) -> Result<(), RegistryError> {
        self.record("login");
        deadline.remaining()?;
        self.authorize(&format!("https://{}/v2/", reference.registry()), auth)
    }

    fn fetch_manifest(
        &self,
        reference: &ArtifactReference,
        auth: &RegistryAuth,
        deadline: Deadline,
    ) -> Result<Vec<u8>, RegistryError> {
        self.record("manifest");
        deadline.remaining()?;
        self.authorize(&reference.to_string(), auth)?;
        Ok(self.manifest.clone())
    }

    fn fetch_blob(
        &self,
        reference: &ArtifactReference,
        digest: &Sha256Digest,
        auth: &RegistryAuth,
        dest: &Path,
        deadline: Deadline,
    ) -> Result<(), RegistryError> {
        self.record("blob");
        deadline.remaining()?;
        let url = format!("{}@{digest}", reference.repository());
        self.authorize(&url, auth)?;
        let blob = self
            .blobs
            .get(digest.hex())
            .ok_or(RegistryError::NotFound { url })?;
        std::fs::write(dest, blob)?;
        Ok(())
    }
}

/// A signature backend answering from fixed data.
#[derive(Debug, Default)]
pub struct StubSignatureBackend {
    trusted_key: Option<String>,
    key_digests: Vec<Sha256Digest>,
    certificates: Vec<SignerCertificate>,
    calls: Mutex<Vec<String>>,
}

impl StubSignatureBackend {
    /// Accept signatures checked against `key` and reject any other key.
    #[must_use]
    pub fn trusting_key(key: &str) -> Self {
        Self {
            trusted_key: Some(key.to_owned()),
            ..Self::default()
        }
    }

    /// Report `digest` as the manifest covered by key-verified signatures.
    #[must_use]
    pub fn covering(mut self, digest: Sha256Digest) -> Self {
        self.key_digests.push(digest);
        self
    }

    /// Report `certificates` as the artifact's signers.
    #[must_use]
    pub fn signed_by(certificates: Vec<SignerCertificate>) -> Self {
        Self {
            certificates,
            ..Self::default()
        }
    }

    /// Return the backend operations invoked so far.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
    }

    fn record(&self, call: &str) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call.to_owned());
        }
    }
}

impl SignatureBackend for StubSignatureBackend {
    fn verify_with_key(
        &self,
        _reference: &ArtifactReference,
        key: &str,
        deadline: Deadline,
    ) -> Result<Vec<Sha256Digest>, BackendError> {
        self.record("verify_with_key");
        deadline.remaining()?;
        if self.trusted_key.as_deref() == Some(key) {
            Ok(self.key_digests.clone())
        } else {
            Err(BackendError::Rejected {
                reason: "no matching signatures".to_owned(),
            })
        }
    }

    fn signer_certificates(
        &self,
        _reference: &ArtifactReference,
        deadline: Deadline,
    ) -> Result<Vec<SignerCertificate>, BackendError> {
        self.record("signer_certificates");
        deadline.remaining()?;
        Ok(self.certificates.clone())
    }
}
