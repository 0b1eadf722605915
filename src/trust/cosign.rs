//! Signature verification through the `cosign` tool.
//!
//! The cryptography (certificate chains, transparency log inclusion) stays in
//! `cosign`. [`CosignVerifier`] only makes the trust decision: in keyed mode
//! it asks the backend to check the signature against the key; in keyless
//! mode it asks for the signer certificates and matches their subject and
//! issuer itself, so identity and issuer failures can be told apart.
//! Either way the verifier reports the manifest digest the accepted
//! signatures cover, so the pull can be pinned to the signed content.

use super::matcher::Matcher;
use super::{TrustError, TrustPolicy, TrustVerifier};
use crate::command::{CommandError, CommandExecutor, failure_summary};
use crate::deadline::{Deadline, DeadlineExceeded};
use crate::reference::ArtifactReference;
use crate::registry::digest::Sha256Digest;
use serde::Deserialize;
use thiserror::Error;

/// Provider name the cosign verifier is registered under.
pub const COSIGN_PROVIDER: &str = "cosign";

/// Subject and issuer of one signature's signing certificate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignerCertificate {
    /// Certificate subject (the signer identity).
    pub subject: String,
    /// OIDC issuer that vouched for the subject.
    pub issuer: String,
    /// Manifest digest named in the signed payload, if any.
    pub digest: Option<Sha256Digest>,
}

impl SignerCertificate {
    /// Build a certificate record.
    #[must_use]
    pub fn new(subject: impl Into<String>, issuer: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            issuer: issuer.into(),
            digest: None,
        }
    }

    /// Record the manifest digest the signature covers.
    #[must_use]
    pub fn with_digest(mut self, digest: Sha256Digest) -> Self {
        self.digest = Some(digest);
        self
    }
}

/// Errors from a signature backend.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The backend ran and rejected the signature.
    #[error("{reason}")]
    Rejected {
        /// Backend output describing the rejection.
        reason: String,
    },

    /// The backend could not be run or produced unusable output.
    #[error("{reason}")]
    Unavailable {
        /// Description of the failure.
        reason: String,
    },

    /// The backend outlived the run's deadline.
    #[error(transparent)]
    Timeout(#[from] DeadlineExceeded),
}

/// Cryptographic operations the cosign verifier relies on.
#[cfg_attr(test, mockall::automock)]
pub trait SignatureBackend {
    /// Check the signature attached to `reference` against `key`.
    ///
    /// Returns the manifest digests named by the verified payloads.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Rejected`] when the signature does not verify.
    fn verify_with_key(
        &self,
        reference: &ArtifactReference,
        key: &str,
        deadline: Deadline,
    ) -> Result<Vec<Sha256Digest>, BackendError>;

    /// Return the signer certificates of every valid signature on
    /// `reference`.
    ///
    /// # Errors
    ///
    /// Returns a [`BackendError`] when signatures cannot be retrieved.
    fn signer_certificates(
        &self,
        reference: &ArtifactReference,
        deadline: Deadline,
    ) -> Result<Vec<SignerCertificate>, BackendError>;
}

impl<B: SignatureBackend + ?Sized> SignatureBackend for &B {
    fn verify_with_key(
        &self,
        reference: &ArtifactReference,
        key: &str,
        deadline: Deadline,
    ) -> Result<Vec<Sha256Digest>, BackendError> {
        (**self).verify_with_key(reference, key, deadline)
    }

    fn signer_certificates(
        &self,
        reference: &ArtifactReference,
        deadline: Deadline,
    ) -> Result<Vec<SignerCertificate>, BackendError> {
        (**self).signer_certificates(reference, deadline)
    }
}

/// Trust verifier implementing keyed and keyless cosign semantics.
///
/// # Examples
///
/// ```
/// use modpull::trust::cosign::{CosignCli, CosignVerifier};
/// use modpull::command::SystemCommandExecutor;
///
/// let executor = SystemCommandExecutor;
/// let verifier = CosignVerifier::new(CosignCli::new(&executor, "cosign"));
/// # let _ = verifier;
/// ```
pub struct CosignVerifier<B> {
    backend: B,
}

impl<B: SignatureBackend> CosignVerifier<B> {
    /// Wrap a signature backend.
    #[must_use]
    pub const fn new(backend: B) -> Self {
        Self { backend }
    }
}

impl<B: SignatureBackend> TrustVerifier for CosignVerifier<B> {
    fn verify(
        &self,
        reference: &ArtifactReference,
        policy: &TrustPolicy,
        deadline: Deadline,
    ) -> Result<Option<Sha256Digest>, TrustError> {
        match policy {
            TrustPolicy::Keyed { key } => {
                let digests = self
                    .backend
                    .verify_with_key(reference, key, deadline)
                    .map_err(|err| match err {
                        BackendError::Rejected { reason } => TrustError::KeyRejected {
                            key: key.clone(),
                            reason,
                        },
                        other => backend_failure(other),
                    })?;
                covered_digest(reference, digests.iter())
            }
            TrustPolicy::Keyless { identity, issuer } => {
                let certificates = self
                    .backend
                    .signer_certificates(reference, deadline)
                    .map_err(backend_failure)?;
                log::debug!(
                    "{reference} carries {} signature(s)",
                    certificates.len()
                );
                let trusted = match_keyless(reference, identity, issuer, &certificates)?;
                covered_digest(
                    reference,
                    trusted.into_iter().filter_map(|cert| cert.digest.as_ref()),
                )
            }
        }
    }
}

/// Return the single manifest digest covered by the accepted signatures.
///
/// Signatures that name no digest are ignored; two different digests mean
/// the signatures do not describe one artifact.
fn covered_digest<'a>(
    reference: &ArtifactReference,
    digests: impl Iterator<Item = &'a Sha256Digest>,
) -> Result<Option<Sha256Digest>, TrustError> {
    let mut covered: Option<&Sha256Digest> = None;
    for digest in digests {
        match covered {
            Some(seen) if seen != digest => {
                return Err(TrustError::Backend {
                    reason: format!(
                        "signatures on {reference} cover different manifests: {seen} and {digest}"
                    ),
                });
            }
            Some(_) => {}
            None => covered = Some(digest),
        }
    }
    Ok(covered.cloned())
}

fn backend_failure(err: BackendError) -> TrustError {
    match err {
        BackendError::Timeout(exceeded) => TrustError::Timeout(exceeded),
        BackendError::Rejected { reason } | BackendError::Unavailable { reason } => {
            TrustError::Backend { reason }
        }
    }
}

/// Require at least one certificate whose subject matches `identity` and
/// whose issuer matches `issuer`, returning every such certificate.
fn match_keyless<'c>(
    reference: &ArtifactReference,
    identity: &Matcher,
    issuer: &Matcher,
    certificates: &'c [SignerCertificate],
) -> Result<Vec<&'c SignerCertificate>, TrustError> {
    if certificates.is_empty() {
        return Err(TrustError::NoSignatures {
            reference: reference.to_string(),
        });
    }

    let identity_matches: Vec<&'c SignerCertificate> = certificates
        .iter()
        .filter(|cert| identity.is_match(&cert.subject))
        .collect();
    if identity_matches.is_empty() {
        return Err(TrustError::IdentityMismatch {
            expected: identity.to_string(),
            found: join_fields(certificates.iter().map(|cert| cert.subject.as_str())),
        });
    }

    let trusted: Vec<&'c SignerCertificate> = identity_matches
        .iter()
        .copied()
        .filter(|cert| issuer.is_match(&cert.issuer))
        .collect();
    if trusted.is_empty() {
        return Err(TrustError::IssuerMismatch {
            expected: issuer.to_string(),
            found: join_fields(identity_matches.iter().map(|cert| cert.issuer.as_str())),
        });
    }
    Ok(trusted)
}

fn join_fields<'a>(values: impl Iterator<Item = &'a str>) -> String {
    let mut unique: Vec<&str> = values
        .map(|value| if value.is_empty() { "<none>" } else { value })
        .collect();
    unique.sort_unstable();
    unique.dedup();
    unique.join(", ")
}

/// Signature backend that shells out to the `cosign` binary.
pub struct CosignCli<'a> {
    executor: &'a dyn CommandExecutor,
    binary: String,
    allow_insecure_registry: bool,
}

impl<'a> CosignCli<'a> {
    /// Run `binary` through `executor`.
    #[must_use]
    pub fn new(executor: &'a dyn CommandExecutor, binary: impl Into<String>) -> Self {
        Self {
            executor,
            binary: binary.into(),
            allow_insecure_registry: false,
        }
    }

    /// Let cosign talk to registries over plain HTTP.
    #[must_use]
    pub const fn allow_insecure_registry(mut self, allow: bool) -> Self {
        self.allow_insecure_registry = allow;
        self
    }

    fn run(&self, mut args: Vec<String>, deadline: Deadline) -> Result<Vec<u8>, BackendError> {
        if self.allow_insecure_registry {
            args.push("--allow-insecure-registry".to_owned());
        }
        let timeout = deadline.remaining()?;
        let output = self
            .executor
            .run(&self.binary, &args, timeout)
            .map_err(|err| match err {
                CommandError::TimedOut { .. } => BackendError::Timeout(DeadlineExceeded {
                    limit: deadline.limit(),
                }),
                other => BackendError::Unavailable {
                    reason: other.to_string(),
                },
            })?;
        if output.status.success() {
            Ok(output.stdout)
        } else {
            Err(BackendError::Rejected {
                reason: failure_summary(&output),
            })
        }
    }
}

impl SignatureBackend for CosignCli<'_> {
    fn verify_with_key(
        &self,
        reference: &ArtifactReference,
        key: &str,
        deadline: Deadline,
    ) -> Result<Vec<Sha256Digest>, BackendError> {
        let args = vec![
            "verify".to_owned(),
            "--key".to_owned(),
            key.to_owned(),
            "--output".to_owned(),
            "json".to_owned(),
            reference.to_string(),
        ];
        let stdout = self.run(args, deadline)?;
        let payloads = parse_signer_certificates(&String::from_utf8_lossy(&stdout))?;
        Ok(payloads
            .into_iter()
            .filter_map(|payload| payload.digest)
            .collect())
    }

    fn signer_certificates(
        &self,
        reference: &ArtifactReference,
        deadline: Deadline,
    ) -> Result<Vec<SignerCertificate>, BackendError> {
        let args = vec![
            "verify".to_owned(),
            "--certificate-identity-regexp".to_owned(),
            ".*".to_owned(),
            "--certificate-oidc-issuer-regexp".to_owned(),
            ".*".to_owned(),
            "--output".to_owned(),
            "json".to_owned(),
            reference.to_string(),
        ];
        let stdout = self.run(args, deadline)?;
        parse_signer_certificates(&String::from_utf8_lossy(&stdout))
    }
}

#[derive(Debug, Deserialize)]
struct SignaturePayload {
    #[serde(default)]
    critical: Option<CriticalClaims>,
    #[serde(default)]
    optional: Option<OptionalClaims>,
}

#[derive(Debug, Deserialize)]
struct CriticalClaims {
    #[serde(default)]
    image: Option<ImageClaims>,
}

#[derive(Debug, Deserialize)]
struct ImageClaims {
    #[serde(rename = "docker-manifest-digest", default)]
    manifest_digest: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OptionalClaims {
    #[serde(rename = "Subject", default)]
    subject: Option<String>,
    #[serde(rename = "Issuer", default)]
    issuer: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PayloadLine {
    Many(Vec<SignaturePayload>),
    One(SignaturePayload),
}

/// Parse `cosign verify --output json` into signer certificates.
///
/// cosign prints either one JSON array or one payload object per line. A
/// payload naming a malformed manifest digest makes the whole output
/// unusable.
fn parse_signer_certificates(stdout: &str) -> Result<Vec<SignerCertificate>, BackendError> {
    let mut certificates = Vec::new();
    for line in stdout.lines().map(str::trim).filter(|line| !line.is_empty()) {
        let parsed: PayloadLine =
            serde_json::from_str(line).map_err(|e| BackendError::Unavailable {
                reason: format!("unreadable cosign output: {e}"),
            })?;
        let payloads = match parsed {
            PayloadLine::Many(payloads) => payloads,
            PayloadLine::One(payload) => vec![payload],
        };
        for payload in payloads {
            certificates.push(signer_certificate(payload)?);
        }
    }
    Ok(certificates)
}

fn signer_certificate(payload: SignaturePayload) -> Result<SignerCertificate, BackendError> {
    let digest = payload
        .critical
        .and_then(|critical| critical.image)
        .and_then(|image| image.manifest_digest)
        .map(|value| {
            Sha256Digest::parse(&value).map_err(|e| BackendError::Unavailable {
                reason: format!("unreadable cosign output: {e}"),
            })
        })
        .transpose()?;
    let claims = payload.optional;
    Ok(SignerCertificate {
        subject: claims
            .as_ref()
            .and_then(|c| c.subject.clone())
            .unwrap_or_default(),
        issuer: claims.and_then(|c| c.issuer).unwrap_or_default(),
        digest,
    })
}

#[cfg(test)]
#[path = "cosign_tests.rs"]
mod tests;
