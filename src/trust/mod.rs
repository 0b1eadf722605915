//! Artifact trust verification.
//!
//! A [`VerificationSpec`] is inert user input. [`TrustPolicy::from_spec`]
//! validates its shape and selects keyed or keyless mode before any backend
//! is consulted. [`VerifierRegistry`] dispatches a provider name to the
//! [`TrustVerifier`] registered for it; [`cosign::CosignVerifier`] is the one
//! provider shipped. A passed check yields a [`TrustDecision`] carrying the
//! manifest digest the signatures cover, which the pull is then pinned to.

pub mod cosign;
pub mod matcher;

use crate::deadline::{Deadline, DeadlineExceeded};
use crate::reference::ArtifactReference;
use crate::registry::digest::Sha256Digest;
use matcher::Matcher;
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors raised while deciding whether an artifact is trusted.
#[derive(Debug, Error)]
pub enum TrustError {
    /// No verifier is registered under the requested name.
    #[error("unsupported verification provider \"{provider}\"")]
    UnsupportedProvider {
        /// The rejected provider name.
        provider: String,
        /// Registered provider names, comma separated.
        supported: String,
    },

    /// The verification parameters are inconsistent.
    #[error("invalid verification parameters: {reason}")]
    InvalidSpec {
        /// Description of the validation failure.
        reason: String,
    },

    /// No signer certificate carries the expected identity.
    #[error("no signature matches identity {expected}")]
    IdentityMismatch {
        /// The expected identity, rendered as a literal or pattern.
        expected: String,
        /// Comma-separated subjects seen on the signatures.
        found: String,
    },

    /// An identity-matching certificate was issued by an unexpected issuer.
    #[error("identity matched but issuer does not match {expected}")]
    IssuerMismatch {
        /// The expected issuer, rendered as a literal or pattern.
        expected: String,
        /// Comma-separated issuers of identity-matching certificates.
        found: String,
    },

    /// The signature does not verify against the supplied key.
    #[error("signature does not verify with key {key}: {reason}")]
    KeyRejected {
        /// The key reference.
        key: String,
        /// Backend output describing the rejection.
        reason: String,
    },

    /// The artifact carries no signatures.
    #[error("no signatures found for {reference}")]
    NoSignatures {
        /// The artifact reference.
        reference: String,
    },

    /// The signature backend could not complete the check.
    #[error("signature backend failed: {reason}")]
    Backend {
        /// Description of the backend failure.
        reason: String,
    },

    /// The run's deadline passed during verification.
    #[error(transparent)]
    Timeout(#[from] DeadlineExceeded),
}

/// How a module's signature should be checked.
///
/// Blank strings are treated the same as absent values.
///
/// # Examples
///
/// ```
/// use modpull::trust::{TrustPolicy, VerificationSpec};
///
/// let spec = VerificationSpec::new("cosign")
///     .with_identity_regexp("^https://github\\.com/org/")
///     .with_issuer("https://token.actions.githubusercontent.com");
/// let policy = TrustPolicy::from_spec(&spec).expect("valid keyless spec");
/// assert!(matches!(policy, TrustPolicy::Keyless { .. }));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerificationSpec {
    /// Provider name, such as `cosign`.
    pub provider: String,
    /// Public key reference; selects keyed mode when present.
    pub key: Option<String>,
    /// Exact expected certificate identity.
    pub certificate_identity: Option<String>,
    /// Pattern the certificate identity must match.
    pub certificate_identity_regexp: Option<String>,
    /// Exact expected OIDC issuer.
    pub certificate_oidc_issuer: Option<String>,
    /// Pattern the OIDC issuer must match.
    pub certificate_oidc_issuer_regexp: Option<String>,
}

impl VerificationSpec {
    /// Start a spec for `provider` with no mode parameters.
    #[must_use]
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            ..Self::default()
        }
    }

    /// Set the public key reference.
    #[must_use]
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Set the exact certificate identity.
    #[must_use]
    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.certificate_identity = Some(identity.into());
        self
    }

    /// Set the certificate identity pattern.
    #[must_use]
    pub fn with_identity_regexp(mut self, pattern: impl Into<String>) -> Self {
        self.certificate_identity_regexp = Some(pattern.into());
        self
    }

    /// Set the exact OIDC issuer.
    #[must_use]
    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.certificate_oidc_issuer = Some(issuer.into());
        self
    }

    /// Set the OIDC issuer pattern.
    #[must_use]
    pub fn with_issuer_regexp(mut self, pattern: impl Into<String>) -> Self {
        self.certificate_oidc_issuer_regexp = Some(pattern.into());
        self
    }
}

/// A validated verification mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrustPolicy {
    /// Verify against a pre-shared public key.
    Keyed {
        /// The key reference passed to the backend.
        key: String,
    },
    /// Verify a short-lived certificate's identity and issuer.
    Keyless {
        /// Expected certificate subject.
        identity: Matcher,
        /// Expected OIDC issuer.
        issuer: Matcher,
    },
}

impl TrustPolicy {
    /// Validate `spec` and select its mode.
    ///
    /// A key selects keyed mode and the identity and issuer fields are then
    /// ignored. Otherwise exactly one identity field and exactly one issuer
    /// field must be set.
    ///
    /// # Errors
    ///
    /// Returns [`TrustError::InvalidSpec`] when a keyless pair is missing,
    /// doubly set, or holds an invalid pattern.
    pub fn from_spec(spec: &VerificationSpec) -> Result<Self, TrustError> {
        if let Some(key) = present(spec.key.as_ref()) {
            if has_keyless_fields(spec) {
                log::debug!("public key supplied; ignoring certificate identity options");
            }
            return Ok(Self::Keyed {
                key: key.to_owned(),
            });
        }

        let identity = pick_matcher(
            "certificate identity",
            present(spec.certificate_identity.as_ref()),
            present(spec.certificate_identity_regexp.as_ref()),
        )?;
        let issuer = pick_matcher(
            "certificate OIDC issuer",
            present(spec.certificate_oidc_issuer.as_ref()),
            present(spec.certificate_oidc_issuer_regexp.as_ref()),
        )?;
        Ok(Self::Keyless { identity, issuer })
    }

    /// Return `keyed` or `keyless`.
    #[must_use]
    pub const fn mode(&self) -> &'static str {
        match self {
            Self::Keyed { .. } => "keyed",
            Self::Keyless { .. } => "keyless",
        }
    }
}

fn present(value: Option<&String>) -> Option<&str> {
    value
        .map(String::as_str)
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn has_keyless_fields(spec: &VerificationSpec) -> bool {
    [
        &spec.certificate_identity,
        &spec.certificate_identity_regexp,
        &spec.certificate_oidc_issuer,
        &spec.certificate_oidc_issuer_regexp,
    ]
    .into_iter()
    .any(|field| present(field.as_ref()).is_some())
}

fn pick_matcher(
    field: &str,
    literal: Option<&str>,
    pattern: Option<&str>,
) -> Result<Matcher, TrustError> {
    match (literal, pattern) {
        (Some(value), None) => Ok(Matcher::literal(value)),
        (None, Some(pattern)) => Matcher::pattern(pattern).map_err(|e| TrustError::InvalidSpec {
            reason: format!("invalid {field} regexp: {e}"),
        }),
        (Some(_), Some(_)) => Err(TrustError::InvalidSpec {
            reason: format!("{field} and {field} regexp are mutually exclusive"),
        }),
        (None, None) => Err(TrustError::InvalidSpec {
            reason: format!("keyless verification requires a {field} or {field} regexp"),
        }),
    }
}

/// A provider able to check an artifact against a validated policy.
#[cfg_attr(test, mockall::automock)]
pub trait TrustVerifier {
    /// Check `reference` against `policy`.
    ///
    /// Returns the manifest digest the accepted signatures cover, or `None`
    /// when the provider does not report one.
    ///
    /// # Errors
    ///
    /// Returns a [`TrustError`] describing why the artifact is not trusted.
    fn verify(
        &self,
        reference: &ArtifactReference,
        policy: &TrustPolicy,
        deadline: Deadline,
    ) -> Result<Option<Sha256Digest>, TrustError>;
}

/// The result of a passed verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustDecision {
    /// The policy the artifact satisfied.
    pub policy: TrustPolicy,
    /// Manifest digest covered by the accepted signatures, if reported.
    pub digest: Option<Sha256Digest>,
}

/// Provider-name dispatch to registered verifiers.
///
/// # Examples
///
/// ```
/// use modpull::trust::VerifierRegistry;
///
/// let registry = VerifierRegistry::new();
/// assert!(registry.providers().is_empty());
/// ```
#[derive(Default)]
pub struct VerifierRegistry<'a> {
    verifiers: BTreeMap<String, Box<dyn TrustVerifier + 'a>>,
}

impl<'a> VerifierRegistry<'a> {
    /// Create a registry with no providers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `verifier` under `provider`, replacing any previous entry.
    #[must_use]
    pub fn with(
        mut self,
        provider: impl Into<String>,
        verifier: Box<dyn TrustVerifier + 'a>,
    ) -> Self {
        self.verifiers.insert(provider.into(), verifier);
        self
    }

    /// Return the registered provider names in sorted order.
    #[must_use]
    pub fn providers(&self) -> Vec<&str> {
        self.verifiers.keys().map(String::as_str).collect()
    }

    /// Decide whether `reference` is trusted under `spec` by `provider`.
    ///
    /// The provider is looked up first, then the spec is validated; the
    /// verifier is only consulted when both succeed.
    ///
    /// # Errors
    ///
    /// Returns [`TrustError::UnsupportedProvider`] for an unknown provider,
    /// [`TrustError::InvalidSpec`] for an inconsistent spec, or the
    /// verifier's own [`TrustError`].
    pub fn verify(
        &self,
        provider: &str,
        reference: &ArtifactReference,
        spec: &VerificationSpec,
        deadline: Deadline,
    ) -> Result<TrustDecision, TrustError> {
        let verifier =
            self.verifiers
                .get(provider)
                .ok_or_else(|| TrustError::UnsupportedProvider {
                    provider: provider.to_owned(),
                    supported: self.providers().join(", "),
                })?;
        let policy = TrustPolicy::from_spec(spec)?;
        log::debug!("verifying {reference} with {provider} ({})", policy.mode());
        let digest = verifier.verify(reference, &policy, deadline)?;
        if let Some(signed) = &digest {
            log::debug!("signatures on {reference} cover {signed}");
        }
        Ok(TrustDecision { policy, digest })
    }
}

#[cfg(test)]
#[path = "trust_tests.rs"]
mod tests;
