//! Stage-attributed error taxonomy for module acquisition.
//!
//! Every failure that ends an acquisition run is reported as an
//! [`AcquireError`]: the [`Stage`] that was in progress together with the
//! [`FailureCause`] describing what went wrong. Lower layers keep their own
//! error enums; the orchestrator maps them into this taxonomy so callers see
//! a single cause chain ending in the most specific error.

use camino::Utf8PathBuf;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// The acquisition stage at which a run terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Destination validation, performed before any other work.
    Preflight,
    /// Parsing the module locator and version into a reference.
    Resolving,
    /// Installing credentials on the registry session.
    Authenticating,
    /// Checking the artifact signature.
    Verifying,
    /// Downloading the manifest and layer blobs.
    Pulling,
    /// Unpacking layers into the destination directory.
    Extracting,
}

impl Stage {
    /// Return the lowercase stage name used in messages.
    ///
    /// # Examples
    ///
    /// ```
    /// use modpull::error::Stage;
    ///
    /// assert_eq!(Stage::Pulling.as_str(), "pulling");
    /// ```
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Preflight => "preflight",
            Self::Resolving => "resolving",
            Self::Authenticating => "authenticating",
            Self::Verifying => "verifying",
            Self::Pulling => "pulling",
            Self::Extracting => "extracting",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The specific reason an acquisition run failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FailureCause {
    /// The locator or the combined locator and version did not parse.
    #[error("malformed module reference \"{input}\": {reason}")]
    MalformedReference {
        /// The rejected input.
        input: String,
        /// Description of the grammar violation.
        reason: String,
    },

    /// The destination path does not exist or is not a directory.
    #[error("invalid output path {path}")]
    InvalidDestination {
        /// The rejected destination path.
        path: Utf8PathBuf,
    },

    /// The registry rejected the credentials or could not be reached.
    #[error("could not login to {registry} with credentials: {reason}")]
    AuthenticationFailed {
        /// Registry host the login was attempted against.
        registry: String,
        /// Description of the failure.
        reason: String,
    },

    /// The verification parameters are inconsistent.
    #[error("invalid verification parameters: {reason}")]
    InvalidVerificationSpec {
        /// Description of the validation failure.
        reason: String,
    },

    /// No verifier is registered for the requested provider.
    #[error("unsupported verification provider \"{provider}\"; expected one of: {supported}")]
    UnsupportedProvider {
        /// The rejected provider name.
        provider: String,
        /// Comma-separated list of registered providers.
        supported: String,
    },

    /// No signer certificate carries the expected identity.
    #[error("no signature matches identity {expected}; found: {found}")]
    IdentityMismatch {
        /// The identity literal or pattern that was required.
        expected: String,
        /// Comma-separated subjects seen on the signatures.
        found: String,
    },

    /// A certificate matched the identity but not the expected issuer.
    #[error("signature identity matched but issuer does not match {expected}; found: {found}")]
    IssuerMismatch {
        /// The issuer literal or pattern that was required.
        expected: String,
        /// Comma-separated issuers seen on identity-matching signatures.
        found: String,
    },

    /// The signature does not verify against the supplied public key.
    #[error("signature verification with key {key} failed: {reason}")]
    KeyVerificationFailed {
        /// The key reference used for verification.
        key: String,
        /// Output from the verification backend.
        reason: String,
    },

    /// The verification backend failed before a decision could be made.
    #[error("signature verification failed: {reason}")]
    VerificationFailed {
        /// Description of the backend failure.
        reason: String,
    },

    /// The registry or network failed while fetching content.
    #[error("pulling {reference} failed: {reason}")]
    PullFailed {
        /// The reference being pulled.
        reference: String,
        /// Description of the failure.
        reason: String,
    },

    /// Writing the pulled content to disk failed.
    #[error("extraction failed: {reason}")]
    ExtractionFailed {
        /// Description of the failure.
        reason: String,
    },

    /// The run's time budget elapsed.
    #[error("timed out after {}s", .limit.as_secs())]
    Timeout {
        /// The configured time budget.
        limit: Duration,
    },
}

/// A terminal acquisition failure attributed to the stage in progress.
///
/// # Examples
///
/// ```
/// use camino::Utf8PathBuf;
/// use modpull::error::{AcquireError, FailureCause, Stage};
///
/// let err = AcquireError::new(
///     Stage::Preflight,
///     FailureCause::InvalidDestination { path: Utf8PathBuf::from("/missing") },
/// );
/// assert_eq!(err.stage(), Stage::Preflight);
/// assert!(err.to_string().contains("preflight"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{stage} failed")]
pub struct AcquireError {
    stage: Stage,
    #[source]
    cause: FailureCause,
}

impl AcquireError {
    /// Attribute `cause` to `stage`.
    #[must_use]
    pub const fn new(stage: Stage, cause: FailureCause) -> Self {
        Self { stage, cause }
    }

    /// Return the stage at which the run failed.
    #[must_use]
    pub const fn stage(&self) -> Stage {
        self.stage
    }

    /// Return the underlying cause.
    #[must_use]
    pub const fn cause(&self) -> &FailureCause {
        &self.cause
    }

    /// Return true when the run ran out of time.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self.cause, FailureCause::Timeout { .. })
    }
}
