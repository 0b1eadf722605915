//! Module acquisition orchestrator.
//!
//! Sequences one pull from start to finish:
//!
//! ```text
//! preflight -> resolving -> [authenticating] -> [verifying] -> pulling -> extracting
//! ```
//!
//! Authentication runs only when credentials are given and verification only
//! when a [`VerificationSpec`] is given. The first failing stage ends the run
//! with an [`AcquireError`] naming that stage; nothing is retried. Network
//! stages share one [`Deadline`] started after preflight. When verification
//! reports the manifest digest it accepted, the pull is pinned to it.

use crate::command::SystemCommandExecutor;
use crate::config::PullConfig;
use crate::credentials::Credentials;
use crate::deadline::Deadline;
use crate::error::{AcquireError, FailureCause, Stage};
use crate::output::Progress;
use crate::reference::{ArtifactReference, ReferenceError, resolve};
use crate::registry::digest::Sha256Digest;
use crate::registry::extraction::{ExtractionError, LayerExtractor, TarExtractor};
use crate::registry::http::HttpRegistry;
use crate::registry::{RegistryError, RegistrySession, RegistryTransport};
use crate::trust::cosign::{COSIGN_PROVIDER, CosignCli, CosignVerifier};
use crate::trust::{TrustError, VerificationSpec, VerifierRegistry};
use camino::Utf8PathBuf;
use std::io::Write;
use std::time::Duration;

/// Everything one acquisition needs from the caller.
#[derive(Debug, Clone)]
pub struct AcquireRequest {
    /// Module locator, `oci://<host>/<repository>`.
    pub locator: String,
    /// Version tag; blank selects `latest`.
    pub version: String,
    /// Existing directory the module is extracted into.
    pub destination: Utf8PathBuf,
    /// Registry credentials; empty for anonymous access.
    pub credentials: Credentials,
    /// Signature requirements; `None` skips verification.
    pub verification: Option<VerificationSpec>,
    /// Time budget for the network stages.
    pub timeout: Duration,
    /// Suppress progress output.
    pub quiet: bool,
}

impl AcquireRequest {
    /// Start a request with no credentials, no verification, and the default
    /// five minute budget.
    #[must_use]
    pub fn new(
        locator: impl Into<String>,
        version: impl Into<String>,
        destination: impl Into<Utf8PathBuf>,
    ) -> Self {
        Self {
            locator: locator.into(),
            version: version.into(),
            destination: destination.into(),
            credentials: Credentials::default(),
            verification: None,
            timeout: Duration::from_secs(300),
            quiet: false,
        }
    }
}

/// A successfully acquired module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acquired {
    /// Directory the module was extracted into.
    pub destination: Utf8PathBuf,
    /// The resolved reference.
    pub reference: ArtifactReference,
    /// Digest of the pulled manifest.
    pub digest: Sha256Digest,
    /// Source repository annotation, if present.
    pub source: Option<String>,
    /// Source revision annotation, if present.
    pub revision: Option<String>,
    /// Sorted top-level entries written to the destination.
    pub files: Vec<String>,
    /// Verification mode that passed, if verification ran.
    pub verified: Option<&'static str>,
}

/// The terminal result of an acquisition.
pub type AcquisitionOutcome = Result<Acquired, AcquireError>;

/// The collaborators an acquisition drives.
pub struct Collaborators<'a> {
    /// Registry network access.
    pub transport: &'a dyn RegistryTransport,
    /// Layer unpacking.
    pub extractor: &'a dyn LayerExtractor,
    /// Signature verification providers.
    pub verifiers: &'a VerifierRegistry<'a>,
}

/// Acquire a module using the production HTTP transport, tar extractor,
/// and `cosign` verifier.
///
/// # Errors
///
/// Returns an [`AcquireError`] naming the stage that failed.
///
/// # Examples
///
/// ```no_run
/// use modpull::acquire::{AcquireRequest, acquire};
/// use modpull::config::PullConfig;
///
/// let request = AcquireRequest::new("oci://ghcr.io/org/app", "1.0.0", "./app");
/// let acquired = acquire(request, &PullConfig::default(), &mut std::io::stderr())?;
/// assert!(!acquired.files.is_empty());
/// # Ok::<(), modpull::error::AcquireError>(())
/// ```
pub fn acquire(
    request: AcquireRequest,
    config: &PullConfig,
    stderr: &mut dyn Write,
) -> AcquisitionOutcome {
    let transport = HttpRegistry::new(config.plain_http);
    let executor = SystemCommandExecutor;
    let cosign = CosignCli::new(&executor, config.cosign_binary.clone())
        .allow_insecure_registry(config.plain_http);
    let verifiers =
        VerifierRegistry::new().with(COSIGN_PROVIDER, Box::new(CosignVerifier::new(cosign)));
    let collaborators = Collaborators {
        transport: &transport,
        extractor: &TarExtractor,
        verifiers: &verifiers,
    };
    acquire_with(request, &collaborators, stderr)
}

/// Testable inner function with injected collaborators.
///
/// The production entry point [`acquire`] delegates here with real
/// implementations; tests inject mocks and stubs.
///
/// # Errors
///
/// Returns an [`AcquireError`] naming the stage that failed.
pub fn acquire_with(
    request: AcquireRequest,
    collaborators: &Collaborators<'_>,
    stderr: &mut dyn Write,
) -> AcquisitionOutcome {
    let AcquireRequest {
        locator,
        version,
        destination,
        credentials,
        verification,
        timeout,
        quiet,
    } = request;
    let mut progress = Progress::new(stderr, quiet);

    if !destination.is_dir() {
        log::debug!("destination {destination} is missing or not a directory");
        return Err(AcquireError::new(
            Stage::Preflight,
            FailureCause::InvalidDestination { path: destination },
        ));
    }
    let deadline = Deadline::after(timeout);

    let reference = resolve(&locator, &version)
        .map_err(|e| AcquireError::new(Stage::Resolving, reference_cause(&e)))?;
    progress.line(format_args!("Pulling {reference}"));

    let mut session = RegistrySession::new(collaborators.transport, collaborators.extractor);
    if !credentials.is_empty() {
        progress.line(format_args!("Logging in to {}", reference.registry()));
    }
    session
        .authenticate(&reference, credentials, deadline)
        .map_err(|e| {
            AcquireError::new(
                Stage::Authenticating,
                registry_cause(&reference, e, |reason| FailureCause::AuthenticationFailed {
                    registry: reference.registry().to_owned(),
                    reason,
                }),
            )
        })?;

    let decision = verification
        .as_ref()
        .map(|spec| {
            progress.line(format_args!(
                "Verifying {reference} with {}",
                spec.provider
            ));
            collaborators
                .verifiers
                .verify(&spec.provider, &reference, spec, deadline)
                .map_err(|e| AcquireError::new(Stage::Verifying, trust_cause(e)))
        })
        .transpose()?;
    if let Some(passed) = &decision {
        log::info!("{reference} passed {} verification", passed.policy.mode());
    }

    let pinned = decision.as_ref().and_then(|passed| passed.digest.as_ref());
    let fetched = session.fetch(&reference, pinned, deadline).map_err(|e| {
        AcquireError::new(
            Stage::Pulling,
            registry_cause(&reference, e, |reason| FailureCause::PullFailed {
                reference: reference.to_string(),
                reason,
            }),
        )
    })?;
    log::info!("fetched {reference} at {}", fetched.digest);
    let verified = decision.map(|passed| passed.policy.mode());

    progress.line(format_args!("Extracting to {destination}"));
    let pulled = session
        .unpack(fetched, destination.as_std_path())
        .map_err(|e| AcquireError::new(Stage::Extracting, extraction_cause(&e)))?;

    progress.line(format_args!(
        "Pulled {reference} ({}) into {destination}",
        pulled.digest
    ));
    Ok(Acquired {
        destination,
        reference,
        digest: pulled.digest,
        source: pulled.source,
        revision: pulled.revision,
        files: pulled.files,
        verified,
    })
}

fn reference_cause(err: &ReferenceError) -> FailureCause {
    FailureCause::MalformedReference {
        input: err.input().to_owned(),
        reason: err.to_string(),
    }
}

/// Map a registry error, sending deadline expiry to `Timeout`, local
/// storage failures to `ExtractionFailed`, and everything else through
/// `otherwise`.
fn registry_cause(
    reference: &ArtifactReference,
    err: RegistryError,
    otherwise: impl FnOnce(String) -> FailureCause,
) -> FailureCause {
    match err {
        RegistryError::Timeout(exceeded) => FailureCause::Timeout {
            limit: exceeded.limit,
        },
        RegistryError::Io(io_err) => {
            log::debug!("local storage failed while fetching {reference}: {io_err:?}");
            FailureCause::ExtractionFailed {
                reason: format!("could not store downloaded content: {io_err}"),
            }
        }
        other => {
            log::debug!("registry error for {reference}: {other:?}");
            otherwise(other.to_string())
        }
    }
}

fn trust_cause(err: TrustError) -> FailureCause {
    match err {
        TrustError::UnsupportedProvider {
            provider,
            supported,
        } => FailureCause::UnsupportedProvider {
            provider,
            supported,
        },
        TrustError::InvalidSpec { reason } => FailureCause::InvalidVerificationSpec { reason },
        TrustError::IdentityMismatch { expected, found } => {
            FailureCause::IdentityMismatch { expected, found }
        }
        TrustError::IssuerMismatch { expected, found } => {
            FailureCause::IssuerMismatch { expected, found }
        }
        TrustError::KeyRejected { key, reason } => {
            FailureCause::KeyVerificationFailed { key, reason }
        }
        TrustError::Timeout(exceeded) => FailureCause::Timeout {
            limit: exceeded.limit,
        },
        other @ (TrustError::NoSignatures { .. } | TrustError::Backend { .. }) => {
            FailureCause::VerificationFailed {
                reason: other.to_string(),
            }
        }
    }
}

fn extraction_cause(err: &ExtractionError) -> FailureCause {
    FailureCause::ExtractionFailed {
        reason: err.to_string(),
    }
}

#[cfg(test)]
#[path = "acquire_tests.rs"]
mod tests;
