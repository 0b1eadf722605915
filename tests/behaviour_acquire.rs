//! Behaviour-driven tests for module acquisition.
//!
//! Scenarios drive [`acquire_with`] against an in-memory registry and a stub
//! signature backend, so no network access or `cosign` install is needed.
//! Tests use the rstest-bdd v0.5.0 mutable world pattern.

use camino::Utf8PathBuf;
use modpull::acquire::{
    AcquireRequest, AcquisitionOutcome, Collaborators, acquire_with,
};
use modpull::error::FailureCause;
use modpull::registry::extraction::TarExtractor;
use modpull::test_utils::{GZIP_LAYER, StubSignatureBackend, StubTransport, gzip_layer};
use modpull::trust::cosign::{COSIGN_PROVIDER, CosignVerifier, SignerCertificate};
use modpull::trust::{VerificationSpec, VerifierRegistry};
use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// World types
// ---------------------------------------------------------------------------

struct AcquireWorld {
    transport: StubTransport,
    backend: StubSignatureBackend,
    workdir: TempDir,
    destination: Utf8PathBuf,
    verification: Option<VerificationSpec>,
    outcome: Option<AcquisitionOutcome>,
}

#[fixture]
fn world() -> AcquireWorld {
    let workdir = tempfile::tempdir().expect("temp dir");
    let destination = Utf8PathBuf::from_path_buf(workdir.path().join("module"))
        .expect("temp dir path should be UTF-8");
    AcquireWorld {
        transport: StubTransport::serving(&[]),
        backend: StubSignatureBackend::default(),
        workdir,
        destination,
        verification: None,
        outcome: None,
    }
}

fn cause_name(cause: &FailureCause) -> &'static str {
    match cause {
        FailureCause::MalformedReference { .. } => "malformed reference",
        FailureCause::InvalidDestination { .. } => "invalid destination",
        FailureCause::AuthenticationFailed { .. } => "authentication failed",
        FailureCause::InvalidVerificationSpec { .. } => "invalid verification spec",
        FailureCause::UnsupportedProvider { .. } => "unsupported provider",
        FailureCause::IdentityMismatch { .. } => "identity mismatch",
        FailureCause::IssuerMismatch { .. } => "issuer mismatch",
        FailureCause::KeyVerificationFailed { .. } => "key verification failed",
        FailureCause::VerificationFailed { .. } => "verification failed",
        FailureCause::PullFailed { .. } => "pull failed",
        FailureCause::ExtractionFailed { .. } => "extraction failed",
        FailureCause::Timeout { .. } => "timeout",
    }
}

fn acquire(world: &mut AcquireWorld, locator: &str, version: &str) {
    let verifiers = VerifierRegistry::new().with(
        COSIGN_PROVIDER,
        Box::new(CosignVerifier::new(&world.backend)),
    );
    let collaborators = Collaborators {
        transport: &world.transport,
        extractor: &TarExtractor,
        verifiers: &verifiers,
    };
    let mut request = AcquireRequest::new(locator, version, world.destination.clone());
    request.verification = world.verification.clone();
    request.quiet = true;
    let outcome = acquire_with(request, &collaborators, &mut Vec::new());
    world.outcome = Some(outcome);
}

// ---------------------------------------------------------------------------
// Step definitions
// ---------------------------------------------------------------------------

#[given("a registry serving the module")]
fn given_registry(world: &mut AcquireWorld) {
    let layer = gzip_layer(&[
        ("timoni.cue", b"bundle: {}"),
        ("templates/config.cue", b"config: {}"),
    ]);
    world.transport = StubTransport::serving(&[(GZIP_LAYER, layer)]);
}

#[given("an empty destination directory")]
fn given_empty_destination(world: &mut AcquireWorld) {
    std::fs::create_dir(&world.destination).expect("create destination");
}

#[given("a destination directory that does not exist")]
fn given_missing_destination(world: &mut AcquireWorld) {
    world.destination = Utf8PathBuf::from_path_buf(world.workdir.path().join("absent"))
        .expect("temp dir path should be UTF-8");
}

#[given("the module is signed by \"{identity}\" via \"{issuer}\"")]
fn given_signed(world: &mut AcquireWorld, identity: String, issuer: String) {
    world.backend = StubSignatureBackend::signed_by(vec![SignerCertificate::new(identity, issuer)]);
}

#[given("keyless verification requiring identity pattern \"{pattern}\" and issuer \"{issuer}\"")]
fn given_keyless(world: &mut AcquireWorld, pattern: String, issuer: String) {
    world.verification = Some(
        VerificationSpec::new(COSIGN_PROVIDER)
            .with_identity_regexp(pattern)
            .with_issuer(issuer),
    );
}

#[given("verification with provider \"{provider}\"")]
fn given_provider(world: &mut AcquireWorld, provider: String) {
    world.verification = Some(VerificationSpec::new(provider).with_key("cosign.pub"));
}

#[when("the latest version of \"{locator}\" is acquired")]
fn when_latest_acquired(world: &mut AcquireWorld, locator: String) {
    acquire(world, &locator, "");
}

#[when("version \"{version}\" of \"{locator}\" is acquired")]
fn when_version_acquired(world: &mut AcquireWorld, version: String, locator: String) {
    acquire(world, &locator, &version);
}

#[then("the acquisition succeeds")]
fn then_succeeds(world: &mut AcquireWorld) {
    let outcome = world.outcome.as_ref().expect("acquisition ran");
    assert!(outcome.is_ok(), "expected success, got {outcome:?}");
}

#[then("the destination contains \"{path}\"")]
fn then_destination_contains(world: &mut AcquireWorld, path: String) {
    assert!(
        world.destination.join(&path).is_file(),
        "expected {path} in {}",
        world.destination
    );
}

#[then("the resolved tag is \"{tag}\"")]
fn then_tag(world: &mut AcquireWorld, tag: String) {
    let acquired = world
        .outcome
        .as_ref()
        .and_then(|outcome| outcome.as_ref().ok())
        .expect("successful acquisition");
    assert_eq!(acquired.reference.tag(), tag);
}

#[then("the acquisition fails at the \"{stage}\" stage")]
fn then_fails_at(world: &mut AcquireWorld, stage: String) {
    let err = world
        .outcome
        .as_ref()
        .and_then(|outcome| outcome.as_ref().err())
        .expect("failed acquisition");
    assert_eq!(err.stage().as_str(), stage);
}

#[then("the failure cause is \"{cause}\"")]
fn then_cause(world: &mut AcquireWorld, cause: String) {
    let err = world
        .outcome
        .as_ref()
        .and_then(|outcome| outcome.as_ref().err())
        .expect("failed acquisition");
    assert_eq!(cause_name(err.cause()), cause);
}

#[then("nothing was requested from the registry")]
fn then_no_registry_calls(world: &mut AcquireWorld) {
    assert!(world.transport.calls().is_empty());
}

#[then("the destination is empty")]
fn then_destination_empty(world: &mut AcquireWorld) {
    let mut entries = std::fs::read_dir(&world.destination).expect("read destination");
    assert!(entries.next().is_none());
}

// ---------------------------------------------------------------------------
// Scenario bindings
// ---------------------------------------------------------------------------

#[scenario(
    path = "tests/features/acquire.feature",
    name = "Pull the latest version without verification"
)]
fn scenario_pull_without_verification(world: AcquireWorld) {
    let _ = world;
}

#[scenario(
    path = "tests/features/acquire.feature",
    name = "Keyless verification passes before the pull"
)]
fn scenario_keyless_verification_passes(world: AcquireWorld) {
    let _ = world;
}

#[scenario(
    path = "tests/features/acquire.feature",
    name = "Identity mismatch prevents the pull"
)]
fn scenario_identity_mismatch(world: AcquireWorld) {
    let _ = world;
}

#[scenario(
    path = "tests/features/acquire.feature",
    name = "A missing destination is rejected before any network access"
)]
fn scenario_missing_destination(world: AcquireWorld) {
    let _ = world;
}

#[scenario(
    path = "tests/features/acquire.feature",
    name = "An unsupported verification provider is rejected"
)]
fn scenario_unsupported_provider(world: AcquireWorld) {
    let _ = world;
}
