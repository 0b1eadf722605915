//! Unit tests for the cosign verifier and its command-line backend.

use super::*;
use crate::command::MockCommandExecutor;
use crate::reference::resolve;
use crate::test_utils::{failure_output, success_output};
use rstest::{fixture, rstest};
use std::time::Duration;

const GITHUB_ISSUER: &str = "https://token.actions.githubusercontent.com";
const RELEASE_IDENTITY: &str =
    "https://github.com/org/app/.github/workflows/release.yml@refs/tags/v1.2.0";

#[fixture]
fn reference() -> ArtifactReference {
    resolve("oci://ghcr.io/org/app", "1.2.0").expect("valid reference")
}

fn deadline() -> Deadline {
    Deadline::after(Duration::from_secs(60))
}

fn manifest_digest(label: &str) -> Sha256Digest {
    Sha256Digest::of_bytes(label.as_bytes())
}

fn keyless(identity: Matcher, issuer: Matcher) -> TrustPolicy {
    TrustPolicy::Keyless { identity, issuer }
}

fn backend_with(certificates: Vec<SignerCertificate>) -> MockSignatureBackend {
    let mut backend = MockSignatureBackend::new();
    backend.expect_verify_with_key().never();
    backend
        .expect_signer_certificates()
        .times(1)
        .returning(move |_, _| Ok(certificates.clone()));
    backend
}

#[rstest]
fn keyless_accepts_matching_certificate(reference: ArtifactReference) {
    let verifier = CosignVerifier::new(backend_with(vec![SignerCertificate::new(
        RELEASE_IDENTITY,
        GITHUB_ISSUER,
    )]));
    let policy = keyless(
        Matcher::pattern("^https://github\\.com/org/app/").expect("regex"),
        Matcher::literal(GITHUB_ISSUER),
    );

    verifier
        .verify(&reference, &policy, deadline())
        .expect("trusted");
}

#[rstest]
fn keyless_reports_identity_mismatch(reference: ArtifactReference) {
    let verifier = CosignVerifier::new(backend_with(vec![SignerCertificate::new(
        "https://github.com/evil/app/.github/workflows/release.yml@refs/heads/main",
        GITHUB_ISSUER,
    )]));
    let policy = keyless(
        Matcher::literal(RELEASE_IDENTITY),
        Matcher::literal(GITHUB_ISSUER),
    );

    let err = verifier
        .verify(&reference, &policy, deadline())
        .expect_err("identity should not match");

    match err {
        TrustError::IdentityMismatch { expected, found } => {
            assert!(expected.contains(RELEASE_IDENTITY));
            assert!(found.contains("github.com/evil/app"));
        }
        other => panic!("expected IdentityMismatch, got {other:?}"),
    }
}

#[rstest]
fn keyless_reports_issuer_mismatch(reference: ArtifactReference) {
    let verifier = CosignVerifier::new(backend_with(vec![SignerCertificate::new(
        RELEASE_IDENTITY,
        "https://accounts.google.com",
    )]));
    let policy = keyless(
        Matcher::literal(RELEASE_IDENTITY),
        Matcher::literal(GITHUB_ISSUER),
    );

    let err = verifier
        .verify(&reference, &policy, deadline())
        .expect_err("issuer should not match");

    match err {
        TrustError::IssuerMismatch { found, .. } => {
            assert_eq!(found, "https://accounts.google.com");
        }
        other => panic!("expected IssuerMismatch, got {other:?}"),
    }
}

#[rstest]
fn keyless_needs_both_fields_on_one_certificate(reference: ArtifactReference) {
    let verifier = CosignVerifier::new(backend_with(vec![
        SignerCertificate::new(RELEASE_IDENTITY, "https://accounts.google.com"),
        SignerCertificate::new("someone@example.com", GITHUB_ISSUER),
    ]));
    let policy = keyless(
        Matcher::literal(RELEASE_IDENTITY),
        Matcher::literal(GITHUB_ISSUER),
    );

    let err = verifier
        .verify(&reference, &policy, deadline())
        .expect_err("fields are split across certificates");

    assert!(matches!(err, TrustError::IssuerMismatch { .. }));
}

#[rstest]
fn keyless_without_signatures_fails(reference: ArtifactReference) {
    let verifier = CosignVerifier::new(backend_with(Vec::new()));
    let policy = keyless(
        Matcher::literal(RELEASE_IDENTITY),
        Matcher::literal(GITHUB_ISSUER),
    );

    let err = verifier
        .verify(&reference, &policy, deadline())
        .expect_err("no signatures");

    assert!(matches!(err, TrustError::NoSignatures { .. }));
}

#[rstest]
fn keyed_mode_never_inspects_certificates(reference: ArtifactReference) {
    let mut backend = MockSignatureBackend::new();
    backend.expect_signer_certificates().never();
    backend
        .expect_verify_with_key()
        .withf(|_, key, _| key == "cosign.pub")
        .times(1)
        .returning(|_, _, _| Ok(Vec::new()));
    let verifier = CosignVerifier::new(backend);
    let policy = TrustPolicy::Keyed {
        key: "cosign.pub".to_owned(),
    };

    verifier
        .verify(&reference, &policy, deadline())
        .expect("trusted");
}

#[rstest]
fn keyless_reports_digest_of_trusted_signature_only(reference: ArtifactReference) {
    let verifier = CosignVerifier::new(backend_with(vec![
        SignerCertificate::new("someone@example.com", GITHUB_ISSUER)
            .with_digest(manifest_digest("other")),
        SignerCertificate::new(RELEASE_IDENTITY, GITHUB_ISSUER)
            .with_digest(manifest_digest("release")),
    ]));
    let policy = keyless(
        Matcher::literal(RELEASE_IDENTITY),
        Matcher::literal(GITHUB_ISSUER),
    );

    let digest = verifier
        .verify(&reference, &policy, deadline())
        .expect("trusted");

    assert_eq!(digest, Some(manifest_digest("release")));
}

#[rstest]
fn trusted_signatures_over_different_manifests_are_refused(reference: ArtifactReference) {
    let verifier = CosignVerifier::new(backend_with(vec![
        SignerCertificate::new(RELEASE_IDENTITY, GITHUB_ISSUER)
            .with_digest(manifest_digest("first")),
        SignerCertificate::new(RELEASE_IDENTITY, GITHUB_ISSUER)
            .with_digest(manifest_digest("second")),
    ]));
    let policy = keyless(
        Matcher::literal(RELEASE_IDENTITY),
        Matcher::literal(GITHUB_ISSUER),
    );

    let err = verifier
        .verify(&reference, &policy, deadline())
        .expect_err("ambiguous digests");

    assert!(
        matches!(err, TrustError::Backend { ref reason } if reason.contains("different manifests"))
    );
}

#[rstest]
fn keyed_mode_reports_signed_digest(reference: ArtifactReference) {
    let mut backend = MockSignatureBackend::new();
    backend
        .expect_verify_with_key()
        .returning(|_, _, _| Ok(vec![manifest_digest("release"), manifest_digest("release")]));
    let verifier = CosignVerifier::new(backend);
    let policy = TrustPolicy::Keyed {
        key: "cosign.pub".to_owned(),
    };

    let digest = verifier
        .verify(&reference, &policy, deadline())
        .expect("trusted");

    assert_eq!(digest, Some(manifest_digest("release")));
}

#[rstest]
fn keyed_rejection_names_key(reference: ArtifactReference) {
    let mut backend = MockSignatureBackend::new();
    backend.expect_verify_with_key().returning(|_, _, _| {
        Err(BackendError::Rejected {
            reason: "no matching signatures".to_owned(),
        })
    });
    let verifier = CosignVerifier::new(backend);
    let policy = TrustPolicy::Keyed {
        key: "cosign.pub".to_owned(),
    };

    let err = verifier
        .verify(&reference, &policy, deadline())
        .expect_err("rejected");

    assert!(matches!(err, TrustError::KeyRejected { ref key, .. } if key == "cosign.pub"));
}

#[rstest]
fn backend_timeout_is_reported_as_timeout(reference: ArtifactReference) {
    let mut backend = MockSignatureBackend::new();
    backend.expect_signer_certificates().returning(|_, _| {
        Err(BackendError::Timeout(DeadlineExceeded {
            limit: Duration::from_secs(5),
        }))
    });
    let verifier = CosignVerifier::new(backend);
    let policy = keyless(Matcher::literal("a"), Matcher::literal("b"));

    let err = verifier
        .verify(&reference, &policy, deadline())
        .expect_err("timeout");

    assert!(matches!(err, TrustError::Timeout(_)));
}

#[rstest]
fn cli_keyed_invocation_passes_key_and_reference(reference: ArtifactReference) {
    let mut executor = MockCommandExecutor::new();
    executor
        .expect_run()
        .withf(|program, args, _| {
            program == "cosign"
                && args.first().map(String::as_str) == Some("verify")
                && args.windows(2).any(|pair| pair == ["--key", "k8s://ns/key"])
                && args.last().map(String::as_str) == Some("ghcr.io/org/app:1.2.0")
        })
        .times(1)
        .returning(|_, _, _| Ok(success_output("[]")));
    let cli = CosignCli::new(&executor, "cosign");

    cli.verify_with_key(&reference, "k8s://ns/key", deadline())
        .expect("verified");
}

#[rstest]
fn cli_nonzero_exit_is_rejection(reference: ArtifactReference) {
    let mut executor = MockCommandExecutor::new();
    executor
        .expect_run()
        .returning(|_, _, _| Ok(failure_output("Error: no matching signatures")));
    let cli = CosignCli::new(&executor, "cosign");

    let err = cli
        .verify_with_key(&reference, "cosign.pub", deadline())
        .expect_err("rejected");

    assert!(
        matches!(err, BackendError::Rejected { ref reason } if reason.contains("no matching signatures"))
    );
}

#[rstest]
fn cli_timeout_maps_to_deadline(reference: ArtifactReference) {
    let mut executor = MockCommandExecutor::new();
    executor.expect_run().returning(|program, _, timeout| {
        Err(CommandError::TimedOut {
            program: program.to_owned(),
            timeout,
        })
    });
    let cli = CosignCli::new(&executor, "cosign");

    let err = cli
        .signer_certificates(&reference, deadline())
        .expect_err("timeout");

    assert!(
        matches!(err, BackendError::Timeout(exceeded) if exceeded.limit == Duration::from_secs(60))
    );
}

#[rstest]
fn cli_insecure_registry_flag_is_forwarded(reference: ArtifactReference) {
    let mut executor = MockCommandExecutor::new();
    executor
        .expect_run()
        .withf(|_, args, _| args.iter().any(|arg| arg == "--allow-insecure-registry"))
        .times(1)
        .returning(|_, _, _| Ok(success_output("[]")));
    let cli = CosignCli::new(&executor, "cosign").allow_insecure_registry(true);

    let certificates = cli
        .signer_certificates(&reference, deadline())
        .expect("parsed");
    assert!(certificates.is_empty());
}

#[rstest]
fn cli_parses_keyless_output(reference: ArtifactReference) {
    let stdout = concat!(
        r#"[{"critical":{"type":"cosign container image signature"},"#,
        r#""optional":{"Issuer":"https://token.actions.githubusercontent.com","#,
        r#""Subject":"https://github.com/org/app/.github/workflows/release.yml@refs/tags/v1.2.0"}},"#,
        r#"{"critical":{},"optional":null}]"#,
    );
    let mut executor = MockCommandExecutor::new();
    executor
        .expect_run()
        .withf(|_, args, _| {
            args.iter().any(|arg| arg == "--certificate-identity-regexp")
                && !args.iter().any(|arg| arg == "--key")
        })
        .returning(move |_, _, _| Ok(success_output(stdout)));
    let cli = CosignCli::new(&executor, "cosign");

    let certificates = cli
        .signer_certificates(&reference, deadline())
        .expect("parsed");

    assert_eq!(
        certificates,
        vec![
            SignerCertificate::new(RELEASE_IDENTITY, GITHUB_ISSUER),
            SignerCertificate::default(),
        ]
    );
}

#[rstest]
fn cli_keyed_output_yields_manifest_digests(reference: ArtifactReference) {
    let digest = manifest_digest("release");
    let stdout = format!(
        r#"[{{"critical":{{"image":{{"docker-manifest-digest":"{digest}"}},"type":"cosign container image signature"}},"optional":null}}]"#
    );
    let mut executor = MockCommandExecutor::new();
    executor
        .expect_run()
        .returning(move |_, _, _| Ok(success_output(&stdout)));
    let cli = CosignCli::new(&executor, "cosign");

    let digests = cli
        .verify_with_key(&reference, "cosign.pub", deadline())
        .expect("verified");

    assert_eq!(digests, vec![digest]);
}

#[test]
fn keyless_payload_digest_is_attached_to_certificate() {
    let digest = manifest_digest("release");
    let stdout = format!(
        r#"{{"critical":{{"image":{{"docker-manifest-digest":"{digest}"}}}},"optional":{{"Subject":"{RELEASE_IDENTITY}","Issuer":"{GITHUB_ISSUER}"}}}}"#
    );

    let certificates = parse_signer_certificates(&stdout).expect("parsed");

    assert_eq!(
        certificates,
        vec![SignerCertificate::new(RELEASE_IDENTITY, GITHUB_ISSUER).with_digest(digest)]
    );
}

#[test]
fn malformed_payload_digest_is_backend_failure() {
    let stdout = r#"{"critical":{"image":{"docker-manifest-digest":"md5:abc"}}}"#;
    let err = parse_signer_certificates(stdout).expect_err("bad digest");
    assert!(matches!(err, BackendError::Unavailable { .. }));
}

#[rstest]
#[case::object_per_line(concat!(
    r#"{"optional":{"Subject":"a@example.com","Issuer":"https://issuer.example"}}"#,
    "\n",
    r#"{"optional":{"Subject":"b@example.com","Issuer":"https://issuer.example"}}"#,
), 2)]
#[case::empty("", 0)]
#[case::blank_lines("\n\n[]\n", 0)]
fn parses_payload_layouts(#[case] stdout: &str, #[case] expected: usize) {
    let certificates = parse_signer_certificates(stdout).expect("parsed");
    assert_eq!(certificates.len(), expected);
}

#[test]
fn garbage_output_is_backend_failure() {
    let err = parse_signer_certificates("Verification for ghcr.io/org/app --").expect_err("bad");
    assert!(matches!(err, BackendError::Unavailable { .. }));
}
