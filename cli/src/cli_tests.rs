//! Tests for CLI parsing and verification flag assembly.

use super::*;
use clap::Parser;
use rstest::rstest;

fn pull_args(extra: &[&str]) -> PullArgs {
    let mut argv = vec!["modpull", "pull", "oci://ghcr.io/org/app", "-o", "./app"];
    argv.extend_from_slice(extra);
    match Cli::parse_from(argv).command {
        Command::Pull(args) => args,
        Command::List(_) => panic!("expected Pull command"),
    }
}

#[test]
fn pull_parses_defaults() {
    let args = pull_args(&[]);
    assert_eq!(args.module_url, "oci://ghcr.io/org/app");
    assert_eq!(args.output, Utf8PathBuf::from("./app"));
    assert_eq!(args.version, "");
    assert!(args.creds.is_none());
    assert!(args.timeout.is_none());
    assert!(!args.plain_http);
    assert!(args.verification().is_none());
}

#[test]
fn pull_requires_output() {
    let result = Cli::try_parse_from(["modpull", "pull", "oci://ghcr.io/org/app"]);
    assert!(result.is_err());
}

#[test]
fn pull_parses_version_and_timeout() {
    let args = pull_args(&["--version", "1.2.0", "--timeout", "30", "--plain-http"]);
    assert_eq!(args.version, "1.2.0");
    assert_eq!(args.timeout, Some(30));
    assert!(args.plain_http);
}

#[test]
fn global_flags_follow_subcommand() {
    let cli = Cli::parse_from([
        "modpull",
        "pull",
        "oci://ghcr.io/org/app",
        "-o",
        "./app",
        "-vv",
        "--config",
        "ci.toml",
    ]);
    assert_eq!(cli.verbosity, 2);
    assert_eq!(cli.config, Some(Utf8PathBuf::from("ci.toml")));
}

#[test]
fn quiet_conflicts_with_verbose() {
    let result = Cli::try_parse_from(["modpull", "-q", "-v", "list"]);
    assert!(result.is_err());
}

#[test]
fn keyless_flags_build_spec() {
    let args = pull_args(&[
        "--verify",
        "cosign",
        "--certificate-identity-regexp",
        "^https://github.com/org/",
        "--certificate-oidc-issuer",
        "https://token.actions.githubusercontent.com",
    ]);

    let spec = args.verification().expect("verification requested");

    assert_eq!(spec.provider, "cosign");
    assert_eq!(spec.key, None);
    assert_eq!(
        spec.certificate_identity_regexp.as_deref(),
        Some("^https://github.com/org/")
    );
    assert_eq!(
        spec.certificate_oidc_issuer.as_deref(),
        Some("https://token.actions.githubusercontent.com")
    );
}

#[test]
fn certificate_flags_without_verify_are_ignored() {
    let args = pull_args(&["--cosign-key", "cosign.pub"]);
    assert!(args.verification().is_none());
}

#[rstest]
#[case::no_flags(&["list"], None, false, None)]
#[case::namespace(&["list", "-n", "apps"], Some("apps"), false, None)]
#[case::all(&["ls", "-A"], None, true, None)]
#[case::bundle(&["list", "-A", "--bundle", "podinfo"], None, true, Some("podinfo"))]
fn list_parses_scope_flags(
    #[case] argv: &[&str],
    #[case] namespace: Option<&str>,
    #[case] all: bool,
    #[case] bundle: Option<&str>,
) {
    let cli = Cli::parse_from(std::iter::once("modpull").chain(argv.iter().copied()));
    let Command::List(args) = cli.command else {
        panic!("expected List command");
    };
    assert_eq!(args.namespace.as_deref(), namespace);
    assert_eq!(args.all_namespaces, all);
    assert_eq!(args.bundle.as_deref(), bundle);
}
