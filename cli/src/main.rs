//! `modpull` CLI entrypoint.
//!
//! Pulls a module from an OCI registry into a local directory, optionally
//! checking its signature first, or lists the module instances applied to
//! the current cluster.

mod cli;

use camino::{Utf8Path, Utf8PathBuf};
use clap::Parser;
use cli::{Cli, Command, ListArgs, PullArgs};
use modpull::acquire::{AcquireRequest, acquire};
use modpull::command::SystemCommandExecutor;
use modpull::config::{CONFIG_FILE_NAME, ConfigError, ListConfig, Settings};
use modpull::credentials::Credentials;
use modpull::error::AcquireError;
use modpull::inventory::{
    InstanceStore, InventoryError, KubectlInventory, NamespaceScope, render_table,
};
use modpull::output::write_stderr_line;
use std::error::Error as _;
use std::io::Write;
use std::time::Duration;
use thiserror::Error;

/// Failures surfaced by a CLI run.
#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Acquire(#[from] AcquireError),

    #[error(transparent)]
    Inventory(#[from] InventoryError),

    #[error("failed to write output: {0}")]
    Output(#[from] std::io::Error),
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbosity, cli.quiet);
    let mut stderr = std::io::stderr();
    let run_result = run(&cli, &mut std::io::stdout(), &mut stderr);
    let exit_code = exit_code_for_run_result(run_result, &mut stderr);
    if exit_code != 0 {
        std::process::exit(exit_code);
    }
}

/// Initialise `env_logger`; `RUST_LOG` overrides the flag-derived level.
fn init_logging(verbosity: u8, quiet: bool) {
    let level = log_level(verbosity, quiet);
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .init();
}

const fn log_level(verbosity: u8, quiet: bool) -> &'static str {
    if quiet {
        return "error";
    }
    match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

fn run(cli: &Cli, stdout: &mut dyn Write, stderr: &mut dyn Write) -> Result<(), CliError> {
    let settings = load_settings(cli.config.as_deref())?;
    match &cli.command {
        Command::Pull(args) => run_pull(args, &settings, cli.quiet, stderr),
        Command::List(args) => run_list(args, &settings, stdout),
    }
}

/// Load `explicit` if given, else `./modpull.toml` when it exists, else the
/// built-in defaults.
fn load_settings(explicit: Option<&Utf8Path>) -> Result<Settings, ConfigError> {
    if let Some(path) = explicit {
        return Settings::load_from(path);
    }
    let local = Utf8PathBuf::from(CONFIG_FILE_NAME);
    if local.is_file() {
        Settings::load_from(&local)
    } else {
        Ok(Settings::default())
    }
}

fn pull_request(args: &PullArgs, settings: &Settings, quiet: bool) -> AcquireRequest {
    let mut request = AcquireRequest::new(
        args.module_url.as_str(),
        args.version.as_str(),
        args.output.clone(),
    );
    request.credentials = args
        .creds
        .as_deref()
        .map(Credentials::new)
        .unwrap_or_default();
    request.verification = args.verification();
    request.timeout = args
        .timeout
        .map_or_else(|| settings.timeout(), Duration::from_secs);
    request.quiet = quiet;
    request
}

fn run_pull(
    args: &PullArgs,
    settings: &Settings,
    quiet: bool,
    stderr: &mut dyn Write,
) -> Result<(), CliError> {
    let config = settings.pull_config(args.plain_http);
    let request = pull_request(args, settings, quiet);
    let acquired = acquire(request, &config, stderr)?;
    log::debug!(
        "{} entries extracted into {}",
        acquired.files.len(),
        acquired.destination
    );
    Ok(())
}

fn run_list(args: &ListArgs, settings: &Settings, stdout: &mut dyn Write) -> Result<(), CliError> {
    let config = settings.list_config(
        args.namespace.as_deref(),
        args.all_namespaces,
        args.bundle.as_deref(),
    );
    let executor = SystemCommandExecutor;
    let inventory = KubectlInventory::new(&executor, config.kubectl_binary.as_str(), config.timeout);
    write_listing(&inventory, &config, stdout)
}

/// Query `store` for the instances `config` selects and print them as a
/// table.
fn write_listing(
    store: &dyn InstanceStore,
    config: &ListConfig,
    stdout: &mut dyn Write,
) -> Result<(), CliError> {
    let instances = store.list(&config.scope, config.bundle.as_deref())?;
    let all_namespaces = matches!(config.scope, NamespaceScope::All);
    stdout.write_all(render_table(&instances, all_namespaces).as_bytes())?;
    Ok(())
}

fn exit_code_for_run_result(result: Result<(), CliError>, stderr: &mut dyn Write) -> i32 {
    match result {
        Ok(()) => 0,
        Err(err) => {
            write_stderr_line(stderr, format_args!("error: {err}"));
            let mut source = err.source();
            while let Some(cause) = source {
                write_stderr_line(stderr, format_args!("  caused by: {cause}"));
                source = cause.source();
            }
            1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modpull::error::{FailureCause, Stage};
    use modpull::inventory::{BUNDLE_LABEL, Instance, ModuleInfo};
    use rstest::rstest;
    use std::cell::RefCell;
    use std::collections::BTreeMap;

    /// Answers listings from a fixed set and records each query.
    #[derive(Default)]
    struct FixedStore {
        instances: Vec<Instance>,
        queries: RefCell<Vec<(NamespaceScope, Option<String>)>>,
    }

    impl InstanceStore for FixedStore {
        fn list(
            &self,
            scope: &NamespaceScope,
            bundle: Option<&str>,
        ) -> Result<Vec<Instance>, InventoryError> {
            self.queries
                .borrow_mut()
                .push((scope.clone(), bundle.map(str::to_owned)));
            Ok(self.instances.clone())
        }
    }

    fn instance(name: &str, namespace: &str) -> Instance {
        Instance {
            name: name.to_owned(),
            namespace: namespace.to_owned(),
            module: ModuleInfo {
                repository: "oci://ghcr.io/org/modules/app".to_owned(),
                version: "1.2.0".to_owned(),
                digest: String::new(),
            },
            last_transition_time: "2026-10-01T12:00:00Z".to_owned(),
            labels: BTreeMap::from([(BUNDLE_LABEL.to_owned(), "podinfo".to_owned())]),
        }
    }

    fn list_config(scope: NamespaceScope, bundle: Option<&str>) -> ListConfig {
        ListConfig {
            scope,
            bundle: bundle.map(str::to_owned),
            kubectl_binary: "kubectl".to_owned(),
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn exit_code_for_run_result_returns_zero_on_success() {
        let mut stderr = Vec::new();
        let exit_code = exit_code_for_run_result(Ok(()), &mut stderr);
        assert_eq!(exit_code, 0);
        assert!(stderr.is_empty());
    }

    #[test]
    fn exit_code_for_run_result_prints_error_and_returns_one() {
        let err = AcquireError::new(
            Stage::Preflight,
            FailureCause::InvalidDestination {
                path: Utf8PathBuf::from("/missing"),
            },
        );

        let mut stderr = Vec::new();
        let exit_code = exit_code_for_run_result(Err(err.into()), &mut stderr);
        assert_eq!(exit_code, 1);

        let stderr_text = String::from_utf8(stderr).expect("stderr was not UTF-8");
        assert!(stderr_text.starts_with("error: "));
        assert!(stderr_text.contains("/missing"));
    }

    #[test]
    fn config_errors_print_their_source_chain() {
        let err = Settings::load_with(Utf8Path::new("bad.toml"), |_| {
            Ok("timeout_secs = \"soon\"\n".to_owned())
        })
        .expect_err("invalid settings");

        let mut stderr = Vec::new();
        exit_code_for_run_result(Err(err.into()), &mut stderr);

        let stderr_text = String::from_utf8(stderr).expect("stderr was not UTF-8");
        assert!(stderr_text.contains("bad.toml"));
        assert!(stderr_text.contains("caused by:"));
    }

    #[rstest]
    #[case::quiet(0, true, "error")]
    #[case::default(0, false, "warn")]
    #[case::info(1, false, "info")]
    #[case::debug(2, false, "debug")]
    #[case::trace(5, false, "trace")]
    fn log_level_follows_flags(#[case] verbosity: u8, #[case] quiet: bool, #[case] expected: &str) {
        assert_eq!(log_level(verbosity, quiet), expected);
    }

    #[test]
    fn pull_request_prefers_flag_timeout_over_settings() {
        let settings = Settings::default();
        let args = PullArgs {
            module_url: "oci://ghcr.io/org/app".to_owned(),
            output: Utf8PathBuf::from("./app"),
            creds: Some("ci:token".to_owned()),
            timeout: Some(5),
            ..PullArgs::default()
        };

        let flagged = pull_request(&args, &settings, true);

        assert_eq!(flagged.timeout, Duration::from_secs(5));
        assert!(!flagged.credentials.is_empty());
        assert!(flagged.quiet);
        assert!(flagged.verification.is_none());

        let defaulted = pull_request(&PullArgs { timeout: None, ..args }, &settings, false);
        assert_eq!(defaulted.timeout, settings.timeout());
    }

    #[test]
    fn explicit_missing_settings_file_is_an_error() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = Utf8PathBuf::from_path_buf(dir.path().join("absent.toml"))
            .expect("utf-8 temp path");

        let err = load_settings(Some(&path)).expect_err("missing file");

        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn listing_queries_the_configured_scope_and_bundle() {
        let store = FixedStore {
            instances: vec![instance("frontend", "apps")],
            ..FixedStore::default()
        };
        let config = list_config(NamespaceScope::Named("apps".to_owned()), Some("podinfo"));
        let mut stdout = Vec::new();

        write_listing(&store, &config, &mut stdout).expect("listing");

        assert_eq!(
            store.queries.borrow().as_slice(),
            [(
                NamespaceScope::Named("apps".to_owned()),
                Some("podinfo".to_owned())
            )]
        );
        let table = String::from_utf8(stdout).expect("stdout was not UTF-8");
        assert!(table.starts_with("NAME"));
        assert!(!table.contains("NAMESPACE"));
        assert!(table.contains("frontend"));
        assert!(table.contains("podinfo"));
    }

    #[test]
    fn listing_across_namespaces_adds_namespace_column() {
        let store = FixedStore {
            instances: vec![instance("frontend", "apps"), instance("backend", "data")],
            ..FixedStore::default()
        };
        let config = list_config(NamespaceScope::All, None);
        let mut stdout = Vec::new();

        write_listing(&store, &config, &mut stdout).expect("listing");

        let table = String::from_utf8(stdout).expect("stdout was not UTF-8");
        let mut lines = table.lines();
        assert!(lines.next().is_some_and(|header| header.contains("NAMESPACE")));
        assert_eq!(lines.count(), 2);
        assert!(table.contains("data"));
    }
}
