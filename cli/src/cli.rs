//! CLI argument definitions for `modpull`.
//!
//! Kept apart from the entrypoint so parsing can be tested without running
//! any workflow.

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use modpull::trust::VerificationSpec;

/// Pull versioned modules from OCI registries.
#[derive(Parser, Debug)]
#[command(name = "modpull")]
#[command(version, about)]
#[command(after_help = concat!(
    "EXAMPLES:\n",
    "  Pull the latest version of a module:\n",
    "    $ modpull pull oci://ghcr.io/org/modules/app --output ./app\n\n",
    "  Pull a version after checking its keyless signature:\n",
    "    $ modpull pull oci://ghcr.io/org/modules/app --version 1.0.0 --output ./app \\\n",
    "        --verify cosign \\\n",
    "        --certificate-identity-regexp '^https://github.com/org/.*$' \\\n",
    "        --certificate-oidc-issuer https://token.actions.githubusercontent.com\n\n",
    "  List applied instances across the cluster:\n",
    "    $ modpull list -A\n",
))]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Settings file [default: ./modpull.toml when present].
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<Utf8PathBuf>,

    /// Increase log verbosity (repeatable: -v, -vv, -vvv).
    #[arg(
        short,
        long = "verbose",
        global = true,
        action = clap::ArgAction::Count,
        conflicts_with = "quiet"
    )]
    pub verbosity: u8,

    /// Suppress progress output (errors still shown).
    #[arg(short, long, global = true, conflicts_with = "verbosity")]
    pub quiet: bool,
}

/// Available subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Pull a module version from a container registry.
    Pull(PullArgs),

    /// Print a table of applied instances and their module version.
    #[command(visible_alias = "ls")]
    List(ListArgs),
}

/// Arguments for the pull command.
#[derive(Args, Debug, Clone, Default)]
pub struct PullArgs {
    /// Module URL, e.g. oci://ghcr.io/org/modules/app.
    #[arg(value_name = "MODULE_URL")]
    pub module_url: String,

    /// Module version to pull [default: latest].
    #[arg(long, value_name = "VERSION", default_value = "")]
    pub version: String,

    /// Existing directory the module content is extracted into.
    #[arg(short, long, value_name = "DIR")]
    pub output: Utf8PathBuf,

    /// Registry credentials as `<username>:<secret>` or a bare token.
    #[arg(long, value_name = "CREDS")]
    pub creds: Option<String>,

    /// Verify the module signature with the named provider (cosign).
    #[arg(long, value_name = "PROVIDER")]
    pub verify: Option<String>,

    /// Cosign public key for keyed verification.
    #[arg(long, value_name = "KEY")]
    pub cosign_key: Option<String>,

    /// Identity expected in the signing certificate.
    #[arg(long, value_name = "IDENTITY")]
    pub certificate_identity: Option<String>,

    /// Regular expression alternative to --certificate-identity.
    #[arg(long, value_name = "REGEXP")]
    pub certificate_identity_regexp: Option<String>,

    /// OIDC issuer expected in the signing certificate.
    #[arg(long, value_name = "ISSUER")]
    pub certificate_oidc_issuer: Option<String>,

    /// Regular expression alternative to --certificate-oidc-issuer.
    #[arg(long, value_name = "REGEXP")]
    pub certificate_oidc_issuer_regexp: Option<String>,

    /// Time budget for the pull in seconds [default: from settings, 300].
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Talk to the registry over plain HTTP.
    #[arg(long)]
    pub plain_http: bool,
}

impl PullArgs {
    /// Return the verification requested on the command line.
    ///
    /// Certificate and key flags only take effect together with `--verify`.
    #[must_use]
    pub fn verification(&self) -> Option<VerificationSpec> {
        let provider = self.verify.as_deref().map(str::trim)?;
        if provider.is_empty() {
            return None;
        }
        let mut spec = VerificationSpec::new(provider);
        if let Some(key) = &self.cosign_key {
            spec = spec.with_key(key.as_str());
        }
        if let Some(identity) = &self.certificate_identity {
            spec = spec.with_identity(identity.as_str());
        }
        if let Some(pattern) = &self.certificate_identity_regexp {
            spec = spec.with_identity_regexp(pattern.as_str());
        }
        if let Some(issuer) = &self.certificate_oidc_issuer {
            spec = spec.with_issuer(issuer.as_str());
        }
        if let Some(pattern) = &self.certificate_oidc_issuer_regexp {
            spec = spec.with_issuer_regexp(pattern.as_str());
        }
        Some(spec)
    }
}

/// Arguments for the list command.
#[derive(Args, Debug, Clone, Default)]
pub struct ListArgs {
    /// Namespace to list [default: from settings, `default`].
    #[arg(short, long, value_name = "NAMESPACE")]
    pub namespace: Option<String>,

    /// List instances across all namespaces.
    #[arg(short = 'A', long)]
    pub all_namespaces: bool,

    /// Only list instances belonging to this bundle.
    #[arg(long, value_name = "NAME")]
    pub bundle: Option<String>,
}

#[cfg(test)]
#[path = "cli_tests.rs"]
mod tests;
