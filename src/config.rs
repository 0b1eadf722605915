//! Settings file and per-invocation configuration.
//!
//! `modpull` reads optional defaults from a TOML file. Command-line flags
//! override those defaults, and the merged result is captured once in an
//! immutable [`PullConfig`] or [`ListConfig`] that is passed down to the
//! workflow instead of being consulted through global state.

use crate::inventory::NamespaceScope;
use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Default file name looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = "modpull.toml";

/// Errors arising from loading the settings file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read {path}: {source}")]
    Read {
        /// The settings file path.
        path: Utf8PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid settings TOML.
    #[error("failed to parse {path}: {source}")]
    Parse {
        /// The settings file path.
        path: Utf8PathBuf,
        /// The TOML error.
        #[source]
        source: Box<toml::de::Error>,
    },

    /// A value is out of range.
    #[error("invalid setting in {path}: {reason}")]
    Invalid {
        /// The settings file path.
        path: Utf8PathBuf,
        /// Description of the problem.
        reason: String,
    },
}

/// Defaults read from the settings file.
///
/// Every field is optional in the file; omitted fields keep their defaults.
///
/// # Examples
///
/// ```
/// use modpull::config::Settings;
///
/// let settings: Settings = toml::from_str("timeout_secs = 60\n").expect("valid settings");
/// assert_eq!(settings.timeout_secs, 60);
/// assert_eq!(settings.cosign_binary, "cosign");
/// ```
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Time budget for one pull, in seconds.
    pub timeout_secs: u64,
    /// Program used for signature verification.
    pub cosign_binary: String,
    /// Program used to query the cluster inventory.
    pub kubectl_binary: String,
    /// Talk to registries over plain HTTP.
    pub plain_http: bool,
    /// Namespace listed when no namespace flag is given.
    pub namespace: String,
}

impl Settings {
    const fn default_timeout_secs() -> u64 {
        300
    }

    /// Load settings from `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read, does not parse,
    /// or holds an out-of-range value.
    pub fn load_from(path: &Utf8Path) -> Result<Self, ConfigError> {
        Self::load_with(path, |p| std::fs::read_to_string(p))
    }

    /// Load settings from `path` using the supplied reader.
    ///
    /// Exists so tests can supply file contents without touching disk.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] as for [`Self::load_from`].
    pub fn load_with<F>(path: &Utf8Path, reader: F) -> Result<Self, ConfigError>
    where
        F: FnOnce(&Utf8Path) -> std::io::Result<String>,
    {
        let contents = reader(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let settings: Self = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source: Box::new(source),
        })?;
        if settings.timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                path: path.to_path_buf(),
                reason: "timeout_secs must be greater than zero".to_owned(),
            });
        }
        log::debug!("loaded settings from {path}");
        Ok(settings)
    }

    /// Return the configured time budget.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Build the tooling configuration for a pull.
    ///
    /// `plain_http` from the command line can only switch plain HTTP on.
    #[must_use]
    pub fn pull_config(&self, plain_http: bool) -> PullConfig {
        PullConfig {
            plain_http: self.plain_http || plain_http,
            cosign_binary: self.cosign_binary.clone(),
        }
    }

    /// Build the configuration for listing instances.
    ///
    /// `all_namespaces` wins over `namespace`; with neither, the configured
    /// default namespace is used.
    #[must_use]
    pub fn list_config(
        &self,
        namespace: Option<&str>,
        all_namespaces: bool,
        bundle: Option<&str>,
    ) -> ListConfig {
        let scope = if all_namespaces {
            NamespaceScope::All
        } else {
            NamespaceScope::from(namespace.unwrap_or(&self.namespace))
        };
        ListConfig {
            scope,
            bundle: bundle
                .map(str::trim)
                .filter(|b| !b.is_empty())
                .map(str::to_owned),
            kubectl_binary: self.kubectl_binary.clone(),
            timeout: self.timeout(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            timeout_secs: Self::default_timeout_secs(),
            cosign_binary: "cosign".to_owned(),
            kubectl_binary: "kubectl".to_owned(),
            plain_http: false,
            namespace: "default".to_owned(),
        }
    }
}

/// Tooling options for one pull.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PullConfig {
    /// Talk to registries over plain HTTP.
    pub plain_http: bool,
    /// Program used for signature verification.
    pub cosign_binary: String,
}

impl Default for PullConfig {
    fn default() -> Self {
        Settings::default().pull_config(false)
    }
}

/// Options for one instance listing.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ListConfig {
    /// Namespaces to list.
    pub scope: NamespaceScope,
    /// Restrict the listing to one bundle.
    pub bundle: Option<String>,
    /// Program used to query the cluster.
    pub kubectl_binary: String,
    /// Time budget for the query.
    pub timeout: Duration,
}
