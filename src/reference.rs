//! Module reference resolution.
//!
//! Turns an `oci://` module locator and a version selector into a fully
//! qualified [`ArtifactReference`]. Resolution is pure string parsing: the
//! version is appended to the locator with a `:` separator and the combined
//! string is split into registry host, repository path, and tag. An empty
//! version selects [`LATEST_TAG`].

use std::fmt;
use thiserror::Error;

/// Tag substituted when the caller does not select a version.
pub const LATEST_TAG: &str = "latest";

/// Scheme prefix every module locator must carry.
pub const OCI_SCHEME: &str = "oci://";

/// Registry used when the locator does not name one.
pub const DEFAULT_REGISTRY: &str = "index.docker.io";

/// Namespace prepended to single-component repositories on the default registry.
const DEFAULT_NAMESPACE: &str = "library";

/// Maximum tag length accepted by OCI distribution.
const MAX_TAG_LEN: usize = 128;

/// Errors arising from reference resolution.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReferenceError {
    /// The locator does not start with [`OCI_SCHEME`].
    #[error("URL must be in format 'oci://<domain>/<org>/<repo>'")]
    MissingScheme {
        /// The rejected locator.
        input: String,
    },

    /// The combined locator and version does not parse.
    #[error("{reason}")]
    Malformed {
        /// The rejected `locator:version` string.
        input: String,
        /// Description of the grammar violation.
        reason: String,
    },
}

impl ReferenceError {
    /// Return the input string that failed to resolve.
    #[must_use]
    pub fn input(&self) -> &str {
        match self {
            Self::MissingScheme { input } | Self::Malformed { input, .. } => input,
        }
    }
}

/// A fully qualified registry address: host, repository, and tag.
///
/// # Examples
///
/// ```
/// use modpull::reference::resolve;
///
/// let reference = resolve("oci://ghcr.io/org/app", "1.0.0").expect("valid reference");
/// assert_eq!(reference.registry(), "ghcr.io");
/// assert_eq!(reference.repository(), "org/app");
/// assert_eq!(reference.tag(), "1.0.0");
/// assert_eq!(reference.to_string(), "ghcr.io/org/app:1.0.0");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactReference {
    registry: String,
    repository: String,
    tag: String,
}

impl ArtifactReference {
    /// Parse a `host/repository:tag` string.
    ///
    /// # Errors
    ///
    /// Returns [`ReferenceError::Malformed`] when any component violates the
    /// distribution grammar or the tag is missing.
    pub fn parse(input: &str) -> Result<Self, ReferenceError> {
        let malformed = |reason: String| ReferenceError::Malformed {
            input: input.to_owned(),
            reason,
        };

        if input.is_empty() {
            return Err(malformed("reference is empty".to_owned()));
        }
        if input.contains('@') {
            return Err(malformed("digest references are not supported".to_owned()));
        }

        let last_slash = input.rfind('/').map_or(0, |idx| idx + 1);
        let (name, tag) = match input.get(last_slash..).and_then(|tail| tail.rfind(':')) {
            Some(offset) => {
                let split = last_slash + offset;
                (
                    input.get(..split).unwrap_or_default(),
                    input.get(split + 1..).unwrap_or_default(),
                )
            }
            None => return Err(malformed("reference has no tag".to_owned())),
        };

        validate_tag(tag).map_err(malformed)?;
        let (registry, repository) = split_registry(name).map_err(malformed)?;
        validate_repository(&repository).map_err(malformed)?;

        Ok(Self {
            registry,
            repository,
            tag: tag.to_owned(),
        })
    }

    /// Return the registry host, including any port.
    #[must_use]
    pub fn registry(&self) -> &str {
        &self.registry
    }

    /// Return the repository path within the registry.
    #[must_use]
    pub fn repository(&self) -> &str {
        &self.repository
    }

    /// Return the version tag. Never empty.
    #[must_use]
    pub fn tag(&self) -> &str {
        &self.tag
    }
}

impl fmt::Display for ArtifactReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}", self.registry, self.repository, self.tag)
    }
}

/// Resolve a module locator and version selector into a reference.
///
/// # Errors
///
/// Returns [`ReferenceError`] when the locator lacks the `oci://` scheme or
/// the combined `locator:version` string does not parse.
///
/// # Examples
///
/// ```
/// use modpull::reference::{LATEST_TAG, resolve};
///
/// let reference = resolve("oci://reg.example/org/app", "").expect("valid reference");
/// assert_eq!(reference.tag(), LATEST_TAG);
/// ```
pub fn resolve(locator: &str, version: &str) -> Result<ArtifactReference, ReferenceError> {
    let tag = match version.trim() {
        "" => LATEST_TAG,
        selected => selected,
    };

    let Some(address) = locator.strip_prefix(OCI_SCHEME) else {
        return Err(ReferenceError::MissingScheme {
            input: locator.to_owned(),
        });
    };

    ArtifactReference::parse(&format!("{address}:{tag}"))
}

/// Split the registry host off the repository name.
///
/// The first component names a registry only when it looks like a host
/// (contains `.` or `:`, or is `localhost`); otherwise the default registry
/// applies.
fn split_registry(name: &str) -> Result<(String, String), String> {
    match name.split_once('/') {
        Some((first, rest)) if looks_like_host(first) => {
            validate_host(first)?;
            Ok((normalise_host(first), rest.to_owned()))
        }
        Some(_) => Ok((DEFAULT_REGISTRY.to_owned(), name.to_owned())),
        None if looks_like_host(name) => Err(format!("repository is missing after host {name}")),
        None => Ok((
            DEFAULT_REGISTRY.to_owned(),
            format!("{DEFAULT_NAMESPACE}/{name}"),
        )),
    }
}

fn looks_like_host(component: &str) -> bool {
    component.contains('.') || component.contains(':') || component == "localhost"
}

fn normalise_host(host: &str) -> String {
    if host == "docker.io" {
        DEFAULT_REGISTRY.to_owned()
    } else {
        host.to_owned()
    }
}

fn validate_host(host: &str) -> Result<(), String> {
    let (hostname, port) = host
        .rsplit_once(':')
        .map_or((host, None), |(name, number)| (name, Some(number)));

    if hostname.is_empty() {
        return Err("registry host is empty".to_owned());
    }
    if let Some(bad) = hostname
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '.' || *c == '-'))
    {
        return Err(format!("registry host contains invalid character '{bad}'"));
    }
    if hostname.starts_with(['.', '-']) || hostname.ends_with(['.', '-']) {
        return Err(format!("registry host {hostname} is not a valid hostname"));
    }
    match port {
        Some(number) if number.parse::<u16>().is_err() => {
            Err(format!("registry port {number} is not a valid port"))
        }
        _ => Ok(()),
    }
}

fn validate_repository(repository: &str) -> Result<(), String> {
    if repository.is_empty() {
        return Err("repository is empty".to_owned());
    }
    for component in repository.split('/') {
        validate_path_component(component)?;
    }
    Ok(())
}

/// A path component is lowercase alphanumerics joined by `.`, `_`, `__`, or
/// one or more `-`.
fn validate_path_component(component: &str) -> Result<(), String> {
    let invalid = || format!("repository component \"{component}\" is invalid");

    if component.is_empty() {
        return Err("repository contains an empty path component".to_owned());
    }

    let mut previous_separator: Option<char> = None;
    let mut separator_run = 0_usize;
    for (position, c) in component.chars().enumerate() {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            previous_separator = None;
            separator_run = 0;
            continue;
        }
        if !matches!(c, '.' | '_' | '-') || position == 0 {
            return Err(invalid());
        }
        separator_run += 1;
        let allowed = match (previous_separator, c) {
            (None, _) => true,
            (Some('_'), '_') => separator_run == 2,
            (Some('-'), '-') => true,
            _ => false,
        };
        if !allowed {
            return Err(invalid());
        }
        previous_separator = Some(c);
    }

    if previous_separator.is_some() {
        return Err(invalid());
    }
    Ok(())
}

fn validate_tag(tag: &str) -> Result<(), String> {
    if tag.is_empty() {
        return Err("tag is empty".to_owned());
    }
    if tag.len() > MAX_TAG_LEN {
        return Err(format!("tag exceeds {MAX_TAG_LEN} characters"));
    }
    let mut chars = tag.chars();
    let first_ok = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_');
    if !first_ok {
        return Err(format!("tag \"{tag}\" must start with a letter, digit, or '_'"));
    }
    if let Some(bad) = chars.find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-')))
    {
        return Err(format!("tag \"{tag}\" contains invalid character '{bad}'"));
    }
    Ok(())
}
