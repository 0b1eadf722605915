//! Registry credentials supplied by the caller.
//!
//! Credentials are an opaque string: `user:secret` is sent as HTTP basic
//! authentication, anything without a `:` is treated as a registry token.
//! They are consumed once to configure a registry session and never
//! persisted.

use std::fmt;

/// An opaque registry credential. Empty means anonymous access.
///
/// The `Debug` representation never reveals the secret.
///
/// # Examples
///
/// ```
/// use modpull::credentials::Credentials;
///
/// let creds = Credentials::new("ci:s3cr3t");
/// assert!(!creds.is_empty());
/// assert!(!format!("{creds:?}").contains("s3cr3t"));
/// assert!(Credentials::default().is_empty());
/// ```
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials(String);

/// The parsed form of a non-empty credential.
#[derive(Clone, PartialEq, Eq)]
pub enum CredentialKind {
    /// A `user:secret` pair.
    Basic {
        /// The user name before the first `:`.
        username: String,
        /// Everything after the first `:`.
        secret: String,
    },
    /// A bare registry token.
    Token(String),
}

impl Credentials {
    /// Wrap a raw credential string, dropping surrounding whitespace.
    #[must_use]
    pub fn new(raw: impl Into<String>) -> Self {
        let value: String = raw.into();
        Self(value.trim().to_owned())
    }

    /// Return true when no credential was configured.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Consume the credential and classify it.
    ///
    /// Returns `None` for an empty credential.
    #[must_use]
    pub fn into_kind(self) -> Option<CredentialKind> {
        if self.is_empty() {
            return None;
        }
        if let Some((username, secret)) = self.0.split_once(':') {
            return Some(CredentialKind::Basic {
                username: username.to_owned(),
                secret: secret.to_owned(),
            });
        }
        Some(CredentialKind::Token(self.0))
    }
}

impl From<&str> for Credentials {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Credentials {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            f.write_str("Credentials(<anonymous>)")
        } else {
            f.write_str("Credentials(<redacted>)")
        }
    }
}

impl fmt::Debug for CredentialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("secret", &"<redacted>")
                .finish(),
            Self::Token(_) => f.write_str("Token(<redacted>)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("")]
    #[case("   ")]
    fn blank_credentials_are_anonymous(#[case] raw: &str) {
        let creds = Credentials::new(raw);
        assert!(creds.is_empty());
        assert!(creds.into_kind().is_none());
    }

    #[test]
    fn user_secret_pair_is_basic() {
        let kind = Credentials::new("ci:pa:ss").into_kind().expect("non-empty");
        assert_eq!(
            kind,
            CredentialKind::Basic {
                username: "ci".to_owned(),
                secret: "pa:ss".to_owned(),
            }
        );
    }

    #[rstest]
    #[case::padded_pair(" ci:pw \n", "ci", "pw")]
    #[case::padded_via_from_string("\tci:pw", "ci", "pw")]
    fn surrounding_whitespace_is_dropped_once(
        #[case] raw: &str,
        #[case] username: &str,
        #[case] secret: &str,
    ) {
        let kind = Credentials::from(raw.to_owned())
            .into_kind()
            .expect("non-empty");
        assert_eq!(
            kind,
            CredentialKind::Basic {
                username: username.to_owned(),
                secret: secret.to_owned(),
            }
        );
    }

    #[test]
    fn padded_token_keeps_no_whitespace() {
        let kind = Credentials::new("  ghp_token\n").into_kind().expect("non-empty");
        assert_eq!(kind, CredentialKind::Token("ghp_token".to_owned()));
    }

    #[test]
    fn bare_value_is_token() {
        let kind = Credentials::new("ghp_token").into_kind().expect("non-empty");
        assert_eq!(kind, CredentialKind::Token("ghp_token".to_owned()));
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let creds = Credentials::new("ci:hunter2");
        assert!(!format!("{creds:?}").contains("hunter2"));
        let kind = creds.into_kind().expect("non-empty");
        let rendered = format!("{kind:?}");
        assert!(rendered.contains("ci"));
        assert!(!rendered.contains("hunter2"));
    }
}
