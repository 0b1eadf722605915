//! Parsing of `WWW-Authenticate` bearer challenges.
//!
//! Registries answer unauthenticated requests with a challenge such as
//! `Bearer realm="https://auth.example/token",service="registry.example"`.
//! The realm names the token endpoint; `service` and `scope` are passed back
//! to it as query parameters.

/// A parsed bearer challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BearerChallenge {
    /// Token endpoint URL.
    pub realm: String,
    /// Service name to request a token for.
    pub service: Option<String>,
    /// Scope suggested by the registry, if any.
    pub scope: Option<String>,
}

/// Parse a `WWW-Authenticate` header value into a bearer challenge.
///
/// Returns `None` for non-bearer schemes or challenges without a realm.
///
/// # Examples
///
/// ```
/// use modpull::registry::challenge::parse_bearer_challenge;
///
/// let challenge = parse_bearer_challenge(
///     r#"Bearer realm="https://auth.example/token",service="registry.example""#,
/// )
/// .expect("bearer challenge");
/// assert_eq!(challenge.realm, "https://auth.example/token");
/// assert_eq!(challenge.service.as_deref(), Some("registry.example"));
/// assert!(parse_bearer_challenge(r#"Basic realm="registry""#).is_none());
/// ```
#[must_use]
pub fn parse_bearer_challenge(header: &str) -> Option<BearerChallenge> {
    let (scheme, params) = header.trim().split_once(char::is_whitespace)?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }

    let mut realm = None;
    let mut service = None;
    let mut scope = None;
    for (key, value) in parse_params(params) {
        match key.to_ascii_lowercase().as_str() {
            "realm" => realm = Some(value),
            "service" => service = Some(value),
            "scope" => scope = Some(value),
            _ => {}
        }
    }

    realm.filter(|r| !r.is_empty()).map(|url| BearerChallenge {
        realm: url,
        service,
        scope,
    })
}

/// Split `key="value",key=value` pairs, honouring commas inside quotes.
fn parse_params(params: &str) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    let mut rest = params.trim_start();

    while !rest.is_empty() {
        let Some((raw_key, raw_value)) = rest.split_once('=') else {
            break;
        };
        let key = raw_key.trim().trim_start_matches(',').trim().to_owned();
        let after_key = raw_value.trim_start();

        let (value, remainder) = after_key.strip_prefix('"').map_or_else(
            || after_key.split_once(',').unwrap_or((after_key, "")),
            |quoted| quoted.split_once('"').unwrap_or((quoted, "")),
        );

        pairs.push((key, value.trim().to_owned()));
        rest = remainder.trim_start().trim_start_matches(',').trim_start();
    }

    pairs
}
