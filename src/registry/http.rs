//! HTTP registry transport using `ureq`.
//!
//! Implements the subset of the OCI distribution API the puller needs:
//! the `/v2/` login probe, manifest fetch by tag, and blob download by
//! digest. Bearer challenges are answered by exchanging the session's
//! credentials at the challenge realm; the resulting token is cached for
//! the lifetime of the transport.

use super::challenge::{BearerChallenge, parse_bearer_challenge};
use super::digest::Sha256Digest;
use super::manifest::MANIFEST_ACCEPT;
use super::{RegistryAuth, RegistryError, RegistryTransport};
use crate::deadline::{Deadline, DeadlineExceeded, DeadlineReader, is_deadline_error};
use crate::reference::ArtifactReference;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::Mutex;
use ureq::http::Response;
use ureq::{Agent, Body};

/// Size of the buffer used to stream blobs to disk.
const COPY_BUFFER_LEN: usize = 64 * 1024;

/// Header carrying authentication challenges on 401 responses.
const WWW_AUTHENTICATE: &str = "www-authenticate";

/// Body of a token endpoint response. Registries use either field name.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: Option<String>,
    access_token: Option<String>,
}

/// Registry transport speaking the OCI distribution HTTP API.
///
/// # Examples
///
/// ```
/// use modpull::reference::resolve;
/// use modpull::registry::http::HttpRegistry;
///
/// let transport = HttpRegistry::new(true);
/// let reference = resolve("oci://localhost:5000/app", "1.0.0").expect("valid reference");
/// assert_eq!(
///     transport.manifest_url(&reference),
///     "http://localhost:5000/v2/app/manifests/1.0.0",
/// );
/// ```
pub struct HttpRegistry {
    agent: Agent,
    scheme: &'static str,
    token: Mutex<Option<String>>,
}

impl HttpRegistry {
    /// Create a transport; `plain_http` selects `http://` instead of
    /// `https://`.
    #[must_use]
    pub fn new(plain_http: bool) -> Self {
        let config = Agent::config_builder()
            .http_status_as_error(false)
            .build();
        Self {
            agent: Agent::new_with_config(config),
            scheme: if plain_http { "http" } else { "https" },
            token: Mutex::new(None),
        }
    }

    /// URL of the registry's API version check endpoint.
    #[must_use]
    pub fn base_url(&self, reference: &ArtifactReference) -> String {
        format!("{}://{}/v2/", self.scheme, reference.registry())
    }

    /// URL of the manifest for `reference`'s tag.
    #[must_use]
    pub fn manifest_url(&self, reference: &ArtifactReference) -> String {
        format!(
            "{}://{}/v2/{}/manifests/{}",
            self.scheme,
            reference.registry(),
            reference.repository(),
            reference.tag()
        )
    }

    /// URL of blob `digest` in `reference`'s repository.
    #[must_use]
    pub fn blob_url(&self, reference: &ArtifactReference, digest: &Sha256Digest) -> String {
        format!(
            "{}://{}/v2/{}/blobs/{digest}",
            self.scheme,
            reference.registry(),
            reference.repository()
        )
    }

    fn cached_token(&self) -> Option<String> {
        self.token.lock().ok().and_then(|guard| guard.clone())
    }

    fn store_token(&self, token: String) {
        if let Ok(mut guard) = self.token.lock() {
            *guard = Some(token);
        }
    }

    fn authorization(&self, auth: &RegistryAuth) -> Option<String> {
        self.cached_token()
            .map(|token| format!("Bearer {token}"))
            .or_else(|| authorization_header(auth))
    }

    fn get(
        &self,
        url: &str,
        accept: Option<&str>,
        authorization: Option<&str>,
        deadline: Deadline,
    ) -> Result<Response<Body>, RegistryError> {
        let remaining = deadline.remaining()?;
        let mut request = self.agent.get(url);
        if let Some(media_types) = accept {
            request = request.header("Accept", media_types);
        }
        if let Some(value) = authorization {
            request = request.header("Authorization", value);
        }
        log::trace!("GET {url}");
        request
            .config()
            .timeout_global(Some(remaining))
            .build()
            .call()
            .map_err(|e| map_ureq_error(url, e, deadline))
    }

    /// Issue an authorized GET, answering one bearer challenge if the
    /// registry demands a token.
    fn get_authorized(
        &self,
        url: &str,
        accept: Option<&str>,
        reference: &ArtifactReference,
        auth: &RegistryAuth,
        deadline: Deadline,
    ) -> Result<Response<Body>, RegistryError> {
        let response = self.get(url, accept, self.authorization(auth).as_deref(), deadline)?;
        if response.status().as_u16() != 401 {
            return check_status(url, response);
        }
        let Some(challenge) = bearer_challenge(&response) else {
            return check_status(url, response);
        };
        let token = self.exchange_token(&challenge, reference, auth, deadline)?;
        let retried = self.get(url, accept, Some(&format!("Bearer {token}")), deadline)?;
        check_status(url, retried)
    }

    fn exchange_token(
        &self,
        challenge: &BearerChallenge,
        reference: &ArtifactReference,
        auth: &RegistryAuth,
        deadline: Deadline,
    ) -> Result<String, RegistryError> {
        if matches!(auth, RegistryAuth::Bearer(_)) {
            return Err(RegistryError::Unauthorized {
                url: challenge.realm.clone(),
                reason: "registry rejected the supplied bearer token".to_owned(),
            });
        }

        let remaining = deadline.remaining()?;
        let scope = format!("repository:{}:pull", reference.repository());
        let mut request = self
            .agent
            .get(&challenge.realm)
            .query("scope", &scope);
        if let Some(service) = &challenge.service {
            request = request.query("service", service);
        }
        if let Some(value) = authorization_header(auth) {
            request = request.header("Authorization", &value);
        }
        log::debug!("requesting registry token from {}", challenge.realm);
        let response = request
            .config()
            .timeout_global(Some(remaining))
            .build()
            .call()
            .map_err(|e| map_ureq_error(&challenge.realm, e, deadline))
            .and_then(|answer| check_status(&challenge.realm, answer))?;

        let body = response
            .into_body()
            .read_to_string()
            .map_err(|e| map_ureq_error(&challenge.realm, e, deadline))?;
        let token = parse_token(&body).ok_or_else(|| RegistryError::Http {
            url: challenge.realm.clone(),
            reason: "token response contained no token".to_owned(),
        })?;
        self.store_token(token.clone());
        Ok(token)
    }
}

impl RegistryTransport for HttpRegistry {
    fn login(
        &self,
        reference: &ArtifactReference,
        auth: &RegistryAuth,
        deadline: Deadline,
    ) -> Result<(), RegistryError> {
        let url = self.base_url(reference);
        self.get_authorized(&url, None, reference, auth, deadline)?;
        Ok(())
    }

    fn fetch_manifest(
        &self,
        reference: &ArtifactReference,
        auth: &RegistryAuth,
        deadline: Deadline,
    ) -> Result<Vec<u8>, RegistryError> {
        let url = self.manifest_url(reference);
        let response =
            self.get_authorized(&url, Some(MANIFEST_ACCEPT), reference, auth, deadline)?;
        response
            .into_body()
            .read_to_vec()
            .map_err(|e| map_ureq_error(&url, e, deadline))
    }

    fn fetch_blob(
        &self,
        reference: &ArtifactReference,
        digest: &Sha256Digest,
        auth: &RegistryAuth,
        dest: &Path,
        deadline: Deadline,
    ) -> Result<(), RegistryError> {
        let url = self.blob_url(reference, digest);
        let response = self.get_authorized(&url, None, reference, auth, deadline)?;
        let mut reader = DeadlineReader::new(response.into_body().into_reader(), deadline);
        let mut file = std::fs::File::create(dest)?;
        copy_body(&mut reader, &mut file, &url, deadline)
    }
}

/// Stream a response body into `sink`.
///
/// Read failures belong to the transfer and may be deadline expiries.
/// Write failures are local and surface as [`RegistryError::Io`].
fn copy_body(
    source: &mut impl Read,
    sink: &mut impl Write,
    url: &str,
    deadline: Deadline,
) -> Result<(), RegistryError> {
    let mut buf = vec![0_u8; COPY_BUFFER_LEN];
    loop {
        let read = match source.read(&mut buf) {
            Ok(0) => return Ok(()),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(map_io_error(url, &e, deadline)),
        };
        let Some(chunk) = buf.get(..read) else {
            return Err(RegistryError::Http {
                url: url.to_owned(),
                reason: format!("body reader returned {read} bytes for a smaller buffer"),
            });
        };
        sink.write_all(chunk)?;
    }
}

fn authorization_header(auth: &RegistryAuth) -> Option<String> {
    match auth {
        RegistryAuth::Anonymous => None,
        RegistryAuth::Basic { username, secret } => Some(format!(
            "Basic {}",
            STANDARD.encode(format!("{username}:{secret}"))
        )),
        RegistryAuth::Bearer(token) => Some(format!("Bearer {token}")),
    }
}

fn bearer_challenge(response: &Response<Body>) -> Option<BearerChallenge> {
    response
        .headers()
        .get(WWW_AUTHENTICATE)
        .and_then(|value| value.to_str().ok())
        .and_then(parse_bearer_challenge)
}

fn parse_token(body: &str) -> Option<String> {
    let parsed: TokenResponse = serde_json::from_str(body).ok()?;
    parsed
        .token
        .or(parsed.access_token)
        .filter(|token| !token.is_empty())
}

/// Map a response status to success or a [`RegistryError`].
fn check_status(url: &str, response: Response<Body>) -> Result<Response<Body>, RegistryError> {
    match response.status().as_u16() {
        200..=299 => Ok(response),
        status => Err(status_error(url, status)),
    }
}

fn status_error(url: &str, status: u16) -> RegistryError {
    match status {
        401 | 403 => RegistryError::Unauthorized {
            url: url.to_owned(),
            reason: format!("HTTP {status}"),
        },
        404 => RegistryError::NotFound {
            url: url.to_owned(),
        },
        other => RegistryError::Http {
            url: url.to_owned(),
            reason: format!("HTTP {other}"),
        },
    }
}

/// Map a ureq error to a [`RegistryError`].
fn map_ureq_error(url: &str, err: ureq::Error, deadline: Deadline) -> RegistryError {
    match err {
        ureq::Error::Timeout(_) => RegistryError::Timeout(DeadlineExceeded {
            limit: deadline.limit(),
        }),
        ureq::Error::StatusCode(status) => status_error(url, status),
        ureq::Error::Io(e) => map_io_error(url, &e, deadline),
        other => RegistryError::Http {
            url: url.to_owned(),
            reason: other.to_string(),
        },
    }
}

fn map_io_error(url: &str, err: &io::Error, deadline: Deadline) -> RegistryError {
    if is_deadline_error(err) || err.kind() == io::ErrorKind::TimedOut {
        RegistryError::Timeout(DeadlineExceeded {
            limit: deadline.limit(),
        })
    } else {
        RegistryError::Http {
            url: url.to_owned(),
            reason: err.to_string(),
        }
    }
}
