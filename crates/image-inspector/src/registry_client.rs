//! Client for OCI distribution registries

use crate::manifest::ACCEPTED_MEDIA_TYPES;
use crate::reference::ImageReference;
use async_trait::async_trait;
use leash_common::{Error, Result};
use regex::Regex;
use reqwest::header::{HeaderMap, ACCEPT, CONTENT_LENGTH, CONTENT_TYPE, WWW_AUTHENTICATE};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::LazyLock;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

const DIGEST_HEADER: &str = "docker-content-digest";

/// Largest manifest body accepted from a registry
pub const MAX_MANIFEST_BYTES: usize = 4 * 1024 * 1024;

static CHALLENGE_PARAM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(\w+)="([^"]*)""#).expect("challenge pattern is valid"));

/// Top-level descriptor of a resolved image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    pub reference: ImageReference,
    pub media_type: String,
    pub digest: Option<String>,
    pub size: Option<u64>,
}

impl Descriptor {
    /// Reference to fetch the manifest by, preferring the resolved digest
    pub fn manifest_reference(&self) -> &str {
        self.digest
            .as_deref()
            .unwrap_or_else(|| self.reference.reference())
    }
}

/// Registry access needed by the manifest check
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Resolve a reference to its top-level descriptor
    async fn resolve(&self, reference: &ImageReference) -> Result<Descriptor>;

    /// Fetch the raw manifest bytes a descriptor points at
    async fn fetch_manifest(&self, descriptor: &Descriptor) -> Result<Vec<u8>>;
}

/// Credentials presented to registries that ask for them
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryCredentials {
    pub username: String,
    pub password: String,
}

/// Token endpoint response; registries use either field name
#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
}

/// `WWW-Authenticate: Bearer realm=...,service=...,scope=...`
#[derive(Debug, Clone, PartialEq, Eq)]
struct BearerChallenge {
    realm: String,
    service: Option<String>,
    scope: Option<String>,
}

impl BearerChallenge {
    fn parse(header: &str) -> Option<Self> {
        let (scheme, params) = header.trim().split_once(' ')?;
        if !scheme.eq_ignore_ascii_case("bearer") {
            return None;
        }

        let params: HashMap<&str, &str> = CHALLENGE_PARAM
            .captures_iter(params)
            .filter_map(|c| Some((c.get(1)?.as_str(), c.get(2)?.as_str())))
            .collect();

        Some(Self {
            realm: params.get("realm")?.to_string(),
            service: params.get("service").map(|s| s.to_string()),
            scope: params.get("scope").map(|s| s.to_string()),
        })
    }
}

#[derive(Debug, Clone)]
enum Auth {
    Anonymous,
    Basic,
    Bearer(String),
}

/// Registry client speaking the distribution HTTP API
pub struct HttpRegistryClient {
    client: reqwest::Client,
    credentials: Option<RegistryCredentials>,
    /// Last accepted auth per `registry/repository`
    auth_cache: Mutex<HashMap<String, Auth>>,
}

fn cache_key(reference: &ImageReference) -> String {
    format!("{}/{}", reference.registry(), reference.repository())
}

impl HttpRegistryClient {
    /// Create a new registry client
    pub fn new(credentials: Option<RegistryCredentials>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("leash/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::RegistryUnavailable(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            credentials,
            auth_cache: Mutex::new(HashMap::new()),
        })
    }

    fn request(&self, method: Method, url: &str, auth: &Auth) -> RequestBuilder {
        let builder = self
            .client
            .request(method, url)
            .header(ACCEPT, ACCEPTED_MEDIA_TYPES.join(", "));

        match (auth, &self.credentials) {
            (Auth::Bearer(token), _) => builder.bearer_auth(token),
            (Auth::Basic, Some(creds)) => builder.basic_auth(&creds.username, Some(&creds.password)),
            _ => builder,
        }
    }

    /// Send a manifest request, answering one auth challenge if the registry asks
    ///
    /// Auth that got a request through is reused for the same repository, so
    /// a resolve followed by a fetch costs a single token round-trip.
    async fn send(&self, method: Method, reference: &ImageReference, url: &str) -> Result<Response> {
        debug!("{} {}", method, url);

        let key = cache_key(reference);
        let cached = self
            .auth_cache
            .lock()
            .await
            .get(&key)
            .cloned()
            .unwrap_or(Auth::Anonymous);

        let response = self
            .request(method.clone(), url, &cached)
            .send()
            .await
            .map_err(|e| fetch_error(url, e))?;

        let response = if response.status() == StatusCode::UNAUTHORIZED {
            let auth = self.authenticate(&response, reference).await?;
            let response = self
                .request(method, url, &auth)
                .send()
                .await
                .map_err(|e| fetch_error(url, e))?;
            if response.status().is_success() {
                self.auth_cache.lock().await.insert(key, auth);
            }
            response
        } else {
            response
        };

        check_status(url, response.status())?;
        Ok(response)
    }

    async fn authenticate(&self, response: &Response, reference: &ImageReference) -> Result<Auth> {
        let header = response
            .headers()
            .get(WWW_AUTHENTICATE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();

        if let Some(challenge) = BearerChallenge::parse(header) {
            let token = self.fetch_token(&challenge, reference).await?;
            return Ok(Auth::Bearer(token));
        }

        if self.credentials.is_some() {
            return Ok(Auth::Basic);
        }

        Err(Error::RegistryFetch(format!(
            "registry {} requires authentication",
            reference.registry()
        )))
    }

    async fn fetch_token(&self, challenge: &BearerChallenge, reference: &ImageReference) -> Result<String> {
        let scope = challenge
            .scope
            .clone()
            .unwrap_or_else(|| format!("repository:{}:pull", reference.repository()));

        let mut query = vec![("scope", scope)];
        if let Some(service) = &challenge.service {
            query.push(("service", service.clone()));
        }

        debug!("Requesting registry token from {}", challenge.realm);

        let mut request = self.client.get(&challenge.realm).query(&query);
        if let Some(creds) = &self.credentials {
            request = request.basic_auth(&creds.username, Some(&creds.password));
        }

        let response = request
            .send()
            .await
            .map_err(|e| fetch_error(&challenge.realm, e))?;

        check_status(&challenge.realm, response.status())?;

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| Error::RegistryUnavailable(format!("invalid token response: {}", e)))?;

        body.token
            .or(body.access_token)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::RegistryUnavailable("token response carried no token".to_string()))
    }
}

#[async_trait]
impl RegistryClient for HttpRegistryClient {
    async fn resolve(&self, reference: &ImageReference) -> Result<Descriptor> {
        let url = reference.manifest_url(reference.reference());
        let response = self.send(Method::HEAD, reference, &url).await?;
        let headers = response.headers();

        let media_type = header_str(headers, CONTENT_TYPE.as_str())
            .map(|ct| ct.split(';').next().unwrap_or(ct).trim().to_string())
            .unwrap_or_default();

        Ok(Descriptor {
            reference: reference.clone(),
            media_type,
            digest: header_str(headers, DIGEST_HEADER).map(str::to_string),
            size: header_str(headers, CONTENT_LENGTH.as_str()).and_then(|s| s.parse().ok()),
        })
    }

    async fn fetch_manifest(&self, descriptor: &Descriptor) -> Result<Vec<u8>> {
        let reference = &descriptor.reference;
        let url = reference.manifest_url(descriptor.manifest_reference());
        let mut response = self.send(Method::GET, reference, &url).await?;

        if let Some(length) = response.content_length() {
            if length > MAX_MANIFEST_BYTES as u64 {
                return Err(manifest_too_large(&url));
            }
        }

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(|e| fetch_error(&url, e))? {
            if body.len() + chunk.len() > MAX_MANIFEST_BYTES {
                return Err(manifest_too_large(&url));
            }
            body.extend_from_slice(&chunk);
        }

        Ok(body)
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Transport failures and timeouts: the registry was not reachable
fn fetch_error(url: &str, err: reqwest::Error) -> Error {
    Error::RegistryUnavailable(format!("request to {} failed: {}", url, err))
}

/// 5xx is the registry's fault, any other failure status is a refusal
fn check_status(url: &str, status: StatusCode) -> Result<()> {
    if status.is_success() {
        Ok(())
    } else if status.is_server_error() {
        Err(Error::RegistryUnavailable(format!("{} returned {}", url, status)))
    } else {
        Err(Error::RegistryFetch(format!("{} returned {}", url, status)))
    }
}

fn manifest_too_large(url: &str) -> Error {
    Error::RegistryFetch(format!(
        "manifest at {} exceeds {} bytes",
        url, MAX_MANIFEST_BYTES
    ))
}
