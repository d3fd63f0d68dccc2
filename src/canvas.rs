//! Canvas REST API client.
//!
//! Wraps `reqwest` with the three behaviors every importer relies on:
//!
//! - **Credential fallback.** Canvas accepts its session cookie under more
//!   than one name depending on deployment. Each request walks the configured
//!   [`AuthVariant`] list in order and keeps the first response that is not a
//!   401/403. The winning variant is remembered and tried first next time.
//! - **Pagination.** List endpoints return a JSON array per page and a
//!   `Link: <...>; rel="next"` header. [`CanvasClient::paged_fetch`] follows
//!   those links strictly in order, stopping at `canvas.max_pages`.
//! - **Status translation.** 401/403 means "no data" unless `strict_auth` is
//!   set. A 404 whose body says the feature is disabled for the course is an
//!   empty result. Anything else outside 2xx is a [`FetchError::Http`].
//!
//! Canvas prefixes cookie-authenticated JSON with `while(1);`; the prefix is
//! stripped before parsing.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use reqwest::header::{HeaderMap, ACCEPT, AUTHORIZATION, COOKIE, LINK};
use reqwest::{RequestBuilder, Response, StatusCode, Url};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::CanvasConfig;
use crate::error::FetchError;

/// Maximum characters of an error body kept for diagnostics.
const ERROR_BODY_LIMIT: usize = 500;

const JSON_HIJACK_PREFIX: &str = "while(1);";

/// One way of presenting the stored credential to Canvas.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthVariant {
    /// `Cookie: <name>=<credential>`
    Cookie(String),
    /// `Authorization: Bearer <credential>`
    Bearer,
}

impl AuthVariant {
    /// Parse `cookie:<name>` or `bearer`.
    pub fn parse(spec: &str) -> Result<Self, String> {
        let spec = spec.trim();
        if spec.eq_ignore_ascii_case("bearer") {
            return Ok(AuthVariant::Bearer);
        }
        match spec.split_once(':') {
            Some((kind, name)) if kind.eq_ignore_ascii_case("cookie") && !name.trim().is_empty() => {
                Ok(AuthVariant::Cookie(name.trim().to_string()))
            }
            _ => Err(format!(
                "expected 'cookie:<name>' or 'bearer', got '{}'",
                spec
            )),
        }
    }

    fn apply(&self, req: RequestBuilder, credential: &str) -> RequestBuilder {
        match self {
            AuthVariant::Cookie(name) => req.header(COOKIE, format!("{}={}", name, credential)),
            AuthVariant::Bearer => req.header(AUTHORIZATION, format!("Bearer {}", credential)),
        }
    }

    fn label(&self) -> String {
        match self {
            AuthVariant::Cookie(name) => format!("cookie:{}", name),
            AuthVariant::Bearer => "bearer".to_string(),
        }
    }
}

/// Client bound to one Canvas base URL and one stored credential.
pub struct CanvasClient {
    http: reqwest::Client,
    base: Url,
    credential: String,
    variants: Vec<AuthVariant>,
    preferred: AtomicUsize,
    max_pages: usize,
    per_page: u32,
    strict_auth: bool,
}

impl CanvasClient {
    pub fn new(base_url: &str, credential: &str, config: &CanvasConfig) -> Result<Self, FetchError> {
        let base = Url::parse(base_url.trim_end_matches('/'))
            .map_err(|e| FetchError::InvalidUrl(format!("{}: {}", base_url, e)))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(FetchError::InvalidUrl(format!(
                "{}: unsupported scheme",
                base_url
            )));
        }

        let variants = config
            .auth_variants
            .iter()
            .map(|v| AuthVariant::parse(v))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| FetchError::InvalidConfig(format!("canvas.auth_variants: {}", e)))?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()?;

        Ok(Self {
            http,
            base,
            credential: credential.to_string(),
            variants,
            preferred: AtomicUsize::new(0),
            max_pages: config.max_pages.max(1),
            per_page: config.per_page,
            strict_auth: config.strict_auth,
        })
    }

    pub fn base_url(&self) -> &str {
        self.base.as_str().trim_end_matches('/')
    }

    /// Require that a rejected credential fails the call instead of
    /// yielding an empty result.
    pub fn with_strict_auth(mut self, strict: bool) -> Self {
        self.strict_auth = strict;
        self
    }

    /// Fetch every record of a list endpoint, following `rel="next"` links.
    ///
    /// Returns what was accumulated so far when the page cap is reached or
    /// when Canvas stops accepting the credential mid-listing (non-strict).
    pub async fn paged_fetch(&self, path: &str) -> Result<Vec<Value>, FetchError> {
        let mut next = Some(self.paged_url(path)?);
        let mut items = Vec::new();
        let mut pages = 0usize;

        while let Some(url) = next.take() {
            if pages >= self.max_pages {
                warn!(
                    path,
                    max_pages = self.max_pages,
                    records = items.len(),
                    "pagination cap reached; returning partial listing"
                );
                break;
            }
            pages += 1;

            let resp = match self.send_authenticated(&url).await? {
                Some(resp) => resp,
                None if self.strict_auth => {
                    return Err(FetchError::AuthFailure {
                        path: path.to_string(),
                    })
                }
                None => {
                    debug!(path, page = pages, "credential rejected; treating as no data");
                    break;
                }
            };

            let status = resp.status();
            let link = next_link(resp.headers());

            if status == StatusCode::NO_CONTENT {
                break;
            }
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                if status == StatusCode::NOT_FOUND && is_feature_disabled(&body) {
                    debug!(path, "feature disabled for this course");
                    break;
                }
                return Err(http_error(status, &body));
            }

            let text = resp.text().await?;
            match parse_json(path, &text)? {
                Value::Array(batch) => {
                    debug!(path, page = pages, count = batch.len(), "fetched page");
                    items.extend(batch);
                }
                _ => {
                    return Err(FetchError::Decode {
                        path: path.to_string(),
                        message: "expected a JSON array".to_string(),
                    })
                }
            }

            next = match link {
                Some(href) => match self.same_origin(&href) {
                    Some(url) => Some(url),
                    None => {
                        warn!(path, next = %href, "ignoring next link to a foreign origin");
                        None
                    }
                },
                None => None,
            };
        }

        Ok(items)
    }

    /// Fetch a single record. `None` means Canvas reported no data for it
    /// (credential rejected in non-strict mode, or feature disabled).
    pub async fn single_fetch(&self, path: &str) -> Result<Option<Value>, FetchError> {
        let url = self.resolve(path)?;
        let resp = match self.send_authenticated(&url).await? {
            Some(resp) => resp,
            None if self.strict_auth => {
                return Err(FetchError::AuthFailure {
                    path: path.to_string(),
                })
            }
            None => return Ok(None),
        };

        let status = resp.status();
        if status == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            if status == StatusCode::NOT_FOUND && is_feature_disabled(&body) {
                return Ok(None);
            }
            return Err(http_error(status, &body));
        }

        let text = resp.text().await?;
        let value = parse_json(path, &text)?;
        Ok(if value.is_null() { None } else { Some(value) })
    }

    /// Download a file body, refusing anything over `max_bytes`.
    ///
    /// Pre-signed URLs carry their own authorization, so no credential is
    /// attached unless the URL points back at the Canvas host.
    pub async fn download(&self, url: &str, max_bytes: u64) -> Result<Vec<u8>, FetchError> {
        let target = Url::parse(url).map_err(|e| FetchError::InvalidUrl(format!("{}: {}", url, e)))?;

        let mut resp = if self.same_origin(url).is_some() {
            match self.send_authenticated(&target).await? {
                Some(resp) => resp,
                None => {
                    return Err(FetchError::AuthFailure {
                        path: target.path().to_string(),
                    })
                }
            }
        } else {
            self.http.get(target.clone()).send().await?
        };

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(http_error(status, &body));
        }
        if let Some(len) = resp.content_length() {
            if len > max_bytes {
                return Err(too_large(len, max_bytes));
            }
        }

        let mut out = Vec::new();
        while let Some(chunk) = resp.chunk().await? {
            out.extend_from_slice(&chunk);
            if out.len() as u64 > max_bytes {
                return Err(too_large(out.len() as u64, max_bytes));
            }
        }
        Ok(out)
    }

    /// Send a GET, walking the credential variants until one is accepted.
    /// `Ok(None)` means every variant was rejected with 401/403.
    async fn send_authenticated(&self, url: &Url) -> Result<Option<Response>, FetchError> {
        let start = self.preferred.load(Ordering::Relaxed);
        let count = self.variants.len();

        for offset in 0..count {
            let idx = (start + offset) % count;
            let variant = &self.variants[idx];
            let req = variant.apply(
                self.http.get(url.clone()).header(ACCEPT, "application/json"),
                &self.credential,
            );
            let resp = req.send().await?;
            let status = resp.status();
            if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                debug!(variant = %variant.label(), status = status.as_u16(), "credential variant rejected");
                continue;
            }
            if idx != start {
                self.preferred.store(idx, Ordering::Relaxed);
            }
            return Ok(Some(resp));
        }

        Ok(None)
    }

    fn resolve(&self, path: &str) -> Result<Url, FetchError> {
        if path.starts_with("http://") || path.starts_with("https://") {
            return self
                .same_origin(path)
                .ok_or_else(|| FetchError::InvalidUrl(format!("{}: not on {}", path, self.base)));
        }
        if !path.starts_with('/') {
            return Err(FetchError::InvalidUrl(format!(
                "{}: API paths must start with '/'",
                path
            )));
        }
        let joined = format!("{}{}", self.base_url(), path);
        Url::parse(&joined).map_err(|e| FetchError::InvalidUrl(format!("{}: {}", joined, e)))
    }

    fn paged_url(&self, path: &str) -> Result<Url, FetchError> {
        let mut url = self.resolve(path)?;
        if !url.query_pairs().any(|(k, _)| k == "per_page") {
            url.query_pairs_mut()
                .append_pair("per_page", &self.per_page.to_string());
        }
        Ok(url)
    }

    fn same_origin(&self, href: &str) -> Option<Url> {
        let url = Url::parse(href).ok()?;
        if url.scheme() == self.base.scheme()
            && url.host_str() == self.base.host_str()
            && url.port_or_known_default() == self.base.port_or_known_default()
        {
            Some(url)
        } else {
            None
        }
    }
}

/// Extract the `rel="next"` target from one or more `Link` headers.
pub fn next_link(headers: &HeaderMap) -> Option<String> {
    for value in headers.get_all(LINK) {
        let Ok(value) = value.to_str() else {
            continue;
        };
        for entry in value.split(',') {
            let entry = entry.trim();
            let (Some(open), Some(close)) = (entry.find('<'), entry.find('>')) else {
                continue;
            };
            if close <= open {
                continue;
            }
            let is_next = entry[close + 1..].split(';').any(|param| {
                let param = param.trim();
                match param.split_once('=') {
                    Some((key, val)) => {
                        key.trim().eq_ignore_ascii_case("rel")
                            && val
                                .trim()
                                .trim_matches('"')
                                .split_whitespace()
                                .any(|rel| rel.eq_ignore_ascii_case("next"))
                    }
                    None => false,
                }
            });
            if is_next {
                return Some(entry[open + 1..close].to_string());
            }
        }
    }
    None
}

/// Canvas answers 404 with this wording when a tool is switched off.
pub fn is_feature_disabled(body: &str) -> bool {
    body.to_ascii_lowercase().contains("disabled for this course")
}

fn parse_json(path: &str, text: &str) -> Result<Value, FetchError> {
    let text = text.trim_start();
    let text = text.strip_prefix(JSON_HIJACK_PREFIX).unwrap_or(text);
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(text).map_err(|e| FetchError::Decode {
        path: path.to_string(),
        message: e.to_string(),
    })
}

fn http_error(status: StatusCode, body: &str) -> FetchError {
    FetchError::Http {
        status: status.as_u16(),
        body: body.chars().take(ERROR_BODY_LIMIT).collect(),
    }
}

fn too_large(len: u64, max: u64) -> FetchError {
    FetchError::Http {
        status: StatusCode::PAYLOAD_TOO_LARGE.as_u16(),
        body: format!("download of {} bytes exceeds limit of {} bytes", len, max),
    }
}
