//! Core types for the bucket store: request identity and stored response snapshots.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

use crate::net::{Request, Response, ResponseType};
use crate::worker::WorkerState;

/// Identity of a cache entry: method plus URL, fragment excluded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestKey {
  method: String,
  url: String,
}

impl RequestKey {
  pub fn new(method: &Method, url: &Url) -> Self {
    let mut url = url.clone();
    url.set_fragment(None);
    Self {
      method: method.as_str().to_string(),
      url: url.into(),
    }
  }

  pub fn get(url: &Url) -> Self {
    Self::new(&Method::GET, url)
  }

  pub fn from_request(request: &Request) -> Self {
    Self::new(request.method(), request.url())
  }

  /// Rebuild a key from stored columns without renormalizing.
  pub(crate) fn from_stored(method: String, url: String) -> Self {
    Self { method, url }
  }

  pub fn method(&self) -> &str {
    &self.method
  }

  pub fn url(&self) -> &str {
    &self.url
  }

  pub fn is_get(&self) -> bool {
    self.method == Method::GET.as_str()
  }

  /// Stable, fixed-length storage key.
  pub fn cache_hash(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.method.as_bytes());
    hasher.update(b" ");
    hasher.update(self.url.as_bytes());
    hex::encode(hasher.finalize())
  }
}

/// A response snapshot as persisted inside a bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedResponse {
  pub url: String,
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
  pub response_type: ResponseType,
  pub redirected: bool,
  /// When the snapshot was taken. Informational only, entries never expire.
  pub cached_at: DateTime<Utc>,
}

impl CachedResponse {
  /// Take a snapshot, consuming the response.
  pub fn snapshot(response: Response) -> Self {
    let url = response.url().to_string();
    let status = response.status().as_u16();
    let headers = response
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_string(), v.to_string()))
      })
      .collect();
    let response_type = response.response_type();
    let redirected = response.redirected();

    Self {
      url,
      status,
      headers,
      body: response.into_body(),
      response_type,
      redirected,
      cached_at: Utc::now(),
    }
  }

  /// Replay the snapshot as a fresh response.
  pub fn into_response(self) -> Result<Response> {
    let url =
      Url::parse(&self.url).map_err(|e| eyre!("Failed to parse cached url {}: {}", self.url, e))?;
    let status = StatusCode::from_u16(self.status)
      .map_err(|e| eyre!("Invalid cached status {}: {}", self.status, e))?;

    let mut headers = HeaderMap::new();
    for (name, value) in &self.headers {
      let name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|e| eyre!("Invalid cached header name {}: {}", name, e))?;
      let value = HeaderValue::from_str(value)
        .map_err(|e| eyre!("Invalid cached header value for {}: {}", name, e))?;
      headers.append(name, value);
    }

    Ok(
      Response::new(url, status, self.body)
        .with_headers(headers)
        .with_type(self.response_type)
        .with_redirected(self.redirected),
    )
  }
}

/// Persisted lifecycle state of one version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
  pub version: String,
  pub state: WorkerState,
  pub updated_at: DateTime<Utc>,
}
