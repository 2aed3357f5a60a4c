//! Request and response values.
//!
//! Neither type implements `Clone`. A path that needs to both forward a value
//! and keep a copy (fetching a request it still has to key on, storing a
//! response it still has to return) calls `duplicate()` explicitly.

use reqwest::header::HeaderMap;
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use url::Url;

/// How a response relates to the origin that requested it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
  /// Same-origin response, safe to persist and replay
  Basic,
  /// Cross-origin response readable through CORS
  Cors,
  /// Cross-origin response with hidden status and body
  Opaque,
  /// Redirect that was not followed
  OpaqueRedirect,
  /// Synthetic network error
  Error,
}

impl ResponseType {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Basic => "basic",
      Self::Cors => "cors",
      Self::Opaque => "opaque",
      Self::OpaqueRedirect => "opaqueredirect",
      Self::Error => "error",
    }
  }

  pub fn parse(s: &str) -> Option<Self> {
    match s {
      "basic" => Some(Self::Basic),
      "cors" => Some(Self::Cors),
      "opaque" => Some(Self::Opaque),
      "opaqueredirect" => Some(Self::OpaqueRedirect),
      "error" => Some(Self::Error),
      _ => None,
    }
  }
}

/// An outgoing request.
#[derive(Debug)]
pub struct Request {
  method: Method,
  url: Url,
  headers: HeaderMap,
  body: Option<Vec<u8>>,
}

impl Request {
  pub fn new(method: Method, url: Url) -> Self {
    Self {
      method,
      url,
      headers: HeaderMap::new(),
      body: None,
    }
  }

  pub fn get(url: Url) -> Self {
    Self::new(Method::GET, url)
  }

  #[allow(dead_code)]
  pub fn with_body(mut self, body: Vec<u8>) -> Self {
    self.body = Some(body);
    self
  }

  pub fn method(&self) -> &Method {
    &self.method
  }

  pub fn url(&self) -> &Url {
    &self.url
  }

  /// A second, independently consumable copy of this request.
  pub fn duplicate(&self) -> Self {
    Self {
      method: self.method.clone(),
      url: self.url.clone(),
      headers: self.headers.clone(),
      body: self.body.clone(),
    }
  }

  /// Consume the request for sending.
  pub fn into_parts(self) -> (Method, Url, HeaderMap, Option<Vec<u8>>) {
    (self.method, self.url, self.headers, self.body)
  }
}

/// A response, either fresh from the network or replayed from a bucket.
#[derive(Debug)]
pub struct Response {
  url: Url,
  status: StatusCode,
  headers: HeaderMap,
  body: Vec<u8>,
  response_type: ResponseType,
  redirected: bool,
}

impl Response {
  /// A same-origin, non-redirected response.
  pub fn new(url: Url, status: StatusCode, body: Vec<u8>) -> Self {
    Self {
      url,
      status,
      headers: HeaderMap::new(),
      body,
      response_type: ResponseType::Basic,
      redirected: false,
    }
  }

  pub fn with_headers(mut self, headers: HeaderMap) -> Self {
    self.headers = headers;
    self
  }

  pub fn with_type(mut self, response_type: ResponseType) -> Self {
    self.response_type = response_type;
    self
  }

  pub fn with_redirected(mut self, redirected: bool) -> Self {
    self.redirected = redirected;
    self
  }

  pub fn url(&self) -> &Url {
    &self.url
  }

  pub fn status(&self) -> StatusCode {
    self.status
  }

  pub fn headers(&self) -> &HeaderMap {
    &self.headers
  }

  pub fn body(&self) -> &[u8] {
    &self.body
  }

  pub fn response_type(&self) -> ResponseType {
    self.response_type
  }

  pub fn redirected(&self) -> bool {
    self.redirected
  }

  /// Status in the 200-299 range.
  pub fn ok(&self) -> bool {
    self.status.is_success()
  }

  /// A second, independently consumable copy of this response.
  pub fn duplicate(&self) -> Self {
    Self {
      url: self.url.clone(),
      status: self.status,
      headers: self.headers.clone(),
      body: self.body.clone(),
      response_type: self.response_type,
      redirected: self.redirected,
    }
  }

  /// Consume the response, yielding its body.
  pub fn into_body(self) -> Vec<u8> {
    self.body
  }
}
