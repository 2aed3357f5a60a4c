//! Which network results may be persisted.
//!
//! - [`classify`] - disposition of a fetch outcome
//! - [`is_storable_request`] - request-side gate (scheme and method)

use color_eyre::Result;
use reqwest::{Method, StatusCode};
use url::Url;

use crate::net::{Request, Response, ResponseType};

/// Outcome of checking a fetch result for cacheability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
  /// Store a copy, then return the response
  Cacheable,
  /// Return the response without storing it
  PassThrough,
  /// The fetch failed; propagate the error
  Error,
}

/// Classify a fetch outcome.
pub fn classify(outcome: &Result<Response>) -> Disposition {
  match outcome {
    Ok(response) => classify_response(response),
    Err(_) => Disposition::Error,
  }
}

/// Only a plain 200, same-origin, non-redirected response is cacheable.
pub fn classify_response(response: &Response) -> Disposition {
  if response.status() == StatusCode::OK
    && response.response_type() == ResponseType::Basic
    && !response.redirected()
  {
    Disposition::Cacheable
  } else {
    Disposition::PassThrough
  }
}

/// Only http and https URLs can be written to a bucket.
pub fn is_storable_scheme(url: &Url) -> bool {
  matches!(url.scheme(), "http" | "https")
}

/// GET requests over a network scheme.
pub fn is_storable_request(request: &Request) -> bool {
  *request.method() == Method::GET && is_storable_scheme(request.url())
}

#[cfg(test)]
mod tests {
  use super::*;
  use color_eyre::eyre::eyre;

  fn response(status: StatusCode) -> Response {
    Response::new(
      Url::parse("http://localhost/game.wasm").unwrap(),
      status,
      Vec::new(),
    )
  }

  #[test]
  fn test_plain_ok_is_cacheable() {
    assert_eq!(classify(&Ok(response(StatusCode::OK))), Disposition::Cacheable);
  }

  #[test]
  fn test_non_200_passes_through() {
    for status in [
      StatusCode::NO_CONTENT,
      StatusCode::PARTIAL_CONTENT,
      StatusCode::NOT_MODIFIED,
      StatusCode::NOT_FOUND,
      StatusCode::INTERNAL_SERVER_ERROR,
    ] {
      assert_eq!(classify_response(&response(status)), Disposition::PassThrough);
    }
  }

  #[test]
  fn test_redirected_passes_through() {
    let redirected = response(StatusCode::OK).with_redirected(true);
    assert_eq!(classify_response(&redirected), Disposition::PassThrough);
  }

  #[test]
  fn test_cross_origin_passes_through() {
    for ty in [ResponseType::Cors, ResponseType::Opaque, ResponseType::OpaqueRedirect] {
      let r = response(StatusCode::OK).with_type(ty);
      assert_eq!(classify_response(&r), Disposition::PassThrough);
    }
  }

  #[test]
  fn test_fetch_error() {
    assert_eq!(classify(&Err(eyre!("connection refused"))), Disposition::Error);
  }

  #[test]
  fn test_scheme_gate() {
    assert!(is_storable_scheme(&Url::parse("http://localhost/").unwrap()));
    assert!(is_storable_scheme(&Url::parse("https://example.com/").unwrap()));
    assert!(!is_storable_scheme(
      &Url::parse("chrome-extension://abcdef/script.js").unwrap()
    ));
    assert!(!is_storable_scheme(&Url::parse("data:text/plain,hi").unwrap()));
  }

  #[test]
  fn test_request_gate_requires_get() {
    let url = Url::parse("http://localhost/score").unwrap();
    assert!(is_storable_request(&Request::get(url.clone())));
    assert!(!is_storable_request(&Request::new(Method::POST, url)));
  }
}
