use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use url::Url;

use super::types::{Request, Response, ResponseType};
use super::Fetcher;

/// Live network fetcher backed by reqwest.
#[derive(Clone)]
pub struct ReqwestFetcher {
  client: reqwest::Client,
  /// Origin the cached application is served from
  origin: Url,
}

impl ReqwestFetcher {
  pub fn new(origin: Url) -> Result<Self> {
    let client = reqwest::Client::builder()
      .user_agent(concat!("swcache/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client, origin })
  }
}

#[async_trait]
impl Fetcher for ReqwestFetcher {
  async fn fetch(&self, request: Request) -> Result<Response> {
    let (method, url, headers, body) = request.into_parts();

    let mut builder = self.client.request(method, url.clone()).headers(headers);
    if let Some(body) = body {
      builder = builder.body(body);
    }

    let response = builder
      .send()
      .await
      .map_err(|e| eyre!("Failed to fetch {}: {}", url, e))?;

    let final_url = response.url().clone();
    let status = response.status();
    let headers = response.headers().clone();
    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read body of {}: {}", final_url, e))?
      .to_vec();

    Ok(
      Response::new(final_url.clone(), status, body)
        .with_headers(headers)
        .with_type(response_type_for(&self.origin, &final_url))
        .with_redirected(!same_resource(&url, &final_url)),
    )
  }
}

/// Same origin as the app is `Basic`; anything else is treated as opaque,
/// since no CORS negotiation takes place here.
fn response_type_for(origin: &Url, url: &Url) -> ResponseType {
  if origin.origin() == url.origin() {
    ResponseType::Basic
  } else {
    ResponseType::Opaque
  }
}

/// Compare two URLs ignoring their fragments.
fn same_resource(a: &Url, b: &Url) -> bool {
  let mut a = a.clone();
  let mut b = b.clone();
  a.set_fragment(None);
  b.set_fragment(None);
  a == b
}

#[cfg(test)]
mod tests {
  use super::*;

  fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
  }

  #[test]
  fn test_same_origin_is_basic() {
    let origin = url("http://localhost:8080/");
    assert_eq!(
      response_type_for(&origin, &url("http://localhost:8080/assets/icon-192.png")),
      ResponseType::Basic
    );
  }

  #[test]
  fn test_other_port_or_host_is_opaque() {
    let origin = url("http://localhost:8080/");
    assert_eq!(
      response_type_for(&origin, &url("http://localhost:9090/x.js")),
      ResponseType::Opaque
    );
    assert_eq!(
      response_type_for(&origin, &url("https://cdn.example.com/x.js")),
      ResponseType::Opaque
    );
  }

  #[test]
  fn test_fragment_does_not_count_as_redirect() {
    assert!(same_resource(
      &url("http://localhost/index.html#top"),
      &url("http://localhost/index.html")
    ));
    assert!(!same_resource(
      &url("http://localhost/old"),
      &url("http://localhost/new")
    ));
  }
}
