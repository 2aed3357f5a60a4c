//! Test doubles shared across modules.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::StatusCode;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use url::Url;

use crate::net::{Fetcher, Request, Response, ResponseType};

pub const ORIGIN: &str = "http://localhost:8080/";

pub fn url(path: &str) -> Url {
  Url::parse(ORIGIN).unwrap().join(path).unwrap()
}

struct Route {
  status: StatusCode,
  body: Vec<u8>,
  response_type: ResponseType,
  redirected: bool,
}

/// Fetcher that answers from a fixed route table and records every call.
/// Unknown URLs get a 404; `set_offline(true)` makes every fetch fail.
#[derive(Default)]
pub struct ScriptedFetcher {
  routes: Mutex<HashMap<String, Route>>,
  calls: Mutex<Vec<String>>,
  offline: AtomicBool,
}

impl ScriptedFetcher {
  pub fn new() -> Self {
    Self::default()
  }

  /// Serve a same-origin 200 for `path`.
  pub fn ok(self, path: &str, body: &[u8]) -> Self {
    self.route(path, StatusCode::OK, body, ResponseType::Basic, false)
  }

  pub fn route(
    self,
    path: &str,
    status: StatusCode,
    body: &[u8],
    response_type: ResponseType,
    redirected: bool,
  ) -> Self {
    self.routes.lock().unwrap().insert(
      url(path).to_string(),
      Route {
        status,
        body: body.to_vec(),
        response_type,
        redirected,
      },
    );
    self
  }

  /// Serve a 200 for an absolute URL outside the app origin.
  pub fn ok_absolute(self, absolute: &str, body: &[u8]) -> Self {
    self.routes.lock().unwrap().insert(
      Url::parse(absolute).unwrap().to_string(),
      Route {
        status: StatusCode::OK,
        body: body.to_vec(),
        response_type: ResponseType::Basic,
        redirected: false,
      },
    );
    self
  }

  pub fn set_offline(&self, offline: bool) {
    self.offline.store(offline, Ordering::SeqCst);
  }

  pub fn calls(&self) -> usize {
    self.calls.lock().unwrap().len()
  }

  pub fn calls_for(&self, path: &str) -> usize {
    let target = url(path).to_string();
    self
      .calls
      .lock()
      .unwrap()
      .iter()
      .filter(|c| **c == target)
      .count()
  }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
  async fn fetch(&self, request: Request) -> Result<Response> {
    let (_, url, _, _) = request.into_parts();
    self.calls.lock().unwrap().push(url.to_string());

    if self.offline.load(Ordering::SeqCst) {
      return Err(eyre!("Failed to fetch {}: network unreachable", url));
    }

    let routes = self.routes.lock().unwrap();
    match routes.get(url.as_str()) {
      Some(route) => Ok(
        Response::new(url, route.status, route.body.clone())
          .with_type(route.response_type)
          .with_redirected(route.redirected),
      ),
      None => Ok(Response::new(url, StatusCode::NOT_FOUND, b"not found".to_vec())),
    }
  }
}
