//! Network surface: single-use request/response values and the fetcher seam.

mod client;
mod types;

pub use client::ReqwestFetcher;
pub use types::{Request, Response, ResponseType};

use async_trait::async_trait;
use color_eyre::Result;

/// Issues a request over the network.
///
/// An `Err` means the request never produced a response (connection refused,
/// DNS failure, ...). HTTP error statuses are still `Ok`.
#[async_trait]
pub trait Fetcher: Send + Sync {
  async fn fetch(&self, request: Request) -> Result<Response>;
}
