//! Client contexts controlled by a cache version.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Host surface for taking control of open clients.
#[async_trait]
pub trait Clients: Send + Sync {
  /// Make `version` the controller of every open client. Returns how many
  /// clients changed controller.
  async fn claim(&self, version: &str) -> Result<usize>;

  /// Ask to activate as soon as install finishes instead of waiting for
  /// clients of the previous version to go away.
  async fn skip_waiting(&self) -> Result<()>;

  fn skip_waiting_requested(&self) -> bool;

  /// Number of open clients controlled by some version other than `version`.
  async fn controlled_by_other(&self, version: &str) -> Result<usize>;
}

/// An open client context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Client {
  pub id: String,
  /// Version currently controlling this client
  pub controller: Option<String>,
}

/// In-process registry of open clients.
#[derive(Default)]
pub struct ClientRegistry {
  clients: Mutex<Vec<Client>>,
  skip_waiting: AtomicBool,
}

impl ClientRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register an open client.
  pub fn connect(&self, id: &str, controller: Option<&str>) -> Result<()> {
    let mut clients = self
      .clients
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    clients.retain(|c| c.id != id);
    clients.push(Client {
      id: id.to_string(),
      controller: controller.map(String::from),
    });
    Ok(())
  }

  /// Forget a client that has closed.
  #[allow(dead_code)]
  pub fn release(&self, id: &str) -> Result<()> {
    let mut clients = self
      .clients
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    clients.retain(|c| c.id != id);
    Ok(())
  }

  #[allow(dead_code)]
  pub fn clients(&self) -> Result<Vec<Client>> {
    let clients = self
      .clients
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(clients.clone())
  }
}

#[async_trait]
impl Clients for ClientRegistry {
  async fn claim(&self, version: &str) -> Result<usize> {
    let mut clients = self
      .clients
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut claimed = 0;
    for client in clients.iter_mut() {
      if client.controller.as_deref() != Some(version) {
        client.controller = Some(version.to_string());
        claimed += 1;
      }
    }
    Ok(claimed)
  }

  async fn skip_waiting(&self) -> Result<()> {
    self.skip_waiting.store(true, Ordering::SeqCst);
    Ok(())
  }

  fn skip_waiting_requested(&self) -> bool {
    self.skip_waiting.load(Ordering::SeqCst)
  }

  async fn controlled_by_other(&self, version: &str) -> Result<usize> {
    let clients = self
      .clients
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    Ok(
      clients
        .iter()
        .filter(|c| matches!(c.controller.as_deref(), Some(v) if v != version))
        .count(),
    )
  }
}
