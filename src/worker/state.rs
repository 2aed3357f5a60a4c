use color_eyre::{eyre::eyre, Report, Result};
use std::fmt;
use std::str::FromStr;

/// Lifecycle state of one cache version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
  /// Known but not yet installed
  Parsed,
  /// Pre-populating the bucket
  Installing,
  /// Bucket populated, waiting to take over
  Installed,
  /// Sweeping old buckets and claiming clients
  Activating,
  /// Serving intercepted requests
  Activated,
  /// Failed to install, or superseded by a newer version
  Redundant,
}

impl WorkerState {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Parsed => "parsed",
      Self::Installing => "installing",
      Self::Installed => "installed",
      Self::Activating => "activating",
      Self::Activated => "activated",
      Self::Redundant => "redundant",
    }
  }

  /// Whether moving from `self` to `next` is a legal lifecycle step.
  pub fn can_transition_to(&self, next: WorkerState) -> bool {
    use WorkerState::*;
    matches!(
      (self, next),
      (Parsed, Installing)
        | (Redundant, Installing)
        | (Installing, Installed)
        | (Installing, Redundant)
        | (Installed, Activating)
        | (Installed, Redundant)
        | (Activating, Activated)
        | (Activating, Redundant)
        | (Activated, Redundant)
    )
  }

  /// Check and perform a transition.
  pub fn advance(&mut self, next: WorkerState) -> Result<()> {
    if !self.can_transition_to(next) {
      return Err(eyre!("Cannot move from {} to {}", self, next));
    }
    *self = next;
    Ok(())
  }
}

impl fmt::Display for WorkerState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for WorkerState {
  type Err = Report;

  fn from_str(s: &str) -> Result<Self> {
    match s {
      "parsed" => Ok(Self::Parsed),
      "installing" => Ok(Self::Installing),
      "installed" => Ok(Self::Installed),
      "activating" => Ok(Self::Activating),
      "activated" => Ok(Self::Activated),
      "redundant" => Ok(Self::Redundant),
      other => Err(eyre!("Unknown lifecycle state '{}'", other)),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_happy_path() {
    let mut state = WorkerState::Parsed;
    state.advance(WorkerState::Installing).unwrap();
    state.advance(WorkerState::Installed).unwrap();
    state.advance(WorkerState::Activating).unwrap();
    state.advance(WorkerState::Activated).unwrap();
    assert_eq!(state, WorkerState::Activated);
  }

  #[test]
  fn test_cannot_activate_before_install() {
    let mut state = WorkerState::Parsed;
    assert!(state.advance(WorkerState::Activating).is_err());
    assert_eq!(state, WorkerState::Parsed);
  }

  #[test]
  fn test_failed_install_can_retry() {
    let mut state = WorkerState::Installing;
    state.advance(WorkerState::Redundant).unwrap();
    assert!(state.can_transition_to(WorkerState::Installing));
  }

  #[test]
  fn test_round_trips_through_str() {
    assert_eq!("installed".parse::<WorkerState>().unwrap(), WorkerState::Installed);
    assert!("waiting".parse::<WorkerState>().is_err());
  }
}
