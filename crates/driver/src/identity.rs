use std::sync::RwLock;

/// Whether the plugin is ready to serve. Set once after startup, never
/// cleared.
#[derive(Debug, Default)]
pub struct Readiness(RwLock<bool>);

impl Readiness {
  pub fn new() -> Self {
    Readiness::default()
  }

  pub fn set_ready(&self) {
    match self.0.write() {
      Ok(mut ready) => *ready = true,
      Err(poisoned) => *poisoned.into_inner() = true,
    }
  }

  pub fn is_ready(&self) -> bool {
    match self.0.read() {
      Ok(ready) => *ready,
      Err(poisoned) => *poisoned.into_inner(),
    }
  }
}
