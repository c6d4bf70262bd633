//! Holder of the mock and real data providers, and boot-time mode detection.

use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;
use tracing::{debug, info};

use super::provider::DataProvider;

/// Startup-ordering faults. These are programming errors, not data-layer results.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
  #[error("data providers not registered; call register_providers() during startup")]
  NotInitialized,
  #[error("no {0} data provider registered")]
  Missing(&'static str),
}

#[derive(Default)]
struct Slots {
  mock: Option<Arc<dyn DataProvider>>,
  real: Option<Arc<dyn DataProvider>>,
}

/// Registry of the two provider implementations.
///
/// Passed to whatever needs a provider instead of living in a global, so tests
/// can hold isolated registries.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
  slots: Arc<RwLock<Slots>>,
}

impl ProviderRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Store both providers. Meant to run once at boot; a later call replaces both.
  pub fn register_providers(&self, mock: Arc<dyn DataProvider>, real: Arc<dyn DataProvider>) {
    info!(mock = mock.name(), real = real.name(), "Data providers registered");
    let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
    slots.mock = Some(mock);
    slots.real = Some(real);
  }

  /// Provider selected by the boot-time mode flag.
  pub fn data_provider(&self, use_mock: bool) -> Result<Arc<dyn DataProvider>, RegistryError> {
    let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
    let (selected, label) = if use_mock {
      (&slots.mock, "mock")
    } else {
      (&slots.real, "real")
    };

    match selected {
      Some(provider) => Ok(Arc::clone(provider)),
      None if slots.mock.is_none() && slots.real.is_none() => Err(RegistryError::NotInitialized),
      None => Err(RegistryError::Missing(label)),
    }
  }

  /// Override either provider, leaving the other as is.
  pub fn set_providers(
    &self,
    mock: Option<Arc<dyn DataProvider>>,
    real: Option<Arc<dyn DataProvider>>,
  ) {
    let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
    if let Some(mock) = mock {
      slots.mock = Some(mock);
    }
    if let Some(real) = real {
      slots.real = Some(real);
    }
  }

  /// Back to the unregistered state.
  pub fn reset_providers(&self) {
    debug!("Data providers reset");
    *self.slots.write().unwrap_or_else(PoisonError::into_inner) = Slots::default();
  }

  pub fn is_initialized(&self) -> bool {
    let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
    slots.mock.is_some() && slots.real.is_some()
  }
}

/// Whether the process serves mock data. Resolved once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeMode {
  pub use_mock: bool,
}

impl RuntimeMode {
  /// An explicit override wins; otherwise local hosts run against fixtures.
  pub fn detect(host: &str, explicit: Option<bool>) -> Self {
    let use_mock = explicit.unwrap_or_else(|| is_local_host(host));
    info!(host, use_mock, "Runtime mode resolved");
    Self { use_mock }
  }
}

fn is_local_host(host: &str) -> bool {
  let host = host.trim().trim_start_matches('[').trim_end_matches(']');
  host.is_empty()
    || host.eq_ignore_ascii_case("localhost")
    || host.ends_with(".localhost")
    || host == "127.0.0.1"
    || host == "::1"
}
