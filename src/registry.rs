// SPDX-License-Identifier: GPL-3.0-only
//! Provider registry
//!
//! Backends describe themselves as named factories. A [`RegistryBuilder`]
//! collects them once at start-up; the resulting [`Registry`] is immutable
//! and is handed to the selector by value.

use std::fmt;
use std::sync::Arc;

use crate::driver::SharedDriver;
use crate::error::{Error, Result};

/// Factory that tries to bring up one backend
///
/// Returns [`Error::NoDriver`] when the backend does not apply to this machine.
pub type Factory = Arc<dyn Fn() -> Result<SharedDriver> + Send + Sync>;

/// One registered provider
#[derive(Clone)]
pub struct ProviderEntry {
    key: String,
    factory: Factory,
}

impl ProviderEntry {
    /// Lower-cased vendor key, empty for unconditional providers
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn probe(&self) -> Result<SharedDriver> {
        (self.factory)()
    }
}

impl fmt::Debug for ProviderEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProviderEntry({:?})", self.key)
    }
}

/// Several factories tried in priority order as one provider
///
/// The first success wins. If every member fails, the hard errors of all
/// members are returned together; if they were all "not applicable" the
/// chain is too.
#[derive(Clone, Default)]
pub struct ProviderChain {
    members: Vec<(String, Factory)>,
}

impl ProviderChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then<F>(mut self, name: &str, factory: F) -> Self
    where
        F: Fn() -> Result<SharedDriver> + Send + Sync + 'static,
    {
        self.members.push((name.to_string(), Arc::new(factory)));
        self
    }

    pub fn probe(&self) -> Result<SharedDriver> {
        let mut errors = Vec::new();
        for (name, factory) in &self.members {
            match factory() {
                Ok(driver) => {
                    debug!("chain member {} succeeded", name);
                    return Ok(driver);
                }
                Err(e) if e.is_not_applicable() => {
                    debug!("chain member {} not applicable", name);
                }
                Err(e) => {
                    debug!("chain member {} failed: {}", name, e);
                    errors.push(e);
                }
            }
        }
        Err(Error::join(errors).unwrap_or(Error::NoDriver))
    }
}

/// Immutable, ordered list of providers
#[derive(Clone, Debug, Default)]
pub struct Registry {
    entries: Vec<ProviderEntry>,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// All providers in registration order
    pub fn entries(&self) -> &[ProviderEntry] {
        &self.entries
    }

    /// Providers registered under `key` (case-insensitive)
    pub fn matching(&self, key: &str) -> Vec<&ProviderEntry> {
        let target = key.to_lowercase();
        self.entries
            .iter()
            .filter(|entry| !entry.key.is_empty() && entry.key == target)
            .collect()
    }

    pub fn keys(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.key.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Collects providers before the registry is first used
#[derive(Default)]
pub struct RegistryBuilder {
    entries: Vec<ProviderEntry>,
}

impl RegistryBuilder {
    /// Register a provider under a vendor key
    pub fn register<F>(mut self, key: &str, factory: F) -> Self
    where
        F: Fn() -> Result<SharedDriver> + Send + Sync + 'static,
    {
        self.entries.push(ProviderEntry {
            key: key.to_lowercase(),
            factory: Arc::new(factory),
        });
        self
    }

    /// Register a provider that only takes part in unconditional detection
    pub fn register_unconditional<F>(self, factory: F) -> Self
    where
        F: Fn() -> Result<SharedDriver> + Send + Sync + 'static,
    {
        self.register("", factory)
    }

    /// Register a preferred chain under a vendor key
    pub fn register_chain(self, key: &str, chain: ProviderChain) -> Self {
        self.register(key, move || chain.probe())
    }

    pub fn build(self) -> Registry {
        Registry {
            entries: self.entries,
        }
    }
}
