// SPDX-License-Identifier: GPL-3.0-only
//! Driver selection and fallback
//!
//! Unconditional detection walks every provider in registration order and
//! returns the first driver that comes up. Named detection only walks the
//! providers registered under that vendor key and falls back to the
//! unconditional pass when none of them applies.
//!
//! "Not applicable" outcomes are absorbed. Hard errors are collected and
//! returned together only when nothing succeeds.

use crate::driver::SharedDriver;
use crate::error::{Error, Result};
use crate::registry::{ProviderEntry, Registry};

/// Runs the provider registry
#[derive(Clone, Debug)]
pub struct Selector {
    registry: Registry,
}

impl Selector {
    pub fn new(registry: Registry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Try every provider; first success wins
    pub fn detect(&self) -> Result<SharedDriver> {
        let mut errors = Vec::new();
        let entries: Vec<&ProviderEntry> = self.registry.entries().iter().collect();
        match run(&entries, &mut errors) {
            Some(driver) => Ok(driver),
            None => Err(Error::join(errors).unwrap_or(Error::NoDriver)),
        }
    }

    /// Try only the providers registered under `vendor`
    ///
    /// An empty name is the same as [`Selector::detect`]. A name with no
    /// registered provider is [`Error::NoDriver`], leaving the fallback to
    /// [`Selector::detect_for_vendor`].
    pub fn detect_by_name(&self, vendor: &str) -> Result<SharedDriver> {
        if vendor.is_empty() {
            return self.detect();
        }
        let entries = self.registry.matching(vendor);
        if entries.is_empty() {
            debug!("no provider registered for vendor {:?}", vendor);
            return Err(Error::NoDriver);
        }

        let mut errors = Vec::new();
        match run(&entries, &mut errors) {
            Some(driver) => Ok(driver),
            None => Err(Error::join(errors).unwrap_or(Error::NoDriver)),
        }
    }

    /// Named detection with silent fallback to unconditional detection
    ///
    /// The unconditional pass runs only if every named provider was "not
    /// applicable"; a hard error from a named provider is returned instead.
    pub fn detect_for_vendor(&self, vendor: &str) -> Result<SharedDriver> {
        if vendor.is_empty() {
            return self.detect();
        }
        match self.detect_by_name(vendor) {
            Ok(driver) => Ok(driver),
            Err(e) if e.is_not_applicable() => {
                debug!("no {} driver applies, falling back to unconditional detection", vendor);
                self.detect()
            }
            Err(e) => Err(e),
        }
    }
}

fn run(entries: &[&ProviderEntry], errors: &mut Vec<Error>) -> Option<SharedDriver> {
    for entry in entries {
        match entry.probe() {
            Ok(driver) => {
                info!("selected driver {} (provider key {:?})", driver.name(), entry.key());
                return Some(driver);
            }
            Err(e) if e.is_not_applicable() => {
                debug!("provider {:?} not applicable", entry.key());
            }
            Err(e) => {
                warn!("provider {:?} failed: {}", entry.key(), e);
                errors.push(e);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::registry::ProviderChain;
    use crate::testing::MockDriver;

    fn absent() -> Result<SharedDriver> {
        Err(Error::NoDriver)
    }

    #[test]
    fn test_detect_first_success_wins() {
        let selector = Selector::new(
            Registry::builder()
                .register("nvidia", absent)
                .register("intel", || Ok(MockDriver::shared("intel mock", 16)))
                .register_unconditional(|| Ok(MockDriver::shared("generic", 16)))
                .build(),
        );
        assert_eq!(selector.detect().unwrap().name(), "intel mock");
    }

    #[test]
    fn test_empty_registry_is_no_driver() {
        let selector = Selector::new(Registry::default());
        assert!(selector.detect().unwrap_err().is_not_applicable());
        assert!(selector.detect_for_vendor("nvidia").unwrap_err().is_not_applicable());
    }

    #[test_log::test]
    fn test_not_applicable_never_aggregated() {
        let selector = Selector::new(
            Registry::builder()
                .register("nvidia", || Err(Error::init("nvapi", "init failed")))
                .register("intel", absent)
                .register_unconditional(|| Err(Error::init("igcl", "missing export")))
                .build(),
        );

        match selector.detect().unwrap_err() {
            Error::Aggregate(errors) => {
                assert_eq!(errors.len(), 2);
                assert!(errors.iter().all(|e| !e.is_not_applicable()));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_single_hard_error_returned_as_is() {
        let selector = Selector::new(
            Registry::builder()
                .register("nvidia", || Err(Error::init("nvapi", "init failed")))
                .register("intel", absent)
                .build(),
        );
        assert!(matches!(
            selector.detect().unwrap_err(),
            Error::Init { backend: "nvapi", .. }
        ));
    }

    #[test]
    fn test_named_only_tries_matching_entries() {
        let probed = Arc::new(AtomicUsize::new(0));
        let counter = probed.clone();
        let selector = Selector::new(
            Registry::builder()
                .register("intel", move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(MockDriver::shared("intel mock", 16))
                })
                .register("nvidia", || Ok(MockDriver::shared("nvidia mock", 16)))
                .build(),
        );

        assert_eq!(selector.detect_by_name("NVIDIA").unwrap().name(), "nvidia mock");
        assert_eq!(probed.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_named_falls_back_when_not_applicable() {
        let selector = Selector::new(
            Registry::builder()
                .register("nvidia", absent)
                .register("intel", || Ok(MockDriver::shared("intel mock", 16)))
                .build(),
        );

        assert!(selector.detect_by_name("nvidia").unwrap_err().is_not_applicable());
        assert_eq!(selector.detect_for_vendor("nvidia").unwrap().name(), "intel mock");
    }

    #[test]
    fn test_named_hard_error_does_not_fall_back() {
        let selector = Selector::new(
            Registry::builder()
                .register("nvidia", || Err(Error::init("nvapi", "init failed")))
                .register("intel", || Ok(MockDriver::shared("intel mock", 16)))
                .build(),
        );
        assert!(matches!(
            selector.detect_for_vendor("nvidia").unwrap_err(),
            Error::Init { .. }
        ));
    }

    #[test]
    fn test_unregistered_name_matches_unconditional() {
        let build = || {
            Selector::new(
                Registry::builder()
                    .register("nvidia", absent)
                    .register("intel", || Ok(MockDriver::shared("intel mock", 16)))
                    .build(),
            )
        };

        let unconditional = build().detect().unwrap();
        let named = build().detect_for_vendor("matrox").unwrap();
        assert_eq!(unconditional.name(), named.name());
        assert!(build().detect_by_name("matrox").unwrap_err().is_not_applicable());

        let failing = Selector::new(Registry::builder().register("nvidia", absent).build());
        assert_eq!(
            failing.detect().unwrap_err().kind(),
            failing.detect_for_vendor("matrox").unwrap_err().kind()
        );
    }

    #[test_log::test]
    fn test_unmatched_name_probes_once() {
        let probes = Arc::new(AtomicUsize::new(0));
        let counter = probes.clone();
        let chain = ProviderChain::new().then("intel-igcl", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            absent()
        });
        let selector = Selector::new(Registry::builder().register_chain("intel", chain).build());

        // Member keys are not registry keys
        assert!(selector.detect_for_vendor("intel-igcl").unwrap_err().is_not_applicable());
        assert_eq!(probes.load(Ordering::SeqCst), 1);

        assert!(selector.detect_for_vendor("intel").unwrap_err().is_not_applicable());
        assert_eq!(probes.load(Ordering::SeqCst), 3);
    }
}
