// SPDX-License-Identifier: GPL-3.0-only
//! Per-vendor detection cache
//!
//! Probing a vendor stack loads libraries and scans adapters, so the
//! outcome for a vendor key is computed once per process and handed out to
//! every later caller. A "no driver" outcome is cached just like a live
//! driver.
//!
//! # Thread Safety
//!
//! One mutex guards both the lookup and the populate-on-miss path. Callers
//! asking for the same key while a probe runs block until it finishes and
//! then receive the stored result; hardware is never probed twice for a key.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use crate::driver::SharedDriver;
use crate::error::{Error, Result};
use crate::selector::Selector;

/// Key used for the unconditional pass, so the map never holds ""
const DEFAULT_KEY: &str = "default";

type Outcome = Result<SharedDriver>;

/// Memoizes detection results per vendor key
#[derive(Clone)]
pub struct DetectionCache {
    selector: Arc<Selector>,
    outcomes: Arc<Mutex<HashMap<String, Outcome>>>,
}

impl DetectionCache {
    pub fn new(selector: Selector) -> Self {
        Self {
            selector: Arc::new(selector),
            outcomes: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Driver for `vendor`, probing on first use only
    ///
    /// An empty vendor runs unconditional detection; a named vendor falls
    /// back to it when no provider of that name applies.
    pub fn driver_for(&self, vendor: &str) -> Result<SharedDriver> {
        let key = cache_key(vendor);

        // A poisoned lock only means a probe panicked; the map itself is intact.
        let mut outcomes = self.outcomes.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(outcome) = outcomes.get(&key) {
            debug!("detection cache hit for {:?}", key);
            return outcome.clone();
        }

        info!("probing GPU drivers for vendor key {:?}", key);
        let outcome = self.selector.detect_for_vendor(vendor);
        if let Err(ref e) = outcome {
            debug!("detection for {:?} failed: {}", key, e);
        }
        outcomes.insert(key, outcome.clone());
        outcome
    }

    /// Detection outcome for `vendor` summarized for display
    pub fn report(&self, vendor: &str) -> DetectionReport {
        DetectionReport::new(vendor, &self.driver_for(vendor))
    }

    /// Vendor keys probed so far
    pub fn cached_keys(&self) -> Vec<String> {
        let outcomes = self.outcomes.lock().unwrap_or_else(|e| e.into_inner());
        let mut keys: Vec<_> = outcomes.keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl fmt::Debug for DetectionCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DetectionCache")
            .field("keys", &self.cached_keys())
            .finish()
    }
}

fn cache_key(vendor: &str) -> String {
    if vendor.is_empty() {
        DEFAULT_KEY.to_string()
    } else {
        vendor.to_lowercase()
    }
}

/// Human-oriented summary of a detection outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectionReport {
    pub available: bool,
    pub driver_name: Option<String>,
    pub vendor: Option<String>,
    pub error: Option<String>,
}

impl DetectionReport {
    pub fn new(vendor: &str, outcome: &Result<SharedDriver>) -> Self {
        let vendor_hint = (!vendor.is_empty()).then(|| vendor.to_string());
        match outcome {
            Ok(driver) => Self {
                available: true,
                driver_name: Some(driver.name().to_string()),
                vendor: vendor_hint,
                error: None,
            },
            Err(e) => Self {
                available: false,
                driver_name: None,
                vendor: vendor_hint,
                error: Some(describe_detection_error(vendor, e)),
            },
        }
    }
}

impl fmt::Display for DetectionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "available: {}", self.available)?;
        if let Some(ref name) = self.driver_name {
            writeln!(f, "driver: {name}")?;
        }
        if let Some(ref vendor) = self.vendor {
            writeln!(f, "vendor: {vendor}")?;
        }
        if let Some(ref error) = self.error {
            writeln!(f, "error: {error}")?;
        }
        Ok(())
    }
}

/// Message for a failed detection, phrased for the selected display
pub fn describe_detection_error(vendor: &str, err: &Error) -> String {
    if err.is_not_applicable() {
        if vendor.is_empty() {
            "no compatible GPU driver available for selected display".to_string()
        } else {
            format!("no {vendor} GPU driver available for selected display")
        }
    } else {
        err.to_string()
    }
}
