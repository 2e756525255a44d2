// SPDX-License-Identifier: GPL-3.0-only
//! DisplayPort AUX access through vendor GPU stacks
//!
//! Monitors expose their DPCD registers over the DisplayPort AUX channel and
//! DDC/CI over I2C. Reaching either from user space takes a vendor-specific
//! driver interface. This crate wraps those interfaces behind one [`Driver`]
//! trait, picks whichever vendor stack is present, and caches that choice.
//!
//! ```no_run
//! use dpaux_bridge::{Config, DetectionCache, Selector, backends};
//!
//! let config = Config::load()?;
//! let cache = DetectionCache::new(Selector::new(backends::default_registry(&config)));
//! let driver = cache.driver_for("nvidia")?;
//! let revision = driver.read_dpcd(0x000, 1)?;
//! # Ok::<(), dpaux_bridge::Error>(())
//! ```

#[macro_use]
extern crate tracing;

pub mod backends;
pub mod bytes;
pub mod cache;
pub mod config;
pub mod driver;
pub mod error;
pub mod registry;
pub mod selector;
pub mod transaction;
pub mod vendor;

#[cfg(test)]
mod testing;

pub use bytes::{SeqValue, bytes_from_sequence, bytes_to_sequence, format_bytes};
pub use cache::{DetectionCache, DetectionReport, describe_detection_error};
pub use config::Config;
pub use driver::{Driver, SharedDriver};
pub use error::{AuxError, Error, ErrorKind, Result, TransportFault};
pub use registry::{Factory, ProviderChain, ProviderEntry, Registry, RegistryBuilder};
pub use selector::Selector;
pub use transaction::{ChunkPlan, DP_AUX_MAX_PAYLOAD, I2cAddress};
pub use vendor::{DisplayIdentity, vendor_hint};
