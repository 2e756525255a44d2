// SPDX-License-Identifier: GPL-3.0-only
//! Vendor backends
//!
//! Each backend exposes a `probe` factory that either yields a driver bound
//! to an active display output, reports [`Error::NoDriver`](crate::Error::NoDriver)
//! when its vendor stack is absent, or fails with a hard error. All of them
//! compile everywhere; off Windows every probe reports "not applicable".

pub mod intel_cui;
pub mod intel_igcl;
#[cfg(windows)]
mod native;
pub mod nvapi;

use crate::config::Config;
use crate::registry::{ProviderChain, Registry};

/// Vendor key of the Intel chain
pub const INTEL_KEY: &str = "intel";

/// Registry with every built-in backend, minus those disabled in `config`
///
/// `"intel"` tries the control library first and falls back to the
/// interface object; `"nvidia"` is NVAPI. Disabling `"intel-igcl"` or
/// `"intel-cui"` removes that member from the Intel chain. Member keys are
/// only recognized by `disable`; as vendor names they match no provider.
pub fn default_registry(config: &Config) -> Registry {
    let mut builder = Registry::builder();

    if !config.is_disabled(INTEL_KEY) {
        let mut chain = ProviderChain::new();
        if !config.is_disabled(intel_igcl::KEY) {
            chain = chain.then(intel_igcl::KEY, intel_igcl::probe);
        }
        if !config.is_disabled(intel_cui::KEY) {
            let delay = config.i2c_write_delay;
            chain = chain.then(intel_cui::KEY, move || intel_cui::probe(delay));
        }
        builder = builder.register_chain(INTEL_KEY, chain);
    }

    if !config.is_disabled(nvapi::KEY) {
        builder = builder.register(nvapi::KEY, nvapi::probe);
    }

    let registry = builder.build();
    debug!("registered providers: {:?}", registry.keys());
    registry
}

/// COM-style GUID, laid out like the Windows `GUID`
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Guid {
    pub data1: u32,
    pub data2: u16,
    pub data3: u16,
    pub data4: [u8; 8],
}

impl Guid {
    pub const fn from_u128(v: u128) -> Self {
        Self {
            data1: (v >> 96) as u32,
            data2: (v >> 80) as u16,
            data3: (v >> 64) as u16,
            data4: (v as u64).to_be_bytes(),
        }
    }
}
