// SPDX-License-Identifier: GPL-3.0-only
//! Vendor hints from display identities
//!
//! Display enumeration lives outside this crate. Its results arrive as
//! [`DisplayIdentity`] values; the adapter description is matched against
//! known vendor tokens to pick a provider key for named detection.

/// Identity of a monitor as reported by the OS display enumeration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DisplayIdentity {
    /// Adapter device name (e.g. `\\.\DISPLAY1`)
    pub adapter_name: String,
    /// Adapter description (e.g. `NVIDIA GeForce RTX 3080`)
    pub adapter_string: String,
    /// OS device identifier of the monitor
    pub device_id: String,
}

impl DisplayIdentity {
    pub fn vendor_hint(&self) -> &'static str {
        vendor_hint(&self.adapter_string)
    }
}

/// Known vendor tokens, checked in order
const VENDOR_TOKENS: &[(&str, &str)] = &[("nvidia", "nvidia"), ("intel", "intel")];

/// Provider key guessed from an adapter description
///
/// Returns `""` when no known vendor token appears, which selects
/// unconditional detection.
pub fn vendor_hint(adapter_description: &str) -> &'static str {
    let adapter = adapter_description.to_lowercase();
    VENDOR_TOKENS
        .iter()
        .find(|(token, _)| adapter.contains(token))
        .map(|(_, key)| *key)
        .unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_vendors() {
        assert_eq!(vendor_hint("NVIDIA GeForce RTX 4070"), "nvidia");
        assert_eq!(vendor_hint("Intel(R) UHD Graphics 770"), "intel");
        assert_eq!(vendor_hint("intel(r) arc(tm) a770 graphics"), "intel");
    }

    #[test]
    fn test_unknown_vendor_is_empty() {
        assert_eq!(vendor_hint("AMD Radeon RX 7900 XT"), "");
        assert_eq!(vendor_hint(""), "");
        assert_eq!(vendor_hint("Microsoft Basic Display Adapter"), "");
    }

    #[test]
    fn test_identity_hint() {
        let identity = DisplayIdentity {
            adapter_name: r"\\.\DISPLAY1".to_string(),
            adapter_string: "NVIDIA RTX A2000".to_string(),
            device_id: r"MONITOR\GSM5B7F\{4d36e96e-e325-11ce-bfc1-08002be10318}\0001".to_string(),
        };
        assert_eq!(identity.vendor_hint(), "nvidia");
        assert_eq!(DisplayIdentity::default().vendor_hint(), "");
    }
}
