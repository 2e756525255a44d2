// SPDX-License-Identifier: GPL-3.0-only
//! Configuration file
//!
//! Settings live in a small KDL document:
//!
//! ```kdl
//! vendor "nvidia"
//! i2c-write-delay-ms 20
//! disable "intel-cui"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use kdl::{KdlDocument, KdlNode, KdlValue};

use crate::error::{Error, Result};

/// Environment variable pointing at an alternative config file
pub const CONFIG_ENV: &str = "DPAUX_BRIDGE_CONFIG";

const APP_DIR: &str = "dpaux-bridge";
const FILE_NAME: &str = "config.kdl";

/// Default settle time after an I2C write on the COM backend
pub const DEFAULT_I2C_WRITE_DELAY: Duration = Duration::from_millis(20);

#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    /// Vendor key forced for named detection, overriding the adapter hint
    pub vendor_override: Option<String>,
    /// Time to wait after each I2C write on backends that need it
    pub i2c_write_delay: Duration,
    /// Provider keys left out of the registry
    pub disabled: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            vendor_override: None,
            i2c_write_delay: DEFAULT_I2C_WRITE_DELAY,
            disabled: Vec::new(),
        }
    }
}

impl Config {
    /// Default location: `$DPAUX_BRIDGE_CONFIG`, else the user config dir
    pub fn default_path() -> Option<PathBuf> {
        if let Some(path) = std::env::var_os(CONFIG_ENV) {
            return Some(PathBuf::from(path));
        }
        dirs::config_dir().map(|dir| dir.join(APP_DIR).join(FILE_NAME))
    }

    /// Load from the default location; a missing file yields defaults
    pub fn load() -> Result<Self> {
        match Self::default_path() {
            Some(path) => Self::load_from(&path),
            None => {
                debug!("no config directory available, using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(text) => {
                debug!("loading config from {}", path.display());
                Self::parse(&text)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("config file {} not found, using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(Error::Config(format!("{}: {}", path.display(), e))),
        }
    }

    pub fn parse(text: &str) -> Result<Self> {
        let doc: KdlDocument = text
            .parse()
            .map_err(|e: kdl::KdlError| Error::Config(e.to_string()))?;

        let mut config = Self::default();
        for node in doc.nodes() {
            match node.name().value() {
                "vendor" => {
                    let vendor = string_arg(node)?.trim().to_lowercase();
                    config.vendor_override = (!vendor.is_empty()).then_some(vendor);
                }
                "i2c-write-delay-ms" => {
                    let ms = integer_arg(node)?;
                    let ms = u64::try_from(ms).map_err(|_| {
                        Error::Config(format!("i2c-write-delay-ms must not be negative, got {ms}"))
                    })?;
                    config.i2c_write_delay = Duration::from_millis(ms);
                }
                "disable" => {
                    for entry in node.entries().iter().filter(|e| e.name().is_none()) {
                        let key = entry.value().as_string().ok_or_else(|| {
                            Error::Config("disable expects provider names as strings".to_string())
                        })?;
                        config.disabled.push(key.to_lowercase());
                    }
                }
                other => warn!("ignoring unknown config node {:?}", other),
            }
        }
        Ok(config)
    }

    pub fn is_disabled(&self, key: &str) -> bool {
        self.disabled.iter().any(|d| d.eq_ignore_ascii_case(key))
    }
}

fn first_arg<'a>(node: &'a KdlNode) -> Result<&'a KdlValue> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .map(|e| e.value())
        .ok_or_else(|| Error::Config(format!("{} needs a value", node.name().value())))
}

fn string_arg(node: &KdlNode) -> Result<&str> {
    first_arg(node)?
        .as_string()
        .ok_or_else(|| Error::Config(format!("{} expects a string", node.name().value())))
}

fn integer_arg(node: &KdlNode) -> Result<i128> {
    first_arg(node)?
        .as_integer()
        .ok_or_else(|| Error::Config(format!("{} expects an integer", node.name().value())))
}
