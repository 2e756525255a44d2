// SPDX-License-Identifier: GPL-3.0-only
//! Capability contract shared by all vendor backends
//!
//! A [`Driver`] is bound to one active display output. Every method performs
//! real hardware I/O and blocks until the vendor stack returns. Implementations
//! hold a private lock for the duration of each call, since vendor stacks are
//! not re-entrant for a given display session.

use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};

/// Common trait for all AUX channel backends
pub trait Driver: std::fmt::Debug + Send + Sync {
    /// Human-readable name of the backend
    fn name(&self) -> &str;

    /// Read `length` DPCD bytes starting at `address`
    ///
    /// A zero length is rejected with [`Error::InvalidLength`](crate::Error::InvalidLength).
    fn read_dpcd(&self, address: u32, length: u32) -> Result<Vec<u8>>;

    /// Write `data` to DPCD starting at `address`
    ///
    /// Chunks already written stay written if a later chunk fails.
    fn write_dpcd(&self, address: u32, data: &[u8]) -> Result<()>;

    /// Read `length` bytes over I2C
    ///
    /// `address` packs the slave and register offset, see [`I2cAddress`](crate::I2cAddress).
    /// A zero length returns an empty buffer.
    fn read_i2c(&self, address: u32, length: u32) -> Result<Vec<u8>>;

    /// Write `data` over I2C
    fn write_i2c(&self, address: u32, data: &[u8]) -> Result<()>;

    /// Release the native session early
    ///
    /// Safe to call more than once. Later transactions fail with
    /// [`Error::SessionClosed`](crate::Error::SessionClosed). Dropping the last
    /// handle releases the session as well.
    fn close(&self) {}
}

/// Driver handle shared between the cache and its callers
pub type SharedDriver = Arc<dyn Driver>;

/// Native session owned by a driver
///
/// Calls run under the lock, one at a time. [`Session::close`] drops the
/// inner value at most once; the inner value's `Drop` performs the native
/// release, so a session that is never closed is released with its driver.
#[derive(Debug)]
#[cfg_attr(not(windows), allow(dead_code))]
pub(crate) struct Session<S> {
    backend: &'static str,
    inner: Mutex<Option<S>>,
}

#[cfg_attr(not(windows), allow(dead_code))]
impl<S> Session<S> {
    pub(crate) fn new(backend: &'static str, inner: S) -> Self {
        Self {
            backend,
            inner: Mutex::new(Some(inner)),
        }
    }

    /// Run `f` against the open session while holding its lock
    pub(crate) fn with<T>(&self, f: impl FnOnce(&mut S) -> Result<T>) -> Result<T> {
        // A panic inside a native call leaves nothing half-updated on our side.
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        match guard.as_mut() {
            Some(session) => f(session),
            None => Err(Error::SessionClosed(self.backend)),
        }
    }

    /// Release the session; returns whether this call did the release
    pub(crate) fn close(&self) -> bool {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        match guard.take() {
            Some(session) => {
                drop(session);
                debug!("{} session released", self.backend);
                true
            }
            None => false,
        }
    }
}
