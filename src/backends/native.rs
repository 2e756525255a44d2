// SPDX-License-Identifier: GPL-3.0-only
//! Windows plumbing shared by the vendor backends
//!
//! Vendor stacks ship as system DLLs that may or may not be installed, so
//! nothing is linked at build time. Libraries are loaded from the system
//! directory on demand and entry points are looked up by name.

use std::ffi::{CString, c_void};
use std::mem;
use std::ptr;

use windows_sys::Win32::Foundation::{FreeLibrary, HMODULE};
use windows_sys::Win32::Graphics::Gdi::{DISPLAY_DEVICEW, EnumDisplayDevicesW};
use windows_sys::Win32::System::LibraryLoader::{
    GetProcAddress, LOAD_LIBRARY_SEARCH_SYSTEM32, LoadLibraryExW,
};

/// `StateFlags` bit of an attached, active display device
const DISPLAY_DEVICE_ACTIVE: u32 = 0x0000_0001;

/// A loaded DLL, unloaded on drop
#[derive(Debug)]
pub struct Library {
    handle: HMODULE,
    name: &'static str,
}

// SAFETY: a module handle is a process-wide value; loading, lookup and
// unloading are thread-safe in the Windows loader.
unsafe impl Send for Library {}
unsafe impl Sync for Library {}

impl Library {
    /// Load `name` from the system directory; `None` if it is not installed
    pub fn open(name: &'static str) -> Option<Self> {
        let wide_name = wide(name);
        let handle = unsafe {
            LoadLibraryExW(
                wide_name.as_ptr(),
                ptr::null_mut(),
                LOAD_LIBRARY_SEARCH_SYSTEM32,
            )
        };
        if handle.is_null() {
            debug!("{} not loadable: {}", name, std::io::Error::last_os_error());
            return None;
        }
        debug!("loaded {}", name);
        Some(Self { handle, name })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Look up an exported function
    ///
    /// # Safety
    ///
    /// `F` must be a function pointer type matching the export's real signature.
    pub unsafe fn symbol<F: Copy>(&self, symbol: &str) -> Option<F> {
        assert_eq!(mem::size_of::<F>(), mem::size_of::<usize>());
        let c_name = CString::new(symbol).ok()?;
        let proc = unsafe { GetProcAddress(self.handle, c_name.as_ptr().cast()) }?;
        Some(unsafe { mem::transmute_copy::<_, F>(&proc) })
    }
}

impl Drop for Library {
    fn drop(&mut self) {
        unsafe {
            FreeLibrary(self.handle);
        }
        debug!("unloaded {}", self.name);
    }
}

/// Reinterpret a raw code pointer as a function pointer; `None` if null
///
/// # Safety
///
/// `F` must be a function pointer type matching the target's real signature.
pub unsafe fn function<F: Copy>(raw: *const c_void) -> Option<F> {
    assert_eq!(mem::size_of::<F>(), mem::size_of::<*const c_void>());
    if raw.is_null() {
        return None;
    }
    Some(unsafe { mem::transmute_copy::<_, F>(&raw) })
}

/// NUL-terminated UTF-16 copy of `s`
pub fn wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(std::iter::once(0)).collect()
}

/// String from a NUL-terminated UTF-16 buffer
pub fn from_wide(buf: &[u16]) -> String {
    let end = buf.iter().position(|&c| c == 0).unwrap_or(buf.len());
    String::from_utf16_lossy(&buf[..end])
}

/// Entry from `EnumDisplayDevicesW`
#[derive(Debug, Clone)]
pub struct DisplayDevice {
    /// Device name such as `\\.\DISPLAY1`, or `\\.\DISPLAY1\Monitor0` for outputs
    pub name: String,
    pub description: String,
    pub active: bool,
}

fn display_device(parent: Option<&[u16]>, index: u32) -> Option<DisplayDevice> {
    let mut device: DISPLAY_DEVICEW = unsafe { mem::zeroed() };
    device.cb = mem::size_of::<DISPLAY_DEVICEW>() as u32;
    let parent = parent.map_or(ptr::null(), |p| p.as_ptr());
    if unsafe { EnumDisplayDevicesW(parent, index, &mut device, 0) } == 0 {
        return None;
    }
    Some(DisplayDevice {
        name: from_wide(&device.DeviceName),
        description: from_wide(&device.DeviceString),
        active: device.StateFlags & DISPLAY_DEVICE_ACTIVE != 0,
    })
}

/// All display adapters, in enumeration order
pub fn adapters() -> Vec<DisplayDevice> {
    (0..).map_while(|i| display_device(None, i)).collect()
}

/// Outputs (monitors) attached to the adapter named `adapter`
pub fn outputs(adapter: &str) -> Vec<DisplayDevice> {
    let parent = wide(adapter);
    (0..).map_while(|i| display_device(Some(&parent), i)).collect()
}
