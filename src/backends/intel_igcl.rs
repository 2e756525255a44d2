// SPDX-License-Identifier: GPL-3.0-only
//! Intel Graphics Control Library (`ControlLib.dll`)
//!
//! The control library is installed with current Intel graphics drivers. A
//! session is opened with `ctlInit`; adapters and their display outputs are
//! enumerated as opaque handles, and AUX/I2C transfers go through one request
//! structure each, with an operation-type field selecting read or write.

#![cfg_attr(not(windows), allow(dead_code))]

use std::fmt;

use crate::driver::SharedDriver;
use crate::error::{Error, Result, TransportFault};

use super::Guid;

pub const KEY: &str = "intel-igcl";
pub const NAME: &str = "Intel Graphics Control Library";
const BACKEND: &str = "intel igcl";

const LIBRARY: &str = "ControlLib.dll";

/// `CTL_MAKE_VERSION(1, 1)`
const CTL_IMPL_VERSION: u32 = (1 << 16) | 1;

const CTL_OPERATION_TYPE_READ: u32 = 1;
const CTL_OPERATION_TYPE_WRITE: u32 = 2;

const CTL_AUX_FLAG_NATIVE_AUX: u32 = 1 << 0;
const CTL_I2C_FLAG_1BYTE_INDEX: u32 = 1 << 1;
const CTL_I2C_FLAG_2BYTE_INDEX: u32 = 1 << 2;

const CTL_AUX_MAX_DATA_SIZE: usize = 132;
const CTL_I2C_MAX_DATA_SIZE: usize = 128;

const AUX_CHUNK: u32 = 16;
const I2C_CHUNK: u32 = CTL_I2C_MAX_DATA_SIZE as u32;

/// `ctl_init_args_t`
#[repr(C)]
#[derive(Debug, Clone, Default)]
pub(crate) struct CtlInitArgs {
    size: u32,
    version: u8,
    app_version: u32,
    flags: u32,
    supported_version: u32,
    application_uid: Guid,
}

impl CtlInitArgs {
    fn new() -> Self {
        Self {
            size: std::mem::size_of::<Self>() as u32,
            app_version: CTL_IMPL_VERSION,
            ..Default::default()
        }
    }
}

/// `ctl_aux_access_args_t`
#[repr(C)]
#[derive(Clone)]
pub(crate) struct CtlAuxAccessArgs {
    size: u32,
    version: u8,
    op_type: u32,
    flags: u32,
    address: u32,
    rad: u64,
    port_id: u32,
    data_size: u32,
    data: [u8; CTL_AUX_MAX_DATA_SIZE],
}

impl CtlAuxAccessArgs {
    fn new(op_type: u32, address: u32, len: usize) -> Self {
        Self {
            size: std::mem::size_of::<Self>() as u32,
            version: 0,
            op_type,
            flags: CTL_AUX_FLAG_NATIVE_AUX,
            address,
            rad: 0,
            port_id: 0,
            data_size: len as u32,
            data: [0; CTL_AUX_MAX_DATA_SIZE],
        }
    }
}

/// `ctl_i2c_access_args_t`
#[repr(C)]
#[derive(Clone)]
pub(crate) struct CtlI2cAccessArgs {
    size: u32,
    version: u8,
    data_size: u32,
    address: u32,
    op_type: u32,
    offset: u32,
    flags: u32,
    rad: u64,
    data: [u8; CTL_I2C_MAX_DATA_SIZE],
}

impl CtlI2cAccessArgs {
    fn new(op_type: u32, bus_address: u32, offset: u32, len: usize) -> Self {
        let flags = if offset > 0xFF {
            CTL_I2C_FLAG_2BYTE_INDEX
        } else {
            CTL_I2C_FLAG_1BYTE_INDEX
        };
        Self {
            size: std::mem::size_of::<Self>() as u32,
            version: 0,
            data_size: len as u32,
            address: bus_address,
            op_type,
            offset,
            flags,
            rad: 0,
            data: [0; CTL_I2C_MAX_DATA_SIZE],
        }
    }
}

/// `ctl_result_t`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CtlResult {
    Success,
    NotInitialized,
    AlreadyInitialized,
    DeviceLost,
    OutOfHostMemory,
    OutOfDeviceMemory,
    InsufficientPermissions,
    NotAvailable,
    Uninitialized,
    UnsupportedVersion,
    UnsupportedFeature,
    InvalidArgument,
    InvalidApiHandle,
    InvalidNullHandle,
    InvalidNullPointer,
    InvalidSize,
    UnsupportedSize,
    DataRead,
    DataWrite,
    DataNotFound,
    NotImplemented,
    OsCall,
    KmdCall,
    InvalidOperationType,
    WaitTimeout,
    GenericUnknown,
    InvalidAuxAccessFlag,
    DisplayNotAttached,
    DisplayNotActive,
    Unknown(u32),
}

impl CtlResult {
    pub fn from_code(code: u32) -> Self {
        match code {
            // Values below the error range are success variants
            0x0000_0000..=0x0000_FFFF => CtlResult::Success,
            0x4000_0001 => CtlResult::NotInitialized,
            0x4000_0002 => CtlResult::AlreadyInitialized,
            0x4000_0003 => CtlResult::DeviceLost,
            0x4000_0004 => CtlResult::OutOfHostMemory,
            0x4000_0005 => CtlResult::OutOfDeviceMemory,
            0x4000_0006 => CtlResult::InsufficientPermissions,
            0x4000_0007 => CtlResult::NotAvailable,
            0x4000_0008 => CtlResult::Uninitialized,
            0x4000_0009 => CtlResult::UnsupportedVersion,
            0x4000_000A => CtlResult::UnsupportedFeature,
            0x4000_000B => CtlResult::InvalidArgument,
            0x4000_000C => CtlResult::InvalidApiHandle,
            0x4000_000D => CtlResult::InvalidNullHandle,
            0x4000_000E => CtlResult::InvalidNullPointer,
            0x4000_000F => CtlResult::InvalidSize,
            0x4000_0010 => CtlResult::UnsupportedSize,
            0x4000_0012 => CtlResult::DataRead,
            0x4000_0013 => CtlResult::DataWrite,
            0x4000_0014 => CtlResult::DataNotFound,
            0x4000_0015 => CtlResult::NotImplemented,
            0x4000_0016 => CtlResult::OsCall,
            0x4000_0017 => CtlResult::KmdCall,
            0x4000_001A => CtlResult::InvalidOperationType,
            0x4000_001E => CtlResult::WaitTimeout,
            0x4000_FFFF => CtlResult::GenericUnknown,
            0x4400_0001 => CtlResult::InvalidAuxAccessFlag,
            0x4400_0003 => CtlResult::DisplayNotAttached,
            0x4400_0004 => CtlResult::DisplayNotActive,
            other => CtlResult::Unknown(other),
        }
    }

    pub fn is_success(self) -> bool {
        self == CtlResult::Success
    }
}

impl fmt::Display for CtlResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            CtlResult::Success => "success",
            CtlResult::NotInitialized => "not initialized",
            CtlResult::AlreadyInitialized => "already initialized",
            CtlResult::DeviceLost => "device lost",
            CtlResult::OutOfHostMemory => "out of host memory",
            CtlResult::OutOfDeviceMemory => "out of device memory",
            CtlResult::InsufficientPermissions => "insufficient permissions",
            CtlResult::NotAvailable => "not available",
            CtlResult::Uninitialized => "uninitialized",
            CtlResult::UnsupportedVersion => "unsupported version",
            CtlResult::UnsupportedFeature => "unsupported feature",
            CtlResult::InvalidArgument => "invalid argument",
            CtlResult::InvalidApiHandle => "invalid API handle",
            CtlResult::InvalidNullHandle => "invalid null handle",
            CtlResult::InvalidNullPointer => "invalid null pointer",
            CtlResult::InvalidSize => "invalid size",
            CtlResult::UnsupportedSize => "unsupported size",
            CtlResult::DataRead => "data read error",
            CtlResult::DataWrite => "data write error",
            CtlResult::DataNotFound => "data not found",
            CtlResult::NotImplemented => "not implemented",
            CtlResult::OsCall => "OS call failed",
            CtlResult::KmdCall => "kernel driver call failed",
            CtlResult::InvalidOperationType => "invalid operation type",
            CtlResult::WaitTimeout => "wait timeout",
            CtlResult::GenericUnknown => "unknown error",
            CtlResult::InvalidAuxAccessFlag => "invalid AUX access flag",
            CtlResult::DisplayNotAttached => "display not attached",
            CtlResult::DisplayNotActive => "display not active",
            CtlResult::Unknown(code) => return write!(f, "unknown result 0x{code:08X}"),
        };
        f.write_str(text)
    }
}

/// Map a call result into a transport error
fn check_transfer(op: &'static str, code: u32) -> Result<()> {
    let result = CtlResult::from_code(code);
    if result.is_success() {
        return Ok(());
    }
    Err(Error::transport(
        BACKEND,
        op,
        TransportFault::Status {
            code,
            message: result.to_string(),
        },
    ))
}

/// Map a setup-time result into a construction error
fn check_setup(call: &str, code: u32) -> Result<()> {
    let result = CtlResult::from_code(code);
    if result.is_success() {
        return Ok(());
    }
    Err(Error::init(BACKEND, format!("{call}: {result} (0x{code:08X})")))
}

#[cfg(windows)]
mod imp {
    use std::ffi::c_void;
    use std::ptr;
    use std::sync::Arc;

    use super::*;
    use crate::backends::native::Library;
    use crate::driver::{Driver, Session};
    use crate::transaction::{self, I2cAddress};

    type Handle = *mut c_void;

    type CtlInitFn = unsafe extern "C" fn(*mut CtlInitArgs, *mut Handle) -> u32;
    type CtlCloseFn = unsafe extern "C" fn(Handle) -> u32;
    type CtlEnumerateFn = unsafe extern "C" fn(Handle, *mut u32, *mut Handle) -> u32;
    type CtlAuxAccessFn = unsafe extern "C" fn(Handle, *mut CtlAuxAccessArgs) -> u32;
    type CtlI2cAccessFn = unsafe extern "C" fn(Handle, *mut CtlI2cAccessArgs) -> u32;

    /// Control-library entry points
    struct IgclApi {
        library: Library,
        init: CtlInitFn,
        close: CtlCloseFn,
        enumerate_devices: CtlEnumerateFn,
        enumerate_outputs: CtlEnumerateFn,
        aux_access: CtlAuxAccessFn,
        i2c_access: CtlI2cAccessFn,
    }

    impl IgclApi {
        /// `Ok(None)` when the library is not installed
        fn load() -> Result<Option<Self>> {
            let Some(library) = Library::open(LIBRARY) else {
                return Ok(None);
            };

            fn resolve<F: Copy>(library: &Library, name: &str) -> Result<F> {
                unsafe { library.symbol(name) }.ok_or_else(|| {
                    Error::init(BACKEND, format!("{} lacks export {}", library.name(), name))
                })
            }

            Ok(Some(Self {
                init: resolve(&library, "ctlInit")?,
                close: resolve(&library, "ctlClose")?,
                enumerate_devices: resolve(&library, "ctlEnumerateDevices")?,
                enumerate_outputs: resolve(&library, "ctlEnumerateDisplayOutputs")?,
                aux_access: resolve(&library, "ctlAUXAccess")?,
                i2c_access: resolve(&library, "ctlI2CAccess")?,
                library,
            }))
        }

        /// Two-call enumeration: count first, then handles
        fn enumerate(&self, call: &str, f: CtlEnumerateFn, parent: Handle) -> Result<Vec<Handle>> {
            let mut count = 0u32;
            check_setup(call, unsafe { f(parent, &mut count, ptr::null_mut()) })?;
            if count == 0 {
                return Ok(Vec::new());
            }
            let mut handles = vec![ptr::null_mut(); count as usize];
            check_setup(call, unsafe { f(parent, &mut count, handles.as_mut_ptr()) })?;
            handles.truncate(count as usize);
            Ok(handles)
        }
    }

    /// Open control-library session bound to one display output
    struct IgclSession {
        api: IgclApi,
        handle: Handle,
        output: Handle,
    }

    // SAFETY: the session handles are only used under the driver's session lock.
    unsafe impl Send for IgclSession {}

    impl fmt::Debug for IgclSession {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("IgclSession")
                .field("library", &self.api.library.name())
                .field("output", &self.output)
                .finish()
        }
    }

    impl IgclSession {
        fn open(api: IgclApi) -> Result<Self> {
            let mut args = CtlInitArgs::new();
            let mut handle = ptr::null_mut();
            check_setup("ctlInit", unsafe { (api.init)(&mut args, &mut handle) })?;
            if handle.is_null() {
                return Err(Error::init(BACKEND, "ctlInit returned no handle"));
            }
            // From here on Drop closes the session
            let mut session = Self {
                api,
                handle,
                output: ptr::null_mut(),
            };

            let adapters =
                session
                    .api
                    .enumerate("ctlEnumerateDevices", session.api.enumerate_devices, handle)?;
            let Some(&adapter) = adapters.first() else {
                debug!("{}: no adapters", BACKEND);
                return Err(Error::NoDriver);
            };
            let outputs = session.api.enumerate(
                "ctlEnumerateDisplayOutputs",
                session.api.enumerate_outputs,
                adapter,
            )?;
            let Some(&output) = outputs.first() else {
                debug!("{}: no display outputs on first adapter", BACKEND);
                return Err(Error::NoDriver);
            };
            debug!(
                "{}: {} adapter(s), {} output(s) on the first",
                BACKEND,
                adapters.len(),
                outputs.len()
            );
            session.output = output;
            Ok(session)
        }

        fn aux(&self, op: &'static str, args: &mut CtlAuxAccessArgs) -> Result<()> {
            let code = unsafe { (self.api.aux_access)(self.output, args) };
            check_transfer(op, code).inspect_err(|e| debug!("{}", e))
        }

        fn i2c(&self, op: &'static str, args: &mut CtlI2cAccessArgs) -> Result<()> {
            let code = unsafe { (self.api.i2c_access)(self.output, args) };
            check_transfer(op, code).inspect_err(|e| debug!("{}", e))
        }

        fn read_dpcd(&self, address: u32, len: usize) -> Result<Vec<u8>> {
            let mut args = CtlAuxAccessArgs::new(CTL_OPERATION_TYPE_READ, address, len);
            self.aux("ReadDPCD", &mut args)?;
            Ok(args.data[..len].to_vec())
        }

        fn write_dpcd(&self, address: u32, data: &[u8]) -> Result<()> {
            let mut args = CtlAuxAccessArgs::new(CTL_OPERATION_TYPE_WRITE, address, data.len());
            args.data[..data.len()].copy_from_slice(data);
            self.aux("WriteDPCD", &mut args)
        }

        fn read_i2c(&self, target: I2cAddress, offset: u32, len: usize) -> Result<Vec<u8>> {
            let mut args =
                CtlI2cAccessArgs::new(CTL_OPERATION_TYPE_READ, target.bus_address(), offset, len);
            self.i2c("I2CRead", &mut args)?;
            Ok(args.data[..len].to_vec())
        }

        fn write_i2c(&self, target: I2cAddress, offset: u32, data: &[u8]) -> Result<()> {
            let mut args = CtlI2cAccessArgs::new(
                CTL_OPERATION_TYPE_WRITE,
                target.bus_address(),
                offset,
                data.len(),
            );
            args.data[..data.len()].copy_from_slice(data);
            self.i2c("I2CWrite", &mut args)
        }
    }

    impl Drop for IgclSession {
        fn drop(&mut self) {
            let code = unsafe { (self.api.close)(self.handle) };
            if !CtlResult::from_code(code).is_success() {
                debug!("ctlClose: {}", CtlResult::from_code(code));
            }
        }
    }

    #[derive(Debug)]
    struct IgclDriver {
        session: Session<IgclSession>,
    }

    impl Driver for IgclDriver {
        fn name(&self) -> &str {
            NAME
        }

        fn read_dpcd(&self, address: u32, length: u32) -> Result<Vec<u8>> {
            transaction::require_dpcd_length(length)?;
            self.session.with(|s| {
                transaction::read_chunked(BACKEND, "ReadDPCD", address, length, AUX_CHUNK, |chunk| {
                    s.read_dpcd(chunk.address, chunk.len())
                })
            })
        }

        fn write_dpcd(&self, address: u32, data: &[u8]) -> Result<()> {
            if data.is_empty() {
                return Ok(());
            }
            self.session.with(|s| {
                transaction::write_chunked(address, data, AUX_CHUNK, |chunk, bytes| {
                    s.write_dpcd(chunk.address, bytes)
                })
            })
        }

        fn read_i2c(&self, address: u32, length: u32) -> Result<Vec<u8>> {
            if length == 0 {
                return Ok(Vec::new());
            }
            let target = I2cAddress::decode(address);
            self.session.with(|s| {
                transaction::read_chunked(
                    BACKEND,
                    "I2CRead",
                    target.register,
                    length,
                    I2C_CHUNK,
                    |chunk| s.read_i2c(target, chunk.address, chunk.len()),
                )
            })
        }

        fn write_i2c(&self, address: u32, data: &[u8]) -> Result<()> {
            if data.is_empty() {
                return Ok(());
            }
            let target = I2cAddress::decode(address);
            self.session.with(|s| {
                transaction::write_chunked(target.register, data, I2C_CHUNK, |chunk, bytes| {
                    s.write_i2c(target, chunk.address, bytes)
                })
            })
        }

        fn close(&self) {
            self.session.close();
        }
    }

    pub fn probe() -> Result<SharedDriver> {
        let Some(api) = IgclApi::load()? else {
            return Err(Error::NoDriver);
        };
        let session = IgclSession::open(api)?;
        info!("using {}", NAME);
        Ok(Arc::new(IgclDriver {
            session: Session::new(BACKEND, session),
        }))
    }
}

#[cfg(windows)]
pub use imp::probe;

#[cfg(not(windows))]
pub fn probe() -> Result<SharedDriver> {
    debug!("{}: {} is Windows-only", BACKEND, LIBRARY);
    Err(Error::NoDriver)
}

#[cfg(test)]
mod tests {
    use std::mem::{offset_of, size_of};

    use super::*;

    #[test]
    fn test_struct_layouts() {
        assert_eq!(size_of::<Guid>(), 16);
        assert_eq!(size_of::<CtlInitArgs>(), 36);
        assert_eq!(offset_of!(CtlInitArgs, application_uid), 20);

        assert_eq!(offset_of!(CtlAuxAccessArgs, rad), 24);
        assert_eq!(offset_of!(CtlAuxAccessArgs, data), 40);
        assert_eq!(size_of::<CtlAuxAccessArgs>(), 176);

        assert_eq!(offset_of!(CtlI2cAccessArgs, rad), 32);
        assert_eq!(offset_of!(CtlI2cAccessArgs, data), 40);
        assert_eq!(size_of::<CtlI2cAccessArgs>(), 168);
    }

    #[test]
    fn test_request_setup() {
        let aux = CtlAuxAccessArgs::new(CTL_OPERATION_TYPE_READ, 0x202, 16);
        assert_eq!(aux.size as usize, size_of::<CtlAuxAccessArgs>());
        assert_eq!(aux.flags, CTL_AUX_FLAG_NATIVE_AUX);
        assert_eq!(aux.data_size, 16);

        let i2c = CtlI2cAccessArgs::new(CTL_OPERATION_TYPE_WRITE, 0xA0, 0x10, 4);
        assert_eq!(i2c.address, 0xA0);
        assert_eq!(i2c.flags, CTL_I2C_FLAG_1BYTE_INDEX);
        assert_eq!(
            CtlI2cAccessArgs::new(CTL_OPERATION_TYPE_READ, 0xA0, 0x1FF, 1).flags,
            CTL_I2C_FLAG_2BYTE_INDEX
        );

        assert_eq!(CtlInitArgs::new().app_version, 0x0001_0001);
    }

    #[test]
    fn test_result_table() {
        assert!(CtlResult::from_code(0).is_success());
        assert!(CtlResult::from_code(1).is_success());
        assert_eq!(CtlResult::from_code(0x4000_0007), CtlResult::NotAvailable);
        assert_eq!(CtlResult::from_code(0x4400_0004), CtlResult::DisplayNotActive);
        assert_eq!(
            CtlResult::from_code(0x4000_1234),
            CtlResult::Unknown(0x4000_1234)
        );
        assert_eq!(
            CtlResult::Unknown(0x4000_1234).to_string(),
            "unknown result 0x40001234"
        );
    }

    #[test]
    fn test_result_mapping() {
        assert!(check_transfer("ReadDPCD", 0).is_ok());

        let err = check_transfer("ReadDPCD", 0x4400_0003).unwrap_err();
        assert_eq!(
            err.to_string(),
            "intel igcl: ReadDPCD: display not attached (0x44000003)"
        );
        assert_eq!(err.kind(), crate::ErrorKind::Transport);

        let err = check_setup("ctlInit", 0x4000_0009).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Construction);
        assert_eq!(
            err.to_string(),
            "intel igcl: ctlInit: unsupported version (0x40000009)"
        );
    }

    #[cfg(not(windows))]
    #[test]
    fn test_probe_not_applicable_off_windows() {
        assert!(probe().unwrap_err().is_not_applicable());
    }
}
