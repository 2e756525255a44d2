// SPDX-License-Identifier: GPL-3.0-only
//! NVIDIA private driver interface (NVAPI)
//!
//! `nvapi64.dll` exports a single function, `nvapi_QueryInterface`, which
//! maps opaque ids to entry points. Only DPCD reads are supported; the AUX
//! control call moves at most 16 bytes at a time.

#![cfg_attr(not(windows), allow(dead_code))]

use crate::driver::SharedDriver;
use crate::error::{Error, Result, TransportFault};

pub const KEY: &str = "nvidia";
pub const NAME: &str = "NVIDIA NVAPI";
const BACKEND: &str = "nvapi";

#[cfg(target_pointer_width = "64")]
const LIBRARY: &str = "nvapi64.dll";
#[cfg(not(target_pointer_width = "64"))]
const LIBRARY: &str = "nvapi.dll";

const ID_INITIALIZE: u32 = 0x0150_E828;
const ID_UNLOAD: u32 = 0xD22B_DD7E;
const ID_ENUM_PHYSICAL_GPUS: u32 = 0xE5AC_921F;
const ID_ENUM_DISPLAY_HANDLE: u32 = 0x9ABD_D40D;
const ID_ASSOCIATED_OUTPUT_ID: u32 = 0xD995_937E;
const ID_DISPLAY_PORT_INFO: u32 = 0xC64F_F367;
const ID_ERROR_MESSAGE: u32 = 0x6C2D_048C;
const ID_DP_AUX_CHANNEL_CONTROL: u32 = 0x8EB5_6969;

const NVAPI_OK: i32 = 0;
const NVAPI_NVIDIA_DEVICE_NOT_FOUND: i32 = -6;
const NVAPI_END_ENUMERATION: i32 = -7;

/// AUX side-channel status reported for a timed out transaction
const DP_AUX_STATUS_TIMEOUT: i32 = 0xFF;

const DP_AUX_OP_READ_DPCD: u32 = 1;
const DP_AUX_MAX_PAYLOAD: u32 = 16;

const MAX_PHYSICAL_GPUS: usize = 64;
const ERROR_MESSAGE_LEN: usize = 256;

/// Connection flag in [`NvDpInfoV1::flags`]
const DP_INFO_FLAG_ACTIVE: u8 = 1 << 0;

/// `NV_DISPLAY_PORT_INFO_V1`, only the connection flag is inspected
#[repr(C)]
#[derive(Debug, Clone)]
pub(crate) struct NvDpInfoV1 {
    version: u32,
    reserved: [u8; 36],
    flags: u8,
    pad: [u8; 3],
}

impl NvDpInfoV1 {
    fn new() -> Self {
        Self {
            version: (1 << 16) | std::mem::size_of::<Self>() as u32,
            reserved: [0; 36],
            flags: 0,
            pad: [0; 3],
        }
    }

    fn is_active(&self) -> bool {
        self.flags & DP_INFO_FLAG_ACTIVE != 0
    }
}

/// Parameters of the DP AUX channel control call
#[repr(C)]
#[derive(Debug, Clone)]
pub(crate) struct NvDpAuxParamsV1 {
    version: u32,
    output_id: u32,
    op: u32,
    address: u32,
    buf: [u8; 16],
    /// Requested length minus one in; transferred length minus one out
    len_minus_1: u32,
    status: i32,
    data_lo: u64,
    data_hi: u64,
    reserved: [u8; 48],
}

impl NvDpAuxParamsV1 {
    const VERSION: u32 = 0x0001_0028;

    fn read(output_id: u32, address: u32, len: usize) -> Self {
        debug_assert!(len > 0 && len <= DP_AUX_MAX_PAYLOAD as usize);
        Self {
            version: Self::VERSION,
            output_id,
            op: DP_AUX_OP_READ_DPCD,
            address,
            buf: [0; 16],
            len_minus_1: len as u32 - 1,
            status: 0,
            data_lo: 0,
            data_hi: 0,
            reserved: [0; 48],
        }
    }

    /// Bytes the call reports as transferred, capped at `requested`
    fn payload(&self, requested: usize) -> Vec<u8> {
        let actual = (self.len_minus_1 as usize).saturating_add(1).min(requested);
        self.buf[..actual].to_vec()
    }
}

/// Classify an AUX control call from its return and side-channel status
///
/// A timeout on the side channel wins over the call status.
fn aux_fault(
    call_status: i32,
    aux_status: i32,
    describe: impl FnOnce(i32) -> String,
) -> Option<TransportFault> {
    if aux_status == DP_AUX_STATUS_TIMEOUT {
        return Some(TransportFault::AuxTimeout);
    }
    if call_status != NVAPI_OK {
        return Some(TransportFault::Status {
            code: call_status as u32,
            message: describe(call_status),
        });
    }
    if aux_status != 0 {
        return Some(TransportFault::AuxStatus(aux_status as u32));
    }
    None
}

/// Text of a NUL-terminated message buffer, `None` if empty
fn message_text(buf: &[u8]) -> Option<String> {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    let text = String::from_utf8_lossy(&buf[..end]).trim().to_string();
    (!text.is_empty()).then_some(text)
}

#[cfg(windows)]
mod imp {
    use std::ffi::c_void;
    use std::fmt;
    use std::ptr;
    use std::sync::Arc;

    use super::*;
    use crate::backends::native::{self, Library};
    use crate::driver::{Driver, Session};
    use crate::transaction;

    type Handle = *mut c_void;

    type QueryInterfaceFn = unsafe extern "C" fn(u32) -> *const c_void;
    type InitializeFn = unsafe extern "C" fn() -> i32;
    type UnloadFn = unsafe extern "C" fn() -> i32;
    type EnumPhysicalGpusFn = unsafe extern "C" fn(*mut Handle, *mut i32) -> i32;
    type EnumDisplayHandleFn = unsafe extern "C" fn(u32, *mut Handle) -> i32;
    type AssociatedOutputIdFn = unsafe extern "C" fn(Handle, *mut u32) -> i32;
    type DisplayPortInfoFn = unsafe extern "C" fn(Handle, u32, *mut NvDpInfoV1) -> i32;
    type ErrorMessageFn = unsafe extern "C" fn(i32, *mut u8) -> i32;
    type DpAuxChannelControlFn = unsafe extern "C" fn(Handle, *mut NvDpAuxParamsV1, u32) -> i32;

    /// Entry points resolved through `nvapi_QueryInterface`
    struct NvapiApi {
        library: Library,
        initialize: InitializeFn,
        unload: Option<UnloadFn>,
        enum_physical_gpus: EnumPhysicalGpusFn,
        enum_display_handle: EnumDisplayHandleFn,
        associated_output_id: AssociatedOutputIdFn,
        display_port_info: DisplayPortInfoFn,
        error_message: Option<ErrorMessageFn>,
        dp_aux_channel_control: DpAuxChannelControlFn,
    }

    impl NvapiApi {
        /// `Ok(None)` when the library is missing or too old to offer every entry point
        fn load() -> Result<Option<Self>> {
            let Some(library) = Library::open(LIBRARY) else {
                return Ok(None);
            };
            let query: QueryInterfaceFn = unsafe { library.symbol("nvapi_QueryInterface") }
                .ok_or_else(|| {
                    Error::init(BACKEND, format!("{LIBRARY} lacks nvapi_QueryInterface"))
                })?;

            fn resolve<F: Copy>(query: QueryInterfaceFn, id: u32) -> Option<F> {
                unsafe { native::function(query(id)) }
            }

            let (
                Some(initialize),
                Some(enum_physical_gpus),
                Some(enum_display_handle),
                Some(associated_output_id),
                Some(display_port_info),
                Some(dp_aux_channel_control),
            ) = (
                resolve(query, ID_INITIALIZE),
                resolve(query, ID_ENUM_PHYSICAL_GPUS),
                resolve(query, ID_ENUM_DISPLAY_HANDLE),
                resolve(query, ID_ASSOCIATED_OUTPUT_ID),
                resolve(query, ID_DISPLAY_PORT_INFO),
                resolve(query, ID_DP_AUX_CHANNEL_CONTROL),
            )
            else {
                debug!("{}: driver does not offer the required entry points", BACKEND);
                return Ok(None);
            };

            Ok(Some(Self {
                initialize,
                unload: resolve(query, ID_UNLOAD),
                enum_physical_gpus,
                enum_display_handle,
                associated_output_id,
                display_port_info,
                error_message: resolve(query, ID_ERROR_MESSAGE),
                dp_aux_channel_control,
                library,
            }))
        }

        /// Driver's description of `status`, or its hex code
        fn describe(&self, status: i32) -> String {
            let fallback = || format!("status 0x{:08X}", status as u32);
            let Some(error_message) = self.error_message else {
                return fallback();
            };
            let mut buf = [0u8; ERROR_MESSAGE_LEN];
            unsafe { error_message(status, buf.as_mut_ptr()) };
            message_text(&buf).unwrap_or_else(fallback)
        }

        fn setup_error(&self, call: &str, status: i32) -> Error {
            Error::init(
                BACKEND,
                format!("{call}: {} (0x{:08X})", self.describe(status), status as u32),
            )
        }

        fn initialize(&self) -> Result<()> {
            match unsafe { (self.initialize)() } {
                NVAPI_OK => Ok(()),
                NVAPI_NVIDIA_DEVICE_NOT_FOUND => Err(Error::NoDriver),
                status => Err(self.setup_error("NvAPI_Initialize", status)),
            }
        }

        fn physical_gpu_count(&self) -> Result<usize> {
            let mut handles = [ptr::null_mut(); MAX_PHYSICAL_GPUS];
            let mut count = 0i32;
            match unsafe { (self.enum_physical_gpus)(handles.as_mut_ptr(), &mut count) } {
                NVAPI_OK => Ok(count.max(0) as usize),
                NVAPI_NVIDIA_DEVICE_NOT_FOUND => Ok(0),
                status => Err(self.setup_error("NvAPI_EnumPhysicalGPUs", status)),
            }
        }

        fn display_handles(&self) -> Result<Vec<Handle>> {
            let mut handles = Vec::new();
            for index in 0.. {
                let mut handle = ptr::null_mut();
                match unsafe { (self.enum_display_handle)(index, &mut handle) } {
                    NVAPI_OK => handles.push(handle),
                    NVAPI_END_ENUMERATION => break,
                    status => return Err(self.setup_error("NvAPI_EnumNvidiaDisplayHandle", status)),
                }
            }
            Ok(handles)
        }

        /// First display handle whose DisplayPort output is connected
        fn find_active_display_port(&self) -> Result<Option<(Handle, u32)>> {
            for handle in self.display_handles()? {
                let mut output_id = 0;
                let status = unsafe { (self.associated_output_id)(handle, &mut output_id) };
                if status != NVAPI_OK {
                    debug!("{}: no output id for display handle: {}", BACKEND, self.describe(status));
                    continue;
                }
                let mut info = NvDpInfoV1::new();
                let status = unsafe { (self.display_port_info)(handle, output_id, &mut info) };
                if status != NVAPI_OK {
                    debug!("{}: output 0x{:X} is not DisplayPort", BACKEND, output_id);
                    continue;
                }
                if info.is_active() {
                    return Ok(Some((handle, output_id)));
                }
            }
            Ok(None)
        }
    }

    /// Initialized interface bound to one DisplayPort output
    struct NvapiSession {
        api: NvapiApi,
        display: Handle,
        output_id: u32,
    }

    // SAFETY: the display handle is only used under the driver's session lock.
    unsafe impl Send for NvapiSession {}

    impl fmt::Debug for NvapiSession {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("NvapiSession")
                .field("library", &self.api.library.name())
                .field("output_id", &self.output_id)
                .finish()
        }
    }

    impl NvapiSession {
        fn read_dpcd(&self, address: u32, len: usize) -> Result<Vec<u8>> {
            let mut params = NvDpAuxParamsV1::read(self.output_id, address, len);
            let status = unsafe {
                (self.api.dp_aux_channel_control)(
                    self.display,
                    &mut params,
                    std::mem::size_of::<NvDpAuxParamsV1>() as u32,
                )
            };
            if let Some(fault) = aux_fault(status, params.status, |s| self.api.describe(s)) {
                let err = Error::transport(BACKEND, "NvAPI_Disp_DpAuxChannelControl", fault);
                debug!("{}", err);
                return Err(err);
            }
            Ok(params.payload(len))
        }
    }

    impl Drop for NvapiSession {
        fn drop(&mut self) {
            if let Some(unload) = self.api.unload {
                unsafe { unload() };
            }
        }
    }

    #[derive(Debug)]
    struct NvapiDriver {
        session: Session<NvapiSession>,
    }

    impl Driver for NvapiDriver {
        fn name(&self) -> &str {
            NAME
        }

        fn read_dpcd(&self, address: u32, length: u32) -> Result<Vec<u8>> {
            transaction::require_dpcd_length(length)?;
            self.session.with(|s| {
                transaction::read_chunked(
                    BACKEND,
                    "ReadDPCD",
                    address,
                    length,
                    DP_AUX_MAX_PAYLOAD,
                    |chunk| s.read_dpcd(chunk.address, chunk.len()),
                )
            })
        }

        fn write_dpcd(&self, _address: u32, _data: &[u8]) -> Result<()> {
            Err(Error::NotImplemented)
        }

        fn read_i2c(&self, _address: u32, _length: u32) -> Result<Vec<u8>> {
            Err(Error::NotImplemented)
        }

        fn write_i2c(&self, _address: u32, _data: &[u8]) -> Result<()> {
            Err(Error::NotImplemented)
        }

        fn close(&self) {
            self.session.close();
        }
    }

    pub fn probe() -> Result<SharedDriver> {
        let Some(api) = NvapiApi::load()? else {
            return Err(Error::NoDriver);
        };
        api.initialize()?;
        // Initialized from here on; dropping the session unloads
        let mut session = NvapiSession {
            api,
            display: ptr::null_mut(),
            output_id: 0,
        };

        let gpus = session.api.physical_gpu_count()?;
        if gpus == 0 {
            debug!("{}: no physical GPU", BACKEND);
            return Err(Error::NoDriver);
        }
        let Some((display, output_id)) = session.api.find_active_display_port()? else {
            debug!("{}: no active DisplayPort output on {} GPU(s)", BACKEND, gpus);
            return Err(Error::NoDriver);
        };
        session.display = display;
        session.output_id = output_id;

        info!("using {} on output 0x{:X}", NAME, output_id);
        Ok(Arc::new(NvapiDriver {
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
        assert_eq!(size_of::<NvDpInfoV1>(), 44);
        assert_eq!(NvDpInfoV1::new().version, 0x0001_002C);
        assert_eq!(offset_of!(NvDpInfoV1, flags), 40);

        assert_eq!(offset_of!(NvDpAuxParamsV1, buf), 16);
        assert_eq!(offset_of!(NvDpAuxParamsV1, len_minus_1), 32);
        assert_eq!(offset_of!(NvDpAuxParamsV1, data_lo), 40);
        assert_eq!(size_of::<NvDpAuxParamsV1>(), 104);
    }

    #[test]
    fn test_read_params() {
        let params = NvDpAuxParamsV1::read(0x100, 0x202, 16);
        assert_eq!(params.version, 0x0001_0028);
        assert_eq!(params.op, DP_AUX_OP_READ_DPCD);
        assert_eq!(params.len_minus_1, 15);
    }

    #[test]
    fn test_payload_capped_at_request() {
        let mut params = NvDpAuxParamsV1::read(1, 0, 4);
        params.buf[..4].copy_from_slice(&[1, 2, 3, 4]);
        assert_eq!(params.payload(4), vec![1, 2, 3, 4]);

        // A short transfer is reported by its own length
        params.len_minus_1 = 1;
        assert_eq!(params.payload(4), vec![1, 2]);

        params.len_minus_1 = u32::MAX;
        assert_eq!(params.payload(4).len(), 4);
    }

    #[test]
    fn test_aux_fault_classification() {
        let describe = |_| "NVAPI_ERROR".to_string();

        assert!(aux_fault(NVAPI_OK, 0, describe).is_none());
        assert_eq!(
            aux_fault(NVAPI_OK, 0xFF, describe),
            Some(TransportFault::AuxTimeout)
        );
        assert_eq!(aux_fault(-1, 0xFF, describe), Some(TransportFault::AuxTimeout));
        assert_eq!(
            aux_fault(NVAPI_OK, 0x10, describe),
            Some(TransportFault::AuxStatus(0x10))
        );
        assert_eq!(
            aux_fault(-1, 0, describe),
            Some(TransportFault::Status {
                code: 0xFFFF_FFFF,
                message: "NVAPI_ERROR".to_string()
            })
        );
    }

    #[test]
    fn test_status_fault_message() {
        let fault = aux_fault(-5, 0, |_| "NVAPI_INVALID_ARGUMENT".to_string()).unwrap();
        let err = Error::transport(BACKEND, "NvAPI_Disp_DpAuxChannelControl", fault);
        assert_eq!(
            err.to_string(),
            "nvapi: NvAPI_Disp_DpAuxChannelControl: NVAPI_INVALID_ARGUMENT (0xFFFFFFFB)"
        );
    }

    #[test]
    fn test_message_text() {
        let mut buf = [0u8; 16];
        buf[..8].copy_from_slice(b" NVAPI  ");
        assert_eq!(message_text(&buf).as_deref(), Some("NVAPI"));
        assert_eq!(message_text(&[0u8; 4]), None);
        assert_eq!(message_text(b"no-nul"), Some("no-nul".to_string()));
    }

    #[test]
    fn test_connection_flag() {
        let mut info = NvDpInfoV1::new();
        assert!(!info.is_active());
        info.flags = 0b11;
        assert!(info.is_active());
    }

    #[cfg(not(windows))]
    #[test]
    fn test_probe_not_applicable_off_windows() {
        assert!(probe().unwrap_err().is_not_applicable());
    }
}
