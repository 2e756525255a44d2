// SPDX-License-Identifier: GPL-3.0-only
//! Intel Graphics Command Center interface object (`Igfxext.CUIExternal`)
//!
//! The control-panel COM server exposes AUX access through undocumented
//! virtual-table slots. Each AUX slot takes a fixed 0x94-byte request blob
//! and an [`AuxIo`] block describing the transfer; the call returns an
//! `HRESULT` and writes a device error code.

#![cfg_attr(not(windows), allow(dead_code))]

use std::time::Duration;

use crate::driver::SharedDriver;
use crate::error::{AuxError, Error, Result, TransportFault};
use crate::transaction::I2cAddress;

use super::Guid;

pub const KEY: &str = "intel-cui";
pub const NAME: &str = "Intel Graphics Command Center";
const BACKEND: &str = "intel igfx";

const PROG_ID: &str = "Igfxext.CUIExternal";
/// `ICUIExternalX`
pub(crate) const IID_CUI_EXTERNAL: Guid = Guid::from_u128(0xF932C038_6484_45CA_8FA1_7C8C279F7AEE);

const SLOT_RELEASE: usize = 2;
const SLOT_ACQUIRE_DISPLAY: usize = 12;
const SLOT_AUX_READ: usize = 43;
const SLOT_AUX_WRITE: usize = 44;

const REGDB_E_CLASSNOTREG: u32 = 0x8004_0154;
/// `HRESULT_FROM_WIN32(ERROR_FILE_NOT_FOUND)`, no display on that output
const E_NO_DISPLAY: u32 = 0x8007_0002;
/// Status seeded into the acquisition call
const ACQUIRE_STATUS_SEED: i32 = 0x2000_0000;
const CLSCTX_ALL: u32 = 0x1 | 0x2 | 0x4 | 0x10;

const OP_I2C_WRITE: i32 = 0;
const OP_I2C_READ_LAST: i32 = 1;
const OP_I2C_READ_MORE: i32 = 5;
const OP_DPCD_WRITE: i32 = 8;
const OP_DPCD_READ: i32 = 9;

/// Largest transfer of one AUX slot call
const MAX_CHUNK: u32 = 16;
/// I2C register offsets on this path are a single byte
const I2C_REGISTER_SPACE: u32 = 0x100;
const IO_BUF_LEN: usize = 0x84;
const REQUEST_BLOB_LEN: usize = 0x94;

/// Request blob passed unchanged to every AUX slot call
static REQUEST_BLOB: [u8; REQUEST_BLOB_LEN] = {
    let mut blob = [0u8; REQUEST_BLOB_LEN];
    let header = [
        0x6C, 0x81, 0xB9, 0xBF, 0xB0, 0xAE, 0x4B, 0x43, 0x99, 0xF3, 0x0F, 0x94, 0xE6, 0xBE, 0xBF,
        0x0D,
    ];
    let mut i = 0;
    while i < header.len() {
        blob[i] = header[i];
        i += 1;
    }
    blob
};

/// Transfer block shared by the AUX read and write slots
#[repr(C)]
#[derive(Clone)]
pub(crate) struct AuxIo {
    display: i32,
    /// Operation code in; the read slot echoes a status byte back here
    op: i32,
    len: i32,
    address: i32,
    buf: [u8; IO_BUF_LEN],
}

impl AuxIo {
    fn new(display: i32, op: i32, len: usize, address: u32) -> Self {
        Self {
            display,
            op,
            len: len as i32,
            // The slot takes the raw 32-bit address
            address: address as i32,
            buf: [0; IO_BUF_LEN],
        }
    }

    fn with_payload(mut self, data: &[u8]) -> Self {
        self.buf[..data.len()].copy_from_slice(data);
        self
    }

    fn payload(&self, len: usize) -> Vec<u8> {
        self.buf[..len].to_vec()
    }
}

/// Decode the outcome of one AUX slot call
fn check_aux(op: &'static str, hresult: i32, device_error: i32) -> Result<()> {
    if hresult >= 0 && device_error == 0 {
        return Ok(());
    }
    Err(Error::transport(
        BACKEND,
        op,
        TransportFault::Aux {
            error: AuxError::from_code(device_error),
            hresult: (hresult < 0).then_some(hresult as u32),
        },
    ))
}

/// The read slot must leave the DPCD read op code in place
fn check_read_status(io: &AuxIo) -> Result<()> {
    if io.op != OP_DPCD_READ {
        return Err(Error::transport(
            BACKEND,
            "ReadDPCD",
            TransportFault::UnexpectedStatusByte(io.op),
        ));
    }
    Ok(())
}

/// An I2C read must stay within the one-byte register space
fn check_i2c_window(target: I2cAddress, length: usize) -> Result<()> {
    let max = I2C_REGISTER_SPACE.saturating_sub(target.register) as usize;
    if length > max {
        return Err(Error::InvalidLength {
            op: "i2c read",
            len: length,
            max,
        });
    }
    Ok(())
}

#[cfg(windows)]
mod imp {
    use std::ffi::c_void;
    use std::ptr;
    use std::sync::Arc;
    use std::time::Duration;

    use once_cell::sync::OnceCell;

    use super::*;
    use crate::backends::native::{self, Library};
    use crate::driver::{Driver, Session};
    use crate::transaction::{self, ChunkPlan, I2cAddress};

    type CoInitializeExFn = unsafe extern "system" fn(*const c_void, u32) -> i32;
    type ClsidFromProgIdFn = unsafe extern "system" fn(*const u16, *mut Guid) -> i32;
    type CoCreateInstanceFn =
        unsafe extern "system" fn(*const Guid, *mut c_void, u32, *const Guid, *mut *mut c_void) -> i32;
    type SysAllocStringFn = unsafe extern "system" fn(*const u16) -> *mut u16;
    type SysFreeStringFn = unsafe extern "system" fn(*mut u16);

    type ReleaseFn = unsafe extern "system" fn(*mut c_void) -> u32;
    type AcquireDisplayFn =
        unsafe extern "system" fn(*mut c_void, *mut u16, u32, *mut i32, *mut i32, *mut i32) -> i32;
    type AuxSlotFn = unsafe extern "system" fn(*mut c_void, *const u8, usize, *mut AuxIo, *mut i32) -> i32;

    const COINIT_APARTMENTTHREADED: u32 = 0x2;

    /// COM runtime entry points, resolved once per process
    struct ComApi {
        _ole32: Library,
        _oleaut32: Library,
        co_initialize_ex: CoInitializeExFn,
        clsid_from_prog_id: ClsidFromProgIdFn,
        co_create_instance: CoCreateInstanceFn,
        sys_alloc_string: SysAllocStringFn,
        sys_free_string: SysFreeStringFn,
    }

    static COM_API: OnceCell<std::result::Result<ComApi, Error>> = OnceCell::new();

    impl ComApi {
        fn get() -> Result<&'static ComApi> {
            COM_API.get_or_init(ComApi::load).as_ref().map_err(Clone::clone)
        }

        fn load() -> Result<Self> {
            let ole32 = Library::open("ole32.dll")
                .ok_or_else(|| Error::init(BACKEND, "load ole32.dll failed"))?;
            let oleaut32 = Library::open("oleaut32.dll")
                .ok_or_else(|| Error::init(BACKEND, "load oleaut32.dll failed"))?;

            fn missing(name: &str) -> Error {
                Error::init(BACKEND, format!("{name} not found"))
            }

            unsafe {
                Ok(Self {
                    co_initialize_ex: ole32
                        .symbol("CoInitializeEx")
                        .ok_or_else(|| missing("CoInitializeEx"))?,
                    clsid_from_prog_id: ole32
                        .symbol("CLSIDFromProgID")
                        .ok_or_else(|| missing("CLSIDFromProgID"))?,
                    co_create_instance: ole32
                        .symbol("CoCreateInstance")
                        .ok_or_else(|| missing("CoCreateInstance"))?,
                    sys_alloc_string: oleaut32
                        .symbol("SysAllocString")
                        .ok_or_else(|| missing("SysAllocString"))?,
                    sys_free_string: oleaut32
                        .symbol("SysFreeString")
                        .ok_or_else(|| missing("SysFreeString"))?,
                    _ole32: ole32,
                    _oleaut32: oleaut32,
                })
            }
        }
    }

    /// Owned reference to the interface object, released once on drop
    struct CuiInterface {
        api: &'static ComApi,
        object: *mut c_void,
    }

    impl CuiInterface {
        fn create(api: &'static ComApi) -> Result<Self> {
            // S_FALSE and RPC_E_CHANGED_MODE both leave COM usable on this thread
            let _ = unsafe { (api.co_initialize_ex)(ptr::null(), COINIT_APARTMENTTHREADED) };

            let prog_id = native::wide(PROG_ID);
            let mut clsid = Guid::default();
            let hr = unsafe { (api.clsid_from_prog_id)(prog_id.as_ptr(), &mut clsid) };
            if hr < 0 {
                return Err(creation_error("CLSIDFromProgID", hr));
            }

            let mut object = ptr::null_mut();
            let hr = unsafe {
                (api.co_create_instance)(
                    &clsid,
                    ptr::null_mut(),
                    CLSCTX_ALL,
                    &IID_CUI_EXTERNAL,
                    &mut object,
                )
            };
            if hr < 0 || object.is_null() {
                return Err(creation_error("CoCreateInstance", hr));
            }
            Ok(Self { api, object })
        }

        /// Function stored in virtual-table slot `index`
        unsafe fn slot<F: Copy>(&self, index: usize) -> Result<F> {
            let vtable = unsafe { *(self.object as *const *const *const c_void) };
            if vtable.is_null() {
                return Err(Error::init(BACKEND, "interface has no vtable"));
            }
            unsafe { native::function(*vtable.add(index)) }
                .ok_or_else(|| Error::init(BACKEND, format!("vtable slot {index} is null")))
        }

        fn acquire_display(&self, adapter: &str, output: u32) -> Result<i32> {
            let acquire: AcquireDisplayFn = unsafe { self.slot(SLOT_ACQUIRE_DISPLAY)? };
            let name = native::wide(adapter);
            let bstr = unsafe { (self.api.sys_alloc_string)(name.as_ptr()) };
            if bstr.is_null() {
                return Err(Error::init(BACKEND, "SysAllocString failed"));
            }

            let mut display = 0;
            let mut status = ACQUIRE_STATUS_SEED;
            let mut code = 0;
            let hr = unsafe {
                acquire(self.object, bstr, output, &mut display, &mut status, &mut code)
            };
            unsafe { (self.api.sys_free_string)(bstr) };

            if hr < 0 {
                let reason = if hr as u32 == E_NO_DISPLAY {
                    "no display on output".to_string()
                } else {
                    format!("AcquireDisplay failed: 0x{:08X}", hr as u32)
                };
                return Err(Error::init(BACKEND, reason));
            }
            Ok(display)
        }

        fn call_aux(&self, slot: usize, op: &'static str, io: &mut AuxIo) -> Result<()> {
            let aux: AuxSlotFn = unsafe { self.slot(slot)? };
            let mut device_error = 0;
            let hr = unsafe {
                aux(
                    self.object,
                    REQUEST_BLOB.as_ptr(),
                    REQUEST_BLOB.len(),
                    io,
                    &mut device_error,
                )
            };
            if let Err(e) = check_aux(op, hr, device_error) {
                debug!("{}", e);
                return Err(e);
            }
            Ok(())
        }
    }

    impl Drop for CuiInterface {
        fn drop(&mut self) {
            if let Ok(release) = unsafe { self.slot::<ReleaseFn>(SLOT_RELEASE) } {
                unsafe { release(self.object) };
            }
        }
    }

    fn creation_error(call: &str, hr: i32) -> Error {
        if hr as u32 == REGDB_E_CLASSNOTREG {
            debug!("{} not registered", PROG_ID);
            return Error::NoDriver;
        }
        Error::init(BACKEND, format!("{call} failed: 0x{:08X}", hr as u32))
    }

    /// Interface object bound to one acquired display
    struct CuiSession {
        interface: CuiInterface,
        display: i32,
        i2c_write_delay: Duration,
    }

    // SAFETY: the interface pointer is only used under the driver's session
    // lock, and the COM server is free-threaded for these calls.
    unsafe impl Send for CuiSession {}

    impl CuiSession {
        fn read_dpcd(&self, address: u32, len: usize) -> Result<Vec<u8>> {
            let mut io = AuxIo::new(self.display, OP_DPCD_READ, len, address);
            self.interface.call_aux(SLOT_AUX_READ, "ReadDPCD", &mut io)?;
            check_read_status(&io)?;
            Ok(io.payload(len))
        }

        fn write_dpcd(&self, address: u32, data: &[u8]) -> Result<()> {
            let mut io = AuxIo::new(self.display, OP_DPCD_WRITE, data.len(), address).with_payload(data);
            self.interface.call_aux(SLOT_AUX_WRITE, "WriteDPCD", &mut io)
        }

        fn i2c_read(&self, target: I2cAddress, length: usize) -> Result<Vec<u8>> {
            check_i2c_window(target, length)?;
            let mut result = Vec::with_capacity(length);
            for chunk in ChunkPlan::new(target.register, length, MAX_CHUNK)? {
                let mut setup = AuxIo::new(self.display, OP_I2C_WRITE, 1, target.bus_address())
                    .with_payload(&[chunk.address as u8]);
                self.interface.call_aux(SLOT_AUX_WRITE, "I2C setup", &mut setup)?;

                let op = if chunk.last { OP_I2C_READ_LAST } else { OP_I2C_READ_MORE };
                let mut io = AuxIo::new(self.display, op, chunk.len(), target.bus_address());
                self.interface.call_aux(SLOT_AUX_READ, "I2C read", &mut io)?;
                result.extend_from_slice(&io.payload(chunk.len()));
            }
            Ok(result)
        }

        fn i2c_write(&self, target: I2cAddress, value: u8) -> Result<()> {
            let mut io =
                AuxIo::new(self.display, OP_I2C_WRITE, 1, target.bus_address()).with_payload(&[value]);
            self.interface.call_aux(SLOT_AUX_WRITE, "I2CWrite", &mut io)?;
            if !self.i2c_write_delay.is_zero() {
                std::thread::sleep(self.i2c_write_delay);
            }
            Ok(())
        }
    }

    /// First (adapter, output) pair the interface accepts
    fn acquire_first_display(interface: &CuiInterface) -> Option<i32> {
        for adapter in native::adapters() {
            if !adapter.active || adapter.name.is_empty() {
                continue;
            }
            let outputs = native::outputs(&adapter.name);
            // An adapter listing no outputs is still tried at index 0
            let candidates: Vec<u32> = if outputs.is_empty() {
                vec![0]
            } else {
                outputs
                    .iter()
                    .enumerate()
                    .filter(|(_, output)| output.active)
                    .map(|(index, _)| index as u32)
                    .collect()
            };
            for output in candidates {
                match interface.acquire_display(&adapter.name, output) {
                    Ok(display) => {
                        debug!("acquired {} output {} as display {}", adapter.name, output, display);
                        return Some(display);
                    }
                    Err(e) => debug!("{} output {}: {}", adapter.name, output, e),
                }
            }
        }
        None
    }

    #[derive(Debug)]
    struct CuiDriver {
        session: Session<CuiSession>,
    }

    impl std::fmt::Debug for CuiSession {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("CuiSession").field("display", &self.display).finish()
        }
    }

    impl Driver for CuiDriver {
        fn name(&self) -> &str {
            NAME
        }

        fn read_dpcd(&self, address: u32, length: u32) -> Result<Vec<u8>> {
            transaction::require_dpcd_length(length)?;
            self.session.with(|s| {
                transaction::read_chunked(BACKEND, "ReadDPCD", address, length, MAX_CHUNK, |chunk| {
                    s.read_dpcd(chunk.address, chunk.len())
                })
            })
        }

        fn write_dpcd(&self, address: u32, data: &[u8]) -> Result<()> {
            if data.is_empty() {
                return Ok(());
            }
            self.session.with(|s| {
                transaction::write_chunked(address, data, MAX_CHUNK, |chunk, bytes| {
                    s.write_dpcd(chunk.address, bytes)
                })
            })
        }

        fn read_i2c(&self, address: u32, length: u32) -> Result<Vec<u8>> {
            if length == 0 {
                return Ok(Vec::new());
            }
            let target = I2cAddress::decode(address);
            self.session.with(|s| s.i2c_read(target, length as usize))
        }

        fn write_i2c(&self, address: u32, data: &[u8]) -> Result<()> {
            match data {
                [] => Ok(()),
                // The register offset is not sent; the byte goes to the slave as-is
                [value] => {
                    let target = I2cAddress::decode(address);
                    self.session.with(|s| s.i2c_write(target, *value))
                }
                _ => Err(Error::NotImplemented),
            }
        }

        fn close(&self) {
            self.session.close();
        }
    }

    pub fn probe(i2c_write_delay: Duration) -> Result<SharedDriver> {
        let api = ComApi::get()?;
        let interface = CuiInterface::create(api)?;
        let Some(display) = acquire_first_display(&interface) else {
            debug!("{}: no acquirable display", BACKEND);
            return Err(Error::NoDriver);
        };
        info!("using {} on display {}", NAME, display);
        let session = CuiSession {
            interface,
            display,
            i2c_write_delay,
        };
        Ok(Arc::new(CuiDriver {
            session: Session::new(BACKEND, session),
        }))
    }
}

#[cfg(windows)]
pub use imp::probe;

#[cfg(not(windows))]
pub fn probe(_i2c_write_delay: Duration) -> Result<SharedDriver> {
    debug!("{}: COM interface requires Windows", BACKEND);
    Err(Error::NoDriver)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_block_layout() {
        assert_eq!(std::mem::size_of::<AuxIo>(), 16 + IO_BUF_LEN);
        assert_eq!(REQUEST_BLOB.len(), 0x94);
        assert_eq!(&REQUEST_BLOB[..4], &[0x6C, 0x81, 0xB9, 0xBF]);
        assert_eq!(REQUEST_BLOB[15], 0x0D);
        assert!(REQUEST_BLOB[16..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_i2c_window() {
        assert!(check_i2c_window(I2cAddress::decode(0x0050), 0x100).is_ok());
        assert!(check_i2c_window(I2cAddress::decode(0xF050), 16).is_ok());

        // Crossing 0xFF would wrap the one-byte offset
        assert!(matches!(
            check_i2c_window(I2cAddress::decode(0xF850), 16),
            Err(Error::InvalidLength { len: 16, max: 8, .. })
        ));
        assert!(matches!(
            check_i2c_window(I2cAddress::decode(0x1_0050), 1),
            Err(Error::InvalidLength { max: 0, .. })
        ));
    }

    #[test]
    fn test_check_aux_success() {
        assert!(check_aux("ReadDPCD", 0, 0).is_ok());
        // S_FALSE is still success
        assert!(check_aux("ReadDPCD", 1, 0).is_ok());
    }

    #[test]
    fn test_check_aux_device_error() {
        let err = check_aux("ReadDPCD", 0, 70).unwrap_err();
        assert_eq!(err.to_string(), "intel igfx: ReadDPCD: AUX defer");
        assert!(matches!(
            err,
            Error::Transport {
                fault: TransportFault::Aux {
                    error: AuxError::Defer,
                    hresult: None
                },
                ..
            }
        ));
    }

    #[test]
    fn test_check_aux_failed_call() {
        let err = check_aux("WriteDPCD", 0x8000_4005u32 as i32, 0).unwrap_err();
        assert_eq!(
            err.to_string(),
            "intel igfx: WriteDPCD: AUX call failed; hr=0x80004005"
        );

        let err = check_aux("I2C read", 0x8000_4005u32 as i32, 123).unwrap_err();
        assert_eq!(
            err.to_string(),
            "intel igfx: I2C read: AUX unknown error (123); hr=0x80004005"
        );
    }

    #[test]
    fn test_read_status_byte() {
        let io = AuxIo::new(1, OP_DPCD_READ, 4, 0x100);
        assert!(check_read_status(&io).is_ok());

        let mut io = io;
        io.op = 3;
        assert!(matches!(
            check_read_status(&io),
            Err(Error::Transport {
                fault: TransportFault::UnexpectedStatusByte(3),
                ..
            })
        ));
    }

    #[test]
    fn test_payload_placement() {
        let io = AuxIo::new(1, OP_DPCD_WRITE, 3, 0x600).with_payload(&[1, 2, 3]);
        assert_eq!(io.payload(3), vec![1, 2, 3]);
        assert_eq!(io.len, 3);
        assert_eq!(io.address, 0x600);
        assert!(io.buf[3..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_interface_id() {
        assert_eq!(IID_CUI_EXTERNAL.data1, 0xF932C038);
        assert_eq!(IID_CUI_EXTERNAL.data4, [0x8F, 0xA1, 0x7C, 0x8C, 0x27, 0x9F, 0x7A, 0xEE]);
    }

    #[cfg(not(windows))]
    #[test]
    fn test_probe_not_applicable_off_windows() {
        assert!(probe(Duration::ZERO).unwrap_err().is_not_applicable());
    }
}
