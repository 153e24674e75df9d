//! The resource manager C ABI, seen from Rust.
//!
//! [`Winscard`] has one method per native entry point and keeps the native
//! calling convention: raw status codes come back as `u32`, output lengths are
//! written through `&mut u32`, and `None` stands in for a null destination in
//! the "query size first" calls. The slice passed as an output buffer is
//! always the capacity given to the native layer, so an implementation can
//! never be asked to write past it.
//!
//! [`Pcsclite`] forwards to pcsc-lite through `pcsc-sys`. Anything
//! else implementing the trait (a fake resource manager in tests, a proxy)
//! can back a [`Context`](crate::Context) just as well.

use pcsc_sys as ffi;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;

use crate::error::{status, Error, Result};

/// Native context handle
pub type RawContext = usize;

/// Native card handle
pub type RawCard = usize;

/// Native reader state record, owned by the caller for the duration of a wait
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawReaderState {
    /// Reader name handed to the native layer
    pub reader: CString,
    /// Current state going in
    pub current_state: u32,
    /// Event state coming out
    pub event_state: u32,
    /// ATR coming out, sized to the reported length
    pub atr: Vec<u8>,
}

/// Entry points of the native resource manager
pub trait Winscard: Send + Sync {
    /// `SCardEstablishContext`
    fn establish_context(&self, scope: u32, context: &mut RawContext) -> u32;

    /// `SCardReleaseContext`
    fn release_context(&self, context: RawContext) -> u32;

    /// `SCardIsValidContext`
    fn is_valid_context(&self, context: RawContext) -> u32;

    /// `SCardCancel`, callable while another thread waits on `context`
    fn cancel(&self, context: RawContext) -> u32;

    /// `SCardListReaders` over all groups
    fn list_readers(&self, context: RawContext, readers: Option<&mut [u8]>, len: &mut u32)
        -> u32;

    /// `SCardListReaderGroups`
    fn list_reader_groups(
        &self,
        context: RawContext,
        groups: Option<&mut [u8]>,
        len: &mut u32,
    ) -> u32;

    /// `SCardGetStatusChange`, blocking for up to `timeout` milliseconds
    fn get_status_change(
        &self,
        context: RawContext,
        timeout: u32,
        states: &mut [RawReaderState],
    ) -> u32;

    /// `SCardConnect`
    fn connect(
        &self,
        context: RawContext,
        reader: &CStr,
        share_mode: u32,
        preferred_protocols: u32,
        card: &mut RawCard,
        active_protocol: &mut u32,
    ) -> u32;

    /// `SCardReconnect`
    fn reconnect(
        &self,
        card: RawCard,
        share_mode: u32,
        preferred_protocols: u32,
        initialization: u32,
        active_protocol: &mut u32,
    ) -> u32;

    /// `SCardDisconnect`
    fn disconnect(&self, card: RawCard, disposition: u32) -> u32;

    /// `SCardBeginTransaction`
    fn begin_transaction(&self, card: RawCard) -> u32;

    /// `SCardEndTransaction`
    fn end_transaction(&self, card: RawCard, disposition: u32) -> u32;

    /// `SCardStatus`
    #[allow(clippy::too_many_arguments)]
    fn status(
        &self,
        card: RawCard,
        reader: &mut [u8],
        reader_len: &mut u32,
        state: &mut u32,
        protocol: &mut u32,
        atr: &mut [u8],
        atr_len: &mut u32,
    ) -> u32;

    /// `SCardTransmit` with the send PCI for `protocol`
    fn transmit(
        &self,
        card: RawCard,
        protocol: u32,
        send: &[u8],
        recv: &mut [u8],
        recv_len: &mut u32,
    ) -> u32;

    /// `SCardControl`; an empty `send` goes out as a null, zero-length payload
    fn control(
        &self,
        card: RawCard,
        control_code: u32,
        send: &[u8],
        recv: &mut [u8],
        returned: &mut u32,
    ) -> u32;

    /// `SCardGetAttrib`
    fn get_attrib(&self, card: RawCard, id: u32, attr: Option<&mut [u8]>, len: &mut u32) -> u32;

    /// `SCardSetAttrib`
    fn set_attrib(&self, card: RawCard, id: u32, attr: &[u8]) -> u32;

    /// Native description of a status code
    fn describe(&self, code: u32) -> String;
}

/// The system PC/SC library
#[derive(Debug, Clone, Copy, Default)]
pub struct Pcsclite;

// Entry points pcsc-lite exports that pcsc-sys does not declare.
extern "C" {
    fn pcsc_stringify_error(err: ffi::LONG) -> *const c_char;

    #[allow(non_snake_case)]
    fn SCardListReaderGroups(
        hContext: ffi::SCARDCONTEXT,
        mszGroups: *mut c_char,
        pcchGroups: *mut ffi::DWORD,
    ) -> ffi::LONG;
}

fn out_ptr<T>(buf: Option<&mut [u8]>) -> (*mut T, ffi::DWORD) {
    match buf {
        Some(buf) => (buf.as_mut_ptr().cast(), buf.len() as ffi::DWORD),
        None => (ptr::null_mut(), 0),
    }
}

const fn code(raw: ffi::LONG) -> u32 {
    raw as u32
}

impl Winscard for Pcsclite {
    fn establish_context(&self, scope: u32, context: &mut RawContext) -> u32 {
        let mut raw: ffi::SCARDCONTEXT = 0;
        let rv = unsafe {
            ffi::SCardEstablishContext(scope as ffi::DWORD, ptr::null(), ptr::null(), &mut raw)
        };
        *context = raw as RawContext;
        code(rv)
    }

    fn release_context(&self, context: RawContext) -> u32 {
        code(unsafe { ffi::SCardReleaseContext(context as ffi::SCARDCONTEXT) })
    }

    fn is_valid_context(&self, context: RawContext) -> u32 {
        code(unsafe { ffi::SCardIsValidContext(context as ffi::SCARDCONTEXT) })
    }

    fn cancel(&self, context: RawContext) -> u32 {
        code(unsafe { ffi::SCardCancel(context as ffi::SCARDCONTEXT) })
    }

    fn list_readers(
        &self,
        context: RawContext,
        readers: Option<&mut [u8]>,
        len: &mut u32,
    ) -> u32 {
        let (buf, mut raw_len) = out_ptr::<c_char>(readers);
        let rv = unsafe {
            ffi::SCardListReaders(context as ffi::SCARDCONTEXT, ptr::null(), buf, &mut raw_len)
        };
        *len = raw_len as u32;
        code(rv)
    }

    fn list_reader_groups(
        &self,
        context: RawContext,
        groups: Option<&mut [u8]>,
        len: &mut u32,
    ) -> u32 {
        let (buf, mut raw_len) = out_ptr::<c_char>(groups);
        let rv =
            unsafe { SCardListReaderGroups(context as ffi::SCARDCONTEXT, buf, &mut raw_len) };
        *len = raw_len as u32;
        code(rv)
    }

    fn get_status_change(
        &self,
        context: RawContext,
        timeout: u32,
        states: &mut [RawReaderState],
    ) -> u32 {
        let mut raw: Vec<ffi::SCARD_READERSTATE> = states
            .iter()
            .map(|state| {
                // SAFETY: the record is plain data; null pointers and zero
                // counts are its documented empty state.
                let mut rs: ffi::SCARD_READERSTATE = unsafe { std::mem::zeroed() };
                rs.szReader = state.reader.as_ptr();
                rs.dwCurrentState = state.current_state as ffi::DWORD;
                rs
            })
            .collect();

        // `raw` borrows the names in `states`, which outlive the call.
        let rv = unsafe {
            ffi::SCardGetStatusChange(
                context as ffi::SCARDCONTEXT,
                timeout as ffi::DWORD,
                raw.as_mut_ptr(),
                raw.len() as ffi::DWORD,
            )
        };

        if rv == ffi::SCARD_S_SUCCESS {
            for (state, rs) in states.iter_mut().zip(&raw) {
                let atr = rs.rgbAtr;
                let atr_len = (rs.cbAtr as usize).min(atr.len());
                state.event_state = rs.dwEventState as u32;
                state.atr = atr[..atr_len].to_vec();
            }
        }
        code(rv)
    }

    fn connect(
        &self,
        context: RawContext,
        reader: &CStr,
        share_mode: u32,
        preferred_protocols: u32,
        card: &mut RawCard,
        active_protocol: &mut u32,
    ) -> u32 {
        let mut handle: ffi::SCARDHANDLE = 0;
        let mut protocol: ffi::DWORD = 0;
        let rv = unsafe {
            ffi::SCardConnect(
                context as ffi::SCARDCONTEXT,
                reader.as_ptr(),
                share_mode as ffi::DWORD,
                preferred_protocols as ffi::DWORD,
                &mut handle,
                &mut protocol,
            )
        };
        *card = handle as RawCard;
        *active_protocol = protocol as u32;
        code(rv)
    }

    fn reconnect(
        &self,
        card: RawCard,
        share_mode: u32,
        preferred_protocols: u32,
        initialization: u32,
        active_protocol: &mut u32,
    ) -> u32 {
        let mut protocol: ffi::DWORD = 0;
        let rv = unsafe {
            ffi::SCardReconnect(
                card as ffi::SCARDHANDLE,
                share_mode as ffi::DWORD,
                preferred_protocols as ffi::DWORD,
                initialization as ffi::DWORD,
                &mut protocol,
            )
        };
        *active_protocol = protocol as u32;
        code(rv)
    }

    fn disconnect(&self, card: RawCard, disposition: u32) -> u32 {
        code(unsafe { ffi::SCardDisconnect(card as ffi::SCARDHANDLE, disposition as ffi::DWORD) })
    }

    fn begin_transaction(&self, card: RawCard) -> u32 {
        code(unsafe { ffi::SCardBeginTransaction(card as ffi::SCARDHANDLE) })
    }

    fn end_transaction(&self, card: RawCard, disposition: u32) -> u32 {
        code(unsafe {
            ffi::SCardEndTransaction(card as ffi::SCARDHANDLE, disposition as ffi::DWORD)
        })
    }

    fn status(
        &self,
        card: RawCard,
        reader: &mut [u8],
        reader_len: &mut u32,
        state: &mut u32,
        protocol: &mut u32,
        atr: &mut [u8],
        atr_len: &mut u32,
    ) -> u32 {
        let mut raw_reader_len = reader.len() as ffi::DWORD;
        let mut raw_atr_len = atr.len() as ffi::DWORD;
        let mut raw_state: ffi::DWORD = 0;
        let mut raw_protocol: ffi::DWORD = 0;
        let rv = unsafe {
            ffi::SCardStatus(
                card as ffi::SCARDHANDLE,
                reader.as_mut_ptr().cast(),
                &mut raw_reader_len,
                &mut raw_state,
                &mut raw_protocol,
                atr.as_mut_ptr().cast(),
                &mut raw_atr_len,
            )
        };
        *reader_len = raw_reader_len as u32;
        *atr_len = raw_atr_len as u32;
        *state = raw_state as u32;
        *protocol = raw_protocol as u32;
        code(rv)
    }

    fn transmit(
        &self,
        card: RawCard,
        protocol: u32,
        send: &[u8],
        recv: &mut [u8],
        recv_len: &mut u32,
    ) -> u32 {
        let send_pci = ffi::SCARD_IO_REQUEST {
            dwProtocol: protocol as ffi::DWORD,
            cbPciLength: std::mem::size_of::<ffi::SCARD_IO_REQUEST>() as ffi::DWORD,
        };
        let mut recv_pci = ffi::SCARD_IO_REQUEST {
            dwProtocol: protocol as ffi::DWORD,
            cbPciLength: send_pci.cbPciLength,
        };
        let mut raw_len = recv.len() as ffi::DWORD;
        let rv = unsafe {
            ffi::SCardTransmit(
                card as ffi::SCARDHANDLE,
                &send_pci,
                send.as_ptr().cast(),
                send.len() as ffi::DWORD,
                &mut recv_pci,
                recv.as_mut_ptr().cast(),
                &mut raw_len,
            )
        };
        *recv_len = raw_len as u32;
        code(rv)
    }

    fn control(
        &self,
        card: RawCard,
        control_code: u32,
        send: &[u8],
        recv: &mut [u8],
        returned: &mut u32,
    ) -> u32 {
        let send_ptr = if send.is_empty() {
            ptr::null()
        } else {
            send.as_ptr().cast()
        };
        let mut raw_returned: ffi::DWORD = 0;
        let rv = unsafe {
            ffi::SCardControl(
                card as ffi::SCARDHANDLE,
                control_code as ffi::DWORD,
                send_ptr,
                send.len() as ffi::DWORD,
                recv.as_mut_ptr().cast(),
                recv.len() as ffi::DWORD,
                &mut raw_returned,
            )
        };
        *returned = raw_returned as u32;
        code(rv)
    }

    fn get_attrib(&self, card: RawCard, id: u32, attr: Option<&mut [u8]>, len: &mut u32) -> u32 {
        let (buf, mut raw_len) = out_ptr::<u8>(attr);
        let rv = unsafe {
            ffi::SCardGetAttrib(card as ffi::SCARDHANDLE, id as ffi::DWORD, buf, &mut raw_len)
        };
        *len = raw_len as u32;
        code(rv)
    }

    fn set_attrib(&self, card: RawCard, id: u32, attr: &[u8]) -> u32 {
        code(unsafe {
            ffi::SCardSetAttrib(
                card as ffi::SCARDHANDLE,
                id as ffi::DWORD,
                attr.as_ptr().cast(),
                attr.len() as ffi::DWORD,
            )
        })
    }

    fn describe(&self, code: u32) -> String {
        let text = unsafe { pcsc_stringify_error(code as ffi::LONG) };
        if text.is_null() {
            return format!("status 0x{code:08X}");
        }
        // The library returns a static (or thread-local) string; copy it out.
        unsafe { CStr::from_ptr(text) }.to_string_lossy().into_owned()
    }
}

/// Turn a raw status into `Ok` or the native error for it
pub(crate) fn check<N: Winscard + ?Sized>(native: &N, rv: u32) -> Result<()> {
    if rv == status::SUCCESS {
        Ok(())
    } else {
        Err(Error::new(rv, native.describe(rv)))
    }
}

/// Error for a status the binding raises itself before reaching the native layer
pub(crate) fn error_for<N: Winscard + ?Sized>(native: &N, rv: u32) -> Error {
    Error::new(rv, native.describe(rv))
}

/// Run a native call twice: once with a null destination to learn the size,
/// then into a buffer of exactly that size.
///
/// The result is trimmed to the length reported by the second call. A reported
/// size of zero leaves nothing to fetch, so the second call is skipped.
pub(crate) fn fetch_sized<N, F>(native: &N, mut call: F) -> Result<Vec<u8>>
where
    N: Winscard + ?Sized,
    F: FnMut(Option<&mut [u8]>, &mut u32) -> u32,
{
    let mut needed = 0u32;
    check(native, call(None, &mut needed))?;
    if needed == 0 {
        return Ok(Vec::new());
    }

    let mut buf = vec![0u8; needed as usize];
    let mut len = needed;
    check(native, call(Some(buf.as_mut_slice()), &mut len))?;
    buf.truncate(len as usize);
    Ok(buf)
}
