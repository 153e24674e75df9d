//! The single error kind surfaced by the binding.
//!
//! Every failing native call becomes an [`Error`] carrying the raw status code
//! and the resource manager's own description of it. No local taxonomy is
//! layered on top; match on [`Error::code`] against the constants in
//! [`status`] when a caller needs to tell failures apart.

use thiserror::Error;

/// Result type alias for binding operations
pub type Result<T> = std::result::Result<T, Error>;

/// A non-success status returned by the resource manager
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("scard: {message}")]
pub struct Error {
    code: u32,
    message: String,
}

impl Error {
    /// Wrap a raw status code together with its native description
    pub fn new(code: u32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Raw status code as returned by the native call
    pub const fn code(&self) -> u32 {
        self.code
    }

    /// Native description of the status code
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Whether this error carries the given status code
    pub const fn is(&self, code: u32) -> bool {
        self.code == code
    }
}

/// Native status codes the binding itself compares against.
///
/// Values come straight from the native header.
pub mod status {
    use pcsc_sys as ffi;

    /// No error was encountered
    pub const SUCCESS: u32 = ffi::SCARD_S_SUCCESS as u32;
    /// The supplied handle was invalid
    pub const INVALID_HANDLE: u32 = ffi::SCARD_E_INVALID_HANDLE as u32;
    /// One or more of the supplied parameters could not be properly interpreted
    pub const INVALID_PARAMETER: u32 = ffi::SCARD_E_INVALID_PARAMETER as u32;
    /// The action was cancelled by an SCardCancel request
    pub const CANCELLED: u32 = ffi::SCARD_E_CANCELLED as u32;
    /// The user-specified timeout value has expired
    pub const TIMEOUT: u32 = ffi::SCARD_E_TIMEOUT as u32;
    /// The data buffer to receive returned data is too small
    pub const INSUFFICIENT_BUFFER: u32 = ffi::SCARD_E_INSUFFICIENT_BUFFER as u32;
    /// Cannot find a smart card reader
    pub const NO_READERS_AVAILABLE: u32 = ffi::SCARD_E_NO_READERS_AVAILABLE as u32;
    /// The specified reader name is not recognized
    pub const UNKNOWN_READER: u32 = ffi::SCARD_E_UNKNOWN_READER as u32;
    /// The operation requires a smart card, but no smart card is in the device
    pub const NO_SMARTCARD: u32 = ffi::SCARD_E_NO_SMARTCARD as u32;
    /// The smart card cannot be accessed because of other outstanding connections
    pub const SHARING_VIOLATION: u32 = ffi::SCARD_E_SHARING_VIOLATION as u32;
    /// The requested protocols are incompatible with the protocol currently in use
    pub const PROTO_MISMATCH: u32 = ffi::SCARD_E_PROTO_MISMATCH as u32;
    /// The smart card has been reset, so any shared state information is invalid
    pub const RESET_CARD: u32 = ffi::SCARD_W_RESET_CARD as u32;
    /// The smart card has been removed, so further communication is not possible
    pub const REMOVED_CARD: u32 = ffi::SCARD_W_REMOVED_CARD as u32;
    /// The Smart card resource manager is not running
    pub const NO_SERVICE: u32 = ffi::SCARD_E_NO_SERVICE as u32;
    /// The requested attribute is not supported
    pub const UNSUPPORTED_FEATURE: u32 = ffi::SCARD_E_UNSUPPORTED_FEATURE as u32;
}
