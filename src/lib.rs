//! PC/SC smart card resource manager binding.
//!
//! Typed access to the native winscard interface: establish a [`Context`],
//! list readers, wait for state changes, [`Context::connect`] to a [`Card`]
//! and exchange APDUs with it. Every native status other than success comes
//! back as an [`Error`] carrying the library's own description.
//!
//! ```no_run
//! use scard::{Context, Disposition, Protocol, ShareMode};
//!
//! # fn main() -> scard::Result<()> {
//! let ctx = Context::establish()?;
//! let readers = ctx.list_readers()?;
//! if let Some(reader) = readers.first() {
//!     let card = ctx.connect(reader, ShareMode::Exclusive, Protocol::ANY)?;
//!     let rsp = card.transmit(&[0x00, 0xA4, 0x00, 0x0C, 0x02, 0x3F, 0x00])?;
//!     println!("r-apdu: {rsp:02x?}");
//!     card.disconnect(Disposition::Reset).map_err(|(_, err)| err)?;
//! }
//! # Ok(())
//! # }
//! ```
//!
//! With the `node` feature the crate also builds as a Node.js addon exposing
//! the same operations to JavaScript.
//!
//! The binding targets pcsc-lite and its error strings, so Windows builds are
//! refused.

#[cfg(windows)]
compile_error!("scard binds pcsc-lite; Windows winscard is not supported");

mod card;
mod config;
mod context;
mod error;
pub mod native;
mod types;
mod utils;

#[cfg(feature = "node")]
mod node;

pub use card::Card;
pub use config::{ConnectOptions, ContextConfig};
pub use context::{Canceller, Context};
pub use error::{status, Error, Result};
pub use native::{Pcsclite, Winscard};
pub use types::{
    attributes, CardState, CardStatus, Disposition, Protocol, ReaderState, Scope, ShareMode,
    StateFlags, Timeout, MAX_ATR_SIZE, MAX_BUFFER_SIZE_EXTENDED, MAX_CONTROL_RESPONSE,
    MAX_READERNAME, PNP_NOTIFICATION,
};
pub use utils::{native_version, version};
