//! Typed views of the native enumerations, bitmasks and records.
//!
//! Every numeric value is taken from the native header so masks can be handed
//! to the resource manager unchanged.

use bitflags::bitflags;
use pcsc_sys as ffi;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Largest ATR a card may report
pub const MAX_ATR_SIZE: usize = 33;

/// Largest reader name the resource manager hands out, excluding the terminator
pub const MAX_READERNAME: usize = 128;

/// Largest extended APDU: header, Lc, data, Le and status word
pub const MAX_BUFFER_SIZE_EXTENDED: usize = 4 + 3 + (1 << 16) + 3 + 2;

/// Receive capacity used for reader control responses
pub const MAX_CONTROL_RESPONSE: usize = 0xFFFF;

/// Reserved reader name that makes a status change wait report reader
/// arrival and removal
pub const PNP_NOTIFICATION: &str = "\\\\?PnP?\\Notification";

/// Scope of a resource manager context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// Operations are performed in the domain of the user
    User,
    /// Operations are performed in the domain of the system
    #[default]
    System,
}

impl Scope {
    pub(crate) const fn into_raw(self) -> u32 {
        match self {
            Self::User => ffi::SCARD_SCOPE_USER as u32,
            Self::System => ffi::SCARD_SCOPE_SYSTEM as u32,
        }
    }
}

/// How a connection shares the card with other applications
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShareMode {
    /// No other application may connect to the card
    Exclusive,
    /// Other applications may connect to the card
    #[default]
    Shared,
    /// Direct access to the reader, no card required
    Direct,
}

impl ShareMode {
    pub(crate) const fn into_raw(self) -> u32 {
        match self {
            Self::Exclusive => ffi::SCARD_SHARE_EXCLUSIVE as u32,
            Self::Shared => ffi::SCARD_SHARE_SHARED as u32,
            Self::Direct => ffi::SCARD_SHARE_DIRECT as u32,
        }
    }
}

/// Action applied to the card when a connection or transaction ends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Disposition {
    /// Do nothing
    Leave,
    /// Warm reset
    Reset,
    /// Power the card down
    Unpower,
    /// Eject the card, if the reader supports it
    Eject,
}

impl Disposition {
    pub(crate) const fn into_raw(self) -> u32 {
        match self {
            Self::Leave => ffi::SCARD_LEAVE_CARD as u32,
            Self::Reset => ffi::SCARD_RESET_CARD as u32,
            Self::Unpower => ffi::SCARD_UNPOWER_CARD as u32,
            Self::Eject => ffi::SCARD_EJECT_CARD as u32,
        }
    }
}

bitflags! {
    /// Transmission protocol, either a preference mask or the negotiated one
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct Protocol: u32 {
        /// No protocol negotiated, as after a direct connection
        const UNDEFINED = ffi::SCARD_PROTOCOL_UNDEFINED as u32;
        /// T=0
        const T0 = ffi::SCARD_PROTOCOL_T0 as u32;
        /// T=1
        const T1 = ffi::SCARD_PROTOCOL_T1 as u32;
        /// Raw reader access
        const RAW = ffi::SCARD_PROTOCOL_RAW as u32;
        /// Either T=0 or T=1
        const ANY = Self::T0.bits() | Self::T1.bits();
    }
}

impl Default for Protocol {
    fn default() -> Self {
        Self::ANY
    }
}

bitflags! {
    /// Reader state bits exchanged through a status change wait
    ///
    /// pcsc-lite keeps a per-reader event counter in the upper 16 bits, see
    /// [`StateFlags::count`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct StateFlags: u32 {
        /// The current state is unknown to the application
        const UNAWARE = ffi::SCARD_STATE_UNAWARE as u32;
        /// Ignore this reader
        const IGNORE = ffi::SCARD_STATE_IGNORE as u32;
        /// The state differs from the current state passed in
        const CHANGED = ffi::SCARD_STATE_CHANGED as u32;
        /// The reader name is not recognized
        const UNKNOWN = ffi::SCARD_STATE_UNKNOWN as u32;
        /// Reader state is unavailable
        const UNAVAILABLE = ffi::SCARD_STATE_UNAVAILABLE as u32;
        /// No card in the reader
        const EMPTY = ffi::SCARD_STATE_EMPTY as u32;
        /// A card is in the reader
        const PRESENT = ffi::SCARD_STATE_PRESENT as u32;
        /// The card ATR matches a target card
        const ATRMATCH = ffi::SCARD_STATE_ATRMATCH as u32;
        /// The card is allocated for exclusive use
        const EXCLUSIVE = ffi::SCARD_STATE_EXCLUSIVE as u32;
        /// The card is in use by one or more applications
        const INUSE = ffi::SCARD_STATE_INUSE as u32;
        /// The card is unresponsive
        const MUTE = ffi::SCARD_STATE_MUTE as u32;
        /// The card has not been powered up
        const UNPOWERED = ffi::SCARD_STATE_UNPOWERED as u32;
    }
}

impl StateFlags {
    /// Event counter pcsc-lite stores in the upper 16 bits
    pub const fn count(self) -> u16 {
        (self.bits() >> 16) as u16
    }
}

bitflags! {
    /// Card state as reported by a status query
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CardState: u32 {
        /// Unknown state
        const UNKNOWN = ffi::SCARD_UNKNOWN as u32;
        /// No card in the reader
        const ABSENT = ffi::SCARD_ABSENT as u32;
        /// Card present but not in position for use
        const PRESENT = ffi::SCARD_PRESENT as u32;
        /// Card in position, not powered
        const SWALLOWED = ffi::SCARD_SWALLOWED as u32;
        /// Card powered, reader driver does not know the mode
        const POWERED = ffi::SCARD_POWERED as u32;
        /// Card reset and awaiting PTS negotiation
        const NEGOTIABLE = ffi::SCARD_NEGOTIABLE as u32;
        /// Card reset and a specific protocol established
        const SPECIFIC = ffi::SCARD_SPECIFIC as u32;
    }
}

/// How long a status change wait may block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Timeout(u32);

impl Timeout {
    /// Block until a change happens or the wait is cancelled
    pub const INFINITE: Self = Self(ffi::INFINITE as u32);
    /// Return at once with the current state
    pub const IMMEDIATE: Self = Self(0);

    /// Timeout of `millis` milliseconds
    ///
    /// Values at or above the native infinite marker block indefinitely.
    pub const fn from_millis(millis: u32) -> Self {
        Self(millis)
    }

    /// Milliseconds passed to the native call
    pub const fn as_millis(self) -> u32 {
        self.0
    }

    /// Whether this is [`Timeout::INFINITE`]
    pub const fn is_infinite(self) -> bool {
        self.0 == Self::INFINITE.0
    }
}

impl From<Duration> for Timeout {
    fn from(duration: Duration) -> Self {
        match u32::try_from(duration.as_millis()) {
            Ok(millis) if millis < Self::INFINITE.0 => Self(millis),
            _ => Self::INFINITE,
        }
    }
}

impl From<Option<Duration>> for Timeout {
    fn from(duration: Option<Duration>) -> Self {
        duration.map_or(Self::INFINITE, Self::from)
    }
}

/// One reader monitored by a status change wait
///
/// `current_state` is the caller's view going in; `event_state` and `atr` are
/// filled in by the wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaderState {
    /// Reader name, passed to the native layer verbatim
    pub reader: String,
    /// State the caller believes the reader is in
    pub current_state: StateFlags,
    /// State reported by the last wait
    pub event_state: StateFlags,
    /// ATR of the card in the reader, as reported by the last wait
    pub atr: Vec<u8>,
}

impl ReaderState {
    /// Watch `reader`, assuming it is in `current_state`
    pub fn new(reader: impl Into<String>, current_state: StateFlags) -> Self {
        Self {
            reader: reader.into(),
            current_state,
            event_state: StateFlags::UNAWARE,
            atr: Vec::new(),
        }
    }

    /// Entry that reports readers being added or removed
    pub fn pnp_notification() -> Self {
        Self::new(PNP_NOTIFICATION, StateFlags::UNAWARE)
    }

    /// Take the reported state as the new baseline for the next wait
    pub fn sync_current_state(&mut self) {
        self.current_state = self.event_state;
    }

    /// Whether the last wait reported a change for this reader
    pub const fn changed(&self) -> bool {
        self.event_state.contains(StateFlags::CHANGED)
    }
}

/// Snapshot returned by a card status query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardStatus {
    /// Name of the reader holding the card
    pub reader: String,
    /// Card state bits
    pub state: CardState,
    /// Protocol in use
    pub active_protocol: Protocol,
    /// Answer to reset
    pub atr: Vec<u8>,
}

/// Reader attribute identifiers, built the way the native header builds them.
pub mod attributes {
    /// Combine an attribute class and tag into an identifier
    pub const fn value(class: u32, tag: u32) -> u32 {
        (class << 16) | tag
    }

    /// Vendor information
    pub const CLASS_VENDOR_INFO: u32 = 1;
    /// Communication definitions
    pub const CLASS_COMMUNICATIONS: u32 = 2;
    /// Protocol definitions
    pub const CLASS_PROTOCOL: u32 = 3;
    /// Power management
    pub const CLASS_POWER_MGMT: u32 = 4;
    /// Security assurance
    pub const CLASS_SECURITY: u32 = 5;
    /// Mechanical characteristics
    pub const CLASS_MECHANICAL: u32 = 6;
    /// Vendor specific
    pub const CLASS_VENDOR_DEFINED: u32 = 7;
    /// Interface device protocol support
    pub const CLASS_IFD_PROTOCOL: u32 = 8;
    /// Card state
    pub const CLASS_ICC_STATE: u32 = 9;
    /// System specific
    pub const CLASS_SYSTEM: u32 = 0x7FFF;

    /// Reader vendor name
    pub const VENDOR_NAME: u32 = value(CLASS_VENDOR_INFO, 0x0100);
    /// Vendor-supplied reader type
    pub const VENDOR_IFD_TYPE: u32 = value(CLASS_VENDOR_INFO, 0x0101);
    /// Vendor-supplied reader version
    pub const VENDOR_IFD_VERSION: u32 = value(CLASS_VENDOR_INFO, 0x0102);
    /// Reader serial number
    pub const VENDOR_IFD_SERIAL_NO: u32 = value(CLASS_VENDOR_INFO, 0x0103);
    /// Channel type and number the reader is attached by
    pub const CHANNEL_ID: u32 = value(CLASS_COMMUNICATIONS, 0x0110);
    /// Protocol in use with the card
    pub const CURRENT_PROTOCOL_TYPE: u32 = value(CLASS_IFD_PROTOCOL, 0x0201);
    /// Whether a card is in the slot
    pub const ICC_PRESENCE: u32 = value(CLASS_ICC_STATE, 0x0300);
    /// ATR of the card in the slot
    pub const ATR_STRING: u32 = value(CLASS_ICC_STATE, 0x0303);
    /// Device unit number
    pub const DEVICE_UNIT: u32 = value(CLASS_SYSTEM, 0x0001);
    /// Reader display name
    pub const DEVICE_FRIENDLY_NAME: u32 = value(CLASS_SYSTEM, 0x0003);
}
