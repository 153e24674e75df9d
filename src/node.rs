//! Node.js classes over the binding.
//!
//! `Context` and `Card` mirror the Rust types. Share modes, dispositions and
//! scopes are passed as their lowercase names; protocol and state masks are
//! the native numeric values.

use napi::bindgen_prelude::*;
use napi_derive::napi;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use crate::error::status;
use crate::native::{Pcsclite, Winscard};
use crate::{
    Card, CardStatus, Context, ContextConfig, Disposition, Protocol, ReaderState, Scope,
    ShareMode, StateFlags, Timeout,
};

impl From<crate::Error> for napi::Error {
    fn from(err: crate::Error) -> Self {
        napi::Error::new(napi::Status::GenericFailure, err.to_string())
    }
}

/// What the native layer reports for a handle that is no longer valid
fn stale_handle() -> napi::Error {
    crate::Error::new(status::INVALID_HANDLE, Pcsclite.describe(status::INVALID_HANDLE)).into()
}

fn invalid_arg(what: &str, value: &str) -> napi::Error {
    napi::Error::new(napi::Status::InvalidArg, format!("Unknown {what}: {value}"))
}

fn parse_scope(value: Option<String>) -> Result<Scope> {
    match value.as_deref() {
        None | Some("system") => Ok(Scope::System),
        Some("user") => Ok(Scope::User),
        Some(other) => Err(invalid_arg("scope", other)),
    }
}

fn parse_share_mode(value: Option<String>) -> Result<ShareMode> {
    match value.as_deref() {
        None | Some("shared") => Ok(ShareMode::Shared),
        Some("exclusive") => Ok(ShareMode::Exclusive),
        Some("direct") => Ok(ShareMode::Direct),
        Some(other) => Err(invalid_arg("share mode", other)),
    }
}

fn parse_disposition(value: Option<String>) -> Result<Disposition> {
    match value.as_deref() {
        None | Some("leave") => Ok(Disposition::Leave),
        Some("reset") => Ok(Disposition::Reset),
        Some("unpower") => Ok(Disposition::Unpower),
        Some("eject") => Ok(Disposition::Eject),
        Some(other) => Err(invalid_arg("disposition", other)),
    }
}

fn parse_protocols(value: Option<u32>) -> Protocol {
    value.map_or(Protocol::ANY, Protocol::from_bits_retain)
}

/// Reader state record exchanged with `Context.getStatusChange`
#[napi(object)]
pub struct ReaderStateObject {
    pub reader: String,
    pub current_state: u32,
    pub event_state: Option<u32>,
    pub atr: Option<Buffer>,
}

impl From<ReaderStateObject> for ReaderState {
    fn from(object: ReaderStateObject) -> Self {
        ReaderState::new(object.reader, StateFlags::from_bits_retain(object.current_state))
    }
}

impl From<ReaderState> for ReaderStateObject {
    fn from(state: ReaderState) -> Self {
        Self {
            reader: state.reader,
            current_state: state.current_state.bits(),
            event_state: Some(state.event_state.bits()),
            atr: Some(Buffer::from(state.atr)),
        }
    }
}

/// Card status snapshot
#[napi(object)]
pub struct CardStatusObject {
    pub reader: String,
    pub state: u32,
    pub active_protocol: u32,
    pub atr: Buffer,
}

impl From<CardStatus> for CardStatusObject {
    fn from(status: CardStatus) -> Self {
        Self {
            reader: status.reader,
            state: status.state.bits(),
            active_protocol: status.active_protocol.bits(),
            atr: Buffer::from(status.atr),
        }
    }
}

#[napi(js_name = "Context")]
pub struct JsContext {
    inner: Option<Arc<Context>>,
}

#[napi]
impl JsContext {
    /// Establish a context with the resource manager
    #[napi(factory)]
    pub fn establish(scope: Option<String>) -> Result<Self> {
        let config = ContextConfig::new().with_scope(parse_scope(scope)?);
        let ctx = Context::establish_with(Arc::new(Pcsclite), &config)?;
        Ok(Self {
            inner: Some(Arc::new(ctx)),
        })
    }

    fn context(&self) -> Result<&Arc<Context>> {
        self.inner.as_ref().ok_or_else(stale_handle)
    }

    #[napi]
    pub fn is_valid(&self) -> Result<bool> {
        match &self.inner {
            Some(ctx) => Ok(ctx.is_valid()?),
            None => Ok(false),
        }
    }

    /// Interrupt a pending `getStatusChange`
    #[napi]
    pub fn cancel(&self) -> Result<()> {
        Ok(self.context()?.cancel()?)
    }

    #[napi]
    pub fn release(&mut self) -> Result<()> {
        let ctx = self.inner.take().ok_or_else(stale_handle)?;
        // A pending wait keeps its clone; the release then follows its return.
        Context::release_shared(ctx).map_err(|(ctx, err)| {
            self.inner = Some(ctx);
            err.into()
        })
    }

    #[napi]
    pub fn list_readers(&self) -> Result<Vec<String>> {
        Ok(self.context()?.list_readers()?)
    }

    #[napi]
    pub fn list_reader_groups(&self) -> Result<Vec<String>> {
        Ok(self.context()?.list_reader_groups()?)
    }

    /// Wait for a change in any of `states`; no timeout waits indefinitely
    #[napi]
    pub async fn get_status_change(
        &self,
        states: Vec<ReaderStateObject>,
        timeout_ms: Option<u32>,
    ) -> Result<Vec<ReaderStateObject>> {
        let ctx = Arc::clone(self.context()?);
        let mut states: Vec<ReaderState> = states.into_iter().map(ReaderState::from).collect();
        let timeout = timeout_ms.map_or(Timeout::INFINITE, Timeout::from_millis);

        let states = tokio::task::spawn_blocking(move || {
            ctx.get_status_change(&mut states, timeout).map(|()| states)
        })
        .await
        .map_err(|e| {
            napi::Error::new(
                napi::Status::GenericFailure,
                format!("Status change wait failed: {}", e),
            )
        })??;

        Ok(states.into_iter().map(ReaderStateObject::from).collect())
    }

    #[napi]
    pub fn connect(
        &self,
        reader: String,
        share_mode: Option<String>,
        preferred_protocols: Option<u32>,
    ) -> Result<JsCard> {
        let card = self.context()?.connect(
            &reader,
            parse_share_mode(share_mode)?,
            parse_protocols(preferred_protocols),
        )?;
        Ok(JsCard { inner: Some(card) })
    }
}

#[napi(js_name = "Card")]
pub struct JsCard {
    inner: Option<Card>,
}

#[napi]
impl JsCard {
    fn card(&self) -> Result<&Card> {
        self.inner.as_ref().ok_or_else(stale_handle)
    }

    #[napi(getter)]
    pub fn active_protocol(&self) -> Result<u32> {
        Ok(self.card()?.active_protocol().bits())
    }

    #[napi]
    pub fn status(&self) -> Result<CardStatusObject> {
        Ok(self.card()?.status()?.into())
    }

    /// Transmit an APDU and return the raw response, status word included
    #[napi]
    pub fn transmit(&self, command: Buffer) -> Result<Buffer> {
        Ok(self.card()?.transmit(command.as_ref())?.into())
    }

    #[napi]
    pub fn control(&self, control_code: u32, command: Option<Buffer>) -> Result<Buffer> {
        let command = command.as_ref().map_or(&[][..], |c| c.as_ref());
        Ok(self.card()?.control(control_code, command)?.into())
    }

    #[napi]
    pub fn get_attrib(&self, id: u32) -> Result<Buffer> {
        Ok(self.card()?.get_attrib(id)?.into())
    }

    #[napi]
    pub fn set_attrib(&self, id: u32, data: Buffer) -> Result<()> {
        Ok(self.card()?.set_attrib(id, data.as_ref())?)
    }

    #[napi]
    pub fn begin_transaction(&self) -> Result<()> {
        Ok(self.card()?.begin_transaction()?)
    }

    #[napi]
    pub fn end_transaction(&self, disposition: Option<String>) -> Result<()> {
        Ok(self.card()?.end_transaction(parse_disposition(disposition)?)?)
    }

    #[napi]
    pub fn reconnect(
        &mut self,
        share_mode: Option<String>,
        preferred_protocols: Option<u32>,
        initialization: Option<String>,
    ) -> Result<()> {
        let card = self.inner.as_mut().ok_or_else(stale_handle)?;
        Ok(card.reconnect(
            parse_share_mode(share_mode)?,
            parse_protocols(preferred_protocols),
            parse_disposition(initialization)?,
        )?)
    }

    #[napi]
    pub fn disconnect(&mut self, disposition: Option<String>) -> Result<()> {
        let disposition = parse_disposition(disposition)?;
        let card = self.inner.take().ok_or_else(stale_handle)?;
        card.disconnect(disposition).map_err(|(card, err)| {
            self.inner = Some(card);
            err.into()
        })
    }
}

/// Install a stderr log subscriber; `filter` defaults to `RUST_LOG`, else `warn`
#[napi]
pub fn init_logging(filter: Option<String>) -> Result<()> {
    let filter = match filter {
        Some(directives) => EnvFilter::try_new(&directives).map_err(|e| {
            napi::Error::new(napi::Status::InvalidArg, format!("Invalid log filter: {}", e))
        })?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| {
            napi::Error::new(
                napi::Status::GenericFailure,
                format!("Failed to install logger: {}", e),
            )
        })
}

/// Get library version
#[napi]
pub fn get_version() -> String {
    crate::version().to_string()
}

/// Get the pcsc-lite version the addon was built against
#[napi]
pub fn get_native_version() -> String {
    crate::native_version().to_string()
}
