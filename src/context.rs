use std::ffi::CString;
use std::fmt;
use std::sync::Arc;

use crate::card::Card;
use crate::config::{ConnectOptions, ContextConfig};
use crate::error::{status, Error, Result};
use crate::native::{check, error_for, fetch_sized, Pcsclite, RawContext, RawReaderState, Winscard};
use crate::types::{Protocol, ReaderState, ShareMode, StateFlags, Timeout};
use crate::utils::split_multi_string;

/// Session with the smart card resource manager
///
/// Calls take `&self` and the binding adds no locking of its own: the native
/// layer decides what is safe concurrently. [`Context::get_status_change`] on
/// one thread may be interrupted by [`Context::cancel`] on another.
///
/// A context that is dropped without [`Context::release`] is released then.
pub struct Context<N: Winscard = Pcsclite> {
    native: Arc<N>,
    handle: RawContext,
    released: bool,
}

impl<N: Winscard> fmt::Debug for Context<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("handle", &self.handle)
            .field("released", &self.released)
            .finish()
    }
}

impl Context<Pcsclite> {
    /// Establish a system-scoped context with the system PC/SC library
    pub fn establish() -> Result<Self> {
        Self::establish_with(Arc::new(Pcsclite), &ContextConfig::default())
    }
}

impl<N: Winscard> Context<N> {
    /// Establish a context through `native`
    pub fn establish_with(native: Arc<N>, config: &ContextConfig) -> Result<Self> {
        let mut handle: RawContext = 0;
        check(&*native, native.establish_context(config.scope.into_raw(), &mut handle))?;
        tracing::debug!(context = handle, scope = ?config.scope, "established context");

        Ok(Self {
            native,
            handle,
            released: false,
        })
    }

    /// Native handle of this context
    pub const fn handle(&self) -> RawContext {
        self.handle
    }

    /// Whether the resource manager still accepts this context
    ///
    /// An invalid-handle status answers the question with `false`; any other
    /// failure is an error.
    pub fn is_valid(&self) -> Result<bool> {
        match self.native.is_valid_context(self.handle) {
            status::SUCCESS => Ok(true),
            status::INVALID_HANDLE => Ok(false),
            rv => Err(error_for(&*self.native, rv)),
        }
    }

    /// Make an outstanding [`Context::get_status_change`] return early
    pub fn cancel(&self) -> Result<()> {
        check(&*self.native, self.native.cancel(self.handle))
    }

    /// Handle that can cancel waits on this context from any thread
    pub fn canceller(&self) -> Canceller<N> {
        Canceller {
            native: Arc::clone(&self.native),
            handle: self.handle,
        }
    }

    /// Release the context
    ///
    /// On failure the context is handed back together with the error.
    pub fn release(mut self) -> std::result::Result<(), (Self, Error)> {
        if let Err(err) = check(&*self.native, self.native.release_context(self.handle)) {
            return Err((self, err));
        }
        tracing::debug!(context = self.handle, "released context");
        self.released = true;
        Ok(())
    }

    /// Release a context that may still be shared with a waiting thread
    ///
    /// The last reference is released at once. Otherwise outstanding waits
    /// are cancelled and the release runs when the last clone drops. If the
    /// release or the cancel fails, the reference is handed back with the
    /// error.
    pub fn release_shared(this: Arc<Self>) -> std::result::Result<(), (Arc<Self>, Error)> {
        match Arc::try_unwrap(this) {
            Ok(ctx) => ctx.release().map_err(|(ctx, err)| (Arc::new(ctx), err)),
            Err(shared) => {
                if let Err(err) = shared.cancel() {
                    return Err((shared, err));
                }
                tracing::debug!(context = shared.handle, "release deferred until wait returns");
                Ok(())
            }
        }
    }

    /// Names of the readers known to the resource manager
    pub fn list_readers(&self) -> Result<Vec<String>> {
        let raw = fetch_sized(&*self.native, |buf, len| {
            self.native.list_readers(self.handle, buf, len)
        })?;
        Ok(split_multi_string(&raw))
    }

    /// Names of the reader groups known to the resource manager
    pub fn list_reader_groups(&self) -> Result<Vec<String>> {
        let raw = fetch_sized(&*self.native, |buf, len| {
            self.native.list_reader_groups(self.handle, buf, len)
        })?;
        Ok(split_multi_string(&raw))
    }

    /// Block until a reader in `states` differs from its `current_state`
    ///
    /// Returns when a change is seen, `timeout` passes, or the wait is
    /// cancelled. On success each entry's `event_state` and `atr` are updated
    /// in place, index for index. Names are passed through verbatim, including
    /// [`PNP_NOTIFICATION`](crate::PNP_NOTIFICATION).
    pub fn get_status_change(
        &self,
        states: &mut [ReaderState],
        timeout: impl Into<Timeout>,
    ) -> Result<()> {
        let timeout = timeout.into();
        let mut raw = states
            .iter()
            .map(|state| {
                Ok(RawReaderState {
                    reader: self.reader_name(&state.reader)?,
                    current_state: state.current_state.bits(),
                    event_state: 0,
                    atr: Vec::new(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        tracing::trace!(
            context = self.handle,
            readers = raw.len(),
            timeout_ms = timeout.as_millis(),
            "waiting for status change"
        );
        check(
            &*self.native,
            self.native
                .get_status_change(self.handle, timeout.as_millis(), &mut raw),
        )?;

        for (state, raw) in states.iter_mut().zip(raw) {
            state.event_state = StateFlags::from_bits_retain(raw.event_state);
            state.atr = raw.atr;
        }
        Ok(())
    }

    /// Connect to the card in `reader`
    ///
    /// The returned card records the protocol the native layer negotiated,
    /// not the preference mask.
    pub fn connect(
        &self,
        reader: &str,
        share_mode: ShareMode,
        protocols: Protocol,
    ) -> Result<Card<N>> {
        let name = self.reader_name(reader)?;
        let mut handle = 0;
        let mut active = 0;
        check(
            &*self.native,
            self.native.connect(
                self.handle,
                &name,
                share_mode.into_raw(),
                protocols.bits(),
                &mut handle,
                &mut active,
            ),
        )?;

        let active = Protocol::from_bits_retain(active);
        tracing::debug!(card = handle, reader, ?share_mode, ?active, "connected");
        Ok(Card::new(Arc::clone(&self.native), handle, reader, active))
    }

    /// Connect to the card in `reader` using `options`
    pub fn connect_with(&self, reader: &str, options: &ConnectOptions) -> Result<Card<N>> {
        self.connect(reader, options.share_mode, options.protocols)
    }

    fn reader_name(&self, reader: &str) -> Result<CString> {
        CString::new(reader).map_err(|_| error_for(&*self.native, status::INVALID_PARAMETER))
    }
}

impl<N: Winscard> Drop for Context<N> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(err) = check(&*self.native, self.native.release_context(self.handle)) {
            tracing::warn!(context = self.handle, %err, "failed to release dropped context");
        }
    }
}

/// Cancels waits on a context from another thread
pub struct Canceller<N: Winscard = Pcsclite> {
    native: Arc<N>,
    handle: RawContext,
}

impl<N: Winscard> Canceller<N> {
    /// Make an outstanding status change wait on the context return early
    pub fn cancel(&self) -> Result<()> {
        check(&*self.native, self.native.cancel(self.handle))
    }
}

impl<N: Winscard> Clone for Canceller<N> {
    fn clone(&self) -> Self {
        Self {
            native: Arc::clone(&self.native),
            handle: self.handle,
        }
    }
}

impl<N: Winscard> fmt::Debug for Canceller<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Canceller").field("handle", &self.handle).finish()
    }
}
