use std::fmt;
use std::sync::Arc;

use crate::error::{status, Error, Result};
use crate::native::{check, error_for, fetch_sized, Pcsclite, RawCard, Winscard};
use crate::types::{
    CardState, CardStatus, Disposition, Protocol, ShareMode, MAX_ATR_SIZE,
    MAX_BUFFER_SIZE_EXTENDED, MAX_CONTROL_RESPONSE, MAX_READERNAME,
};
use crate::utils::trim_at_nul;

/// Connection to a card through a reader
///
/// Obtained from [`Context::connect`](crate::Context::connect). The connection
/// ends with [`Card::disconnect`]; a card dropped while still connected is
/// disconnected with [`Disposition::Leave`].
pub struct Card<N: Winscard = Pcsclite> {
    native: Arc<N>,
    handle: RawCard,
    reader: String,
    active_protocol: Protocol,
    disconnected: bool,
}

impl<N: Winscard> fmt::Debug for Card<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Card")
            .field("handle", &self.handle)
            .field("reader", &self.reader)
            .field("active_protocol", &self.active_protocol)
            .finish()
    }
}

impl<N: Winscard> Card<N> {
    pub(crate) fn new(
        native: Arc<N>,
        handle: RawCard,
        reader: &str,
        active_protocol: Protocol,
    ) -> Self {
        Self {
            native,
            handle,
            reader: reader.to_owned(),
            active_protocol,
            disconnected: false,
        }
    }

    /// Native handle of this connection
    pub const fn handle(&self) -> RawCard {
        self.handle
    }

    /// Reader name the connection was opened with
    pub fn reader(&self) -> &str {
        &self.reader
    }

    /// Protocol negotiated by the last connect or reconnect
    pub const fn active_protocol(&self) -> Protocol {
        self.active_protocol
    }

    /// End the connection, applying `disposition` to the card
    ///
    /// On failure the card is handed back together with the error; no retry
    /// is attempted.
    pub fn disconnect(
        mut self,
        disposition: Disposition,
    ) -> std::result::Result<(), (Self, Error)> {
        let rv = self.native.disconnect(self.handle, disposition.into_raw());
        if let Err(err) = check(&*self.native, rv) {
            return Err((self, err));
        }
        tracing::debug!(card = self.handle, ?disposition, "disconnected");
        self.disconnected = true;
        Ok(())
    }

    /// Re-establish the connection, possibly with another share mode
    ///
    /// The active protocol is replaced by the one negotiated here.
    pub fn reconnect(
        &mut self,
        share_mode: ShareMode,
        protocols: Protocol,
        initialization: Disposition,
    ) -> Result<()> {
        let mut active = 0;
        check(
            &*self.native,
            self.native.reconnect(
                self.handle,
                share_mode.into_raw(),
                protocols.bits(),
                initialization.into_raw(),
                &mut active,
            ),
        )?;
        self.active_protocol = Protocol::from_bits_retain(active);
        tracing::debug!(
            card = self.handle,
            ?share_mode,
            ?initialization,
            active = ?self.active_protocol,
            "reconnected"
        );
        Ok(())
    }

    /// Gain exclusive access to the card until [`Card::end_transaction`]
    ///
    /// Pairing begin and end calls is left to the caller.
    pub fn begin_transaction(&self) -> Result<()> {
        check(&*self.native, self.native.begin_transaction(self.handle))?;
        tracing::debug!(card = self.handle, "transaction started");
        Ok(())
    }

    /// Give up exclusive access, applying `disposition` to the card
    pub fn end_transaction(&self, disposition: Disposition) -> Result<()> {
        check(
            &*self.native,
            self.native.end_transaction(self.handle, disposition.into_raw()),
        )?;
        tracing::debug!(card = self.handle, ?disposition, "transaction ended");
        Ok(())
    }

    /// Current reader name, card state, protocol and ATR
    pub fn status(&self) -> Result<CardStatus> {
        let mut reader = [0u8; MAX_READERNAME + 1];
        let mut reader_len = reader.len() as u32;
        let mut atr = [0u8; MAX_ATR_SIZE];
        let mut atr_len = atr.len() as u32;
        let mut state = 0;
        let mut protocol = 0;

        check(
            &*self.native,
            self.native.status(
                self.handle,
                &mut reader,
                &mut reader_len,
                &mut state,
                &mut protocol,
                &mut atr,
                &mut atr_len,
            ),
        )?;

        let reader = &reader[..(reader_len as usize).min(reader.len())];
        let atr = &atr[..(atr_len as usize).min(atr.len())];
        Ok(CardStatus {
            reader: String::from_utf8_lossy(trim_at_nul(reader)).into_owned(),
            state: CardState::from_bits_retain(state),
            active_protocol: Protocol::from_bits_retain(protocol),
            atr: atr.to_vec(),
        })
    }

    /// Send an APDU and return the card's response
    ///
    /// # Panics
    ///
    /// If the active protocol is neither T=0 nor T=1. That means the caller
    /// and the connection disagree about its state, and nothing is sent.
    pub fn transmit(&self, command: &[u8]) -> Result<Vec<u8>> {
        let protocol = self.active_protocol;
        assert!(
            protocol == Protocol::T0 || protocol == Protocol::T1,
            "transmit over unsupported protocol {protocol:?}"
        );
        if command.is_empty() {
            return Err(error_for(&*self.native, status::INVALID_PARAMETER));
        }

        let mut recv = vec![0u8; MAX_BUFFER_SIZE_EXTENDED];
        let mut recv_len = recv.len() as u32;
        check(
            &*self.native,
            self.native
                .transmit(self.handle, protocol.bits(), command, &mut recv, &mut recv_len),
        )?;

        let response = recv[..(recv_len as usize).min(recv.len())].to_vec();
        tracing::trace!(
            card = self.handle,
            sent = command.len(),
            received = response.len(),
            "transmitted"
        );
        Ok(response)
    }

    /// Send a reader control request; `command` may be empty
    pub fn control(&self, control_code: u32, command: &[u8]) -> Result<Vec<u8>> {
        let mut recv = vec![0u8; MAX_CONTROL_RESPONSE];
        let mut returned = 0;
        check(
            &*self.native,
            self.native
                .control(self.handle, control_code, command, &mut recv, &mut returned),
        )?;

        let response = recv[..(returned as usize).min(recv.len())].to_vec();
        tracing::trace!(
            card = self.handle,
            control_code,
            sent = command.len(),
            received = response.len(),
            "control"
        );
        Ok(response)
    }

    /// Read reader attribute `id`
    pub fn get_attrib(&self, id: u32) -> Result<Vec<u8>> {
        let value = fetch_sized(&*self.native, |buf, len| {
            self.native.get_attrib(self.handle, id, buf, len)
        })?;
        tracing::trace!(card = self.handle, id, len = value.len(), "read attribute");
        Ok(value)
    }

    /// Write reader attribute `id`; `data` must not be empty
    pub fn set_attrib(&self, id: u32, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Err(error_for(&*self.native, status::INVALID_PARAMETER));
        }
        check(&*self.native, self.native.set_attrib(self.handle, id, data))?;
        tracing::trace!(card = self.handle, id, len = data.len(), "wrote attribute");
        Ok(())
    }
}

impl<N: Winscard> Drop for Card<N> {
    fn drop(&mut self) {
        if self.disconnected {
            return;
        }
        let rv = self
            .native
            .disconnect(self.handle, Disposition::Leave.into_raw());
        if let Err(err) = check(&*self.native, rv) {
            tracing::warn!(card = self.handle, %err, "failed to disconnect dropped card");
        }
    }
}
