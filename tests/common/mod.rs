//! In-process resource manager following the pcsc-lite contract.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::ffi::CStr;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use scard::native::{RawCard, RawContext, RawReaderState, Winscard};
use scard::{
    status, CardState, Context, ContextConfig, Protocol, StateFlags, Timeout, PNP_NOTIFICATION,
};

pub const SELECT_MF: [u8; 7] = [0x00, 0xA4, 0x00, 0x0C, 0x02, 0x3F, 0x00];
pub const ATR: [u8; 11] = [
    0x3B, 0x88, 0x80, 0x01, 0x00, 0x00, 0x00, 0x00, 0x77, 0x81, 0x80,
];

const SHARE_EXCLUSIVE: u32 = 1;
const SHARE_DIRECT: u32 = 3;

#[derive(Debug, Clone)]
struct Reader {
    name: String,
    atr: Option<Vec<u8>>,
    protocol: u32,
    counter: u32,
    responses: HashMap<Vec<u8>, Vec<u8>>,
}

#[derive(Debug, Clone)]
struct OpenCard {
    reader: usize,
    protocol: u32,
    exclusive: bool,
}

#[derive(Debug, Default)]
struct Inner {
    next_handle: usize,
    contexts: HashSet<RawContext>,
    waiting: HashSet<RawContext>,
    cancelled: HashSet<RawContext>,
    cards: HashMap<RawCard, OpenCard>,
    readers: Vec<Reader>,
    groups: Vec<String>,
    attributes: HashMap<u32, Vec<u8>>,
    pnp_counter: u32,
    calls: Vec<&'static str>,
    failures: HashMap<&'static str, u32>,
    grow_on_size_query: Option<String>,
    transactions: i32,
    last_transmit_protocol: Option<u32>,
    last_control_empty: Option<bool>,
}

impl Inner {
    fn enter(&mut self, op: &'static str) -> Option<u32> {
        self.calls.push(op);
        self.failures.remove(op)
    }

    fn handle(&mut self) -> usize {
        self.next_handle += 1;
        0x1000 + self.next_handle
    }

    fn reader_index(&self, name: &str) -> Option<usize> {
        self.readers.iter().position(|r| r.name == name)
    }

    fn reader_list(&self) -> Vec<u8> {
        multi_string(self.readers.iter().map(|r| r.name.as_str()))
    }

    /// Fill in event states; true when any entry differs from its current state
    fn evaluate(&self, states: &mut [RawReaderState]) -> bool {
        let mut any = false;
        for state in states.iter_mut() {
            let name = state.reader.to_string_lossy().into_owned();
            let current = state.current_state & !StateFlags::CHANGED.bits();

            if current & StateFlags::IGNORE.bits() != 0 {
                state.event_state = StateFlags::IGNORE.bits();
                continue;
            }

            let (base, atr) = if name == PNP_NOTIFICATION {
                (self.pnp_counter << 16, Vec::new())
            } else if let Some(index) = self.reader_index(&name) {
                let reader = &self.readers[index];
                let presence = match reader.atr {
                    Some(_) => StateFlags::PRESENT,
                    None => StateFlags::EMPTY,
                };
                (
                    presence.bits() | (reader.counter << 16),
                    reader.atr.clone().unwrap_or_default(),
                )
            } else {
                ((StateFlags::UNKNOWN | StateFlags::CHANGED).bits(), Vec::new())
            };

            state.atr = atr;
            if base != current {
                state.event_state = base | StateFlags::CHANGED.bits();
                any = true;
            } else {
                state.event_state = base;
            }
        }
        any
    }
}

fn multi_string<'a>(names: impl Iterator<Item = &'a str>) -> Vec<u8> {
    let mut out = Vec::new();
    for name in names {
        out.extend_from_slice(name.as_bytes());
        out.push(0);
    }
    out.push(0);
    out
}

fn fill(buf: Option<&mut [u8]>, len: &mut u32, data: &[u8]) -> u32 {
    *len = data.len() as u32;
    match buf {
        None => status::SUCCESS,
        Some(buf) if buf.len() < data.len() => status::INSUFFICIENT_BUFFER,
        Some(buf) => {
            buf[..data.len()].copy_from_slice(data);
            status::SUCCESS
        }
    }
}

/// Fake resource manager
#[derive(Debug, Default)]
pub struct FakePcsc {
    inner: Mutex<Inner>,
    changed: Condvar,
}

impl FakePcsc {
    pub fn new() -> Self {
        Self::default()
    }

    /// Manager with one T=1 card in `Reader A` and an empty `Reader B`
    pub fn two_readers() -> Arc<Self> {
        let fake = Self::new();
        fake.add_reader("Reader A", Some(&ATR[..]));
        fake.add_reader("Reader B", None);
        fake.set_response(
            "Reader A",
            &SELECT_MF,
            &[0x62, 0x04, 0x82, 0x02, 0x38, 0x00, 0x90, 0x00],
        );
        Arc::new(fake)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap()
    }

    pub fn add_reader(&self, name: &str, atr: Option<&[u8]>) {
        let mut inner = self.lock();
        inner.readers.push(Reader {
            name: name.to_owned(),
            atr: atr.map(<[u8]>::to_vec),
            protocol: Protocol::T1.bits(),
            counter: 0,
            responses: HashMap::new(),
        });
        inner.pnp_counter += 1;
        self.changed.notify_all();
    }

    pub fn set_protocol(&self, reader: &str, protocol: Protocol) {
        let mut inner = self.lock();
        let index = inner.reader_index(reader).unwrap();
        inner.readers[index].protocol = protocol.bits();
    }

    pub fn insert_card(&self, reader: &str, atr: &[u8]) {
        let mut inner = self.lock();
        let index = inner.reader_index(reader).unwrap();
        inner.readers[index].atr = Some(atr.to_vec());
        inner.readers[index].counter += 1;
        self.changed.notify_all();
    }

    pub fn remove_card(&self, reader: &str) {
        let mut inner = self.lock();
        let index = inner.reader_index(reader).unwrap();
        inner.readers[index].atr = None;
        inner.readers[index].counter += 1;
        self.changed.notify_all();
    }

    pub fn set_response(&self, reader: &str, command: &[u8], response: &[u8]) {
        let mut inner = self.lock();
        let index = inner.reader_index(reader).unwrap();
        inner.readers[index]
            .responses
            .insert(command.to_vec(), response.to_vec());
    }

    /// Forget card handle `card`, as the manager does once a card is disconnected
    pub fn invalidate_card(&self, card: RawCard) {
        self.lock().cards.remove(&card);
    }

    pub fn set_groups(&self, groups: &[&str]) {
        self.lock().groups = groups.iter().map(|g| g.to_string()).collect();
    }

    /// Make the next call to `op` return `code`
    pub fn fail_next(&self, op: &'static str, code: u32) {
        self.lock().failures.insert(op, code);
    }

    /// Add reader `name` right after the next size query for the reader list
    pub fn grow_on_size_query(&self, name: &str) {
        self.lock().grow_on_size_query = Some(name.to_owned());
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.lock().calls.clone()
    }

    pub fn count(&self, op: &str) -> usize {
        self.lock().calls.iter().filter(|c| **c == op).count()
    }

    pub fn is_waiting(&self, context: RawContext) -> bool {
        self.lock().waiting.contains(&context)
    }

    pub fn open_cards(&self) -> usize {
        self.lock().cards.len()
    }

    pub fn open_contexts(&self) -> usize {
        self.lock().contexts.len()
    }

    pub fn transactions(&self) -> i32 {
        self.lock().transactions
    }

    pub fn last_transmit_protocol(&self) -> Option<u32> {
        self.lock().last_transmit_protocol
    }

    pub fn last_control_empty(&self) -> Option<bool> {
        self.lock().last_control_empty
    }

    /// Spin until a wait on `context` is blocked inside the fake
    pub fn wait_until_blocked(&self, context: RawContext) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !self.is_waiting(context) {
            assert!(Instant::now() < deadline, "no wait started on context");
            std::thread::sleep(Duration::from_millis(1));
        }
    }
}

impl Winscard for FakePcsc {
    fn establish_context(&self, _scope: u32, context: &mut RawContext) -> u32 {
        let mut inner = self.lock();
        if let Some(code) = inner.enter("establish_context") {
            return code;
        }
        *context = inner.handle();
        inner.contexts.insert(*context);
        status::SUCCESS
    }

    fn release_context(&self, context: RawContext) -> u32 {
        let mut inner = self.lock();
        if let Some(code) = inner.enter("release_context") {
            return code;
        }
        if inner.contexts.remove(&context) {
            status::SUCCESS
        } else {
            status::INVALID_HANDLE
        }
    }

    fn is_valid_context(&self, context: RawContext) -> u32 {
        let mut inner = self.lock();
        if let Some(code) = inner.enter("is_valid_context") {
            return code;
        }
        if inner.contexts.contains(&context) {
            status::SUCCESS
        } else {
            status::INVALID_HANDLE
        }
    }

    fn cancel(&self, context: RawContext) -> u32 {
        let mut inner = self.lock();
        if let Some(code) = inner.enter("cancel") {
            return code;
        }
        if !inner.contexts.contains(&context) {
            return status::INVALID_HANDLE;
        }
        if inner.waiting.contains(&context) {
            inner.cancelled.insert(context);
            self.changed.notify_all();
        }
        status::SUCCESS
    }

    fn list_readers(&self, context: RawContext, readers: Option<&mut [u8]>, len: &mut u32) -> u32 {
        let mut inner = self.lock();
        if let Some(code) = inner.enter("list_readers") {
            return code;
        }
        if !inner.contexts.contains(&context) {
            return status::INVALID_HANDLE;
        }
        let data = inner.reader_list();
        let is_size_query = readers.is_none();
        let rv = fill(readers, len, &data);
        if is_size_query {
            if let Some(name) = inner.grow_on_size_query.take() {
                inner.readers.push(Reader {
                    name,
                    atr: None,
                    protocol: Protocol::T1.bits(),
                    counter: 0,
                    responses: HashMap::new(),
                });
            }
        }
        rv
    }

    fn list_reader_groups(
        &self,
        context: RawContext,
        groups: Option<&mut [u8]>,
        len: &mut u32,
    ) -> u32 {
        let mut inner = self.lock();
        if let Some(code) = inner.enter("list_reader_groups") {
            return code;
        }
        if !inner.contexts.contains(&context) {
            return status::INVALID_HANDLE;
        }
        let data = multi_string(inner.groups.iter().map(String::as_str));
        fill(groups, len, &data)
    }

    fn get_status_change(
        &self,
        context: RawContext,
        timeout: u32,
        states: &mut [RawReaderState],
    ) -> u32 {
        let mut inner = self.lock();
        if let Some(code) = inner.enter("get_status_change") {
            return code;
        }
        if !inner.contexts.contains(&context) {
            return status::INVALID_HANDLE;
        }

        let deadline = (timeout != Timeout::INFINITE.as_millis())
            .then(|| Instant::now() + Duration::from_millis(u64::from(timeout)));
        inner.waiting.insert(context);
        let rv = loop {
            if inner.cancelled.remove(&context) {
                break status::CANCELLED;
            }
            if inner.evaluate(states) {
                break status::SUCCESS;
            }
            match deadline {
                None => inner = self.changed.wait(inner).unwrap(),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        break status::TIMEOUT;
                    }
                    inner = self.changed.wait_timeout(inner, deadline - now).unwrap().0;
                }
            }
        };
        inner.waiting.remove(&context);
        rv
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
        let mut inner = self.lock();
        if let Some(code) = inner.enter("connect") {
            return code;
        }
        if !inner.contexts.contains(&context) {
            return status::INVALID_HANDLE;
        }
        let Some(index) = inner.reader_index(&reader.to_string_lossy()) else {
            return status::UNKNOWN_READER;
        };
        if inner.cards.values().any(|c| c.reader == index && c.exclusive) {
            return status::SHARING_VIOLATION;
        }

        let protocol = if share_mode == SHARE_DIRECT {
            Protocol::UNDEFINED.bits()
        } else {
            let reader = &inner.readers[index];
            if reader.atr.is_none() {
                return status::NO_SMARTCARD;
            }
            if reader.protocol & preferred_protocols == 0 {
                return status::PROTO_MISMATCH;
            }
            reader.protocol
        };

        *card = inner.handle();
        *active_protocol = protocol;
        inner.cards.insert(
            *card,
            OpenCard {
                reader: index,
                protocol,
                exclusive: share_mode == SHARE_EXCLUSIVE,
            },
        );
        status::SUCCESS
    }

    fn reconnect(
        &self,
        card: RawCard,
        share_mode: u32,
        preferred_protocols: u32,
        _initialization: u32,
        active_protocol: &mut u32,
    ) -> u32 {
        let mut inner = self.lock();
        if let Some(code) = inner.enter("reconnect") {
            return code;
        }
        let Some(open) = inner.cards.get(&card).cloned() else {
            return status::INVALID_HANDLE;
        };
        let mut protocol = inner.readers[open.reader].protocol;
        if share_mode == SHARE_DIRECT {
            protocol = Protocol::UNDEFINED.bits();
        } else if protocol & preferred_protocols == 0 {
            return status::PROTO_MISMATCH;
        }
        *active_protocol = protocol;
        inner.cards.insert(
            card,
            OpenCard {
                protocol,
                exclusive: share_mode == SHARE_EXCLUSIVE,
                ..open
            },
        );
        status::SUCCESS
    }

    fn disconnect(&self, card: RawCard, _disposition: u32) -> u32 {
        let mut inner = self.lock();
        if let Some(code) = inner.enter("disconnect") {
            return code;
        }
        match inner.cards.remove(&card) {
            Some(_) => status::SUCCESS,
            None => status::INVALID_HANDLE,
        }
    }

    fn begin_transaction(&self, card: RawCard) -> u32 {
        let mut inner = self.lock();
        if let Some(code) = inner.enter("begin_transaction") {
            return code;
        }
        if !inner.cards.contains_key(&card) {
            return status::INVALID_HANDLE;
        }
        inner.transactions += 1;
        status::SUCCESS
    }

    fn end_transaction(&self, card: RawCard, _disposition: u32) -> u32 {
        let mut inner = self.lock();
        if let Some(code) = inner.enter("end_transaction") {
            return code;
        }
        if !inner.cards.contains_key(&card) {
            return status::INVALID_HANDLE;
        }
        inner.transactions -= 1;
        status::SUCCESS
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
        let mut inner = self.lock();
        if let Some(code) = inner.enter("status") {
            return code;
        }
        let Some(open) = inner.cards.get(&card).cloned() else {
            return status::INVALID_HANDLE;
        };
        let info = &inner.readers[open.reader];
        let Some(card_atr) = info.atr.clone() else {
            return status::REMOVED_CARD;
        };

        let mut name = info.name.as_bytes().to_vec();
        name.push(0);
        if reader.len() < name.len() || atr.len() < card_atr.len() {
            return status::INSUFFICIENT_BUFFER;
        }
        reader[..name.len()].copy_from_slice(&name);
        *reader_len = name.len() as u32;
        atr[..card_atr.len()].copy_from_slice(&card_atr);
        *atr_len = card_atr.len() as u32;
        *state = (CardState::PRESENT | CardState::POWERED | CardState::SPECIFIC).bits();
        *protocol = open.protocol;
        status::SUCCESS
    }

    fn transmit(
        &self,
        card: RawCard,
        protocol: u32,
        send: &[u8],
        recv: &mut [u8],
        recv_len: &mut u32,
    ) -> u32 {
        let mut inner = self.lock();
        if let Some(code) = inner.enter("transmit") {
            return code;
        }
        let Some(open) = inner.cards.get(&card).cloned() else {
            return status::INVALID_HANDLE;
        };
        inner.last_transmit_protocol = Some(protocol);
        if protocol != open.protocol {
            return status::PROTO_MISMATCH;
        }
        let response = inner.readers[open.reader]
            .responses
            .get(send)
            .cloned()
            .unwrap_or_else(|| vec![0x6D, 0x00]);
        *recv_len = response.len() as u32;
        if recv.len() < response.len() {
            return status::INSUFFICIENT_BUFFER;
        }
        recv[..response.len()].copy_from_slice(&response);
        status::SUCCESS
    }

    fn control(
        &self,
        card: RawCard,
        control_code: u32,
        send: &[u8],
        recv: &mut [u8],
        returned: &mut u32,
    ) -> u32 {
        let mut inner = self.lock();
        if let Some(code) = inner.enter("control") {
            return code;
        }
        if !inner.cards.contains_key(&card) {
            return status::INVALID_HANDLE;
        }
        inner.last_control_empty = Some(send.is_empty());
        // Echo the code's low byte followed by the payload.
        let mut response = vec![control_code as u8];
        response.extend_from_slice(send);
        if recv.len() < response.len() {
            return status::INSUFFICIENT_BUFFER;
        }
        recv[..response.len()].copy_from_slice(&response);
        *returned = response.len() as u32;
        status::SUCCESS
    }

    fn get_attrib(&self, card: RawCard, id: u32, attr: Option<&mut [u8]>, len: &mut u32) -> u32 {
        let mut inner = self.lock();
        if let Some(code) = inner.enter("get_attrib") {
            return code;
        }
        if !inner.cards.contains_key(&card) {
            return status::INVALID_HANDLE;
        }
        match inner.attributes.get(&id) {
            Some(value) => fill(attr, len, value),
            None => status::UNSUPPORTED_FEATURE,
        }
    }

    fn set_attrib(&self, card: RawCard, id: u32, attr: &[u8]) -> u32 {
        let mut inner = self.lock();
        if let Some(code) = inner.enter("set_attrib") {
            return code;
        }
        if !inner.cards.contains_key(&card) {
            return status::INVALID_HANDLE;
        }
        inner.attributes.insert(id, attr.to_vec());
        status::SUCCESS
    }

    fn describe(&self, code: u32) -> String {
        match code {
            status::SUCCESS => "Command successful.".into(),
            status::CANCELLED => "Command cancelled.".into(),
            status::INVALID_HANDLE => "Invalid handle.".into(),
            status::INVALID_PARAMETER => "Invalid parameter given.".into(),
            status::TIMEOUT => "Command timeout.".into(),
            status::INSUFFICIENT_BUFFER => "Insufficient buffer.".into(),
            status::UNKNOWN_READER => "Unknown reader specified.".into(),
            status::NO_SMARTCARD => "No smart card inserted.".into(),
            status::SHARING_VIOLATION => "Sharing violation.".into(),
            status::PROTO_MISMATCH => "Card protocol mismatch.".into(),
            status::REMOVED_CARD => "Card was removed.".into(),
            status::UNSUPPORTED_FEATURE => "Feature not supported.".into(),
            status::NO_SERVICE => "Service not available.".into(),
            other => format!("Unknown error: 0x{other:08X}"),
        }
    }
}

/// Establish a context on `fake`
pub fn establish(fake: &Arc<FakePcsc>) -> Context<FakePcsc> {
    Context::establish_with(Arc::clone(fake), &ContextConfig::default()).unwrap()
}
