// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Message handlers and their wire identifiers.
//!
//! A handler is a `Copy` closure whose captured state travels by value inside the message. On the wire it is named by
//! a [HandlerId] that maps to the deserializer monomorphized for the handler's exact type, so the receiving core
//! rebuilds the closure from the bytes the sender wrote. Ids are handed out by a table shared by all cores of the
//! process; every core keeps a local cache of the entries it has seen.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    fail::{
        protocol_violation,
        Fail,
    },
    limits::{
        MAX_CAPTURE_SIZE,
        MAX_HANDLERS,
    },
    network::header::MessageHeader,
    scheduler::HandlerContext,
};
use ::std::{
    collections::HashMap,
    marker::PhantomData,
    mem,
    ptr::{
        self,
        NonNull,
    },
    sync::{
        Arc,
        RwLock,
    },
};

//======================================================================================================================
// Structures
//======================================================================================================================

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct HandlerId(u32);

/// Invokes every invocation block that follows `header`.
pub type Deserializer = fn(&mut HandlerContext, &MessageHeader, &[u8]);

#[derive(Clone, Copy)]
pub struct HandlerEntry {
    pub deserializer: Deserializer,
    /// Whether deliveries of this handler take part in termination detection.
    pub counted: bool,
}

// Deserializer address and counted flag.
type HandlerKey = (usize, bool);

#[derive(Default)]
struct Registry {
    entries: Vec<HandlerEntry>,
    ids: HashMap<HandlerKey, HandlerId>,
}

/// Table of registered handlers. Clones share the registry but keep their own cache.
#[derive(Clone)]
pub struct HandlerTable {
    registry: Arc<RwLock<Registry>>,
    cache: HashMap<HandlerKey, HandlerId>,
    entries: Vec<Option<HandlerEntry>>,
}

/// A handler closure together with the way it is called on the receiving core.
pub trait Invoke: Copy + Send + 'static {
    fn invoke(self, cx: &mut HandlerContext, address: u64, payload: &[u8]);
}

/// Handler without address or payload.
#[derive(Clone, Copy)]
pub struct Plain<F>(pub F);

/// Handler that receives a byte payload.
#[derive(Clone, Copy)]
pub struct WithPayload<F>(pub F);

/// Handler that receives the address it was sent to.
#[derive(Clone, Copy)]
pub struct AtAddress<F>(pub F);

/// Handler that receives the address it was sent to and a byte payload.
#[derive(Clone, Copy)]
pub struct AtAddressWithPayload<F>(pub F);

/// Size of the capture of `K` on the wire. Oversized captures fail to compile.
pub struct Capture<K>(PhantomData<K>);

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl<K> Capture<K> {
    pub const SIZE: usize = {
        assert!(
            mem::size_of::<K>() <= MAX_CAPTURE_SIZE,
            "message handler captures too much state"
        );
        mem::size_of::<K>()
    };
}

impl HandlerTable {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(RwLock::new(Registry::default())),
            cache: HashMap::new(),
            entries: Vec::new(),
        }
    }

    /// Returns the id of `deserializer`, registering it on first use.
    pub fn register(&mut self, deserializer: Deserializer, counted: bool) -> Result<HandlerId, Fail> {
        let key: HandlerKey = (deserializer as usize, counted);
        if let Some(id) = self.cache.get(&key) {
            return Ok(*id);
        }

        let id: HandlerId = {
            let mut registry = match self.registry.write() {
                Ok(registry) => registry,
                Err(_) => return Err(Fail::new(libc::EIO, "handler registry is poisoned")),
            };
            match registry.ids.get(&key) {
                Some(id) => *id,
                None => {
                    // Id zero is never handed out.
                    let next: usize = registry.entries.len() + 1;
                    if next > MAX_HANDLERS {
                        let cause: String = format!("more than {} message handlers", MAX_HANDLERS);
                        error!("register(): {}", cause);
                        return Err(Fail::new(libc::ENOSPC, &cause));
                    }
                    let id: HandlerId = HandlerId(next as u32);
                    registry.entries.push(HandlerEntry { deserializer, counted });
                    registry.ids.insert(key, id);
                    id
                },
            }
        };
        self.cache.insert(key, id);
        Ok(id)
    }

    /// Returns the entry registered under `id`.
    pub fn lookup(&mut self, id: HandlerId) -> Result<HandlerEntry, Fail> {
        let index: usize = id.0 as usize;
        if let Some(Some(entry)) = self.entries.get(index) {
            return Ok(*entry);
        }

        let entry: HandlerEntry = {
            let registry = match self.registry.read() {
                Ok(registry) => registry,
                Err(_) => return Err(Fail::new(libc::EIO, "handler registry is poisoned")),
            };
            match index.checked_sub(1).and_then(|i| registry.entries.get(i)) {
                Some(entry) => *entry,
                None => {
                    let cause: String = format!("unknown message handler {:?}", id);
                    error!("lookup(): {}", cause);
                    return Err(Fail::new(libc::EBADMSG, &cause));
                },
            }
        };
        if self.entries.len() <= index {
            self.entries.resize(index + 1, None);
        }
        self.entries[index] = Some(entry);
        Ok(entry)
    }
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// Writes the capture of `handler` at the start of `block`.
pub fn write_capture<K: Invoke>(block: &mut [u8], handler: K) {
    let size: usize = Capture::<K>::SIZE;
    if size == 0 {
        return;
    }
    if block.len() < size {
        protocol_violation("invocation block is smaller than the handler capture");
    }
    // Safety: the block holds at least `size` bytes and the write is unaligned.
    unsafe { ptr::write_unaligned(block.as_mut_ptr() as *mut K, handler) };
}

/// Deserializer of handlers of type `K`.
pub fn deserialize<K: Invoke>(cx: &mut HandlerContext, header: &MessageHeader, blocks: &[u8]) {
    let capture: usize = Capture::<K>::SIZE;
    let size: usize = header.size as usize;
    let block_size: usize = header.block_size();
    if size < capture {
        protocol_violation(&format!(
            "handler {:?} needs {} bytes of capture but invocations carry {}",
            header.handler, capture, size
        ));
    }
    if blocks.len() < header.count as usize * block_size {
        protocol_violation("message is shorter than its header announces");
    }

    for index in 0..header.count as usize {
        let block: &[u8] = &blocks[index * block_size..index * block_size + size];
        let handler: K = if capture == 0 {
            // Safety: `K` is zero-sized, so a dangling aligned pointer is a valid place to read it from.
            unsafe { NonNull::<K>::dangling().as_ptr().read() }
        } else {
            // Safety: the handler id names this deserializer only for blocks written by `write_capture::<K>`.
            unsafe { ptr::read_unaligned(block.as_ptr() as *const K) }
        };
        handler.invoke(cx, header.address_at(index), &block[capture..]);
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl<F> Invoke for Plain<F>
where
    F: FnOnce(&mut HandlerContext) + Copy + Send + 'static,
{
    fn invoke(self, cx: &mut HandlerContext, _: u64, _: &[u8]) {
        (self.0)(cx)
    }
}

impl<F> Invoke for WithPayload<F>
where
    F: FnOnce(&mut HandlerContext, &[u8]) + Copy + Send + 'static,
{
    fn invoke(self, cx: &mut HandlerContext, _: u64, payload: &[u8]) {
        (self.0)(cx, payload)
    }
}

impl<F> Invoke for AtAddress<F>
where
    F: FnOnce(&mut HandlerContext, u64) + Copy + Send + 'static,
{
    fn invoke(self, cx: &mut HandlerContext, address: u64, _: &[u8]) {
        (self.0)(cx, address)
    }
}

impl<F> Invoke for AtAddressWithPayload<F>
where
    F: FnOnce(&mut HandlerContext, u64, &[u8]) + Copy + Send + 'static,
{
    fn invoke(self, cx: &mut HandlerContext, address: u64, payload: &[u8]) {
        (self.0)(cx, address, payload)
    }
}

impl Default for HandlerTable {
    fn default() -> Self {
        Self::new()
    }
}

impl From<u32> for HandlerId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<HandlerId> for u32 {
    fn from(value: HandlerId) -> Self {
        value.0
    }
}

impl From<HandlerId> for u64 {
    fn from(value: HandlerId) -> Self {
        value.0 as u64
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
