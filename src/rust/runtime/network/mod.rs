// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

pub mod buffer;
pub mod channel;
pub mod handlers;
pub mod header;
pub mod transport;

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    fail::{
        protocol_violation,
        Fail,
    },
    limits::{
        HEADER_SIZE,
        MAX_ADDRESS,
        MAX_MESSAGE_SIZE,
        RECEIVE_BATCH_SIZE,
    },
    network::{
        buffer::MessageBuffer,
        handlers::{
            deserialize,
            write_capture,
            AtAddress,
            AtAddressWithPayload,
            Capture,
            HandlerEntry,
            HandlerId,
            HandlerTable,
            Invoke,
            Plain,
            WithPayload,
        },
        header::MessageHeader,
        transport::{
            SendId,
            Transport,
        },
    },
    scheduler::HandlerContext,
    sync::SharedBarrier,
    types::CoreId,
    SharedRuntime,
};
use ::std::collections::HashMap;

//======================================================================================================================
// Structures
//======================================================================================================================

/// Runs once the transport no longer needs the packet that carried a send.
pub type Completion = Box<dyn FnOnce(&mut SharedRuntime)>;

/// Location in the global address space: a core and an opaque offset that handlers on that core interpret.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct GlobalAddress {
    core: CoreId,
    offset: u64,
}

/// Aggregating front end of the transport. Keeps one buffer per destination core.
pub struct Messenger {
    core: CoreId,
    transport: Box<dyn Transport>,
    handlers: HandlerTable,
    buffers: Vec<MessageBuffer>,
    flush_threshold: usize,
    flush_ticks: u64,
    in_flight: HashMap<SendId, Vec<Completion>>,
    /// Counted invocations enqueued by this core.
    sent: u64,
    /// Counted invocations whose handler ran on this core.
    received: u64,
    packets_sent: u64,
    packets_received: u64,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl GlobalAddress {
    pub fn new(core: CoreId, offset: u64) -> Result<Self, Fail> {
        if offset > MAX_ADDRESS {
            let cause: String = format!("offset {:#x} does not fit in a global address", offset);
            error!("new(): {}", cause);
            return Err(Fail::new(libc::EINVAL, &cause));
        }
        Ok(Self { core, offset })
    }

    pub fn core(&self) -> CoreId {
        self.core
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }
}

impl Messenger {
    pub fn new(transport: Box<dyn Transport>, handlers: HandlerTable, flush_threshold: usize, flush_ticks: u64) -> Self {
        let core: CoreId = transport.local_core();
        let capacity: usize = flush_threshold + HEADER_SIZE + MAX_MESSAGE_SIZE;
        let buffers: Vec<MessageBuffer> = (0..transport.num_cores() as u32)
            .map(|dest| MessageBuffer::new(CoreId::from(dest), capacity))
            .collect();
        Self {
            core,
            transport,
            handlers,
            buffers,
            flush_threshold,
            flush_ticks,
            in_flight: HashMap::new(),
            sent: 0,
            received: 0,
            packets_sent: 0,
            packets_received: 0,
        }
    }

    /// Appends one invocation of `handler` to the buffer of `dest`. The buffer is flushed once it holds
    /// `flush_threshold` bytes or more.
    #[allow(clippy::too_many_arguments)]
    pub fn enqueue<K: Invoke>(
        &mut self,
        dest: CoreId,
        address: Option<u64>,
        handler: K,
        payload: &[u8],
        counted: bool,
        completion: Option<Completion>,
        now: u64,
    ) -> Result<(), Fail> {
        if dest.index() >= self.buffers.len() {
            let cause: String = format!("no such core {:?}", dest);
            error!("enqueue(): {}", cause);
            return Err(Fail::new(libc::EINVAL, &cause));
        }
        let capture: usize = Capture::<K>::SIZE;
        let size: usize = capture + payload.len();
        if size > MAX_MESSAGE_SIZE {
            let cause: String = format!("message of {} bytes exceeds {} bytes", size, MAX_MESSAGE_SIZE);
            error!("enqueue(): {}", cause);
            return Err(Fail::new(libc::EMSGSIZE, &cause));
        }
        let id: HandlerId = self.handlers.register(deserialize::<K>, counted)?;

        let buffer: &mut MessageBuffer = &mut self.buffers[dest.index()];
        buffer.append(id, address, size, completion, now, |block: &mut [u8]| {
            write_capture(&mut block[..capture], handler);
            block[capture..].copy_from_slice(payload);
        })?;
        if counted {
            self.sent += 1;
        }
        if self.buffers[dest.index()].len() >= self.flush_threshold {
            self.flush(dest)?;
        }
        Ok(())
    }

    /// Hands the buffer of `dest` to the transport.
    pub fn flush(&mut self, dest: CoreId) -> Result<(), Fail> {
        let (packet, completions): (Vec<u8>, Vec<Completion>) = match self.buffers[dest.index()].take() {
            Some(taken) => taken,
            None => return Ok(()),
        };
        trace!("flush(): {:?} -> {:?} ({} bytes)", self.core, dest, packet.len());
        let id: SendId = self.transport.send(dest, packet)?;
        self.packets_sent += 1;
        if !completions.is_empty() {
            self.in_flight.insert(id, completions);
        }
        Ok(())
    }

    pub fn flush_all(&mut self) -> Result<(), Fail> {
        for dest in 0..self.buffers.len() as u32 {
            self.flush(CoreId::from(dest))?;
        }
        Ok(())
    }

    /// Flushes every buffer whose oldest invocation waited `flush_ticks` scheduler ticks or more.
    pub fn flush_stale(&mut self, now: u64) -> Result<(), Fail> {
        for dest in 0..self.buffers.len() {
            if self.buffers[dest].is_stale(now, self.flush_ticks) {
                self.flush(CoreId::from(dest as u32))?;
            }
        }
        Ok(())
    }

    /// Returns the completions of every send the transport finished since the last call.
    pub fn poll_completions(&mut self) -> Vec<Completion> {
        let mut ready: Vec<Completion> = Vec::new();
        while let Some(id) = self.transport.poll_completion() {
            if let Some(completions) = self.in_flight.remove(&id) {
                ready.extend(completions);
            }
        }
        ready
    }

    pub fn poll_receive(&mut self) -> Option<(CoreId, Vec<u8>)> {
        let packet: Option<(CoreId, Vec<u8>)> = self.transport.poll_receive();
        if packet.is_some() {
            self.packets_received += 1;
        }
        packet
    }

    pub fn lookup(&mut self, id: HandlerId) -> Result<HandlerEntry, Fail> {
        self.handlers.lookup(id)
    }

    fn note_received(&mut self, count: u64) {
        self.received += count;
    }

    pub fn transport(&mut self) -> &mut dyn Transport {
        self.transport.as_mut()
    }

    pub fn is_aborted(&self) -> bool {
        self.transport.is_aborted()
    }

    pub fn abort(&self) {
        self.transport.abort()
    }

    pub fn sent_counted(&self) -> u64 {
        self.sent
    }

    pub fn received_counted(&self) -> u64 {
        self.received
    }

    pub fn packets_sent(&self) -> u64 {
        self.packets_sent
    }

    pub fn packets_received(&self) -> u64 {
        self.packets_received
    }
}

/// Active messages of a core.
impl SharedRuntime {
    /// Runs `handler` on `dest`.
    pub fn send<F>(&mut self, dest: CoreId, handler: F)
    where
        F: FnOnce(&mut HandlerContext) + Copy + Send + 'static,
    {
        self.enqueue(dest, None, Plain(handler), &[], true, None);
    }

    /// Runs `handler` on `dest` with a copy of `payload`.
    pub fn send_with_payload<F>(&mut self, dest: CoreId, payload: &[u8], handler: F)
    where
        F: FnOnce(&mut HandlerContext, &[u8]) + Copy + Send + 'static,
    {
        self.enqueue(dest, None, WithPayload(handler), payload, true, None);
    }

    /// Runs `handler` on the core of `target` with the offset of `target`.
    pub fn send_to<F>(&mut self, target: GlobalAddress, handler: F)
    where
        F: FnOnce(&mut HandlerContext, u64) + Copy + Send + 'static,
    {
        self.enqueue(target.core, Some(target.offset), AtAddress(handler), &[], true, None);
    }

    pub fn send_to_with_payload<F>(&mut self, target: GlobalAddress, payload: &[u8], handler: F)
    where
        F: FnOnce(&mut HandlerContext, u64, &[u8]) + Copy + Send + 'static,
    {
        self.enqueue(
            target.core,
            Some(target.offset),
            AtAddressWithPayload(handler),
            payload,
            true,
            None,
        );
    }

    /// Sends a message that termination detection does not count.
    pub(crate) fn send_control<F>(&mut self, dest: CoreId, handler: F)
    where
        F: FnOnce(&mut HandlerContext) + Copy + Send + 'static,
    {
        self.enqueue(dest, None, Plain(handler), &[], false, None);
    }

    /// Sends `payload` to `dest` and runs `completion` on this core once the transport is done with it.
    pub(crate) fn send_with_completion<F>(&mut self, dest: CoreId, payload: &[u8], handler: F, completion: Completion)
    where
        F: FnOnce(&mut HandlerContext, &[u8]) + Copy + Send + 'static,
    {
        self.enqueue(dest, None, WithPayload(handler), payload, true, Some(completion));
    }

    fn enqueue<K: Invoke>(
        &mut self,
        dest: CoreId,
        address: Option<u64>,
        handler: K,
        payload: &[u8],
        counted: bool,
        completion: Option<Completion>,
    ) {
        let now: u64 = self.ticks();
        if let Err(e) = self
            .messenger()
            .enqueue(dest, address, handler, payload, counted, completion, now)
        {
            protocol_violation(&format!("cannot send to {:?}: {}", dest, e.cause));
        }
    }

    pub fn flush_all(&mut self) {
        if let Err(e) = self.messenger().flush_all() {
            protocol_violation(&format!("cannot flush message buffers: {}", e.cause));
        }
    }

    pub fn flush_stale(&mut self, now: u64) {
        if let Err(e) = self.messenger().flush_stale(now) {
            protocol_violation(&format!("cannot flush message buffers: {}", e.cause));
        }
    }

    /// Runs send completions, delivers received messages and completes collectives. Never blocks.
    pub fn poll_network(&mut self) {
        let completions: Vec<Completion> = self.messenger().poll_completions();
        for completion in completions {
            completion(self);
        }

        for _ in 0..RECEIVE_BATCH_SIZE {
            let (source, packet): (CoreId, Vec<u8>) = match self.messenger().poll_receive() {
                Some(received) => received,
                None => break,
            };
            let mut cx: HandlerContext = HandlerContext::new(self.clone(), source);
            let mut pos: usize = 0;
            while pos < packet.len() {
                pos = match deserialize_and_call(&mut cx, &packet, pos) {
                    Ok(next) => next,
                    Err(e) => protocol_violation(&format!("malformed message from {:?}: {}", source, e.cause)),
                };
            }
        }

        let mut barrier: SharedBarrier = self.barrier();
        barrier.poll(self.messenger().transport());
    }
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// Delivers every invocation of the header found at `pos` in `buf`. Returns the offset of the next header.
pub fn deserialize_and_call(cx: &mut HandlerContext, buf: &[u8], pos: usize) -> Result<usize, Fail> {
    let header: MessageHeader = MessageHeader::unpack(buf.get(pos..).unwrap_or(&[]))?;
    if header.dest != cx.core() {
        let cause: String = format!("message for {:?} delivered to {:?}", header.dest, cx.core());
        error!("deserialize_and_call(): {}", cause);
        return Err(Fail::new(libc::EBADMSG, &cause));
    }
    let end: usize = pos + header.wire_size();
    if end > buf.len() {
        let cause: String = format!("message needs {} bytes but {} remain", header.wire_size(), buf.len() - pos);
        error!("deserialize_and_call(): {}", cause);
        return Err(Fail::new(libc::EBADMSG, &cause));
    }

    let entry: HandlerEntry = cx.runtime().messenger().lookup(header.handler)?;
    (entry.deserializer)(cx, &header, &buf[pos + HEADER_SIZE..end]);
    if entry.counted {
        cx.runtime().messenger().note_received(header.count as u64);
    }
    Ok(end)
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================

#[cfg(test)]
mod tests {
    use crate::runtime::{
        network::{
            channel::ChannelNetwork,
            handlers::HandlerTable,
            GlobalAddress,
        },
        scheduler::HandlerContext,
        types::CoreId,
        RuntimeOptions,
        SharedRuntime,
    };
    use ::anyhow::Result;
    use ::std::cell::RefCell;

    thread_local! {
        static DELIVERED: RefCell<Vec<(u64, u64)>> = RefCell::new(Vec::new());
    }

    fn runtime() -> Result<SharedRuntime> {
        let options: RuntimeOptions = RuntimeOptions {
            num_cores: 1,
            ..Default::default()
        };
        let transport = ChannelNetwork::new(1).remove(0);
        Ok(SharedRuntime::new(&options, Box::new(transport), HandlerTable::new())?)
    }

    fn delivered() -> Vec<(u64, u64)> {
        DELIVERED.with(|delivered| delivered.borrow_mut().drain(..).collect())
    }

    #[test]
    fn handlers_run_once_per_send_in_send_order() -> Result<()> {
        let mut runtime: SharedRuntime = runtime()?;
        for i in 0..5u64 {
            runtime.send(CoreId::new(0), move |_: &mut HandlerContext| {
                DELIVERED.with(|delivered| delivered.borrow_mut().push((i, 0)));
            });
        }
        runtime.flush_all();
        runtime.poll_network();
        crate::ensure_eq!(delivered(), vec![(0, 0), (1, 0), (2, 0), (3, 0), (4, 0)]);
        crate::ensure_eq!(runtime.messenger().sent_counted(), 5);
        crate::ensure_eq!(runtime.messenger().received_counted(), 5);
        crate::ensure_eq!(runtime.messenger().packets_sent(), 1);
        Ok(())
    }

    #[test]
    fn stateless_sends_share_one_header_and_all_run() -> Result<()> {
        let mut runtime: SharedRuntime = runtime()?;
        for _ in 0..3 {
            runtime.send(CoreId::new(0), |_: &mut HandlerContext| {
                DELIVERED.with(|delivered| delivered.borrow_mut().push((0, 0)));
            });
        }
        // Three invocations without capture or payload fit in a single header.
        crate::ensure_eq!(runtime.messenger().buffers[0].len(), 16);
        runtime.flush_all();
        runtime.poll_network();
        crate::ensure_eq!(delivered(), vec![(0, 0), (0, 0), (0, 0)]);
        crate::ensure_eq!(runtime.messenger().packets_sent(), 1);
        crate::ensure_eq!(runtime.messenger().received_counted(), 3);
        Ok(())
    }

    #[test]
    fn addressed_sends_see_their_own_address() -> Result<()> {
        let mut runtime: SharedRuntime = runtime()?;
        for offset in [40u64, 48, 56, 3] {
            runtime.send_to(GlobalAddress::new(CoreId::new(0), offset)?, |_: &mut HandlerContext, address: u64| {
                DELIVERED.with(|delivered| delivered.borrow_mut().push((address, 0)));
            });
        }
        runtime.flush_all();
        runtime.poll_network();
        crate::ensure_eq!(delivered(), vec![(40, 0), (48, 0), (56, 0), (3, 0)]);
        Ok(())
    }

    #[test]
    fn payloads_arrive_intact() -> Result<()> {
        let mut runtime: SharedRuntime = runtime()?;
        let tag: u64 = 7;
        runtime.send_with_payload(CoreId::new(0), &[1, 2, 3], move |_: &mut HandlerContext, payload: &[u8]| {
            let sum: u64 = payload.iter().map(|b| *b as u64).sum();
            DELIVERED.with(|delivered| delivered.borrow_mut().push((tag, sum)));
        });
        runtime.send_to_with_payload(
            GlobalAddress::new(CoreId::new(0), 11)?,
            &[10; 9],
            |_: &mut HandlerContext, address: u64, payload: &[u8]| {
                DELIVERED.with(|delivered| delivered.borrow_mut().push((address, payload.len() as u64)));
            },
        );
        runtime.flush_all();
        runtime.poll_network();
        crate::ensure_eq!(delivered(), vec![(7, 6), (11, 9)]);
        Ok(())
    }

    #[test]
    fn control_messages_are_not_counted() -> Result<()> {
        let mut runtime: SharedRuntime = runtime()?;
        runtime.send_control(CoreId::new(0), |_: &mut HandlerContext| {});
        runtime.flush_all();
        runtime.poll_network();
        crate::ensure_eq!(runtime.messenger().sent_counted(), 0);
        crate::ensure_eq!(runtime.messenger().received_counted(), 0);
        Ok(())
    }

    #[test]
    fn completions_run_after_the_packet_is_sent() -> Result<()> {
        let mut runtime: SharedRuntime = runtime()?;
        runtime.send_with_completion(
            CoreId::new(0),
            &[],
            |_: &mut HandlerContext, _: &[u8]| {},
            Box::new(|_: &mut SharedRuntime| {
                DELIVERED.with(|delivered| delivered.borrow_mut().push((99, 0)));
            }),
        );
        runtime.poll_network();
        crate::ensure_eq!(delivered(), Vec::<(u64, u64)>::new());
        runtime.flush_all();
        runtime.poll_network();
        crate::ensure_eq!(delivered(), vec![(99, 0)]);
        Ok(())
    }

    #[test]
    fn global_address_rejects_wide_offsets() -> Result<()> {
        crate::ensure_eq!(GlobalAddress::new(CoreId::new(0), 1 << 44).is_err(), true);
        crate::ensure_eq!(GlobalAddress::new(CoreId::new(0), (1 << 44) - 1)?.offset(), (1 << 44) - 1);
        Ok(())
    }
}
