// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    fail::Fail,
    limits::{
        MAX_COMBINED_COUNT,
        MAX_STRIDE,
        MIN_STRIDE,
    },
    network::{
        handlers::HandlerId,
        header::{
            padded,
            MessageHeader,
        },
        Completion,
    },
    types::CoreId,
};
use ::std::mem;

//======================================================================================================================
// Structures
//======================================================================================================================

/// Header that later invocations may still join.
struct OpenHeader {
    offset: usize,
    header: MessageHeader,
    last_address: u64,
}

/// Aggregation buffer of one destination core.
pub struct MessageBuffer {
    dest: CoreId,
    capacity: usize,
    data: Vec<u8>,
    open: Option<OpenHeader>,
    completions: Vec<Completion>,
    /// Scheduler tick of the oldest invocation in the buffer.
    since: Option<u64>,
    invocations: usize,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl MessageBuffer {
    pub fn new(dest: CoreId, capacity: usize) -> Self {
        Self {
            dest,
            capacity,
            data: Vec::with_capacity(capacity),
            open: None,
            completions: Vec::new(),
            since: None,
            invocations: 0,
        }
    }

    pub fn dest(&self) -> CoreId {
        self.dest
    }

    /// Bytes ready to go on the wire.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn invocations(&self) -> usize {
        self.invocations
    }

    /// Whether the oldest invocation of the buffer has waited for `max_age` ticks or more.
    pub fn is_stale(&self, now: u64, max_age: u64) -> bool {
        match self.since {
            Some(since) => now.saturating_sub(since) >= max_age,
            None => false,
        }
    }

    /// Appends one invocation of `size` bytes, filled in by `write`. The invocation joins the most recent header when
    /// it has the same handler and size and, for addressed handlers, continues the header's address stride.
    pub fn append<W: FnOnce(&mut [u8])>(
        &mut self,
        handler: HandlerId,
        address: Option<u64>,
        size: usize,
        completion: Option<Completion>,
        now: u64,
        write: W,
    ) -> Result<(), Fail> {
        let address: u64 = address.unwrap_or(0);
        if !self.try_combine(handler, address, size) {
            let header: MessageHeader = MessageHeader::new(self.dest, address, handler, size)?;
            let offset: usize = self.data.len();
            self.data.extend_from_slice(&header.pack());
            self.open = Some(OpenHeader {
                offset,
                header,
                last_address: address,
            });
        }

        let start: usize = self.data.len();
        self.data.resize(start + padded(size), 0);
        write(&mut self.data[start..start + size]);

        if let Some(completion) = completion {
            self.completions.push(completion);
        }
        self.since.get_or_insert(now);
        self.invocations += 1;
        Ok(())
    }

    /// Hands out the aggregated bytes and the completions that must run once they are sent.
    pub fn take(&mut self) -> Option<(Vec<u8>, Vec<Completion>)> {
        if self.data.is_empty() {
            return None;
        }
        self.open = None;
        self.since = None;
        self.invocations = 0;
        let data: Vec<u8> = mem::replace(&mut self.data, Vec::with_capacity(self.capacity));
        Some((data, mem::take(&mut self.completions)))
    }

    fn try_combine(&mut self, handler: HandlerId, address: u64, size: usize) -> bool {
        let open: &mut OpenHeader = match self.open.as_mut() {
            Some(open) => open,
            None => return false,
        };
        if open.header.handler != handler
            || open.header.size as usize != size
            || open.header.count >= MAX_COMBINED_COUNT
        {
            return false;
        }

        let distance: i64 = address.wrapping_sub(open.last_address) as i64;
        if open.header.count == 1 {
            if !(MIN_STRIDE..=MAX_STRIDE).contains(&distance) {
                return false;
            }
            open.header.stride = distance as i16;
        } else if distance != open.header.stride as i64 {
            return false;
        }

        open.header.count += 1;
        open.last_address = address;
        let offset: usize = open.offset;
        let packed = open.header.pack();
        self.data[offset..offset + packed.len()].copy_from_slice(&packed);
        true
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
