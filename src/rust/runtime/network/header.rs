// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Wire header of an aggregated message.
//!
//! A header is two little-endian 64-bit words:
//!
//! ```text
//! word 0:  [ 0..20) destination core   [20..64) base address
//! word 1:  [ 0..31) handler id         [31..44) per-invocation size
//!          [44..54) invocation count   [54..64) address stride (two's complement)
//! ```
//!
//! The header is followed by `count` invocation blocks of `size` bytes, each padded to the wire alignment.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    fail::Fail,
    limits::{
        ADDRESS_BITS,
        CORE_BITS,
        COUNT_BITS,
        HANDLER_BITS,
        HEADER_SIZE,
        MAX_ADDRESS,
        MAX_COMBINED_COUNT,
        MAX_CORES,
        MAX_MESSAGE_SIZE,
        MAX_STRIDE,
        MIN_STRIDE,
        SIZE_BITS,
        STRIDE_BITS,
        WIRE_ALIGNMENT,
    },
    network::handlers::HandlerId,
    types::CoreId,
};

//======================================================================================================================
// Constants
//======================================================================================================================

const HANDLER_SHIFT: u32 = 0;
const SIZE_SHIFT: u32 = HANDLER_SHIFT + HANDLER_BITS;
const COUNT_SHIFT: u32 = SIZE_SHIFT + SIZE_BITS;
const STRIDE_SHIFT: u32 = COUNT_SHIFT + COUNT_BITS;

//======================================================================================================================
// Structures
//======================================================================================================================

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct MessageHeader {
    pub dest: CoreId,
    pub address: u64,
    pub handler: HandlerId,
    /// Bytes of one invocation, before padding.
    pub size: u16,
    /// Invocations sharing this header.
    pub count: u16,
    /// Address distance between consecutive invocations.
    pub stride: i16,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl MessageHeader {
    /// Creates the header of a single invocation.
    pub fn new(dest: CoreId, address: u64, handler: HandlerId, size: usize) -> Result<Self, Fail> {
        if size > MAX_MESSAGE_SIZE {
            let cause: String = format!("invocation of {} bytes exceeds {} bytes", size, MAX_MESSAGE_SIZE);
            error!("new(): {}", cause);
            return Err(Fail::new(libc::EMSGSIZE, &cause));
        }
        let header: Self = Self {
            dest,
            address,
            handler,
            size: size as u16,
            count: 1,
            stride: 0,
        };
        header.validate()?;
        Ok(header)
    }

    /// Serializes this header.
    pub fn pack(&self) -> [u8; HEADER_SIZE] {
        let word0: u64 = (u64::from(self.dest) & mask(CORE_BITS)) | ((self.address & mask(ADDRESS_BITS)) << CORE_BITS);
        let word1: u64 = ((u64::from(self.handler) & mask(HANDLER_BITS)) << HANDLER_SHIFT)
            | ((self.size as u64 & mask(SIZE_BITS)) << SIZE_SHIFT)
            | ((self.count as u64 & mask(COUNT_BITS)) << COUNT_SHIFT)
            | ((self.stride as i64 as u64 & mask(STRIDE_BITS)) << STRIDE_SHIFT);
        let mut bytes: [u8; HEADER_SIZE] = [0; HEADER_SIZE];
        bytes[0..8].copy_from_slice(&word0.to_le_bytes());
        bytes[8..16].copy_from_slice(&word1.to_le_bytes());
        bytes
    }

    /// Deserializes a header from the first bytes of `bytes`.
    pub fn unpack(bytes: &[u8]) -> Result<Self, Fail> {
        if bytes.len() < HEADER_SIZE {
            let cause: String = format!("truncated header ({} bytes)", bytes.len());
            error!("unpack(): {}", cause);
            return Err(Fail::new(libc::EBADMSG, &cause));
        }
        let mut word: [u8; 8] = [0; 8];
        word.copy_from_slice(&bytes[0..8]);
        let word0: u64 = u64::from_le_bytes(word);
        word.copy_from_slice(&bytes[8..16]);
        let word1: u64 = u64::from_le_bytes(word);

        let raw_stride: u16 = ((word1 >> STRIDE_SHIFT) & mask(STRIDE_BITS)) as u16;
        // Sign-extend the stride field.
        let stride: i16 = ((raw_stride << (16 - STRIDE_BITS)) as i16) >> (16 - STRIDE_BITS);
        let header: Self = Self {
            dest: CoreId::from((word0 & mask(CORE_BITS)) as u32),
            address: word0 >> CORE_BITS,
            handler: HandlerId::from(((word1 >> HANDLER_SHIFT) & mask(HANDLER_BITS)) as u32),
            size: ((word1 >> SIZE_SHIFT) & mask(SIZE_BITS)) as u16,
            count: ((word1 >> COUNT_SHIFT) & mask(COUNT_BITS)) as u16,
            stride,
        };
        header.validate()?;
        Ok(header)
    }

    /// Bytes taken by one invocation on the wire.
    pub fn block_size(&self) -> usize {
        padded(self.size as usize)
    }

    /// Bytes taken by this header and all of its invocations on the wire.
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.count as usize * self.block_size()
    }

    /// Address of the `index`-th invocation.
    pub fn address_at(&self, index: usize) -> u64 {
        let offset: i64 = self.stride as i64 * index as i64;
        (self.address as i64).wrapping_add(offset) as u64 & MAX_ADDRESS
    }

    fn validate(&self) -> Result<(), Fail> {
        let cause: Option<String> = if self.dest.index() >= MAX_CORES {
            Some(format!("destination {:?} does not fit the wire format", self.dest))
        } else if self.address > MAX_ADDRESS {
            Some(format!("address {:#x} does not fit the wire format", self.address))
        } else if u32::from(self.handler) as u64 > mask(HANDLER_BITS) {
            Some(format!("handler {:?} does not fit the wire format", self.handler))
        } else if self.count == 0 || self.count > MAX_COMBINED_COUNT {
            Some(format!("invalid invocation count {}", self.count))
        } else if (self.stride as i64) < MIN_STRIDE || (self.stride as i64) > MAX_STRIDE {
            Some(format!("stride {} does not fit the wire format", self.stride))
        } else {
            None
        };
        match cause {
            Some(cause) => {
                error!("validate(): {}", cause);
                Err(Fail::new(libc::EBADMSG, &cause))
            },
            None => Ok(()),
        }
    }
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// Rounds `size` up to the wire alignment.
pub fn padded(size: usize) -> usize {
    (size + WIRE_ALIGNMENT - 1) & !(WIRE_ALIGNMENT - 1)
}

fn mask(bits: u32) -> u64 {
    (1u64 << bits) - 1
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
