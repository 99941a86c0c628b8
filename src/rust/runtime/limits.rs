// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Wire Format
//======================================================================================================================

/// Bits of the destination core field in a message header.
pub const CORE_BITS: u32 = 20;
/// Bits of the base address field in a message header.
pub const ADDRESS_BITS: u32 = 44;
/// Bits of the handler id field in a message header.
pub const HANDLER_BITS: u32 = 31;
/// Bits of the per-invocation size field in a message header.
pub const SIZE_BITS: u32 = 13;
/// Bits of the combined invocation count field in a message header.
pub const COUNT_BITS: u32 = 10;
/// Bits of the signed address stride field in a message header.
pub const STRIDE_BITS: u32 = 10;

/// Largest cluster that can be addressed on the wire.
pub const MAX_CORES: usize = 1 << CORE_BITS;
/// Largest global address offset.
pub const MAX_ADDRESS: u64 = (1 << ADDRESS_BITS) - 1;
/// Number of distinct handler ids.
pub const MAX_HANDLERS: usize = (1 << HANDLER_BITS) - 1;
/// Largest serialized invocation (capture plus payload), in bytes.
pub const MAX_MESSAGE_SIZE: usize = (1 << SIZE_BITS) - 1;
/// Largest number of invocations that share one header.
pub const MAX_COMBINED_COUNT: u16 = (1 << COUNT_BITS) - 1;
/// Smallest address stride between combined invocations.
pub const MIN_STRIDE: i64 = -(1 << (STRIDE_BITS - 1));
/// Largest address stride between combined invocations.
pub const MAX_STRIDE: i64 = (1 << (STRIDE_BITS - 1)) - 1;
/// Size of a packed message header.
pub const HEADER_SIZE: usize = 16;
/// Every header and invocation block starts on this boundary.
pub const WIRE_ALIGNMENT: usize = 8;
/// Largest handler capture accepted by the message layer.
pub const MAX_CAPTURE_SIZE: usize = 512;
/// Capture space reserved for the steal reply handler when sizing a stolen segment.
pub const STEAL_REPLY_RESERVE: usize = 64;

//======================================================================================================================
// Tasks
//======================================================================================================================

/// Number of machine words carried inline by a task.
pub const TASK_ARG_WORDS: usize = 3;

//======================================================================================================================
// Defaults
//======================================================================================================================

pub const DEFAULT_NUM_CORES: usize = 4;
pub const DEFAULT_MAX_WORKERS: usize = 16;
pub const DEFAULT_STACK_SIZE: usize = 256 * 1024;
pub const MIN_STACK_SIZE: usize = 16 * 1024;
pub const DEFAULT_PERIODIC_POLL_TICKS: u64 = 64;
pub const DEFAULT_STEAL_QUEUE_CAPACITY: usize = 1 << 16;
pub const DEFAULT_CHUNK_SIZE: usize = 64;
pub const DEFAULT_STEAL_ATTEMPTS: usize = 3;
pub const DEFAULT_CANCEL_INTERVAL: usize = 32;
pub const DEFAULT_FLUSH_THRESHOLD: usize = 4096;
pub const DEFAULT_FLUSH_TICKS: u64 = 16;
pub const DEFAULT_PROBE_INTERVAL: u64 = 32;

/// Packets drained from the transport per poll.
pub const RECEIVE_BATCH_SIZE: usize = 64;
