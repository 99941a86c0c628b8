// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    fail::Fail,
    types::CoreId,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Names a packet handed to the transport, for matching its send completion.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct SendId(u64);

//======================================================================================================================
// Traits
//======================================================================================================================

/// Packet transport between the cores of a cluster. Delivery is reliable and in order for every pair of cores. A core
/// may send to itself.
pub trait Transport {
    fn local_core(&self) -> CoreId;

    fn num_cores(&self) -> usize;

    /// Hands `packet` to the transport. Never blocks.
    fn send(&mut self, dest: CoreId, packet: Vec<u8>) -> Result<SendId, Fail>;

    /// Returns the next packet received by this core, with its source.
    fn poll_receive(&mut self) -> Option<(CoreId, Vec<u8>)>;

    /// Returns the next send whose packet the transport no longer needs.
    fn poll_completion(&mut self) -> Option<SendId>;

    /// Announces that this core entered the cluster barrier.
    fn barrier_notify(&mut self);

    /// Whether every core entered the barrier this core last announced.
    fn barrier_try(&mut self) -> bool;

    /// Contributes `value` to a cluster-wide sum.
    fn allreduce_notify(&mut self, value: u64);

    /// Returns the sum once every core has contributed.
    fn allreduce_try(&mut self) -> Option<u64>;

    /// Tells every core that the cluster is going down.
    fn abort(&self);

    fn is_aborted(&self) -> bool;
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl From<u64> for SendId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<SendId> for u64 {
    fn from(value: SendId) -> Self {
        value.0
    }
}
