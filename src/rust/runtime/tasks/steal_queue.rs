// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Work-stealing queue.
//!
//! The queue is a non-circular array with two indices. Elements in `[bottom, top)` are live: the owner pushes and pops
//! at `top`, thieves take from `bottom`. A steal reserves `[bottom, bottom + amount)` by advancing `bottom` and ships
//! the segment to the thief as raw bytes. Space below `bottom` is only reclaimed once the queue is empty and no segment
//! is still on its way out.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    fail::protocol_violation,
    limits::{
        MAX_MESSAGE_SIZE,
        STEAL_REPLY_RESERVE,
    },
    network::Completion,
    scheduler::{
        HandlerContext,
        TaskContext,
    },
    sync::{
        ReplyId,
        SharedFullEmpty,
    },
    types::CoreId,
    SharedObject,
    SharedRuntime,
};
use ::std::{
    mem::{
        self,
        MaybeUninit,
    },
    ops::{
        Deref,
        DerefMut,
    },
    ptr,
    slice,
};

//======================================================================================================================
// Traits
//======================================================================================================================

/// Plain data that may be moved between cores as raw bytes.
///
/// # Safety
///
/// Implementors must be valid when rebuilt from a byte copy on any core of the process: no references, no owned
/// resources and no pointers that are meaningful on one core only.
pub unsafe trait WireCopy: Copy + Send + 'static {}

//======================================================================================================================
// Structures
//======================================================================================================================

#[derive(Clone, Copy, Debug, Default)]
pub struct StealQueueStats {
    pub pushes: u64,
    pub pops: u64,
    /// Steals this core issued.
    pub steals: u64,
    /// Steals this core issued that came back empty.
    pub steals_failed: u64,
    /// Elements this core received from steals.
    pub stolen: u64,
    /// Elements this core gave away to thieves.
    pub given: u64,
}

pub struct StealQueue<T: WireCopy> {
    core: CoreId,
    slots: Box<[MaybeUninit<T>]>,
    bottom: usize,
    top: usize,
    /// Segments reserved by thieves whose copy-out has not completed.
    num_victim_segments: usize,
    /// Steals this core issued against other queues that are still unanswered.
    steals_pending: usize,
    stats: StealQueueStats,
}

/// Handle to the steal queue of a core. Clones refer to the same queue.
pub struct SharedStealQueue<T: WireCopy>(SharedObject<StealQueue<T>>);

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl<T: WireCopy> StealQueue<T> {
    fn new(core: CoreId, capacity: usize) -> Self {
        let mut slots: Vec<MaybeUninit<T>> = Vec::with_capacity(capacity);
        slots.resize_with(capacity, MaybeUninit::uninit);
        Self {
            core,
            slots: slots.into_boxed_slice(),
            bottom: 0,
            top: 0,
            num_victim_segments: 0,
            steals_pending: 0,
            stats: StealQueueStats::default(),
        }
    }

    pub fn push(&mut self, value: T) {
        if self.top >= self.slots.len() {
            self.fatal("push on a full queue");
        }
        self.slots[self.top] = MaybeUninit::new(value);
        self.top += 1;
        self.stats.pushes += 1;
    }

    pub fn pop(&mut self) -> T {
        if self.top <= self.bottom {
            self.fatal("pop on an empty queue");
        }
        self.top -= 1;
        self.stats.pops += 1;
        // Safety: slots in `[bottom, top)` are initialized.
        unsafe { self.slots[self.top].assume_init_read() }
    }

    /// Returns the element `pop` would return.
    pub fn peek(&self) -> T {
        if self.top <= self.bottom {
            self.fatal("peek on an empty queue");
        }
        // Safety: slots in `[bottom, top)` are initialized.
        unsafe { self.slots[self.top - 1].assume_init_read() }
    }

    pub fn depth(&self) -> usize {
        self.top - self.bottom
    }

    pub fn is_empty(&self) -> bool {
        self.top == self.bottom
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Index of the top element.
    pub fn top_posn(&self) -> usize {
        if self.top <= self.bottom {
            self.fatal("top position of an empty queue");
        }
        self.top - 1
    }

    pub fn bottom_posn(&self) -> usize {
        self.bottom
    }

    pub fn num_victim_segments(&self) -> usize {
        self.num_victim_segments
    }

    pub fn stats(&self) -> StealQueueStats {
        self.stats
    }

    pub fn mk_empty(&mut self) {
        self.bottom = 0;
        self.top = 0;
    }

    /// Resets both indices to zero when the queue is empty and no steal is outstanding in either direction. Returns
    /// whether it did.
    pub fn reclaim_space(&mut self) -> bool {
        if self.is_empty() && self.steals_pending == 0 && self.num_victim_segments == 0 {
            self.mk_empty();
            true
        } else {
            false
        }
    }

    /// Reserves the bottom half of the live segment, at most `max_steal` elements, for a thief. Returns the start and
    /// length of the reserved range.
    pub fn reserve_for_steal(&mut self, max_steal: usize) -> Option<(usize, usize)> {
        let amount: usize = (self.depth() / 2).min(max_steal);
        if amount == 0 {
            return None;
        }
        let start: usize = self.bottom;
        self.bottom += amount;
        self.num_victim_segments += 1;
        self.stats.given += amount as u64;
        Some((start, amount))
    }

    /// Raw bytes of a range handed out by `reserve_for_steal`.
    pub fn segment_bytes(&self, start: usize, amount: usize) -> &[u8] {
        if start + amount > self.bottom {
            self.fatal("segment is not reserved");
        }
        let segment: &[MaybeUninit<T>] = &self.slots[start..start + amount];
        // Safety: the segment lies below `bottom`, was initialized by `push` and is no longer touched locally.
        unsafe { slice::from_raw_parts(segment.as_ptr() as *const u8, mem::size_of_val(segment)) }
    }

    /// Marks a reserved segment as copied out.
    pub fn release_segment(&mut self) {
        if self.num_victim_segments == 0 {
            self.fatal("release of a segment that was never reserved");
        }
        self.num_victim_segments -= 1;
    }

    /// Copies the elements carried by `bytes` onto the top of the queue. Returns how many there were.
    pub fn accept_stolen(&mut self, bytes: &[u8]) -> usize {
        let size: usize = mem::size_of::<T>().max(1);
        if bytes.len() % size != 0 {
            self.fatal("stolen segment is not a whole number of elements");
        }
        let amount: usize = bytes.len() / size;
        if self.top + amount > self.slots.len() {
            self.fatal("stolen segment overflows the queue");
        }
        for (i, element) in bytes.chunks_exact(size).enumerate() {
            // Safety: `T` is `WireCopy` and the bytes were produced by `segment_bytes` for the same type.
            let value: T = unsafe { ptr::read_unaligned(element.as_ptr() as *const T) };
            self.slots[self.top + i] = MaybeUninit::new(value);
        }
        self.top += amount;
        self.stats.stolen += amount as u64;
        amount
    }

    fn fatal(&self, cause: &str) -> ! {
        protocol_violation(&format!(
            "{} (core={:?} bottom={} top={} capacity={} victim_segments={} steals_pending={})",
            cause,
            self.core,
            self.bottom,
            self.top,
            self.slots.len(),
            self.num_victim_segments,
            self.steals_pending
        ))
    }
}

impl<T: WireCopy> SharedStealQueue<T> {
    pub fn new(core: CoreId, capacity: usize) -> Self {
        Self(SharedObject::new(StealQueue::new(core, capacity)))
    }

    /// Steals up to `max_steal` elements from the queue of the same type on `victim` and pushes them onto this queue.
    /// Blocks the calling task until the victim answers. Returns the number of elements stolen, zero when the victim
    /// had nothing to give.
    pub fn steal_locally(&mut self, cx: &mut TaskContext<'_>, victim: CoreId, max_steal: usize) -> usize {
        if self.steals_pending == 0 {
            self.reclaim_space();
        }
        let max_steal: usize = max_steal.min((MAX_MESSAGE_SIZE - STEAL_REPLY_RESERVE) / mem::size_of::<T>().max(1));
        let origin: CoreId = cx.core();
        self.steals_pending += 1;
        self.stats.steals += 1;

        let (slot, mut reply): (ReplyId, SharedFullEmpty<usize>) = cx.runtime().replies().alloc::<usize>();
        trace!("steal_locally(): {:?} asks {:?} for up to {}", origin, victim, max_steal);
        cx.send(victim, move |hcx: &mut HandlerContext| {
            hcx.runtime().serve_steal::<T>(origin, slot, max_steal);
        });
        let stolen: usize = reply.read_fe(cx);
        cx.runtime().replies().release(slot);

        self.steals_pending -= 1;
        if stolen == 0 {
            self.stats.steals_failed += 1;
        }
        trace!("steal_locally(): {:?} got {} from {:?}", origin, stolen, victim);
        stolen
    }
}

/// Victim and thief sides of a steal.
impl SharedRuntime {
    /// Answers a steal request of `origin` against this core's queue of `T`. Runs in handler context.
    fn serve_steal<T: WireCopy>(&mut self, origin: CoreId, slot: ReplyId, max_steal: usize) {
        let reply = move |hcx: &mut HandlerContext, bytes: &[u8]| {
            hcx.runtime().accept_steal::<T>(slot, bytes);
        };
        let mut queue: SharedStealQueue<T> = self.steal_queue::<T>();
        match queue.reserve_for_steal(max_steal) {
            Some((start, amount)) => {
                trace!("serve_steal(): {:?} gives {} to {:?}", self.core(), amount, origin);
                let completion: Completion = Box::new(|runtime: &mut SharedRuntime| {
                    runtime.steal_queue::<T>().release_segment();
                });
                self.send_with_completion(origin, queue.segment_bytes(start, amount), reply, completion);
            },
            None => self.send_with_payload(origin, &[], reply),
        }
    }

    /// Takes in the reply to a steal this core issued. Runs in handler context.
    fn accept_steal<T: WireCopy>(&mut self, slot: ReplyId, bytes: &[u8]) {
        let stolen: usize = self.steal_queue::<T>().accept_stolen(bytes);
        self.fill_reply(slot, stolen);
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

macro_rules! wire_copy {
    ($($ty:ty),*) => {
        $(
            // Safety: primitive values have no pointers or resources.
            unsafe impl WireCopy for $ty {}
        )*
    };
}

wire_copy!(u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize, f32, f64, bool, char, CoreId);

// Safety: arrays of plain data are plain data.
unsafe impl<T: WireCopy, const N: usize> WireCopy for [T; N] {}

impl<T: WireCopy> Clone for SharedStealQueue<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T: WireCopy> Deref for SharedStealQueue<T> {
    type Target = StealQueue<T>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<T: WireCopy> DerefMut for SharedStealQueue<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================

#[cfg(test)]
mod tests {
    use crate::runtime::{
        tasks::steal_queue::{
            SharedStealQueue,
            StealQueue,
        },
        types::CoreId,
    };
    use ::anyhow::Result;

    fn queue(capacity: usize) -> SharedStealQueue<u64> {
        SharedStealQueue::new(CoreId::new(0), capacity)
    }

    #[test]
    fn depth_is_pushes_minus_pops() -> Result<()> {
        let mut q: SharedStealQueue<u64> = queue(16);
        for i in 0..10 {
            q.push(i);
        }
        crate::ensure_eq!(q.pop(), 9);
        crate::ensure_eq!(q.pop(), 8);
        crate::ensure_eq!(q.peek(), 7);
        crate::ensure_eq!(q.depth(), 8);
        crate::ensure_eq!(q.top_posn(), 7);
        Ok(())
    }

    #[test]
    fn steal_takes_the_bottom_half_up_to_the_ceiling() -> Result<()> {
        let mut q: SharedStealQueue<u64> = queue(256);
        for i in 0..100 {
            q.push(i);
        }
        crate::ensure_eq!(q.reserve_for_steal(64), Some((0, 50)));
        crate::ensure_eq!(q.bottom_posn(), 50);
        crate::ensure_eq!(q.depth(), 50);
        crate::ensure_eq!(q.top_posn(), 99);

        // The ceiling wins over half of the depth.
        crate::ensure_eq!(q.reserve_for_steal(10), Some((50, 10)));
        crate::ensure_eq!(q.num_victim_segments(), 2);
        Ok(())
    }

    #[test]
    fn odd_depth_leaves_the_larger_share_with_the_victim() -> Result<()> {
        let mut q: SharedStealQueue<u64> = queue(16);
        for i in 0..7 {
            q.push(i);
        }
        crate::ensure_eq!(q.reserve_for_steal(64), Some((0, 3)));
        crate::ensure_eq!(q.depth(), 4);
        Ok(())
    }

    #[test]
    fn steal_from_empty_or_single_element_queue_fails() -> Result<()> {
        let mut q: SharedStealQueue<u64> = queue(16);
        crate::ensure_eq!(q.reserve_for_steal(64), None);
        q.push(1);
        crate::ensure_eq!(q.reserve_for_steal(64), None);
        crate::ensure_eq!(q.bottom_posn(), 0);
        Ok(())
    }

    #[test]
    fn stolen_segment_lands_on_the_thief_in_order() -> Result<()> {
        let mut victim: SharedStealQueue<u64> = queue(256);
        let mut thief: SharedStealQueue<u64> = SharedStealQueue::new(CoreId::new(1), 256);
        for i in 0..100 {
            victim.push(i);
        }
        let (start, amount): (usize, usize) = match victim.reserve_for_steal(64) {
            Some(range) => range,
            None => anyhow::bail!("steal should succeed"),
        };
        let bytes: Vec<u8> = victim.segment_bytes(start, amount).to_vec();
        crate::ensure_eq!(thief.accept_stolen(&bytes), 50);
        victim.release_segment();

        crate::ensure_eq!(thief.depth(), 50);
        crate::ensure_eq!(victim.depth(), 50);
        crate::ensure_eq!(thief.pop(), 49);
        crate::ensure_eq!(victim.pop(), 99);
        crate::ensure_eq!(thief.stats().stolen, 50);
        crate::ensure_eq!(victim.stats().given, 50);
        Ok(())
    }

    #[test]
    fn reclaim_waits_for_segments_in_flight() -> Result<()> {
        let mut q: SharedStealQueue<u64> = queue(8);
        for i in 0..4 {
            q.push(i);
        }
        crate::ensure_eq!(q.reserve_for_steal(8), Some((0, 2)));
        q.pop();
        q.pop();
        crate::ensure_eq!(q.depth(), 0);
        crate::ensure_eq!(q.reclaim_space(), false);
        crate::ensure_eq!(q.bottom_posn(), 2);

        q.release_segment();
        crate::ensure_eq!(q.reclaim_space(), true);
        crate::ensure_eq!(q.bottom_posn(), 0);
        // Reclaiming twice changes nothing.
        crate::ensure_eq!(q.reclaim_space(), true);
        crate::ensure_eq!((q.bottom_posn(), q.depth()), (0, 0));
        Ok(())
    }

    #[test]
    #[should_panic]
    fn push_on_a_full_queue_is_fatal() {
        let mut q: StealQueue<u64> = StealQueue::new(CoreId::new(0), 1);
        q.push(1);
        q.push(2);
    }

    #[test]
    #[should_panic]
    fn pop_on_an_empty_queue_is_fatal() {
        let mut q: SharedStealQueue<u64> = queue(4);
        q.pop();
    }
}
