// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    fail::Fail,
    sync::full_empty::SharedFullEmpty,
};
use ::slab::Slab;
use ::std::any::Any;

//======================================================================================================================
// Structures
//======================================================================================================================

/// Names a reply slot across cores. Travels inside request messages and comes back with the reply.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct ReplyId(u64);

/// Cells that blocked tasks wait on for the result of a remote operation.
#[derive(Default)]
pub struct ReplySlots {
    slots: Slab<Box<dyn Any>>,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl ReplySlots {
    /// Allocates an empty slot for a result of type `T`.
    pub fn alloc<T: Copy + 'static>(&mut self) -> (ReplyId, SharedFullEmpty<T>) {
        let cell: SharedFullEmpty<T> = SharedFullEmpty::new();
        let id: usize = self.slots.insert(Box::new(cell.clone()));
        (ReplyId(id as u64), cell)
    }

    /// Fills the slot `id` with `value`, waking the task waiting on it.
    pub fn fill<T: Copy + 'static>(&mut self, id: ReplyId, value: T) -> Result<(), Fail> {
        let slot: &mut Box<dyn Any> = match self.slots.get_mut(id.0 as usize) {
            Some(slot) => slot,
            None => {
                let cause: String = format!("no reply slot {:?}", id);
                error!("fill(): {}", cause);
                return Err(Fail::new(libc::ENOENT, &cause));
            },
        };
        match slot.downcast_mut::<SharedFullEmpty<T>>() {
            Some(cell) => {
                cell.write_xf(value);
                Ok(())
            },
            None => {
                let cause: String = format!("reply slot {:?} expects another type", id);
                error!("fill(): {}", cause);
                Err(Fail::new(libc::EINVAL, &cause))
            },
        }
    }

    /// Frees the slot `id` once its result has been consumed.
    pub fn release(&mut self, id: ReplyId) {
        if self.slots.try_remove(id.0 as usize).is_none() {
            warn!("release(): reply slot {:?} was not allocated", id);
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================

#[cfg(test)]
mod tests {
    use crate::runtime::sync::{
        full_empty::SharedFullEmpty,
        reply::{
            ReplyId,
            ReplySlots,
        },
    };
    use ::anyhow::Result;

    #[test]
    fn fill_reaches_the_allocated_cell() -> Result<()> {
        let mut slots: ReplySlots = ReplySlots::default();
        let (id, cell): (ReplyId, SharedFullEmpty<u32>) = slots.alloc::<u32>();
        crate::ensure_eq!(cell.is_empty(), true);
        if slots.fill(id, 42u32).is_err() {
            anyhow::bail!("fill() failed");
        }
        crate::ensure_eq!(cell.is_full(), true);
        crate::ensure_eq!(cell.read_xx(), Some(42));
        slots.release(id);
        crate::ensure_eq!(slots.is_empty(), true);
        Ok(())
    }

    #[test]
    fn fill_with_wrong_type_fails() -> Result<()> {
        let mut slots: ReplySlots = ReplySlots::default();
        let (id, _cell): (ReplyId, SharedFullEmpty<u32>) = slots.alloc::<u32>();
        crate::ensure_eq!(slots.fill(id, 1u64).is_err(), true);
        Ok(())
    }

    #[test]
    fn fill_after_release_fails() -> Result<()> {
        let mut slots: ReplySlots = ReplySlots::default();
        let (id, _cell): (ReplyId, SharedFullEmpty<u8>) = slots.alloc::<u8>();
        slots.release(id);
        crate::ensure_eq!(slots.fill(id, 1u8).map_err(|e| e.errno), Err(libc::ENOENT));
        Ok(())
    }
}
