// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    limits::TASK_ARG_WORDS,
    scheduler::TaskContext,
    tasks::steal_queue::WireCopy,
};
use ::std::{
    fmt,
    marker::PhantomData,
    mem::{
        self,
        MaybeUninit,
    },
    ptr,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Entry point of a task built from a function and three words.
pub type TaskFn = fn(&mut TaskContext<'_>, u64, u64, u64);

type ClosureFn = unsafe fn(&mut TaskContext<'_>, *const MaybeUninit<u64>);

#[derive(Clone, Copy)]
enum Entry {
    Words(TaskFn),
    /// Entry of a closure stored inline in the argument words.
    Closure(ClosureFn),
}

/// A unit of work. A task is an entry point and three machine words, fits in a fixed inline buffer and never
/// allocates. Tasks move between cores as raw bytes, so entry points must be valid on every core of the process.
#[derive(Clone, Copy)]
pub struct Task {
    entry: Entry,
    args: [MaybeUninit<u64>; TASK_ARG_WORDS],
}

/// Checks at compile time that a closure of type `F` fits the argument words of a task.
struct InlineCapture<F>(PhantomData<F>);

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl<F> InlineCapture<F> {
    const FITS: () = assert!(
        mem::size_of::<F>() <= mem::size_of::<[u64; TASK_ARG_WORDS]>() && mem::align_of::<F>() <= mem::align_of::<u64>(),
        "task closure does not fit in three machine words"
    );
}

impl Task {
    pub fn new(f: TaskFn, a0: u64, a1: u64, a2: u64) -> Self {
        Self {
            entry: Entry::Words(f),
            args: [MaybeUninit::new(a0), MaybeUninit::new(a1), MaybeUninit::new(a2)],
        }
    }

    /// Builds a task from a closure whose captured state fits in three machine words. Larger captures fail to compile.
    pub fn from_closure<F>(f: F) -> Self
    where
        F: FnOnce(&mut TaskContext<'_>) + Copy + Send + 'static,
    {
        #[allow(clippy::let_unit_value)]
        let () = InlineCapture::<F>::FITS;
        let mut args: [MaybeUninit<u64>; TASK_ARG_WORDS] = [MaybeUninit::uninit(); TASK_ARG_WORDS];
        // Safety: the argument words are large and aligned enough for `F`, as checked above.
        unsafe { ptr::write(args.as_mut_ptr() as *mut F, f) };
        Self {
            entry: Entry::Closure(call_inline::<F>),
            args,
        }
    }

    /// Runs this task to completion on the calling worker.
    pub fn execute(self, cx: &mut TaskContext<'_>) {
        match self.entry {
            Entry::Words(f) => {
                // Safety: tasks with a word entry initialize all argument words.
                let (a0, a1, a2): (u64, u64, u64) =
                    unsafe { (self.args[0].assume_init(), self.args[1].assume_init(), self.args[2].assume_init()) };
                f(cx, a0, a1, a2)
            },
            // Safety: closure entries are only paired with the arguments written by `from_closure`.
            Entry::Closure(f) => unsafe { f(cx, self.args.as_ptr()) },
        }
    }
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

unsafe fn call_inline<F>(cx: &mut TaskContext<'_>, args: *const MaybeUninit<u64>)
where
    F: FnOnce(&mut TaskContext<'_>) + Copy + Send + 'static,
{
    let f: F = ptr::read(args as *const F);
    f(cx)
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

// Safety: a task is a function address and plain words, both meaningful on any core of the process.
unsafe impl WireCopy for Task {}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.entry {
            Entry::Words(entry) => {
                // Safety: tasks with a word entry initialize all argument words.
                let args: [u64; TASK_ARG_WORDS] =
                    unsafe { [self.args[0].assume_init(), self.args[1].assume_init(), self.args[2].assume_init()] };
                write!(f, "Task(fn@{:p}, {:?})", entry as *const (), args)
            },
            Entry::Closure(entry) => write!(f, "Task(closure@{:p})", entry as *const ()),
        }
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
