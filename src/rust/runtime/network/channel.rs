// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! In-process transport. Every core is an OS thread of the same process; packets travel over crossbeam channels and
//! collectives meet in shared state.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    fail::Fail,
    network::transport::{
        SendId,
        Transport,
    },
    types::CoreId,
};
use ::crossbeam_channel::{
    self,
    Receiver,
    Sender,
    TryRecvError,
};
use ::std::{
    collections::{
        HashMap,
        VecDeque,
    },
    sync::{
        atomic::{
            AtomicBool,
            Ordering,
        },
        Arc,
        Mutex,
        MutexGuard,
        PoisonError,
    },
};

//======================================================================================================================
// Structures
//======================================================================================================================

type Packet = (CoreId, Vec<u8>);

#[derive(Default)]
struct Collectives {
    barrier_arrived: usize,
    barrier_generation: u64,
    reduce_arrived: usize,
    reduce_sum: u64,
    reduce_generation: u64,
    /// Completed sums by generation, with the number of cores that have yet to collect them.
    reduce_results: HashMap<u64, (u64, usize)>,
}

struct Shared {
    num_cores: usize,
    collectives: Mutex<Collectives>,
    aborted: AtomicBool,
}

/// Builds the transports of an in-process cluster.
pub struct ChannelNetwork;

/// Transport endpoint of one core.
pub struct ChannelTransport {
    core: CoreId,
    senders: Vec<Sender<Packet>>,
    receiver: Receiver<Packet>,
    shared: Arc<Shared>,
    next_send: u64,
    completed: VecDeque<SendId>,
    barrier_generation: Option<u64>,
    reduce_generation: Option<u64>,
}

/// Raises the abort flag of a cluster from outside of its transports.
#[derive(Clone)]
pub struct AbortHandle(Arc<Shared>);

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl ChannelNetwork {
    /// Creates connected transports for `num_cores` cores, in core order.
    pub fn new(num_cores: usize) -> Vec<ChannelTransport> {
        let shared: Arc<Shared> = Arc::new(Shared {
            num_cores,
            collectives: Mutex::new(Collectives::default()),
            aborted: AtomicBool::new(false),
        });
        let (senders, receivers): (Vec<Sender<Packet>>, Vec<Receiver<Packet>>) =
            (0..num_cores).map(|_| crossbeam_channel::unbounded()).unzip();
        receivers
            .into_iter()
            .enumerate()
            .map(|(core, receiver)| ChannelTransport {
                core: CoreId::from(core as u32),
                senders: senders.clone(),
                receiver,
                shared: shared.clone(),
                next_send: 0,
                completed: VecDeque::new(),
                barrier_generation: None,
                reduce_generation: None,
            })
            .collect()
    }
}

impl ChannelTransport {
    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle(self.shared.clone())
    }

    fn collectives(&self) -> MutexGuard<'_, Collectives> {
        // A poisoned lock only means another core panicked, which the abort flag already reports.
        self.shared.collectives.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl AbortHandle {
    pub fn abort(&self) {
        self.0.aborted.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.aborted.load(Ordering::SeqCst)
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl Transport for ChannelTransport {
    fn local_core(&self) -> CoreId {
        self.core
    }

    fn num_cores(&self) -> usize {
        self.shared.num_cores
    }

    fn send(&mut self, dest: CoreId, packet: Vec<u8>) -> Result<SendId, Fail> {
        let sender: &Sender<Packet> = match self.senders.get(dest.index()) {
            Some(sender) => sender,
            None => {
                let cause: String = format!("no such core {:?}", dest);
                error!("send(): {}", cause);
                return Err(Fail::new(libc::EINVAL, &cause));
            },
        };
        if sender.send((self.core, packet)).is_err() {
            let cause: String = format!("{:?} is gone", dest);
            error!("send(): {}", cause);
            return Err(Fail::new(libc::ECONNRESET, &cause));
        }
        let id: SendId = SendId::from(self.next_send);
        self.next_send += 1;
        // Channels own the packet as soon as it is sent.
        self.completed.push_back(id);
        Ok(id)
    }

    fn poll_receive(&mut self) -> Option<(CoreId, Vec<u8>)> {
        match self.receiver.try_recv() {
            Ok(packet) => Some(packet),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    fn poll_completion(&mut self) -> Option<SendId> {
        self.completed.pop_front()
    }

    fn barrier_notify(&mut self) {
        let num_cores: usize = self.shared.num_cores;
        let generation: u64 = {
            let mut collectives: MutexGuard<Collectives> = self.collectives();
            let generation: u64 = collectives.barrier_generation;
            collectives.barrier_arrived += 1;
            if collectives.barrier_arrived == num_cores {
                collectives.barrier_arrived = 0;
                collectives.barrier_generation += 1;
            }
            generation
        };
        self.barrier_generation = Some(generation);
    }

    fn barrier_try(&mut self) -> bool {
        let generation: u64 = match self.barrier_generation {
            Some(generation) => generation,
            None => return false,
        };
        if self.collectives().barrier_generation > generation {
            self.barrier_generation = None;
            true
        } else {
            false
        }
    }

    fn allreduce_notify(&mut self, value: u64) {
        let num_cores: usize = self.shared.num_cores;
        let generation: u64 = {
            let mut collectives: MutexGuard<Collectives> = self.collectives();
            let generation: u64 = collectives.reduce_generation;
            collectives.reduce_sum += value;
            collectives.reduce_arrived += 1;
            if collectives.reduce_arrived == num_cores {
                let sum: u64 = collectives.reduce_sum;
                collectives.reduce_results.insert(generation, (sum, num_cores));
                collectives.reduce_sum = 0;
                collectives.reduce_arrived = 0;
                collectives.reduce_generation += 1;
            }
            generation
        };
        self.reduce_generation = Some(generation);
    }

    fn allreduce_try(&mut self) -> Option<u64> {
        let generation: u64 = self.reduce_generation?;
        let sum: u64 = {
            let mut collectives: MutexGuard<Collectives> = self.collectives();
            let (sum, remaining) = {
                let entry: &mut (u64, usize) = collectives.reduce_results.get_mut(&generation)?;
                entry.1 -= 1;
                *entry
            };
            if remaining == 0 {
                collectives.reduce_results.remove(&generation);
            }
            sum
        };
        self.reduce_generation = None;
        Some(sum)
    }

    fn abort(&self) {
        self.shared.aborted.store(true, Ordering::SeqCst);
    }

    fn is_aborted(&self) -> bool {
        self.shared.aborted.load(Ordering::SeqCst)
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
