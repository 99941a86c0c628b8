// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Distributed termination detection.
//!
//! Core 0 runs waves of probes. Every core answers with whether it is passive and with its counts of counted messages
//! sent and received. The cluster has terminated once two consecutive waves find every core passive with identical
//! totals and as many messages received as sent. Messages of the protocol itself are not counted.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    scheduler::{
        HandlerContext,
        TaskContext,
    },
    sync::SharedFullEmpty,
    types::CoreId,
    SharedObject,
    SharedRuntime,
};
use ::std::ops::{
    Deref,
    DerefMut,
};

//======================================================================================================================
// Constants
//======================================================================================================================

const COORDINATOR: CoreId = CoreId::new(0);

//======================================================================================================================
// Structures
//======================================================================================================================

/// Why a termination wait ended.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Wakeup {
    /// New work may be available.
    Cancel,
    Terminate,
}

/// Totals of one wave.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct WaveTotals {
    pub passive: bool,
    pub sent: u64,
    pub received: u64,
}

pub struct TerminationDetector {
    core: CoreId,
    num_cores: usize,
    waiting: bool,
    wakeup: SharedFullEmpty<Wakeup>,
    probe_interval: u64,
    wave: u64,
    wave_active: bool,
    replies: usize,
    totals: WaveTotals,
    previous: Option<WaveTotals>,
    last_wave_tick: u64,
    terminated: bool,
}

#[derive(Clone)]
pub struct SharedTermination(SharedObject<TerminationDetector>);

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl WaveTotals {
    fn merge(&mut self, other: &WaveTotals) {
        self.passive &= other.passive;
        self.sent += other.sent;
        self.received += other.received;
    }

    /// Whether these totals, following `previous`, prove that the cluster is quiescent.
    pub fn is_quiescent(&self, previous: Option<&WaveTotals>) -> bool {
        self.passive && self.sent == self.received && previous == Some(self)
    }
}

impl SharedTermination {
    pub fn new(core: CoreId, num_cores: usize, probe_interval: u64) -> Self {
        Self(SharedObject::new(TerminationDetector {
            core,
            num_cores,
            waiting: false,
            wakeup: SharedFullEmpty::new(),
            probe_interval,
            wave: 0,
            wave_active: false,
            replies: 0,
            totals: WaveTotals::default(),
            previous: None,
            last_wave_tick: 0,
            terminated: false,
        }))
    }

    /// Blocks the last active worker of the core until the cluster terminates or new work may have arrived. Returns
    /// true on termination.
    pub fn wait(&mut self, cx: &mut TaskContext<'_>) -> bool {
        if self.terminated {
            return true;
        }
        self.waiting = true;
        let mut wakeup: SharedFullEmpty<Wakeup> = self.wakeup.clone();
        let reason: Wakeup = wakeup.read_fe(cx);
        self.waiting = false;
        trace!("wait(): core={:?} woke up ({:?})", self.core, reason);
        reason == Wakeup::Terminate
    }

    /// Ends a pending wait because work may be available.
    pub fn cancel(&mut self) {
        if self.waiting && self.wakeup.is_empty() {
            self.wakeup.write_xf(Wakeup::Cancel);
        }
    }

    pub fn terminate(&mut self) {
        self.terminated = true;
        if self.waiting && self.wakeup.is_empty() {
            self.wakeup.write_xf(Wakeup::Terminate);
        }
    }

    pub fn is_waiting(&self) -> bool {
        self.waiting
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Opens a new wave if this core coordinates, no wave is running and the probe interval elapsed. Returns the number
    /// of the new wave.
    pub fn should_start_wave(&mut self, now: u64) -> Option<u64> {
        if self.core != COORDINATOR || self.terminated || self.wave_active {
            return None;
        }
        if now.saturating_sub(self.last_wave_tick) < self.probe_interval {
            return None;
        }
        self.wave += 1;
        self.wave_active = true;
        self.replies = 0;
        self.totals = WaveTotals {
            passive: true,
            sent: 0,
            received: 0,
        };
        self.last_wave_tick = now;
        Some(self.wave)
    }

    /// Folds the reply of one core into the current wave. Once every core has replied, returns whether the cluster is
    /// quiescent.
    pub fn record_reply(&mut self, wave: u64, totals: WaveTotals) -> Option<bool> {
        if !self.wave_active || wave != self.wave {
            return None;
        }
        self.totals.merge(&totals);
        self.replies += 1;
        if self.replies < self.num_cores {
            return None;
        }

        self.wave_active = false;
        let current: WaveTotals = self.totals;
        let quiescent: bool = current.is_quiescent(self.previous.as_ref());
        self.previous = if current.passive { Some(current) } else { None };
        if quiescent {
            // No wave may start once termination is decided.
            self.terminated = true;
        }
        trace!(
            "record_reply(): wave {} passive={} sent={} received={}",
            wave,
            current.passive,
            current.sent,
            current.received
        );
        Some(quiescent)
    }
}

/// Termination protocol of a core.
impl SharedRuntime {
    /// Drives the coordinator side of the protocol. Called by the scheduler when it has nothing to run.
    pub fn poll_termination(&mut self) {
        let now: u64 = self.ticks();
        let mut termination: SharedTermination = self.termination();
        if !self.local_totals().passive {
            return;
        }
        if let Some(wave) = termination.should_start_wave(now) {
            trace!("poll_termination(): starting wave {}", wave);
            for core in 0..self.num_cores() as u32 {
                self.send_control(CoreId::from(core), move |hcx: &mut HandlerContext| {
                    hcx.runtime().answer_probe(wave);
                });
            }
        }
    }

    fn answer_probe(&mut self, wave: u64) {
        let totals: WaveTotals = self.local_totals();
        self.send_control(COORDINATOR, move |hcx: &mut HandlerContext| {
            hcx.runtime().record_probe_reply(wave, totals);
        });
    }

    fn record_probe_reply(&mut self, wave: u64, totals: WaveTotals) {
        let mut termination: SharedTermination = self.termination();
        if let Some(true) = termination.record_reply(wave, totals) {
            info!("record_probe_reply(): cluster quiescent after wave {}", wave);
            for core in 0..self.num_cores() as u32 {
                self.send_control(CoreId::from(core), |hcx: &mut HandlerContext| {
                    hcx.runtime().on_terminate();
                });
            }
        }
    }

    fn on_terminate(&mut self) {
        debug!("on_terminate(): core={:?}", self.core());
        self.task_manager().set_work_done();
        self.termination().terminate();
        self.scheduler().wake_all_idle();
    }

    /// Whether this core is passive, and its message counts.
    fn local_totals(&mut self) -> WaveTotals {
        let passive: bool = self.termination().is_waiting()
            && !self.scheduler().has_ready()
            && !self.task_manager().has_local_work()
            && !self.task_manager().is_stealing();
        WaveTotals {
            passive,
            sent: self.messenger().sent_counted(),
            received: self.messenger().received_counted(),
        }
    }

    /// Wakes the termination wait of this core because work showed up.
    pub fn notify_work(&mut self) {
        self.termination().cancel();
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl Deref for SharedTermination {
    type Target = TerminationDetector;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for SharedTermination {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
