//! Cyclic barrier with an abort path.
//!
//! `std::sync::Barrier` has no way to release waiters early, so a fault
//! in one lane would strand its peers. This barrier adds `abort`: once
//! tripped, every current waiter wakes with [`BarrierWait::Broken`] and
//! every later `wait` returns immediately with the same. The broken
//! state is sticky for the lifetime of the barrier; each launch gets a
//! fresh one.

use parking_lot::{Condvar, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BarrierWait {
    /// All parties arrived; the group may proceed.
    Released,
    /// The barrier was aborted; the group must unwind.
    Broken,
}

impl BarrierWait {
    pub(crate) fn is_released(self) -> bool {
        matches!(self, BarrierWait::Released)
    }
}

#[derive(Debug)]
struct BarrierState {
    arrived: usize,
    generation: u64,
    broken: bool,
}

#[derive(Debug)]
pub(crate) struct GroupBarrier {
    parties: usize,
    state: Mutex<BarrierState>,
    cv: Condvar,
}

impl GroupBarrier {
    pub(crate) fn new(parties: usize) -> Self {
        debug_assert!(parties > 0);
        Self {
            parties,
            state: Mutex::new(BarrierState {
                arrived: 0,
                generation: 0,
                broken: false,
            }),
            cv: Condvar::new(),
        }
    }

    /// Block until all parties arrive or the barrier is aborted.
    pub(crate) fn wait(&self) -> BarrierWait {
        let mut state = self.state.lock();
        if state.broken {
            return BarrierWait::Broken;
        }
        let generation = state.generation;
        state.arrived += 1;
        if state.arrived == self.parties {
            state.arrived = 0;
            state.generation = state.generation.wrapping_add(1);
            self.cv.notify_all();
            return BarrierWait::Released;
        }
        while state.generation == generation && !state.broken {
            self.cv.wait(&mut state);
        }
        if state.broken {
            BarrierWait::Broken
        } else {
            BarrierWait::Released
        }
    }

    /// Break the barrier, waking every waiter with `Broken`.
    pub(crate) fn abort(&self) {
        let mut state = self.state.lock();
        state.broken = true;
        self.cv.notify_all();
    }
}
