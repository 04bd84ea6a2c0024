//! Kernel execution model.
//!
//! A device runs kernels on a fixed team of OS worker threads (lanes).
//! The grid's groups execute one at a time; within a group, every lane
//! walks the group's execution units round-robin (unit `flat` belongs to
//! lane `flat % lanes`), so unit-to-lane assignment is stable regardless
//! of how many lanes the device has. All lanes meet at [`GroupCtx::sync`],
//! which maps onto one process-wide barrier per launch.
//!
//! Faults do not stop a lane mid-stride. Raising one breaks the launch
//! barrier; every lane observes that at its next `sync` (or at the
//! group-end rendezvous), unwinds together, and the remaining groups are
//! skipped. The first fault is kept and reported by the queue at the next
//! synchronization point.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::barrier::GroupBarrier;
use crate::device::DeviceShared;
use crate::dim::Dim2;
use crate::error::DeviceFault;
use crate::launch::LaunchConfig;
use crate::memory::DeviceBuffer;

// ============================================================================
// Kernel trait
// ============================================================================

/// Device kernel body, invoked once per lane per group.
///
/// `run` must call [`GroupCtx::sync`] the same number of times on every
/// lane of the group, and must return early when `sync` yields `false`.
pub trait Kernel: Send + Sync {
    fn name(&self) -> &str {
        "kernel"
    }

    fn run(&self, ctx: &GroupCtx<'_>);
}

/// One execution unit of a group: its 2-D position and flat index
/// (`flat == pos.y * group_dim.x + pos.x`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unit {
    pub pos: Dim2,
    pub flat: usize,
}

// ============================================================================
// Launch-scoped state
// ============================================================================

/// Fault record plus the barrier all lanes of the launch share. Raising
/// a fault breaks the barrier, which is what actually unwinds the team.
pub(crate) struct LaunchState {
    first_fault: Mutex<Option<DeviceFault>>,
    pub(crate) barrier: GroupBarrier,
}

impl LaunchState {
    pub(crate) fn new(lanes: usize) -> Self {
        Self {
            first_fault: Mutex::new(None),
            barrier: GroupBarrier::new(lanes),
        }
    }

    /// Record `fault` and break the launch barrier. Only the first fault
    /// of a launch is kept.
    pub(crate) fn raise(&self, fault: DeviceFault) {
        let mut slot = self.first_fault.lock();
        if slot.is_some() {
            return;
        }
        *slot = Some(fault);
        drop(slot);
        self.barrier.abort();
    }

    pub(crate) fn fault(&self) -> Option<DeviceFault> {
        self.first_fault.lock().clone()
    }
}

/// Group-shared staging memory, word (`f32`) addressed.
///
/// One staging buffer exists per launch and is reused by every group in
/// turn; it is not cleared between groups. Out-of-bounds access raises a
/// [`DeviceFault::SharedOutOfBounds`] and turns the access into a no-op
/// (loads return `0.0`).
pub struct SharedMem {
    cells: Box<[AtomicU32]>,
    state: Arc<LaunchState>,
}

impl SharedMem {
    fn new(words: usize, state: Arc<LaunchState>) -> Self {
        let cells = (0..words).map(|_| AtomicU32::new(0)).collect();
        Self { cells, state }
    }

    /// Capacity in 4-byte words.
    pub fn words(&self) -> usize {
        self.cells.len()
    }

    pub fn load(&self, index: usize) -> f32 {
        match self.cells.get(index) {
            Some(cell) => f32::from_bits(cell.load(Ordering::Relaxed)),
            None => {
                self.state.raise(DeviceFault::SharedOutOfBounds {
                    index,
                    len: self.cells.len(),
                });
                0.0
            }
        }
    }

    pub fn store(&self, index: usize, value: f32) {
        match self.cells.get(index) {
            Some(cell) => cell.store(value.to_bits(), Ordering::Relaxed),
            None => self.state.raise(DeviceFault::SharedOutOfBounds {
                index,
                len: self.cells.len(),
            }),
        }
    }

    /// Overwrite every word. Meant for one unit to prime the staging
    /// area before a `sync`; concurrent stores are atomic but unordered.
    pub fn fill(&self, value: f32) {
        let bits = value.to_bits();
        for cell in self.cells.iter() {
            cell.store(bits, Ordering::Relaxed);
        }
    }
}

/// Everything a launch carries onto the team.
pub(crate) struct Task {
    pub(crate) kernel: Arc<dyn Kernel>,
    pub(crate) launch: LaunchConfig,
    pub(crate) staging: SharedMem,
    pub(crate) state: Arc<LaunchState>,
    pub(crate) device_id: usize,
    pub(crate) lanes: usize,
}

// ============================================================================
// Group context
// ============================================================================

/// Per-lane view of the group currently executing. Handed to
/// [`Kernel::run`]; not constructible outside the runtime.
pub struct GroupCtx<'a> {
    task: &'a Task,
    group: Dim2,
    lane: usize,
}

impl GroupCtx<'_> {
    /// Index of this group within the grid.
    pub fn group(&self) -> Dim2 {
        self.group
    }

    pub fn grid(&self) -> Dim2 {
        self.task.launch.grid
    }

    pub fn group_dim(&self) -> Dim2 {
        self.task.launch.group
    }

    pub fn lane(&self) -> usize {
        self.lane
    }

    pub fn lanes(&self) -> usize {
        self.task.lanes
    }

    /// The execution units of this group assigned to the calling lane:
    /// flat indices `lane, lane + lanes, lane + 2*lanes, ...`.
    pub fn units(&self) -> impl Iterator<Item = Unit> + '_ {
        let dim = self.task.launch.group;
        (self.lane..dim.count())
            .step_by(self.task.lanes)
            .map(move |flat| Unit {
                pos: Dim2::new(flat % dim.x, flat / dim.x),
                flat,
            })
    }

    /// Group-shared staging memory for this launch.
    pub fn shared(&self) -> &SharedMem {
        &self.task.staging
    }

    /// Read one element of a device buffer. A bad index or a buffer from
    /// another device raises a fault and yields `0.0`.
    pub fn load(&self, buf: &DeviceBuffer, index: usize) -> f32 {
        if buf.device_id() != self.task.device_id {
            self.task.state.raise(DeviceFault::WrongDevice {
                expected: self.task.device_id,
                actual: buf.device_id(),
            });
            return 0.0;
        }
        match buf.cell(index) {
            Some(cell) => f32::from_bits(cell.load(Ordering::Relaxed)),
            None => {
                self.task.state.raise(DeviceFault::IllegalAddress {
                    index,
                    len: buf.len(),
                });
                0.0
            }
        }
    }

    /// Write one element of a device buffer. Same fault rules as
    /// [`load`](Self::load).
    pub fn store(&self, buf: &DeviceBuffer, index: usize, value: f32) {
        if buf.device_id() != self.task.device_id {
            self.task.state.raise(DeviceFault::WrongDevice {
                expected: self.task.device_id,
                actual: buf.device_id(),
            });
            return;
        }
        match buf.cell(index) {
            Some(cell) => cell.store(value.to_bits(), Ordering::Relaxed),
            None => self.task.state.raise(DeviceFault::IllegalAddress {
                index,
                len: buf.len(),
            }),
        }
    }

    /// Group-wide barrier. Returns `true` when every lane arrived and the
    /// group may continue; `false` when the launch has faulted, in which
    /// case the kernel must return without further `sync` calls.
    ///
    /// Shared stores made before a `sync` that returns `true` are visible
    /// to all lanes after it.
    pub fn sync(&self) -> bool {
        self.task.state.barrier.wait().is_released()
    }

    /// Abort the launch with [`DeviceFault::Killed`].
    pub fn kill(&self, reason: impl Into<String>) {
        self.task
            .state
            .raise(DeviceFault::Killed(reason.into()));
    }
}

// ============================================================================
// Worker team
// ============================================================================

/// Rendezvous state between the queue thread and the lane workers.
/// Both barriers count `lanes + 1` parties, the extra one being the
/// queue thread.
pub(crate) struct TeamState {
    /// Queue thread + lanes meet here to hand a task over. Breaking this
    /// barrier tells parked lanes the device is being torn down before it
    /// ever ran (a lane thread failed to spawn).
    pub(crate) start: GroupBarrier,
    /// Queue thread + lanes meet here when the task is done.
    pub(crate) finish: GroupBarrier,
    /// `None` at the start rendezvous tells the lanes to exit.
    pub(crate) slot: Mutex<Option<Arc<Task>>>,
}

impl TeamState {
    pub(crate) fn new(lanes: usize) -> Self {
        Self {
            start: GroupBarrier::new(lanes + 1),
            finish: GroupBarrier::new(lanes + 1),
            slot: Mutex::new(None),
        }
    }
}

/// Body of each lane thread.
pub(crate) fn worker_loop(lane: usize, dev: Arc<DeviceShared>) {
    loop {
        if !dev.team.start.wait().is_released() {
            return;
        }
        let task = dev.team.slot.lock().clone();
        let Some(task) = task else {
            return;
        };
        run_groups(lane, &task);
        drop(task);
        dev.team.finish.wait();
    }
}

fn run_groups(lane: usize, task: &Task) {
    for group in task.launch.grid.iter() {
        let ctx = GroupCtx { task, group, lane };
        // A panicking kernel must not strand its peers on the barrier.
        let outcome = catch_unwind(AssertUnwindSafe(|| task.kernel.run(&ctx)));
        if outcome.is_err() {
            task.state.raise(DeviceFault::Killed(format!(
                "kernel '{}' panicked",
                task.kernel.name()
            )));
        }
        // Group-end rendezvous: keeps lanes in the same group and gives
        // every lane a common point to observe a fault and stop.
        if !task.state.barrier.wait().is_released() {
            break;
        }
    }
}

/// Run one launch on the team. Called from the queue thread; blocks until
/// every group finished or the launch faulted. Returns the first fault.
pub(crate) fn run_launch(
    dev: &Arc<DeviceShared>,
    launch: LaunchConfig,
    kernel: Arc<dyn Kernel>,
) -> Option<DeviceFault> {
    let lanes = dev.config.lanes;
    let state = Arc::new(LaunchState::new(lanes));
    let task = Arc::new(Task {
        staging: SharedMem::new(launch.shared_words(), Arc::clone(&state)),
        kernel,
        launch,
        state: Arc::clone(&state),
        device_id: dev.id,
        lanes,
    });
    debug!(
        device = dev.id,
        kernel = task.kernel.name(),
        grid = %launch.grid,
        group = %launch.group,
        shared_bytes = launch.shared_bytes,
        "launch"
    );

    *dev.team.slot.lock() = Some(task);
    dev.team.start.wait();
    dev.team.finish.wait();
    // Release the kernel and its buffer handles now, not at the next launch.
    *dev.team.slot.lock() = None;

    state.fault()
}
