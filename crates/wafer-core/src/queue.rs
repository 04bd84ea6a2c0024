//! The in-order execution queue and device-timeline events.
//!
//! Work is submitted fire-and-forget: [`DeviceQueue::launch`] returns as
//! soon as the command is enqueued. The queue thread pops commands one at
//! a time, validates launch geometry, and drives the worker team. The
//! first deferred error (bad geometry or a kernel fault) poisons the
//! queue: later launches are skipped, events still record, and the error
//! is reported by every following [`DeviceQueue::synchronize`].

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use crate::device::DeviceShared;
use crate::error::DeviceError;
use crate::exec::{self, Kernel};
use crate::launch::LaunchConfig;

// ============================================================================
// Events
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EventSlot {
    /// Never submitted to a queue.
    Idle,
    /// Submitted; the queue thread has not reached it yet.
    Pending,
    Recorded(Instant),
}

#[derive(Debug)]
struct EventState {
    slot: Mutex<EventSlot>,
    cv: Condvar,
}

/// A point on the device timeline.
///
/// An event captures its timestamp when the queue thread reaches it, i.e.
/// after every command submitted before it has completed. Clones share
/// one timestamp. Events always record, even on a poisoned queue, so
/// timing reads never hang behind a fault.
#[derive(Debug, Clone)]
pub struct Event {
    state: Arc<EventState>,
}

impl Event {
    pub fn new() -> Self {
        Self {
            state: Arc::new(EventState {
                slot: Mutex::new(EventSlot::Idle),
                cv: Condvar::new(),
            }),
        }
    }

    pub fn is_recorded(&self) -> bool {
        matches!(*self.state.slot.lock(), EventSlot::Recorded(_))
    }

    /// Block until the event records. Errs immediately if the event was
    /// never submitted to a queue.
    pub fn synchronize(&self) -> Result<(), DeviceError> {
        let mut slot = self.state.slot.lock();
        loop {
            match *slot {
                EventSlot::Idle => return Err(DeviceError::EventNotRecorded),
                EventSlot::Recorded(_) => return Ok(()),
                EventSlot::Pending => self.state.cv.wait(&mut slot),
            }
        }
    }

    /// Time from `self` to `later`. Both events must have recorded.
    /// Yields zero if `later` actually recorded first.
    pub fn elapsed(&self, later: &Event) -> Result<Duration, DeviceError> {
        let start = self.instant().ok_or(DeviceError::EventNotRecorded)?;
        let end = later.instant().ok_or(DeviceError::EventNotRecorded)?;
        Ok(end.saturating_duration_since(start))
    }

    fn instant(&self) -> Option<Instant> {
        match *self.state.slot.lock() {
            EventSlot::Recorded(t) => Some(t),
            _ => None,
        }
    }

    fn mark_pending(&self) {
        *self.state.slot.lock() = EventSlot::Pending;
    }

    fn record_now(&self) {
        *self.state.slot.lock() = EventSlot::Recorded(Instant::now());
        self.state.cv.notify_all();
    }
}

impl Default for Event {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Queue
// ============================================================================

pub(crate) enum Command {
    Launch(LaunchConfig, Arc<dyn Kernel>),
    Record(Event),
}

struct QueueInner {
    commands: VecDeque<Command>,
    /// Commands enqueued or currently executing.
    pending: usize,
    closed: bool,
}

pub(crate) struct QueueState {
    inner: Mutex<QueueInner>,
    /// Wakes the queue thread on submit or close.
    submitted: Condvar,
    /// Wakes `synchronize` callers when `pending` hits zero.
    drained: Condvar,
    sticky: Mutex<Option<DeviceError>>,
}

impl QueueState {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                commands: VecDeque::new(),
                pending: 0,
                closed: false,
            }),
            submitted: Condvar::new(),
            drained: Condvar::new(),
            sticky: Mutex::new(None),
        }
    }

    pub(crate) fn close(&self) {
        self.inner.lock().closed = true;
        self.submitted.notify_all();
    }
}

/// Handle to a device's execution queue. Clones refer to the same queue
/// and stay valid (returning [`DeviceError::QueueClosed`]) after the
/// device is dropped.
#[derive(Clone)]
pub struct DeviceQueue {
    pub(crate) dev: Arc<DeviceShared>,
}

impl DeviceQueue {
    /// Submit a kernel launch. Fire and forget: geometry problems and
    /// kernel faults surface at the next [`synchronize`](Self::synchronize),
    /// never here.
    pub fn launch(
        &self,
        launch: LaunchConfig,
        kernel: Arc<dyn Kernel>,
    ) -> Result<(), DeviceError> {
        self.submit(Command::Launch(launch, kernel))
    }

    /// Ask the queue to record `event` once all previously submitted
    /// commands have finished.
    pub fn record(&self, event: &Event) -> Result<(), DeviceError> {
        let queue = &self.dev.queue;
        let mut inner = queue.inner.lock();
        if inner.closed {
            return Err(DeviceError::QueueClosed);
        }
        event.mark_pending();
        inner.commands.push_back(Command::Record(event.clone()));
        inner.pending += 1;
        drop(inner);
        queue.submitted.notify_one();
        Ok(())
    }

    /// Block until the queue is empty, then report the deferred error if
    /// one occurred. The error is sticky: it stays until the device is
    /// torn down, and every later `synchronize` reports it again.
    pub fn synchronize(&self) -> Result<(), DeviceError> {
        let queue = &self.dev.queue;
        let mut inner = queue.inner.lock();
        while inner.pending > 0 {
            queue.drained.wait(&mut inner);
        }
        drop(inner);
        match &*queue.sticky.lock() {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    /// True when a deferred error is waiting to be reported.
    pub fn is_poisoned(&self) -> bool {
        self.dev.queue.sticky.lock().is_some()
    }

    fn submit(&self, cmd: Command) -> Result<(), DeviceError> {
        let queue = &self.dev.queue;
        let mut inner = queue.inner.lock();
        if inner.closed {
            return Err(DeviceError::QueueClosed);
        }
        inner.commands.push_back(cmd);
        inner.pending += 1;
        drop(inner);
        queue.submitted.notify_one();
        Ok(())
    }
}

/// Body of the queue thread: pop, execute, repeat until closed and empty.
pub(crate) fn queue_loop(dev: Arc<DeviceShared>) {
    loop {
        let cmd = {
            let mut inner = dev.queue.inner.lock();
            loop {
                if let Some(cmd) = inner.commands.pop_front() {
                    break cmd;
                }
                if inner.closed {
                    return;
                }
                dev.queue.submitted.wait(&mut inner);
            }
        };

        match cmd {
            Command::Record(event) => event.record_now(),
            Command::Launch(launch, kernel) => {
                let poisoned = dev.queue.sticky.lock().is_some();
                if poisoned {
                    debug!(
                        device = dev.id,
                        kernel = kernel.name(),
                        "skipping launch on poisoned queue"
                    );
                } else if let Err(err) = launch.validate(&dev.config) {
                    warn!(device = dev.id, %err, "launch rejected");
                    *dev.queue.sticky.lock() = Some(err);
                } else if let Some(fault) = exec::run_launch(&dev, launch, kernel) {
                    warn!(device = dev.id, %fault, "launch faulted");
                    *dev.queue.sticky.lock() = Some(DeviceError::Fault(fault));
                }
            }
        }

        let mut inner = dev.queue.inner.lock();
        inner.pending -= 1;
        if inner.pending == 0 {
            dev.queue.drained.notify_all();
        }
    }
}
