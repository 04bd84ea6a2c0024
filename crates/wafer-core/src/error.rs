//! Error types for the device runtime.
//!
//! Host-side misuse (bad device index, oversized allocation, malformed
//! launch) is reported through [`DeviceError`]. Anything that goes wrong
//! *inside* a running kernel is a [`DeviceFault`]: faults are recorded on
//! the queue and only surface at the next synchronization point, wrapped
//! in [`DeviceError::Fault`].

use thiserror::Error;

/// Errors surfaced by the device runtime.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeviceError {
    #[error("no device available")]
    NoDevice,

    #[error("device index {index} out of range ({count} device(s) present)")]
    BadDeviceIndex { index: usize, count: usize },

    #[error("device configuration rejected: {0}")]
    InvalidConfig(String),

    #[error("failed to start device thread: {0}")]
    ThreadSpawn(String),

    #[error("out of device memory: requested {requested} bytes, {available} available")]
    OutOfMemory { requested: usize, available: usize },

    #[error("host/device transfer length mismatch: buffer holds {expected} elements, host slice has {got}")]
    TransferSize { expected: usize, got: usize },

    #[error("invalid launch: {0}")]
    InvalidLaunch(String),

    #[error("device fault: {0}")]
    Fault(DeviceFault),

    #[error("device queue is closed")]
    QueueClosed,

    #[error("event has not been recorded")]
    EventNotRecorded,
}

/// Faults raised by kernel code on the device timeline.
///
/// The first fault of a launch wins; later ones are dropped. A fault
/// aborts the remaining groups of its launch and poisons the queue until
/// the owning [`synchronize`](crate::queue::DeviceQueue::synchronize)
/// reports it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeviceFault {
    #[error("illegal address: element {index} of a buffer with {len} elements")]
    IllegalAddress { index: usize, len: usize },

    #[error("buffer belongs to device {actual}, kernel is running on device {expected}")]
    WrongDevice { expected: usize, actual: usize },

    #[error("shared memory access out of bounds: word {index} of {len}")]
    SharedOutOfBounds { index: usize, len: usize },

    #[error("kernel killed: {0}")]
    Killed(String),
}
