//! # wafer-core
//!
//! A software compute device: the execution model of a data-parallel
//! accelerator (grids of groups, group-shared staging memory, barriers,
//! an in-order execution queue, timeline events) run on a team of OS
//! threads.
//!
//! - [`device`]: device construction, capabilities, teardown
//! - [`context`]: process-wide device registry and selection
//! - [`memory`]: device-resident `f32` buffers with budget accounting
//! - [`launch`]: grid/group geometry and limit validation
//! - [`exec`]: the [`Kernel`] trait, group contexts, shared staging
//! - [`queue`]: fire-and-forget submission, deferred errors, events
//!
//! Kernels are plain Rust types implementing [`Kernel`]; the runtime
//! guarantees their barrier and fault semantics regardless of how many
//! lanes the host offers.

pub mod context;
pub mod device;
pub mod dim;
pub mod error;
pub mod exec;
pub mod launch;
pub mod memory;
pub mod queue;

mod barrier;

pub use device::{Device, DeviceConfig};
pub use dim::Dim2;
pub use error::{DeviceError, DeviceFault};
pub use exec::{GroupCtx, Kernel, SharedMem, Unit};
pub use launch::LaunchConfig;
pub use memory::DeviceBuffer;
pub use queue::{DeviceQueue, Event};

/// Crate-wide result type.
pub type Result<T> = std::result::Result<T, DeviceError>;
