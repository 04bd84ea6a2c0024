//! Device construction, capability description, and teardown.
//!
//! A [`Device`] owns a queue thread and a fixed team of lane threads.
//! Dropping it closes the queue, drains outstanding work, and joins every
//! thread, so tests can create and destroy devices freely. Process-wide
//! shared devices live in [`crate::context`] instead and are never torn
//! down.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, info};

use crate::error::DeviceError;
use crate::exec::{self, TeamState};
use crate::queue::{self, DeviceQueue, QueueState};

static NEXT_DEVICE_ID: AtomicUsize = AtomicUsize::new(0);

/// Capabilities and limits of one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    pub name: String,
    /// Worker threads in the lane team.
    pub lanes: usize,
    /// Buffer memory budget in bytes.
    pub memory_bytes: usize,
    /// Most execution units allowed in one group.
    pub max_group_units: usize,
    /// Largest shared staging request per launch.
    pub max_shared_bytes: usize,
}

impl DeviceConfig {
    pub const DEFAULT_MEMORY_BYTES: usize = 256 << 20;
    pub const DEFAULT_MAX_GROUP_UNITS: usize = 1024;
    pub const DEFAULT_MAX_SHARED_BYTES: usize = 48 << 10;

    /// Fixed lane count, default limits. The workhorse for tests.
    pub fn with_lanes(name: impl Into<String>, lanes: usize) -> Self {
        Self {
            name: name.into(),
            lanes,
            memory_bytes: Self::DEFAULT_MEMORY_BYTES,
            max_group_units: Self::DEFAULT_MAX_GROUP_UNITS,
            max_shared_bytes: Self::DEFAULT_MAX_SHARED_BYTES,
        }
    }

    /// Probe the host: one lane per available hardware thread.
    pub fn detect() -> Self {
        let lanes = thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        Self::with_lanes("wafer", lanes)
    }

    /// Ranking key for device selection; more lanes and more memory win.
    pub fn capability_score(&self) -> u64 {
        self.lanes as u64 * (self.memory_bytes >> 20) as u64
    }
}

/// Fields shared between the device handle, its threads, and buffers.
pub(crate) struct DeviceShared {
    pub(crate) id: usize,
    pub(crate) config: DeviceConfig,
    pub(crate) mem_used: AtomicUsize,
    pub(crate) queue: QueueState,
    pub(crate) team: TeamState,
}

/// A software compute device.
pub struct Device {
    shared: Arc<DeviceShared>,
    queue: DeviceQueue,
    queue_thread: Option<JoinHandle<()>>,
    workers: Vec<JoinHandle<()>>,
}

impl Device {
    /// Bring up a device: validate `config`, spawn the lane team and the
    /// queue thread. On failure every already-spawned thread is unwound
    /// before returning.
    pub fn new(config: DeviceConfig) -> Result<Self, DeviceError> {
        if config.lanes == 0 {
            return Err(DeviceError::InvalidConfig(
                "at least one lane is required".into(),
            ));
        }
        if config.memory_bytes == 0 {
            return Err(DeviceError::InvalidConfig(
                "memory budget must be non-zero".into(),
            ));
        }
        if config.max_group_units == 0 {
            return Err(DeviceError::InvalidConfig(
                "group unit limit must be non-zero".into(),
            ));
        }

        let id = NEXT_DEVICE_ID.fetch_add(1, Ordering::Relaxed);
        let shared = Arc::new(DeviceShared {
            id,
            mem_used: AtomicUsize::new(0),
            queue: QueueState::new(),
            team: TeamState::new(config.lanes),
            config,
        });

        let mut workers = Vec::with_capacity(shared.config.lanes);
        for lane in 0..shared.config.lanes {
            let dev = Arc::clone(&shared);
            let spawned = thread::Builder::new()
                .name(format!("{}-lane{lane}", shared.config.name))
                .spawn(move || exec::worker_loop(lane, dev));
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    Self::unwind_partial(&shared, workers);
                    return Err(DeviceError::ThreadSpawn(e.to_string()));
                }
            }
        }

        let queue_thread = {
            let dev = Arc::clone(&shared);
            thread::Builder::new()
                .name(format!("{}-queue", shared.config.name))
                .spawn(move || queue::queue_loop(dev))
        };
        let queue_thread = match queue_thread {
            Ok(handle) => handle,
            Err(e) => {
                Self::unwind_partial(&shared, workers);
                return Err(DeviceError::ThreadSpawn(e.to_string()));
            }
        };

        info!(
            device = id,
            name = %shared.config.name,
            lanes = shared.config.lanes,
            memory_bytes = shared.config.memory_bytes,
            "device up"
        );
        Ok(Self {
            queue: DeviceQueue {
                dev: Arc::clone(&shared),
            },
            shared,
            queue_thread: Some(queue_thread),
            workers,
        })
    }

    /// Teardown path for a half-built device: break the start rendezvous
    /// so already-parked lanes exit, then join them. The queue thread is
    /// spawned last, so it never exists on this path.
    fn unwind_partial(shared: &Arc<DeviceShared>, workers: Vec<JoinHandle<()>>) {
        shared.team.start.abort();
        for handle in workers {
            let _ = handle.join();
        }
    }

    /// Process-unique identifier.
    pub fn id(&self) -> usize {
        self.shared.id
    }

    pub fn name(&self) -> &str {
        &self.shared.config.name
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.shared.config
    }

    /// The device's execution queue.
    pub fn queue(&self) -> &DeviceQueue {
        &self.queue
    }

    /// Bytes currently allocated to buffers.
    pub fn memory_used(&self) -> usize {
        self.shared.mem_used.load(Ordering::Relaxed)
    }

    pub fn memory_total(&self) -> usize {
        self.shared.config.memory_bytes
    }

    pub fn memory_available(&self) -> usize {
        self.memory_total().saturating_sub(self.memory_used())
    }

    /// Shorthand for [`DeviceQueue::synchronize`].
    pub fn synchronize(&self) -> Result<(), DeviceError> {
        self.queue.synchronize()
    }

    pub(crate) fn shared(&self) -> &Arc<DeviceShared> {
        &self.shared
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        // Queue first: it must stop driving the team before the team goes.
        self.shared.queue.close();
        if let Some(handle) = self.queue_thread.take() {
            let _ = handle.join();
        }
        *self.shared.team.slot.lock() = None;
        self.shared.team.start.wait();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
        debug!(device = self.shared.id, "device down");
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("id", &self.shared.id)
            .field("name", &self.shared.config.name)
            .field("lanes", &self.shared.config.lanes)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dim::Dim2;
    use crate::error::DeviceFault;
    use crate::exec::{GroupCtx, Kernel};
    use crate::launch::LaunchConfig;
    use crate::memory::DeviceBuffer;
    use crate::queue::Event;

    fn device(lanes: usize) -> Device {
        Device::new(DeviceConfig::with_lanes("test", lanes)).unwrap()
    }

    /// dst[i] = src[i] * factor over the whole grid.
    struct Scale {
        src: DeviceBuffer,
        dst: DeviceBuffer,
        factor: f32,
    }

    impl Kernel for Scale {
        fn name(&self) -> &str {
            "scale"
        }

        fn run(&self, ctx: &GroupCtx<'_>) {
            let width = ctx.grid().x * ctx.group_dim().x;
            for unit in ctx.units() {
                let row = ctx.group().y * ctx.group_dim().y + unit.pos.y;
                let col = ctx.group().x * ctx.group_dim().x + unit.pos.x;
                let i = row * width + col;
                let v = ctx.load(&self.src, i);
                ctx.store(&self.dst, i, v * self.factor);
            }
        }
    }

    /// Reads one element past the end of `buf`.
    struct OutOfBounds {
        buf: DeviceBuffer,
    }

    impl Kernel for OutOfBounds {
        fn run(&self, ctx: &GroupCtx<'_>) {
            for _ in ctx.units().take(1) {
                let _ = ctx.load(&self.buf, self.buf.len() + 5);
            }
            ctx.sync();
        }
    }

    /// Writes 1.0 to cell 0; used to prove a launch was skipped.
    struct Mark {
        buf: DeviceBuffer,
    }

    impl Kernel for Mark {
        fn run(&self, ctx: &GroupCtx<'_>) {
            for _ in ctx.units().take(1) {
                ctx.store(&self.buf, 0, 1.0);
            }
        }
    }

    #[test]
    fn test_config_rejected() {
        let err = Device::new(DeviceConfig::with_lanes("bad", 0)).unwrap_err();
        assert!(matches!(err, DeviceError::InvalidConfig(_)));

        let err = Device::new(DeviceConfig {
            memory_bytes: 0,
            ..DeviceConfig::with_lanes("bad", 1)
        })
        .unwrap_err();
        assert!(matches!(err, DeviceError::InvalidConfig(_)));
    }

    #[test]
    fn test_detect_has_at_least_one_lane() {
        let cfg = DeviceConfig::detect();
        assert!(cfg.lanes >= 1);
        assert!(cfg.capability_score() > 0);
    }

    #[test]
    fn test_device_up_and_down() {
        let dev = device(4);
        assert_eq!(dev.config().lanes, 4);
        assert_eq!(dev.memory_used(), 0);
        drop(dev); // must not hang
    }

    #[test]
    fn test_unique_ids() {
        let a = device(1);
        let b = device(1);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_scale_kernel_round_trip() {
        let dev = device(3);
        let data: Vec<f32> = (0..64).map(|i| i as f32).collect();
        let src = DeviceBuffer::from_host(&dev, &data).unwrap();
        let dst = DeviceBuffer::alloc(&dev, 64).unwrap();

        let cfg = LaunchConfig::grid_2d(8, 8, 4, 4);
        assert_eq!(cfg.grid, Dim2::new(2, 2));
        dev.queue()
            .launch(cfg, Arc::new(Scale { src, dst: dst.clone(), factor: 2.0 }))
            .unwrap();
        dev.synchronize().unwrap();

        let out = dst.to_host();
        for (i, &v) in out.iter().enumerate() {
            assert_eq!(v, i as f32 * 2.0);
        }
    }

    #[test]
    fn test_fault_is_sticky_and_skips_later_launches() {
        let dev = device(2);
        let buf = DeviceBuffer::alloc(&dev, 8).unwrap();
        let cfg = LaunchConfig::grid_2d(2, 2, 2, 2);

        dev.queue()
            .launch(cfg, Arc::new(OutOfBounds { buf: buf.clone() }))
            .unwrap();
        let err = dev.synchronize().unwrap_err();
        assert_eq!(
            err,
            DeviceError::Fault(DeviceFault::IllegalAddress { index: 13, len: 8 })
        );

        // Sticky: reported again.
        assert_eq!(dev.synchronize().unwrap_err(), err);
        assert!(dev.queue().is_poisoned());

        // Launches after the fault never execute.
        dev.queue()
            .launch(cfg, Arc::new(Mark { buf: buf.clone() }))
            .unwrap();
        assert_eq!(dev.synchronize().unwrap_err(), err);
        assert_eq!(buf.to_host()[0], 0.0);
    }

    #[test]
    fn test_invalid_launch_surfaces_at_synchronize() {
        let dev = device(2);
        let buf = DeviceBuffer::alloc(&dev, 8).unwrap();
        let cfg = LaunchConfig::grid_2d(256, 256, 64, 64); // 4096 units per group

        // Submission is fire-and-forget, so this succeeds.
        dev.queue()
            .launch(cfg, Arc::new(Mark { buf }))
            .unwrap();
        assert!(matches!(
            dev.synchronize(),
            Err(DeviceError::InvalidLaunch(_))
        ));
    }

    #[test]
    fn test_panicking_kernel_becomes_killed_fault() {
        struct Explode;
        impl Kernel for Explode {
            fn name(&self) -> &str {
                "explode"
            }
            fn run(&self, _ctx: &GroupCtx<'_>) {
                panic!("boom");
            }
        }

        let dev = device(4);
        dev.queue()
            .launch(LaunchConfig::grid_2d(8, 8, 4, 4), Arc::new(Explode))
            .unwrap();
        match dev.synchronize().unwrap_err() {
            DeviceError::Fault(DeviceFault::Killed(msg)) => {
                assert!(msg.contains("explode"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_kill_aborts_launch() {
        struct GiveUp;
        impl Kernel for GiveUp {
            fn run(&self, ctx: &GroupCtx<'_>) {
                for unit in ctx.units() {
                    if unit.flat == 0 {
                        ctx.kill("asked to stop");
                    }
                }
                ctx.sync();
            }
        }

        let dev = device(3);
        dev.queue()
            .launch(LaunchConfig::grid_2d(16, 16, 8, 8), Arc::new(GiveUp))
            .unwrap();
        assert_eq!(
            dev.synchronize().unwrap_err(),
            DeviceError::Fault(DeviceFault::Killed("asked to stop".into()))
        );
    }

    #[test]
    fn test_wrong_device_buffer_faults() {
        let a = device(2);
        let b = device(2);
        let foreign = DeviceBuffer::alloc(&b, 16).unwrap();

        a.queue()
            .launch(
                LaunchConfig::grid_2d(4, 4, 4, 4),
                Arc::new(Mark { buf: foreign }),
            )
            .unwrap();
        match a.synchronize().unwrap_err() {
            DeviceError::Fault(DeviceFault::WrongDevice { expected, actual }) => {
                assert_eq!(expected, a.id());
                assert_eq!(actual, b.id());
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_shared_staging_neighbor_exchange() {
        // Each unit publishes its flat index to staging, then reads its
        // neighbor's after the barrier.
        struct Neighbors {
            out: DeviceBuffer,
        }
        impl Kernel for Neighbors {
            fn run(&self, ctx: &GroupCtx<'_>) {
                let n = ctx.group_dim().count();
                for unit in ctx.units() {
                    ctx.shared().store(unit.flat, unit.flat as f32);
                }
                if !ctx.sync() {
                    return;
                }
                for unit in ctx.units() {
                    let v = ctx.shared().load((unit.flat + 1) % n);
                    ctx.store(&self.out, unit.flat, v);
                }
            }
        }

        let dev = device(3);
        let out = DeviceBuffer::alloc(&dev, 64).unwrap();
        let cfg = LaunchConfig::grid_2d_shared(8, 8, 8, 8, 64 * 4);
        dev.queue()
            .launch(cfg, Arc::new(Neighbors { out: out.clone() }))
            .unwrap();
        dev.synchronize().unwrap();

        for (i, &v) in out.to_host().iter().enumerate() {
            assert_eq!(v, ((i + 1) % 64) as f32);
        }
    }

    #[test]
    fn test_events_record_in_queue_order() {
        let dev = device(2);
        let src = DeviceBuffer::from_host(&dev, &[1.0; 16]).unwrap();
        let dst = DeviceBuffer::alloc(&dev, 16).unwrap();

        let before = Event::new();
        let after = Event::new();
        dev.queue().record(&before).unwrap();
        dev.queue()
            .launch(
                LaunchConfig::grid_2d(4, 4, 4, 4),
                Arc::new(Scale { src, dst, factor: 3.0 }),
            )
            .unwrap();
        dev.queue().record(&after).unwrap();

        after.synchronize().unwrap();
        assert!(before.is_recorded());
        let dt = before.elapsed(&after).unwrap();
        assert!(dt >= std::time::Duration::ZERO);
        dev.synchronize().unwrap();
    }

    #[test]
    fn test_events_record_on_poisoned_queue() {
        let dev = device(2);
        let buf = DeviceBuffer::alloc(&dev, 4).unwrap();
        let after = Event::new();

        dev.queue()
            .launch(LaunchConfig::grid_2d(2, 2, 2, 2), Arc::new(OutOfBounds { buf }))
            .unwrap();
        dev.queue().record(&after).unwrap();

        after.synchronize().unwrap();
        assert!(dev.synchronize().is_err());
    }

    #[test]
    fn test_queue_closed_after_drop() {
        let dev = device(1);
        let queue = dev.queue().clone();
        let buf = DeviceBuffer::alloc(&dev, 4).unwrap();
        drop(dev);

        let err = queue
            .launch(LaunchConfig::grid_2d(2, 2, 2, 2), Arc::new(Mark { buf }))
            .unwrap_err();
        assert_eq!(err, DeviceError::QueueClosed);
        assert_eq!(queue.record(&Event::new()).unwrap_err(), DeviceError::QueueClosed);
    }
}
