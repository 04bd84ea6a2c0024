//! Process-wide device registry.
//!
//! The registry is probed lazily on first use and lives for the life of
//! the process; shared devices are never torn down. Code that wants an
//! isolated device (tests, mostly) builds its own [`Device`] instead.

use std::sync::OnceLock;

use tracing::{info, warn};

use crate::device::{Device, DeviceConfig};
use crate::error::DeviceError;

static REGISTRY: OnceLock<Vec<Device>> = OnceLock::new();

fn registry() -> &'static [Device] {
    REGISTRY.get_or_init(|| {
        let mut config = DeviceConfig::detect();
        config.name = "wafer:0".into();
        match Device::new(config) {
            Ok(dev) => {
                info!(name = dev.name(), lanes = dev.config().lanes, "registered shared device");
                vec![dev]
            }
            Err(err) => {
                warn!(%err, "device probe failed; registry is empty");
                Vec::new()
            }
        }
    })
}

/// Number of devices in the registry.
pub fn device_count() -> usize {
    registry().len()
}

/// True when at least one device probed successfully.
pub fn is_available() -> bool {
    !registry().is_empty()
}

/// Fetch a registered device by index.
pub fn get_device(index: usize) -> Result<&'static Device, DeviceError> {
    let devices = registry();
    devices.get(index).ok_or(DeviceError::BadDeviceIndex {
        index,
        count: devices.len(),
    })
}

/// The device with the highest capability score.
pub fn best_device() -> Result<&'static Device, DeviceError> {
    registry()
        .iter()
        .max_by_key(|d| d.config().capability_score())
        .ok_or(DeviceError::NoDevice)
}
