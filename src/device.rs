//! Hardware devices a host carries: CPU, NIC and disk, with their lifecycle
//! state machine.
//!
//! Devices are a tagged capability enum rather than a hierarchy; the OS and
//! the boot sequence select them by driver id. Only the disk owns heavyweight
//! state (its filesystem); the others are a handful of physical parameters.

use std::sync::Arc;

use log::info;
use parking_lot::Mutex;

use crate::addr::Address;
use crate::fs::FileSystem;
use crate::fs::FsHandle;

/// Lifecycle state of a device (and of an OS, which reuses the machine).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceState {
    /// Not running.
    PoweredOff,
    /// Running.
    PoweredOn,
    /// Transitioning up.
    Starting,
    /// Transitioning down.
    Stopping,
    /// Administratively disabled.
    Disabled,
    /// Failed; terminal until reset.
    Error,
}

impl DeviceState {
    /// The log/diagnostic name of the state.
    pub fn name(&self) -> &'static str {
        match self {
            DeviceState::PoweredOff => "POWER_OFF",
            DeviceState::PoweredOn => "POWER_ON",
            DeviceState::Starting => "STARTING",
            DeviceState::Stopping => "STOPPING",
            DeviceState::Disabled => "DISABLED",
            DeviceState::Error => "ERROR",
        }
    }
}

/// What a device is, with its physical parameters.
#[derive(Clone, Debug)]
pub enum DeviceKind {
    /// A processor.
    Cpu {
        /// Clock speed in GHz.
        clock_ghz: f32,
    },
    /// A network interface with its assigned address.
    Nic {
        /// Physical bandwidth in Gbps.
        bandwidth_gbps: f32,
        /// The interface address.
        addr: Address,
    },
    /// A disk carrying a filesystem.
    Disk {
        /// Capacity in megabytes.
        capacity_mb: u32,
        /// The filesystem stored on the disk.
        fs: FsHandle,
    },
}

struct DeviceCore {
    kind: DeviceKind,
    state: DeviceState,
}

/// Handle to one device. Clones share the same device.
#[derive(Clone)]
pub struct Device {
    inner: Arc<Mutex<DeviceCore>>,
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let core = self.inner.lock();
        f.debug_struct("Device")
            .field("id", &device_id(&core.kind))
            .field("state", &core.state)
            .finish()
    }
}

fn device_id(kind: &DeviceKind) -> &'static str {
    match kind {
        DeviceKind::Cpu { .. } => "Processor",
        DeviceKind::Nic { .. } => "Network Interface Card",
        DeviceKind::Disk { .. } => "Disk Drive",
    }
}

impl Device {
    /// Wraps a device kind, initially powered off.
    pub fn new(kind: DeviceKind) -> Self {
        Device {
            inner: Arc::new(Mutex::new(DeviceCore {
                kind,
                state: DeviceState::PoweredOff,
            })),
        }
    }

    /// A CPU with the given clock.
    pub fn cpu(clock_ghz: f32) -> Self {
        Device::new(DeviceKind::Cpu { clock_ghz })
    }

    /// A NIC with the given bandwidth and a random address.
    pub fn nic(bandwidth_gbps: f32) -> Self {
        Device::new(DeviceKind::Nic {
            bandwidth_gbps,
            addr: Address::random(),
        })
    }

    /// A disk of the given capacity with a fresh filesystem.
    pub fn disk(capacity_mb: u32) -> Self {
        Device::new(DeviceKind::Disk {
            capacity_mb,
            fs: Arc::new(Mutex::new(FileSystem::new())),
        })
    }

    /// The human-readable device name.
    pub fn device_id(&self) -> &'static str {
        device_id(&self.inner.lock().kind)
    }

    /// The driver module name (`cpu`, `net`, `disk`).
    pub fn driver_id(&self) -> &'static str {
        match self.inner.lock().kind {
            DeviceKind::Cpu { .. } => "cpu",
            DeviceKind::Nic { .. } => "net",
            DeviceKind::Disk { .. } => "disk",
        }
    }

    /// The current lifecycle state.
    pub fn state(&self) -> DeviceState {
        self.inner.lock().state
    }

    /// Moves the device to `new_state`, logging the transition.
    pub fn set_state(&self, new_state: DeviceState) {
        let mut core = self.inner.lock();
        info!(
            "'{}' changing state from {} to {}",
            device_id(&core.kind),
            core.state.name(),
            new_state.name()
        );
        core.state = new_state;
    }

    /// Powers the device on. Returns false if it already was.
    pub fn start(&self) -> bool {
        if self.state() == DeviceState::PoweredOn {
            return false;
        }
        self.set_state(DeviceState::PoweredOn);
        true
    }

    /// Powers the device off. Returns false if it already was.
    pub fn shutdown(&self) -> bool {
        if self.state() == DeviceState::PoweredOff {
            return false;
        }
        self.set_state(DeviceState::PoweredOff);
        true
    }

    /// The disk's filesystem, if this is a disk.
    pub fn fs(&self) -> Option<FsHandle> {
        match &self.inner.lock().kind {
            DeviceKind::Disk { fs, .. } => Some(Arc::clone(fs)),
            _ => None,
        }
    }

    /// The NIC's address, if this is a NIC.
    pub fn addr(&self) -> Option<Address> {
        match &self.inner.lock().kind {
            DeviceKind::Nic { addr, .. } => Some(*addr),
            _ => None,
        }
    }

    /// Reassigns the NIC's address. No-op for other devices.
    pub fn set_addr(&self, new_addr: Address) {
        if let DeviceKind::Nic { addr, .. } = &mut self.inner.lock().kind {
            *addr = new_addr;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn lifecycle_transitions() {
        let cpu = Device::cpu(1.5);
        assert_eq!(cpu.state(), DeviceState::PoweredOff);
        assert!(cpu.start());
        assert!(!cpu.start());
        assert_eq!(cpu.state(), DeviceState::PoweredOn);
        assert!(cpu.shutdown());
        assert_eq!(cpu.state(), DeviceState::PoweredOff);
    }

    #[test]
    fn capability_accessors() {
        let disk = Device::disk(500);
        assert!(disk.fs().is_some());
        assert!(disk.addr().is_none());
        assert_eq!(disk.driver_id(), "disk");

        let nic = Device::nic(100.0);
        assert!(nic.fs().is_none());
        assert!(nic.addr().is_some());
        assert_eq!(nic.driver_id(), "net");
        assert_eq!(Device::cpu(2.0).driver_id(), "cpu");
    }
}
