//! A simulated physical machine: devices plus one OS.
//!
//! A host owns its devices and its OS. Starting a host powers the devices
//! and replays the lines of its boot script (`/boot.os`) through the OS;
//! shutting it down powers everything back off. The heavyweight boot dance
//! (driver discovery, timed device bring-up, OS state transitions) lives in
//! the `boot` program the script invokes, not here.

use log::info;
use log::warn;

use crate::addr::Address;
use crate::device::Device;
use crate::fs::Access;
use crate::fs::FilePath;
use crate::os::Os;
use crate::os::OsParams;
use crate::world::WorldCtx;

/// Physical parameters for the standard device fit.
#[derive(Clone, Copy, Debug)]
pub struct HostParams {
    /// Disk capacity in megabytes.
    pub disk_mb: u32,
    /// CPU clock in GHz.
    pub cpu_ghz: f32,
    /// NIC bandwidth in Gbps.
    pub nic_gbps: f32,
}

impl Default for HostParams {
    fn default() -> Self {
        HostParams {
            disk_mb: 500,
            cpu_ghz: 1.5,
            nic_gbps: 100.0,
        }
    }
}

/// A simulated machine owned by a world.
#[derive(Debug)]
pub struct Host {
    ctx: WorldCtx,
    hostname: String,
    devices: Vec<Device>,
    os: Option<Os>,
    hosting: bool,
}

impl Host {
    /// Builds a host with the standard disk/CPU/NIC fit. No OS yet.
    pub fn new(ctx: WorldCtx, hostname: impl Into<String>, params: HostParams) -> Self {
        Host {
            ctx,
            hostname: hostname.into(),
            devices: vec![
                Device::disk(params.disk_mb),
                Device::cpu(params.cpu_ghz),
                Device::nic(params.nic_gbps),
            ],
            os: None,
            hosting: false,
        }
    }

    /// The host's name.
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// The host's devices.
    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    /// Attaches another device. Call before installing the OS so it lands in
    /// the device index.
    pub fn add_device(&mut self, device: Device) {
        self.devices.push(device);
    }

    /// The NIC address, if the host carries a NIC.
    pub fn address(&self) -> Option<Address> {
        self.devices.iter().find_map(Device::addr)
    }

    /// The installed OS.
    pub fn os(&self) -> Option<&Os> {
        self.os.as_ref()
    }

    /// Installs an OS over this host's devices.
    pub fn install_os(&mut self, params: OsParams) -> Os {
        let os = Os::new(self.hostname.clone(), self.ctx.clone(), &self.devices, params);
        self.os = Some(os.clone());
        os
    }

    /// Installs an OS with the stock shell and seeds the standard filesystem
    /// layout, `/etc` files, programs and boot script.
    pub fn install_basic_os(&mut self) -> Os {
        let os = self.install_os(OsParams {
            default_shell: crate::programs::shell(),
        });
        crate::programs::install_base_system(&os);
        os
    }

    /// Powers the devices and replays the boot script through the OS.
    pub fn start(&mut self) {
        info!("{}: starting host", self.hostname);
        self.hosting = true;
        for device in &self.devices {
            device.start();
        }
        let Some(os) = &self.os else {
            warn!("{}: no OS installed, nothing to boot", self.hostname);
            return;
        };

        let script = os.filesystem().and_then(|fs| {
            let fs = fs.lock();
            let (_, file) = fs.open(&FilePath::new("/boot.os"), Access::READ).ok()?;
            let content = file.lock().view().to_string();
            Some(content)
        });
        match script {
            Some(script) => {
                for line in script.lines().filter(|l| !l.trim().is_empty()) {
                    os.exec_line(line);
                }
            }
            None => warn!("{}: no /boot.os, skipping boot script", self.hostname),
        }
    }

    /// Powers everything off.
    pub fn shutdown(&mut self) {
        info!("{}: shutting down host", self.hostname);
        if let Some(os) = &self.os {
            os.shutdown();
        }
        for device in &self.devices {
            device.shutdown();
        }
        self.hosting = false;
    }

    /// Whether the host has been started.
    pub fn is_hosting(&self) -> bool {
        self.hosting
    }
}
