//! System programs: boot/shutdown, drivers, echo, wait, ping.

use crate::device::DeviceState;
use crate::fs::Access;
use crate::fs::FilePath;
use crate::os::CreateProcessParams;
use crate::proc::ExitCode;
use crate::proc::Proc;
use crate::proc::ProgramFn;
use crate::proc::program;

/// `echo`: prints its arguments back.
pub fn echo() -> ProgramFn {
    program(|proc: Proc, args: Vec<String>| async move {
        let rest = args.get(1..).unwrap_or_default();
        proc.putln(format!("echo: [{}]", rest.join(", ")));
        0
    })
}

/// `wait`: suspends for the given number of seconds.
pub fn wait_cmd() -> ProgramFn {
    program(|proc: Proc, args: Vec<String>| async move {
        let Some(os) = proc.os() else {
            return 1;
        };
        let Some(seconds) = args.get(1).and_then(|arg| arg.parse::<f32>().ok()) else {
            proc.putln("Usage: wait [time (s)]");
            return 1;
        };
        os.wait(seconds).await;
        proc.putln(format!("Waited {seconds} seconds."));
        0
    })
}

/// The driver-init program for one device class: brings the device through
/// `Starting` to `PoweredOn`.
pub fn driver_init(driver: &'static str) -> ProgramFn {
    program(move |proc: Proc, _args: Vec<String>| async move {
        let Some(os) = proc.os() else {
            return 1;
        };
        let Some(device) = os.device_by_driver(driver) else {
            proc.errln(format!("No device answers to driver '{driver}'."));
            return 1;
        };
        if device.state() == DeviceState::Disabled {
            proc.warnln(format!("'{}' is administratively disabled.", device.device_id()));
            return 1;
        }
        device.set_state(DeviceState::Starting);
        os.wait(0.25).await;
        device.set_state(DeviceState::PoweredOn);
        0
    })
}

/// `boot`: powers the host up: registers devices, runs each one's driver
/// module, then flips the OS on. Any driver failure leaves the OS in
/// `Error` and halts the boot.
pub fn boot() -> ProgramFn {
    program(cmd_boot)
}

async fn cmd_boot(proc: Proc, _args: Vec<String>) -> ExitCode {
    let Some(os) = proc.os() else {
        return 1;
    };
    let Some(fs) = os.filesystem() else {
        proc.errln("No filesystem!");
        return 1;
    };

    let state = os.state();
    if state != DeviceState::PoweredOff {
        proc.warnln(format!("Invalid boot state '{}'.", state.name()));
        return 1;
    }

    proc.putln(format!(
        "Sending wake-on-LAN request to {}...",
        os.hostname()
    ));
    os.wait(2.0).await;

    let num_devices = os.register_devices();
    proc.putln(format!("Registered {num_devices} PCIE devices."));

    let mut devices = Vec::new();
    os.devices(|uuid, device| devices.push((uuid, device.clone())));

    for (uuid, device) in devices {
        proc.putln(format!(
            "[INIT] -------- uuid={uuid} '{}' --------",
            device.device_id()
        ));
        os.wait(0.25).await;

        let driver = device.driver_id();
        proc.putln(format!("[INIT] found device driver '{driver}'"));
        os.wait(0.25).await;

        let driver_path = FilePath::new(format!("/lib/modules/kernel/drivers/{driver}"));
        let module = {
            let fs = fs.lock();
            fs.open(&driver_path, Access::EXEC)
                .ok()
                .and_then(|(_, file)| file.lock().program())
        };
        let Some(module) = module else {
            proc.errln(format!("Failed to open driver module '{driver_path}'."));
            os.set_state(DeviceState::Error);
            return 1;
        };

        let params = CreateProcessParams {
            leader: Some(proc.pid()),
            ..CreateProcessParams::default()
        };
        let ret = os.run_process(module, vec![driver.to_string()], params).await;
        if ret != 0 {
            proc.errln(format!("Boot failure: driver init failure (code {ret})."));
            os.set_state(DeviceState::Error);
            return 1;
        }
    }

    os.set_state(DeviceState::PoweredOn);
    0
}

/// `shutdown`: powers the OS off.
pub fn shutdown() -> ProgramFn {
    program(|proc: Proc, _args: Vec<String>| async move {
        let Some(os) = proc.os() else {
            return 1;
        };
        proc.putln(format!("Shutting down {}...", os.hostname()));
        os.shutdown();
        0
    })
}

/// `ping`: checks whether anything in the world answers at an address.
pub fn ping() -> ProgramFn {
    program(cmd_ping)
}

async fn cmd_ping(proc: Proc, args: Vec<String>) -> ExitCode {
    let Some(os) = proc.os() else {
        return 1;
    };
    let Some(target) = args.get(1) else {
        proc.putln("Usage: ping [address]");
        return 1;
    };

    match target.parse::<crate::addr::Address>() {
        Ok(addr) => {
            proc.putln(format!("Pinging {addr}..."));
            os.wait(1.0).await;
            let reachable = os.ctx().ip.has_bindings_for(addr);
            proc.putln(format!(
                "Host {}.",
                if reachable { "reachable" } else { "unreachable" }
            ));
            if reachable { 0 } else { 1 }
        }
        Err(err) => {
            proc.warnln(format!("ping: {err}"));
            1
        }
    }
}
