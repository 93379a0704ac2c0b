//! systemd unit install/uninstall and liveness probing.

use std::path::Path;
use std::fs;
use std::process;
use anyhow::{Result, Context};

use crate::daemon::{SYSTEMD_SERVICE_PATH, SYSTEMD_SERVICE_TEMPLATE};

pub fn has_systemd() -> bool {
    Path::new("/run/systemd/system").exists()
}

/// True if the unit exists and is active/activating; used so `--stop`/`--status`
/// pick the systemd control path instead of a raw signal.
pub fn is_systemd_service_active() -> bool {
    if !has_systemd() || !Path::new(SYSTEMD_SERVICE_PATH).exists() {
        return false;
    }
    process::Command::new("systemctl")
        .args(["is-active", "--quiet", "hwmond"])
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

pub fn install_systemd_service() -> Result<()> {
    #[cfg(target_os = "linux")]
    if unsafe { libc::geteuid() } != 0 {
        return Err(anyhow::anyhow!("root privileges required. Run with: sudo hwmond --install-service"));
    }

    if !has_systemd() {
        println!("systemd not detected on this system.");
        println!("The agent can still run manually with: hwmond --start");
        return Ok(());
    }

    let exe_path = std::env::current_exe()?;
    let work_dir = exe_path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("cannot determine executable directory"))?;

    let service_content = SYSTEMD_SERVICE_TEMPLATE
        .replace("{{EXEC_PATH}}", exe_path.to_str().unwrap_or("/opt/hwmond/hwmond"))
        .replace("{{WORK_DIR}}", work_dir.to_str().unwrap_or("/opt/hwmond"));

    let service_path = Path::new(SYSTEMD_SERVICE_PATH);
    if service_path.exists() {
        if let Ok(existing) = fs::read_to_string(service_path) {
            if existing == service_content {
                println!("service is already installed and up-to-date");
                return Ok(());
            }
        }
        println!("existing service file found, updating");
    }

    fs::write(service_path, &service_content).context("failed to write service file")?;
    println!("service file created: {SYSTEMD_SERVICE_PATH}");

    match process::Command::new("systemctl").args(["daemon-reload"]).status() {
        Ok(status) if status.success() => println!("systemd daemon reloaded"),
        _ => println!("warning: failed to reload systemd daemon (run: systemctl daemon-reload)"),
    }

    match process::Command::new("systemctl").args(["enable", "hwmond.service"]).status() {
        Ok(status) if status.success() => println!("service enabled (will start on boot)"),
        _ => println!("warning: failed to enable service (run: systemctl enable hwmond.service)"),
    }

    println!("start now with: sudo systemctl start hwmond");
    Ok(())
}

pub fn uninstall_systemd_service() -> Result<()> {
    #[cfg(target_os = "linux")]
    if unsafe { libc::geteuid() } != 0 {
        return Err(anyhow::anyhow!("root privileges required. Run with: sudo hwmond --uninstall-service"));
    }

    if !has_systemd() {
        println!("systemd not detected on this system.");
        return Ok(());
    }

    let service_path = Path::new(SYSTEMD_SERVICE_PATH);
    if !service_path.exists() {
        println!("service is not installed");
        return Ok(());
    }

    let _ = process::Command::new("systemctl").args(["stop", "hwmond"]).status();
    let _ = process::Command::new("systemctl").args(["disable", "hwmond"]).status();
    fs::remove_file(service_path)?;
    let _ = process::Command::new("systemctl").args(["daemon-reload"]).status();
    println!("service uninstalled");
    Ok(())
}
