//! `--status` / `--check` reporting.

use std::path::Path;
use std::fs;
use std::process;
use anyhow::Result;

use crate::daemon::pid::*;
use crate::daemon::systemd::*;
use crate::daemon::{LOG_DIR, SYSTEMD_SERVICE_PATH};
use crate::config::persistence::{default_config_path, load_config};

pub async fn show_status() -> Result<()> {
    println!("hwmond v{}", env!("CARGO_PKG_VERSION"));
    println!("================================");

    if is_running() {
        if let Some(pid) = get_pid()? {
            println!("status: running (pid: {pid})");

            let log_path = format!("{LOG_DIR}/hwmond.log");
            if Path::new(&log_path).exists() {
                println!("\nlast 5 log entries:");
                if let Ok(content) = fs::read_to_string(&log_path) {
                    let lines: Vec<&str> = content.lines().rev().take(5).collect();
                    for line in lines.iter().rev() {
                        println!("   {line}");
                    }
                }
            }
        }
    } else {
        println!("status: not running");
    }

    println!("\nconfiguration:");
    match load_config(None).await {
        Ok(config) => {
            println!("   inventory: {}", config.net.inventory_base_url);
            println!("   audit period: {}s", config.agent.audit_period);
            println!("   cmd port: {}", config.net.cmd_port);
        }
        Err(e) => println!("   error: could not load configuration: {e}"),
    }

    Ok(())
}

pub fn run_health_check() -> Result<()> {
    println!("hwmond v{}", env!("CARGO_PKG_VERSION"));
    println!("health check");
    println!("============\n");

    let mut all_ok = true;

    match default_config_path() {
        Ok(config_path) if config_path.exists() => println!("config file: {}", config_path.display()),
        Ok(config_path) => {
            println!("config file: NOT FOUND ({})", config_path.display());
            all_ok = false;
        }
        Err(e) => {
            println!("config file: could not resolve path: {e}");
            all_ok = false;
        }
    }

    if Path::new("/run/hwmond").exists() {
        println!("runtime dir: /run/hwmond");
    } else {
        println!("runtime dir: not created (will be created on start)");
    }

    if Path::new(LOG_DIR).exists() {
        println!("log dir: {LOG_DIR}");
    } else {
        println!("log dir: not created (will be created on start)");
    }

    #[cfg(target_os = "linux")]
    {
        if has_systemd() {
            if Path::new(SYSTEMD_SERVICE_PATH).exists() {
                let enabled = process::Command::new("systemctl")
                    .args(["is-enabled", "hwmond"])
                    .output()
                    .map(|o| o.status.success())
                    .unwrap_or(false);
                if enabled {
                    println!("systemd service: installed and enabled");
                } else {
                    println!("systemd service: installed but not enabled (run: systemctl enable hwmond)");
                }
            } else {
                println!("systemd service: NOT INSTALLED (run: hwmond --install-service)");
                all_ok = false;
            }
        } else {
            println!("systemd: not available on this system");
        }
    }

    if is_running() {
        if let Ok(Some(pid)) = get_pid() {
            println!("agent status: running (pid: {pid})");
        }
    } else {
        println!("agent status: not running");
        all_ok = false;
    }

    println!();
    if all_ok {
        println!("all checks passed");
    } else {
        println!("some issues found, see above");
    }

    Ok(())
}
