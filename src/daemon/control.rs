//! Daemon start/stop/restart control (A2).

use std::process;
use std::fs;
use anyhow::Result;

use crate::daemon::pid::*;
use crate::daemon::systemd::is_systemd_service_active;
use crate::daemon::LOG_DIR;
use crate::config::types::AgentConfig;

pub fn start_daemon_with_log_level(log_level: Option<String>) -> Result<()> {
    if is_running() {
        eprintln!("error: hwmond is already running (pid: {:?})", get_pid()?);
        process::exit(1);
    }

    let config_path = crate::config::persistence::default_config_path()?;
    if !config_path.exists() {
        eprintln!("error: configuration file not found: {config_path:?}");
        eprintln!("create one at that path, or pass --config <path>");
        process::exit(1);
    }

    println!("starting hwmond v{}", env!("CARGO_PKG_VERSION"));

    ensure_directories()?;
    let log_path = format!("{LOG_DIR}/hwmond.log");
    let log_file = fs::OpenOptions::new().create(true).append(true).open(&log_path)?;

    let exe_path = std::env::current_exe()?;
    let mut cmd = process::Command::new(&exe_path);
    cmd.arg("--daemon-child");
    if let Some(level) = log_level {
        cmd.arg("--set-log-level").arg(level);
    }

    let child = cmd
        .current_dir(std::env::current_dir()?)
        .stdin(process::Stdio::null())
        .stdout(log_file.try_clone()?)
        .stderr(log_file)
        .spawn()?;

    let pid = child.id();
    save_pid(pid)?;

    println!("hwmond started (pid: {pid})");
    println!("logs: tail -f {log_path}");
    Ok(())
}

pub fn stop_daemon() -> Result<()> {
    if is_systemd_service_active() {
        println!("hwmond is managed by systemd, using systemctl stop");
        match process::Command::new("systemctl").args(["stop", "hwmond"]).status() {
            Ok(s) if s.success() => {
                println!("hwmond stopped via systemd");
                return Ok(());
            }
            Ok(_) => eprintln!("warning: systemctl stop failed, falling back to manual stop"),
            Err(e) => eprintln!("warning: could not run systemctl: {e}, falling back to manual stop"),
        }
    }

    if !is_running() {
        eprintln!("warning: hwmond is not running");
        process::exit(1);
    }

    if let Some(pid) = get_pid()? {
        println!("stopping hwmond (pid: {pid})");
        unsafe { libc::kill(pid as i32, libc::SIGTERM) };

        for _ in 0..10 {
            if !is_running() {
                break;
            }
            std::thread::sleep(std::time::Duration::from_secs(1));
        }

        if is_running() {
            println!("warning: force killing hwmond");
            unsafe { libc::kill(pid as i32, libc::SIGKILL) };
        }

        remove_pid_file()?;
        println!("hwmond stopped");
    }

    Ok(())
}

pub fn restart_daemon_with_log_level(log_level: Option<String>) -> Result<()> {
    println!("restarting hwmond v{}", env!("CARGO_PKG_VERSION"));

    if is_systemd_service_active() {
        println!("hwmond is managed by systemd, using systemctl restart");
        match process::Command::new("systemctl").args(["restart", "hwmond"]).status() {
            Ok(s) if s.success() => {
                println!("hwmond restarted via systemd");
                return Ok(());
            }
            Ok(_) => eprintln!("warning: systemctl restart failed, falling back to manual restart"),
            Err(e) => eprintln!("warning: could not run systemctl: {e}, falling back to manual restart"),
        }
    }

    if is_running() {
        stop_daemon()?;
        std::thread::sleep(std::time::Duration::from_secs(1));
    } else {
        println!("hwmond not running, starting it");
    }

    start_daemon_with_log_level(log_level)
}

/// `--set-log-level`: rewrite the persisted level and, if running, SIGHUP to
/// reload without a restart (§4.9).
pub fn set_log_level_runtime(level: &str) -> Result<()> {
    let valid = ["trace", "debug", "info", "warn", "error"];
    let level_lower = level.to_lowercase();
    if !valid.contains(&level_lower.as_str()) {
        return Err(anyhow::anyhow!("invalid log level '{level}'. valid levels: trace, debug, info, warn, error"));
    }

    let config_path = crate::config::persistence::default_config_path()?;
    let content = std::fs::read_to_string(&config_path)?;
    let mut config: AgentConfig = serde_json::from_str(&content)?;
    let old_level = config.agent.log_level.clone();
    config.agent.log_level = level_lower.clone();
    std::fs::write(&config_path, serde_json::to_string_pretty(&config)?)?;
    println!("log level updated: {old_level} -> {level_lower}");

    if let Some(pid) = get_pid()? {
        println!("sending reload signal to hwmond (pid: {pid})");
        unsafe { libc::kill(pid as i32, libc::SIGHUP) };
    } else {
        println!("hwmond is not running; new level takes effect on next start");
    }

    Ok(())
}
