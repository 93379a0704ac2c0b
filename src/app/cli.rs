//! Command-line argument definitions (A1, §4.8).

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "hwmond")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Hardware-sensor monitoring agent for a cluster management plane", long_about = None)]
pub struct Args {
    /// Alternate config file location
    #[arg(long, help_heading = "Config & Debug")]
    pub config: Option<String>,

    /// Run attached to the terminal (default when no control flag is given)
    #[arg(long, help_heading = "Daemon Control")]
    pub foreground: bool,

    /// Start the agent daemon in background
    #[arg(short = 's', long, help_heading = "Daemon Control")]
    pub start: bool,

    /// Stop the agent daemon
    #[arg(short = 'x', long, help_heading = "Daemon Control")]
    pub stop: bool,

    /// Restart the agent daemon
    #[arg(short = 'r', long, help_heading = "Daemon Control")]
    pub restart: bool,

    /// Show agent status
    #[arg(short = 'i', long = "status", help_heading = "Status & Logs")]
    pub status: bool,

    /// Rewrite the persisted log level and, if running, SIGHUP to reload
    #[arg(long = "set-log-level", help_heading = "Status & Logs")]
    pub set_log_level: Option<String>,

    /// Install systemd service for auto-start on boot
    #[arg(short = 'I', long = "install-service", help_heading = "Setup & Service")]
    pub install_service: bool,

    /// Uninstall systemd service
    #[arg(short = 'U', long = "uninstall-service", help_heading = "Setup & Service")]
    pub uninstall_service: bool,

    /// Run health check (verify config, service, directories)
    #[arg(long, help_heading = "Config & Debug")]
    pub check: bool,

    /// Internal flag used when `--start` re-execs itself in the background
    #[arg(long, hide = true)]
    pub daemon_child: bool,
}

impl Args {
    /// Exactly one control flag may be given; `--foreground` is implied when none are (§4.8).
    pub fn control_flag_count(&self) -> usize {
        [self.start, self.stop, self.restart, self.status, self.install_service, self.uninstall_service]
            .iter()
            .filter(|b| **b)
            .count()
    }
}
