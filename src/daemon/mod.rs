//! Daemon management constants and submodule re-exports (A2).

pub mod pid;
pub mod systemd;
pub mod control;
pub mod status;

pub const PID_FILE: &str = "/run/hwmond/hwmond.pid";
pub const LOG_DIR: &str = "/var/log/hwmond";
pub const SYSTEMD_SERVICE_PATH: &str = "/etc/systemd/system/hwmond.service";

pub const SYSTEMD_SERVICE_TEMPLATE: &str = r#"[Unit]
Description=Hardware Sensor Monitoring Agent
After=network.target

[Service]
Type=forking
ExecStart={{EXEC_PATH}} --start
ExecStop={{EXEC_PATH}} --stop
ExecReload=/bin/kill -HUP $MAINPID
PIDFile=/run/hwmond/hwmond.pid
Restart=on-failure
RestartSec=10
User=root
WorkingDirectory={{WORK_DIR}}
StandardOutput=journal
StandardError=journal

[Install]
WantedBy=multi-user.target
"#;
