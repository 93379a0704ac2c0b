//! Command inbox and event outbox (A5, §6): text-framed UDP datagrams.

use serde::{Deserialize, Serialize};
use tokio::net::UdpSocket;
use tracing::{debug, warn};

pub const CMD_REQUEST_HEADER: &str = "cmd_request";
pub const MTCE_EVENT_HEADER: &str = "mtce_event";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostCommandPayload {
    pub hostname: String,
    pub uuid: String,
    #[serde(default)]
    pub bm_ip: Option<String>,
    #[serde(default)]
    pub bm_user: Option<String>,
    #[serde(default)]
    pub bm_type: Option<String>,
}

#[derive(Debug, Clone)]
pub enum Command {
    AddHost(HostCommandPayload),
    ModHost(HostCommandPayload),
    DelHost(HostCommandPayload),
    StartMonitor(HostCommandPayload),
    StopMonitor(HostCommandPayload),
    QueryHost(HostCommandPayload),
}

/// Parse one inbox datagram: `cmd_request<SP><COMMAND><SP><json payload>`.
pub fn decode_command(datagram: &[u8]) -> crate::core::error::CoreResult<Command> {
    let text = std::str::from_utf8(datagram)
        .map_err(|e| crate::core::error::CoreError::Protocol(format!("non-utf8 command datagram: {e}")))?;
    let mut parts = text.splitn(3, ' ');
    let header = parts.next().unwrap_or("");
    if header != CMD_REQUEST_HEADER {
        return Err(crate::core::error::CoreError::Protocol(format!("unexpected command header {header:?}")));
    }
    let command_byte = parts.next().ok_or_else(|| crate::core::error::CoreError::Protocol("missing command byte".into()))?;
    let json = parts.next().ok_or_else(|| crate::core::error::CoreError::Protocol("missing command payload".into()))?;
    let payload: HostCommandPayload = serde_json::from_str(json)
        .map_err(|e| crate::core::error::CoreError::Protocol(format!("malformed command payload: {e}")))?;

    match command_byte {
        "ADD_HOST" => Ok(Command::AddHost(payload)),
        "MOD_HOST" => Ok(Command::ModHost(payload)),
        "DEL_HOST" => Ok(Command::DelHost(payload)),
        "START_MONITOR" => Ok(Command::StartMonitor(payload)),
        "STOP_MONITOR" => Ok(Command::StopMonitor(payload)),
        "QUERY_HOST" => Ok(Command::QueryHost(payload)),
        other => Err(crate::core::error::CoreError::InvalidArg(format!("unrecognized command {other:?}"))),
    }
}

pub struct CommandInbox {
    socket: UdpSocket,
}

impl CommandInbox {
    pub async fn bind(port: u16) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", port)).await?;
        Ok(Self { socket })
    }

    /// Receive and decode the next command; never returns on a malformed
    /// datagram, it logs and keeps listening instead.
    pub async fn recv(&self) -> Command {
        let mut buf = [0u8; 4096];
        loop {
            let (n, addr) = match self.socket.recv_from(&mut buf).await {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(error = %e, "command inbox recv error");
                    continue;
                }
            };
            match decode_command(&buf[..n]) {
                Ok(cmd) => return cmd,
                Err(e) => {
                    warn!(error = %e, from = %addr, "discarding malformed command datagram");
                    continue;
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaintenanceEventKind {
    DegradeRaise,
    DegradeClear,
    Reset,
    PowerCycle,
    HwmonMinor,
    HwmonMajor,
    HwmonCritical,
    HwmonClear,
    HwmonConfig,
}

impl MaintenanceEventKind {
    fn wire_name(self) -> &'static str {
        match self {
            Self::DegradeRaise => "DEGRADE_RAISE",
            Self::DegradeClear => "DEGRADE_CLEAR",
            Self::Reset => "RESET",
            Self::PowerCycle => "POWERCYCLE",
            Self::HwmonMinor => "HWMON_MINOR",
            Self::HwmonMajor => "HWMON_MAJOR",
            Self::HwmonCritical => "HWMON_CRITICAL",
            Self::HwmonClear => "HWMON_CLEAR",
            Self::HwmonConfig => "HWMON_CONFIG",
        }
    }
}

pub struct EventOutbox {
    socket: UdpSocket,
    target: (String, u16),
}

impl EventOutbox {
    pub async fn bind(target_host: impl Into<String>, target_port: u16) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", 0)).await?;
        Ok(Self { socket, target: (target_host.into(), target_port) })
    }

    pub async fn send(&self, kind: MaintenanceEventKind, hostname: &str, sensor: Option<&str>) {
        let body = serde_json::json!({
            "service": "hwmond",
            "hostname": hostname,
            "sensor": sensor,
        });
        let datagram = format!("{MTCE_EVENT_HEADER} {} {body}", kind.wire_name());
        debug!(event = kind.wire_name(), host = hostname, "sending maintenance event");
        if let Err(e) = self.socket.send_to(datagram.as_bytes(), &self.target).await {
            warn!(error = %e, event = kind.wire_name(), "failed to send maintenance event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_add_host_command() {
        let datagram = br#"cmd_request ADD_HOST {"hostname":"compute-0","uuid":"u1","bm_ip":"10.0.0.5","bm_user":"root","bm_type":"ipmi"}"#;
        let cmd = decode_command(datagram).unwrap();
        assert!(matches!(cmd, Command::AddHost(p) if p.hostname == "compute-0"));
    }

    #[test]
    fn rejects_wrong_header() {
        let datagram = b"garbage ADD_HOST {}";
        assert!(decode_command(datagram).is_err());
    }

    #[test]
    fn rejects_unknown_command_byte() {
        let datagram = br#"cmd_request FROB_HOST {"hostname":"h","uuid":"u"}"#;
        assert!(decode_command(datagram).is_err());
    }
}
