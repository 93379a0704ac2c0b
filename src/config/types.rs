//! Agent configuration structs and defaults (A4, §4.11 / §6).

use serde::{Deserialize, Serialize};

use crate::core::host::{DEFAULT_AUDIT_INTERVAL, MIN_AUDIT_INTERVAL};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub agent: AgentSettings,
    pub net: NetSettings,
    pub paths: PathSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    /// §6 `audit_period`: default audit interval for newly-learned hosts, seconds.
    pub audit_period: u32,
    /// §6 `token_refresh_rate`: seconds between proactive auth-token refreshes; `0` disables.
    pub token_refresh_rate: u32,
    pub log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetSettings {
    /// UDP port the command inbox (`ADD_HOST`, `MOD_HOST`, ...) listens on.
    pub cmd_port: u16,
    /// UDP port the maintenance-agent event outbox sends to.
    pub event_port: u16,
    /// UDP port inbound inventory-event notifications arrive on.
    pub inv_event_port: u16,
    /// Port of the token-issuing endpoint used by the secret store and inventory clients.
    pub keystone_port: u16,
    pub auth_host: String,
    /// Base URL the outbound HTTP client issues `/v1/...` calls against.
    pub inventory_base_url: String,
    /// Loopback bind address for the inbound sysinv callback server.
    pub sysinv_listen_addr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathSettings {
    /// Override for `/etc/hwmon.d`.
    pub profile_dir: String,
    /// Override for `/etc/bmc/server_profiles.d/sensor_quanta_v1_ilo_v4.profile`.
    pub quanta_profile_path: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            agent: AgentSettings {
                audit_period: DEFAULT_AUDIT_INTERVAL,
                token_refresh_rate: 0,
                log_level: "info".to_string(),
            },
            net: NetSettings {
                cmd_port: 2112,
                event_port: 2113,
                inv_event_port: 2114,
                keystone_port: 5000,
                auth_host: "localhost".to_string(),
                inventory_base_url: "http://localhost:6385".to_string(),
                sysinv_listen_addr: "127.0.0.1:2115".to_string(),
            },
            paths: PathSettings {
                profile_dir: "/etc/hwmon.d".to_string(),
                quanta_profile_path: "/etc/bmc/server_profiles.d/sensor_quanta_v1_ilo_v4.profile".to_string(),
            },
        }
    }
}

impl AgentConfig {
    /// Clamp/repair anything a hand-edited file could have broken (§3 invariant:
    /// `audit_interval >= MIN_AUDIT_INTERVAL`).
    pub fn normalize(&mut self) {
        if self.agent.audit_period < MIN_AUDIT_INTERVAL {
            self.agent.audit_period = MIN_AUDIT_INTERVAL;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_clamps_audit_period_to_minimum() {
        let mut config = AgentConfig::default();
        config.agent.audit_period = 1;
        config.normalize();
        assert_eq!(config.agent.audit_period, MIN_AUDIT_INTERVAL);
    }
}
