//! Host record (§3): the owning unit for a node's sensors, groups, FSM and queue state.

use std::collections::HashMap;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::core::fsm::{MonitorStage, WorkerHandle};
use crate::core::group::Group;
use crate::core::ids::{GroupId, SensorId};
use crate::core::queue::WorkQueue;
use crate::core::sensor::Sensor;

pub const MIN_AUDIT_INTERVAL: u32 = 10;
pub const DEFAULT_AUDIT_INTERVAL: u32 = 120;
pub const LEARNING_AUDIT_INTERVAL: u32 = 5;
pub const MAX_SENSORS_PER_HOST: usize = 512;
pub const MAX_GROUPS_PER_HOST: usize = 20;
pub const MAX_SENSOR_TYPE_ERRORS: usize = 5;
pub const NOT_FOUND_COUNT_BEFORE_MINOR: u32 = 3;
pub const THREAD_POST_KILL_WAIT_SECS: u64 = 2;
pub const MAX_THREAD_RETRIES: u32 = 3;
pub const DEFAULT_THREAD_TIMEOUT_SECS: u64 = 20;

/// Preserved-attributes snapshot (§3), captured before relearn.
#[derive(Debug, Clone, Default)]
pub struct PreservedAttributes {
    pub audit_interval: u32,
    /// Per-group (by name) the three configured severity actions.
    pub group_actions: HashMap<String, crate::core::sensor::SeverityActions>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BmcProvisioning {
    pub bm_ip: Option<String>,
    pub bm_user: Option<String>,
    pub bm_type: Option<String>,
    /// Never (de)serialized; populated from the secret store immediately
    /// before each worker launch and never written to disk (§6).
    pub bm_password: Option<String>,
}

impl BmcProvisioning {
    pub fn is_provisioned(&self) -> bool {
        self.valid_ip() && self.valid_type() && self.valid_user()
    }

    fn valid_ip(&self) -> bool {
        self.bm_ip.as_deref().is_some_and(|ip| !ip.is_empty() && ip.parse::<std::net::IpAddr>().is_ok())
    }

    fn valid_type(&self) -> bool {
        matches!(self.bm_type.as_deref(), Some("ipmi") | Some("bmc"))
    }

    fn valid_user(&self) -> bool {
        self.bm_user.as_deref().is_some_and(|u| !u.is_empty() && u != "None")
    }
}

pub struct Host {
    pub hostname: String,
    pub uuid: String,
    pub bmc: BmcProvisioning,
    pub monitor_enabled: bool,
    pub audit_interval: u32,
    pub power_on: bool,
    pub poweron_learned_once: bool,

    pub sensors: Vec<Sensor>,
    pub groups: Vec<Group>,
    pub model_checksum: u16,
    pub sample_checksum: u16,
    pub quanta_server: bool,
    pub bmc_firmware_version: Option<String>,

    pub relearn_mode: bool,
    pub relearn_deadline: Option<Instant>,
    pub relearn_retry_counter: u32,
    pub preserved: Option<PreservedAttributes>,

    pub stage: MonitorStage,
    pub stage_deadline: Option<Instant>,
    pub umbrella_deadline: Option<Instant>,
    pub worker: Option<WorkerHandle>,
    pub interval_changed: bool,
    pub parse_retries: u32,
    pub delete_pending: bool,
    pub kill_retries: u32,

    pub queue: WorkQueue,

    /// Last-seen sample set, by sensor name, refreshed every `Parse` stage.
    pub last_samples: HashMap<String, crate::bmc::envelope::SensorSample>,
}

impl Host {
    pub fn new(hostname: impl Into<String>, uuid: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            uuid: uuid.into(),
            bmc: BmcProvisioning::default(),
            monitor_enabled: true,
            audit_interval: LEARNING_AUDIT_INTERVAL,
            power_on: false,
            poweron_learned_once: false,
            sensors: Vec::new(),
            groups: Vec::new(),
            model_checksum: 0,
            sample_checksum: 0,
            quanta_server: false,
            bmc_firmware_version: None,
            relearn_mode: false,
            relearn_deadline: None,
            relearn_retry_counter: 0,
            preserved: None,
            stage: MonitorStage::Idle,
            stage_deadline: None,
            umbrella_deadline: None,
            worker: None,
            interval_changed: false,
            parse_retries: 0,
            delete_pending: false,
            kill_retries: 0,
            queue: WorkQueue::new(),
            last_samples: HashMap::new(),
        }
    }

    pub fn sensor_count(&self) -> usize {
        self.sensors.len()
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    pub fn sensor_id_by_name(&self, name: &str) -> Option<SensorId> {
        self.sensors.iter().position(|s| s.sensor_name == name).map(SensorId)
    }

    pub fn group_id_by_name(&self, name: &str) -> Option<GroupId> {
        self.groups.iter().position(|g| g.group_name == name).map(GroupId)
    }

    pub fn sensor(&self, id: SensorId) -> &Sensor {
        &self.sensors[id.0]
    }

    pub fn sensor_mut(&mut self, id: SensorId) -> &mut Sensor {
        &mut self.sensors[id.0]
    }

    pub fn group(&self, id: GroupId) -> &Group {
        &self.groups[id.0]
    }

    pub fn group_mut(&mut self, id: GroupId) -> &mut Group {
        &mut self.groups[id.0]
    }

    /// §3 invariant: while disabled, all groups are `disabled` and all sensors
    /// `(disabled, offline)`.
    pub fn drive_disabled_state(&mut self) {
        use crate::core::group::GroupState;
        use crate::core::sensor::{SensorState, SensorStatus};
        for group in &mut self.groups {
            group.group_state = GroupState::Disabled;
        }
        for sensor in &mut self.sensors {
            sensor.state = SensorState::Disabled;
            sensor.status = SensorStatus::Offline;
        }
    }

    /// `audit_interval` is the minimum across group intervals, never below
    /// `MIN_AUDIT_INTERVAL` (§3).
    pub fn recompute_audit_interval(&mut self) {
        let min_group = self.groups.iter().map(|g| g.audit_interval_group).min();
        let candidate = min_group.unwrap_or(DEFAULT_AUDIT_INTERVAL).max(MIN_AUDIT_INTERVAL);
        if candidate != self.audit_interval {
            self.audit_interval = candidate;
            self.interval_changed = true;
            for group in &mut self.groups {
                group.audit_interval_group = candidate;
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HostAddRequest {
    pub hostname: String,
    pub uuid: String,
    pub bm_ip: Option<String>,
    pub bm_user: Option<String>,
    pub bm_type: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audit_interval_never_drops_below_minimum() {
        let mut host = Host::new("compute-0", "11111111-1111-1111-1111-111111111111");
        host.groups.push(Group::new(
            "fans",
            crate::core::catalog::CannedGroup::Fans,
            crate::core::sensor::DataType::Analog,
            1,
        ));
        host.recompute_audit_interval();
        assert_eq!(host.audit_interval, MIN_AUDIT_INTERVAL);
    }

    #[test]
    fn disabling_host_drives_sensors_offline() {
        let mut host = Host::new("compute-0", "uuid");
        host.sensors.push(Sensor::new(
            "Fan1",
            crate::core::sensor::SensorType::Fan,
            crate::core::sensor::DataType::Analog,
        ));
        host.drive_disabled_state();
        assert_eq!(host.sensors[0].status, crate::core::sensor::SensorStatus::Offline);
        assert_eq!(host.sensors[0].state, crate::core::sensor::SensorState::Disabled);
    }

    #[test]
    fn provisioning_requires_valid_ip_type_and_user() {
        let mut bmc = BmcProvisioning::default();
        assert!(!bmc.is_provisioned());
        bmc.bm_ip = Some("10.0.0.5".to_string());
        bmc.bm_type = Some("ipmi".to_string());
        bmc.bm_user = Some("root".to_string());
        assert!(bmc.is_provisioned());
        bmc.bm_user = Some("None".to_string());
        assert!(!bmc.is_provisioned());
    }
}
