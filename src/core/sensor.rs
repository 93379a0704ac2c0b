//! Sensor record (§3).

use serde::{Deserialize, Serialize};

use crate::core::catalog::CannedGroup;
use crate::core::ids::GroupId;
use crate::core::severity::{Action, Severity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SensorStatus {
    Ok,
    Minor,
    Major,
    Critical,
    Offline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SensorState {
    Enabled,
    Disabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    Analog,
    Discrete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SensorType {
    Fan,
    Temperature,
    Voltage,
    Power,
    Usage,
}

impl SensorType {
    pub fn from_canned_group(group: CannedGroup) -> Option<Self> {
        match group {
            CannedGroup::Fans => Some(SensorType::Fan),
            CannedGroup::Temperature => Some(SensorType::Temperature),
            CannedGroup::Voltage => Some(SensorType::Voltage),
            CannedGroup::Power => Some(SensorType::Power),
            CannedGroup::Usage => Some(SensorType::Usage),
            CannedGroup::Null => None,
        }
    }
}

/// The three action-state flags the engine tracks per severity level, so a
/// clear can be issued without re-deriving "was it asserted" from scratch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionState {
    pub alarmed: bool,
    pub ignored: bool,
    pub logged: bool,
}

impl ActionState {
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn is_asserted(&self) -> bool {
        self.alarmed || self.ignored || self.logged
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityActions {
    pub minor: Option<Action>,
    pub major: Option<Action>,
    pub critical: Option<Action>,
}

impl Default for SeverityActions {
    /// The stock BMC profile default: log everything until an operator tunes it.
    fn default() -> Self {
        Self {
            minor: Some(Action::Log),
            major: Some(Action::Log),
            critical: Some(Action::Log),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Thresholds {
    pub lower_minor: Option<f64>,
    pub lower_major: Option<f64>,
    pub lower_critical: Option<f64>,
    pub upper_minor: Option<f64>,
    pub upper_major: Option<f64>,
    pub upper_critical: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sensor {
    pub uuid: String,
    pub sensor_name: String,
    pub entity_path: String,
    pub sensor_type: SensorType,
    pub data_type: DataType,
    pub group_id: Option<GroupId>,
    pub status: SensorStatus,
    pub state: SensorState,
    pub actions: SeverityActions,
    pub suppress: bool,
    pub thresholds: Thresholds,

    // Runtime-only fields, never persisted externally.
    #[serde(skip, default)]
    pub severity: Severity,
    #[serde(skip, default)]
    pub sample_severity: Severity,
    #[serde(skip, default = "default_sample_status")]
    pub sample_status: String,
    #[serde(skip, default = "default_sample_status")]
    pub sample_status_last: String,
    #[serde(skip, default)]
    pub alarmed: bool,
    #[serde(skip, default)]
    pub degraded: bool,
    #[serde(skip, default)]
    pub minor_state: ActionState,
    #[serde(skip, default)]
    pub major_state: ActionState,
    #[serde(skip, default)]
    pub critical_state: ActionState,
    #[serde(skip, default)]
    pub not_updated_status_change_count: u32,
    #[serde(skip, default)]
    pub not_found_debounce_logged: bool,
    #[serde(skip, default)]
    pub not_found_log_throttle: u32,
    #[serde(skip, default)]
    pub ignored: bool,
}

fn default_sample_status() -> String {
    "unknown".to_string()
}

impl Sensor {
    pub fn new(sensor_name: impl Into<String>, sensor_type: SensorType, data_type: DataType) -> Self {
        let sensor_name = sensor_name.into();
        Self {
            uuid: uuid::Uuid::new_v4().to_string(),
            entity_path: sensor_name.clone(),
            sensor_name,
            sensor_type,
            data_type,
            group_id: None,
            status: SensorStatus::Ok,
            state: SensorState::Enabled,
            actions: SeverityActions::default(),
            suppress: false,
            thresholds: Thresholds::default(),
            severity: Severity::Good,
            sample_severity: Severity::Good,
            sample_status: default_sample_status(),
            sample_status_last: default_sample_status(),
            alarmed: false,
            degraded: false,
            minor_state: ActionState::default(),
            major_state: ActionState::default(),
            critical_state: ActionState::default(),
            not_updated_status_change_count: 0,
            not_found_debounce_logged: false,
            not_found_log_throttle: 0,
            ignored: false,
        }
    }

    /// §3 invariant: `alarmed = minor.alarmed || major.alarmed || critical.alarmed`,
    /// at most one ever set. Conflicting derivation is logged by the caller and
    /// resolved to "clear wins" before this is called.
    pub fn recompute_alarmed(&mut self) {
        let set_count = [self.minor_state.alarmed, self.major_state.alarmed, self.critical_state.alarmed]
            .iter()
            .filter(|b| **b)
            .count();
        if set_count > 1 {
            tracing::warn!(sensor = %self.sensor_name, "conflicting alarm sub-flags, clearing all but highest severity");
            self.minor_state.alarmed = false;
            self.major_state.alarmed = false;
        }
        self.alarmed = self.minor_state.alarmed || self.major_state.alarmed || self.critical_state.alarmed;
    }

    pub fn action_for(&self, severity: Severity) -> Option<Action> {
        match severity {
            Severity::Minor => self.actions.minor,
            Severity::Major => self.actions.major,
            Severity::Critical => self.actions.critical,
            _ => None,
        }
    }

    pub fn action_state_for(&mut self, severity: Severity) -> &mut ActionState {
        match severity {
            Severity::Minor => &mut self.minor_state,
            Severity::Major => &mut self.major_state,
            _ => &mut self.critical_state,
        }
    }
}
