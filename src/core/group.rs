//! Group record (§3).

use serde::{Deserialize, Serialize};

use crate::core::catalog::CannedGroup;
use crate::core::ids::SensorId;
use crate::core::sensor::{DataType, SensorType, SeverityActions};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupState {
    Enabled,
    Disabled,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub uuid: String,
    pub group_name: String,
    pub group_enum: CannedGroup,
    pub sensor_type: SensorType,
    pub data_type: DataType,
    pub group_state: GroupState,
    pub audit_interval_group: u32,
    pub actions: SeverityActions,
    pub suppress: bool,
    pub sensors: Vec<SensorId>,

    #[serde(skip, default)]
    pub failed: bool,
    #[serde(skip, default)]
    pub alarmed: bool,
}

impl Group {
    pub fn new(group_name: impl Into<String>, group_enum: CannedGroup, data_type: DataType, audit_interval: u32) -> Self {
        let sensor_type = SensorType::from_canned_group(group_enum)
            .expect("a concrete group is never created for the Null canned group");
        Self {
            uuid: uuid::Uuid::new_v4().to_string(),
            group_name: group_name.into(),
            group_enum,
            sensor_type,
            data_type,
            group_state: GroupState::Enabled,
            audit_interval_group: audit_interval,
            actions: SeverityActions::default(),
            suppress: false,
            sensors: Vec::new(),
            failed: false,
            alarmed: false,
        }
    }
}
