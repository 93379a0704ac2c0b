//! Model Lifecycle (C4, §4.4): first-learn from samples, checksum compare,
//! and relearn delete/create with preserved-attributes restore.

use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::bmc::envelope::SensorSample;
use crate::core::catalog::CannedGroup;
use crate::core::error::{CoreError, CoreResult};
use crate::core::group::Group;
use crate::core::host::{
    Host, PreservedAttributes, DEFAULT_AUDIT_INTERVAL, LEARNING_AUDIT_INTERVAL, MAX_GROUPS_PER_HOST,
    MAX_SENSORS_PER_HOST, MAX_SENSOR_TYPE_ERRORS,
};
use crate::core::sensor::Sensor;

const RELEARN_MIN_RETRY_WAIT_SECS: u64 = 60;
const RELEARN_WINDOW_SECS: u64 = 300;

/// Quanta iLO4 profile fast path (§4.4.2): fixed five-group set.
const QUANTA_GROUP_NAMES: [(&str, CannedGroup); 5] = [
    ("fans", CannedGroup::Fans),
    ("psu-fans", CannedGroup::Fans),
    ("power", CannedGroup::Power),
    ("temperature", CannedGroup::Temperature),
    ("voltage", CannedGroup::Voltage),
];

/// Create groups/sensors from a fresh sample set when `Check` finds the host
/// has no stored model yet (§4.4.2).
pub fn create_from_samples(host: &mut Host, samples: &[SensorSample]) -> CoreResult<()> {
    host.groups.clear();
    host.sensors.clear();

    if host.quanta_server {
        create_quanta_fixed_groups(host)?;
    } else {
        create_from_catalog_walk(host, samples)?;
    }

    group_sensors(host);
    host.recompute_audit_interval();

    let names: Vec<&str> = host.sensors.iter().map(|s| s.sensor_name.as_str()).collect();
    host.model_checksum = crate::core::checksum::checksum_sensor_profile(&names);

    if let Some(preserved) = host.preserved.take() {
        restore_preserved(host, &preserved);
    }

    Ok(())
}

fn create_quanta_fixed_groups(host: &mut Host) -> CoreResult<()> {
    for (name, canned) in QUANTA_GROUP_NAMES {
        host.groups.push(Group::new(name, canned, crate::core::sensor::DataType::Analog, DEFAULT_AUDIT_INTERVAL));
    }
    // The bundled sensor-profile file supplies names for the fixed groups;
    // actual loading happens in `config::profile` (A4) before this call, via
    // `load_quanta_sensor_names`. Here we only guarantee the group shape.
    if host.groups.len() != QUANTA_GROUP_NAMES.len() {
        return Err(CoreError::ModelDrift("quanta fixed-group count mismatch".into()));
    }
    Ok(())
}

fn create_from_catalog_walk(host: &mut Host, samples: &[SensorSample]) -> CoreResult<()> {
    let mut empty_unit_errors = 0usize;

    for sample in samples {
        if sample.unit.is_empty() {
            empty_unit_errors += 1;
            if empty_unit_errors > MAX_SENSOR_TYPE_ERRORS {
                return Err(CoreError::InvalidArg(format!(
                    "FAIL_STRING_EMPTY: more than {MAX_SENSOR_TYPE_ERRORS} samples with empty unit"
                )));
            }
            continue;
        }

        let canned = CannedGroup::resolve(&sample.unit, &sample.name, sample.discrete, sample.percent);
        if canned.is_null() {
            continue;
        }

        if host.group_id_by_name(canned.name()).is_none() {
            if host.groups.len() >= MAX_GROUPS_PER_HOST {
                warn!(host = %host.hostname, "MAX_GROUPS_PER_HOST reached, dropping further new groups");
                continue;
            }
            host.groups.push(Group::new(
                canned.name(),
                canned,
                if sample.discrete { crate::core::sensor::DataType::Discrete } else { crate::core::sensor::DataType::Analog },
                DEFAULT_AUDIT_INTERVAL,
            ));
        }

        if host.sensors.len() >= MAX_SENSORS_PER_HOST {
            warn!(host = %host.hostname, "MAX_SENSORS_PER_HOST reached, dropping further new sensors");
            continue;
        }

        let sensor_type = crate::core::sensor::SensorType::from_canned_group(canned)
            .expect("canned group resolved non-null above");
        let data_type = if sample.discrete { crate::core::sensor::DataType::Discrete } else { crate::core::sensor::DataType::Analog };
        host.sensors.push(Sensor::new(&sample.name, sensor_type, data_type));
    }

    Ok(())
}

/// Assign each sensor to its group by matching `sensor_type`, and record the
/// back-reference on the group (§3: `group_sensors()`).
pub fn group_sensors(host: &mut Host) {
    let group_lookup: Vec<(usize, crate::core::sensor::SensorType)> =
        host.groups.iter().enumerate().map(|(i, g)| (i, g.sensor_type)).collect();

    for group in &mut host.groups {
        group.sensors.clear();
    }

    for (idx, sensor) in host.sensors.iter_mut().enumerate() {
        if let Some((group_idx, _)) = group_lookup.iter().find(|(_, t)| *t == sensor.sensor_type) {
            sensor.group_id = Some(crate::core::ids::GroupId(*group_idx));
            host.groups[*group_idx].sensors.push(crate::core::ids::SensorId(idx));
        }
    }
}

/// Snapshot preserved attributes before a relearn wipes the model (§4.4.3).
pub fn snapshot_preserved(host: &mut Host) {
    let mut group_actions = std::collections::HashMap::new();
    for group in &host.groups {
        group_actions.insert(group.group_name.clone(), group.actions.clone());
    }
    host.preserved = Some(PreservedAttributes { audit_interval: host.audit_interval, group_actions });
}

fn restore_preserved(host: &mut Host, preserved: &PreservedAttributes) {
    for group in &mut host.groups {
        if let Some(actions) = preserved.group_actions.get(&group.group_name) {
            group.actions = actions.clone();
        }
    }
    for sensor in &mut host.sensors {
        if let Some(group_id) = sensor.group_id {
            sensor.actions = host.groups[group_id.0].actions.clone();
        }
    }
}

/// Begin a relearn cycle (§4.4.3). Clears alarms/degrade, enters
/// `relearn_mode`, and tries to delete the existing groups/sensors last to
/// first via the supplied external-delete callback. On any delete failure,
/// bumps `relearn_retry_counter` and schedules another attempt no sooner
/// than a minute out, inside a five-minute completion window.
pub fn begin_relearn<F>(host: &mut Host, now: Instant, mut delete_remote: F) -> CoreResult<()>
where
    F: FnMut(&str, bool) -> CoreResult<()>,
{
    if host.relearn_mode && host.relearn_deadline.is_some_and(|d| now < d) {
        return Err(CoreError::BadState("relearn already in progress, RETRY".into()));
    }

    snapshot_preserved(host);

    for sensor in &mut host.sensors {
        sensor.alarmed = false;
        sensor.minor_state.clear();
        sensor.major_state.clear();
        sensor.critical_state.clear();
        sensor.degraded = false;
    }
    for group in &mut host.groups {
        group.alarmed = false;
    }

    while let Some(sensor) = host.sensors.pop() {
        if let Err(e) = delete_remote(&sensor.uuid, false) {
            host.sensors.push(sensor);
            host.relearn_retry_counter += 1;
            host.relearn_deadline = Some(now + Duration::from_secs(RELEARN_WINDOW_SECS));
            warn!(host = %host.hostname, error = %e, "relearn sensor delete failed, will retry");
            return Err(CoreError::BadState("relearn delete failed, retry scheduled".into()));
        }
    }
    while let Some(group) = host.groups.pop() {
        if let Err(e) = delete_remote(&group.uuid, true) {
            host.groups.push(group);
            host.relearn_retry_counter += 1;
            host.relearn_deadline = Some(now + Duration::from_secs(RELEARN_WINDOW_SECS));
            warn!(host = %host.hostname, error = %e, "relearn group delete failed, will retry");
            return Err(CoreError::BadState("relearn delete failed, retry scheduled".into()));
        }
    }

    host.relearn_mode = true;
    host.relearn_retry_counter = 0;
    host.relearn_deadline = Some(now + Duration::from_secs(RELEARN_WINDOW_SECS));
    host.model_checksum = 0;
    // Relearn rebuilds the model from scratch, same as first contact: drop
    // back to the fast learning cadence until `create_from_samples` promotes
    // it back via `recompute_audit_interval`.
    host.audit_interval = LEARNING_AUDIT_INTERVAL;
    host.interval_changed = true;
    info!(host = %host.hostname, "relearn started");
    Ok(())
}

/// Minimum wait enforced between retry attempts when a relearn delete failed.
pub fn relearn_retry_ready(host: &Host, last_attempt: Instant, now: Instant) -> bool {
    now.duration_since(last_attempt) >= Duration::from_secs(RELEARN_MIN_RETRY_WAIT_SECS) || !host.relearn_mode
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::host::Host;

    fn sample(name: &str, unit: &str) -> SensorSample {
        SensorSample { name: name.into(), unit: unit.into(), status: "ok".into(), value: Some(1.0), discrete: false, percent: false }
    }

    #[test]
    fn catalog_walk_creates_one_group_per_distinct_unit_family() {
        let mut host = Host::new("compute-0", "uuid");
        let samples = vec![sample("Fan1", "RPM"), sample("Fan2", "RPM"), sample("MB Temp", "degrees")];
        create_from_samples(&mut host, &samples).unwrap();
        assert_eq!(host.groups.len(), 2);
        assert_eq!(host.sensors.len(), 3);
        assert!(host.model_checksum != 0);
    }

    #[test]
    fn empty_sample_set_creates_no_model() {
        let mut host = Host::new("compute-0", "uuid");
        create_from_samples(&mut host, &[]).unwrap();
        assert_eq!(host.groups.len(), 0);
        assert_eq!(host.sensors.len(), 0);
    }

    #[test]
    fn too_many_empty_unit_samples_aborts_with_invalid_arg() {
        let mut host = Host::new("compute-0", "uuid");
        let samples: Vec<SensorSample> = (0..MAX_SENSOR_TYPE_ERRORS + 1).map(|i| sample(&format!("Mystery{i}"), "")).collect();
        let err = create_from_samples(&mut host, &samples).unwrap_err();
        assert!(matches!(err, CoreError::InvalidArg(_)));
    }

    #[test]
    fn relearn_restores_preserved_group_actions_by_name() {
        let mut host = Host::new("compute-0", "uuid");
        let samples = vec![sample("Fan1", "RPM")];
        create_from_samples(&mut host, &samples).unwrap();
        host.groups[0].actions.major = Some(crate::core::severity::Action::Alarm);

        let now = Instant::now();
        begin_relearn(&mut host, now, |_, _| Ok(())).unwrap();
        assert!(host.relearn_mode);
        assert!(host.groups.is_empty());

        create_from_samples(&mut host, &samples).unwrap();
        assert_eq!(host.groups[0].actions.major, Some(crate::core::severity::Action::Alarm));
    }

    #[test]
    fn relearn_drops_to_learning_cadence_then_create_from_samples_promotes_it() {
        let mut host = Host::new("compute-0", "uuid");
        let samples = vec![sample("Fan1", "RPM")];
        create_from_samples(&mut host, &samples).unwrap();
        assert_eq!(host.audit_interval, DEFAULT_AUDIT_INTERVAL);

        let now = Instant::now();
        begin_relearn(&mut host, now, |_, _| Ok(())).unwrap();
        assert_eq!(host.audit_interval, LEARNING_AUDIT_INTERVAL);

        create_from_samples(&mut host, &samples).unwrap();
        assert_eq!(host.audit_interval, DEFAULT_AUDIT_INTERVAL);
    }

    #[test]
    fn relearn_delete_failure_schedules_retry_and_preserves_model() {
        let mut host = Host::new("compute-0", "uuid");
        let samples = vec![sample("Fan1", "RPM")];
        create_from_samples(&mut host, &samples).unwrap();
        let sensor_count_before = host.sensors.len();

        let now = Instant::now();
        let err = begin_relearn(&mut host, now, |_, _| Err(CoreError::Timeout("delete timed out".into())));
        assert!(err.is_err());
        assert_eq!(host.relearn_retry_counter, 1);
        assert_eq!(host.sensors.len(), sensor_count_before);
    }
}
