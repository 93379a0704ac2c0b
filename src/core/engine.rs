//! Severity–Action Engine (C5, §4.5). Pure function of a sensor's current
//! state plus the freshly-sampled severity; never performs I/O, only mutates
//! the sensor's runtime fields and returns the [`Effect`]s the driver must
//! carry out. Kept pure so the transition table can be unit tested without a
//! BMC, HTTP client, or event outbox.

use crate::core::effects::{AlarmSignal, Effect, MaintenanceEvent};
use crate::core::host::NOT_FOUND_COUNT_BEFORE_MINOR;
use crate::core::sensor::{ActionState, Sensor, SensorStatus};
use crate::core::severity::{Action, Reason, Severity};

/// Apply a fresh sample to a sensor and derive alarm/log/degrade/recovery effects.
///
/// `found` is whether the sensor appeared in the latest sample set (drives the
/// update-miss debounce). `hostname` is only used to stamp maintenance events.
pub fn evaluate_sensor(sensor: &mut Sensor, found: bool, hostname: &str) -> Vec<Effect> {
    let mut effects = Vec::new();

    if sensor.suppress {
        return suppress(sensor);
    }

    let effective = effective_severity(sensor, found, hostname);

    match effective {
        Severity::Good => effects.extend(clear_all(sensor, Reason::Ok)),
        Severity::Offline => effects.extend(handle_offline(sensor)),
        Severity::Minor | Severity::Major | Severity::Critical => {
            effects.extend(clear_other_severities(sensor, effective));
            effects.extend(apply_action_policy(sensor, effective, hostname));
        }
        Severity::NonRecoverable => unreachable!("for_action_dispatch maps NonRecoverable to Critical"),
    }

    sensor.sample_status_last = sensor.sample_status.clone();
    sensor.recompute_alarmed();
    effects
}

fn effective_severity(sensor: &mut Sensor, found: bool, hostname: &str) -> Severity {
    if found {
        sensor.not_updated_status_change_count = 0;
        sensor.not_found_debounce_logged = false;
        sensor.severity = sensor.sample_severity.for_action_dispatch();
        return sensor.severity;
    }

    sensor.not_updated_status_change_count += 1;
    if sensor.not_updated_status_change_count >= NOT_FOUND_COUNT_BEFORE_MINOR {
        if !sensor.not_found_debounce_logged {
            tracing::warn!(
                host = hostname,
                sensor = %sensor.sensor_name,
                "sensor missing from {} consecutive reads, forcing minor",
                sensor.not_updated_status_change_count
            );
            sensor.not_found_debounce_logged = true;
        }
        sensor.severity = Severity::Minor;
    }
    sensor.severity
}

fn suppress(sensor: &mut Sensor) -> Vec<Effect> {
    clear_all(sensor, Reason::Suppressed)
}

/// Clear every signal for this sensor with the given reason; only emits an
/// `Effect` for signals that were actually asserted (idempotence law, §8).
fn clear_all(sensor: &mut Sensor, reason: Reason) -> Vec<Effect> {
    let mut effects = Vec::new();
    for severity in [Severity::Minor, Severity::Major, Severity::Critical] {
        effects.extend(clear_severity_state(sensor, severity, reason));
    }
    if sensor.degraded {
        sensor.degraded = false;
        effects.push(Effect::SensorSignal {
            sensor: sensor.sensor_name.clone(),
            signal: AlarmSignal::Degrade,
            assert: false,
            severity: None,
            reason: Reason::Degraded,
        });
    }
    sensor.status = if reason == Reason::Ok { SensorStatus::Ok } else { sensor.status };
    effects
}

fn clear_severity_state(sensor: &mut Sensor, severity: Severity, reason: Reason) -> Vec<Effect> {
    let mut effects = Vec::new();
    let sensor_name = sensor.sensor_name.clone();
    let state: &mut ActionState = sensor.action_state_for(severity);
    if state.alarmed {
        effects.push(Effect::SensorSignal {
            sensor: sensor_name.clone(),
            signal: AlarmSignal::Alarm,
            assert: false,
            severity: Some(severity),
            reason,
        });
    }
    if state.logged {
        effects.push(Effect::SensorSignal {
            sensor: sensor_name.clone(),
            signal: AlarmSignal::Log,
            assert: false,
            severity: Some(severity),
            reason,
        });
    }
    state.clear();
    effects
}

fn clear_other_severities(sensor: &mut Sensor, keep: Severity) -> Vec<Effect> {
    let mut effects = Vec::new();
    for severity in [Severity::Minor, Severity::Major, Severity::Critical] {
        if severity != keep {
            effects.extend(clear_severity_state(sensor, severity, Reason::Ok));
        }
    }
    effects
}

fn handle_offline(sensor: &mut Sensor) -> Vec<Effect> {
    let mut effects = Vec::new();
    if sensor.severity != Severity::Offline {
        // Transitioning into offline: clear whatever was held, with reason offline.
        effects.extend(clear_all(sensor, Reason::Offline));
        sensor.status = SensorStatus::Offline;
        sensor.severity = Severity::Offline;
    }
    effects
}

fn apply_action_policy(sensor: &mut Sensor, severity: Severity, hostname: &str) -> Vec<Effect> {
    let mut effects = Vec::new();
    let action = sensor.action_for(severity).unwrap_or(Action::Log);
    sensor.severity = severity;
    sensor.status = match severity {
        Severity::Minor => SensorStatus::Minor,
        Severity::Major => SensorStatus::Major,
        _ => SensorStatus::Critical,
    };

    match (severity, action) {
        (_, Action::Ignore) => {
            let sensor_name = sensor.sensor_name.clone();
            let state = sensor.action_state_for(severity);
            if state.alarmed {
                effects.push(Effect::SensorSignal {
                    sensor: sensor_name,
                    signal: AlarmSignal::Alarm,
                    assert: false,
                    severity: Some(severity),
                    reason: Reason::Ignored,
                });
            }
            state.clear();
            sensor.action_state_for(severity).ignored = true;
        }
        (_, Action::Log) => {
            let state = sensor.action_state_for(severity);
            if !state.logged {
                state.logged = true;
                effects.push(Effect::SensorSignal {
                    sensor: sensor.sensor_name.clone(),
                    signal: AlarmSignal::Log,
                    assert: true,
                    severity: Some(severity),
                    reason: Reason::OutOfTolerance,
                });
            }
        }
        (Severity::Minor, Action::Alarm) => {
            let state = sensor.action_state_for(severity);
            if !state.alarmed {
                state.alarmed = true;
                effects.push(Effect::SensorSignal {
                    sensor: sensor.sensor_name.clone(),
                    signal: AlarmSignal::Alarm,
                    assert: true,
                    severity: Some(severity),
                    reason: Reason::OutOfTolerance,
                });
            }
            // Minor-only rule: never degrades, even if degrade was previously set.
            if sensor.degraded {
                sensor.degraded = false;
                effects.push(degrade_effect(&sensor.sensor_name, false));
            }
        }
        (Severity::Major, Action::Alarm) | (Severity::Critical, Action::Alarm) => {
            let state = sensor.action_state_for(severity);
            if !state.alarmed {
                state.alarmed = true;
                effects.push(Effect::SensorSignal {
                    sensor: sensor.sensor_name.clone(),
                    signal: AlarmSignal::Alarm,
                    assert: true,
                    severity: Some(severity),
                    reason: Reason::OutOfTolerance,
                });
            }
            if !sensor.degraded {
                sensor.degraded = true;
                effects.push(degrade_effect(&sensor.sensor_name, true));
            }
        }
        (Severity::Critical, Action::Reset) => {
            effects.extend(critical_recovery(sensor, Reason::Resetting, MaintenanceEvent::Reset, hostname));
        }
        (Severity::Critical, Action::PowerCycle) => {
            effects.extend(critical_recovery(sensor, Reason::PowerCycling, MaintenanceEvent::PowerCycle, hostname));
        }
        (Severity::Minor, Action::Reset) | (Severity::Minor, Action::PowerCycle)
        | (Severity::Major, Action::Reset) | (Severity::Major, Action::PowerCycle) => {
            // §3 invariant: illegal combination, never reached if config is validated upstream.
            tracing::error!(sensor = %sensor.sensor_name, ?severity, ?action, "illegal action for severity, treating as alarm");
            let state = sensor.action_state_for(severity);
            if !state.alarmed {
                state.alarmed = true;
                effects.push(Effect::SensorSignal {
                    sensor: sensor.sensor_name.clone(),
                    signal: AlarmSignal::Alarm,
                    assert: true,
                    severity: Some(severity),
                    reason: Reason::OutOfTolerance,
                });
            }
        }
        (Severity::Good, _) | (Severity::Offline, _) | (Severity::NonRecoverable, _) => {
            unreachable!("apply_action_policy is only called with Minor/Major/Critical severity")
        }
    }
    effects
}

fn critical_recovery(sensor: &mut Sensor, reason: Reason, event: MaintenanceEvent, hostname: &str) -> Vec<Effect> {
    let mut effects = Vec::new();
    let state = sensor.action_state_for(Severity::Critical);
    if !state.alarmed {
        state.alarmed = true;
        effects.push(Effect::SensorSignal {
            sensor: sensor.sensor_name.clone(),
            signal: AlarmSignal::Alarm,
            assert: true,
            severity: Some(Severity::Critical),
            reason,
        });
        effects.push(Effect::Maintenance {
            event,
            hostname: hostname.to_string(),
            sensor: Some(sensor.sensor_name.clone()),
        });
    }
    if !sensor.degraded {
        sensor.degraded = true;
        effects.push(degrade_effect(&sensor.sensor_name, true));
    }
    effects
}

fn degrade_effect(sensor_name: &str, assert: bool) -> Effect {
    Effect::SensorSignal {
        sensor: sensor_name.to_string(),
        signal: AlarmSignal::Degrade,
        assert,
        severity: None,
        reason: Reason::Degraded,
    }
}

/// Executes the action-change transition table (§4.5, second half) when an
/// operator PATCHes a sensor or group's configured action for one severity.
/// Returns the effects the change itself produces; the *next* evaluation
/// pass re-derives the steady-state outcome, per the table's "defer" notes.
pub fn apply_action_change(sensor: &mut Sensor, severity: Severity, new_action: Action) -> Vec<Effect> {
    let current = sensor.action_for(severity);
    if current == Some(new_action) {
        return Vec::new();
    }

    let mut effects = Vec::new();
    let was_alarmed = sensor.action_state_for(severity).alarmed;
    let was_logged = sensor.action_state_for(severity).logged;
    let was_ignored = sensor.action_state_for(severity).ignored;
    let non_ok_offline = !matches!(sensor.status, SensorStatus::Ok | SensorStatus::Offline);

    match current {
        Some(Action::Alarm) => {
            if was_alarmed {
                effects.push(Effect::SensorSignal {
                    sensor: sensor.sensor_name.clone(),
                    signal: AlarmSignal::Alarm,
                    assert: false,
                    severity: Some(severity),
                    reason: Reason::SetTo(new_action),
                });
            }
            if new_action == Action::Log && non_ok_offline {
                effects.push(Effect::SensorSignal {
                    sensor: sensor.sensor_name.clone(),
                    signal: AlarmSignal::Log,
                    assert: true,
                    severity: Some(severity),
                    reason: Reason::SetTo(new_action),
                });
            }
        }
        Some(Action::Log) => {
            if was_logged {
                effects.push(Effect::SensorSignal {
                    sensor: sensor.sensor_name.clone(),
                    signal: AlarmSignal::Log,
                    assert: false,
                    severity: Some(severity),
                    reason: Reason::SetTo(new_action),
                });
            }
        }
        Some(Action::Ignore) => {
            let _ = was_ignored;
            if new_action == Action::Log && non_ok_offline {
                effects.push(Effect::SensorSignal {
                    sensor: sensor.sensor_name.clone(),
                    signal: AlarmSignal::Log,
                    assert: true,
                    severity: Some(severity),
                    reason: Reason::SetTo(new_action),
                });
            }
        }
        Some(Action::Reset) | Some(Action::PowerCycle) => {
            if was_alarmed {
                effects.push(Effect::SensorSignal {
                    sensor: sensor.sensor_name.clone(),
                    signal: AlarmSignal::Alarm,
                    assert: false,
                    severity: Some(severity),
                    reason: Reason::SetTo(new_action),
                });
            }
        }
        None => {}
    }

    sensor.action_state_for(severity).clear();
    match severity {
        Severity::Minor => sensor.actions.minor = Some(new_action),
        Severity::Major => sensor.actions.major = Some(new_action),
        Severity::Critical => sensor.actions.critical = Some(new_action),
        _ => {}
    }

    effects.push(Effect::ActionChanged { sensor: sensor.sensor_name.clone(), severity, from: current, to: Some(new_action) });
    effects
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::sensor::{DataType, SensorType};

    fn sensor() -> Sensor {
        Sensor::new("CPU1 Temp", SensorType::Temperature, DataType::Analog)
    }

    #[test]
    fn critical_reset_raises_alarm_sets_degrade_emits_reset_once() {
        let mut s = sensor();
        s.actions.critical = Some(Action::Reset);
        s.sample_severity = Severity::Critical;

        let effects = evaluate_sensor(&mut s, true, "compute-0");
        assert!(s.degraded);
        assert!(s.critical_state.alarmed);
        assert!(effects.iter().any(|e| matches!(e, Effect::Maintenance { event: MaintenanceEvent::Reset, .. })));

        // Re-poll with the same critical sample: no new RESET event, no re-raise.
        let effects2 = evaluate_sensor(&mut s, true, "compute-0");
        assert!(!effects2.iter().any(|e| matches!(e, Effect::Maintenance { .. })));
        assert!(!effects2.iter().any(|e| matches!(e, Effect::SensorSignal { signal: AlarmSignal::Alarm, assert: true, .. })));
    }

    #[test]
    fn minor_alarm_never_degrades() {
        let mut s = sensor();
        s.actions.minor = Some(Action::Alarm);
        s.sample_severity = Severity::Minor;
        evaluate_sensor(&mut s, true, "compute-0");
        assert!(!s.degraded);
        assert!(s.minor_state.alarmed);
    }

    #[test]
    fn suppression_clears_everything_and_skips_pipeline() {
        let mut s = sensor();
        s.actions.major = Some(Action::Alarm);
        s.sample_severity = Severity::Major;
        evaluate_sensor(&mut s, true, "compute-0");
        assert!(s.major_state.alarmed);
        assert!(s.degraded);

        s.suppress = true;
        let effects = evaluate_sensor(&mut s, true, "compute-0");
        assert!(!s.degraded);
        assert!(!s.major_state.alarmed);
        assert!(effects.iter().any(|e| matches!(e, Effect::SensorSignal { reason: Reason::Suppressed, .. })));
    }

    #[test]
    fn good_clears_all_state() {
        let mut s = sensor();
        s.actions.critical = Some(Action::Alarm);
        s.sample_severity = Severity::Critical;
        evaluate_sensor(&mut s, true, "compute-0");
        assert!(s.critical_state.alarmed);

        s.sample_severity = Severity::Good;
        let effects = evaluate_sensor(&mut s, true, "compute-0");
        assert!(!s.critical_state.alarmed);
        assert!(!s.degraded);
        assert!(effects.iter().any(|e| matches!(e, Effect::SensorSignal { signal: AlarmSignal::Alarm, assert: false, .. })));
    }

    #[test]
    fn debounce_forces_minor_after_three_consecutive_misses() {
        let mut s = sensor();
        s.actions.minor = Some(Action::Alarm);
        s.sample_severity = Severity::Good;
        evaluate_sensor(&mut s, true, "compute-0");

        evaluate_sensor(&mut s, false, "compute-0");
        evaluate_sensor(&mut s, false, "compute-0");
        assert_eq!(s.severity, Severity::Good);
        evaluate_sensor(&mut s, false, "compute-0");
        assert_eq!(s.severity, Severity::Minor);
    }

    #[test]
    fn action_change_no_op_when_identical() {
        let mut s = sensor();
        s.actions.major = Some(Action::Alarm);
        let effects = apply_action_change(&mut s, Severity::Major, Action::Alarm);
        assert!(effects.is_empty());
    }

    #[test]
    fn action_change_alarm_to_log_clears_alarm_and_reraises_log_if_still_bad() {
        let mut s = sensor();
        s.actions.major = Some(Action::Alarm);
        s.sample_severity = Severity::Major;
        evaluate_sensor(&mut s, true, "compute-0");
        assert!(s.major_state.alarmed);

        let effects = apply_action_change(&mut s, Severity::Major, Action::Log);
        assert!(effects.iter().any(|e| matches!(e, Effect::SensorSignal { signal: AlarmSignal::Alarm, assert: false, .. })));
        assert!(effects.iter().any(|e| matches!(e, Effect::SensorSignal { signal: AlarmSignal::Log, assert: true, .. })));
        assert_eq!(s.actions.major, Some(Action::Log));
    }
}
