//! Process entry point: CLI dispatch, daemon lifecycle, and the core tick loop.

mod app;
mod bmc;
mod config;
mod core;
mod daemon;
mod net;

use std::process;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};

use app::cli::Args;
use bmc::ipmitool::IpmitoolClient;
use bmc::BmcClient;
use core::effects::Effect;
use core::severity::{Action, Severity};
use core::CoreState;
use net::http_server::InboundEvent;
use net::udp::{Command, CommandInbox, EventOutbox, MaintenanceEventKind};

const TICK_INTERVAL_MS: u64 = 250;

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.control_flag_count() > 1 {
        eprintln!("error: only one of --start/--stop/--restart/--status/--install-service/--uninstall-service may be given");
        process::exit(1);
    }

    if args.check {
        return daemon::status::run_health_check();
    }
    if args.install_service {
        return daemon::systemd::install_systemd_service();
    }
    if args.uninstall_service {
        return daemon::systemd::uninstall_systemd_service();
    }
    if let Some(level) = &args.set_log_level {
        return daemon::control::set_log_level_runtime(level);
    }
    if args.start {
        return daemon::control::start_daemon_with_log_level(None);
    }
    if args.stop {
        return daemon::control::stop_daemon();
    }
    if args.restart {
        return daemon::control::restart_daemon_with_log_level(None);
    }

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async_main(args))
}

async fn async_main(args: Args) -> anyhow::Result<()> {
    let config = config::persistence::load_config(args.config.as_deref()).await?;
    app::logging::init_tracing(&config.agent.log_level);

    if args.status {
        return daemon::status::show_status().await;
    }

    if args.daemon_child {
        if let Err(e) = daemon::pid::save_pid(std::process::id()) {
            error!(error = %e, "failed to save pid file");
        }
    }

    info!(version = env!("CARGO_PKG_VERSION"), "hwmond starting");

    let bmc_client: Arc<dyn BmcClient> = Arc::new(IpmitoolClient::new());
    let secret_store: Arc<dyn net::secret_store::SecretStoreClient> =
        Arc::new(net::secret_store::HttpSecretStoreClient::new(config.net.inventory_base_url.clone(), ""));
    let inventory = Arc::new(net::http_client::InventoryClient::new(config.net.inventory_base_url.clone()));
    let mut state = CoreState::new(bmc_client, secret_store, inventory);

    let cmd_inbox = CommandInbox::bind(config.net.cmd_port).await?;
    let event_outbox = EventOutbox::bind(config.net.auth_host.clone(), config.net.event_port).await?;

    let (inbound_tx, mut inbound_rx) = tokio::sync::mpsc::channel::<InboundEvent>(64);
    let http_server_port = config.net.sysinv_listen_addr
        .rsplit(':')
        .next()
        .and_then(|p| p.parse::<u16>().ok())
        .unwrap_or(config.net.inv_event_port);
    tokio::spawn(async move {
        if let Err(e) = net::http_server::serve(http_server_port, inbound_tx).await {
            error!(error = %e, "inbound sysinv callback server exited");
        }
    });

    let mut tick = tokio::time::interval(Duration::from_millis(TICK_INTERVAL_MS));
    let mut sighup = signal(SignalKind::hangup())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    info!("hwmond ready, entering event loop");

    loop {
        tokio::select! {
            _ = tick.tick() => {
                let effects = state.tick(std::time::Instant::now()).await;
                for (hostname, effect) in effects {
                    dispatch_effect(&event_outbox, &hostname, effect).await;
                }
            }
            cmd = cmd_inbox.recv() => {
                handle_command(&mut state, cmd);
            }
            Some(event) = inbound_rx.recv() => {
                for (hostname, effect) in handle_inbound_event(&mut state, event) {
                    dispatch_effect(&event_outbox, &hostname, effect).await;
                }
            }
            _ = sighup.recv() => {
                info!("SIGHUP received: reloading log level and config");
                if let Ok(fresh) = config::persistence::load_config(args.config.as_deref()).await {
                    if let Some(handle) = app::logging::RELOAD_HANDLE.get() {
                        let _ = handle.reload(tracing_subscriber::EnvFilter::new(&fresh.agent.log_level));
                    }
                }
            }
            _ = sigterm.recv() => {
                info!("SIGTERM received: shutting down gracefully");
                break;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("ctrl-c received: shutting down gracefully");
                break;
            }
        }
    }

    for hostname in state.registry.hostnames() {
        if let Some(host) = state.registry.get_mut(&hostname) {
            if let Some(worker) = host.worker.take() {
                worker.kill();
            }
        }
    }
    daemon::pid::remove_pid_file().ok();
    info!("hwmond stopped");
    Ok(())
}

fn handle_command(state: &mut CoreState, cmd: Command) {
    use core::host::HostAddRequest;
    match cmd {
        Command::AddHost(p) => {
            let req = HostAddRequest {
                hostname: p.hostname.clone(),
                uuid: p.uuid.clone(),
                bm_ip: p.bm_ip.clone(),
                bm_user: p.bm_user.clone(),
                bm_type: p.bm_type.clone(),
            };
            match state.registry.add(req) {
                core::registry::AddOutcome::Added => info!(host = %p.hostname, "host added"),
                core::registry::AddOutcome::Retry => {
                    info!(host = %p.hostname, "host already exists, converting ADD to MOD");
                    if let Err(e) = state.registry.modify(&p.hostname, p.bm_ip, p.bm_user, p.bm_type) {
                        warn!(host = %p.hostname, error = %e, "mod-on-existing failed");
                    }
                }
            }
        }
        Command::ModHost(p) => {
            if let Err(e) = state.registry.modify(&p.hostname, p.bm_ip, p.bm_user, p.bm_type) {
                warn!(host = %p.hostname, error = %e, "mod host failed");
            }
        }
        Command::DelHost(p) => {
            if let Err(e) = state.registry.begin_delete(&p.hostname) {
                warn!(host = %p.hostname, error = %e, "delete host failed");
            }
        }
        Command::StartMonitor(p) => {
            if let Some(host) = state.registry.get_mut(&p.hostname) {
                host.monitor_enabled = true;
            }
        }
        Command::StopMonitor(p) => {
            if let Some(host) = state.registry.get_mut(&p.hostname) {
                host.monitor_enabled = false;
            }
        }
        Command::QueryHost(p) => {
            if let Some(host) = state.registry.get(&p.hostname) {
                info!(host = %p.hostname, stage = ?host.stage, sensors = host.sensor_count(), "query result");
            } else {
                warn!(host = %p.hostname, "query for unknown host");
            }
        }
    }
}

/// Extract `(path, value)` pairs from an RFC-6902-style replace-op array
/// (§6: `"path":"/<key>","value":"<value>","op":"replace"`). Non-replace ops
/// and malformed entries are skipped rather than rejecting the whole patch.
fn patch_ops(patch: &serde_json::Value) -> Vec<(&str, &serde_json::Value)> {
    patch
        .as_array()
        .into_iter()
        .flatten()
        .filter(|op| op.get("op").and_then(|v| v.as_str()) == Some("replace"))
        .filter_map(|op| Some((op.get("path")?.as_str()?, op.get("value")?)))
        .collect()
}

/// Maps a PATCH path's key to the severity it configures an action for,
/// accepting both the sensor form (`actions_major`) and the group form
/// (`actions_major_group`) since both address the same `SeverityActions` shape.
fn severity_from_patch_path(path: &str) -> Option<Severity> {
    let key = path.trim_start_matches('/').trim_end_matches("_group");
    match key {
        "actions_minor" => Some(Severity::Minor),
        "actions_major" => Some(Severity::Major),
        "actions_critical" => Some(Severity::Critical),
        _ => None,
    }
}

fn apply_sensor_patch(
    host: &mut core::host::Host,
    sensor_id: core::ids::SensorId,
    patch: &serde_json::Value,
    hostname: &str,
) -> Vec<Effect> {
    let mut effects = Vec::new();
    for (path, value) in patch_ops(patch) {
        if path.trim_start_matches('/') == "suppress" {
            let Some(suppress) = value.as_bool() else { continue };
            let sensor = host.sensor_mut(sensor_id);
            sensor.suppress = suppress;
            effects.extend(core::engine::evaluate_sensor(sensor, true, hostname));
        } else if let Some(severity) = severity_from_patch_path(path) {
            let Some(action) = value.as_str().and_then(Action::from_wire) else { continue };
            let sensor = host.sensor_mut(sensor_id);
            effects.extend(core::engine::apply_action_change(sensor, severity, action));
        }
    }
    effects
}

fn apply_group_patch(
    host: &mut core::host::Host,
    group_id: core::ids::GroupId,
    patch: &serde_json::Value,
    hostname: &str,
) -> Vec<Effect> {
    let mut effects = Vec::new();
    let member_sensors = host.group(group_id).sensors.clone();
    for (path, value) in patch_ops(patch) {
        if path.trim_start_matches('/') == "suppress" {
            let Some(suppress) = value.as_bool() else { continue };
            host.group_mut(group_id).suppress = suppress;
            for sensor_id in &member_sensors {
                let sensor = host.sensor_mut(*sensor_id);
                sensor.suppress = suppress;
                effects.extend(core::engine::evaluate_sensor(sensor, true, hostname));
            }
        } else if let Some(severity) = severity_from_patch_path(path) {
            let Some(action) = value.as_str().and_then(Action::from_wire) else { continue };
            let group = host.group_mut(group_id);
            match severity {
                Severity::Minor => group.actions.minor = Some(action),
                Severity::Major => group.actions.major = Some(action),
                Severity::Critical => group.actions.critical = Some(action),
                _ => {}
            }
            for sensor_id in &member_sensors {
                let sensor = host.sensor_mut(*sensor_id);
                effects.extend(core::engine::apply_action_change(sensor, severity, action));
            }
        }
    }
    effects
}

fn handle_inbound_event(state: &mut CoreState, event: InboundEvent) -> Vec<(String, Effect)> {
    match event {
        InboundEvent::SensorModify { uuid, patch } => {
            let Some(hostname) = state.registry.find_host_by_sensor_uuid(&uuid).map(str::to_string) else {
                warn!(uuid = %uuid, "sensor modify for unknown sensor uuid");
                return Vec::new();
            };
            let Some(host) = state.registry.get_mut(&hostname) else { return Vec::new() };
            let Some(sensor_id) = host.sensors.iter().position(|s| s.uuid == uuid).map(core::ids::SensorId) else {
                return Vec::new();
            };
            apply_sensor_patch(host, sensor_id, &patch, &hostname)
                .into_iter()
                .map(|e| (hostname.clone(), e))
                .collect()
        }
        InboundEvent::GroupModify { uuid, patch } => {
            let Some(hostname) = state.registry.find_host_by_group_uuid(&uuid).map(str::to_string) else {
                warn!(uuid = %uuid, "group modify for unknown group uuid");
                return Vec::new();
            };
            let Some(host) = state.registry.get_mut(&hostname) else { return Vec::new() };
            let Some(group_id) = host.groups.iter().position(|g| g.uuid == uuid).map(core::ids::GroupId) else {
                return Vec::new();
            };
            apply_group_patch(host, group_id, &patch, &hostname)
                .into_iter()
                .map(|e| (hostname.clone(), e))
                .collect()
        }
        InboundEvent::Relearn { host_uuid } => {
            let Some(hostname) = state.registry.by_uuid(&host_uuid).map(|h| h.hostname.clone()) else {
                warn!(host_uuid = %host_uuid, "relearn requested for unknown host");
                return Vec::new();
            };
            let inventory = state.inventory.clone();
            if let Some(host) = state.registry.get_mut(&hostname) {
                let now = std::time::Instant::now();
                let delete_remote = |uuid: &str, is_group: bool| -> core::error::CoreResult<()> {
                    let path =
                        if is_group { format!("/v1/isensorgroups/{uuid}") } else { format!("/v1/isensors/{uuid}") };
                    inventory.delete_blocking(&path)
                };
                if let Err(e) = core::lifecycle::begin_relearn(host, now, delete_remote) {
                    warn!(host = %host.hostname, error = %e, "relearn request failed");
                }
            }
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bmc::FakeBmcClient;
    use crate::core::catalog::CannedGroup;
    use crate::core::group::Group;
    use crate::core::host::HostAddRequest;
    use crate::core::sensor::{DataType, Sensor, SensorType};
    use crate::net::secret_store::FakeSecretStoreClient;
    use std::sync::Mutex;

    fn state_with_host() -> CoreState {
        let bmc: Arc<dyn BmcClient> = Arc::new(FakeBmcClient::default());
        let secret_store: Arc<dyn net::secret_store::SecretStoreClient> =
            Arc::new(FakeSecretStoreClient { password: Mutex::new("secret".to_string()) });
        let inventory = Arc::new(net::http_client::InventoryClient::new("http://localhost:6385"));
        let mut state = CoreState::new(bmc, secret_store, inventory);
        state.registry.add(HostAddRequest {
            hostname: "compute-0".to_string(),
            uuid: "host-uuid-0".to_string(),
            bm_ip: Some("10.0.0.5".to_string()),
            bm_user: Some("root".to_string()),
            bm_type: Some("ipmi".to_string()),
        });
        state
    }

    #[test]
    fn patch_ops_keeps_only_replace_entries() {
        let patch = serde_json::json!([
            { "path": "/suppress", "value": true, "op": "replace" },
            { "path": "/ignored", "value": 1, "op": "add" },
        ]);
        let ops = patch_ops(&patch);
        assert_eq!(ops, vec![("/suppress", &serde_json::json!(true))]);
    }

    #[test]
    fn severity_from_patch_path_accepts_sensor_and_group_forms() {
        assert_eq!(severity_from_patch_path("/actions_major"), Some(Severity::Major));
        assert_eq!(severity_from_patch_path("/actions_major_group"), Some(Severity::Major));
        assert_eq!(severity_from_patch_path("/suppress"), None);
    }

    // Scenario 3: a group-level action-change PATCH to `log` clears the major
    // alarm on every member sensor and re-raises a log if still out of tolerance.
    #[test]
    fn group_action_change_alarm_to_log_cascades_to_members() {
        let mut state = state_with_host();
        let host = state.registry.get_mut("compute-0").unwrap();
        let mut sensor = Sensor::new("Fan1", SensorType::Fan, DataType::Analog);
        sensor.actions.major = Some(Action::Alarm);
        sensor.sample_severity = Severity::Major;
        let effects = core::engine::evaluate_sensor(&mut sensor, true, "compute-0");
        assert!(effects.iter().any(|e| matches!(e, Effect::SensorSignal { signal: core::effects::AlarmSignal::Alarm, assert: true, .. })));
        host.sensors.push(sensor);
        let sensor_id = host.sensor_id_by_name("Fan1").unwrap();

        let mut group = Group::new("fans", CannedGroup::Fans, DataType::Analog, 10);
        group.sensors.push(sensor_id);
        let group_uuid = group.uuid.clone();
        host.groups.push(group);

        let patch = serde_json::json!([
            { "path": "/actions_major_group", "value": "log", "op": "replace" },
        ]);
        let effects = handle_inbound_event(&mut state, InboundEvent::GroupModify { uuid: group_uuid, patch });

        let sensor = state.registry.get("compute-0").unwrap().sensor(sensor_id);
        assert_eq!(sensor.actions.major, Some(Action::Log));
        assert!(!sensor.major_state.alarmed);
        assert!(effects.iter().any(|(_, e)| matches!(e, Effect::SensorSignal { signal: core::effects::AlarmSignal::Alarm, assert: false, .. })));
        assert!(effects.iter().any(|(_, e)| matches!(e, Effect::SensorSignal { signal: core::effects::AlarmSignal::Log, assert: true, .. })));
    }

    // Scenario 4: a group-level suppress PATCH cascades to every member sensor,
    // clearing its alarm/degrade state with reason `Suppressed`.
    #[test]
    fn group_suppress_cascades_to_members_and_clears_alarms() {
        let mut state = state_with_host();
        let host = state.registry.get_mut("compute-0").unwrap();
        let mut sensor = Sensor::new("CPU1 Temp", SensorType::Temperature, DataType::Analog);
        sensor.actions.major = Some(Action::Alarm);
        sensor.sample_severity = Severity::Major;
        core::engine::evaluate_sensor(&mut sensor, true, "compute-0");
        assert!(sensor.degraded);
        host.sensors.push(sensor);
        let sensor_id = host.sensor_id_by_name("CPU1 Temp").unwrap();

        let mut group = Group::new("temps", CannedGroup::Temperature, DataType::Analog, 10);
        group.sensors.push(sensor_id);
        let group_uuid = group.uuid.clone();
        host.groups.push(group);

        let patch = serde_json::json!([
            { "path": "/suppress", "value": true, "op": "replace" },
        ]);
        let effects = handle_inbound_event(&mut state, InboundEvent::GroupModify { uuid: group_uuid, patch });

        let host = state.registry.get("compute-0").unwrap();
        assert!(host.groups[0].suppress);
        let sensor = host.sensor(sensor_id);
        assert!(sensor.suppress);
        assert!(!sensor.degraded);
        assert!(!sensor.major_state.alarmed);
        assert!(effects.iter().any(|(_, e)| matches!(e, Effect::SensorSignal { reason: core::severity::Reason::Suppressed, .. })));
    }

    #[test]
    fn sensor_modify_for_unknown_uuid_is_a_noop() {
        let mut state = state_with_host();
        let patch = serde_json::json!([{ "path": "/suppress", "value": true, "op": "replace" }]);
        let effects = handle_inbound_event(&mut state, InboundEvent::SensorModify { uuid: "missing".to_string(), patch });
        assert!(effects.is_empty());
    }

    #[tokio::test]
    async fn dispatch_effect_translates_degrade_and_alarm_signals_to_outbox() {
        use crate::core::effects::AlarmSignal;
        use crate::core::severity::Reason;
        use tokio::net::UdpSocket;

        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let receiver_addr = receiver.local_addr().unwrap();
        let outbox = EventOutbox::bind(receiver_addr.ip().to_string(), receiver_addr.port()).await.unwrap();

        dispatch_effect(
            &outbox,
            "compute-0",
            Effect::SensorSignal {
                sensor: "Fan1".to_string(),
                signal: AlarmSignal::Degrade,
                assert: true,
                severity: None,
                reason: Reason::OutOfTolerance,
            },
        )
        .await;
        let mut buf = [0u8; 512];
        let (n, _) = receiver.recv_from(&mut buf).await.unwrap();
        assert!(String::from_utf8_lossy(&buf[..n]).contains("DEGRADE_RAISE"));

        dispatch_effect(
            &outbox,
            "compute-0",
            Effect::SensorSignal {
                sensor: "CPU1 Temp".to_string(),
                signal: AlarmSignal::Alarm,
                assert: true,
                severity: Some(Severity::Major),
                reason: Reason::OutOfTolerance,
            },
        )
        .await;
        let (n, _) = receiver.recv_from(&mut buf).await.unwrap();
        assert!(String::from_utf8_lossy(&buf[..n]).contains("HWMON_MAJOR"));

        dispatch_effect(
            &outbox,
            "compute-0",
            Effect::SensorSignal {
                sensor: "CPU1 Temp".to_string(),
                signal: AlarmSignal::Alarm,
                assert: false,
                severity: Some(Severity::Major),
                reason: Reason::Ok,
            },
        )
        .await;
        let (n, _) = receiver.recv_from(&mut buf).await.unwrap();
        assert!(String::from_utf8_lossy(&buf[..n]).contains("HWMON_CLEAR"));
    }
}

async fn dispatch_effect(event_outbox: &EventOutbox, hostname: &str, effect: core::effects::Effect) {
    use core::effects::{AlarmSignal, Effect, MaintenanceEvent};
    match effect {
        Effect::Maintenance { event, hostname: h, sensor } => {
            let kind = match event {
                MaintenanceEvent::DegradeRaise => MaintenanceEventKind::DegradeRaise,
                MaintenanceEvent::DegradeClear => MaintenanceEventKind::DegradeClear,
                MaintenanceEvent::Reset => MaintenanceEventKind::Reset,
                MaintenanceEvent::PowerCycle => MaintenanceEventKind::PowerCycle,
                MaintenanceEvent::HwmonMinor => MaintenanceEventKind::HwmonMinor,
                MaintenanceEvent::HwmonMajor => MaintenanceEventKind::HwmonMajor,
                MaintenanceEvent::HwmonCritical => MaintenanceEventKind::HwmonCritical,
                MaintenanceEvent::HwmonClear => MaintenanceEventKind::HwmonClear,
                MaintenanceEvent::HwmonConfig => MaintenanceEventKind::HwmonConfig,
            };
            event_outbox.send(kind, &h, sensor.as_deref()).await;
        }
        Effect::SensorSignal { sensor, signal, assert, severity, reason } => {
            info!(host = hostname, sensor = %sensor, ?signal, assert, ?severity, reason = %reason, "sensor signal");
            // Degrade and severity-alarm signals are also node-level events the
            // maintenance agent needs on the wire (§6), not just a local log line.
            let kind = match (signal, assert, severity) {
                (AlarmSignal::Degrade, true, _) => Some(MaintenanceEventKind::DegradeRaise),
                (AlarmSignal::Degrade, false, _) => Some(MaintenanceEventKind::DegradeClear),
                (AlarmSignal::Alarm, true, Some(Severity::Minor)) => Some(MaintenanceEventKind::HwmonMinor),
                (AlarmSignal::Alarm, true, Some(Severity::Major)) => Some(MaintenanceEventKind::HwmonMajor),
                (AlarmSignal::Alarm, true, Some(Severity::Critical)) => Some(MaintenanceEventKind::HwmonCritical),
                (AlarmSignal::Alarm, false, Some(_)) => Some(MaintenanceEventKind::HwmonClear),
                _ => None,
            };
            if let Some(kind) = kind {
                event_outbox.send(kind, hostname, Some(&sensor)).await;
            }
        }
        Effect::GroupSignal { group, assert, reason } => {
            info!(host = hostname, group = %group, assert, reason = %reason, "group signal");
        }
        Effect::ActionChanged { sensor, severity, from, to } => {
            info!(host = hostname, sensor = %sensor, ?severity, ?from, ?to, "severity action changed");
        }
    }
}
