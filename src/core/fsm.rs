//! Per-host Monitor FSM (C3, §4.1). Owns the BMC worker lifecycle and the
//! umbrella timeout around it; feeds parsed samples through the Model
//! Lifecycle (C4) and the Severity-Action Engine (C5) once a cycle lands.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::bmc::envelope::SensorSample;
use crate::bmc::{BmcClient, BmcCredentials};
use crate::core::effects::Effect;
use crate::core::error::{CoreError, CoreResult};
use crate::core::group::GroupState;
use crate::core::host::{
    Host, DEFAULT_THREAD_TIMEOUT_SECS, MAX_SENSOR_TYPE_ERRORS, MAX_THREAD_RETRIES,
};
use crate::core::{engine, lifecycle};
use crate::net::secret_store::SecretStoreClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorStage {
    Idle,
    Start,
    Power,
    Restart,
    Delay,
    Read,
    Parse,
    Check,
    Update,
    Handle,
    Fail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerCommand {
    PowerStatus,
    SensorRead,
}

enum WorkerJob {
    PowerStatus(JoinHandle<CoreResult<bool>>),
    SensorRead(JoinHandle<CoreResult<Vec<SensorSample>>>),
}

/// A single-shot, killable BMC worker task (C2, §4.2).
pub struct WorkerHandle {
    command: WorkerCommand,
    job: WorkerJob,
}

pub enum WorkerOutput {
    PowerStatus(bool),
    SensorRead(Vec<SensorSample>),
}

impl WorkerHandle {
    pub fn spawn_power_status(bmc: Arc<dyn BmcClient>, creds: BmcCredentials) -> Self {
        let job = tokio::spawn(async move { bmc.power_status(&creds).await });
        Self { command: WorkerCommand::PowerStatus, job: WorkerJob::PowerStatus(job) }
    }

    pub fn spawn_sensor_read(bmc: Arc<dyn BmcClient>, creds: BmcCredentials) -> Self {
        let job = tokio::spawn(async move { bmc.read_sensors(&creds).await });
        Self { command: WorkerCommand::SensorRead, job: WorkerJob::SensorRead(job) }
    }

    pub fn command(&self) -> WorkerCommand {
        self.command
    }

    pub fn is_finished(&self) -> bool {
        match &self.job {
            WorkerJob::PowerStatus(h) => h.is_finished(),
            WorkerJob::SensorRead(h) => h.is_finished(),
        }
    }

    /// Kill the worker; §4.2 "killable before completion".
    pub fn kill(&self) {
        match &self.job {
            WorkerJob::PowerStatus(h) => h.abort(),
            WorkerJob::SensorRead(h) => h.abort(),
        }
    }

    /// Non-blocking: only call once `is_finished()` is true.
    pub async fn join(self) -> CoreResult<WorkerOutput> {
        match self.job {
            WorkerJob::PowerStatus(h) => match h.await {
                Ok(Ok(on)) => Ok(WorkerOutput::PowerStatus(on)),
                Ok(Err(e)) => Err(e),
                Err(e) => Err(CoreError::WorkerFailed(format!("worker task panicked: {e}"))),
            },
            WorkerJob::SensorRead(h) => match h.await {
                Ok(Ok(samples)) => Ok(WorkerOutput::SensorRead(samples)),
                Ok(Err(e)) => Err(e),
                Err(e) => Err(CoreError::WorkerFailed(format!("worker task panicked: {e}"))),
            },
        }
    }
}

pub const POWER_OFF_RESTART_SECS: u64 = 60;

/// The side effects and follow-up HTTP work one `tick_host` call produced,
/// besides the mutations already applied to `host` in place.
#[derive(Default)]
pub struct TickResult {
    pub effects: Vec<Effect>,
    /// True once this tick transitioned into `Fail`: caller may want to log loudly.
    pub failed: bool,
}

/// Drive one host's FSM exactly one stage transition forward. Call once per
/// tick per host; ordering across hosts is the caller's responsibility (§5).
pub async fn tick_host(
    host: &mut Host,
    hostname: &str,
    bmc: &Arc<dyn BmcClient>,
    secret_store: &Arc<dyn SecretStoreClient>,
    now: Instant,
) -> TickResult {
    let mut result = TickResult::default();

    if !host.monitor_enabled || !host.bmc.is_provisioned() {
        if host.stage != MonitorStage::Idle {
            kill_worker(host);
            host.stage = MonitorStage::Idle;
        }
        host.drive_disabled_state();
        return result;
    }

    match host.stage {
        MonitorStage::Idle => {
            host.stage = MonitorStage::Start;
        }

        MonitorStage::Start => {
            kill_worker(host);
            host.umbrella_deadline = Some(now + Duration::from_secs(DEFAULT_THREAD_TIMEOUT_SECS + 5));
            host.interval_changed = false;
            if !host.power_on && host.sensor_count() == 0 && !host.relearn_mode {
                let creds = match credentials(host, secret_store).await {
                    Some(c) => c,
                    None => {
                        host.stage = MonitorStage::Fail;
                        return result;
                    }
                };
                host.worker = Some(WorkerHandle::spawn_power_status(bmc.clone(), creds));
                host.stage = MonitorStage::Power;
            } else {
                host.stage_deadline = Some(now + Duration::from_secs(host.audit_interval as u64));
                host.stage = MonitorStage::Delay;
            }
        }

        MonitorStage::Power => {
            let Some(worker) = host.worker.take() else {
                host.stage = MonitorStage::Fail;
                return result;
            };
            if !worker.is_finished() {
                host.worker = Some(worker);
                return result;
            }
            match worker.join().await {
                Ok(WorkerOutput::PowerStatus(true)) => {
                    host.power_on = true;
                    host.poweron_learned_once = true;
                    host.stage_deadline = Some(now);
                    host.stage = MonitorStage::Delay;
                }
                Ok(_) | Err(_) => {
                    host.power_on = false;
                    host.stage_deadline = Some(now + Duration::from_secs(POWER_OFF_RESTART_SECS));
                    host.stage = MonitorStage::Restart;
                }
            }
        }

        MonitorStage::Restart => {
            if host.stage_deadline.is_some_and(|d| now >= d) {
                host.stage = MonitorStage::Start;
            }
        }

        MonitorStage::Delay => {
            if host.interval_changed {
                host.stage_deadline = Some(now);
            }
            if host.stage_deadline.is_some_and(|d| now >= d) {
                if host.worker.is_some() {
                    host.stage = MonitorStage::Fail;
                } else {
                    let creds = match credentials(host, secret_store).await {
                        Some(c) => c,
                        None => {
                            host.stage = MonitorStage::Fail;
                            return result;
                        }
                    };
                    host.worker = Some(WorkerHandle::spawn_sensor_read(bmc.clone(), creds));
                    host.umbrella_deadline = Some(now + Duration::from_secs(DEFAULT_THREAD_TIMEOUT_SECS + 5));
                    host.parse_retries = 0;
                    host.stage = MonitorStage::Read;
                }
            }
        }

        MonitorStage::Read => {
            let Some(worker) = host.worker.as_ref() else {
                host.stage = MonitorStage::Fail;
                return result;
            };
            if worker.is_finished() {
                host.stage = MonitorStage::Parse;
            } else if host.umbrella_deadline.is_some_and(|d| now >= d) {
                kill_worker(host);
                host.stage = MonitorStage::Fail;
            }
        }

        MonitorStage::Parse => {
            if host.umbrella_deadline.is_some_and(|d| now >= d) {
                kill_worker(host);
                host.stage = MonitorStage::Fail;
                return result;
            }
            let Some(worker) = host.worker.take() else {
                host.stage = MonitorStage::Fail;
                return result;
            };
            match worker.join().await {
                Ok(WorkerOutput::SensorRead(samples)) => {
                    host.last_samples = samples.into_iter().map(|s| (s.name.clone(), s)).collect();
                    host.stage = MonitorStage::Check;
                }
                Ok(WorkerOutput::PowerStatus(_)) => {
                    host.stage = MonitorStage::Fail;
                }
                Err(_) if host.parse_retries < MAX_THREAD_RETRIES => {
                    host.parse_retries += 1;
                    host.stage_deadline = Some(now + Duration::from_secs(2));
                    host.stage = MonitorStage::Delay;
                }
                Err(e) => {
                    warn!(host = hostname, error = %e, "sensor read failed, retries exhausted");
                    host.stage = MonitorStage::Fail;
                }
            }
        }

        MonitorStage::Check => {
            if host.last_samples.is_empty() {
                warn!(host = hostname, "FAIL_INVALID_DATA: empty sample set");
                host.stage = MonitorStage::Fail;
                return result;
            }

            let names: Vec<&str> = host.last_samples.keys().map(|s| s.as_str()).collect();
            host.sample_checksum = crate::core::checksum::checksum_sample_profile(&names);

            if host.model_checksum == 0 {
                let samples: Vec<SensorSample> = host.last_samples.values().cloned().collect();
                match lifecycle::create_from_samples(host, &samples) {
                    Ok(()) => {}
                    Err(e) => {
                        error!(host = hostname, error = %e, "model creation from samples failed");
                        host.stage = MonitorStage::Fail;
                        return result;
                    }
                }
                if host.sensor_count() == 0 {
                    // Freshly created zero-sensor model: go learn again next cycle.
                    host.stage = MonitorStage::Start;
                    return result;
                }
            }

            host.stage = MonitorStage::Update;
        }

        MonitorStage::Update => {
            for sensor in &mut host.sensors {
                if let Some(sample) = host.last_samples.get(&sensor.sensor_name) {
                    sensor.sample_status = sample.status.clone();
                    sensor.sample_severity = crate::core::severity::Severity::from_bmc_status(&sample.status);
                }
            }
            for group in &mut host.groups {
                group.group_state = GroupState::Enabled;
            }
            host.stage = MonitorStage::Handle;
        }

        MonitorStage::Handle => {
            for sensor in &mut host.sensors {
                let found = host.last_samples.contains_key(&sensor.sensor_name);
                result.effects.extend(engine::evaluate_sensor(sensor, found, hostname));
            }
            if host.bmc_firmware_version.is_none() {
                if let Some(creds) = credentials(host, secret_store).await {
                    match bmc.firmware_version(&creds).await {
                        Ok(Some(version)) => {
                            info!(host = hostname, firmware = %version, "captured bmc firmware version");
                            host.bmc_firmware_version = Some(version);
                        }
                        Ok(None) => {}
                        Err(e) => warn!(host = hostname, error = %e, "bmc firmware version capture failed"),
                    }
                }
            }
            if host.sensor_count() > 0 && host.group_count() > 0 {
                host.relearn_mode = false;
            }
            host.stage_deadline = Some(now + Duration::from_secs(host.audit_interval as u64));
            host.stage = MonitorStage::Delay;
        }

        MonitorStage::Fail => {
            result.failed = true;
            kill_worker(host);
            for group in &mut host.groups {
                group.failed = true;
                group.group_state = GroupState::Failed;
            }
            host.power_on = false;
            if host.audit_interval > 0 {
                host.stage = MonitorStage::Start;
            } else {
                host.stage = MonitorStage::Idle;
            }
        }
    }

    result
}

/// Fetch a fresh password from the secret store just before each worker
/// launch; never cached to disk, and never reused across launches (§6).
async fn credentials(host: &mut Host, secret_store: &Arc<dyn SecretStoreClient>) -> Option<BmcCredentials> {
    let bm_ip = host.bmc.bm_ip.clone()?;
    let bm_user = host.bmc.bm_user.clone()?;
    let bm_password = match secret_store.fetch_password(&host.uuid).await {
        Ok(password) => password,
        Err(e) => {
            warn!(host = %host.hostname, error = %e, "secret store fetch failed");
            return None;
        }
    };
    host.bmc.bm_password = Some(bm_password.clone());
    Some(BmcCredentials { bm_ip, bm_user, bm_password })
}

fn kill_worker(host: &mut Host) {
    if let Some(worker) = host.worker.take() {
        debug!(command = ?worker.command(), "killing bmc worker");
        worker.kill();
    }
}

/// Honored by host-delete and `monitor_soon()`: stop the timer, kill the
/// worker, and fall through to `Delay` on the caller's next tick (§4.1).
pub fn cancel_and_reschedule(host: &mut Host, now: Instant) {
    kill_worker(host);
    host.stage = MonitorStage::Delay;
    host.stage_deadline = Some(now);
}

pub const MAX_SENSOR_TYPE_ERRORS_LIMIT: usize = MAX_SENSOR_TYPE_ERRORS;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bmc::FakeBmcClient;
    use crate::core::host::BmcProvisioning;
    use crate::net::secret_store::FakeSecretStoreClient;

    fn provisioned_host() -> Host {
        let mut host = Host::new("compute-0", "uuid-1");
        host.bmc = BmcProvisioning {
            bm_ip: Some("10.0.0.5".to_string()),
            bm_user: Some("root".to_string()),
            bm_type: Some("ipmi".to_string()),
            bm_password: None,
        };
        host
    }

    fn secret_store_with(password: &str) -> Arc<dyn SecretStoreClient> {
        Arc::new(FakeSecretStoreClient { password: std::sync::Mutex::new(password.to_string()) })
    }

    #[tokio::test]
    async fn disabled_host_drives_offline_without_touching_stage_machinery() {
        let mut host = provisioned_host();
        host.monitor_enabled = false;
        host.sensors.push(crate::core::sensor::Sensor::new(
            "Fan1",
            crate::core::sensor::SensorType::Fan,
            crate::core::sensor::DataType::Analog,
        ));
        let bmc: Arc<dyn BmcClient> = Arc::new(FakeBmcClient::default());
        let secrets = secret_store_with("secret");
        let now = Instant::now();
        tick_host(&mut host, "compute-0", &bmc, &secrets, now).await;
        assert_eq!(host.sensors[0].status, crate::core::sensor::SensorStatus::Offline);
    }

    #[tokio::test]
    async fn first_contact_learns_three_groups_from_samples() {
        let mut host = provisioned_host();
        host.power_on = true;
        let fake = Arc::new(FakeBmcClient::default());
        *fake.samples.lock().unwrap() = vec![
            SensorSample { name: "Fan1".into(), unit: "RPM".into(), status: "ok".into(), value: Some(1800.0), discrete: false, percent: false },
            SensorSample { name: "MB Temp".into(), unit: "degrees".into(), status: "ok".into(), value: Some(40.0), discrete: false, percent: false },
            SensorSample { name: "5V Rail".into(), unit: "Volts".into(), status: "ok".into(), value: Some(5.0), discrete: false, percent: false },
        ];
        let bmc: Arc<dyn BmcClient> = fake;
        let secrets = secret_store_with("secret");
        let now = Instant::now();

        // Idle -> Start -> Delay (power already on) -> Read (spawns sensor read).
        tick_host(&mut host, "compute-0", &bmc, &secrets, now).await;
        assert_eq!(host.stage, MonitorStage::Start);
        tick_host(&mut host, "compute-0", &bmc, &secrets, now).await;
        assert_eq!(host.stage, MonitorStage::Delay);
        host.stage_deadline = Some(now);
        tick_host(&mut host, "compute-0", &bmc, &secrets, now).await;
        assert_eq!(host.stage, MonitorStage::Read);

        // Wait for the worker to finish, then drive Read -> Parse -> Check -> Update -> Handle.
        tokio::time::sleep(Duration::from_millis(5)).await;
        tick_host(&mut host, "compute-0", &bmc, &secrets, now).await; // Read -> Parse
        assert_eq!(host.stage, MonitorStage::Parse);
        tick_host(&mut host, "compute-0", &bmc, &secrets, now).await; // Parse -> Check
        assert_eq!(host.stage, MonitorStage::Check);
        tick_host(&mut host, "compute-0", &bmc, &secrets, now).await; // Check -> Update (model created)
        assert_eq!(host.stage, MonitorStage::Update);
        assert_eq!(host.groups.len(), 3);
        assert_eq!(host.sensors.len(), 3);

        tick_host(&mut host, "compute-0", &bmc, &secrets, now).await; // Update -> Handle
        assert_eq!(host.stage, MonitorStage::Handle);
        tick_host(&mut host, "compute-0", &bmc, &secrets, now).await; // Handle -> Delay (captures firmware)
        assert_eq!(host.stage, MonitorStage::Delay);
        assert_eq!(host.bmc_firmware_version.as_deref(), Some("1.00"));
    }

    #[tokio::test]
    async fn handle_stage_only_captures_firmware_once() {
        let mut host = provisioned_host();
        host.sensors.push(crate::core::sensor::Sensor::new(
            "Fan1",
            crate::core::sensor::SensorType::Fan,
            crate::core::sensor::DataType::Analog,
        ));
        host.groups.push(crate::core::group::Group::new(
            "fans",
            crate::core::catalog::CannedGroup::Fans,
            crate::core::sensor::DataType::Analog,
            10,
        ));
        host.bmc_firmware_version = Some("already-known".to_string());
        host.stage = MonitorStage::Update;
        let bmc: Arc<dyn BmcClient> = Arc::new(FakeBmcClient::default());
        let secrets = secret_store_with("secret");
        let now = Instant::now();

        tick_host(&mut host, "compute-0", &bmc, &secrets, now).await; // Update -> Handle
        assert_eq!(host.stage, MonitorStage::Handle);
        tick_host(&mut host, "compute-0", &bmc, &secrets, now).await; // Handle -> Delay
        assert_eq!(host.bmc_firmware_version.as_deref(), Some("already-known"));
    }
}
