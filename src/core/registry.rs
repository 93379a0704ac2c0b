//! Host Registry (C7, §4.7): hostname-keyed store with secondary uuid lookup,
//! add/modify/delete semantics, and deprovision-on-BMC-change.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::core::error::{CoreError, CoreResult};
use crate::core::fsm::cancel_and_reschedule;
use crate::core::host::{BmcProvisioning, Host, HostAddRequest, THREAD_POST_KILL_WAIT_SECS};

const MAX_DELETE_KILL_RETRIES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteStage {
    Start,
    Wait,
    Done,
}

pub struct DeleteProgress {
    pub stage: DeleteStage,
    pub retries: u32,
    pub wait_until: Option<Instant>,
}

pub struct Registry {
    hosts: HashMap<String, Host>,
    uuid_to_hostname: HashMap<String, String>,
    deletes: HashMap<String, DeleteProgress>,
}

/// Outcome of `add()`, distinguishing the caller-visible `RETRY` case from a
/// hard error (§4.7: "Add-on-existing returns RETRY").
pub enum AddOutcome {
    Added,
    Retry,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self { hosts: HashMap::new(), uuid_to_hostname: HashMap::new(), deletes: HashMap::new() }
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    pub fn get(&self, hostname: &str) -> Option<&Host> {
        self.hosts.get(hostname)
    }

    pub fn get_mut(&mut self, hostname: &str) -> Option<&mut Host> {
        self.hosts.get_mut(hostname)
    }

    pub fn by_uuid(&self, uuid: &str) -> Option<&Host> {
        self.uuid_to_hostname.get(uuid).and_then(|h| self.hosts.get(h))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&String, &mut Host)> {
        self.hosts.iter_mut()
    }

    /// Locate the host owning a sensor by the sensor's own uuid (inbound
    /// PATCH requests address sensors this way, not by hostname).
    pub fn find_host_by_sensor_uuid(&self, sensor_uuid: &str) -> Option<&str> {
        self.hosts
            .iter()
            .find(|(_, h)| h.sensors.iter().any(|s| s.uuid == sensor_uuid))
            .map(|(name, _)| name.as_str())
    }

    /// Locate the host owning a group by the group's own uuid.
    pub fn find_host_by_group_uuid(&self, group_uuid: &str) -> Option<&str> {
        self.hosts
            .iter()
            .find(|(_, h)| h.groups.iter().any(|g| g.uuid == group_uuid))
            .map(|(name, _)| name.as_str())
    }

    pub fn hostnames(&self) -> Vec<String> {
        self.hosts.keys().cloned().collect()
    }

    /// §4.7: add-on-existing returns `Retry` so the caller converts to modify.
    pub fn add(&mut self, req: HostAddRequest) -> AddOutcome {
        if self.hosts.contains_key(&req.hostname) {
            return AddOutcome::Retry;
        }

        let mut host = Host::new(req.hostname.clone(), req.uuid.clone());
        host.bmc = BmcProvisioning {
            bm_ip: req.bm_ip,
            bm_user: req.bm_user,
            bm_type: req.bm_type,
            bm_password: None,
        };
        self.uuid_to_hostname.insert(req.uuid, req.hostname.clone());
        self.hosts.insert(req.hostname, host);
        AddOutcome::Added
    }

    /// Modify BMC fields. Any change to `(bm_ip, bm_user, bm_type)` while
    /// currently provisioned deprovisions first, then reprovisions only if
    /// the new tuple validates (§4.7).
    pub fn modify(
        &mut self,
        hostname: &str,
        bm_ip: Option<String>,
        bm_user: Option<String>,
        bm_type: Option<String>,
    ) -> CoreResult<()> {
        let host = self
            .hosts
            .get_mut(hostname)
            .ok_or_else(|| CoreError::LookupMiss { what: "host", key: hostname.to_string() })?;

        let new_bmc = BmcProvisioning { bm_ip, bm_user, bm_type, bm_password: host.bmc.bm_password.clone() };
        let changed = new_bmc.bm_ip != host.bmc.bm_ip
            || new_bmc.bm_user != host.bmc.bm_user
            || new_bmc.bm_type != host.bmc.bm_type;

        if !changed {
            return Ok(());
        }

        if host.bmc.is_provisioned() {
            info!(host = hostname, "bmc tuple changed, deprovisioning before reprovision");
            host.bmc = BmcProvisioning::default();
            host.monitor_enabled = false;
            host.drive_disabled_state();
            cancel_and_reschedule(host, Instant::now());
        }

        host.bmc = new_bmc;
        if host.bmc.is_provisioned() {
            host.monitor_enabled = true;
            info!(host = hostname, "host reprovisioned");
        } else {
            warn!(host = hostname, "new bmc tuple is not valid, host left unprovisioned");
        }

        Ok(())
    }

    /// Begin asynchronous delete (§4.7): `delete_pending=true`, small
    /// `Start -> Wait -> Done` FSM with up to three kill retries.
    pub fn begin_delete(&mut self, hostname: &str) -> CoreResult<()> {
        let host = self
            .hosts
            .get_mut(hostname)
            .ok_or_else(|| CoreError::LookupMiss { what: "host", key: hostname.to_string() })?;
        host.delete_pending = true;
        self.deletes.insert(hostname.to_string(), DeleteProgress { stage: DeleteStage::Start, retries: 0, wait_until: None });
        Ok(())
    }

    /// Advance one host's delete FSM by one step; returns `true` once the
    /// host has actually been removed from the registry.
    pub fn tick_delete(&mut self, hostname: &str, now: Instant) -> bool {
        let Some(host) = self.hosts.get_mut(hostname) else { return true };
        let Some(progress) = self.deletes.get_mut(hostname) else { return false };

        match progress.stage {
            DeleteStage::Start => {
                cancel_and_reschedule(host, now);
                progress.wait_until = Some(now + Duration::from_secs(THREAD_POST_KILL_WAIT_SECS));
                progress.stage = DeleteStage::Wait;
                false
            }
            DeleteStage::Wait => {
                if progress.wait_until.is_some_and(|d| now >= d) {
                    if host.worker.is_some() {
                        if progress.retries < MAX_DELETE_KILL_RETRIES {
                            progress.retries += 1;
                            cancel_and_reschedule(host, now);
                            progress.wait_until = Some(now + Duration::from_secs(THREAD_POST_KILL_WAIT_SECS));
                            false
                        } else {
                            warn!(host = hostname, "delete kill retries exhausted, forcing removal");
                            progress.stage = DeleteStage::Done;
                            false
                        }
                    } else {
                        progress.stage = DeleteStage::Done;
                        false
                    }
                } else {
                    false
                }
            }
            DeleteStage::Done => {
                self.deletes.remove(hostname);
                if let Some(host) = self.hosts.remove(hostname) {
                    self.uuid_to_hostname.remove(&host.uuid);
                }
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(hostname: &str) -> HostAddRequest {
        HostAddRequest {
            hostname: hostname.to_string(),
            uuid: format!("uuid-{hostname}"),
            bm_ip: Some("10.0.0.5".to_string()),
            bm_user: Some("root".to_string()),
            bm_type: Some("ipmi".to_string()),
        }
    }

    #[test]
    fn add_on_existing_host_returns_retry() {
        let mut registry = Registry::new();
        assert!(matches!(registry.add(req("compute-0")), AddOutcome::Added));
        assert!(matches!(registry.add(req("compute-0")), AddOutcome::Retry));
    }

    #[test]
    fn modify_with_changed_bmc_tuple_deprovisions_then_reprovisions() {
        let mut registry = Registry::new();
        registry.add(req("compute-0"));
        registry.modify(
            "compute-0",
            Some("10.0.0.9".to_string()),
            Some("root".to_string()),
            Some("ipmi".to_string()),
        ).unwrap();
        let host = registry.get("compute-0").unwrap();
        assert_eq!(host.bmc.bm_ip.as_deref(), Some("10.0.0.9"));
        assert!(host.monitor_enabled);
    }

    #[test]
    fn modify_to_invalid_tuple_leaves_host_unprovisioned() {
        let mut registry = Registry::new();
        registry.add(req("compute-0"));
        registry.modify("compute-0", None, None, None).unwrap();
        let host = registry.get("compute-0").unwrap();
        assert!(!host.monitor_enabled);
    }

    #[test]
    fn find_host_by_sensor_uuid_locates_owning_host() {
        let mut registry = Registry::new();
        registry.add(req("compute-0"));
        registry.add(req("compute-1"));
        let host = registry.get_mut("compute-1").unwrap();
        host.sensors.push(crate::core::sensor::Sensor::new(
            "Fan1",
            crate::core::sensor::SensorType::Fan,
            crate::core::sensor::DataType::Analog,
        ));
        let sensor_uuid = host.sensors[0].uuid.clone();

        assert_eq!(registry.find_host_by_sensor_uuid(&sensor_uuid), Some("compute-1"));
        assert_eq!(registry.find_host_by_sensor_uuid("no-such-uuid"), None);
    }

    #[test]
    fn find_host_by_group_uuid_locates_owning_host() {
        let mut registry = Registry::new();
        registry.add(req("compute-0"));
        let host = registry.get_mut("compute-0").unwrap();
        host.groups.push(crate::core::group::Group::new(
            "fans",
            crate::core::catalog::CannedGroup::Fans,
            crate::core::sensor::DataType::Analog,
            10,
        ));
        let group_uuid = host.groups[0].uuid.clone();

        assert_eq!(registry.find_host_by_group_uuid(&group_uuid), Some("compute-0"));
        assert_eq!(registry.find_host_by_group_uuid("no-such-uuid"), None);
    }

    #[test]
    fn delete_fsm_removes_host_after_wait_window() {
        let mut registry = Registry::new();
        registry.add(req("compute-0"));
        registry.begin_delete("compute-0").unwrap();

        let now = Instant::now();
        assert!(!registry.tick_delete("compute-0", now)); // Start -> Wait
        assert!(!registry.tick_delete("compute-0", now)); // still waiting
        let later = now + Duration::from_secs(THREAD_POST_KILL_WAIT_SECS + 1);
        assert!(!registry.tick_delete("compute-0", later)); // Wait -> Done
        assert!(registry.tick_delete("compute-0", later)); // Done -> removed
        assert!(registry.get("compute-0").is_none());
    }
}
