//! Core domain: the process-wide `CoreState` and its component modules
//! (§5: "owned by one `CoreState` value constructed at startup and threaded
//! explicitly ... there is no global singleton").

pub mod catalog;
pub mod checksum;
pub mod effects;
pub mod engine;
pub mod error;
pub mod fsm;
pub mod group;
pub mod host;
pub mod ids;
pub mod lifecycle;
pub mod queue;
pub mod registry;
pub mod sensor;
pub mod severity;
pub mod timer;

use std::sync::Arc;
use std::time::Instant;

use tracing::warn;

use crate::bmc::BmcClient;
use crate::core::effects::Effect;
use crate::core::host::Host;
use crate::core::queue::{tick_request, HttpMethod, WorkQueue, WorkRequest};
use crate::core::registry::Registry;
use crate::net::http_client::{replace_patch, InventoryClient};
use crate::net::secret_store::SecretStoreClient;

/// All process-wide mutable state, owned by `main` and threaded explicitly
/// into the FSM driver and the net transport tasks.
pub struct CoreState {
    pub registry: Registry,
    pub bmc: Arc<dyn BmcClient>,
    pub secret_store: Arc<dyn SecretStoreClient>,
    pub inventory: Arc<InventoryClient>,
}

impl CoreState {
    pub fn new(bmc: Arc<dyn BmcClient>, secret_store: Arc<dyn SecretStoreClient>, inventory: Arc<InventoryClient>) -> Self {
        Self { registry: Registry::new(), bmc, secret_store, inventory }
    }

    /// One coarse tick of the cooperative event loop (§5): walk every host,
    /// advance its FSM by one stage, collect the effects produced, mirror
    /// sensor/group signals to inventory via the C6 queue, and step every
    /// host's queue once (§4.6 "driven exclusively through the C6 queue").
    pub async fn tick(&mut self, now: Instant) -> Vec<(String, Effect)> {
        let mut all_effects = Vec::new();
        let hostnames = self.registry.hostnames();

        for hostname in hostnames {
            let delete_pending = self.registry.get(&hostname).is_some_and(|h| h.delete_pending);
            if delete_pending {
                self.registry.tick_delete(&hostname, now);
                continue;
            }

            let Some(host) = self.registry.get_mut(&hostname) else { continue };
            let outcome = fsm::tick_host(host, &hostname, &self.bmc, &self.secret_store, now).await;
            if outcome.failed {
                warn!(host = %hostname, "monitor FSM entered Fail stage this tick");
            }
            enqueue_inventory_sync(host, &outcome.effects);
            drive_queue(&mut host.queue, &self.inventory, now);
            all_effects.extend(outcome.effects.into_iter().map(|e| (hostname.clone(), e)));
        }

        all_effects
    }
}

/// Mirror `SensorSignal`/`GroupSignal` effects to inventory as best-effort
/// status PATCHes (§4.5 "C5 emits events to C6"). These are not part of the
/// caller-visible alarm/log path (the maintenance-agent UDP send and local
/// log line already cover that), so they are enqueued `noncritical`: lost on
/// overload rather than competing with operator-initiated PATCHes.
fn enqueue_inventory_sync(host: &mut Host, effects: &[Effect]) {
    for effect in effects {
        let request = match effect {
            Effect::SensorSignal { sensor, .. } => {
                host.sensors.iter().find(|s| &s.sensor_name == sensor).map(|sensor| {
                    let payload = replace_patch("status", format!("{:?}", sensor.status).to_ascii_lowercase());
                    WorkRequest::new(0, HttpMethod::Patch, format!("/v1/isensors/{}", sensor.uuid), payload)
                })
            }
            Effect::GroupSignal { group, .. } => host.groups.get(group.0).map(|group| {
                let payload = replace_patch("alarmed", group.alarmed);
                WorkRequest::new(0, HttpMethod::Patch, format!("/v1/isensorgroups/{}", group.uuid), payload)
            }),
            _ => None,
        };
        if let Some(mut request) = request {
            request.noncritical = true;
            let _ = host.queue.enqueue(request);
        }
    }
}

/// Step every in-flight request in one host's work queue exactly once,
/// bridging `tick_request`'s synchronous closures to the real HTTP client.
fn drive_queue(queue: &mut WorkQueue, inventory: &InventoryClient, now: Instant) {
    let mut i = 0;
    while i < queue.work.len() {
        let sequence = queue.work[i].sequence;
        let method = queue.work[i].method;
        let path = queue.work[i].path.clone();
        let payload = queue.work[i].payload.clone();
        let done = tick_request(
            &mut queue.work[i],
            now,
            || inventory.transmit(sequence, method, &path, payload),
            || inventory.poll(sequence),
        );
        if let Some(entry) = done {
            queue.work.remove(i);
            queue.push_done(entry);
        } else {
            i += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bmc::FakeBmcClient;
    use crate::core::effects::{AlarmSignal, Effect};
    use crate::core::host::HostAddRequest;
    use crate::core::sensor::{DataType, Sensor, SensorType};
    use crate::core::severity::{Reason, Severity};

    #[test]
    fn sensor_signal_enqueues_noncritical_status_patch() {
        let mut host = Host::new("compute-0", "host-uuid-0");
        host.sensors.push(Sensor::new("Fan1", SensorType::Fan, DataType::Analog));
        let sensor_uuid = host.sensors[0].uuid.clone();

        let effects = vec![Effect::SensorSignal {
            sensor: "Fan1".to_string(),
            signal: AlarmSignal::Alarm,
            assert: true,
            severity: Some(Severity::Major),
            reason: Reason::OutOfTolerance,
        }];
        enqueue_inventory_sync(&mut host, &effects);

        assert_eq!(host.queue.work.len(), 1);
        let request = &host.queue.work[0];
        assert!(request.noncritical);
        assert_eq!(request.path, format!("/v1/isensors/{sensor_uuid}"));
    }

    #[test]
    fn group_signal_enqueues_noncritical_alarmed_patch() {
        use crate::core::catalog::CannedGroup;
        use crate::core::group::Group;
        use crate::core::ids::GroupId;

        let mut host = Host::new("compute-0", "host-uuid-0");
        host.groups.push(Group::new("fans", CannedGroup::Fans, DataType::Analog, 10));
        let group_uuid = host.groups[0].uuid.clone();

        let effects = vec![Effect::GroupSignal { group: GroupId(0), assert: true, reason: Reason::OutOfTolerance }];
        enqueue_inventory_sync(&mut host, &effects);

        assert_eq!(host.queue.work.len(), 1);
        let request = &host.queue.work[0];
        assert!(request.noncritical);
        assert_eq!(request.path, format!("/v1/isensorgroups/{group_uuid}"));
    }

    #[tokio::test]
    async fn drive_queue_moves_transmitted_request_to_receive_wait() {
        let mut queue = WorkQueue::new();
        queue.enqueue(WorkRequest::new(0, crate::core::queue::HttpMethod::Patch, "/v1/isensors/x", serde_json::json!({}))).unwrap();
        let inventory = InventoryClient::new("http://127.0.0.1:0");
        let now = Instant::now();

        drive_queue(&mut queue, &inventory, now);

        assert_eq!(queue.work.len(), 1);
        assert_eq!(queue.work[0].state, crate::core::queue::RequestState::ReceiveWait);
    }

    #[tokio::test]
    async fn tick_advances_every_provisioned_host_fsm() {
        use crate::net::secret_store::FakeSecretStoreClient;
        let bmc: Arc<dyn BmcClient> = Arc::new(FakeBmcClient::default());
        let secret_store: Arc<dyn SecretStoreClient> = Arc::new(FakeSecretStoreClient {
            password: std::sync::Mutex::new("secret".to_string()),
        });
        let inventory = Arc::new(InventoryClient::new("http://localhost:6385"));
        let mut state = CoreState::new(bmc, secret_store, inventory);
        state.registry.add(HostAddRequest {
            hostname: "compute-0".to_string(),
            uuid: "uuid-0".to_string(),
            bm_ip: Some("10.0.0.5".to_string()),
            bm_user: Some("root".to_string()),
            bm_type: Some("ipmi".to_string()),
        });

        let now = Instant::now();
        state.tick(now).await;
        assert_eq!(state.registry.get("compute-0").unwrap().stage, crate::core::fsm::MonitorStage::Start);
    }
}
