//! `BmcClient` abstraction over the `ipmitool` child process (§9 REDESIGN
//! FLAGS: "keep the child-process invocation but encapsulate it behind a
//! trait/interface ... so tests can inject fakes").

pub mod envelope;
pub mod ipmitool;
pub mod parser;

use async_trait::async_trait;

use crate::bmc::envelope::SensorSample;
use crate::core::error::{CoreError, CoreResult};

#[derive(Debug, Clone)]
pub struct BmcCredentials {
    pub bm_ip: String,
    pub bm_user: String,
    pub bm_password: String,
}

#[async_trait]
pub trait BmcClient: Send + Sync {
    /// Returns `true` if the BMC reports chassis power on.
    async fn power_status(&self, creds: &BmcCredentials) -> CoreResult<bool>;

    /// Returns the parsed sensor samples from one SDR read.
    async fn read_sensors(&self, creds: &BmcCredentials) -> CoreResult<Vec<SensorSample>>;

    /// Firmware version string, read once per host after first successful contact.
    async fn firmware_version(&self, creds: &BmcCredentials) -> CoreResult<Option<String>>;
}

/// A fake `BmcClient` for FSM/engine unit tests, grounded in the same
/// inject-a-fake seam the teacher's `HardwareMonitor` trait exists for.
#[derive(Default)]
pub struct FakeBmcClient {
    pub power_on: std::sync::atomic::AtomicBool,
    pub samples: std::sync::Mutex<Vec<SensorSample>>,
    pub fail_next: std::sync::atomic::AtomicBool,
}

#[async_trait]
impl BmcClient for FakeBmcClient {
    async fn power_status(&self, _creds: &BmcCredentials) -> CoreResult<bool> {
        if self.fail_next.swap(false, std::sync::atomic::Ordering::SeqCst) {
            return Err(CoreError::WorkerFailed("fake worker failure".into()));
        }
        Ok(self.power_on.load(std::sync::atomic::Ordering::SeqCst))
    }

    async fn read_sensors(&self, _creds: &BmcCredentials) -> CoreResult<Vec<SensorSample>> {
        if self.fail_next.swap(false, std::sync::atomic::Ordering::SeqCst) {
            return Err(CoreError::WorkerFailed("fake worker failure".into()));
        }
        Ok(self.samples.lock().expect("fake bmc client lock poisoned").clone())
    }

    async fn firmware_version(&self, _creds: &BmcCredentials) -> CoreResult<Option<String>> {
        Ok(Some("1.00".to_string()))
    }
}
