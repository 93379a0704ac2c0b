//! Shells out to `ipmitool`, passing credentials via a temporary password
//! file (`-f <path>`) and redacting that argument from any user-visible error
//! (§6). Command construction follows the teacher's `system/executor.rs`
//! pattern of building a `std::process::Command` then running it through
//! `tokio::process::Command::from`.

use async_trait::async_trait;
use tracing::{debug, trace, warn};

use crate::bmc::envelope::{SensorSample, POWER_ON_SUBSTRING};
use crate::bmc::parser::parse_sdr_csv;
use crate::bmc::{BmcClient, BmcCredentials};
use crate::core::error::{CoreError, CoreResult};

pub struct IpmitoolClient;

impl IpmitoolClient {
    pub fn new() -> Self {
        Self
    }

    async fn run(&self, creds: &BmcCredentials, args: &[&str]) -> CoreResult<String> {
        let password_file = write_password_file(&creds.bm_password).await?;

        let mut cmd = std::process::Command::new("ipmitool");
        cmd.args(["-I", "lanplus", "-H", &creds.bm_ip, "-U", &creds.bm_user, "-f"]);
        cmd.arg(password_file.path());
        cmd.args(args);

        trace!(host = %creds.bm_ip, ?args, "executing ipmitool");

        let output = tokio::process::Command::from(cmd)
            .output()
            .await
            .map_err(|e| CoreError::WorkerFailed(format!("failed to spawn ipmitool: {e}")))?;

        if !output.status.success() {
            let stderr = redact_password_file(&String::from_utf8_lossy(&output.stderr), &password_file);
            warn!(host = %creds.bm_ip, %stderr, "ipmitool exited non-zero");
            return Err(CoreError::WorkerFailed(stderr));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

#[async_trait]
impl BmcClient for IpmitoolClient {
    async fn power_status(&self, creds: &BmcCredentials) -> CoreResult<bool> {
        let stdout = self.run(creds, &["power", "status"]).await?;
        Ok(stdout.contains(POWER_ON_SUBSTRING) || stdout.to_ascii_lowercase().contains("power is on"))
    }

    async fn read_sensors(&self, creds: &BmcCredentials) -> CoreResult<Vec<SensorSample>> {
        let csv = self.run(creds, &["-c", "sdr", "list", "full"]).await?;
        let samples = parse_sdr_csv(&csv);
        debug!(host = %creds.bm_ip, count = samples.len(), "parsed sensor samples");
        Ok(samples)
    }

    async fn firmware_version(&self, creds: &BmcCredentials) -> CoreResult<Option<String>> {
        let stdout = self.run(creds, &["mc", "info"]).await?;
        Ok(parse_firmware_revision(&stdout))
    }
}

fn parse_firmware_revision(mc_info: &str) -> Option<String> {
    mc_info
        .lines()
        .find(|line| line.trim_start().starts_with("Firmware Revision"))
        .and_then(|line| line.split(':').nth(1))
        .map(|v| v.trim().to_string())
}

/// Writes the BMC password to a mode-0600 temp file for `ipmitool -f <path>`.
async fn write_password_file(password: &str) -> CoreResult<tempfile_shim::NamedTempFile> {
    tempfile_shim::NamedTempFile::with_contents(password)
        .await
        .map_err(|e| CoreError::WorkerFailed(format!("failed to stage bmc password file: {e}")))
}

fn redact_password_file(text: &str, file: &tempfile_shim::NamedTempFile) -> String {
    let needle = format!("-f {}", file.path().display());
    text.replace(&needle, "-f <redacted>")
}

/// Minimal temp-file helper: the teacher's dependency stack has no `tempfile`
/// crate, and the only requirement here is a short-lived, process-unique,
/// 0600 file under the worker scratch directory (§6) that is removed on drop.
mod tempfile_shim {
    use std::io;
    use std::path::{Path, PathBuf};

    pub struct NamedTempFile {
        path: PathBuf,
    }

    impl NamedTempFile {
        pub async fn with_contents(contents: &str) -> io::Result<Self> {
            let dir = std::env::temp_dir().join("hwmon-agent");
            tokio::fs::create_dir_all(&dir).await?;
            let path = dir.join(format!("bmc-{}.pw", uuid::Uuid::new_v4()));
            tokio::fs::write(&path, contents).await?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600)).await?;
            }
            Ok(Self { path })
        }

        pub fn path(&self) -> &Path {
            &self.path
        }
    }

    impl Drop for NamedTempFile {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn firmware_revision_line_is_extracted() {
        let mc_info = "Device ID : 32\nFirmware Revision : 2.10\nManufacturer ID : 10876\n";
        assert_eq!(parse_firmware_revision(mc_info), Some("2.10".to_string()));
    }

    #[test]
    fn missing_firmware_line_yields_none() {
        assert_eq!(parse_firmware_revision("Device ID : 32\n"), None);
    }
}
