//! Configuration surface for a DCP engine. Deserialized from YAML or JSON
//! with `serde`, in the `deny_unknown_fields` + `rename_all = "camelCase"`
//! style used throughout this crate's config structs.

use std::io;

use crate::flow_control::FlowControlKind;

pub fn from_str(mut txt: &str) -> io::Result<DcpConfig> {
    txt = txt.trim_start();
    if txt.starts_with('{') {
        serde_json::from_str(txt).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    } else {
        serde_yaml::from_str(txt).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct DcpConfig {
    /// Byte budget against which replication throttling is evaluated.
    pub max_size: usize,
    /// Percentage of `max_size` at which inbound replication is throttled.
    pub replication_throttle_threshold: u8,
    pub dcp_idle_timeout_secs: u64,
    #[serde(default = "default_flow_control_policy")]
    pub dcp_flow_control_policy: String,
    #[serde(default)]
    pub disk_backfill_queue: bool,
    #[serde(default = "default_ephemeral_full_policy")]
    pub ephemeral_full_policy: EphemeralFullPolicy,
    /// The connection-manager tick interval that `set_noop_interval` must divide.
    pub connection_manager_interval_secs: u64,
    pub admin: Option<AdminConfig>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EphemeralFullPolicy {
    AutoDelete,
    FailNewData,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct AdminConfig {
    pub addr: Option<std::net::SocketAddr>,
    pub metrics_interval_secs: Option<u64>,
}

fn default_flow_control_policy() -> String {
    "static".into()
}

fn default_ephemeral_full_policy() -> EphemeralFullPolicy {
    EphemeralFullPolicy::AutoDelete
}

impl DcpConfig {
    pub fn flow_control_kind(&self) -> Result<FlowControlKind, String> {
        self.dcp_flow_control_policy.parse()
    }

    pub fn replication_throttle_bytes(&self) -> usize {
        (self.max_size as u64 * self.replication_throttle_threshold as u64 / 100) as usize
    }
}
