use std::fmt;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

/// Canonical record of one issued credential.
///
/// `issuer` and `serial` are opaque DER byte strings taken verbatim from the
/// certificate; equality is value equality on all five fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertInfo {
	pub issuer: Vec<u8>,
	pub serial: Vec<u8>,
	pub cert_url: String,
	pub key_url: String,
	pub not_after: SystemTime,
}

impl Default for CertInfo {
	fn default() -> Self {
		Self {
			issuer: Vec::new(),
			serial: Vec::new(),
			cert_url: String::new(),
			key_url: String::new(),
			not_after: SystemTime::UNIX_EPOCH,
		}
	}
}

impl fmt::Display for CertInfo {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(
			f,
			"{{certURL = {}, keyURL = {}, notAfter = {:?}}}",
			self.cert_url, self.key_url, self.not_after
		)
	}
}

/// Unique identity of a running workload instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct InstanceIdent {
	pub service_id: String,
	pub subject_id: String,
	pub instance: u64,
}

impl fmt::Display for InstanceIdent {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}:{}:{}", self.service_id, self.subject_id, self.instance)
	}
}

/// A single permission entry granted to an instance for one functional
/// service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermKeyValue {
	pub key: String,
	pub value: String,
}

impl PermKeyValue {
	pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
		Self {
			key: key.into(),
			value: value.into(),
		}
	}
}

/// Permissions an instance holds towards one functional service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionalServicePermissions {
	pub name: String,
	pub permissions: Vec<PermKeyValue>,
}

/// Provisioning state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum NodeStatus {
	#[default]
	Unprovisioned,
	Provisioned,
	Paused,
}

impl fmt::Display for NodeStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			NodeStatus::Unprovisioned => "unprovisioned",
			NodeStatus::Provisioned => "provisioned",
			NodeStatus::Paused => "paused",
		};
		f.write_str(s)
	}
}

/// Free-form attribute attached to a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct NodeAttribute {
	pub name: String,
	pub value: String,
}

/// Storage partition available on a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PartitionInfo {
	pub name: String,
	pub types: Vec<String>,
	pub path: String,
	pub total_size: u64,
}

/// One CPU package of a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CpuInfo {
	pub model_name: String,
	pub num_cores: u64,
	pub max_dmips: u64,
}

/// Identity, type and capacity record of one node in the fleet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfo {
	pub id: String,
	pub name: String,
	pub node_type: String,
	pub status: NodeStatus,
	pub os_type: String,
	pub attrs: Vec<NodeAttribute>,
	pub partitions: Vec<PartitionInfo>,
	pub cpus: Vec<CpuInfo>,
	pub total_ram: u64,
}
