//! In-memory storage backends for tests.

use std::sync::Mutex;

use crate::certhandler::CertStorage;
use crate::errors::{Error, Result};
use crate::nodemanager::NodeInfoStorage;
use crate::types::{CertInfo, NodeInfo};

/// In-memory `(cert_type -> CertInfo[])` storage.
#[derive(Default)]
pub struct MemoryCertStorage {
	entries: Mutex<Vec<(String, CertInfo)>>,
}

impl MemoryCertStorage {
	pub fn new() -> Self {
		Self::default()
	}

	/// Total number of records, across all types.
	pub fn len(&self) -> usize {
		self.entries.lock().unwrap().len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

impl CertStorage for MemoryCertStorage {
	fn add_cert_info(&self, cert_type: &str, info: &CertInfo) -> Result<()> {
		self
			.entries
			.lock()
			.unwrap()
			.push((cert_type.to_string(), info.clone()));

		Ok(())
	}

	fn get_cert_info(&self, issuer: &[u8], serial: &[u8]) -> Result<CertInfo> {
		self
			.entries
			.lock()
			.unwrap()
			.iter()
			.find(|(_, info)| info.issuer == issuer && info.serial == serial)
			.map(|(_, info)| info.clone())
			.ok_or_else(|| Error::not_found("no certificate with this issuer and serial"))
	}

	fn get_certs_info(&self, cert_type: &str) -> Result<Vec<CertInfo>> {
		Ok(
			self
				.entries
				.lock()
				.unwrap()
				.iter()
				.filter(|(entry_type, _)| entry_type == cert_type)
				.map(|(_, info)| info.clone())
				.collect(),
		)
	}

	fn remove_cert_info(&self, cert_type: &str, cert_url: &str) -> Result<()> {
		let mut entries = self.entries.lock().unwrap();

		let position = entries
			.iter()
			.position(|(entry_type, info)| entry_type == cert_type && info.cert_url == cert_url)
			.ok_or_else(|| Error::not_found(format!("no certificate with URL {cert_url}")))?;

		entries.remove(position);

		Ok(())
	}

	fn remove_all_certs_info(&self, cert_type: &str) -> Result<()> {
		self
			.entries
			.lock()
			.unwrap()
			.retain(|(entry_type, _)| entry_type != cert_type);

		Ok(())
	}
}

/// In-memory `(node_id -> NodeInfo)` storage.
#[derive(Default)]
pub struct MemoryNodeStorage {
	nodes: Mutex<Vec<NodeInfo>>,
}

impl MemoryNodeStorage {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_nodes(nodes: Vec<NodeInfo>) -> Self {
		Self {
			nodes: Mutex::new(nodes),
		}
	}
}

impl NodeInfoStorage for MemoryNodeStorage {
	fn set_node_info(&self, info: &NodeInfo) -> Result<()> {
		let mut nodes = self.nodes.lock().unwrap();

		match nodes.iter_mut().find(|node| node.id == info.id) {
			Some(node) => *node = info.clone(),
			None => nodes.push(info.clone()),
		}

		Ok(())
	}

	fn get_node_info(&self, node_id: &str) -> Result<NodeInfo> {
		self
			.nodes
			.lock()
			.unwrap()
			.iter()
			.find(|node| node.id == node_id)
			.cloned()
			.ok_or_else(|| Error::not_found(format!("node {node_id} is unknown")))
	}

	fn get_all_node_ids(&self) -> Result<Vec<String>> {
		Ok(
			self
				.nodes
				.lock()
				.unwrap()
				.iter()
				.map(|node| node.id.clone())
				.collect(),
		)
	}

	fn remove_node_info(&self, node_id: &str) -> Result<()> {
		let mut nodes = self.nodes.lock().unwrap();

		let position = nodes
			.iter()
			.position(|node| node.id == node_id)
			.ok_or_else(|| Error::not_found(format!("node {node_id} is unknown")))?;

		nodes.remove(position);

		Ok(())
	}
}
