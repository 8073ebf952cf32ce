//! Authoritative in-memory cache of node inventory, mirrored to persistent
//! storage.

use edge_core::prelude::*;

use crate::errors::{Error, ErrorKind, Result};
use crate::types::{NodeInfo, NodeStatus};

/// Persistent `(node_id -> NodeInfo)` mapping.
pub trait NodeInfoStorage: Send + Sync {
	fn set_node_info(&self, info: &NodeInfo) -> Result<()>;
	fn get_node_info(&self, node_id: &str) -> Result<NodeInfo>;
	fn get_all_node_ids(&self) -> Result<Vec<String>>;
	fn remove_node_info(&self, node_id: &str) -> Result<()>;
}

/// JSON-file backed node info storage, one file for the whole fleet view.
pub struct FileNodeStorage {
	path: std::path::PathBuf,
	nodes: Mutex<Vec<NodeInfo>>,
}

impl FileNodeStorage {
	pub fn new(path: impl Into<std::path::PathBuf>) -> Result<Self> {
		let path = path.into();

		let nodes = if path.exists() {
			let data = std::fs::read_to_string(&path)?;
			serde_json::from_str(&data)
				.map_err(|e| Error::wrap(ErrorKind::Failed, "node storage parsing", e))?
		} else {
			Vec::new()
		};

		Ok(Self {
			path,
			nodes: Mutex::new(nodes),
		})
	}

	fn store(&self, nodes: &[NodeInfo]) -> Result<()> {
		let data = serde_json::to_string_pretty(nodes)
			.map_err(|e| Error::wrap(ErrorKind::Failed, "node storage encoding", e))?;

		std::fs::write(&self.path, data)?;

		Ok(())
	}
}

impl NodeInfoStorage for FileNodeStorage {
	fn set_node_info(&self, info: &NodeInfo) -> Result<()> {
		let mut nodes = self.nodes.lock().unwrap();

		match nodes.iter_mut().find(|node| node.id == info.id) {
			Some(node) => *node = info.clone(),
			None => nodes.push(info.clone()),
		}

		self.store(&nodes)
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

		self.store(&nodes)
	}
}

/// Observes node inventory changes.
pub trait NodeInfoListener: Send + Sync {
	fn on_node_info_change(&self, info: &NodeInfo);
	fn on_node_removed(&self, node_id: &str);
}

struct ManagerState {
	cache: Vec<NodeInfo>,
	listener: Option<Arc<dyn NodeInfoListener>>,
}

/// Node manager: every read is served from the cache, every write goes to
/// storage first. Unprovisioned nodes are kept in the cache but removed
/// from storage.
pub struct NodeManager {
	storage: Arc<dyn NodeInfoStorage>,
	state: Mutex<ManagerState>,
}

impl NodeManager {
	/// Builds the cache mirror by reading every node record from storage.
	pub fn new(storage: Arc<dyn NodeInfoStorage>) -> Result<Self> {
		let mut cache = Vec::new();

		for node_id in storage.get_all_node_ids()? {
			cache.push(storage.get_node_info(&node_id)?);
		}

		Ok(Self {
			storage,
			state: Mutex::new(ManagerState {
				cache,
				listener: None,
			}),
		})
	}

	/// Replaces the whole record of a node. Setting an unprovisioned status
	/// removes the node from storage (a missing record is fine) while the
	/// cache keeps the last known state.
	pub fn set_node_info(&self, info: &NodeInfo) -> Result<()> {
		let mut state = self.state.lock().unwrap();

		debug!("set node info: id = {}, status = {}", info.id, info.status);

		if info.status == NodeStatus::Unprovisioned {
			match self.storage.remove_node_info(&info.id) {
				Ok(()) => {},
				Err(e) if e.is(ErrorKind::NotFound) => {},
				Err(e) => return Err(e),
			}
		} else {
			self.storage.set_node_info(info)?;
		}

		Self::update_cache(&mut state, info);

		Ok(())
	}

	/// Updates only the status of a node. An unknown id produces a blank
	/// record carrying just id and status; callers wanting full records must
	/// use [`NodeManager::set_node_info`].
	pub fn set_node_status(&self, node_id: &str, status: NodeStatus) -> Result<()> {
		let mut info = self.get_node_info(node_id).unwrap_or_default();

		info.id = node_id.to_string();
		info.status = status;

		self.set_node_info(&info)
	}

	pub fn get_node_info(&self, node_id: &str) -> Result<NodeInfo> {
		let state = self.state.lock().unwrap();

		state
			.cache
			.iter()
			.find(|node| node.id == node_id)
			.cloned()
			.ok_or_else(|| Error::not_found(format!("node {node_id} is unknown")))
	}

	pub fn get_all_node_ids(&self) -> Vec<String> {
		let state = self.state.lock().unwrap();

		state.cache.iter().map(|node| node.id.clone()).collect()
	}

	/// Removes a node from storage and cache. The cache mirrors storage
	/// completely, so an uncached id is simply `NotFound`.
	pub fn remove_node_info(&self, node_id: &str) -> Result<()> {
		let mut state = self.state.lock().unwrap();

		let position = state.cache.iter().position(|node| node.id == node_id);

		let Some(position) = position else {
			return Err(Error::not_found(format!("node {node_id} is unknown")));
		};

		self.storage.remove_node_info(node_id)?;
		state.cache.remove(position);

		if let Some(listener) = &state.listener {
			listener.on_node_removed(node_id);
		}

		Ok(())
	}

	/// Registers the single inventory listener, replacing any previous one.
	pub fn subscribe_node_info_change(&self, listener: Arc<dyn NodeInfoListener>) {
		self.state.lock().unwrap().listener = Some(listener);
	}

	fn update_cache(state: &mut ManagerState, info: &NodeInfo) {
		let changed = match state.cache.iter_mut().find(|node| node.id == info.id) {
			Some(cached) => {
				let changed = cached != info;
				*cached = info.clone();
				changed
			},
			None => {
				state.cache.push(info.clone());
				true
			},
		};

		if changed {
			if let Some(listener) = &state.listener {
				listener.on_node_info_change(info);
			}
		}
	}
}

#[cfg(test)]
#[path = "nodemanager_tests.rs"]
mod tests;
