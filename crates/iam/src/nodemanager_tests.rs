use std::sync::{Arc, Mutex};

use super::*;
use crate::ErrorKind;
use crate::test_helpers::MemoryNodeStorage;
use crate::types::{NodeAttribute, NodeInfo, NodeStatus};

#[derive(Default)]
struct RecordingListener {
	changed: Mutex<Vec<NodeInfo>>,
	removed: Mutex<Vec<String>>,
}

impl NodeInfoListener for Arc<RecordingListener> {
	fn on_node_info_change(&self, info: &NodeInfo) {
		self.changed.lock().unwrap().push(info.clone());
	}

	fn on_node_removed(&self, node_id: &str) {
		self.removed.lock().unwrap().push(node_id.to_string());
	}
}

fn node(id: &str, status: NodeStatus) -> NodeInfo {
	NodeInfo {
		id: id.to_string(),
		name: format!("{id}-name"),
		node_type: "main".to_string(),
		status,
		os_type: "linux".to_string(),
		attrs: vec![NodeAttribute {
			name: "MainNode".to_string(),
			value: String::new(),
		}],
		partitions: vec![],
		cpus: vec![],
		total_ram: 1024,
	}
}

fn manager_with(
	nodes: Vec<NodeInfo>,
) -> (NodeManager, Arc<MemoryNodeStorage>, Arc<RecordingListener>) {
	let storage = Arc::new(MemoryNodeStorage::with_nodes(nodes));
	let manager = NodeManager::new(storage.clone()).unwrap();

	let listener = Arc::new(RecordingListener::default());
	manager.subscribe_node_info_change(Arc::new(listener.clone()));

	(manager, storage, listener)
}

#[test]
fn cache_mirrors_storage_at_startup() {
	let (manager, _, _) = manager_with(vec![
		node("node0", NodeStatus::Provisioned),
		node("node1", NodeStatus::Paused),
	]);

	assert_eq!(manager.get_all_node_ids(), vec!["node0", "node1"]);
	assert_eq!(
		manager.get_node_info("node1").unwrap().status,
		NodeStatus::Paused
	);
}

#[test]
fn set_node_info_persists_and_notifies() {
	let (manager, storage, listener) = manager_with(vec![]);

	let info = node("node0", NodeStatus::Provisioned);
	manager.set_node_info(&info).unwrap();

	assert_eq!(storage.get_node_info("node0").unwrap(), info);
	assert_eq!(*listener.changed.lock().unwrap(), vec![info]);
}

#[test]
fn unchanged_node_info_does_not_notify() {
	let (manager, _, listener) = manager_with(vec![]);

	let info = node("node0", NodeStatus::Provisioned);
	manager.set_node_info(&info).unwrap();
	manager.set_node_info(&info).unwrap();

	assert_eq!(listener.changed.lock().unwrap().len(), 1);
}

#[test]
fn unprovisioned_node_is_dropped_from_storage_but_cached() {
	let (manager, storage, _) = manager_with(vec![node("node0", NodeStatus::Provisioned)]);

	let mut info = node("node0", NodeStatus::Provisioned);
	info.status = NodeStatus::Unprovisioned;

	manager.set_node_info(&info).unwrap();

	assert_eq!(
		storage.get_node_info("node0").unwrap_err().kind(),
		ErrorKind::NotFound
	);
	assert_eq!(
		manager.get_node_info("node0").unwrap().status,
		NodeStatus::Unprovisioned
	);
}

#[test]
fn unprovisioning_an_unknown_node_is_fine() {
	let (manager, _, _) = manager_with(vec![]);

	manager
		.set_node_info(&node("ghost", NodeStatus::Unprovisioned))
		.unwrap();

	assert_eq!(manager.get_all_node_ids(), vec!["ghost"]);
}

#[test]
fn set_node_status_updates_known_nodes() {
	let (manager, storage, _) = manager_with(vec![node("node0", NodeStatus::Provisioned)]);

	manager.set_node_status("node0", NodeStatus::Paused).unwrap();

	let stored = storage.get_node_info("node0").unwrap();
	assert_eq!(stored.status, NodeStatus::Paused);
	// The rest of the record is untouched.
	assert_eq!(stored.name, "node0-name");
}

#[test]
fn set_node_status_on_unknown_id_writes_a_blank_record() {
	let (manager, storage, _) = manager_with(vec![]);

	manager
		.set_node_status("fresh", NodeStatus::Provisioned)
		.unwrap();

	let stored = storage.get_node_info("fresh").unwrap();
	assert_eq!(stored.id, "fresh");
	assert_eq!(stored.status, NodeStatus::Provisioned);
	assert!(stored.attrs.is_empty());
}

#[test]
fn remove_node_info_clears_cache_storage_and_notifies() {
	let (manager, storage, listener) = manager_with(vec![node("node0", NodeStatus::Provisioned)]);

	manager.remove_node_info("node0").unwrap();

	assert!(manager.get_all_node_ids().is_empty());
	assert_eq!(
		storage.get_node_info("node0").unwrap_err().kind(),
		ErrorKind::NotFound
	);
	assert_eq!(*listener.removed.lock().unwrap(), vec!["node0"]);

	let err = manager.remove_node_info("node0").unwrap_err();
	assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn get_node_info_for_unknown_id_is_not_found() {
	let (manager, _, _) = manager_with(vec![]);

	let err = manager.get_node_info("nope").unwrap_err();
	assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn file_storage_round_trips_the_fleet_view() {
	let dir = tempfile::tempdir().unwrap();
	let path = dir.path().join("nodes.json");

	{
		let storage = FileNodeStorage::new(&path).unwrap();
		storage.set_node_info(&node("node0", NodeStatus::Provisioned)).unwrap();
		storage.set_node_info(&node("node1", NodeStatus::Paused)).unwrap();
		storage.remove_node_info("node0").unwrap();
	}

	let storage = Arc::new(FileNodeStorage::new(&path).unwrap());
	assert_eq!(storage.get_all_node_ids().unwrap(), vec!["node1"]);

	// The manager builds its mirror from the reloaded file.
	let manager = NodeManager::new(storage).unwrap();
	assert_eq!(
		manager.get_node_info("node1").unwrap().status,
		NodeStatus::Paused
	);
}
