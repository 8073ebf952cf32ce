//! Per-instance capability grants bound to unforgeable secrets.
//!
//! Functional sub-servers resolve the secret a workload presents into the
//! workload's identity and its permissions for that server. The table is
//! in-memory only and bounded; all operations are serialised by one lock.

use edge_core::prelude::*;
use uuid::Uuid;

use crate::errors::{Error, Result};
use crate::types::{FunctionalServicePermissions, InstanceIdent, PermKeyValue};

pub const DEFAULT_MAX_INSTANCES: usize = 64;

struct InstancePermissions {
	secret: String,
	instance_ident: InstanceIdent,
	permissions: Vec<FunctionalServicePermissions>,
}

/// Permission handler: registers workload instances and answers permission
/// queries by secret.
pub struct PermHandler {
	instances: Mutex<Vec<InstancePermissions>>,
	max_instances: usize,
}

impl Default for PermHandler {
	fn default() -> Self {
		Self::new(DEFAULT_MAX_INSTANCES)
	}
}

impl PermHandler {
	pub fn new(max_instances: usize) -> Self {
		Self {
			instances: Mutex::new(Vec::new()),
			max_instances,
		}
	}

	/// Registers an instance and returns its secret. Registering the same
	/// ident again returns the existing secret unchanged (first writer
	/// wins). Fails with `NoMemory` when the table is full.
	pub fn register_instance(
		&self,
		instance_ident: &InstanceIdent,
		permissions: Vec<FunctionalServicePermissions>,
	) -> Result<String> {
		let mut instances = self.instances.lock().unwrap();

		debug!("register instance: instance = {instance_ident}");

		if let Some(existing) = instances
			.iter()
			.find(|entry| &entry.instance_ident == instance_ident)
		{
			return Ok(existing.secret.clone());
		}

		if instances.len() >= self.max_instances {
			return Err(Error::no_memory("instance permissions table is full"));
		}

		let secret = loop {
			let candidate = Uuid::new_v4().to_string();
			if !instances.iter().any(|entry| entry.secret == candidate) {
				break candidate;
			}
		};

		instances.push(InstancePermissions {
			secret: secret.clone(),
			instance_ident: instance_ident.clone(),
			permissions,
		});

		Ok(secret)
	}

	/// Removes an instance registration by ident.
	pub fn unregister_instance(&self, instance_ident: &InstanceIdent) -> Result<()> {
		let mut instances = self.instances.lock().unwrap();

		debug!("unregister instance: instance = {instance_ident}");

		let position = instances
			.iter()
			.position(|entry| &entry.instance_ident == instance_ident);

		let Some(position) = position else {
			warn!("unregister instance not registered: instance = {instance_ident}");
			return Err(Error::not_found(format!(
				"instance {instance_ident} is not registered"
			)));
		};

		instances.remove(position);

		Ok(())
	}

	/// Resolves a secret into the owning instance's identity and its
	/// permissions for `functional_service_id`.
	pub fn get_permissions(
		&self,
		secret: &str,
		functional_service_id: &str,
	) -> Result<(InstanceIdent, Vec<PermKeyValue>)> {
		let instances = self.instances.lock().unwrap();

		debug!("get permissions: functional service = {functional_service_id}");

		let entry = instances
			.iter()
			.find(|entry| entry.secret == secret)
			.ok_or_else(|| Error::not_found("unknown secret"))?;

		let permissions = entry
			.permissions
			.iter()
			.find(|perms| perms.name == functional_service_id)
			.ok_or_else(|| {
				Error::not_found(format!(
					"no permissions for functional service {functional_service_id}"
				))
			})?;

		Ok((entry.instance_ident.clone(), permissions.permissions.clone()))
	}
}

#[cfg(test)]
#[path = "permissions_tests.rs"]
mod tests;
