//! Provisioning orchestration across all registered certificate types.

use edge_core::prelude::*;

use crate::certhandler::{CertHandler, CertReceiver};
use crate::errors::Result;
use crate::types::CertInfo;

/// Platform hooks invoked at the provisioning milestones.
pub trait ProvisionCallback: Send + Sync {
	fn on_start_provisioning(&self, password: &str) -> Result<()>;
	fn on_finish_provisioning(&self, password: &str) -> Result<()>;
	fn on_deprovision(&self, password: &str) -> Result<()>;
	fn on_encrypt_disk(&self, password: &str) -> Result<()>;
}

/// Thin orchestrator over the certificate handler plus the platform
/// callback.
pub struct ProvisionManager {
	callback: Box<dyn ProvisionCallback>,
	cert_handler: Arc<CertHandler>,
}

impl ProvisionManager {
	pub fn new(callback: Box<dyn ProvisionCallback>, cert_handler: Arc<CertHandler>) -> Self {
		Self {
			callback,
			cert_handler,
		}
	}

	/// Clears and re-owns every registered certificate type, creating the
	/// bootstrap certificate for self-signed types, then hands off to disk
	/// encryption. Each step is atomic on its own; a failure aborts the
	/// remaining steps and the next invocation recovers the partial state.
	pub fn start_provisioning(&self, password: &str) -> Result<()> {
		debug!("start provisioning");

		self.callback.on_start_provisioning(password)?;

		let cert_types = self.cert_handler.get_cert_types();

		for cert_type in &cert_types {
			debug!("clear cert storage: type = {cert_type}");

			self.cert_handler.clear(cert_type)?;
		}

		for cert_type in &cert_types {
			debug!("set owner: type = {cert_type}");

			self.cert_handler.set_owner(cert_type, password)?;

			if self.cert_handler.get_module_config(cert_type)?.is_self_signed {
				debug!("create self signed cert: type = {cert_type}");

				self.cert_handler.create_self_signed_cert(cert_type, password)?;
			}
		}

		self.callback.on_encrypt_disk(password)
	}

	pub fn finish_provisioning(&self, password: &str) -> Result<()> {
		debug!("finish provisioning");

		self.callback.on_finish_provisioning(password)
	}

	pub fn deprovision(&self, password: &str) -> Result<()> {
		debug!("deprovision");

		self.callback.on_deprovision(password)
	}

	/// Returns the externally issuable certificate types: every registered
	/// type except the self-signed bootstrap ones.
	pub fn get_cert_types(&self) -> Result<Vec<String>> {
		let mut cert_types = self.cert_handler.get_cert_types();

		let mut index = 0;
		while index < cert_types.len() {
			if self
				.cert_handler
				.get_module_config(&cert_types[index])?
				.is_self_signed
			{
				cert_types.remove(index);
			} else {
				index += 1;
			}
		}

		Ok(cert_types)
	}

	pub fn create_key(&self, cert_type: &str, subject: &str, password: &str) -> Result<String> {
		debug!("create key: type = {cert_type}");

		self.cert_handler.create_key(cert_type, subject, password)
	}

	pub fn apply_cert(&self, cert_type: &str, pem_chain: &str) -> Result<CertInfo> {
		debug!("apply cert: type = {cert_type}");

		self.cert_handler.apply_certificate(cert_type, pem_chain)
	}

	pub fn get_cert(&self, cert_type: &str, issuer: &[u8], serial: &[u8]) -> Result<CertInfo> {
		debug!("get cert: type = {cert_type}");

		self.cert_handler.get_certificate(cert_type, issuer, serial)
	}

	pub fn subscribe_cert_changed(
		&self,
		cert_type: &str,
		receiver: Arc<dyn CertReceiver>,
	) -> Result<()> {
		debug!("subscribe cert receiver: type = {cert_type}");

		self.cert_handler.subscribe_cert_changed(cert_type, receiver)
	}

	pub fn unsubscribe_cert_changed(&self, receiver: &Arc<dyn CertReceiver>) -> Result<()> {
		debug!("unsubscribe cert receiver");

		self.cert_handler.unsubscribe_cert_changed(receiver)
	}
}

#[cfg(test)]
#[path = "provision_tests.rs"]
mod tests;
