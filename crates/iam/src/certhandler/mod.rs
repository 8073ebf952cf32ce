//! Certificate lifecycle: a registry of per-type certificate modules.
//!
//! The handler is a thin dispatcher; all policy lives in [`CertModule`].
//! Certificate-change subscribers are invoked synchronously on the applying
//! thread, after the new record is visible in storage; subscriber failures
//! are logged and swallowed.

mod hsm;
mod module;
mod storage;

use std::sync::{Arc, Mutex, RwLock};

use tracing::{debug, warn};

pub use hsm::{Hsm, ValidationResult};
pub use module::{CertModule, ExtendedKeyUsage, ModuleConfig};
pub use storage::{CertStorage, FileCertStorage};

use crate::errors::{Error, Result};
use crate::types::CertInfo;

/// Receives certificate-change notifications for a subscribed type.
pub trait CertReceiver: Send + Sync {
	fn on_cert_changed(&self, info: &CertInfo) -> Result<()>;
}

struct Subscription {
	cert_type: String,
	receiver: Arc<dyn CertReceiver>,
}

/// Registry of certificate modules, keyed by certificate type.
///
/// Modules are registered at startup and owned by the handler for their
/// whole lifetime. All operations dispatch by type and fail with `NotFound`
/// for unknown types.
#[derive(Default)]
pub struct CertHandler {
	modules: RwLock<Vec<Arc<CertModule>>>,
	subscriptions: Mutex<Vec<Subscription>>,
}

impl CertHandler {
	pub fn new() -> Self {
		Self::default()
	}

	/// Registers an initialized module. Fails with `AlreadyExist` when a
	/// module for the same type is already registered.
	pub fn register_module(&self, module: CertModule) -> Result<()> {
		let mut modules = self.modules.write().unwrap();

		if modules.iter().any(|m| m.cert_type() == module.cert_type()) {
			return Err(Error::already_exist(format!(
				"module {} is already registered",
				module.cert_type()
			)));
		}

		debug!("register module: type = {}", module.cert_type());
		modules.push(Arc::new(module));

		Ok(())
	}

	/// Returns all registered certificate types, in registration order.
	pub fn get_cert_types(&self) -> Vec<String> {
		self
			.modules
			.read()
			.unwrap()
			.iter()
			.map(|module| module.cert_type().to_string())
			.collect()
	}

	pub fn get_module_config(&self, cert_type: &str) -> Result<ModuleConfig> {
		Ok(self.module(cert_type)?.config().clone())
	}

	pub fn set_owner(&self, cert_type: &str, password: &str) -> Result<()> {
		debug!("set owner: type = {cert_type}");

		self.module(cert_type)?.set_owner(password)
	}

	pub fn clear(&self, cert_type: &str) -> Result<()> {
		debug!("clear: type = {cert_type}");

		self.module(cert_type)?.clear()
	}

	/// Generates a key for the type and returns a PEM CSR for it.
	pub fn create_key(&self, cert_type: &str, subject: &str, password: &str) -> Result<String> {
		debug!("create key: type = {cert_type}, subject = {subject}");

		let module = self.module(cert_type)?;
		let key = module.create_key(password)?;

		module.create_csr(subject, key)
	}

	/// Applies a PEM certificate chain and notifies subscribers of the type.
	pub fn apply_certificate(&self, cert_type: &str, pem_chain: &str) -> Result<CertInfo> {
		debug!("apply certificate: type = {cert_type}");

		let info = self.module(cert_type)?.apply_cert(pem_chain)?;

		self.notify_cert_changed(cert_type, &info);

		Ok(info)
	}

	/// Returns certificate info by issuer/serial, or the next rotation
	/// candidate of the type when the serial is empty.
	pub fn get_certificate(&self, cert_type: &str, issuer: &[u8], serial: &[u8]) -> Result<CertInfo> {
		debug!("get certificate: type = {cert_type}");

		self.module(cert_type)?.get_certificate(issuer, serial)
	}

	/// Bootstraps the type with a self-signed certificate and notifies
	/// subscribers.
	pub fn create_self_signed_cert(&self, cert_type: &str, password: &str) -> Result<CertInfo> {
		debug!("create self signed cert: type = {cert_type}");

		let info = self.module(cert_type)?.create_self_signed_cert(password)?;

		self.notify_cert_changed(cert_type, &info);

		Ok(info)
	}

	/// Subscribes a receiver to changes of one certificate type.
	pub fn subscribe_cert_changed(
		&self,
		cert_type: &str,
		receiver: Arc<dyn CertReceiver>,
	) -> Result<()> {
		// Unknown types are rejected so a typo does not subscribe to nothing.
		let _ = self.module(cert_type)?;

		self.subscriptions.lock().unwrap().push(Subscription {
			cert_type: cert_type.to_string(),
			receiver,
		});

		Ok(())
	}

	/// Removes every subscription held by this receiver.
	pub fn unsubscribe_cert_changed(&self, receiver: &Arc<dyn CertReceiver>) -> Result<()> {
		let mut subscriptions = self.subscriptions.lock().unwrap();
		let before = subscriptions.len();

		subscriptions.retain(|sub| !Arc::ptr_eq(&sub.receiver, receiver));

		if subscriptions.len() == before {
			return Err(Error::not_found("receiver is not subscribed"));
		}

		Ok(())
	}

	fn module(&self, cert_type: &str) -> Result<Arc<CertModule>> {
		self
			.modules
			.read()
			.unwrap()
			.iter()
			.find(|module| module.cert_type() == cert_type)
			.cloned()
			.ok_or_else(|| Error::not_found(format!("module {cert_type} is not registered")))
	}

	fn notify_cert_changed(&self, cert_type: &str, info: &CertInfo) {
		let receivers: Vec<Arc<dyn CertReceiver>> = self
			.subscriptions
			.lock()
			.unwrap()
			.iter()
			.filter(|sub| sub.cert_type == cert_type)
			.map(|sub| sub.receiver.clone())
			.collect();

		for receiver in receivers {
			if let Err(e) = receiver.on_cert_changed(info) {
				warn!("cert change receiver failed: type = {cert_type}, error = {e}");
			}
		}
	}
}

#[cfg(test)]
#[path = "handler_tests.rs"]
mod tests;
