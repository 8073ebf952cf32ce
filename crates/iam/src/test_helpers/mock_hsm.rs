//! Scriptable HSM double for handler and module tests.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::certhandler::{Hsm, ValidationResult};
use crate::crypto::{Certificate, KeyType, PrivateKey};
use crate::errors::Result;
use crate::test_helpers::SoftwareKey;
use crate::types::CertInfo;

pub const MOCK_HSM_PASSWORD: &str = "mock-pin";

/// HSM double: keys are real software keys, certificates are acknowledged
/// with synthetic URLs, and every mutation is recorded for assertions.
#[derive(Default)]
pub struct MockHsm {
	/// Returned by `validate_certificates`.
	pub validation: Mutex<ValidationResult>,
	pub validate_calls: AtomicUsize,
	pub clear_calls: AtomicUsize,
	pub owners: Mutex<Vec<String>>,
	pub applied: Mutex<Vec<CertInfo>>,
	pub removed_certs: Mutex<Vec<String>>,
	pub removed_keys: Mutex<Vec<String>>,
	url_counter: AtomicUsize,
}

impl MockHsm {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_validation(validation: ValidationResult) -> Self {
		Self {
			validation: Mutex::new(validation),
			..Self::default()
		}
	}
}

impl Hsm for MockHsm {
	fn set_owner(&self, password: &str) -> Result<()> {
		self.owners.lock().unwrap().push(password.to_string());
		Ok(())
	}

	fn clear(&self) -> Result<()> {
		self.clear_calls.fetch_add(1, Ordering::SeqCst);
		Ok(())
	}

	fn create_key(&self, _password: &str, key_type: KeyType) -> Result<Arc<dyn PrivateKey>> {
		SoftwareKey::generate(key_type)
	}

	fn apply_cert(&self, chain: &[Certificate]) -> Result<(CertInfo, String)> {
		let leaf = &chain[0];
		let index = self.url_counter.fetch_add(1, Ordering::SeqCst);

		let info = CertInfo {
			issuer: leaf.issuer.clone(),
			serial: leaf.serial.clone(),
			cert_url: format!("mock:cert-{index}"),
			key_url: format!("mock:key-{index}"),
			not_after: leaf.not_after,
		};

		self.applied.lock().unwrap().push(info.clone());

		Ok((info, MOCK_HSM_PASSWORD.to_string()))
	}

	fn remove_cert(&self, cert_url: &str, _password: &str) -> Result<()> {
		self.removed_certs.lock().unwrap().push(cert_url.to_string());
		Ok(())
	}

	fn remove_key(&self, key_url: &str, _password: &str) -> Result<()> {
		self.removed_keys.lock().unwrap().push(key_url.to_string());
		Ok(())
	}

	fn validate_certificates(&self) -> Result<ValidationResult> {
		self.validate_calls.fetch_add(1, Ordering::SeqCst);
		Ok(self.validation.lock().unwrap().clone())
	}
}

/// Lets tests keep a handle on the mock after moving it into a module.
impl Hsm for Arc<MockHsm> {
	fn set_owner(&self, password: &str) -> Result<()> {
		(**self).set_owner(password)
	}

	fn clear(&self) -> Result<()> {
		(**self).clear()
	}

	fn create_key(&self, password: &str, key_type: KeyType) -> Result<Arc<dyn PrivateKey>> {
		(**self).create_key(password, key_type)
	}

	fn apply_cert(&self, chain: &[Certificate]) -> Result<(CertInfo, String)> {
		(**self).apply_cert(chain)
	}

	fn remove_cert(&self, cert_url: &str, password: &str) -> Result<()> {
		(**self).remove_cert(cert_url, password)
	}

	fn remove_key(&self, key_url: &str, password: &str) -> Result<()> {
		(**self).remove_key(key_url, password)
	}

	fn validate_certificates(&self) -> Result<ValidationResult> {
		(**self).validate_certificates()
	}
}
