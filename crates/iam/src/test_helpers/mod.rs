//! Shared infrastructure for unit and integration tests: a software
//! PKCS#11 token, in-memory storages and a local CA.
//!
//! Gated behind the `testing` feature so downstream crates can reuse the
//! software token in their own tests.

mod ca;
mod mock_hsm;
mod softtoken;
mod storage;

pub use ca::TestCa;
pub use mock_hsm::{MOCK_HSM_PASSWORD, MockHsm};
pub use softtoken::{SlotConfig, SoftDriver, SoftwareKey};
pub use storage::{MemoryCertStorage, MemoryNodeStorage};

use std::sync::Arc;

use crate::certhandler::{CertModule, ModuleConfig};
use crate::crypto::{KeyType, Provider};
use crate::pkcs11::{Pkcs11Config, Pkcs11Module};

/// Installs the compact test logging subscriber. Call freely; only the
/// first subscriber wins.
pub fn init_logging() {
	edge_core::telemetry::testing_logging();
}

/// Module config used by most tests: two certificates, client auth.
pub fn test_module_config(key_type: KeyType, max_certificates: usize) -> ModuleConfig {
	ModuleConfig {
		key_type,
		max_certificates,
		extended_key_usage: vec![crate::certhandler::ExtendedKeyUsage::ClientAuth],
		alternative_names: vec!["epam.com".to_string()],
		skip_validation: false,
		is_self_signed: false,
	}
}

/// PKCS#11 config pointing at slot 0 of a [`SoftDriver`], with the user
/// PIN kept under `pin_dir`.
pub fn test_pkcs11_config(pin_dir: &std::path::Path, max_certificates: usize) -> Pkcs11Config {
	Pkcs11Config {
		library: None,
		slot_id: Some(0),
		slot_index: None,
		token_label: None,
		user_pin_path: Some(pin_dir.join("user.pin")),
		module_path_in_url: false,
		tee_login_type: None,
		max_certificates,
	}
}

/// Builds a certificate module on a software token, sharing the given
/// driver and storage.
pub fn soft_cert_module(
	cert_type: &str,
	config: ModuleConfig,
	pin_dir: &std::path::Path,
	driver: Arc<SoftDriver>,
	storage: Arc<MemoryCertStorage>,
) -> crate::errors::Result<CertModule> {
	let provider = Arc::new(Provider::new());

	let pkcs11 = Pkcs11Module::new(
		cert_type,
		test_pkcs11_config(pin_dir, config.max_certificates),
		driver,
		provider.clone(),
	)?;

	CertModule::new(cert_type, config, provider, Box::new(pkcs11), storage)
}
