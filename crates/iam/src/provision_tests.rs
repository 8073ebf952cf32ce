use std::sync::{Arc, Mutex};

use super::*;
use crate::ErrorKind;
use crate::certhandler::{CertHandler, CertModule, ExtendedKeyUsage, ModuleConfig};
use crate::crypto::{KeyType, Provider};
use crate::errors::Error;
use crate::test_helpers::{MemoryCertStorage, MockHsm};

#[derive(Default)]
struct RecordingCallback {
	calls: Mutex<Vec<String>>,
	fail_on_start: bool,
}

impl RecordingCallback {
	fn record(&self, call: &str) {
		self.calls.lock().unwrap().push(call.to_string());
	}
}

impl ProvisionCallback for Arc<RecordingCallback> {
	fn on_start_provisioning(&self, _password: &str) -> crate::Result<()> {
		self.record("start");

		if self.fail_on_start {
			return Err(Error::failed("platform refused"));
		}

		Ok(())
	}

	fn on_finish_provisioning(&self, _password: &str) -> crate::Result<()> {
		self.record("finish");
		Ok(())
	}

	fn on_deprovision(&self, _password: &str) -> crate::Result<()> {
		self.record("deprovision");
		Ok(())
	}

	fn on_encrypt_disk(&self, _password: &str) -> crate::Result<()> {
		self.record("encrypt-disk");
		Ok(())
	}
}

fn module(cert_type: &str, is_self_signed: bool, hsm: Arc<MockHsm>) -> CertModule {
	let config = ModuleConfig {
		key_type: KeyType::Ecdsa,
		max_certificates: 2,
		extended_key_usage: vec![ExtendedKeyUsage::ClientAuth],
		alternative_names: vec![],
		skip_validation: false,
		is_self_signed,
	};

	CertModule::new(
		cert_type,
		config,
		Arc::new(Provider::new()),
		Box::new(hsm),
		Arc::new(MemoryCertStorage::new()),
	)
	.unwrap()
}

fn manager_with(
	callback: Arc<RecordingCallback>,
	modules: Vec<CertModule>,
) -> (ProvisionManager, Arc<CertHandler>) {
	let handler = Arc::new(CertHandler::new());

	for m in modules {
		handler.register_module(m).unwrap();
	}

	(
		ProvisionManager::new(Box::new(callback), handler.clone()),
		handler,
	)
}

#[test]
fn get_cert_types_hides_self_signed_types() {
	let iam_hsm = Arc::new(MockHsm::new());
	let diskenc_hsm = Arc::new(MockHsm::new());

	let (manager, _) = manager_with(
		Arc::new(RecordingCallback::default()),
		vec![
			module("iam", false, iam_hsm),
			module("diskenc", true, diskenc_hsm),
		],
	);

	assert_eq!(manager.get_cert_types().unwrap(), vec!["iam"]);
}

#[test]
fn start_provisioning_runs_all_steps_in_order() {
	let iam_hsm = Arc::new(MockHsm::new());
	let diskenc_hsm = Arc::new(MockHsm::new());
	let callback = Arc::new(RecordingCallback::default());

	let (manager, _) = manager_with(
		callback.clone(),
		vec![
			module("iam", false, iam_hsm.clone()),
			module("diskenc", true, diskenc_hsm.clone()),
		],
	);

	manager.start_provisioning("1234").unwrap();

	assert_eq!(*callback.calls.lock().unwrap(), vec!["start", "encrypt-disk"]);

	use std::sync::atomic::Ordering;
	assert_eq!(iam_hsm.clear_calls.load(Ordering::SeqCst), 1);
	assert_eq!(diskenc_hsm.clear_calls.load(Ordering::SeqCst), 1);
	assert_eq!(*iam_hsm.owners.lock().unwrap(), vec!["1234"]);
	assert_eq!(*diskenc_hsm.owners.lock().unwrap(), vec!["1234"]);

	// Only the self-signed type bootstrapped a certificate.
	assert!(iam_hsm.applied.lock().unwrap().is_empty());
	assert_eq!(diskenc_hsm.applied.lock().unwrap().len(), 1);
}

#[test]
fn start_provisioning_aborts_when_the_callback_fails() {
	let iam_hsm = Arc::new(MockHsm::new());
	let callback = Arc::new(RecordingCallback {
		fail_on_start: true,
		..Default::default()
	});

	let (manager, _) = manager_with(callback.clone(), vec![module("iam", false, iam_hsm.clone())]);

	let err = manager.start_provisioning("1234").unwrap_err();
	assert_eq!(err.kind(), ErrorKind::Failed);

	use std::sync::atomic::Ordering;
	assert_eq!(iam_hsm.clear_calls.load(Ordering::SeqCst), 0);
	assert_eq!(*callback.calls.lock().unwrap(), vec!["start"]);
}

#[test]
fn finish_and_deprovision_delegate_to_the_callback() {
	let callback = Arc::new(RecordingCallback::default());
	let (manager, _) = manager_with(callback.clone(), vec![]);

	manager.finish_provisioning("1234").unwrap();
	manager.deprovision("1234").unwrap();

	assert_eq!(
		*callback.calls.lock().unwrap(),
		vec!["finish", "deprovision"]
	);
}

#[test]
fn pass_through_operations_reach_the_handler() {
	let iam_hsm = Arc::new(MockHsm::new());
	let (manager, handler) = manager_with(
		Arc::new(RecordingCallback::default()),
		vec![module("iam", false, iam_hsm)],
	);

	let csr = manager.create_key("iam", "Aos Core", "1234").unwrap();
	assert!(csr.contains("BEGIN CERTIFICATE REQUEST"));

	let err = manager.get_cert("iam", &[], &[]).unwrap_err();
	assert_eq!(err.kind(), ErrorKind::NotFound);

	assert_eq!(handler.get_cert_types(), vec!["iam"]);
}
