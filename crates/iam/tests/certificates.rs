// End-to-end certificate lifecycle against the software token.

use std::sync::Arc;

use edge_iam::certhandler::{CertHandler, CertStorage, ExtendedKeyUsage, ModuleConfig};
use edge_iam::crypto::KeyType;
use edge_iam::test_helpers::{MemoryCertStorage, SoftDriver, TestCa, soft_cert_module};
use edge_iam::types::CertInfo;
use edge_iam::{ErrorKind, Result};
use x509_parser::prelude::*;

struct Env {
	driver: Arc<SoftDriver>,
	storage: Arc<MemoryCertStorage>,
	handler: CertHandler,
	_pin_dir: tempfile::TempDir,
}

fn iam_config(key_type: KeyType, max_certificates: usize) -> ModuleConfig {
	ModuleConfig {
		key_type,
		max_certificates,
		extended_key_usage: vec![ExtendedKeyUsage::ClientAuth],
		alternative_names: vec!["epam.com".to_string()],
		skip_validation: false,
		is_self_signed: false,
	}
}

fn setup(config: ModuleConfig) -> Result<Env> {
	edge_iam::test_helpers::init_logging();

	let pin_dir = tempfile::tempdir().unwrap();
	let driver = Arc::new(SoftDriver::new());
	let storage = Arc::new(MemoryCertStorage::new());

	let handler = CertHandler::new();
	handler.register_module(soft_cert_module(
		"iam",
		config,
		pin_dir.path(),
		driver.clone(),
		storage.clone(),
	)?)?;

	Ok(Env {
		driver,
		storage,
		handler,
		_pin_dir: pin_dir,
	})
}

#[test]
fn create_key_produces_a_well_formed_csr() {
	let env = setup(iam_config(KeyType::Rsa, 2)).unwrap();

	env.handler.set_owner("iam", "1234").unwrap();
	let csr_pem = env.handler.create_key("iam", "Aos Core", "1234").unwrap();

	let der = ::pem::parse(&csr_pem).unwrap();
	let (_, csr) = X509CertificationRequest::from_der(der.contents()).unwrap();

	let subject = csr.certification_request_info.subject.to_string();
	assert!(subject.contains("Aos Core"), "unexpected subject: {subject}");

	let mut dns_names = Vec::new();
	let mut has_eku = false;

	for ext in csr.requested_extensions().into_iter().flatten() {
		match ext {
			ParsedExtension::SubjectAlternativeName(san) => {
				for name in &san.general_names {
					if let GeneralName::DNSName(dns) = name {
						dns_names.push(dns.to_string());
					}
				}
			},
			ParsedExtension::ExtendedKeyUsage(eku) => {
				has_eku = eku.client_auth;
			},
			_ => {},
		}
	}

	assert_eq!(dns_names, vec!["epam.com"]);
	assert!(has_eku, "extension 2.5.29.37 missing");

	// No certificate exists yet, only the key pair on the token.
	assert!(env.storage.is_empty());
	assert_eq!(env.driver.object_count(0, Some("iam")), 2);
}

#[test]
fn apply_certificate_records_the_issued_credential() {
	let env = setup(iam_config(KeyType::Ecdsa, 2)).unwrap();
	let ca = TestCa::new().unwrap();

	env.handler.set_owner("iam", "1234").unwrap();
	let csr = env.handler.create_key("iam", "Aos Core", "1234").unwrap();

	let chain = ca.issue_chain(&csr, &[0x33, 0x33, 0x33], 30).unwrap();
	let info = env.handler.apply_certificate("iam", &chain).unwrap();

	assert_eq!(info.serial, vec![0x33, 0x33, 0x33]);
	assert_eq!(env.storage.get_certs_info("iam").unwrap(), vec![info.clone()]);

	// Leaf under the key's id, CA under a fresh one.
	assert_eq!(
		env.driver.object_count_by_class(
			0,
			"iam",
			edge_iam::pkcs11::driver::ObjectClass::Certificate
		),
		2
	);

	// The stored record is retrievable both ways.
	assert_eq!(
		env.handler.get_certificate("iam", &info.issuer, &info.serial).unwrap(),
		info
	);
	assert_eq!(env.handler.get_certificate("iam", &[], &[]).unwrap(), info);
}

#[test]
fn apply_beyond_max_certificates_trims_the_oldest() {
	let env = setup(iam_config(KeyType::Ecdsa, 2)).unwrap();
	let ca = TestCa::new().unwrap();

	env.handler.set_owner("iam", "1234").unwrap();

	let mut infos = Vec::new();
	for (serial, days) in [(0x01u8, 30), (0x02, 10), (0x03, 20)] {
		let csr = env.handler.create_key("iam", "Aos Core", "1234").unwrap();
		let chain = ca.issue_chain(&csr, &[serial], days).unwrap();
		infos.push(env.handler.apply_certificate("iam", &chain).unwrap());
	}

	let stored = env.storage.get_certs_info("iam").unwrap();
	assert_eq!(stored.len(), 2);

	// The earliest-expiring certificate (10 days) is gone everywhere.
	let evicted = &infos[1];
	assert!(!stored.iter().any(|cert| cert.cert_url == evicted.cert_url));
	assert!(stored.iter().any(|cert| cert.cert_url == infos[0].cert_url));
	assert!(stored.iter().any(|cert| cert.cert_url == infos[2].cert_url));

	// Two leaves plus the shared CA remain on the token.
	assert_eq!(
		env.driver.object_count_by_class(
			0,
			"iam",
			edge_iam::pkcs11::driver::ObjectClass::Certificate
		),
		3
	);
	assert_eq!(
		env.driver.object_count_by_class(
			0,
			"iam",
			edge_iam::pkcs11::driver::ObjectClass::PrivateKey
		),
		2
	);
}

#[test]
fn reopening_reconciles_storage_with_the_token() {
	let pin_dir = tempfile::tempdir().unwrap();
	let driver = Arc::new(SoftDriver::new());
	let storage = Arc::new(MemoryCertStorage::new());
	let ca = TestCa::new().unwrap();

	let mut applied = Vec::new();

	{
		let handler = CertHandler::new();
		handler
			.register_module(
				soft_cert_module("iam", iam_config(KeyType::Ecdsa, 2), pin_dir.path(), driver.clone(), storage.clone())
					.unwrap(),
			)
			.unwrap();

		handler.set_owner("iam", "1234").unwrap();

		for serial in [0x01u8, 0x02] {
			let csr = handler.create_key("iam", "Aos Core", "1234").unwrap();
			let chain = ca.issue_chain(&csr, &[serial], 30).unwrap();
			applied.push(handler.apply_certificate("iam", &chain).unwrap());
		}
	}

	// Mutate the storage behind the handler's back: drop one record,
	// plant a bogus one.
	storage.remove_cert_info("iam", &applied[0].cert_url).unwrap();
	storage
		.add_cert_info(
			"iam",
			&CertInfo {
				issuer: vec![0xde, 0xad],
				serial: vec![0xbe, 0xef],
				cert_url: "pkcs11:token=aos;object=iam;id=00000000-0000-4000-8000-000000000000"
					.to_string(),
				key_url: "pkcs11:token=aos;object=iam;id=00000000-0000-4000-8000-000000000000"
					.to_string(),
				not_after: std::time::SystemTime::now(),
			},
		)
		.unwrap();

	// Re-registering the module runs the reconciliation.
	let handler = CertHandler::new();
	handler
		.register_module(
			soft_cert_module("iam", iam_config(KeyType::Ecdsa, 2), pin_dir.path(), driver, storage.clone()).unwrap(),
		)
		.unwrap();

	let mut stored: Vec<String> = storage
		.get_certs_info("iam")
		.unwrap()
		.into_iter()
		.map(|cert| cert.cert_url)
		.collect();
	stored.sort();

	let mut expected: Vec<String> = applied.iter().map(|cert| cert.cert_url.clone()).collect();
	expected.sort();

	assert_eq!(stored, expected);
}

#[test]
fn unknown_cert_type_is_rejected() {
	let env = setup(iam_config(KeyType::Ecdsa, 2)).unwrap();

	let err = env.handler.create_key("sm", "Aos Core", "1234").unwrap_err();
	assert_eq!(err.kind(), ErrorKind::NotFound);
}
