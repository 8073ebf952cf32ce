use std::time::SystemTime;

use super::*;
use crate::ErrorKind;

fn cert_info(url: &str) -> CertInfo {
	CertInfo {
		issuer: vec![1, 2, 3],
		serial: url.as_bytes().to_vec(),
		cert_url: url.to_string(),
		key_url: format!("{url}-key"),
		not_after: SystemTime::now(),
	}
}

#[test]
fn records_survive_a_reopen() {
	let dir = tempfile::tempdir().unwrap();
	let path = dir.path().join("certs.json");

	let iam = cert_info("pkcs11:iam");
	let sm = cert_info("pkcs11:sm");

	{
		let storage = FileCertStorage::new(&path).unwrap();
		storage.add_cert_info("iam", &iam).unwrap();
		storage.add_cert_info("sm", &sm).unwrap();
	}

	let storage = FileCertStorage::new(&path).unwrap();

	assert_eq!(storage.get_certs_info("iam").unwrap(), vec![iam.clone()]);
	assert_eq!(storage.get_certs_info("sm").unwrap(), vec![sm]);
	assert_eq!(storage.get_cert_info(&iam.issuer, &iam.serial).unwrap(), iam);
}

#[test]
fn removals_are_persisted() {
	let dir = tempfile::tempdir().unwrap();
	let path = dir.path().join("certs.json");

	{
		let storage = FileCertStorage::new(&path).unwrap();
		storage.add_cert_info("iam", &cert_info("pkcs11:a")).unwrap();
		storage.add_cert_info("iam", &cert_info("pkcs11:b")).unwrap();

		storage.remove_cert_info("iam", "pkcs11:a").unwrap();
	}

	let storage = FileCertStorage::new(&path).unwrap();
	let stored = storage.get_certs_info("iam").unwrap();

	assert_eq!(stored.len(), 1);
	assert_eq!(stored[0].cert_url, "pkcs11:b");

	storage.remove_all_certs_info("iam").unwrap();

	let storage = FileCertStorage::new(&path).unwrap();
	assert!(storage.get_certs_info("iam").unwrap().is_empty());
}

#[test]
fn missing_records_are_not_found() {
	let dir = tempfile::tempdir().unwrap();
	let storage = FileCertStorage::new(dir.path().join("certs.json")).unwrap();

	assert_eq!(
		storage.get_cert_info(&[1], &[2]).unwrap_err().kind(),
		ErrorKind::NotFound
	);
	assert_eq!(
		storage.remove_cert_info("iam", "pkcs11:a").unwrap_err().kind(),
		ErrorKind::NotFound
	);
	assert!(storage.get_certs_info("iam").unwrap().is_empty());
}

#[test]
fn corrupt_storage_file_is_rejected() {
	let dir = tempfile::tempdir().unwrap();
	let path = dir.path().join("certs.json");

	std::fs::write(&path, "{ not json").unwrap();

	let err = FileCertStorage::new(&path).unwrap_err();
	assert_eq!(err.kind(), ErrorKind::Failed);
}
