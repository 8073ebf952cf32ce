use uuid::Uuid;

use super::*;

#[test]
fn pkcs11_url_round_trip() {
	let id = Uuid::new_v4();
	let url = encode_pkcs11_url("aos", "iam", &id, None, "5678");

	let decoded = decode_pkcs11_url(&url).unwrap();
	assert_eq!(decoded.token.as_deref(), Some("aos"));
	assert_eq!(decoded.label, "iam");
	assert_eq!(decoded.id, id);
	assert_eq!(decoded.pin.as_deref(), Some("5678"));
	assert_eq!(decoded.module_path, None);
}

#[test]
fn pkcs11_url_with_module_path() {
	let id = Uuid::new_v4();
	let url = encode_pkcs11_url("aos", "diskenc", &id, Some("/usr/lib/softhsm2.so"), "1234");

	assert_eq!(
		url,
		format!("pkcs11:token=aos;object=diskenc;id={id}?module-path=/usr/lib/softhsm2.so&pin-value=1234")
	);

	let decoded = decode_pkcs11_url(&url).unwrap();
	assert_eq!(decoded.module_path.as_deref(), Some("/usr/lib/softhsm2.so"));
}

#[test]
fn empty_pin_is_omitted() {
	let id = Uuid::new_v4();
	let url = encode_pkcs11_url("aos", "iam", &id, None, "");

	assert!(!url.contains("pin-value"));
	assert!(!url.contains('?'));

	let decoded = decode_pkcs11_url(&url).unwrap();
	assert_eq!(decoded.pin, None);
}

#[test]
fn missing_object_or_id_is_rejected() {
	let id = Uuid::new_v4();

	let err = decode_pkcs11_url(&format!("pkcs11:token=aos;id={id}")).unwrap_err();
	assert_eq!(err.kind(), crate::ErrorKind::InvalidArgument);

	let err = decode_pkcs11_url("pkcs11:token=aos;object=iam").unwrap_err();
	assert_eq!(err.kind(), crate::ErrorKind::InvalidArgument);
}

#[test]
fn wrong_scheme_is_rejected() {
	let err = decode_pkcs11_url("file:/var/aos/cert.pem").unwrap_err();
	assert_eq!(err.kind(), crate::ErrorKind::InvalidArgument);
}

#[test]
fn file_url_parsing() {
	assert_eq!(
		parse_file_url("file:/var/aos/cert.pem").unwrap(),
		std::path::PathBuf::from("/var/aos/cert.pem")
	);
	assert!(parse_file_url("pkcs11:token=aos").is_err());
	assert!(parse_file_url("file:").is_err());
}

#[test]
fn scheme_parsing() {
	assert_eq!(parse_scheme("pkcs11:token=aos").unwrap(), "pkcs11");
	assert_eq!(parse_scheme("file:/tmp/x").unwrap(), "file");
	assert!(parse_scheme("no-scheme").is_err());
}
