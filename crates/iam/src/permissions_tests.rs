use super::*;
use crate::ErrorKind;
use crate::types::{FunctionalServicePermissions, InstanceIdent, PermKeyValue};

fn ident(service: &str, subject: &str, instance: u64) -> InstanceIdent {
	InstanceIdent {
		service_id: service.to_string(),
		subject_id: subject.to_string(),
		instance,
	}
}

fn vis_permissions() -> Vec<FunctionalServicePermissions> {
	vec![FunctionalServicePermissions {
		name: "vis".to_string(),
		permissions: vec![
			PermKeyValue::new("*", "rw"),
			PermKeyValue::new("test", "r"),
		],
	}]
}

#[test]
fn register_and_query_round_trip() {
	let handler = PermHandler::default();
	let ident = ident("s1", "u1", 1);

	let secret = handler.register_instance(&ident, vis_permissions()).unwrap();

	let (resolved, perms) = handler.get_permissions(&secret, "vis").unwrap();

	assert_eq!(resolved, ident);
	assert_eq!(
		perms,
		vec![PermKeyValue::new("*", "rw"), PermKeyValue::new("test", "r")]
	);
}

#[test]
fn unknown_functional_service_is_not_found() {
	let handler = PermHandler::default();
	let secret = handler
		.register_instance(&ident("s1", "u1", 1), vis_permissions())
		.unwrap();

	let err = handler.get_permissions(&secret, "unknown").unwrap_err();
	assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn unknown_secret_is_not_found() {
	let handler = PermHandler::default();

	let err = handler.get_permissions("not-a-secret", "vis").unwrap_err();
	assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn re_registration_returns_the_same_secret_and_keeps_first_permissions() {
	let handler = PermHandler::default();
	let ident = ident("s1", "u1", 1);

	let first = handler.register_instance(&ident, vis_permissions()).unwrap();

	let second = handler
		.register_instance(
			&ident,
			vec![FunctionalServicePermissions {
				name: "vis".to_string(),
				permissions: vec![PermKeyValue::new("*", "r")],
			}],
		)
		.unwrap();

	assert_eq!(first, second);

	// First writer wins.
	let (_, perms) = handler.get_permissions(&first, "vis").unwrap();
	assert_eq!(
		perms,
		vec![PermKeyValue::new("*", "rw"), PermKeyValue::new("test", "r")]
	);
}

#[test]
fn secrets_are_unique_across_instances() {
	let handler = PermHandler::default();

	let a = handler
		.register_instance(&ident("s1", "u1", 1), vis_permissions())
		.unwrap();
	let b = handler
		.register_instance(&ident("s1", "u1", 2), vis_permissions())
		.unwrap();

	assert_ne!(a, b);
}

#[test]
fn unregister_removes_the_instance() {
	let handler = PermHandler::default();
	let ident = ident("s1", "u1", 1);

	let secret = handler.register_instance(&ident, vis_permissions()).unwrap();

	handler.unregister_instance(&ident).unwrap();

	let err = handler.get_permissions(&secret, "vis").unwrap_err();
	assert_eq!(err.kind(), ErrorKind::NotFound);

	let err = handler.unregister_instance(&ident).unwrap_err();
	assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn full_table_fails_with_no_memory() {
	let handler = PermHandler::new(2);

	handler
		.register_instance(&ident("s1", "u1", 1), vis_permissions())
		.unwrap();
	handler
		.register_instance(&ident("s1", "u1", 2), vis_permissions())
		.unwrap();

	let err = handler
		.register_instance(&ident("s1", "u1", 3), vis_permissions())
		.unwrap_err();
	assert_eq!(err.kind(), ErrorKind::NoMemory);

	// Existing idents still resolve without consuming capacity.
	handler
		.register_instance(&ident("s1", "u1", 1), vis_permissions())
		.unwrap();
}
