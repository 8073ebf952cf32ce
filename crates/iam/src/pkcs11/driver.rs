//! Cryptoki-style driver contract.
//!
//! This is the seam towards the PKCS#11 shared library owned by the device:
//! slot/token discovery, sessions and login state, object search and
//! attribute access, key generation and signing. Hardware bindings live
//! outside this crate; the software token in `test_helpers` implements the
//! same contract for tests.

use crate::crypto::{KeyType, PublicKey};
use crate::errors::Result;

pub type SlotId = u64;
pub type SessionHandle = u64;
pub type ObjectHandle = u64;

#[derive(Debug, Clone)]
pub struct SlotInfo {
	pub description: String,
	pub token_present: bool,
}

#[derive(Debug, Clone)]
pub struct TokenInfo {
	pub label: String,
	pub initialized: bool,
	pub total_public_memory: u64,
	pub free_public_memory: u64,
	pub total_private_memory: u64,
	pub free_private_memory: u64,
}

/// Login state of a session, collapsed over the read/write distinction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
	Public,
	User,
	SecurityOfficer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserType {
	User,
	SecurityOfficer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectClass {
	Certificate,
	PrivateKey,
	PublicKey,
}

/// Attribute filter for token object searches. `None` fields match
/// anything; only token objects are ever returned.
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
	pub id: Option<Vec<u8>>,
	pub label: Option<String>,
	pub class: Option<ObjectClass>,
}

/// A found token object with its identifying attributes.
#[derive(Debug, Clone)]
pub struct ObjectInfo {
	pub handle: ObjectHandle,
	pub class: ObjectClass,
	pub id: Vec<u8>,
	pub label: String,
}

/// Handles of a freshly generated key pair plus the exported public half.
#[derive(Debug, Clone)]
pub struct KeyPairInfo {
	pub private_key: ObjectHandle,
	pub public_key: ObjectHandle,
	pub public: PublicKey,
}

/// Thin wrapper over a Cryptoki-compatible library.
///
/// All calls may block on the shared library and are treated as slow.
pub trait Driver: Send + Sync {
	/// Returns all slot ids known to the library.
	fn slots(&self) -> Result<Vec<SlotId>>;

	fn slot_info(&self, slot: SlotId) -> Result<SlotInfo>;

	fn token_info(&self, slot: SlotId) -> Result<TokenInfo>;

	/// Initializes the token in `slot`, wiping any existing objects and
	/// setting the security-officer PIN.
	fn init_token(&self, slot: SlotId, so_pin: &str, label: &str) -> Result<()>;

	fn open_session(&self, slot: SlotId, read_write: bool) -> Result<SessionHandle>;

	fn close_session(&self, session: SessionHandle) -> Result<()>;

	fn close_all_sessions(&self, slot: SlotId) -> Result<()>;

	fn session_state(&self, session: SessionHandle) -> Result<SessionState>;

	fn login(&self, session: SessionHandle, user: UserType, pin: &str) -> Result<()>;

	fn logout(&self, session: SessionHandle) -> Result<()>;

	/// Sets the user PIN. Requires a security-officer session.
	fn init_pin(&self, session: SessionHandle, pin: &str) -> Result<()>;

	/// Generates a token key pair: sensitive, non-extractable, sign/decrypt
	/// on the private half, verify/encrypt on the public half, both tagged
	/// with `(id, label)`.
	fn generate_key_pair(
		&self,
		session: SessionHandle,
		key_type: KeyType,
		id: &[u8],
		label: &str,
	) -> Result<KeyPairInfo>;

	/// Signs `message` with the private key object. RSA keys produce PKCS#1
	/// v1.5 SHA-256 signatures, ECDSA keys ASN.1 DER ECDSA-SHA384
	/// signatures.
	fn sign(
		&self,
		session: SessionHandle,
		key: ObjectHandle,
		key_type: KeyType,
		message: &[u8],
	) -> Result<Vec<u8>>;

	/// Imports a DER certificate as a token object tagged `(id, label)`.
	fn import_certificate(
		&self,
		session: SessionHandle,
		id: &[u8],
		label: &str,
		der: &[u8],
	) -> Result<ObjectHandle>;

	/// Returns all token objects matching the filter.
	fn find_objects(&self, session: SessionHandle, filter: &SearchFilter) -> Result<Vec<ObjectInfo>>;

	/// Reads the DER value of a certificate object.
	fn read_certificate(&self, session: SessionHandle, object: ObjectHandle) -> Result<Vec<u8>>;

	fn destroy_object(&self, session: SessionHandle, object: ObjectHandle) -> Result<()>;
}
