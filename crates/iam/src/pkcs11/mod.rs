//! Token-backed HSM implementation.
//!
//! One [`Pkcs11Module`] binds one certificate type to one token. The token
//! is addressed through the [`Driver`] contract; objects belonging to the
//! module carry its certificate type as CKA_LABEL and a v4 UUID as CKA_ID.
//! A single read-write session is cached and re-logged-in on demand.

pub mod driver;
pub mod uri;

use std::collections::VecDeque;
use std::fmt;
use std::io::Write;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};
use uuid::Uuid;
use zeroize::Zeroize;

use crate::certhandler::{Hsm, ValidationResult};
use crate::crypto::{self, Certificate, KeyType, PrivateKey, PublicKey};
use crate::errors::{Error, ErrorKind, Result};
use crate::types::CertInfo;

use driver::{Driver, ObjectClass, ObjectInfo, SearchFilter, SessionHandle, SlotId, UserType};

/// Environment variable selecting the TEE login style.
pub const ENV_TEE_LOGIN_TYPE: &str = "CKTEEC_LOGIN_TYPE";

const DEFAULT_TOKEN_LABEL: &str = "aos";
const PIN_LENGTH_BYTES: usize = 8;

/// Login style used when the token is fronted by a TEE supplicant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TeeLoginType {
	Public,
	User,
	Group,
}

impl fmt::Display for TeeLoginType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			TeeLoginType::Public => "public",
			TeeLoginType::User => "user",
			TeeLoginType::Group => "group",
		};
		f.write_str(s)
	}
}

impl FromStr for TeeLoginType {
	type Err = Error;

	fn from_str(s: &str) -> Result<Self> {
		match s {
			"public" => Ok(TeeLoginType::Public),
			"user" => Ok(TeeLoginType::User),
			"group" => Ok(TeeLoginType::Group),
			_ => Err(Error::invalid_argument(format!("wrong TEE login type: {s}"))),
		}
	}
}

/// PKCS#11 module configuration.
///
/// Exactly one of `slot_id`, `slot_index` and `token_label` may be given;
/// without any, the default token label selects the slot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pkcs11Config {
	/// Path of the PKCS#11 library, used in URLs when `module_path_in_url`
	/// is set.
	#[serde(default)]
	pub library: Option<String>,
	#[serde(default)]
	pub slot_id: Option<SlotId>,
	#[serde(default)]
	pub slot_index: Option<usize>,
	#[serde(default)]
	pub token_label: Option<String>,
	/// Location of the user PIN file. Required unless a TEE login type is
	/// in effect.
	#[serde(default)]
	pub user_pin_path: Option<std::path::PathBuf>,
	#[serde(default)]
	pub module_path_in_url: bool,
	/// Overrides the `CKTEEC_LOGIN_TYPE` environment variable.
	#[serde(default)]
	pub tee_login_type: Option<TeeLoginType>,
	/// Upper bound for certificates of this type; also bounds the pending
	/// key list.
	pub max_certificates: usize,
}

struct PendingKey {
	id: Uuid,
	private_key: driver::ObjectHandle,
	public_key: driver::ObjectHandle,
	key: Arc<Pkcs11PrivateKey>,
}

struct ModuleState {
	slot_id: SlotId,
	token_label: String,
	user_pin: String,
	tee_login: Option<TeeLoginType>,
	session: Option<SessionHandle>,
	pending_keys: VecDeque<PendingKey>,
}

impl Drop for ModuleState {
	fn drop(&mut self) {
		self.user_pin.zeroize();
	}
}

/// Private key living on the token. Signing is delegated to the driver, the
/// key material never leaves the token.
pub struct Pkcs11PrivateKey {
	driver: Arc<dyn Driver>,
	session: SessionHandle,
	handle: driver::ObjectHandle,
	key_type: KeyType,
	public: PublicKey,
}

impl PrivateKey for Pkcs11PrivateKey {
	fn key_type(&self) -> KeyType {
		self.key_type
	}

	fn public_key(&self) -> &PublicKey {
		&self.public
	}

	fn sign(&self, message: &[u8]) -> Result<Vec<u8>> {
		self.driver.sign(self.session, self.handle, self.key_type, message)
	}
}

/// HSM implementation backed by a PKCS#11 token.
pub struct Pkcs11Module {
	cert_type: String,
	config: Pkcs11Config,
	driver: Arc<dyn Driver>,
	provider: Arc<crypto::Provider>,
	state: Mutex<ModuleState>,
}

impl Pkcs11Module {
	pub fn new(
		cert_type: impl Into<String>,
		config: Pkcs11Config,
		driver: Arc<dyn Driver>,
		provider: Arc<crypto::Provider>,
	) -> Result<Self> {
		let cert_type = cert_type.into();

		if config.max_certificates == 0 {
			return Err(Error::invalid_argument("max_certificates must be positive"));
		}

		let tee_login = match config.tee_login_type {
			Some(login) => Some(login),
			None => tee_login_from_env()?,
		};

		if config.user_pin_path.is_none() && tee_login.is_none() {
			return Err(Error::invalid_argument(
				"either a user PIN path or a TEE login type is required",
			));
		}

		let token_label = config
			.token_label
			.clone()
			.unwrap_or_else(|| DEFAULT_TOKEN_LABEL.to_string());

		let module = Self {
			cert_type,
			config,
			driver,
			provider,
			state: Mutex::new(ModuleState {
				slot_id: 0,
				token_label,
				user_pin: String::new(),
				tee_login,
				session: None,
				pending_keys: VecDeque::new(),
			}),
		};

		{
			let mut state = module.state.lock().unwrap();

			let slot_id = module.resolve_slot(&state)?;
			state.slot_id = slot_id;

			if module.is_owned(slot_id)? {
				module.log_token_info(slot_id);

				let user_pin = module.read_user_pin(&state)?;
				state.user_pin = user_pin;
			} else {
				debug!("no owned token found: type = {}", module.cert_type);
			}
		}

		Ok(module)
	}

	/// Exactly one of slot id, slot index and token label selects the slot.
	/// With a label (or the default), a matching token wins, then the first
	/// uninitialised slot with a token present.
	fn resolve_slot(&self, state: &ModuleState) -> Result<SlotId> {
		let params = usize::from(self.config.slot_id.is_some())
			+ usize::from(self.config.slot_index.is_some())
			+ usize::from(self.config.token_label.is_some());

		if params > 1 {
			return Err(Error::invalid_argument(
				"only one of slot_id, slot_index and token_label may be specified",
			));
		}

		if let Some(slot_id) = self.config.slot_id {
			return Ok(slot_id);
		}

		let slots = self.driver.slots()?;

		if let Some(index) = self.config.slot_index {
			return slots.get(index).copied().ok_or_else(|| {
				Error::new(ErrorKind::OutOfRange, format!("invalid slot index: {index}"))
			});
		}

		let mut free_slot = None;

		for slot in slots {
			if !self.driver.slot_info(slot)?.token_present {
				continue;
			}

			let token = self.driver.token_info(slot)?;

			if token.label == state.token_label {
				return Ok(slot);
			}

			if !token.initialized && free_slot.is_none() {
				free_slot = Some(slot);
			}
		}

		free_slot.ok_or_else(|| Error::not_found("no suitable slot found"))
	}

	fn is_owned(&self, slot: SlotId) -> Result<bool> {
		Ok(self.driver.token_info(slot)?.initialized)
	}

	fn read_user_pin(&self, state: &ModuleState) -> Result<String> {
		if state.tee_login.is_some() {
			return Ok(String::new());
		}

		let path = self
			.config
			.user_pin_path
			.as_ref()
			.ok_or_else(|| Error::invalid_argument("user PIN path is not configured"))?;

		read_pin_file(path)
	}

	fn log_token_info(&self, slot: SlotId) {
		match self.driver.token_info(slot) {
			Ok(info) => debug!(
				"token info: slot = {slot}, label = {}, publicMemory = {}/{}, privateMemory = {}/{}",
				info.label,
				info.total_public_memory - info.free_public_memory,
				info.total_public_memory,
				info.total_private_memory - info.free_private_memory,
				info.total_private_memory,
			),
			Err(e) => warn!("can't get token info: slot = {slot}, error = {e}"),
		}
	}

	fn token_mem_info(&self, slot: SlotId) -> Result<()> {
		let info = self.driver.token_info(slot)?;

		debug!(
			"token mem info: publicMemory = {}/{}, privateMemory = {}/{}",
			info.total_public_memory - info.free_public_memory,
			info.total_public_memory,
			info.total_private_memory - info.free_private_memory,
			info.total_private_memory,
		);

		Ok(())
	}

	/// Returns the cached session, logged in as requested. A login state
	/// mismatch is repaired with logout + login instead of being surfaced.
	fn create_session(
		&self,
		state: &mut ModuleState,
		user_login: bool,
		so_pin: &str,
	) -> Result<SessionHandle> {
		let session = match state.session {
			Some(session) => session,
			None => {
				let session = self.driver.open_session(state.slot_id, true)?;
				state.session = Some(session);
				session
			},
		};

		debug!("use session: session = {session}, slot = {}", state.slot_id);

		let current = self.driver.session_state(session)?;

		let user_logged_in = current == driver::SessionState::User;
		let so_logged_in = current == driver::SessionState::SecurityOfficer;

		if (user_login && so_logged_in) || (!user_login && user_logged_in) {
			self.driver.logout(session)?;
		}

		if user_login && !user_logged_in {
			debug!("user login: session = {session}, slot = {}", state.slot_id);
			self.driver.login(session, UserType::User, &state.user_pin)?;
		} else if !user_login && !so_logged_in {
			debug!("SO login: session = {session}, slot = {}", state.slot_id);
			self.driver.login(session, UserType::SecurityOfficer, so_pin)?;
		}

		Ok(session)
	}

	fn close_session(&self, state: &mut ModuleState) {
		if let Some(session) = state.session.take() {
			if let Err(e) = self.driver.close_session(session) {
				warn!("can't close session: session = {session}, error = {e}");
			}
		}
	}

	fn create_url(&self, state: &ModuleState, label: &str, id: &Uuid) -> String {
		let module_path = if self.config.module_path_in_url {
			self.config.library.as_deref()
		} else {
			None
		};

		uri::encode_pkcs11_url(&state.token_label, label, id, module_path, &state.user_pin)
	}

	fn find_objects(
		&self,
		session: SessionHandle,
		class: ObjectClass,
		id: Option<&Uuid>,
		label: Option<&str>,
	) -> Result<Vec<ObjectInfo>> {
		self.driver.find_objects(
			session,
			&SearchFilter {
				id: id.map(|id| id.as_bytes().to_vec()),
				label: label.map(str::to_string),
				class: Some(class),
			},
		)
	}

	fn has_certificate(
		&self,
		session: SessionHandle,
		issuer: &[u8],
		serial: &[u8],
	) -> Result<bool> {
		let certificates = self.driver.find_objects(
			session,
			&SearchFilter {
				class: Some(ObjectClass::Certificate),
				..Default::default()
			},
		)?;

		for object in certificates {
			let der = self.driver.read_certificate(session, object.handle)?;
			let cert = self.provider.der_to_cert(&der)?;

			if cert.issuer == issuer && cert.serial == serial {
				return Ok(true);
			}
		}

		Ok(false)
	}
}

impl Hsm for Pkcs11Module {
	fn set_owner(&self, password: &str) -> Result<()> {
		let mut state = self.state.lock().unwrap();

		let slot_id = self.resolve_slot(&state)?;
		state.slot_id = slot_id;
		state.pending_keys.clear();

		self.close_session(&mut state);
		self.driver.close_all_sessions(state.slot_id)?;

		state.user_pin = match state.tee_login {
			Some(TeeLoginType::Public) => TeeLoginType::Public.to_string(),
			Some(login) => format!("{login}:{}", Uuid::new_v4()),
			None => {
				let path = self
					.config
					.user_pin_path
					.as_ref()
					.ok_or_else(|| Error::invalid_argument("user PIN path is not configured"))?;

				match read_pin_file(path) {
					Ok(pin) => pin,
					Err(_) => {
						let pin = hex::encode(rand::random::<[u8; PIN_LENGTH_BYTES]>());
						write_pin_file(path, &pin)?;
						pin
					},
				}
			},
		};

		debug!(
			"init token: slot = {}, label = {}",
			state.slot_id, state.token_label
		);

		self
			.driver
			.init_token(state.slot_id, password, &state.token_label)?;

		let session = self.create_session(&mut state, false, password)?;
		let result = self.driver.init_pin(session, &state.user_pin);

		self.close_session(&mut state);

		result
	}

	fn clear(&self) -> Result<()> {
		let mut state = self.state.lock().unwrap();

		if !self.is_owned(state.slot_id)? {
			return Ok(());
		}

		let session = self.create_session(&mut state, true, "")?;

		let objects = self.driver.find_objects(
			session,
			&SearchFilter {
				label: Some(self.cert_type.clone()),
				..Default::default()
			},
		)?;

		let mut first_error = None;

		for object in objects {
			debug!("destroy object: handle = {}", object.handle);

			if let Err(e) = self.driver.destroy_object(session, object.handle) {
				error!("can't delete object: handle = {}, error = {e}", object.handle);
				first_error.get_or_insert(e);
			}
		}

		self.close_session(&mut state);

		match first_error {
			Some(e) => Err(e),
			None => Ok(()),
		}
	}

	fn create_key(&self, _password: &str, key_type: KeyType) -> Result<Arc<dyn PrivateKey>> {
		let mut state = self.state.lock().unwrap();

		let id = Uuid::new_v4();
		let session = self.create_session(&mut state, true, "")?;

		let pair = self
			.driver
			.generate_key_pair(session, key_type, id.as_bytes(), &self.cert_type)?;

		if let Err(e) = self.token_mem_info(state.slot_id) {
			let _ = self.driver.destroy_object(session, pair.private_key);
			let _ = self.driver.destroy_object(session, pair.public_key);
			return Err(e);
		}

		let key = Arc::new(Pkcs11PrivateKey {
			driver: self.driver.clone(),
			session,
			handle: pair.private_key,
			key_type,
			public: pair.public,
		});

		let evicted = if state.pending_keys.len() >= self.config.max_certificates {
			warn!(
				"max pending keys reached, remove oldest: type = {}",
				self.cert_type
			);
			state.pending_keys.pop_front()
		} else {
			None
		};

		state.pending_keys.push_back(PendingKey {
			id,
			private_key: pair.private_key,
			public_key: pair.public_key,
			key: key.clone(),
		});

		// Destroy evicted material after the module lock is released.
		drop(state);

		if let Some(old) = evicted {
			for handle in [old.private_key, old.public_key] {
				if let Err(e) = self.driver.destroy_object(session, handle) {
					error!("can't delete pending key: handle = {handle}, error = {e}");
				}
			}
		}

		Ok(key)
	}

	fn apply_cert(&self, chain: &[Certificate]) -> Result<(CertInfo, String)> {
		let mut state = self.state.lock().unwrap();

		let leaf = chain
			.first()
			.ok_or_else(|| Error::not_found("empty certificate chain"))?;

		let session = self.create_session(&mut state, true, "")?;

		let position = state
			.pending_keys
			.iter()
			.position(|pending| pending.key.public_key() == &leaf.public_key);

		let Some(position) = position else {
			error!("no corresponding key found: type = {}", self.cert_type);
			return Err(Error::not_found("no pending key matches the leaf certificate"));
		};

		let pending = state.pending_keys.remove(position).unwrap();

		self
			.driver
			.import_certificate(session, pending.id.as_bytes(), &self.cert_type, &leaf.der)?;

		for cert in &chain[1..] {
			if self.has_certificate(session, &cert.issuer, &cert.serial)? {
				continue;
			}

			// Imported under a fresh id so several modules can share a CA
			// without duplicate serial conflicts.
			let ca_id = Uuid::new_v4();
			self
				.driver
				.import_certificate(session, ca_id.as_bytes(), &self.cert_type, &cert.der)?;
		}

		let url = self.create_url(&state, &self.cert_type, &pending.id);

		let info = CertInfo {
			issuer: leaf.issuer.clone(),
			serial: leaf.serial.clone(),
			cert_url: url.clone(),
			key_url: url,
			not_after: leaf.not_after,
		};

		debug!("certificate applied: cert = {info}");

		Ok((info, state.user_pin.clone()))
	}

	fn remove_cert(&self, cert_url: &str, _password: &str) -> Result<()> {
		let mut state = self.state.lock().unwrap();

		let parsed = uri::decode_pkcs11_url(cert_url)?;
		let session = self.create_session(&mut state, true, "")?;

		let objects = self.find_objects(
			session,
			ObjectClass::Certificate,
			Some(&parsed.id),
			Some(&parsed.label),
		)?;

		if objects.is_empty() {
			return Err(Error::not_found(format!("certificate not found: {cert_url}")));
		}

		for object in objects {
			self.driver.destroy_object(session, object.handle)?;
		}

		Ok(())
	}

	fn remove_key(&self, key_url: &str, _password: &str) -> Result<()> {
		let mut state = self.state.lock().unwrap();

		let parsed = uri::decode_pkcs11_url(key_url)?;
		let session = self.create_session(&mut state, true, "")?;

		let private_keys = self.find_objects(
			session,
			ObjectClass::PrivateKey,
			Some(&parsed.id),
			Some(&parsed.label),
		)?;

		if private_keys.is_empty() {
			return Err(Error::not_found(format!("private key not found: {key_url}")));
		}

		for object in private_keys {
			self.driver.destroy_object(session, object.handle)?;
		}

		// The public half shares the id; it may already be gone.
		for object in self.find_objects(
			session,
			ObjectClass::PublicKey,
			Some(&parsed.id),
			Some(&parsed.label),
		)? {
			self.driver.destroy_object(session, object.handle)?;
		}

		Ok(())
	}

	fn validate_certificates(&self) -> Result<ValidationResult> {
		let mut state = self.state.lock().unwrap();

		if !self.is_owned(state.slot_id)? {
			return Ok(ValidationResult::default());
		}

		let session = self.create_session(&mut state, true, "")?;

		let certificates =
			self.find_objects(session, ObjectClass::Certificate, None, Some(&self.cert_type))?;
		let private_keys =
			self.find_objects(session, ObjectClass::PrivateKey, None, Some(&self.cert_type))?;
		let public_keys =
			self.find_objects(session, ObjectClass::PublicKey, None, Some(&self.cert_type))?;

		let mut cert_used = vec![false; certificates.len()];
		let mut public_used = vec![false; public_keys.len()];
		let mut private_used = vec![false; private_keys.len()];

		let mut result = ValidationResult::default();

		for (key_index, private_key) in private_keys.iter().enumerate() {
			debug!("private key found: id = {}", hex::encode(&private_key.id));

			let Some(public_index) = public_keys
				.iter()
				.enumerate()
				.position(|(i, object)| !public_used[i] && object.id == private_key.id)
			else {
				continue;
			};

			let Some(cert_index) = certificates
				.iter()
				.enumerate()
				.position(|(i, object)| !cert_used[i] && object.id == private_key.id)
			else {
				continue;
			};

			let (Some(cert_id), Some(key_id)) = (
				object_uuid(&certificates[cert_index]),
				object_uuid(private_key),
			) else {
				continue;
			};

			let der = self
				.driver
				.read_certificate(session, certificates[cert_index].handle)?;
			let cert = self.provider.der_to_cert(&der)?;

			result.valid_certs.push(CertInfo {
				issuer: cert.issuer,
				serial: cert.serial,
				cert_url: self.create_url(&state, &self.cert_type, &cert_id),
				key_url: self.create_url(&state, &self.cert_type, &key_id),
				not_after: cert.not_after,
			});

			cert_used[cert_index] = true;
			public_used[public_index] = true;
			private_used[key_index] = true;
		}

		for (index, object) in certificates.iter().enumerate() {
			if cert_used[index] {
				continue;
			}
			if let Some(id) = object_uuid(object) {
				result
					.invalid_certs
					.push(self.create_url(&state, &self.cert_type, &id));
			} else {
				warn!("certificate object without UUID id: handle = {}", object.handle);
			}
		}

		for (used, objects) in [(&private_used, &private_keys), (&public_used, &public_keys)] {
			for (index, object) in objects.iter().enumerate() {
				if used[index] {
					continue;
				}
				if let Some(id) = object_uuid(object) {
					result
						.invalid_keys
						.push(self.create_url(&state, &self.cert_type, &id));
				} else {
					warn!("key object without UUID id: handle = {}", object.handle);
				}
			}
		}

		Ok(result)
	}
}

fn object_uuid(object: &ObjectInfo) -> Option<Uuid> {
	Uuid::from_slice(&object.id).ok()
}

fn tee_login_from_env() -> Result<Option<TeeLoginType>> {
	match std::env::var(ENV_TEE_LOGIN_TYPE) {
		Ok(value) if value.is_empty() => Ok(None),
		Ok(value) => value.parse().map(Some),
		Err(_) => Ok(None),
	}
}

fn read_pin_file(path: &Path) -> Result<String> {
	let pin = std::fs::read_to_string(path)?;
	Ok(pin.trim().to_string())
}

#[cfg(unix)]
fn write_pin_file(path: &Path, pin: &str) -> Result<()> {
	use std::os::unix::fs::OpenOptionsExt;

	let mut file = std::fs::OpenOptions::new()
		.write(true)
		.create(true)
		.truncate(true)
		.mode(0o600)
		.open(path)?;

	file.write_all(pin.as_bytes())?;

	Ok(())
}

#[cfg(not(unix))]
fn write_pin_file(path: &Path, pin: &str) -> Result<()> {
	std::fs::write(path, pin)?;
	Ok(())
}

#[cfg(test)]
#[path = "module_tests.rs"]
mod tests;
