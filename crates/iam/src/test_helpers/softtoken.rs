//! Software PKCS#11 token: a full in-memory [`Driver`] with real key
//! generation and signing, standing in for the device token in tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use ring::rand::SystemRandom;
use ring::signature::{ECDSA_P384_SHA384_ASN1_SIGNING, EcdsaKeyPair, KeyPair};
use rsa::RsaPrivateKey;
use rsa::traits::PublicKeyParts;
use sha2::{Digest, Sha256};

use crate::crypto::{KeyType, PrivateKey, PublicKey};
use crate::errors::{Error, ErrorKind, Result};
use crate::pkcs11::driver::{
	Driver, KeyPairInfo, ObjectClass, ObjectHandle, ObjectInfo, SearchFilter, SessionHandle,
	SessionState, SlotId, SlotInfo, TokenInfo, UserType,
};

const P384_OID: &str = "1.3.132.0.34";
const TOKEN_MEMORY: u64 = 64 * 1024;
const OBJECT_MEMORY: u64 = 1024;

pub(crate) enum SoftKeyMaterial {
	Rsa(RsaPrivateKey),
	Ecdsa { pkcs8: Vec<u8> },
}

pub(crate) fn generate_material(key_type: KeyType) -> Result<(SoftKeyMaterial, PublicKey)> {
	match key_type {
		KeyType::Rsa => {
			let key = RsaPrivateKey::new(&mut rand::thread_rng(), 2048)
				.map_err(|e| Error::wrap(ErrorKind::Failed, "RSA key generation", e))?;
			let public = PublicKey::rsa(&key.n().to_bytes_be(), &key.e().to_bytes_be());

			Ok((SoftKeyMaterial::Rsa(key), public))
		},
		KeyType::Ecdsa => {
			let rng = SystemRandom::new();
			let pkcs8 = EcdsaKeyPair::generate_pkcs8(&ECDSA_P384_SHA384_ASN1_SIGNING, &rng)
				.map_err(|e| Error::wrap(ErrorKind::Failed, "ECDSA key generation", e))?;
			let key_pair =
				EcdsaKeyPair::from_pkcs8(&ECDSA_P384_SHA384_ASN1_SIGNING, pkcs8.as_ref(), &rng)
					.map_err(|e| Error::wrap(ErrorKind::Failed, "ECDSA key parsing", e))?;
			let public = PublicKey::ecdsa(P384_OID, key_pair.public_key().as_ref());

			Ok((SoftKeyMaterial::Ecdsa { pkcs8: pkcs8.as_ref().to_vec() }, public))
		},
	}
}

pub(crate) fn sign_with_material(material: &SoftKeyMaterial, message: &[u8]) -> Result<Vec<u8>> {
	match material {
		SoftKeyMaterial::Rsa(key) => {
			let digest = Sha256::digest(message);
			key
				.sign(rsa::Pkcs1v15Sign::new::<Sha256>(), &digest)
				.map_err(|e| Error::wrap(ErrorKind::Failed, "RSA signing", e))
		},
		SoftKeyMaterial::Ecdsa { pkcs8 } => {
			let rng = SystemRandom::new();
			let key_pair = EcdsaKeyPair::from_pkcs8(&ECDSA_P384_SHA384_ASN1_SIGNING, pkcs8, &rng)
				.map_err(|e| Error::wrap(ErrorKind::Failed, "ECDSA key parsing", e))?;
			let signature = key_pair
				.sign(&rng, message)
				.map_err(|e| Error::wrap(ErrorKind::Failed, "ECDSA signing", e))?;

			Ok(signature.as_ref().to_vec())
		},
	}
}

/// A software private key detached from any token, for provider-level
/// tests.
pub struct SoftwareKey {
	key_type: KeyType,
	public: PublicKey,
	material: SoftKeyMaterial,
}

impl SoftwareKey {
	pub fn generate(key_type: KeyType) -> Result<Arc<dyn PrivateKey>> {
		let (material, public) = generate_material(key_type)?;

		Ok(Arc::new(Self {
			key_type,
			public,
			material,
		}))
	}
}

impl PrivateKey for SoftwareKey {
	fn key_type(&self) -> KeyType {
		self.key_type
	}

	fn public_key(&self) -> &PublicKey {
		&self.public
	}

	fn sign(&self, message: &[u8]) -> Result<Vec<u8>> {
		sign_with_material(&self.material, message)
	}
}

struct SoftObject {
	handle: ObjectHandle,
	class: ObjectClass,
	id: Vec<u8>,
	label: String,
	value: Vec<u8>,
	public: Option<PublicKey>,
	material: Option<SoftKeyMaterial>,
}

struct SoftToken {
	label: String,
	initialized: bool,
	so_pin: String,
	user_pin: String,
	objects: Vec<SoftObject>,
}

struct SoftSlot {
	description: String,
	token: Option<SoftToken>,
}

struct SoftSession {
	slot: SlotId,
	state: SessionState,
}

struct SoftState {
	slots: Vec<(SlotId, SoftSlot)>,
	sessions: HashMap<SessionHandle, SoftSession>,
	next_session: SessionHandle,
	next_object: ObjectHandle,
}

/// Initial slot layout for [`SoftDriver::with_slots`].
#[derive(Debug, Clone)]
pub struct SlotConfig {
	pub id: SlotId,
	pub token_present: bool,
	pub initialized: bool,
	pub label: String,
}

/// In-memory Cryptoki double. One instance models one library handle with
/// its slots and sessions.
pub struct SoftDriver {
	state: Mutex<SoftState>,
}

impl Default for SoftDriver {
	fn default() -> Self {
		Self::new()
	}
}

impl SoftDriver {
	/// A single slot 0 with an uninitialised token present.
	pub fn new() -> Self {
		Self::with_slots(&[SlotConfig {
			id: 0,
			token_present: true,
			initialized: false,
			label: String::new(),
		}])
	}

	pub fn with_slots(configs: &[SlotConfig]) -> Self {
		let slots = configs
			.iter()
			.map(|config| {
				let token = config.token_present.then(|| SoftToken {
					label: config.label.clone(),
					initialized: config.initialized,
					so_pin: String::new(),
					user_pin: String::new(),
					objects: Vec::new(),
				});

				(
					config.id,
					SoftSlot {
						description: format!("soft slot {}", config.id),
						token,
					},
				)
			})
			.collect();

		Self {
			state: Mutex::new(SoftState {
				slots,
				sessions: HashMap::new(),
				next_session: 1,
				next_object: 1,
			}),
		}
	}

	/// Number of token objects in `slot`, optionally filtered by label.
	pub fn object_count(&self, slot: SlotId, label: Option<&str>) -> usize {
		let state = self.state.lock().unwrap();

		state
			.slots
			.iter()
			.find(|(id, _)| *id == slot)
			.and_then(|(_, slot)| slot.token.as_ref())
			.map(|token| {
				token
					.objects
					.iter()
					.filter(|object| label.is_none_or(|label| object.label == label))
					.count()
			})
			.unwrap_or(0)
	}

	/// Number of token objects of one class in `slot` with the label.
	pub fn object_count_by_class(&self, slot: SlotId, label: &str, class: ObjectClass) -> usize {
		let state = self.state.lock().unwrap();

		state
			.slots
			.iter()
			.find(|(id, _)| *id == slot)
			.and_then(|(_, slot)| slot.token.as_ref())
			.map(|token| {
				token
					.objects
					.iter()
					.filter(|object| object.label == label && object.class == class)
					.count()
			})
			.unwrap_or(0)
	}
}

fn slot_of<'a>(state: &'a SoftState, slot: SlotId) -> Result<&'a SoftSlot> {
	state
		.slots
		.iter()
		.find(|(id, _)| *id == slot)
		.map(|(_, slot)| slot)
		.ok_or_else(|| Error::not_found(format!("unknown slot: {slot}")))
}

fn token_of<'a>(state: &'a mut SoftState, slot: SlotId) -> Result<&'a mut SoftToken> {
	state
		.slots
		.iter_mut()
		.find(|(id, _)| *id == slot)
		.and_then(|(_, slot)| slot.token.as_mut())
		.ok_or_else(|| Error::not_found(format!("no token in slot: {slot}")))
}

fn session_slot(state: &SoftState, session: SessionHandle) -> Result<SlotId> {
	state
		.sessions
		.get(&session)
		.map(|session| session.slot)
		.ok_or_else(|| Error::not_found(format!("unknown session: {session}")))
}

fn matches_filter(object: &SoftObject, filter: &SearchFilter) -> bool {
	filter.id.as_ref().is_none_or(|id| &object.id == id)
		&& filter.label.as_deref().is_none_or(|label| object.label == label)
		&& filter.class.is_none_or(|class| object.class == class)
}

impl Driver for SoftDriver {
	fn slots(&self) -> Result<Vec<SlotId>> {
		let state = self.state.lock().unwrap();
		Ok(state.slots.iter().map(|(id, _)| *id).collect())
	}

	fn slot_info(&self, slot: SlotId) -> Result<SlotInfo> {
		let state = self.state.lock().unwrap();
		let slot = slot_of(&state, slot)?;

		Ok(SlotInfo {
			description: slot.description.clone(),
			token_present: slot.token.is_some(),
		})
	}

	fn token_info(&self, slot: SlotId) -> Result<TokenInfo> {
		let state = self.state.lock().unwrap();
		let token = slot_of(&state, slot)?
			.token
			.as_ref()
			.ok_or_else(|| Error::not_found(format!("no token in slot: {slot}")))?;

		let used = token.objects.len() as u64 * OBJECT_MEMORY;

		Ok(TokenInfo {
			label: token.label.clone(),
			initialized: token.initialized,
			total_public_memory: TOKEN_MEMORY,
			free_public_memory: TOKEN_MEMORY.saturating_sub(used),
			total_private_memory: TOKEN_MEMORY,
			free_private_memory: TOKEN_MEMORY.saturating_sub(used),
		})
	}

	fn init_token(&self, slot: SlotId, so_pin: &str, label: &str) -> Result<()> {
		let mut state = self.state.lock().unwrap();

		state.sessions.retain(|_, session| session.slot != slot);

		let token = token_of(&mut state, slot)?;

		token.label = label.to_string();
		token.initialized = true;
		token.so_pin = so_pin.to_string();
		token.user_pin.clear();
		token.objects.clear();

		Ok(())
	}

	fn open_session(&self, slot: SlotId, _read_write: bool) -> Result<SessionHandle> {
		let mut state = self.state.lock().unwrap();

		if slot_of(&state, slot)?.token.is_none() {
			return Err(Error::not_found(format!("no token in slot: {slot}")));
		}

		let handle = state.next_session;
		state.next_session += 1;
		state.sessions.insert(
			handle,
			SoftSession {
				slot,
				state: SessionState::Public,
			},
		);

		Ok(handle)
	}

	fn close_session(&self, session: SessionHandle) -> Result<()> {
		let mut state = self.state.lock().unwrap();

		state
			.sessions
			.remove(&session)
			.map(|_| ())
			.ok_or_else(|| Error::not_found(format!("unknown session: {session}")))
	}

	fn close_all_sessions(&self, slot: SlotId) -> Result<()> {
		let mut state = self.state.lock().unwrap();
		state.sessions.retain(|_, session| session.slot != slot);

		Ok(())
	}

	fn session_state(&self, session: SessionHandle) -> Result<SessionState> {
		let state = self.state.lock().unwrap();

		state
			.sessions
			.get(&session)
			.map(|session| session.state)
			.ok_or_else(|| Error::not_found(format!("unknown session: {session}")))
	}

	fn login(&self, session: SessionHandle, user: UserType, pin: &str) -> Result<()> {
		let mut state = self.state.lock().unwrap();
		let slot = session_slot(&state, session)?;

		let (expected, target_state) = {
			let token = token_of(&mut state, slot)?;

			if !token.initialized {
				return Err(Error::wrong_state("token is not initialized"));
			}

			match user {
				UserType::User => (token.user_pin.clone(), SessionState::User),
				UserType::SecurityOfficer => (token.so_pin.clone(), SessionState::SecurityOfficer),
			}
		};

		let soft_session = state
			.sessions
			.get_mut(&session)
			.ok_or_else(|| Error::not_found(format!("unknown session: {session}")))?;

		if soft_session.state != SessionState::Public {
			return Err(Error::new(ErrorKind::AlreadyLoggedIn, "session is already logged in"));
		}

		if pin != expected {
			return Err(Error::failed("PIN mismatch"));
		}

		soft_session.state = target_state;

		Ok(())
	}

	fn logout(&self, session: SessionHandle) -> Result<()> {
		let mut state = self.state.lock().unwrap();

		let soft_session = state
			.sessions
			.get_mut(&session)
			.ok_or_else(|| Error::not_found(format!("unknown session: {session}")))?;

		soft_session.state = SessionState::Public;

		Ok(())
	}

	fn init_pin(&self, session: SessionHandle, pin: &str) -> Result<()> {
		let mut state = self.state.lock().unwrap();
		let slot = session_slot(&state, session)?;

		let session_state = state.sessions[&session].state;
		if session_state != SessionState::SecurityOfficer {
			return Err(Error::wrong_state("init PIN requires a security officer session"));
		}

		token_of(&mut state, slot)?.user_pin = pin.to_string();

		Ok(())
	}

	fn generate_key_pair(
		&self,
		session: SessionHandle,
		key_type: KeyType,
		id: &[u8],
		label: &str,
	) -> Result<KeyPairInfo> {
		let (material, public) = generate_material(key_type)?;

		let mut state = self.state.lock().unwrap();
		let slot = session_slot(&state, session)?;

		if state.sessions[&session].state != SessionState::User {
			return Err(Error::wrong_state("key generation requires a user session"));
		}

		let private_handle = state.next_object;
		let public_handle = state.next_object + 1;
		state.next_object += 2;

		let token = token_of(&mut state, slot)?;

		token.objects.push(SoftObject {
			handle: private_handle,
			class: ObjectClass::PrivateKey,
			id: id.to_vec(),
			label: label.to_string(),
			value: Vec::new(),
			public: Some(public.clone()),
			material: Some(material),
		});
		token.objects.push(SoftObject {
			handle: public_handle,
			class: ObjectClass::PublicKey,
			id: id.to_vec(),
			label: label.to_string(),
			value: Vec::new(),
			public: Some(public.clone()),
			material: None,
		});

		Ok(KeyPairInfo {
			private_key: private_handle,
			public_key: public_handle,
			public,
		})
	}

	fn sign(
		&self,
		session: SessionHandle,
		key: ObjectHandle,
		_key_type: KeyType,
		message: &[u8],
	) -> Result<Vec<u8>> {
		let state = self.state.lock().unwrap();
		let slot = session_slot(&state, session)?;

		let object = state
			.slots
			.iter()
			.find(|(id, _)| *id == slot)
			.and_then(|(_, slot)| slot.token.as_ref())
			.and_then(|token| token.objects.iter().find(|object| object.handle == key))
			.ok_or_else(|| Error::not_found(format!("unknown object: {key}")))?;

		let material = object
			.material
			.as_ref()
			.ok_or_else(|| Error::invalid_argument("object is not a private key"))?;

		sign_with_material(material, message)
	}

	fn import_certificate(
		&self,
		session: SessionHandle,
		id: &[u8],
		label: &str,
		der: &[u8],
	) -> Result<ObjectHandle> {
		let mut state = self.state.lock().unwrap();
		let slot = session_slot(&state, session)?;

		let handle = state.next_object;
		state.next_object += 1;

		token_of(&mut state, slot)?.objects.push(SoftObject {
			handle,
			class: ObjectClass::Certificate,
			id: id.to_vec(),
			label: label.to_string(),
			value: der.to_vec(),
			public: None,
			material: None,
		});

		Ok(handle)
	}

	fn find_objects(&self, session: SessionHandle, filter: &SearchFilter) -> Result<Vec<ObjectInfo>> {
		let mut state = self.state.lock().unwrap();
		let slot = session_slot(&state, session)?;

		Ok(
			token_of(&mut state, slot)?
				.objects
				.iter()
				.filter(|object| matches_filter(object, filter))
				.map(|object| ObjectInfo {
					handle: object.handle,
					class: object.class,
					id: object.id.clone(),
					label: object.label.clone(),
				})
				.collect(),
		)
	}

	fn read_certificate(&self, session: SessionHandle, object: ObjectHandle) -> Result<Vec<u8>> {
		let mut state = self.state.lock().unwrap();
		let slot = session_slot(&state, session)?;

		let token = token_of(&mut state, slot)?;
		let object = token
			.objects
			.iter()
			.find(|candidate| candidate.handle == object)
			.ok_or_else(|| Error::not_found(format!("unknown object: {object}")))?;

		if object.class != ObjectClass::Certificate {
			return Err(Error::invalid_argument("object is not a certificate"));
		}

		Ok(object.value.clone())
	}

	fn destroy_object(&self, session: SessionHandle, object: ObjectHandle) -> Result<()> {
		let mut state = self.state.lock().unwrap();
		let slot = session_slot(&state, session)?;

		let token = token_of(&mut state, slot)?;
		let position = token
			.objects
			.iter()
			.position(|candidate| candidate.handle == object)
			.ok_or_else(|| Error::not_found(format!("unknown object: {object}")))?;

		token.objects.remove(position);

		Ok(())
	}
}
