use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::certhandler::hsm::Hsm;
use crate::certhandler::storage::CertStorage;
use crate::crypto::{self, CertTemplate, CsrTemplate, Extension, KeyType, PrivateKey};
use crate::errors::{Error, ErrorKind, Result};
use crate::types::CertInfo;

const OID_EXTENSION_EXTENDED_KEY_USAGE: &str = "2.5.29.37";
const OID_EXT_KEY_USAGE_CLIENT_AUTH: &str = "1.3.6.1.5.5.7.3.1";
const OID_EXT_KEY_USAGE_SERVER_AUTH: &str = "1.3.6.1.5.5.7.3.2";

/// Subject and issuer of locally bootstrapped certificates.
const SELF_SIGNED_SUBJECT: &str = "CN=Aos Core";
const SELF_SIGNED_VALIDITY: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Extended key usage tags that can be requested in CSRs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExtendedKeyUsage {
	ClientAuth,
	ServerAuth,
}

impl ExtendedKeyUsage {
	fn oid(&self) -> &'static str {
		match self {
			ExtendedKeyUsage::ClientAuth => OID_EXT_KEY_USAGE_CLIENT_AUTH,
			ExtendedKeyUsage::ServerAuth => OID_EXT_KEY_USAGE_SERVER_AUTH,
		}
	}
}

/// Per-certificate-type policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleConfig {
	pub key_type: KeyType,
	pub max_certificates: usize,
	#[serde(default)]
	pub extended_key_usage: Vec<ExtendedKeyUsage>,
	#[serde(default)]
	pub alternative_names: Vec<String>,
	#[serde(default)]
	pub skip_validation: bool,
	#[serde(default)]
	pub is_self_signed: bool,
}

impl ModuleConfig {
	fn validate(&self) -> Result<()> {
		if self.max_certificates == 0 {
			return Err(Error::invalid_argument("max_certificates must be positive"));
		}
		Ok(())
	}
}

#[derive(Default)]
struct ModuleState {
	invalid_certs: Vec<String>,
	invalid_keys: Vec<String>,
}

/// Manages all certificates of one certificate type on top of one HSM.
///
/// Construction runs the storage/HSM reconciliation; afterwards the set of
/// URLs in storage for this type equals the set the HSM reports as valid.
pub struct CertModule {
	cert_type: String,
	config: ModuleConfig,
	provider: Arc<crypto::Provider>,
	hsm: Box<dyn Hsm>,
	storage: Arc<dyn CertStorage>,
	state: Mutex<ModuleState>,
}

impl CertModule {
	pub fn new(
		cert_type: impl Into<String>,
		config: ModuleConfig,
		provider: Arc<crypto::Provider>,
		hsm: Box<dyn Hsm>,
		storage: Arc<dyn CertStorage>,
	) -> Result<Self> {
		config.validate()?;

		let module = Self {
			cert_type: cert_type.into(),
			config,
			provider,
			hsm,
			storage,
			state: Mutex::new(ModuleState::default()),
		};

		module.init()?;

		Ok(module)
	}

	pub fn cert_type(&self) -> &str {
		&self.cert_type
	}

	pub fn config(&self) -> &ModuleConfig {
		&self.config
	}

	fn init(&self) -> Result<()> {
		if self.config.skip_validation {
			warn!("skip validation: type = {}", self.cert_type);
			return Ok(());
		}

		let validation = self.hsm.validate_certificates()?;

		let mut state = self.state.lock().unwrap();
		state.invalid_certs = validation.invalid_certs;
		state.invalid_keys = validation.invalid_keys;

		self.sync_valid_certs(&validation.valid_certs)
	}

	/// Returns the record with the given issuer and serial; with an empty
	/// serial, the earliest-expiring record of this type (the next rotation
	/// candidate).
	pub fn get_certificate(&self, issuer: &[u8], serial: &[u8]) -> Result<CertInfo> {
		let _state = self.state.lock().unwrap();

		if serial.is_empty() {
			let certs = self.storage.get_certs_info(&self.cert_type)?;

			return certs
				.into_iter()
				.min_by_key(|cert| cert.not_after)
				.ok_or_else(|| {
					Error::not_found(format!("no certificates for type {}", self.cert_type))
				});
		}

		self.storage.get_cert_info(issuer, serial)
	}

	pub fn set_owner(&self, password: &str) -> Result<()> {
		let _state = self.state.lock().unwrap();
		self.hsm.set_owner(password)
	}

	pub fn clear(&self) -> Result<()> {
		let _state = self.state.lock().unwrap();

		self.hsm.clear()?;
		self.storage.remove_all_certs_info(&self.cert_type)
	}

	/// Generates a private key, removing any invalid material discovered by
	/// the init reconciliation first.
	pub fn create_key(&self, password: &str) -> Result<Arc<dyn PrivateKey>> {
		let mut state = self.state.lock().unwrap();
		self.create_key_locked(&mut state, password)
	}

	/// Builds a PEM CSR for the given subject common name, signed with `key`.
	pub fn create_csr(&self, subject_common_name: &str, key: Arc<dyn PrivateKey>) -> Result<String> {
		let _state = self.state.lock().unwrap();
		self.create_csr_locked(subject_common_name, key)
	}

	/// Validates and applies a PEM certificate chain, then trims the oldest
	/// certificates until the configured maximum holds.
	pub fn apply_cert(&self, pem_chain: &str) -> Result<CertInfo> {
		let _state = self.state.lock().unwrap();
		self.apply_cert_locked(pem_chain)
	}

	/// Bootstraps this type with a locally issued certificate.
	pub fn create_self_signed_cert(&self, password: &str) -> Result<CertInfo> {
		let mut state = self.state.lock().unwrap();

		let key = self.create_key_locked(&mut state, password)?;

		let now = SystemTime::now();
		let serial = now
			.duration_since(UNIX_EPOCH)
			.map_err(|e| Error::wrap(ErrorKind::Runtime, "system clock before epoch", e))?
			.as_nanos() as u64;

		let subject = self.provider.asn1_encode_dn(SELF_SIGNED_SUBJECT)?;

		let templ = CertTemplate {
			subject: subject.clone(),
			issuer: subject,
			serial: serial.to_be_bytes().to_vec(),
			not_before: now,
			not_after: now + SELF_SIGNED_VALIDITY,
		};

		let pem = self.provider.create_certificate(&templ, &templ, key)?;

		self.apply_cert_locked(&pem)
	}

	fn create_key_locked(
		&self,
		state: &mut ModuleState,
		password: &str,
	) -> Result<Arc<dyn PrivateKey>> {
		for url in state.invalid_certs.drain(..) {
			debug!("remove invalid cert: type = {}, url = {url}", self.cert_type);
			self.hsm.remove_cert(&url, password)?;
		}

		for url in state.invalid_keys.drain(..) {
			debug!("remove invalid key: type = {}, url = {url}", self.cert_type);
			self.hsm.remove_key(&url, password)?;
		}

		self.hsm.create_key(password, self.config.key_type)
	}

	fn create_csr_locked(&self, subject_common_name: &str, key: Arc<dyn PrivateKey>) -> Result<String> {
		let mut templ = CsrTemplate {
			subject: self
				.provider
				.asn1_encode_dn(&format!("CN={subject_common_name}"))?,
			dns_names: self.config.alternative_names.clone(),
			extra_extensions: Vec::new(),
		};

		let oids: Vec<&str> = self
			.config
			.extended_key_usage
			.iter()
			.map(ExtendedKeyUsage::oid)
			.collect();

		if !oids.is_empty() {
			templ.extra_extensions.push(Extension {
				oid: OID_EXTENSION_EXTENDED_KEY_USAGE.to_string(),
				value: self.provider.asn1_encode_object_ids(&oids)?,
			});
		}

		self.provider.create_csr(&templ, key)
	}

	fn apply_cert_locked(&self, pem_chain: &str) -> Result<CertInfo> {
		let chain = self.provider.pem_to_certs(pem_chain)?;

		self.check_cert_chain(&chain)?;

		let (info, password) = self.hsm.apply_cert(&chain)?;

		self.storage.add_cert_info(&self.cert_type, &info)?;

		self.trim_certs(&password)?;

		Ok(info)
	}

	/// Walks from the leaf towards a self-issued root. The parent of a
	/// certificate is located by issuer/subject match or, when an authority
	/// key id is present, by authority/subject key id match.
	fn check_cert_chain(&self, chain: &[crypto::Certificate]) -> Result<()> {
		if chain.is_empty() {
			return Err(Error::not_found("empty certificate chain"));
		}

		for cert in chain {
			debug!(
				"check certificate chain: issuer = {}, subject = {}",
				self.provider.asn1_decode_dn(&cert.issuer).unwrap_or_default(),
				self.provider.asn1_decode_dn(&cert.subject).unwrap_or_default(),
			);
		}

		let mut visited = vec![false; chain.len()];
		let mut current = 0;

		while !(chain[current].issuer.is_empty() || chain[current].is_self_issued()) {
			visited[current] = true;

			let parent = chain.iter().enumerate().position(|(i, candidate)| {
				i != current
					&& (chain[current].issuer == candidate.subject
						|| (!chain[current].authority_key_id.is_empty()
							&& chain[current].authority_key_id == candidate.subject_key_id))
			});

			let Some(parent) = parent else {
				return Err(Error::not_found("certificate chain is incomplete"));
			};

			// A lateral or circular reference can never reach a self-issued
			// root; bail out instead of spinning.
			if visited[parent] {
				return Err(Error::failed(
					"certificate chain does not terminate at a self-issued certificate",
				));
			}

			current = parent;
		}

		Ok(())
	}

	fn trim_certs(&self, password: &str) -> Result<()> {
		let mut certs = self.storage.get_certs_info(&self.cert_type)?;

		if certs.len() > self.config.max_certificates {
			warn!(
				"certificate count exceeds max count: {} > {}, remove old certificates",
				certs.len(),
				self.config.max_certificates
			);
		}

		while certs.len() > self.config.max_certificates {
			let oldest = certs
				.iter()
				.enumerate()
				.min_by_key(|(_, cert)| cert.not_after)
				.map(|(i, _)| i)
				.unwrap();
			let info = certs.remove(oldest);

			self.hsm.remove_cert(&info.cert_url, password)?;
			self.hsm.remove_key(&info.key_url, password)?;
			self.storage.remove_cert_info(&self.cert_type, &info.cert_url)?;
		}

		Ok(())
	}

	/// Brings storage in line with the HSM's valid set: missing records are
	/// added, records the HSM no longer backs are dropped.
	fn sync_valid_certs(&self, valid_certs: &[CertInfo]) -> Result<()> {
		let mut stored = match self.storage.get_certs_info(&self.cert_type) {
			Ok(certs) => certs,
			Err(e) if e.is(ErrorKind::NotFound) => Vec::new(),
			Err(e) => return Err(e),
		};

		for cert in valid_certs {
			if let Some(pos) = stored.iter().position(|stored| stored == cert) {
				stored.remove(pos);
			} else {
				warn!(
					"add missing cert to storage: type = {}, cert = {cert}",
					self.cert_type
				);
				self.storage.add_cert_info(&self.cert_type, cert)?;
			}
		}

		for cert in stored {
			warn!(
				"remove invalid cert from storage: type = {}, cert = {cert}",
				self.cert_type
			);
			self.storage.remove_cert_info(&self.cert_type, &cert.cert_url)?;
		}

		Ok(())
	}
}

#[cfg(test)]
#[path = "module_tests.rs"]
mod tests;
