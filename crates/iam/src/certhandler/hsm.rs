use std::sync::Arc;

use crate::crypto::{Certificate, KeyType, PrivateKey};
use crate::errors::Result;
use crate::types::CertInfo;

/// Result of [`Hsm::validate_certificates`]: URLs of orphaned material plus
/// the set of complete (key + certificate) credentials the HSM holds.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
	pub invalid_certs: Vec<String>,
	pub invalid_keys: Vec<String>,
	pub valid_certs: Vec<CertInfo>,
}

/// Platform dependent secure certificate storage.
///
/// Implementations are free to keep the material on a PKCS#11 token, in a
/// TEE or on the filesystem; the certificate module only ever addresses it
/// through URLs and [`CertInfo`] records.
pub trait Hsm: Send + Sync {
	/// Takes ownership of the underlying store using the given owner
	/// password.
	fn set_owner(&self, password: &str) -> Result<()>;

	/// Removes all material belonging to this module.
	fn clear(&self) -> Result<()>;

	/// Generates a private key and returns a handle that can sign and expose
	/// its public half.
	fn create_key(&self, password: &str, key_type: KeyType) -> Result<Arc<dyn PrivateKey>>;

	/// Applies a leaf-first certificate chain. Returns the info record for
	/// the leaf and the owner password needed for follow-up removals.
	fn apply_cert(&self, chain: &[Certificate]) -> Result<(CertInfo, String)>;

	/// Removes the certificate addressed by `cert_url`.
	fn remove_cert(&self, cert_url: &str, password: &str) -> Result<()>;

	/// Removes the private key addressed by `key_url`.
	fn remove_key(&self, key_url: &str, password: &str) -> Result<()>;

	/// Enumerates stored material and splits it into valid credentials and
	/// orphaned certificate/key URLs.
	fn validate_certificates(&self) -> Result<ValidationResult>;
}
