use std::path::PathBuf;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::errors::{Error, ErrorKind, Result};
use crate::types::CertInfo;

/// Persistent `(cert_type -> CertInfo[])` mapping.
///
/// The handler treats the storage as authoritative between restarts;
/// reconciliation on module init repairs any drift against the HSM.
pub trait CertStorage: Send + Sync {
	/// Adds a certificate info record for the given type.
	fn add_cert_info(&self, cert_type: &str, info: &CertInfo) -> Result<()>;

	/// Looks a record up by issuer and serial, across all types.
	fn get_cert_info(&self, issuer: &[u8], serial: &[u8]) -> Result<CertInfo>;

	/// Returns all records of the given type.
	fn get_certs_info(&self, cert_type: &str) -> Result<Vec<CertInfo>>;

	/// Removes the record of the given type addressed by `cert_url`.
	fn remove_cert_info(&self, cert_type: &str, cert_url: &str) -> Result<()>;

	/// Removes all records of the given type.
	fn remove_all_certs_info(&self, cert_type: &str) -> Result<()>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredCert {
	cert_type: String,
	#[serde(flatten)]
	info: CertInfo,
}

/// JSON-file backed certificate info storage.
///
/// The whole table is rewritten on every mutation; records are few and the
/// file lives on flash anyway.
pub struct FileCertStorage {
	path: PathBuf,
	entries: Mutex<Vec<StoredCert>>,
}

impl FileCertStorage {
	pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
		let path = path.into();

		let entries = if path.exists() {
			let data = std::fs::read_to_string(&path)?;
			serde_json::from_str(&data)
				.map_err(|e| Error::wrap(ErrorKind::Failed, "certificate storage parsing", e))?
		} else {
			Vec::new()
		};

		Ok(Self {
			path,
			entries: Mutex::new(entries),
		})
	}

	fn store(&self, entries: &[StoredCert]) -> Result<()> {
		let data = serde_json::to_string_pretty(entries)
			.map_err(|e| Error::wrap(ErrorKind::Failed, "certificate storage encoding", e))?;

		std::fs::write(&self.path, data)?;

		Ok(())
	}
}

impl CertStorage for FileCertStorage {
	fn add_cert_info(&self, cert_type: &str, info: &CertInfo) -> Result<()> {
		let mut entries = self.entries.lock().unwrap();

		entries.push(StoredCert {
			cert_type: cert_type.to_string(),
			info: info.clone(),
		});

		self.store(&entries)
	}

	fn get_cert_info(&self, issuer: &[u8], serial: &[u8]) -> Result<CertInfo> {
		self
			.entries
			.lock()
			.unwrap()
			.iter()
			.find(|entry| entry.info.issuer == issuer && entry.info.serial == serial)
			.map(|entry| entry.info.clone())
			.ok_or_else(|| Error::not_found("no certificate with this issuer and serial"))
	}

	fn get_certs_info(&self, cert_type: &str) -> Result<Vec<CertInfo>> {
		Ok(
			self
				.entries
				.lock()
				.unwrap()
				.iter()
				.filter(|entry| entry.cert_type == cert_type)
				.map(|entry| entry.info.clone())
				.collect(),
		)
	}

	fn remove_cert_info(&self, cert_type: &str, cert_url: &str) -> Result<()> {
		let mut entries = self.entries.lock().unwrap();

		let position = entries
			.iter()
			.position(|entry| entry.cert_type == cert_type && entry.info.cert_url == cert_url)
			.ok_or_else(|| Error::not_found(format!("no certificate with URL {cert_url}")))?;

		entries.remove(position);

		self.store(&entries)
	}

	fn remove_all_certs_info(&self, cert_type: &str) -> Result<()> {
		let mut entries = self.entries.lock().unwrap();

		entries.retain(|entry| entry.cert_type != cert_type);

		self.store(&entries)
	}
}

#[cfg(test)]
#[path = "storage_tests.rs"]
mod tests;
