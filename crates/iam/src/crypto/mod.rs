//! X.509 provider for the certificate modules.
//!
//! Certificate and CSR construction is done with `rcgen`, parsing with
//! `x509-parser`. Private keys never leave their HSM: signing goes through
//! the [`PrivateKey`] trait and is bridged into `rcgen` via its remote-key
//! support, so the same code path serves software and token-backed keys.

pub mod asn1;

use std::io::Cursor;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rcgen::{
	CertificateParams, CustomExtension, DistinguishedName, DnType, KeyPair, SanType, SerialNumber,
};
use serde::{Deserialize, Serialize};
use tracing::warn;
use x509_parser::prelude::*;
use x509_parser::x509::X509Name;

use crate::errors::{Error, ErrorKind, Result};

/// Key generation algorithm. RSA keys are 2048 bit, ECDSA keys use P-384.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum KeyType {
	#[default]
	Rsa,
	Ecdsa,
}

/// Portable public key, comparable across HSM exports and parsed
/// certificates. Integer components are stored without leading zero octets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublicKey {
	Rsa { modulus: Vec<u8>, exponent: Vec<u8> },
	Ecdsa { curve_oid: String, point: Vec<u8> },
}

fn trim_leading_zeros(bytes: &[u8]) -> Vec<u8> {
	let skip = bytes.iter().take_while(|b| **b == 0).count();
	if skip == bytes.len() {
		vec![0]
	} else {
		bytes[skip..].to_vec()
	}
}

impl PublicKey {
	pub fn rsa(modulus: &[u8], exponent: &[u8]) -> Self {
		PublicKey::Rsa {
			modulus: trim_leading_zeros(modulus),
			exponent: trim_leading_zeros(exponent),
		}
	}

	pub fn ecdsa(curve_oid: impl Into<String>, point: &[u8]) -> Self {
		PublicKey::Ecdsa {
			curve_oid: curve_oid.into(),
			point: point.to_vec(),
		}
	}

	pub fn key_type(&self) -> KeyType {
		match self {
			PublicKey::Rsa { .. } => KeyType::Rsa,
			PublicKey::Ecdsa { .. } => KeyType::Ecdsa,
		}
	}

	/// The raw public key bytes `rcgen` embeds into the subjectPublicKeyInfo
	/// bit string: PKCS#1 for RSA, the uncompressed point for ECDSA.
	fn raw_bytes(&self) -> Result<Vec<u8>> {
		match self {
			PublicKey::Rsa { modulus, exponent } => {
				let n = asn1::encode_big_int(modulus)?;
				let e = asn1::encode_big_int(exponent)?;
				Ok(asn1::encode_der_sequence(&[n, e]))
			},
			PublicKey::Ecdsa { point, .. } => Ok(point.clone()),
		}
	}
}

/// A signing key held by an HSM (or a software token).
///
/// `sign` receives the raw to-be-signed bytes. RSA keys produce PKCS#1 v1.5
/// SHA-256 signatures, ECDSA keys ASN.1 DER encoded ECDSA-SHA384 signatures.
pub trait PrivateKey: Send + Sync {
	fn key_type(&self) -> KeyType;
	fn public_key(&self) -> &PublicKey;
	fn sign(&self, message: &[u8]) -> Result<Vec<u8>>;
}

/// A parsed X.509 certificate, reduced to the fields the certificate
/// modules dispatch on. `subject`/`issuer` are the raw DER names.
#[derive(Debug, Clone)]
pub struct Certificate {
	pub der: Vec<u8>,
	pub subject: Vec<u8>,
	pub issuer: Vec<u8>,
	pub serial: Vec<u8>,
	pub subject_key_id: Vec<u8>,
	pub authority_key_id: Vec<u8>,
	pub not_before: SystemTime,
	pub not_after: SystemTime,
	pub public_key: PublicKey,
}

impl Certificate {
	pub fn is_self_issued(&self) -> bool {
		!self.issuer.is_empty() && self.issuer == self.subject
	}
}

/// A private key read from PEM, as DER plus its container format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedPrivateKey {
	Pkcs8(Vec<u8>),
	Sec1(Vec<u8>),
	Pkcs1(Vec<u8>),
}

/// An X.509 extension to attach to a CSR, value already DER encoded.
#[derive(Debug, Clone)]
pub struct Extension {
	pub oid: String,
	pub value: Vec<u8>,
}

/// CSR template. The subject is a DER encoded distinguished name.
#[derive(Debug, Clone, Default)]
pub struct CsrTemplate {
	pub subject: Vec<u8>,
	pub dns_names: Vec<String>,
	pub extra_extensions: Vec<Extension>,
}

/// Certificate template for locally created (self-signed) certificates.
#[derive(Debug, Clone)]
pub struct CertTemplate {
	pub subject: Vec<u8>,
	pub issuer: Vec<u8>,
	pub serial: Vec<u8>,
	pub not_before: SystemTime,
	pub not_after: SystemTime,
}

/// Bridges a [`PrivateKey`] into rcgen's remote key interface.
struct RemoteSigner {
	key: Arc<dyn PrivateKey>,
	raw_public: Vec<u8>,
}

impl RemoteSigner {
	fn new(key: Arc<dyn PrivateKey>) -> Result<Self> {
		let raw_public = key.public_key().raw_bytes()?;
		Ok(Self { key, raw_public })
	}

	fn key_pair(key: Arc<dyn PrivateKey>) -> Result<KeyPair> {
		let signer = Self::new(key)?;
		KeyPair::from_remote(Box::new(signer))
			.map_err(|e| Error::wrap(ErrorKind::Failed, "remote key setup", e))
	}
}

impl rcgen::RemoteKeyPair for RemoteSigner {
	fn public_key(&self) -> &[u8] {
		&self.raw_public
	}

	fn sign(&self, msg: &[u8]) -> std::result::Result<Vec<u8>, rcgen::Error> {
		self.key.sign(msg).map_err(|e| {
			warn!("remote signing failed: {e}");
			rcgen::Error::RemoteKeyError
		})
	}

	fn algorithm(&self) -> &'static rcgen::SignatureAlgorithm {
		match self.key.key_type() {
			KeyType::Rsa => &rcgen::PKCS_RSA_SHA256,
			KeyType::Ecdsa => &rcgen::PKCS_ECDSA_P384_SHA384,
		}
	}
}

/// Concrete crypto provider shared by all certificate modules.
#[derive(Debug, Clone, Default)]
pub struct Provider;

impl Provider {
	pub fn new() -> Self {
		Self
	}

	/// Parses a PEM bundle into certificates, in input order.
	pub fn pem_to_certs(&self, pem: &str) -> Result<Vec<Certificate>> {
		let mut reader = std::io::BufReader::new(Cursor::new(pem.as_bytes()));
		let items: std::result::Result<Vec<_>, _> = rustls_pemfile::read_all(&mut reader).collect();
		let items =
			items.map_err(|e| Error::wrap(ErrorKind::InvalidArgument, "PEM decoding", e))?;

		let mut certs = Vec::new();
		for item in items {
			if let rustls_pemfile::Item::X509Certificate(der) = item {
				certs.push(self.der_to_cert(der.as_ref())?);
			}
		}

		Ok(certs)
	}

	/// Parses a single DER certificate.
	pub fn der_to_cert(&self, der: &[u8]) -> Result<Certificate> {
		let (_, cert) = X509Certificate::from_der(der)
			.map_err(|e| Error::wrap(ErrorKind::InvalidArgument, "certificate parsing", e))?;

		let mut subject_key_id = Vec::new();
		let mut authority_key_id = Vec::new();
		for ext in cert.extensions() {
			match ext.parsed_extension() {
				ParsedExtension::SubjectKeyIdentifier(ski) => {
					subject_key_id = ski.0.to_vec();
				},
				ParsedExtension::AuthorityKeyIdentifier(aki) => {
					if let Some(key_id) = &aki.key_identifier {
						authority_key_id = key_id.0.to_vec();
					}
				},
				_ => {},
			}
		}

		Ok(Certificate {
			der: der.to_vec(),
			subject: cert.subject().as_raw().to_vec(),
			issuer: cert.issuer().as_raw().to_vec(),
			serial: cert.raw_serial().to_vec(),
			subject_key_id,
			authority_key_id,
			not_before: unix_to_system_time(cert.validity().not_before.timestamp()),
			not_after: unix_to_system_time(cert.validity().not_after.timestamp()),
			public_key: parse_spki(cert.public_key())?,
		})
	}

	/// Renders a parsed certificate back to PEM.
	pub fn cert_to_pem(&self, cert: &Certificate) -> String {
		::pem::encode(&::pem::Pem::new("CERTIFICATE", cert.der.clone()))
	}

	/// Parses a PEM private key into its DER form, keeping the container
	/// format. The key material itself stays opaque.
	pub fn pem_to_private_key(&self, pem: &str) -> Result<ParsedPrivateKey> {
		let mut reader = std::io::BufReader::new(Cursor::new(pem.as_bytes()));
		let item = rustls_pemfile::read_one(&mut reader)
			.map_err(|e| Error::wrap(ErrorKind::InvalidArgument, "PEM decoding", e))?
			.ok_or_else(|| Error::invalid_argument("no private key in PEM"))?;

		match item {
			rustls_pemfile::Item::Pkcs8Key(der) => {
				Ok(ParsedPrivateKey::Pkcs8(der.secret_pkcs8_der().to_vec()))
			},
			rustls_pemfile::Item::Sec1Key(der) => {
				Ok(ParsedPrivateKey::Sec1(der.secret_sec1_der().to_vec()))
			},
			rustls_pemfile::Item::Pkcs1Key(der) => {
				Ok(ParsedPrivateKey::Pkcs1(der.secret_pkcs1_der().to_vec()))
			},
			_ => Err(Error::invalid_argument("no private key in PEM")),
		}
	}

	/// Builds a PEM CSR from the template, signed with `key`.
	pub fn create_csr(&self, templ: &CsrTemplate, key: Arc<dyn PrivateKey>) -> Result<String> {
		let mut params = CertificateParams::default();
		params.distinguished_name = dn_to_rcgen(&templ.subject)?;

		for name in &templ.dns_names {
			let dns = name
				.as_str()
				.try_into()
				.map_err(|e| Error::wrap(ErrorKind::InvalidArgument, format!("DNS name {name}"), e))?;
			params.subject_alt_names.push(SanType::DnsName(dns));
		}

		for ext in &templ.extra_extensions {
			let arcs = asn1::oid_arcs(&ext.oid)?;
			params
				.custom_extensions
				.push(CustomExtension::from_oid_content(&arcs, ext.value.clone()));
		}

		let key_pair = RemoteSigner::key_pair(key)?;
		let csr = params
			.serialize_request(&key_pair)
			.map_err(|e| Error::wrap(ErrorKind::Failed, "CSR creation", e))?;

		csr
			.pem()
			.map_err(|e| Error::wrap(ErrorKind::Failed, "CSR encoding", e))
	}

	/// Creates a certificate from `templ`, issued under `parent` and signed
	/// with `key`. When the parent's subject equals the template's the result
	/// is self-signed.
	pub fn create_certificate(
		&self,
		templ: &CertTemplate,
		parent: &CertTemplate,
		key: Arc<dyn PrivateKey>,
	) -> Result<String> {
		let mut params = CertificateParams::default();
		params.distinguished_name = dn_to_rcgen(&templ.subject)?;
		params.serial_number = Some(SerialNumber::from(templ.serial.clone()));
		params.not_before = ::time::OffsetDateTime::from(templ.not_before);
		params.not_after = ::time::OffsetDateTime::from(templ.not_after);

		let key_pair = RemoteSigner::key_pair(key)?;

		let cert = if templ.subject == parent.subject {
			params
				.self_signed(&key_pair)
				.map_err(|e| Error::wrap(ErrorKind::Failed, "certificate creation", e))?
		} else {
			let mut issuer_params = CertificateParams::default();
			issuer_params.distinguished_name = dn_to_rcgen(&parent.subject)?;
			let issuer = issuer_params
				.self_signed(&key_pair)
				.map_err(|e| Error::wrap(ErrorKind::Failed, "issuer creation", e))?;

			params
				.signed_by(&key_pair, &issuer, &key_pair)
				.map_err(|e| Error::wrap(ErrorKind::Failed, "certificate creation", e))?
		};

		Ok(cert.pem())
	}

	pub fn asn1_encode_dn(&self, dn: &str) -> Result<Vec<u8>> {
		asn1::encode_dn(dn)
	}

	pub fn asn1_decode_dn(&self, der: &[u8]) -> Result<String> {
		asn1::decode_dn(der)
	}

	pub fn asn1_encode_object_ids(&self, oids: &[&str]) -> Result<Vec<u8>> {
		asn1::encode_object_ids(oids)
	}
}

fn unix_to_system_time(timestamp: i64) -> SystemTime {
	UNIX_EPOCH + Duration::from_secs(timestamp.try_into().unwrap_or_default())
}

fn parse_spki(spki: &SubjectPublicKeyInfo<'_>) -> Result<PublicKey> {
	match spki.parsed() {
		Ok(x509_parser::public_key::PublicKey::RSA(rsa)) => {
			Ok(PublicKey::rsa(rsa.modulus, rsa.exponent))
		},
		Ok(x509_parser::public_key::PublicKey::EC(point)) => {
			let curve_oid = spki
				.algorithm
				.parameters
				.as_ref()
				.and_then(|p| p.as_oid().ok())
				.map(|oid| oid.to_id_string())
				.ok_or_else(|| Error::invalid_argument("EC key without curve parameters"))?;
			Ok(PublicKey::ecdsa(curve_oid, point.data()))
		},
		Ok(_) => Err(Error::not_supported("unsupported public key algorithm")),
		Err(e) => Err(Error::wrap(
			ErrorKind::InvalidArgument,
			"public key parsing",
			e,
		)),
	}
}

fn dn_to_rcgen(der: &[u8]) -> Result<DistinguishedName> {
	let (_, name) = X509Name::from_der(der)
		.map_err(|e| Error::wrap(ErrorKind::InvalidArgument, "subject DN", e))?;

	let mut dn = DistinguishedName::new();
	for attr in name.iter_attributes() {
		let oid = attr.attr_type().to_id_string();
		let value = attr
			.as_str()
			.map_err(|e| Error::wrap(ErrorKind::InvalidArgument, "DN attribute value", e))?;

		let dn_type = match oid.as_str() {
			"2.5.4.3" => DnType::CommonName,
			"2.5.4.6" => DnType::CountryName,
			"2.5.4.7" => DnType::LocalityName,
			"2.5.4.8" => DnType::StateOrProvinceName,
			"2.5.4.10" => DnType::OrganizationName,
			"2.5.4.11" => DnType::OrganizationalUnitName,
			_ => DnType::CustomDnType(asn1::oid_arcs(&oid)?),
		};

		dn.push(dn_type, value);
	}

	Ok(dn)
}

#[cfg(test)]
#[path = "provider_tests.rs"]
mod tests;
