//! Minimal ASN.1/DER codecs used by the certificate modules: distinguished
//! names, object identifier lists and a few primitive wrappers.
//!
//! Only the DN attributes that actually appear in issued credentials are
//! supported; unknown attribute types are rejected on encode and printed by
//! dotted OID on decode.

use der::asn1::{ObjectIdentifier, OctetString, UintRef};
use der::{Decode, Encode};
use x509_parser::prelude::FromDer;
use x509_parser::x509::X509Name;

use crate::errors::{Error, ErrorKind, Result};

const TAG_UTF8_STRING: u8 = 0x0c;
const TAG_SEQUENCE: u8 = 0x30;
const TAG_SET: u8 = 0x31;

/// Attribute types understood by the DN codec, as `(abbrev, dotted oid)`.
const DN_ATTRIBUTES: &[(&str, &str)] = &[
	("CN", "2.5.4.3"),
	("C", "2.5.4.6"),
	("L", "2.5.4.7"),
	("ST", "2.5.4.8"),
	("O", "2.5.4.10"),
	("OU", "2.5.4.11"),
];

fn encode_len(len: usize, out: &mut Vec<u8>) {
	if len < 0x80 {
		out.push(len as u8);
		return;
	}

	let bytes = len.to_be_bytes();
	let skip = bytes.iter().take_while(|b| **b == 0).count();
	out.push(0x80 | (bytes.len() - skip) as u8);
	out.extend_from_slice(&bytes[skip..]);
}

fn tlv(tag: u8, content: &[u8]) -> Vec<u8> {
	let mut out = Vec::with_capacity(content.len() + 4);
	out.push(tag);
	encode_len(content.len(), &mut out);
	out.extend_from_slice(content);
	out
}

fn oid_from_str(oid: &str) -> Result<ObjectIdentifier> {
	oid
		.parse::<ObjectIdentifier>()
		.map_err(|e| Error::wrap(ErrorKind::InvalidArgument, format!("invalid OID {oid}"), e))
}

/// Encodes a single object identifier as DER.
pub fn encode_oid(oid: &str) -> Result<Vec<u8>> {
	oid_from_str(oid)?
		.to_der()
		.map_err(|e| Error::wrap(ErrorKind::Failed, "OID encoding", e))
}

/// Decodes a DER object identifier into its dotted-decimal form.
pub fn decode_oid(der: &[u8]) -> Result<String> {
	let oid = ObjectIdentifier::from_der(der)
		.map_err(|e| Error::wrap(ErrorKind::InvalidArgument, "OID decoding", e))?;
	Ok(oid.to_string())
}

/// Returns the numeric arcs of a dotted OID, e.g. `2.5.29.37` -> `[2, 5, 29, 37]`.
pub fn oid_arcs(oid: &str) -> Result<Vec<u64>> {
	oid
		.split('.')
		.map(|arc| {
			arc
				.parse::<u64>()
				.map_err(|e| Error::wrap(ErrorKind::InvalidArgument, format!("invalid OID {oid}"), e))
		})
		.collect()
}

/// Encodes a list of object identifiers as a DER SEQUENCE OF OBJECT
/// IDENTIFIER. This is the value format of the extended-key-usage extension.
pub fn encode_object_ids(oids: &[&str]) -> Result<Vec<u8>> {
	let mut content = Vec::new();
	for oid in oids {
		content.extend_from_slice(&encode_oid(oid)?);
	}
	Ok(tlv(TAG_SEQUENCE, &content))
}

/// Wraps already-encoded DER items in a SEQUENCE.
pub fn encode_der_sequence(items: &[Vec<u8>]) -> Vec<u8> {
	let mut content = Vec::new();
	for item in items {
		content.extend_from_slice(item);
	}
	tlv(TAG_SEQUENCE, &content)
}

/// Encodes an unsigned big-endian integer as a DER INTEGER.
pub fn encode_big_int(value: &[u8]) -> Result<Vec<u8>> {
	let uint = UintRef::new(value)
		.map_err(|e| Error::wrap(ErrorKind::InvalidArgument, "integer encoding", e))?;
	uint
		.to_der()
		.map_err(|e| Error::wrap(ErrorKind::Failed, "integer encoding", e))
}

/// Unwraps a DER OCTET STRING.
pub fn decode_octet_string(der: &[u8]) -> Result<Vec<u8>> {
	let os = OctetString::from_der(der)
		.map_err(|e| Error::wrap(ErrorKind::InvalidArgument, "octet string decoding", e))?;
	Ok(os.as_bytes().to_vec())
}

/// Encodes an RFC 4514 style string (`CN=Aos Core, O=EPAM`) as a DER
/// distinguished name. Attribute values are written as UTF8String, one
/// attribute per RDN, in the order given.
pub fn encode_dn(dn: &str) -> Result<Vec<u8>> {
	let mut rdns = Vec::new();

	for part in dn.split(',') {
		let part = part.trim();
		if part.is_empty() {
			continue;
		}

		let (attr, value) = part
			.split_once('=')
			.ok_or_else(|| Error::invalid_argument(format!("malformed DN component: {part}")))?;
		let attr = attr.trim();
		let value = value.trim();

		let oid = DN_ATTRIBUTES
			.iter()
			.find(|(abbrev, _)| *abbrev == attr)
			.map(|(_, oid)| *oid)
			.ok_or_else(|| Error::invalid_argument(format!("unsupported DN attribute: {attr}")))?;

		let mut atv = encode_oid(oid)?;
		atv.extend_from_slice(&tlv(TAG_UTF8_STRING, value.as_bytes()));

		rdns.extend_from_slice(&tlv(TAG_SET, &tlv(TAG_SEQUENCE, &atv)));
	}

	if rdns.is_empty() {
		return Err(Error::invalid_argument("empty DN"));
	}

	Ok(tlv(TAG_SEQUENCE, &rdns))
}

/// Decodes a DER distinguished name into its RFC 4514 style string form.
/// Inverse of [`encode_dn`] for the supported attribute set.
pub fn decode_dn(der: &[u8]) -> Result<String> {
	let (_, name) = X509Name::from_der(der)
		.map_err(|e| Error::wrap(ErrorKind::InvalidArgument, "DN decoding", e))?;

	let mut parts = Vec::new();
	for attr in name.iter_attributes() {
		let oid = attr.attr_type().to_id_string();
		let abbrev = DN_ATTRIBUTES
			.iter()
			.find(|(_, known)| *known == oid)
			.map(|(abbrev, _)| (*abbrev).to_string())
			.unwrap_or(oid);

		let value = attr
			.as_str()
			.map_err(|e| Error::wrap(ErrorKind::InvalidArgument, "DN attribute value", e))?;

		parts.push(format!("{abbrev}={value}"));
	}

	Ok(parts.join(", "))
}

#[cfg(test)]
#[path = "asn1_tests.rs"]
mod tests;
