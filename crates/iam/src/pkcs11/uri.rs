//! Codecs for the two URL schemes used to address stored credentials:
//! `file:<absolute-path>` and RFC 7512 style
//! `pkcs11:token=<label>;object=<label>;id=<uuid>?module-path=<path>&pin-value=<pin>`.

use std::path::PathBuf;

use uuid::Uuid;

use crate::errors::{Error, ErrorKind, Result};

pub const SCHEME_FILE: &str = "file";
pub const SCHEME_PKCS11: &str = "pkcs11";

/// Decoded form of a `pkcs11:` URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pkcs11Url {
	pub module_path: Option<String>,
	pub token: Option<String>,
	pub label: String,
	pub id: Uuid,
	pub pin: Option<String>,
}

/// Returns the scheme part of a URL.
pub fn parse_scheme(url: &str) -> Result<&str> {
	url
		.split_once(':')
		.map(|(scheme, _)| scheme)
		.ok_or_else(|| Error::invalid_argument(format!("URL without scheme: {url}")))
}

/// Extracts the path from a `file:` URL.
pub fn parse_file_url(url: &str) -> Result<PathBuf> {
	match url.split_once(':') {
		Some((SCHEME_FILE, path)) if !path.is_empty() => Ok(PathBuf::from(path)),
		_ => Err(Error::invalid_argument(format!("not a file URL: {url}"))),
	}
}

/// Builds a `pkcs11:` URL addressing the object `(label, id)` on `token`.
///
/// `module-path` is emitted only when configured; `pin-value` only when the
/// PIN is non-empty.
pub fn encode_pkcs11_url(
	token: &str,
	label: &str,
	id: &Uuid,
	module_path: Option<&str>,
	pin: &str,
) -> String {
	let mut opaque = format!("token={token}");

	if !label.is_empty() {
		opaque.push_str(&format!(";object={label}"));
	}

	opaque.push_str(&format!(";id={id}"));

	let mut query = Vec::new();
	if let Some(path) = module_path {
		query.push(format!("module-path={path}"));
	}
	if !pin.is_empty() {
		query.push(format!("pin-value={pin}"));
	}

	if query.is_empty() {
		format!("{SCHEME_PKCS11}:{opaque}")
	} else {
		format!("{SCHEME_PKCS11}:{opaque}?{}", query.join("&"))
	}
}

/// Parses a `pkcs11:` URL. `object` and `id` are required; everything else
/// is optional.
pub fn decode_pkcs11_url(url: &str) -> Result<Pkcs11Url> {
	let rest = url
		.strip_prefix(&format!("{SCHEME_PKCS11}:"))
		.ok_or_else(|| Error::invalid_argument(format!("not a pkcs11 URL: {url}")))?;

	let (opaque, query) = match rest.split_once('?') {
		Some((opaque, query)) => (opaque, Some(query)),
		None => (rest, None),
	};

	let mut token = None;
	let mut label = None;
	let mut id = None;

	for pair in opaque.split(';').filter(|pair| !pair.is_empty()) {
		let (name, value) = pair
			.split_once('=')
			.ok_or_else(|| Error::invalid_argument(format!("malformed URL attribute: {pair}")))?;

		match name {
			"token" => token = Some(value.to_string()),
			"object" => label = Some(value.to_string()),
			"id" => {
				let parsed = Uuid::parse_str(value).map_err(|e| {
					Error::wrap(ErrorKind::InvalidArgument, format!("invalid object id: {value}"), e)
				})?;
				id = Some(parsed);
			},
			_ => {},
		}
	}

	let mut module_path = None;
	let mut pin = None;

	if let Some(query) = query {
		for pair in query.split('&').filter(|pair| !pair.is_empty()) {
			let (name, value) = pair
				.split_once('=')
				.ok_or_else(|| Error::invalid_argument(format!("malformed URL query: {pair}")))?;

			match name {
				"module-path" => module_path = Some(value.to_string()),
				"pin-value" => pin = Some(value.to_string()),
				_ => {},
			}
		}
	}

	Ok(Pkcs11Url {
		module_path,
		token,
		label: label.ok_or_else(|| Error::invalid_argument("URL without object label"))?,
		id: id.ok_or_else(|| Error::invalid_argument("URL without object id"))?,
		pin,
	})
}

#[cfg(test)]
#[path = "uri_tests.rs"]
mod tests;
