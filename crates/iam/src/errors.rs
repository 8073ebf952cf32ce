use std::fmt;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Classification of every error produced by this crate.
///
/// Callers dispatch on the kind; the message and wrapped cause are for
/// logging only.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
	Failed,
	InvalidArgument,
	NotFound,
	AlreadyExist,
	AlreadyLoggedIn,
	NoMemory,
	OutOfRange,
	Timeout,
	NotSupported,
	WrongState,
	Runtime,
}

impl ErrorKind {
	pub fn as_str(&self) -> &'static str {
		match self {
			ErrorKind::Failed => "failed",
			ErrorKind::InvalidArgument => "invalid argument",
			ErrorKind::NotFound => "not found",
			ErrorKind::AlreadyExist => "already exist",
			ErrorKind::AlreadyLoggedIn => "already logged in",
			ErrorKind::NoMemory => "no memory",
			ErrorKind::OutOfRange => "out of range",
			ErrorKind::Timeout => "timeout",
			ErrorKind::NotSupported => "not supported",
			ErrorKind::WrongState => "wrong state",
			ErrorKind::Runtime => "runtime error",
		}
	}
}

impl fmt::Display for ErrorKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Single tagged error type with an optional wrapped cause.
#[derive(Debug, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct Error {
	kind: ErrorKind,
	message: String,
	#[source]
	source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl Error {
	pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
		Self {
			kind,
			message: message.into(),
			source: None,
		}
	}

	/// Wraps an underlying cause (HSM, storage, filesystem, codec) so the
	/// origin stays visible in logs.
	pub fn wrap(
		kind: ErrorKind,
		message: impl Into<String>,
		source: impl std::error::Error + Send + Sync + 'static,
	) -> Self {
		Self {
			kind,
			message: message.into(),
			source: Some(Box::new(source)),
		}
	}

	pub fn kind(&self) -> ErrorKind {
		self.kind
	}

	pub fn is(&self, kind: ErrorKind) -> bool {
		self.kind == kind
	}

	pub fn failed(message: impl Into<String>) -> Self {
		Self::new(ErrorKind::Failed, message)
	}

	pub fn invalid_argument(message: impl Into<String>) -> Self {
		Self::new(ErrorKind::InvalidArgument, message)
	}

	pub fn not_found(message: impl Into<String>) -> Self {
		Self::new(ErrorKind::NotFound, message)
	}

	pub fn already_exist(message: impl Into<String>) -> Self {
		Self::new(ErrorKind::AlreadyExist, message)
	}

	pub fn no_memory(message: impl Into<String>) -> Self {
		Self::new(ErrorKind::NoMemory, message)
	}

	pub fn wrong_state(message: impl Into<String>) -> Self {
		Self::new(ErrorKind::WrongState, message)
	}

	pub fn not_supported(message: impl Into<String>) -> Self {
		Self::new(ErrorKind::NotSupported, message)
	}

	pub fn runtime(message: impl Into<String>) -> Self {
		Self::new(ErrorKind::Runtime, message)
	}
}

impl From<std::io::Error> for Error {
	fn from(err: std::io::Error) -> Self {
		let kind = match err.kind() {
			std::io::ErrorKind::NotFound => ErrorKind::NotFound,
			std::io::ErrorKind::AlreadyExists => ErrorKind::AlreadyExist,
			std::io::ErrorKind::TimedOut => ErrorKind::Timeout,
			_ => ErrorKind::Failed,
		};
		Error::wrap(kind, "io error", err)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn kind_is_preserved_through_wrap() {
		let io = std::io::Error::new(std::io::ErrorKind::Other, "disk on fire");
		let err = Error::wrap(ErrorKind::Failed, "write pin file", io);

		assert_eq!(err.kind(), ErrorKind::Failed);
		assert!(err.is(ErrorKind::Failed));
		assert!(std::error::Error::source(&err).is_some());
	}

	#[test]
	fn io_not_found_maps_to_not_found() {
		let io = std::io::Error::new(std::io::ErrorKind::NotFound, "no such file");
		let err = Error::from(io);

		assert_eq!(err.kind(), ErrorKind::NotFound);
	}

	#[test]
	fn display_includes_kind_and_message() {
		let err = Error::not_found("certificate type sm");
		assert_eq!(err.to_string(), "not found: certificate type sm");
	}
}
