use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("{0} not found")]
	NotFound(String),

	#[error("{}", .0.join(", "))]
	Validation(Vec<String>),

	#[error("{0}")]
	Unauthorized(String),

	#[error("{0}")]
	Forbidden(String),

	#[error("{0}")]
	Conflict(String),

	#[error("Inference timeout after {}ms", .0.as_millis())]
	Timeout(Duration),

	#[error("{0}")]
	ParseFailure(String),

	#[error("Configuration error: {0}")]
	ConfigError(String),

	#[error("IO error: {0}")]
	IoError(#[from] std::io::Error),

	#[error("Serialization error: {0}")]
	SerializationError(String),

	#[error("{0}")]
	Internal(String),
}

/// The fixed set of failure classes the API layer translates into responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
	NotFound,
	Validation,
	Unauthorized,
	Forbidden,
	Conflict,
	Timeout,
	ParseFailure,
	Internal,
}

impl Error {
	pub fn validation(message: impl Into<String>) -> Self {
		Error::Validation(vec![message.into()])
	}

	pub fn kind(&self) -> ErrorKind {
		match self {
			Error::NotFound(_) => ErrorKind::NotFound,
			Error::Validation(_) => ErrorKind::Validation,
			Error::Unauthorized(_) => ErrorKind::Unauthorized,
			Error::Forbidden(_) => ErrorKind::Forbidden,
			Error::Conflict(_) => ErrorKind::Conflict,
			Error::Timeout(_) => ErrorKind::Timeout,
			Error::ParseFailure(_) => ErrorKind::ParseFailure,
			Error::ConfigError(_)
			| Error::IoError(_)
			| Error::SerializationError(_)
			| Error::Internal(_) => ErrorKind::Internal,
		}
	}
}

impl From<serde_json::Error> for Error {
	fn from(err: serde_json::Error) -> Self {
		Error::SerializationError(err.to_string())
	}
}

impl From<toml::de::Error> for Error {
	fn from(err: toml::de::Error) -> Self {
		Error::SerializationError(err.to_string())
	}
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn validation_message_joins_all_entries() {
		let err = Error::Validation(vec![
			"Model name is required".to_string(),
			"Description must be 1000 characters or less".to_string(),
		]);
		assert_eq!(
			err.to_string(),
			"Model name is required, Description must be 1000 characters or less"
		);
		assert_eq!(err.kind(), ErrorKind::Validation);
	}

	#[test]
	fn storage_failures_are_internal() {
		let io = Error::from(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"));
		assert_eq!(io.kind(), ErrorKind::Internal);

		let parse = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
		assert_eq!(Error::from(parse).kind(), ErrorKind::Internal);
	}

	#[test]
	fn not_found_names_the_resource() {
		assert_eq!(Error::NotFound("Model".to_string()).to_string(), "Model not found");
	}
}
