use thiserror::Error;

pub type Result<T> = std::result::Result<T, DroverError>;

#[derive(Debug, Error)]
pub enum DroverError {
	/// Unknown session id.
	#[error("session not found: {0}")]
	NotFound(String),

	/// Reservation requested on a session that already has a holder.
	#[error("session already reserved: {0}")]
	AlreadyReserved(String),

	/// A remote call exceeded its hard deadline.
	#[error("timeout after {ms}ms during {operation}")]
	Timeout { ms: u64, operation: String },

	/// Optimistic transaction aborted after exhausting its retry budget.
	///
	/// Internal: read paths degrade to "no data" instead of surfacing this;
	/// it escapes only from mutations that could not commit.
	#[error("transaction conflict on {key} after {attempts} attempts")]
	TxnConflict { key: String, attempts: u32 },

	/// Execution node unreachable or answered with a protocol-level error.
	#[error("remote node failure at {endpoint}: {message}")]
	Remote { endpoint: String, message: String },

	/// A stored field could not be decoded into its typed form.
	#[error("decode failed for field {field}: {value:?}")]
	Decode { field: &'static str, value: String },

	/// Store adapter failure outside the optimistic protocol.
	#[error("store failure: {0}")]
	Store(String),

	/// Broken or unusable broker configuration.
	#[error("configuration error: {0}")]
	Config(String),

	#[error(transparent)]
	Io(#[from] std::io::Error),

	#[error(transparent)]
	Json(#[from] serde_json::Error),

	#[error(transparent)]
	Http(#[from] reqwest::Error),
}

impl DroverError {
	/// Builds a remote failure from any displayable cause.
	pub fn remote(endpoint: impl Into<String>, err: impl std::fmt::Display) -> Self {
		DroverError::Remote {
			endpoint: endpoint.into(),
			message: err.to_string(),
		}
	}

	/// True for failures that mark a session unhealthy during a sweep.
	pub fn evicts_on_refresh(&self) -> bool {
		matches!(self, DroverError::Timeout { .. } | DroverError::Remote { .. } | DroverError::Http(_))
	}
}
