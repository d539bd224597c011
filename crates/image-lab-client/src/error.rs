//! Client error types.

/// Errors that can occur when using the image-lab client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Server returned an error response.
    #[error("API error: {code} - {message}")]
    Api {
        /// Error code.
        code: String,
        /// Error message.
        message: String,
        /// HTTP status code.
        status: u16,
    },

    /// Insufficient credits.
    #[error("insufficient credits: balance={balance}, required={required}")]
    InsufficientCredits {
        /// Current balance.
        balance: i64,
        /// Required amount.
        required: i64,
    },

    /// The caller's token was rejected.
    #[error("unauthorized")]
    Unauthorized,

    /// Resource not found (unregistered user, unknown transformation).
    #[error("not found: {0}")]
    NotFound(String),

    /// A response body could not be decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl ClientError {
    /// Whether the server definitely did not act on the request: a 4xx
    /// rejection, or a connection that was never established.
    ///
    /// Decode failures, timeouts and 5xx responses are ambiguous.
    #[must_use]
    pub fn is_rejection(&self) -> bool {
        match self {
            Self::InsufficientCredits { .. } | Self::Unauthorized | Self::NotFound(_) => true,
            Self::Api { status, .. } => (400..500).contains(status),
            Self::Http(e) => e.is_connect(),
            Self::Serialization(_) | Self::Configuration(_) => false,
        }
    }
}
