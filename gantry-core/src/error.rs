// Error types for the Gantry framework

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// A typed HTTP error carrying its status code. The dispatcher renders
    /// it as `{"message": …}` with the given code.
    #[error("{message}")]
    Http { code: u16, message: String },

    #[error("route not found: {0}")]
    NotFound(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("timed out: {0}")]
    Timeout(String),

    /// An option refused at startup. Fails startup, never a request.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    /// A shutdown hook failed; carries the index of the first failure.
    #[error("shutdown hook {index} failed: {message}")]
    ShutdownHook { index: usize, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Build a typed HTTP error with an explicit status code.
    pub fn http(code: u16, message: impl Into<String>) -> Self {
        Error::Http {
            code,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::http(400, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::http(401, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::http(403, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Error::NotFound(message.into())
    }

    pub fn too_many_requests(message: impl Into<String>) -> Self {
        Self::http(429, message)
    }

    /// The HTTP status code this error renders with.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Http { code, .. } => *code,
            Error::NotFound(_) => 404,
            Error::Timeout(_) => 504,
            _ => 500,
        }
    }

    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status_code())
    }

    pub fn is_server_error(&self) -> bool {
        self.status_code() >= 500
    }
}
