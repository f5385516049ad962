use crate::http::status::StatusCode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HttpError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("URL error: {0}")]
    UrlError(#[from] url::ParseError),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Configuration error in {field}: {message}")]
    ConfigValidationError { field: String, message: String },

    #[error("Invalid value '{value}' for {field}: {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing required configuration: {field}")]
    MissingConfigError { field: String },

    #[error("Malformed request: {reason}")]
    MalformedRequest { reason: String },

    #[error("Unsupported HTTP version: {version}")]
    UnsupportedVersion { version: String },

    #[error("Request headers exceed {limit} bytes")]
    HeadersTooLarge { limit: usize },

    #[error("Request body exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },

    #[error("Timed out waiting for the request")]
    RequestTimeout,

    #[error("Response error: {message}")]
    ResponseState { message: String },

    #[error("Handler '{handler}' failed: {message}")]
    HandlerError { handler: String, message: String },

    #[error("Server is {actual}, expected {expected}")]
    ServerState { expected: String, actual: String },

    #[error("Failed to bind {address}: {source}")]
    BindError {
        address: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Io,
    Configuration,
    Protocol,
    Handler,
    Server,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl HttpError {
    pub fn malformed(reason: impl Into<String>) -> Self {
        HttpError::MalformedRequest {
            reason: reason.into(),
        }
    }

    pub fn handler(handler: impl Into<String>, message: impl Into<String>) -> Self {
        HttpError::HandlerError {
            handler: handler.into(),
            message: message.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            HttpError::IoError(_) => ErrorCategory::Io,
            HttpError::UrlError(_)
            | HttpError::MalformedRequest { .. }
            | HttpError::UnsupportedVersion { .. }
            | HttpError::HeadersTooLarge { .. }
            | HttpError::PayloadTooLarge { .. }
            | HttpError::RequestTimeout
            | HttpError::ResponseState { .. } => ErrorCategory::Protocol,
            HttpError::SerializationError(_) | HttpError::HandlerError { .. } => {
                ErrorCategory::Handler
            }
            HttpError::ConfigValidationError { .. }
            | HttpError::InvalidConfigValueError { .. }
            | HttpError::MissingConfigError { .. } => ErrorCategory::Configuration,
            HttpError::ServerState { .. } | HttpError::BindError { .. } => ErrorCategory::Server,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self.category() {
            ErrorCategory::Protocol => ErrorSeverity::Low,
            ErrorCategory::Io | ErrorCategory::Handler => ErrorSeverity::Medium,
            ErrorCategory::Configuration => ErrorSeverity::High,
            ErrorCategory::Server => ErrorSeverity::Critical,
        }
    }

    /// Status to answer with when this error surfaces while servicing a request.
    pub fn status_code(&self) -> StatusCode {
        match self {
            HttpError::MalformedRequest { .. } | HttpError::UrlError(_) => StatusCode::BadRequest,
            HttpError::UnsupportedVersion { .. } => StatusCode::HttpVersionNotSupported,
            HttpError::HeadersTooLarge { .. } => StatusCode::RequestHeaderFieldsTooLarge,
            HttpError::PayloadTooLarge { .. } => StatusCode::PayloadTooLarge,
            HttpError::RequestTimeout => StatusCode::RequestTimeout,
            _ => StatusCode::InternalServerError,
        }
    }

    pub fn recovery_suggestion(&self) -> String {
        match self {
            HttpError::BindError { .. } => {
                "Choose another port or stop the process already listening on it".to_string()
            }
            HttpError::ConfigValidationError { .. } => {
                "Check the configuration file for TOML syntax errors".to_string()
            }
            HttpError::InvalidConfigValueError { field, .. } => {
                format!("Correct the value of '{}' and try again", field)
            }
            HttpError::MissingConfigError { field } => {
                format!("Add '{}' to the configuration", field)
            }
            HttpError::ServerState { .. } => {
                "Wait for the server to finish its current transition".to_string()
            }
            HttpError::IoError(_) => "Check file permissions and available disk space".to_string(),
            _ => "Inspect the request and the handler logs".to_string(),
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self.category() {
            ErrorCategory::Configuration => format!("Configuration problem: {}", self),
            ErrorCategory::Server => format!("Server problem: {}", self),
            ErrorCategory::Io => format!("I/O problem: {}", self),
            ErrorCategory::Protocol => format!("Bad request: {}", self),
            ErrorCategory::Handler => format!("Handler problem: {}", self),
        }
    }
}

pub type Result<T> = std::result::Result<T, HttpError>;
