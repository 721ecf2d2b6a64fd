use crate::validator::ValidationFailure;
use std::fmt;

/// Coarse classification of an [`AppError`], used in logs and when deciding
/// how a failure is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Transport,
    Validation,
    Internal,
    Broker,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Transport => "transport",
            ErrorKind::Validation => "validation",
            ErrorKind::Internal => "internal",
            ErrorKind::Broker => "broker",
        }
    }
}

/// Application-specific error types.
#[derive(Debug, Clone)]
pub enum AppError {
    /// A record the worker depends on was absent.
    NotFound(String),
    /// Error talking to an external HTTP API.
    Transport(String),
    /// The request was rejected by business validation.
    Validation(ValidationFailure),
    /// Anything else that went wrong inside the worker.
    Internal(String),
    /// Error talking to the message broker.
    Broker(String),
    /// Error with context chain for better debugging.
    WithContext {
        /// The underlying source of the error.
        source: Box<AppError>,
        /// Additional context message.
        context: String,
    },
}

impl AppError {
    /// Kind of the innermost error, looking through any context wrappers.
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::NotFound(_) => ErrorKind::NotFound,
            AppError::Transport(_) => ErrorKind::Transport,
            AppError::Validation(_) => ErrorKind::Validation,
            AppError::Internal(_) => ErrorKind::Internal,
            AppError::Broker(_) => ErrorKind::Broker,
            AppError::WithContext { source, .. } => source.kind(),
        }
    }

    /// Validation failure carried by this error, if any.
    pub fn validation_failure(&self) -> Option<ValidationFailure> {
        match self {
            AppError::Validation(failure) => Some(*failure),
            AppError::WithContext { source, .. } => source.validation_failure(),
            _ => None,
        }
    }

    /// Text written into a Failed status entry.
    ///
    /// Validation failures use their reason message verbatim, every other
    /// kind uses its bare message without the kind prefix.
    pub fn status_message(&self) -> String {
        match self {
            AppError::NotFound(msg)
            | AppError::Transport(msg)
            | AppError::Internal(msg)
            | AppError::Broker(msg) => msg.clone(),
            AppError::Validation(failure) => failure.message().to_string(),
            AppError::WithContext { source, .. } => source.status_message(),
        }
    }
}

impl fmt::Display for AppError {
    /// Formats the error for display.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::Transport(msg) => write!(f, "External API error: {}", msg),
            AppError::Validation(failure) => {
                write!(f, "Validation failed [{}]: {}", failure.code(), failure.message())
            }
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::Broker(msg) => write!(f, "Broker error: {}", msg),
            AppError::WithContext { source, context } => {
                write!(f, "{}: {}", context, source)
            }
        }
    }
}

impl std::error::Error for AppError {}

impl From<reqwest::Error> for AppError {
    /// Converts a `reqwest::Error` into an `AppError`.
    fn from(err: reqwest::Error) -> Self {
        AppError::Transport(err.to_string())
    }
}

impl From<lapin::Error> for AppError {
    /// Converts a `lapin::Error` into an `AppError`.
    fn from(err: lapin::Error) -> Self {
        AppError::Broker(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Internal(format!("JSON error: {}", err))
    }
}

impl From<ValidationFailure> for AppError {
    fn from(failure: ValidationFailure) -> Self {
        AppError::Validation(failure)
    }
}

/// Extension trait for adding context to errors.
/// Similar to `anyhow::Context` but for our `AppError` type.
pub trait ResultExt<T> {
    /// Add context to an error.
    ///
    /// # Arguments
    ///
    /// * `context` - The context message to add.
    fn context(self, context: impl Into<String>) -> Result<T, AppError>;

    /// Add context lazily (only evaluated on error).
    ///
    /// # Arguments
    ///
    /// * `f` - A closure that produces the context message.
    fn with_context<F>(self, f: F) -> Result<T, AppError>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T, AppError> {
    fn context(self, context: impl Into<String>) -> Result<T, AppError> {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(e),
            context: context.into(),
        })
    }

    fn with_context<F>(self, f: F) -> Result<T, AppError>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(e),
            context: f(),
        })
    }
}

/// Extension for lapin::Error to add context
impl<T> ResultExt<T> for Result<T, lapin::Error> {
    fn context(self, context: impl Into<String>) -> Result<T, AppError> {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(AppError::from(e)),
            context: context.into(),
        })
    }

    fn with_context<F>(self, f: F) -> Result<T, AppError>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(AppError::from(e)),
            context: f(),
        })
    }
}
