use std::fmt;

use thiserror::Error;

/// Business reasons an admission request can be turned away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IneligibleReason {
    /// The sale window has not opened yet.
    NotStarted,
    /// The sale window has closed.
    Ended,
    /// No stock left.
    SoldOut,
    /// The user already holds an order for this voucher.
    Duplicate,
}

impl IneligibleReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::Ended => "ended",
            Self::SoldOut => "sold_out",
            Self::Duplicate => "duplicate",
        }
    }
}

impl fmt::Display for IneligibleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Core error taxonomy shared by the cache engine and the admission pipeline.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CoreError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    #[error("Not eligible: {0}")]
    NotEligible(IneligibleReason),

    #[error("Lock unavailable: {key}")]
    LockUnavailable { key: String },

    #[error("Transient store error: {message}")]
    TransientStore { message: String },

    #[error("Data corruption: {message}")]
    DataCorruption { message: String },

    #[error("Admission queue full (capacity {capacity})")]
    Backpressure { capacity: usize },

    #[error("{entity} already exists: {id}")]
    Conflict { entity: String, id: String },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl CoreError {
    pub fn not_found(entity: impl Into<String>, id: impl ToString) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    pub fn lock_unavailable(key: impl Into<String>) -> Self {
        Self::LockUnavailable { key: key.into() }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::TransientStore {
            message: message.into(),
        }
    }

    pub fn corruption(message: impl Into<String>) -> Self {
        Self::DataCorruption {
            message: message.into(),
        }
    }

    pub fn conflict(entity: impl Into<String>, id: impl ToString) -> Self {
        Self::Conflict {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Whether a caller may retry the failed operation with backoff.
    ///
    /// `NotFound`, `NotEligible` and `DataCorruption` are final; retrying
    /// them can only repeat the same answer or hide a real fault.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::LockUnavailable { .. } | Self::TransientStore { .. } | Self::Backpressure { .. }
        )
    }

    /// Whether the error is meant to be shown to the end user as-is.
    pub fn is_user_visible(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. } | Self::NotEligible(_) | Self::Conflict { .. }
        )
    }

    /// Get error category for logging/monitoring
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::NotFound { .. } => ErrorCategory::NotFound,
            Self::NotEligible(_) => ErrorCategory::Business,
            Self::LockUnavailable { .. } => ErrorCategory::Contention,
            Self::TransientStore { .. } => ErrorCategory::Infrastructure,
            Self::DataCorruption { .. } => ErrorCategory::Corruption,
            Self::Backpressure { .. } => ErrorCategory::Overload,
            Self::Conflict { .. } => ErrorCategory::Conflict,
            Self::InvalidInput { .. } => ErrorCategory::Validation,
            Self::Configuration(_) => ErrorCategory::Configuration,
        }
    }
}

/// Error categories for monitoring and classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    NotFound,
    Business,
    Contention,
    Infrastructure,
    Corruption,
    Overload,
    Conflict,
    Validation,
    Configuration,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "not_found"),
            Self::Business => write!(f, "business"),
            Self::Contention => write!(f, "contention"),
            Self::Infrastructure => write!(f, "infrastructure"),
            Self::Corruption => write!(f, "corruption"),
            Self::Overload => write!(f, "overload"),
            Self::Conflict => write!(f, "conflict"),
            Self::Validation => write!(f, "validation"),
            Self::Configuration => write!(f, "configuration"),
        }
    }
}

/// Convenience result type for core operations
pub type Result<T> = std::result::Result<T, CoreError>;
