//! Shared building blocks for the flash-sale workspace: the error taxonomy
//! every layer converts into, bounded retry, and the explicit caller context.

pub mod context;
pub mod error;
pub mod retry;
pub mod time;

pub use context::UserContext;
pub use error::{CoreError, ErrorCategory, IneligibleReason, Result};
pub use retry::RetryPolicy;
pub use self::time::{millis_after, now_millis, now_utc, unix_millis};
