//! Explicit per-request caller context.

use serde::{Deserialize, Serialize};

/// The authenticated caller of a request.
///
/// Passed by reference into every operation that acts on behalf of a user;
/// there is no ambient "current user".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserContext {
    pub user_id: u64,
}

impl UserContext {
    pub fn new(user_id: u64) -> Self {
        Self { user_id }
    }
}
