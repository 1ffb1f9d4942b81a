//! Shared constants for structured API errors and dispatch outcome labels.

use std::fmt;

pub const ERROR_TYPE_API: &str = "api_error";
pub const ERROR_TYPE_TIMEOUT: &str = "timeout_error";
pub const ERROR_TYPE_INVALID_REQUEST: &str = "invalid_request_error";
pub const ERROR_TYPE_NOT_FOUND: &str = "not_found_error";
pub const ERROR_TYPE_AUTHORIZATION: &str = "authorization_error";
pub const ERROR_TYPE_RATE_LIMIT: &str = "rate_limit_error";
pub const ERROR_TYPE_DISPATCH: &str = "dispatch_error";
pub const ERROR_TYPE_STORE: &str = "store_error";

pub const DISPATCH_OUTCOME_SUCCESS: &str = "success";
pub const DISPATCH_OUTCOME_ERROR: &str = "error";
pub const DISPATCH_OUTCOME_TIMEOUT: &str = "timeout";
pub const DISPATCH_OUTCOME_NO_SERVICE: &str = "no_service";

/// Label recorded on the dispatch counter for each processed query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Success,
    Error,
    Timeout,
    NoService,
}

impl DispatchOutcome {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => DISPATCH_OUTCOME_SUCCESS,
            Self::Error => DISPATCH_OUTCOME_ERROR,
            Self::Timeout => DISPATCH_OUTCOME_TIMEOUT,
            Self::NoService => DISPATCH_OUTCOME_NO_SERVICE,
        }
    }
}

impl fmt::Display for DispatchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
