//! Errors raised by pure domain checks.

use thiserror::Error;

pub type DomainResult<T> = Result<T, DomainError>;

/// Rejection of caller-supplied input or of a state transition.
///
/// Lookups that miss and store faults have their own errors in the
/// moderation crate; this type only covers what can be decided from the
/// values at hand.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Reason, expiry, group name or capability mask rejected.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Text that should have been an identifier did not parse.
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// The requested change is redundant with current state.
    #[error("conflict: {0}")]
    Conflict(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// Whether the caller can fix this by changing its input.
    pub fn is_input_error(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::InvalidId(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_is_not_an_input_error() {
        assert!(DomainError::validation("x").is_input_error());
        assert!(DomainError::invalid_id("x").is_input_error());
        assert!(!DomainError::conflict("x").is_input_error());
    }
}
