use std::fmt;

// ============================================================================
// Error Taxonomy
// ============================================================================
//
// Every module keeps its own thiserror enum. Each of them maps onto one of
// these categories so callers can decide how to react (show a message,
// retry with fresh state, back off, re-authenticate) without matching on
// module-specific variants.
//
// Cache failures have no category: they are absorbed as misses inside the
// cache layer and never reach a caller.
//
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad input shape (invalid email, empty id, bad paging arguments)
    Validation,
    /// Operation not allowed from the aggregate's current status
    InvalidStateTransition,
    /// Duplicate email or id
    UniqueConstraintViolation,
    NotFound,
    StorageFailure,
    Timeout,
    /// Stale version on commit; retry with freshly loaded state
    ConcurrencyConflict,
    /// Bad credentials, refresh failure, or no session
    AuthenticationFailure,
    RemoteFailure,
    /// Circuit breaker is open for the remote service
    Unavailable,
}

impl ErrorKind {
    /// Whether a retry with backoff can reasonably succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, ErrorKind::Timeout | ErrorKind::RemoteFailure)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::InvalidStateTransition => "invalid_state_transition",
            ErrorKind::UniqueConstraintViolation => "unique_constraint_violation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::StorageFailure => "storage_failure",
            ErrorKind::Timeout => "timeout",
            ErrorKind::ConcurrencyConflict => "concurrency_conflict",
            ErrorKind::AuthenticationFailure => "authentication_failure",
            ErrorKind::RemoteFailure => "remote_failure",
            ErrorKind::Unavailable => "unavailable",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_timeouts_and_remote_failures_are_transient() {
        assert!(ErrorKind::Timeout.is_transient());
        assert!(ErrorKind::RemoteFailure.is_transient());

        assert!(!ErrorKind::Validation.is_transient());
        assert!(!ErrorKind::ConcurrencyConflict.is_transient());
        assert!(!ErrorKind::AuthenticationFailure.is_transient());
        assert!(!ErrorKind::StorageFailure.is_transient());
        assert!(!ErrorKind::Unavailable.is_transient());
    }
}
