// =============================================================================
// Error Taxonomy
// =============================================================================
//
// §7 of the spec defines six error classes with distinct retry/propagation
// rules. `MarketError` is the shared vocabulary every component returns so
// that the (out-of-scope) HTTP layer can map a single enum to a status code
// instead of pattern-matching on component-specific error types.

use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum MarketError {
    /// Bad input; never retried.
    #[error("validation error: {0}")]
    Validation(String),

    /// Requested record does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Provider/LLM/broker call failed; retried by the pool or flush loop.
    #[error("upstream error: {0}")]
    Upstream(String),

    /// Timeout or conflict; retried with backoff.
    #[error("transient error: {0}")]
    Transient(String),

    /// Unrecoverable; triggers shutdown.
    #[error("fatal error: {0}")]
    Fatal(String),

    /// Policy rejection, distinct from connectivity failure.
    #[error("risk rejected: {0}")]
    RiskRejected(String),
}

impl MarketError {
    /// §6 HTTP status mapping, exposed for the (out-of-scope) handler layer.
    pub fn http_status(&self) -> u16 {
        match self {
            MarketError::Validation(_) => 400,
            MarketError::NotFound(_) => 404,
            MarketError::Upstream(_) => 502,
            MarketError::Transient(_) => 503,
            MarketError::Fatal(_) => 500,
            // A component that hasn't finished initializing also reports
            // Transient(_), reusing 503 per §6.
            // Policy rejections are a malformed-for-policy request, not a
            // new status class, so they share 400 with Validation.
            MarketError::RiskRejected(_) => 400,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, MarketError::Upstream(_) | MarketError::Transient(_))
    }
}

pub type MarketResult<T> = Result<T, MarketError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_matches_spec() {
        assert_eq!(MarketError::Validation("x".into()).http_status(), 400);
        assert_eq!(MarketError::NotFound("x".into()).http_status(), 404);
        assert_eq!(MarketError::Upstream("x".into()).http_status(), 502);
        assert_eq!(MarketError::Fatal("x".into()).http_status(), 500);
    }

    #[test]
    fn retryable_classes() {
        assert!(MarketError::Upstream("x".into()).is_retryable());
        assert!(MarketError::Transient("x".into()).is_retryable());
        assert!(!MarketError::Validation("x".into()).is_retryable());
        assert!(!MarketError::RiskRejected("x".into()).is_retryable());
    }
}
