//! Error taxonomy shared by every docchat component.
//!
//! | Variant | Retried? | Typical origin |
//! |---------|----------|----------------|
//! | `Configuration` | never | missing or invalid backend credential |
//! | `QuotaExceeded` | never | usage governor |
//! | `UpstreamStatus` | no | backend answered with an error status |
//! | `UpstreamUnavailable` | by the caller | connect failure or timeout |
//! | `UnsupportedFormat` / `ExtractionFailure` | no | content extractor, scoped to one document |
//! | `InjectionDetected` | no | injection guard, not a system fault |
//! | `TenantUnavailable` / `NotFound` | no | tenant or document lookups |
//! | `DimensionMismatch` | no | embedding router |
//! | `Generation` | no | any other backend failure, message bounded |
//! | `Storage` | no | store implementations |

use std::fmt;

use thiserror::Error;

/// Longest diagnostic carried by [`RagError::Generation`].
pub const MAX_GENERIC_MESSAGE: usize = 200;

/// Which quota window rejected a reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaPeriod {
    Daily,
    Monthly,
}

impl fmt::Display for QuotaPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuotaPeriod::Daily => write!(f, "daily"),
            QuotaPeriod::Monthly => write!(f, "monthly"),
        }
    }
}

#[derive(Debug, Error)]
pub enum RagError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("{period} token limit exceeded ({limit} tokens)")]
    QuotaExceeded { period: QuotaPeriod, limit: i64 },

    #[error("upstream error ({status}): {message}")]
    UpstreamStatus { status: u16, message: String },

    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("extraction failed: {0}")]
    ExtractionFailure(String),

    #[error("{0}")]
    InjectionDetected(String),

    #[error("tenant {0} is blocked or inactive")]
    TenantUnavailable(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("generation failed: {0}")]
    Generation(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl RagError {
    /// Build a [`RagError::Generation`] with the message cut to
    /// [`MAX_GENERIC_MESSAGE`] characters.
    pub fn generation(msg: impl AsRef<str>) -> Self {
        RagError::Generation(truncate_chars(msg.as_ref(), MAX_GENERIC_MESSAGE))
    }

    pub fn storage(err: impl fmt::Display) -> Self {
        RagError::Storage(err.to_string())
    }

    /// Transient failures a caller may try again later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RagError::UpstreamUnavailable(_))
    }
}

pub type Result<T> = std::result::Result<T, RagError>;

/// Cut `s` to at most `max` characters without splitting a code point.
pub fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}
