//! Error types for topology document construction

/// Errors raised while building a topology document
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// A collaborator object a modifier depends on is not available yet
    #[error("missing dependency for {modifier}: {what}")]
    MissingDependency {
        /// Modifier that needed the dependency
        modifier: String,
        /// What was missing
        what: String,
    },

    /// User supplied configuration cannot be applied
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Document could not be encoded or decoded
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl BuildError {
    /// Create a missing dependency error
    #[inline]
    pub fn missing(modifier: impl Into<String>, what: impl Into<String>) -> Self {
        Self::MissingDependency {
            modifier: modifier.into(),
            what: what.into(),
        }
    }

    /// Check if the build may succeed later without a spec change
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::MissingDependency { .. })
    }

    /// Check if only a corrected spec can fix this
    #[inline]
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::InvalidConfiguration(_))
    }
}
