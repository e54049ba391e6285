//! Error types shared across the host database.

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by host database operations.
///
/// Tree and registry operations are total: every failure mode maps onto one
/// of these variants and is returned to the caller. The scan coordinator
/// swallows per-probe failures (they become scan-history entries) and only
/// surfaces startup errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Insert of a public key or profile name that already exists.
    #[error("duplicate: {0}")]
    Duplicate(String),

    /// Modify, remove, or lookup of an unknown key or profile.
    #[error("not found: {0}")]
    NotFound(String),

    /// Unknown tier, location, setting, or a malformed name or key.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Sampling was requested before the initial host scan finished.
    #[error("initial host scan is not yet completed")]
    InitialScanIncomplete,

    /// I/O or decoding failure while loading or saving state.
    #[error("persistence failure: {0}")]
    Persistence(String),

    /// Attempt to delete the default profile.
    #[error("the default profile cannot be deleted")]
    Protected,
}

impl Error {
    pub fn duplicate(what: impl Into<String>) -> Self {
        Error::Duplicate(what.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Error::NotFound(what.into())
    }

    pub fn invalid(what: impl Into<String>) -> Self {
        Error::InvalidArgument(what.into())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Persistence(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Persistence(err.to_string())
    }
}
