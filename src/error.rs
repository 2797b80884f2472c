//! Error taxonomy for the game core
//!
//! Cache, engine, and scheduler operations return [`GameError`]. Caches
//! translate store failures into `Storage` verbatim and roll back partial
//! in-memory changes before returning; they never retry. Lock misuse
//! surfaces as `Lock` and aborts the calling operation.

use thiserror::Error;

use crate::locking::LockError;

/// Errors surfaced by the state-management core.
#[derive(Error, Debug)]
pub enum GameError {
    /// Entity missing from cache and store
    #[error("not found: {0}")]
    NotFound(String),

    /// Business invariant violated (user already in battle, battle already
    /// ended, ...)
    #[error("conflict: {0}")]
    Conflict(String),

    /// Lock hierarchy misuse or cancellation while waiting
    #[error(transparent)]
    Lock(#[from] LockError),

    /// Underlying store failure, surfaced verbatim
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    /// JSON column could not be encoded or decoded
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Task was cancelled while suspended
    #[error("operation cancelled")]
    Cancelled,
}

impl GameError {
    /// Shorthand for a [`GameError::NotFound`] with a formatted entity tag.
    pub fn not_found(entity: &str, id: impl std::fmt::Display) -> Self {
        Self::NotFound(format!("{entity} {id}"))
    }
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, GameError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locking::LockLevel;

    #[test]
    fn test_display_messages() {
        let err = GameError::not_found("user", 7);
        assert_eq!(err.to_string(), "not found: user 7");

        let err = GameError::Conflict("user 1 already in battle 3".into());
        assert_eq!(err.to_string(), "conflict: user 1 already in battle 3");

        let err = GameError::Lock(LockError::Reentrant(LockLevel::User));
        assert_eq!(err.to_string(), "reentrant acquisition of USER@4");
    }

    #[test]
    fn test_lock_error_converts() {
        fn fails() -> Result<()> {
            Err(LockError::Reentrant(LockLevel::Battle))?;
            Ok(())
        }
        assert!(matches!(fails(), Err(GameError::Lock(_))));
    }
}
