use funding_common::CoreError;

/// Maps a raw `sqlx::Error` onto the core taxonomy. Connection/pool/timeout
/// errors are `StorageUnavailable` (retryable); a unique violation is
/// surfaced as `Conflict` so callers can treat duplicate inserts on
/// (chain, tx_hash) as "already processed".
pub fn map_sqlx_error(err: sqlx::Error) -> CoreError {
    match &err {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
            CoreError::Conflict(db_err.message().to_string())
        }
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => {
            CoreError::StorageUnavailable(err.to_string())
        }
        _ => CoreError::StorageUnavailable(err.to_string()),
    }
}
