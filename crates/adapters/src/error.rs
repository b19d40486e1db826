use thiserror::Error;

/// The only two error classes an adapter boundary is allowed to raise:
/// `transient` (worth retrying) and `permanent` (it never will succeed
/// as-is). Anything more specific belongs in the adapter's own crate, out
/// of scope here.
#[derive(Debug, Error, Clone)]
pub enum AdapterError {
    #[error("transient adapter error: {0}")]
    Transient(String),
    #[error("permanent adapter error: {0}")]
    Permanent(String),
}

impl AdapterError {
    pub fn is_transient(&self) -> bool {
        matches!(self, AdapterError::Transient(_))
    }
}

impl From<AdapterError> for funding_common::CoreError {
    fn from(e: AdapterError) -> Self {
        match e {
            AdapterError::Transient(msg) => funding_common::CoreError::AdapterTransient(msg),
            AdapterError::Permanent(msg) => funding_common::CoreError::PermanentAdapter(msg),
        }
    }
}
