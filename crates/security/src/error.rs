use thiserror::Error;

#[derive(Debug, Error)]
pub enum SecurityError {
    #[error("invalid deny pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },
}
