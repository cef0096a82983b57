#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// A submission was rejected before any state changed.
    #[error("Validation failed: {0}")]
    Validation(String),
}
