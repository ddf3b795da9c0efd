/// Result alias that carries the custom [`TrackingError`] type.
pub type Result<T> = std::result::Result<T, TrackingError>;

/// Common error type for the core crate.
///
/// Nothing in the per-tick path returns these. They surface from the
/// persistence layer and from the few setters that validate their input, and
/// the pipeline turns them into warnings before carrying on with defaults.
#[derive(Debug, thiserror::Error)]
pub enum TrackingError {
    /// Free-form message for conditions that do not deserve their own variant.
    #[error("{0}")]
    Message(String),
    /// A caller handed in a value outside the accepted domain.
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// Persisted settings or calibration data could not be (de)serialised.
    #[error("malformed data: {0}")]
    Json(#[from] serde_json::Error),
}

impl TrackingError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }
}

impl From<&str> for TrackingError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for TrackingError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}
