/// Result alias that carries the custom [`KeysmashError`] type.
pub type Result<T> = std::result::Result<T, KeysmashError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum KeysmashError {
    /// Free-form failure reported by a sink or collaborator.
    #[error("{0}")]
    Message(String),
    /// A caller handed the engine something it cannot work with.
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// Transport failure talking to the lighting endpoint.
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),
    /// Malformed JSON in configuration or endpoint responses.
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    /// The accessory server sent something the codec does not understand.
    #[error("protocol violation: {0}")]
    Protocol(String),
    /// Shared state was left poisoned by a panicking holder.
    #[error("{0} has been poisoned")]
    Poisoned(&'static str),
    /// The render surface rejected a draw call.
    #[error("render surface: {0}")]
    Surface(String),
}

impl KeysmashError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    pub fn protocol<T: Into<String>>(msg: T) -> Self {
        Self::Protocol(msg.into())
    }

    pub fn surface<T: Into<String>>(msg: T) -> Self {
        Self::Surface(msg.into())
    }
}

impl From<&str> for KeysmashError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for KeysmashError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}
