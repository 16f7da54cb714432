use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrunklineError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Job not found: {id}")]
    JobNotFound { id: String },

    #[error("Event not found: {id}")]
    EventNotFound { id: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("UUID parsing error: {0}")]
    UuidParsing(#[from] uuid::Error),

    #[error("Queue error: {message}")]
    Queue { message: String },

    #[error("Worker error: {message}")]
    Worker { message: String },

    #[error("Store error: {message}")]
    Store { message: String },

    #[error("Handler error: {message}")]
    Handler { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

// Add From implementations for toml errors
impl From<toml::de::Error> for TrunklineError {
    fn from(err: toml::de::Error) -> Self {
        TrunklineError::Config(format!("TOML deserialization error: {}", err))
    }
}

impl From<toml::ser::Error> for TrunklineError {
    fn from(err: toml::ser::Error) -> Self {
        TrunklineError::Config(format!("TOML serialization error: {}", err))
    }
}
