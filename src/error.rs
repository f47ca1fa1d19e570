use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    /// The store could not be created or opened; the engine is unusable.
    #[error("Failed to initialize store at {path}: {message}")]
    Init { path: String, message: String },

    #[error("Extraction failed for {path}: {message}")]
    Extraction { path: String, message: String },

    /// A read path had no samples to work with.
    #[error("No samples available: {0}")]
    EmptySample(String),

    #[error("Git error: {0}")]
    Git(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Engine is closed")]
    Closed,
}

impl EngineError {
    /// Whether this error came from the storage layer rather than from reading
    /// or analysing a single input.
    pub fn is_storage(&self) -> bool {
        matches!(
            self,
            EngineError::Database(_) | EngineError::Pool(_) | EngineError::Init { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
