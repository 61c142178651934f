use thiserror::Error;

#[derive(Error, Debug)]
pub enum MaterialsError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Rejected SQL: {0}")]
    UnsafeSql(String),
}

pub type Result<T> = std::result::Result<T, MaterialsError>;
