use thiserror::Error;

/// churn-service error types
#[derive(Error, Debug)]
pub enum ServiceError {
    /// A grouping or feature column name that the table does not have
    #[error("unknown column: {0}")]
    UnknownColumn(String),

    /// The dataset is missing a column every row needs
    #[error("dataset is missing column '{0}'")]
    MissingColumn(String),

    /// A dataset cell could not be read as the expected type
    #[error("row {row}: invalid value for '{column}': {reason}")]
    InvalidField {
        row: usize,
        column: String,
        reason: String,
    },

    /// Model artifact is malformed
    #[error("model error: {0}")]
    Model(String),

    /// Classifier output did not line up with its input
    #[error("prediction error: {0}")]
    Prediction(String),

    /// No row with the requested public id
    #[error("Information with id '{0}' was not found")]
    NotFound(String),

    /// File I/O error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV decoding error
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    /// JSON decoding error
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("config error: {0}")]
    Config(String),
}

/// Result type alias for churn-service
pub type Result<T> = std::result::Result<T, ServiceError>;
