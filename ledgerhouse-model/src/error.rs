use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("invalid file kind: {0}")]
    InvalidFileKind(String),

    #[error("invalid status: {0}")]
    InvalidStatus(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ModelError>;
