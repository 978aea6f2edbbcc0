use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid value for {name}: {value:?} ({reason})")]
    InvalidValue {
        name: &'static str,
        value: String,
        reason: &'static str,
    },

    #[error("data directory is not usable: {0}")]
    DataDir(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
