use thiserror::Error;

#[derive(Error, Debug)]
pub enum LagError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error("Kafka admin error: {0}")]
    Admin(String),

    #[error("Blocking task failed: {0}")]
    Task(String),

    #[error("HTTP server error: {0}")]
    Http(String),
}

impl From<tokio::task::JoinError> for LagError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Task(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, LagError>;
