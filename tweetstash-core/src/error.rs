use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("Config Error - {0}")]
    Config(String),

    #[error("Parse Error - {0}")]
    Parse(String),

    #[error("Batch Error - {0}")]
    Batch(String),

    #[error("Queue Error - {0}")]
    Queue(String),

    #[error("Staging Error - {0}")]
    Staging(String),

    #[error("Archive Error - {0}")]
    Archive(String),

    #[error("Upstream Error - {0}")]
    Upstream(String),

    #[error("Metrics Error - {0}")]
    Metrics(String),

    #[error("Pipeline Error - {0}")]
    Pipeline(String),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Staging(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Parse(err.to_string())
    }
}
