use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReporterError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("checkpoint API {endpoint} returned {status}: {body}")]
    Api {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("Config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ReporterError>;
