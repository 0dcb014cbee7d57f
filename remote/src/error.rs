use thiserror::Error;

#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid location: {0}")]
    InvalidLocation(String),

    #[error("fetch of {location} failed with status {status}")]
    Status { location: String, status: u16 },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
