use thiserror::Error;

#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("invalid name: {0:?}")]
    InvalidName(String),

    #[error("invalid image hash: {0:?}")]
    InvalidHash(String),
}
