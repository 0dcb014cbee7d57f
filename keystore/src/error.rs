use thiserror::Error;

#[derive(Error, Debug)]
pub enum KeystoreError {
    #[error("no trusted key for issuer {issuer} of {name}")]
    UnknownIssuer { name: String, issuer: String },

    #[error("signature verification failed for {0}")]
    SignatureInvalid(String),

    #[error("malformed armor: {0}")]
    Armor(String),

    #[error("malformed key material: {0}")]
    BadKey(String),

    #[error("fingerprint mismatch: expected {expected}, key is {actual}")]
    FingerprintMismatch { expected: String, actual: String },

    #[error("key not found: {0}")]
    NotFound(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
