use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// The closed set of failure kinds the runtime reports. The first group
/// is brig's own vocabulary; the rest wrap collaborator errors with
/// enough context to be logged verbatim.
#[derive(Error, Debug)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("ambiguous match: {0}")]
    AmbiguousMatch(String),

    #[error("in use: {0}")]
    InUse(String),

    #[error("already running: {0}")]
    AlreadyRunning(String),

    #[error("address space exhausted: {0}")]
    AddressExhausted(String),

    #[error("inconsistent state: {0}")]
    InconsistentState(String),

    #[error("usage error: {0}")]
    UsageError(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("keystore error: {0}")]
    Keystore(#[from] brig_keystore::KeystoreError),

    #[error("dataset error: {0}")]
    Dataset(#[from] brig_dataset::DatasetError),

    #[error("command error: {0}")]
    Runner(#[from] brig_runner::RunnerError),

    #[error("remote error: {0}")]
    Remote(#[from] brig_remote::RemoteError),

    #[error("manifest error: {0}")]
    Schema(#[from] brig_core::SchemaError),

    #[error("config error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
