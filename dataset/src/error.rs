use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatasetError {
    #[error("dataset not found: {0}")]
    NotFound(String),

    #[error("cannot parse zfs output: {0:?}")]
    Parse(String),

    #[error("command error: {0}")]
    Command(#[from] brig_runner::RunnerError),
}
