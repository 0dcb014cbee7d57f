use thiserror::Error;

#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("failed to spawn {command}: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    #[error("{command} exited with {status} (stderr: {stderr:?})")]
    Failed {
        command: String,
        status: i32,
        stderr: String,
    },

    #[error("{command} terminated by signal (stderr: {stderr:?})")]
    Terminated { command: String, stderr: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
