use thiserror::Error;

/// Errors raised by the session engine and command policy.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("invalid session name: {0}")]
    InvalidName(String),

    #[error("command not permitted: {0}")]
    PolicyRejected(String),

    #[error("failed to spawn command `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("session is not running")]
    NotRunning,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;
