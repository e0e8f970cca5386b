use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("session name `{0}` is invalid")]
    InvalidName(String),

    #[error("no resumable session named `{0}`")]
    NotResumable(String),

    #[error("no session named `{0}`")]
    NotFound(String),

    #[error(transparent)]
    Core(#[from] conductor_core::CoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RegistryError>;
