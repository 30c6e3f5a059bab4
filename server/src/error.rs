use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Failures while reading command-line options or the init script.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid server options: {0}")]
    InvalidOptions(#[from] clap::Error),

    #[error("unknown server variable '{0}'")]
    UnknownVariable(String),

    #[error("invalid value '{value}' for {name}")]
    InvalidValue { name: String, value: String },

    #[error("could not read init script {path}: {source}")]
    InitScript {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Failures surfaced by the server loop and its setup.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("could not create server host: {0}")]
    HostCreate(#[source] io::Error),

    #[error("could not create server info socket: {0}")]
    InfoSocket(#[source] io::Error),

    #[error("listen server is already running")]
    AlreadyRunning,

    #[error("listen server is not running")]
    NotRunning,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("transport error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, ServerError>;
