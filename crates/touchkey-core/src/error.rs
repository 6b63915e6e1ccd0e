use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    // Wire protocol errors
    #[error("Unknown presence line: {0:?}")]
    UnknownLine(String),

    #[error("Line too long: {length} bytes (max {max_length})")]
    LineTooLong { length: usize, max_length: usize },

    // Device identity errors
    #[error("Invalid device path: {0}")]
    InvalidDevicePath(String),

    #[error("Invalid identity mode: {0}")]
    InvalidIdentityMode(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;
