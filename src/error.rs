use std::error;
use std::fmt;




#[derive(Debug)]


/**
 * Fatal conditions raised by the grid. Configuration errors are detected
 * while a grid is being assembled or wired up; protocol errors mean that the
 * participating processes disagree about what is being exchanged; transport
 * errors come up from the message layer. Violated index or slot contracts are
 * programming errors and panic instead.
 */
pub enum Error {
    Configuration(String),
    Protocol(String),
    Transport(String),
}




// ============================================================================
impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Error::*;

        match self {
            Configuration(message) => write!(fmt, "configuration error: {}", message),
            Protocol(message) => write!(fmt, "protocol error: {}", message),
            Transport(message) => write!(fmt, "transport error: {}", message),
        }
    }
}

impl error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Transport(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for Error {
    fn from(e: rmp_serde::encode::Error) -> Self {
        Error::Transport(format!("could not encode message: {}", e))
    }
}

impl From<rmp_serde::decode::Error> for Error {
    fn from(e: rmp_serde::decode::Error) -> Self {
        Error::Protocol(format!("could not decode message: {}", e))
    }
}




/**
 * Result type used throughout the crate
 */
pub type Result<T> = std::result::Result<T, Error>;
