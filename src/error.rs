use std::io;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Appended to an open failure when the port seems to be held by someone else.
pub(crate) const PORT_CLAIMED_HINT: &str =
    ". Check if another program (such as a serial monitor) has the port open.";

/// Errors thay may occur in this library.
///
/// None of these are fatal to the process.
/// At the session boundary they are turned into status strings.
#[derive(Debug, Error, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub enum Error {
    /// The serial port could not be opened.
    #[error("{reason}")]
    PortUnavailable {
        /// Which port we tried to open.
        path: String,

        /// Why it failed, including any hint for the user.
        reason: String,
    },

    /// A write was attempted without an open serial connection.
    #[error("Port not open")]
    NotConnected,

    /// The serial port rejected a write after it was opened.
    #[error("Write failed: {0}")]
    WriteFailure(String),

    /// The request is not valid in the current state.
    /// For example recording a step without any enabled channels.
    #[error("{0}")]
    InvalidOperation(String),

    /// The operation was interrupted by a newer request.
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// No control channel has this id.
    #[error("The channel `{0}` does not exist")]
    UnknownChannel(String),

    /// Bad json.
    #[error("The request `{request}` could not be deserialized. Problem: {problem}")]
    BadJson {
        /// The problematic request.
        request: String,

        /// The deserialization issue.
        problem: String,
    },

    /// The configuration is not valid.
    #[error("Bad configuration: {0}")]
    BadConfig(String),

    /// Some IO problem outside of the serial link.
    #[error("IO problem: {0}")]
    Io(String),
}

impl Error {
    /// Build a [`Error::PortUnavailable`] from the error the port opener gave us.
    ///
    /// Permission and busy errors usually mean another process holds the port,
    /// in which case a hint is added.
    pub(crate) fn port_unavailable(path: &str, error: &io::Error) -> Self {
        let mut reason = error.to_string();

        if is_port_claimed(error) {
            reason += PORT_CLAIMED_HINT;
        }

        Self::PortUnavailable {
            path: path.to_owned(),
            reason,
        }
    }

    /// Get the inner value if this is a [`Error::BadConfig`].
    pub fn try_into_bad_config(self) -> Result<String, Self> {
        if let Self::BadConfig(v) = self {
            Ok(v)
        } else {
            Err(self)
        }
    }

    /// Render the error as a status line for clients.
    pub fn status(&self) -> String {
        format!("Error: {self}")
    }
}

fn is_port_claimed(error: &io::Error) -> bool {
    if error.kind() == io::ErrorKind::PermissionDenied {
        return true;
    }

    let message = error.to_string().to_lowercase();
    message.contains("access denied") || message.contains("busy")
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Self::Io(e.to_string())
    }
}
