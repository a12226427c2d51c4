use std::{io, path::PathBuf};

use parley_bus_common::{ArgumentError, Status};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Failed to connect to the bus at {path:?}: {source}")]
    Connect {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    /// The bus completed a request with a failure status
    #[error("Bus request failed: {0}")]
    Status(Status),
    #[error("Method with a given name already registered: {0}")]
    AlreadyRegistered(String),
    #[error("Subscriber is not registered at the bus")]
    NotRegistered,
    #[error("Bus connection closed")]
    Disconnected,
    #[error("Unexpected bus message: {0}")]
    Protocol(String),
    #[error("Failed to encode a message: {0}")]
    Encode(#[from] bson::ser::Error),
    #[error("Failed to decode a message: {0}")]
    Decode(#[from] bson::de::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    /// Status reported to a caller if a method handler fails with the error
    pub fn status(&self) -> Status {
        match self {
            Error::InvalidArgument(_) => Status::InvalidArgument,
            Error::Status(status) => *status,
            Error::AlreadyRegistered(_) => Status::InvalidArgument,
            Error::NotRegistered => Status::NotFound,
            Error::Connect { .. } | Error::Disconnected | Error::Io(_) => {
                Status::ConnectionFailed
            }
            Error::Protocol(_) | Error::Encode(_) | Error::Decode(_) => Status::UnknownError,
        }
    }
}

impl From<ArgumentError> for Error {
    fn from(value: ArgumentError) -> Self {
        Error::InvalidArgument(value.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            Error::InvalidArgument("id".into()).status(),
            Status::InvalidArgument
        );
        assert_eq!(Error::Status(Status::NotFound).status(), Status::NotFound);
        assert_eq!(Error::Disconnected.status(), Status::ConnectionFailed);
        assert_eq!(
            Error::from(ArgumentError::Missing("id".into())).status(),
            Status::InvalidArgument
        );
    }
}
