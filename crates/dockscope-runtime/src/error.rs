use dockscope_types::{CollectionError, StreamError};

/// Failure of a single runtime call
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RuntimeError {
    #[error("no such container")]
    NotFound,

    #[error("runtime request timed out")]
    Timeout,

    #[error("cannot reach the container runtime: {0}")]
    Unreachable(String),

    #[error("runtime API error {status}: {message}")]
    Api { status: u16, message: String },
}

impl From<bollard::errors::Error> for RuntimeError {
    fn from(err: bollard::errors::Error) -> Self {
        use bollard::errors::Error;

        match err {
            Error::DockerResponseServerError {
                status_code: 404, ..
            } => Self::NotFound,
            Error::DockerResponseServerError {
                status_code,
                message,
            } => Self::Api {
                status: status_code,
                message,
            },
            Error::RequestTimeoutError => Self::Timeout,
            other => Self::Unreachable(other.to_string()),
        }
    }
}

impl From<RuntimeError> for CollectionError {
    fn from(err: RuntimeError) -> Self {
        match err {
            RuntimeError::NotFound => Self::NotFound,
            RuntimeError::Timeout => Self::Timeout,
            RuntimeError::Unreachable(reason) => Self::Unreachable(reason),
            RuntimeError::Api { status, message } => {
                Self::Unreachable(format!("{status}: {message}"))
            }
        }
    }
}

impl From<RuntimeError> for StreamError {
    fn from(err: RuntimeError) -> Self {
        match err {
            RuntimeError::NotFound => Self::NotFound,
            RuntimeError::Timeout | RuntimeError::Unreachable(_) => {
                Self::Disconnected(err.to_string())
            }
            RuntimeError::Api { .. } => Self::Runtime(err.to_string()),
        }
    }
}
