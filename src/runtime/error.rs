/// Error kinds shared by every container runtime backend.
///
/// Lookup failures always surface as typed errors so the handler layer can
/// map them to user-facing responses; they are never collapsed into empty
/// results.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("{0} already exists")]
    Conflict(String),

    #[error("capacity exceeded: {0}")]
    CapacityExceeded(String),

    #[error("not supported on this backend: {0}")]
    Unsupported(String),

    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("validation failed: {0}")]
    Validation(String),
}

impl RuntimeError {
    pub fn not_found(what: impl Into<String>) -> Self {
        RuntimeError::NotFound(what.into())
    }

    pub fn conflict(what: impl Into<String>) -> Self {
        RuntimeError::Conflict(what.into())
    }
}

impl From<bollard::errors::Error> for RuntimeError {
    fn from(err: bollard::errors::Error) -> Self {
        match err {
            bollard::errors::Error::DockerResponseServerError {
                status_code: 404,
                message,
            } => RuntimeError::NotFound(message),
            bollard::errors::Error::DockerResponseServerError {
                status_code: 409,
                message,
            } => RuntimeError::Conflict(message),
            other => RuntimeError::Unavailable(other.to_string()),
        }
    }
}

impl From<kube::Error> for RuntimeError {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(resp) if resp.code == 404 => RuntimeError::NotFound(resp.message),
            kube::Error::Api(resp) if resp.code == 409 => RuntimeError::Conflict(resp.message),
            other => RuntimeError::Unavailable(other.to_string()),
        }
    }
}
