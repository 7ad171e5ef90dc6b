use thiserror::Error;
use tonic::Status;

#[derive(Error, Debug, Clone)]
pub enum BackendError {
    #[error("volume '{0}' not found")]
    VolumeNotFound(String),

    #[error("instance '{0}' not found")]
    InstanceNotFound(String),

    #[error("volume '{volume_id}' is already attached to instance '{node_id}'")]
    AlreadyAttached { volume_id: String, node_id: String },

    #[error("invalid page cursor '{0}'")]
    InvalidCursor(String),

    #[error("provider rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("provider temporarily unavailable: {0}")]
    Transient(String),

    #[error("unexpected provider response: {0}")]
    InvalidResponse(String),
}

impl BackendError {
    /// Whether retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, BackendError::Transient(_))
    }

    /// Whether the error means the referenced object does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            BackendError::VolumeNotFound(_) | BackendError::InstanceNotFound(_)
        )
    }
}

impl From<BackendError> for Status {
    fn from(err: BackendError) -> Self {
        match &err {
            BackendError::VolumeNotFound(_) | BackendError::InstanceNotFound(_) => {
                Status::not_found(err.to_string())
            }
            BackendError::AlreadyAttached { .. } => Status::failed_precondition(err.to_string()),
            BackendError::InvalidCursor(_) => Status::aborted(err.to_string()),
            BackendError::Rejected { status, .. } => match status {
                400 | 422 => Status::invalid_argument(err.to_string()),
                401 | 403 => Status::internal(err.to_string()),
                _ => Status::failed_precondition(err.to_string()),
            },
            BackendError::Transient(_) => Status::unavailable(err.to_string()),
            BackendError::InvalidResponse(_) => Status::internal(err.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, BackendError>;
