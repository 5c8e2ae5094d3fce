use derive_more::From;
use orion_error::{ErrorCode, StructError, UvsReason};

#[derive(Debug, Clone, PartialEq, thiserror::Error, From)]
pub enum ClusterReason {
    #[error("heartbeat error")]
    Heartbeat,
    #[error("config sync error")]
    Sync,
    #[error("cluster transport error")]
    Http,
    #[error("{0}")]
    Uvs(UvsReason),
}

impl ErrorCode for ClusterReason {
    fn error_code(&self) -> i32 {
        match self {
            Self::Heartbeat => 3001,
            Self::Sync => 3002,
            Self::Http => 3003,
            Self::Uvs(u) => u.error_code(),
        }
    }
}

pub type ClusterError = StructError<ClusterReason>;
pub type ClusterResult<T> = Result<T, ClusterError>;
