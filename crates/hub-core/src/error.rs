use derive_more::From;
use orion_error::{ErrorCode, StructError, UvsReason};

#[derive(Debug, Clone, PartialEq, thiserror::Error, From)]
pub enum CoreReason {
    #[error("ruleset parse error")]
    RulesetParse,
    #[error("ruleset execution error")]
    RulesetExec,
    #[error("plugin execution error")]
    PluginExec,
    #[error("driver error")]
    Driver,
    #[error("project build error")]
    ProjectBuild,
    #[error("component reference conflict")]
    ReferenceConflict,
    #[error("registry error")]
    Registry,
    #[error("{0}")]
    Uvs(UvsReason),
}

impl ErrorCode for CoreReason {
    fn error_code(&self) -> i32 {
        match self {
            Self::RulesetParse => 1001,
            Self::RulesetExec => 1002,
            Self::PluginExec => 1003,
            Self::Driver => 1004,
            Self::ProjectBuild => 1005,
            Self::ReferenceConflict => 1006,
            Self::Registry => 1007,
            Self::Uvs(u) => u.error_code(),
        }
    }
}

pub type CoreError = StructError<CoreReason>;
pub type CoreResult<T> = Result<T, CoreError>;
