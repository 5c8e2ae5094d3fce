pub mod cluster;
pub mod components;
pub mod connect;
pub mod download;
pub mod projects;
pub mod stats;
pub mod test;

use hub_config::ComponentKind;

use crate::error::ApiError;

/// Parse a `{kind}` path segment.
pub(crate) fn parse_kind(kind: &str) -> Result<ComponentKind, ApiError> {
    kind.parse()
        .map_err(|_| ApiError::BadRequest(format!("unknown component kind {kind:?}")))
}
