use std::io::Write as _;

use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use sha2::{Digest, Sha256};

use crate::error::ApiError;
use crate::state::ApiState;

/// `GET /config/download` — zipped snapshot of every formal artifact, with
/// an `X-Config-Sha256` digest header over the archive bytes.
pub async fn config_download(State(state): State<ApiState>) -> Result<Response, ApiError> {
    let files = state
        .hub
        .registry
        .store()
        .snapshot()
        .map_err(ApiError::internal)?;

    let mut buffer = Vec::new();
    {
        let mut archive = zip::ZipWriter::new(std::io::Cursor::new(&mut buffer));
        let options = zip::write::SimpleFileOptions::default();
        for (name, bytes) in &files {
            archive
                .start_file(name.as_str(), options)
                .map_err(ApiError::internal)?;
            archive.write_all(bytes).map_err(ApiError::internal)?;
        }
        archive.finish().map_err(ApiError::internal)?;
    }

    let digest = Sha256::digest(&buffer);
    let sha_hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"hub-config.zip\"".to_string(),
            ),
            (header::HeaderName::from_static("x-config-sha256"), sha_hex),
        ],
        buffer,
    )
        .into_response())
}
