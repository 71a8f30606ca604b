use axum::extract::{Path, State};
use axum::http::header;
use axum::response::IntoResponse;
use uuid::Uuid;

use crate::api::error::ApiError;
use crate::api::AppState;

/// GET /files/:id: raw attachment payload
pub async fn download(
    State(state): State<AppState>,
    Path(file_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let file = state
        .store
        .file(file_id)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .ok_or_else(|| ApiError::NotFound(format!("file {} not found", file_id)))?;

    let payload = state.blobs.get(&file.blob_ref).await?;

    let headers = [
        (header::CONTENT_TYPE, file.content_type),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", header_safe(&file.filename)),
        ),
    ];
    Ok((headers, payload))
}

/// Header values only carry visible ASCII
fn header_safe(filename: &str) -> String {
    filename
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_ascii_graphic() || c == ' ' => c,
            _ => '_',
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_safe_filename() {
        assert_eq!(header_safe("report 2024.pdf"), "report 2024.pdf");
        assert_eq!(header_safe("отчет.pdf"), "_____.pdf");
        assert_eq!(header_safe("a\"b\\c.txt"), "a_b_c.txt");
    }
}
