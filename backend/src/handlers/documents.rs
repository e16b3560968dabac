//! HTTP handlers for document submission and retrieval

use axum::{
    extract::{Path, State},
    Json,
};
use shared::{DocumentKind, SubmitDocumentRequest, SubmitResponse};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::DocumentResponse;
use crate::services::DocumentService;
use crate::AppState;

/// `billing`, `purchase-order`, `inward` or `return`
pub fn parse_kind(segment: &str) -> AppResult<DocumentKind> {
    DocumentKind::from_path_segment(segment)
        .ok_or_else(|| AppError::NotFound(format!("Document kind '{}'", segment)))
}

/// Create a document
pub async fn create_document(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    Json(input): Json<SubmitDocumentRequest>,
) -> AppResult<Json<SubmitResponse>> {
    let kind = parse_kind(&kind)?;
    let service = DocumentService::new(state.db, state.config.engine);
    let response = service.create_document(kind, input).await?;
    Ok(Json(response))
}

/// Replace an existing document
pub async fn update_document(
    State(state): State<AppState>,
    Path((kind, document_id)): Path<(String, Uuid)>,
    Json(input): Json<SubmitDocumentRequest>,
) -> AppResult<Json<SubmitResponse>> {
    let kind = parse_kind(&kind)?;
    let service = DocumentService::new(state.db, state.config.engine);
    let response = service.update_document(kind, document_id, input).await?;
    Ok(Json(response))
}

/// Fetch a document for editing
pub async fn get_document(
    State(state): State<AppState>,
    Path((kind, document_id)): Path<(String, Uuid)>,
) -> AppResult<Json<DocumentResponse>> {
    let kind = parse_kind(&kind)?;
    let service = DocumentService::new(state.db, state.config.engine);
    let document = service.get_document(kind, document_id).await?;
    Ok(Json(document))
}
