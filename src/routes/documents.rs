use std::path::Path as FsPath;

use axum::body::Body;
use axum::extract::{Multipart, Path, State};
use axum::http::{header, StatusCode};
use axum::response::Response;
use axum_extra::extract::WithRejection;
use chrono::NaiveDateTime;
use serde::Serialize;
use tracing::{error, info};

use crate::{
    auth::AuthenticatedUser,
    error::{AppError, AppResult},
    files::{content_type_of, UploadKind},
    models::{Document, DocumentPatch, NewDocument},
    response::{ApiResponse, CountResponse},
    routes::form::MultipartForm,
    state::AppState,
    store::{documents, specializations, users},
};

#[derive(Serialize)]
pub struct DocumentResponse {
    pub id: i32,
    pub title: String,
    pub file_path: String,
    pub author_group: Option<String>,
    pub journal: Option<String>,
    pub journal_info: Option<String>,
    pub academic_year: Option<i32>,
    pub note: Option<String>,
    pub owner_user_id: i32,
    pub specialization_id: i32,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl From<Document> for DocumentResponse {
    fn from(doc: Document) -> Self {
        Self {
            id: doc.id,
            title: doc.title,
            file_path: doc.file_path,
            author_group: doc.author_group,
            journal: doc.journal,
            journal_info: doc.journal_info,
            academic_year: doc.academic_year,
            note: doc.note,
            owner_user_id: doc.owner_user_id,
            specialization_id: doc.specialization_id,
            created_at: doc.created_at,
            updated_at: doc.updated_at,
        }
    }
}

fn content_disposition(disposition: &str, filename: &str) -> String {
    let sanitized: String = filename
        .chars()
        .map(|ch| match ch {
            '"' | '\\' => '_',
            ch if ch.is_control() => '_',
            _ => ch,
        })
        .collect();
    let ascii_fallback: String = sanitized
        .chars()
        .map(|ch| if ch.is_ascii() { ch } else { '_' })
        .collect();

    let encoded =
        percent_encoding::utf8_percent_encode(&sanitized, percent_encoding::NON_ALPHANUMERIC);
    format!("{disposition}; filename=\"{ascii_fallback}\"; filename*=UTF-8''{encoded}")
}

/// `title` plus the stored file's extension, unless the title already ends in it.
fn download_name(title: &str, file_path: &str) -> String {
    let extension = FsPath::new(file_path)
        .extension()
        .and_then(|ext| ext.to_str());

    match extension {
        Some(ext)
            if !title
                .rsplit_once('.')
                .map(|(_, existing)| existing.eq_ignore_ascii_case(ext))
                .unwrap_or(false) =>
        {
            format!("{title}.{ext}")
        }
        _ => title.to_string(),
    }
}

/// Streams stored bytes back with a MIME type derived from `path`.
pub(crate) fn file_response(
    bytes: Vec<u8>,
    path: &str,
    filename: Option<&str>,
    attachment: bool,
) -> AppResult<Response> {
    let disposition = if attachment { "attachment" } else { "inline" };
    let filename = filename.map(str::to_string).unwrap_or_else(|| {
        FsPath::new(path)
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("file")
            .to_string()
    });

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type_of(path))
        .header(header::CONTENT_LENGTH, bytes.len())
        .header(
            header::CONTENT_DISPOSITION,
            content_disposition(disposition, &filename),
        )
        .body(Body::from(bytes))
        .map_err(AppError::internal)
}

fn load_document(state: &AppState, id: i32) -> AppResult<Document> {
    let mut conn = state.db()?;
    documents::find(&mut conn, id)?.ok_or_else(|| AppError::not_found_with("document not found"))
}

pub async fn list_documents(
    State(state): State<AppState>,
) -> AppResult<ApiResponse<Vec<DocumentResponse>>> {
    let mut conn = state.db()?;
    let rows = documents::list(&mut conn)?
        .into_iter()
        .map(DocumentResponse::from)
        .collect();
    Ok(ApiResponse::ok("documents", rows))
}

pub async fn count_documents(
    State(state): State<AppState>,
) -> AppResult<ApiResponse<CountResponse>> {
    let mut conn = state.db()?;
    let count = documents::count(&mut conn)?;
    Ok(ApiResponse::ok("document count", CountResponse { count }))
}

pub async fn get_document(
    State(state): State<AppState>,
    WithRejection(Path(id), _): WithRejection<Path<i32>, AppError>,
) -> AppResult<ApiResponse<DocumentResponse>> {
    let doc = load_document(&state, id)?;
    Ok(ApiResponse::ok("document", DocumentResponse::from(doc)))
}

pub async fn list_documents_by_owner(
    State(state): State<AppState>,
    WithRejection(Path(user_id), _): WithRejection<Path<i32>, AppError>,
) -> AppResult<ApiResponse<Vec<DocumentResponse>>> {
    let mut conn = state.db()?;
    let rows = documents::list_by_owner(&mut conn, user_id)?;
    if rows.is_empty() {
        return Err(AppError::not_found_with("no documents found for that user"));
    }
    Ok(ApiResponse::ok(
        "documents",
        rows.into_iter().map(DocumentResponse::from).collect(),
    ))
}

pub async fn upload_document(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    WithRejection(multipart, _): WithRejection<Multipart, AppError>,
) -> AppResult<ApiResponse<DocumentResponse>> {
    let mut form = MultipartForm::read(multipart, "file", state.files.max_upload_bytes()).await?;

    let title = form
        .text("title")
        .ok_or_else(|| AppError::bad_request("title is required"))?;
    let specialization_id = form
        .parse::<i32>("specialization_id")?
        .ok_or_else(|| AppError::bad_request("specialization_id is required"))?;
    let owner_user_id = form.parse::<i32>("owner_user_id")?.unwrap_or(user.user_id);
    user.require_self_or_admin(owner_user_id)?;
    let upload = form.take_file().ok_or_else(|| {
        error!("upload rejected: missing file field");
        AppError::bad_request("file is required")
    })?;

    let new_document = NewDocument {
        title,
        file_path: String::new(),
        author_group: form.text("author_group"),
        journal: form.text("journal"),
        journal_info: form.text("journal_info"),
        academic_year: form.parse("academic_year")?,
        note: form.text("note"),
        owner_user_id,
        specialization_id,
    };

    let mut conn = state.db()?;
    if !users::exists(&mut conn, owner_user_id)? {
        return Err(AppError::not_found_with("owner user not found"));
    }
    if !specializations::exists(&mut conn, specialization_id)? {
        return Err(AppError::not_found_with("specialization not found"));
    }

    let original_name = upload.original_name.clone();
    let created = state
        .files
        .store_then(UploadKind::Document, upload, |key| {
            let row = NewDocument {
                file_path: key.to_string(),
                ..new_document
            };
            Ok(documents::insert(&mut conn, &row)?)
        })
        .await
        .map_err(|err| {
            error!(error = %err, original_name = %original_name, "document upload failed");
            err
        })?;

    info!(
        document_id = created.id,
        file_path = %created.file_path,
        owner_user_id = created.owner_user_id,
        "document upload succeeded"
    );
    Ok(ApiResponse::created(
        "document created",
        DocumentResponse::from(created),
    ))
}

pub async fn update_document(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    WithRejection(Path(id), _): WithRejection<Path<i32>, AppError>,
    WithRejection(multipart, _): WithRejection<Multipart, AppError>,
) -> AppResult<ApiResponse<DocumentResponse>> {
    let mut form = MultipartForm::read(multipart, "file", state.files.max_upload_bytes()).await?;

    let mut conn = state.db()?;
    let existing =
        documents::find(&mut conn, id)?.ok_or_else(|| AppError::not_found_with("document not found"))?;
    user.require_self_or_admin(existing.owner_user_id)?;

    let mut patch = DocumentPatch {
        title: form.text("title"),
        file_path: None,
        author_group: form.text("author_group"),
        journal: form.text("journal"),
        journal_info: form.text("journal_info"),
        academic_year: form.parse("academic_year")?,
        note: form.text("note"),
        owner_user_id: form.parse("owner_user_id")?,
        specialization_id: form.parse("specialization_id")?,
    };

    if let Some(owner_user_id) = patch.owner_user_id {
        user.require_self_or_admin(owner_user_id)?;
        if !users::exists(&mut conn, owner_user_id)? {
            return Err(AppError::not_found_with("owner user not found"));
        }
    }
    if let Some(specialization_id) = patch.specialization_id {
        if !specializations::exists(&mut conn, specialization_id)? {
            return Err(AppError::not_found_with("specialization not found"));
        }
    }

    let updated = match form.take_file() {
        Some(upload) => {
            state
                .files
                .replace(
                    UploadKind::Document,
                    Some(existing.file_path.as_str()),
                    upload,
                    |key| {
                        patch.file_path = Some(key.to_string());
                        Ok(documents::apply_patch(&mut conn, id, &patch)?)
                    },
                )
                .await?
        }
        None => documents::apply_patch(&mut conn, id, &patch)?,
    };

    info!(
        document_id = id,
        replaced_file = updated.file_path != existing.file_path,
        "document updated"
    );
    Ok(ApiResponse::ok(
        "document updated",
        DocumentResponse::from(updated),
    ))
}

pub async fn delete_document(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    WithRejection(Path(id), _): WithRejection<Path<i32>, AppError>,
) -> AppResult<ApiResponse<()>> {
    let file_path = {
        let mut conn = state.db()?;
        let existing = documents::find(&mut conn, id)?
            .ok_or_else(|| AppError::not_found_with("document not found"))?;
        user.require_self_or_admin(existing.owner_user_id)?;
        documents::delete(&mut conn, id)?;
        existing.file_path
    };

    state.files.delete(&file_path).await;
    info!(document_id = id, "document deleted");
    Ok(ApiResponse::message("document deleted"))
}

async fn serve_document(state: &AppState, id: i32, attachment: bool) -> AppResult<Response> {
    let doc = load_document(state, id)?;
    let bytes = state.files.read(&doc.file_path).await?;
    let filename = download_name(&doc.title, &doc.file_path);
    file_response(bytes, &doc.file_path, Some(&filename), attachment)
}

pub async fn download_document(
    State(state): State<AppState>,
    WithRejection(Path(id), _): WithRejection<Path<i32>, AppError>,
) -> AppResult<Response> {
    serve_document(&state, id, true).await
}

pub async fn view_document(
    State(state): State<AppState>,
    WithRejection(Path(id), _): WithRejection<Path<i32>, AppError>,
) -> AppResult<Response> {
    serve_document(&state, id, false).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn download_name_appends_stored_extension() {
        assert_eq!(
            download_name("Graph theory", "documents/1-000000002.pdf"),
            "Graph theory.pdf"
        );
        assert_eq!(download_name("Report.PDF", "documents/x.pdf"), "Report.PDF");
        assert_eq!(download_name("Notes", "documents/noext"), "Notes");
    }

    #[test]
    fn content_disposition_encodes_non_ascii_titles() {
        let header = content_disposition("attachment", "Bài giảng \"1\".pdf");
        assert!(header.starts_with("attachment; filename=\""));
        assert!(header.is_ascii());
        assert!(header.contains("filename*=UTF-8''B%C3%A0i"));
        assert!(!header.contains("\"1\""));
    }

    #[test]
    fn inline_file_response_sets_headers() {
        let response =
            file_response(b"%PDF".to_vec(), "documents/a.pdf", Some("A.pdf"), false).unwrap();
        let headers = response.headers();
        assert_eq!(headers[header::CONTENT_TYPE], "application/pdf");
        assert_eq!(headers[header::CONTENT_LENGTH], "4");
        assert!(headers[header::CONTENT_DISPOSITION]
            .to_str()
            .unwrap()
            .starts_with("inline;"));
    }
}
