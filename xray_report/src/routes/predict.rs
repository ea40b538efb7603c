use super::error::ApiError;
use crate::{html::render_result, report::ReportRequest, server::SharedState};
use axum::{
    body::Bytes,
    extract::{
        multipart::{Multipart, MultipartRejection},
        MatchedPath, State,
    },
    response::Html,
};
use tracing::instrument;

const IMAGE_FIELDS: [&str; 2] = ["file", "image"];

#[derive(Debug)]
struct UploadedFile {
    filename: String,
    data: Bytes,
}

#[derive(Debug, Default)]
struct UploadForm {
    file: Option<UploadedFile>,
    llm: Option<String>,
}

async fn read_upload_form(mut multipart: Multipart) -> Result<UploadForm, ApiError> {
    let mut form = UploadForm::default();

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        if IMAGE_FIELDS.contains(&name.as_str()) && form.file.is_none() {
            let filename = field.file_name().unwrap_or_default().to_string();
            let data = field.bytes().await?;
            form.file = Some(UploadedFile { filename, data });
        } else if name == "llm" {
            form.llm = Some(field.text().await?);
        }
    }

    Ok(form)
}

fn validate(form: UploadForm) -> Result<(UploadedFile, ReportRequest), ApiError> {
    let file = form.file.ok_or(ApiError::NoFilePart)?;
    if file.filename.is_empty() {
        return Err(ApiError::NoSelectedFile);
    }
    if file.data.is_empty() {
        return Err(ApiError::EmptyFile);
    }
    Ok((file, ReportRequest { llm: form.llm }))
}

#[instrument(skip_all, fields(route = %path.as_str()))]
pub async fn predict(
    State(state): State<SharedState>,
    path: MatchedPath,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Html<String>, ApiError> {
    let route = path.as_str();
    state.metrics.record_request(route);

    let form = read_upload_form(multipart?).await?;
    let (file, request) = validate(form)?;

    let stored = state.uploads.save(&file.filename, &file.data).await?;
    tracing::debug!("Diagnosing upload {:?}", stored.path);
    let report = state
        .diagnosis
        .diagnose(file.data, &request, route)
        .await?;

    Ok(Html(render_result(
        &report,
        &format!("/uploads/{}", stored.name),
    )))
}
