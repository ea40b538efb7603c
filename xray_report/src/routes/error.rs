use crate::{diagnosis::DiagnosisError, report::ReportError, uploads::UploadError};
use axum::{
    extract::multipart::{MultipartError, MultipartRejection},
    extract::rejection::FormRejection,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("No file part")]
    NoFilePart,
    #[error("No selected file")]
    NoSelectedFile,
    #[error("Uploaded file is empty")]
    EmptyFile,
    #[error("{message}")]
    Rejected { status: StatusCode, message: String },
    #[error("Error saving uploaded file")]
    Storage(#[source] UploadError),
    #[error("Error during classification")]
    Classification(#[source] DiagnosisError),
    #[error("Error during report generation")]
    Generation(#[source] ReportError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NoFilePart | ApiError::NoSelectedFile | ApiError::EmptyFile => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Rejected { status, .. } => *status,
            ApiError::Storage(_) | ApiError::Classification(_) | ApiError::Generation(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<MultipartRejection> for ApiError {
    fn from(rejection: MultipartRejection) -> Self {
        ApiError::Rejected {
            status: rejection.status(),
            message: rejection.body_text(),
        }
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        ApiError::Rejected {
            status: err.status(),
            message: err.body_text(),
        }
    }
}

impl From<FormRejection> for ApiError {
    fn from(rejection: FormRejection) -> Self {
        ApiError::Rejected {
            status: rejection.status(),
            message: rejection.body_text(),
        }
    }
}

impl From<UploadError> for ApiError {
    fn from(err: UploadError) -> Self {
        ApiError::Storage(err)
    }
}

impl From<DiagnosisError> for ApiError {
    fn from(err: DiagnosisError) -> Self {
        match err {
            DiagnosisError::Report(err) => ApiError::Generation(err),
            other => ApiError::Classification(other),
        }
    }
}

impl From<ReportError> for ApiError {
    fn from(err: ReportError) -> Self {
        ApiError::Generation(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        match &self {
            ApiError::Storage(source) => tracing::error!("{}: {}", self, source),
            ApiError::Classification(source) => tracing::error!("{}: {}", self, source),
            ApiError::Generation(source) => tracing::error!("{}: {}", self, source),
            _ => tracing::warn!("Rejected request: {}", self),
        }

        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
