use super::error::ApiError;
use crate::{report::ReportError, server::SharedState};
use axum::{
    extract::{FromRequest, Multipart, Request, State},
    http::header,
    Form,
};
use serde::Deserialize;
use std::time::Instant;
use tracing::instrument;
use xray_inference::GeneratorKind;

#[derive(Debug, Default, Deserialize)]
pub struct ChatForm {
    #[serde(default)]
    user_input: String,
    llm: Option<String>,
}

/// Chat fields from either an urlencoded or a multipart form body.
pub struct ChatInput(ChatForm);

impl<S> FromRequest<S> for ChatInput
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_multipart = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.starts_with("multipart/form-data"));

        if !is_multipart {
            let Form(form) = Form::<ChatForm>::from_request(req, state).await?;
            return Ok(ChatInput(form));
        }

        let mut multipart = Multipart::from_request(req, state).await?;
        let mut form = ChatForm::default();
        while let Some(field) = multipart.next_field().await? {
            let name = field.name().map(str::to_owned);
            match name.as_deref() {
                Some("user_input") => form.user_input = field.text().await?,
                Some("llm") => form.llm = Some(field.text().await?),
                _ => {}
            }
        }
        Ok(ChatInput(form))
    }
}

pub fn chat_prompt(user_input: &str) -> String {
    format!("Medical conversation: {}", user_input)
}

#[instrument(skip_all)]
pub async fn chat(
    State(state): State<SharedState>,
    ChatInput(form): ChatInput,
) -> Result<String, ApiError> {
    state.metrics.record_request("/chat");

    let kind = GeneratorKind::from_form_value(form.llm.as_deref());
    let generator = state
        .registry
        .resolve(kind)
        .map_err(ReportError::Generation)?;

    let start = Instant::now();
    let response = generator
        .generate(&chat_prompt(&form.user_input), state.max_length)
        .await
        .map_err(ReportError::Generation)?;
    state.metrics.record_generation_duration(
        start.elapsed().as_millis() as u64,
        generator.kind().as_str(),
    );

    Ok(response)
}
