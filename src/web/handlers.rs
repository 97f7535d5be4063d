//! Route handlers for the form, the JSON API and health checks

use super::page::{self, RETRY_HINT};
use super::AppState;
use crate::{
    config::{Background, SizePreset},
    error::IdPhotoError,
    services::{ImageCodec, TracingProgressReporter},
    studio::{GeneratedPhoto, PhotoRequest},
};
use axum::{
    body::Bytes,
    extract::{
        multipart::{MultipartError, MultipartRejection},
        Multipart, State,
    },
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info_span, warn, Instrument};

/// A failed request: status plus the text shown to the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct HandlerError {
    pub(crate) status: StatusCode,
    pub(crate) message: String,
}

impl HandlerError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    /// Errors raised while reading the form
    fn form(error: &IdPhotoError) -> Self {
        Self::bad_request(error.to_string())
    }

    /// Errors raised by the pipeline once the form was accepted
    fn processing(error: &IdPhotoError) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: error.to_string(),
        }
    }
}

impl From<MultipartError> for HandlerError {
    fn from(error: MultipartError) -> Self {
        Self {
            status: error.status(),
            message: error.body_text(),
        }
    }
}

impl From<MultipartRejection> for HandlerError {
    fn from(rejection: MultipartRejection) -> Self {
        Self {
            status: rejection.status(),
            message: rejection.body_text(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    hint: &'a str,
}

/// Fields of the upload form
#[derive(Debug, Default)]
pub(crate) struct UploadForm {
    pub(crate) photo: Option<Bytes>,
    pub(crate) preset: SizePreset,
    pub(crate) background: Background,
}

impl UploadForm {
    /// Read `photo`, `preset` and `background`; unknown fields are skipped
    pub(crate) async fn read(mut multipart: Multipart) -> Result<Self, HandlerError> {
        let mut form = Self::default();

        while let Some(field) = multipart.next_field().await? {
            let name = field.name().unwrap_or_default().to_string();
            match name.as_str() {
                "photo" => form.photo = Some(field.bytes().await?),
                "preset" => {
                    let value = field.text().await?;
                    form.preset = value.parse().map_err(|e| HandlerError::form(&e))?;
                },
                "background" => {
                    let value = field.text().await?;
                    form.background = value.parse().map_err(|e| HandlerError::form(&e))?;
                },
                other => warn!(field = other, "ignoring unknown form field"),
            }
        }

        Ok(form)
    }
}

/// Upload plus the finished photo
struct Generated {
    upload: Arc<[u8]>,
    photo: GeneratedPhoto,
}

async fn run_generation(
    state: &AppState,
    form: UploadForm,
    request_id: &str,
) -> Result<Generated, HandlerError> {
    let bytes = form.photo.ok_or_else(|| {
        HandlerError::bad_request("No photo uploaded. Choose a JPG or PNG portrait")
    })?;
    let upload: Arc<[u8]> = Arc::from(bytes.as_ref());

    let mut request = PhotoRequest::new(form.preset, form.background);
    request
        .upload(Arc::clone(&upload))
        .map_err(|e| HandlerError::form(&e))?;

    let reporter = Arc::new(TracingProgressReporter::new(request_id));
    let photo = state
        .studio
        .process(&mut request, reporter)
        .await
        .map_err(|e| HandlerError::processing(&e))?;

    Ok(Generated { upload, photo })
}

fn new_request_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// `GET /`
pub(crate) async fn index() -> Html<String> {
    Html(page::render_form(
        SizePreset::default(),
        Background::default(),
        None,
    ))
}

/// `POST /generate`: HTML result page, or the form with the error
pub(crate) async fn generate_page(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Response {
    let request_id = new_request_id();
    let span = info_span!("generate_page", %request_id);

    async move {
        let form = match multipart {
            Ok(multipart) => UploadForm::read(multipart).await,
            Err(rejection) => Err(rejection.into()),
        };
        let form = match form {
            Ok(form) => form,
            Err(error) => return error_page(SizePreset::default(), Background::default(), &error),
        };

        let (preset, background) = (form.preset, form.background);
        match run_generation(&state, form, &request_id).await {
            Ok(Generated { upload, photo }) => {
                let original_mime = ImageCodec::detect_format(&upload)
                    .map_or("application/octet-stream", |format| format.to_mime_type());
                Html(page::render_result(&upload, original_mime, &photo)).into_response()
            },
            Err(error) => error_page(preset, background, &error),
        }
    }
    .instrument(span)
    .await
}

fn error_page(preset: SizePreset, background: Background, error: &HandlerError) -> Response {
    warn!(status = %error.status, "{}", error.message);
    (
        error.status,
        Html(page::render_form(preset, background, Some(&error.message))),
    )
        .into_response()
}

/// `POST /api/generate`: raw image bytes as an attachment, JSON errors
pub(crate) async fn generate_api(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Response {
    let request_id = new_request_id();
    let span = info_span!("generate_api", %request_id);

    async move {
        let result = match multipart {
            Ok(multipart) => match UploadForm::read(multipart).await {
                Ok(form) => run_generation(&state, form, &request_id).await,
                Err(error) => Err(error),
            },
            Err(rejection) => Err(rejection.into()),
        };

        match result {
            Ok(Generated { photo, .. }) => {
                let headers = [
                    (header::CONTENT_TYPE, photo.mime_type().to_string()),
                    (
                        header::CONTENT_DISPOSITION,
                        format!("attachment; filename=\"{}\"", photo.file_name()),
                    ),
                ];
                (headers, photo.bytes).into_response()
            },
            Err(error) => {
                warn!(status = %error.status, "{}", error.message);
                let body = ErrorBody {
                    error: &error.message,
                    hint: RETRY_HINT,
                };
                (error.status, Json(body)).into_response()
            },
        }
    }
    .instrument(span)
    .await
}

#[derive(Debug, Serialize)]
pub(crate) struct PresetEntry {
    key: &'static str,
    label: &'static str,
    width: u32,
    height: u32,
}

#[derive(Debug, Serialize)]
pub(crate) struct BackgroundEntry {
    key: &'static str,
    label: &'static str,
    /// `None` for transparent
    color: Option<[u8; 3]>,
    format: &'static str,
}

#[derive(Debug, Serialize)]
pub(crate) struct Catalog {
    presets: Vec<PresetEntry>,
    backgrounds: Vec<BackgroundEntry>,
}

/// `GET /api/presets`
pub(crate) async fn presets() -> Json<Catalog> {
    let presets = SizePreset::ALL
        .into_iter()
        .map(|preset| {
            let (width, height) = preset.dimensions();
            PresetEntry {
                key: preset.key(),
                label: preset.label(),
                width,
                height,
            }
        })
        .collect();

    let backgrounds = Background::ALL
        .into_iter()
        .map(|background| BackgroundEntry {
            key: background.key(),
            label: background.label(),
            color: background.color().map(|rgb| rgb.0),
            format: background.output_format().extension(),
        })
        .collect();

    Json(Catalog {
        presets,
        backgrounds,
    })
}

/// `GET /health`
pub(crate) async fn health() -> &'static str {
    "ok"
}
