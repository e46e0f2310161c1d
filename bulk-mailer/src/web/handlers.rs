//! HTTP endpoint handlers.
//!
//! Sending runs inside the request; the response carries the full report.

use std::collections::HashSet;
use std::sync::Arc;

use axum::extract::multipart::{Field, MultipartError};
use axum::extract::{Multipart, State};
use axum::{http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::campaign::{has_default_cv, load_cover_letter, Campaign, CampaignError};
use crate::dispatch::{ReportSummary, SendResult};
use crate::extract::{extract, ValidatedAddress};
use crate::message::{render, Attachment, DEFAULT_SUBJECT};
use crate::Config;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// Cancelled when the server shuts down; in-flight batches stop between sends
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
            shutdown: CancellationToken::new(),
        }
    }
}

/// Error body for every non-2xx response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

pub type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

// =============================================================================
// Health Check
// =============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

// =============================================================================
// Configuration Status
// =============================================================================

#[derive(Debug, Serialize)]
pub struct ConfigStatusResponse {
    pub is_valid: bool,
    pub error_message: Option<String>,
    /// Masked, never the full address
    pub sender_email: String,
    pub has_default_cv: bool,
    pub smtp_info: String,
    pub dry_run: bool,
}

pub async fn config_status(State(state): State<AppState>) -> Json<ConfigStatusResponse> {
    let config = &state.config;
    let validation = config.validate();

    Json(ConfigStatusResponse {
        is_valid: validation.is_ok(),
        error_message: validation.err().map(|e| e.to_string()),
        sender_email: config.masked_sender_email(),
        has_default_cv: has_default_cv(config),
        smtp_info: config.smtp_info(),
        dry_run: config.dry_run,
    })
}

// =============================================================================
// Address Parsing
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct ParseRequest {
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct ParseResponse {
    pub valid_emails: Vec<String>,
    pub invalid_emails: Vec<String>,
    pub duplicates_removed: usize,
    pub total_valid: usize,
}

pub async fn parse_emails(Json(request): Json<ParseRequest>) -> Result<Json<ParseResponse>, ApiError> {
    if request.text.trim().is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "Text cannot be empty"));
    }

    let extraction = extract(&request.text);
    let total_valid = extraction.valid.len();

    Ok(Json(ParseResponse {
        valid_emails: extraction.valid.into_iter().map(String::from).collect(),
        invalid_emails: extraction.invalid,
        duplicates_removed: extraction.duplicate_count,
        total_valid,
    }))
}

// =============================================================================
// Cover Letter Preview
// =============================================================================

#[derive(Debug, Serialize)]
pub struct CoverLetterResponse {
    pub subject: String,
    pub body: String,
}

pub async fn cover_letter(State(state): State<AppState>) -> Json<CoverLetterResponse> {
    let values = state.config.template_values();
    let template = load_cover_letter(&state.config.cover_letter_path).await;

    Json(CoverLetterResponse {
        subject: render(DEFAULT_SUBJECT, &values),
        body: render(&template, &values),
    })
}

// =============================================================================
// Bulk Send
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct SendRequest {
    pub recipient_emails: Vec<String>,
    #[serde(default)]
    pub speed_mode: String,
}

#[derive(Debug, Serialize)]
pub struct SendResponse {
    pub mode: &'static str,
    /// Filename of the CV that was attached, if any
    pub attachment: Option<String>,
    pub results: Vec<SendResult>,
    pub summary: ReportSummary,
    /// Seconds
    pub elapsed_time: f64,
}

/// Multipart form with fields `recipient_emails` (JSON array of addresses),
/// `speed_mode` and an optional `cv_file` that replaces the default CV.
pub async fn send_emails(
    State(state): State<AppState>,
    mut form: Multipart,
) -> Result<Json<SendResponse>, ApiError> {
    let mut recipients_field = None;
    let mut speed_mode = String::new();
    let mut upload = None;

    while let Some(field) = form.next_field().await.map_err(bad_form)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "recipient_emails" => recipients_field = Some(field.text().await.map_err(bad_form)?),
            "speed_mode" => speed_mode = field.text().await.map_err(bad_form)?,
            "cv_file" => upload = uploaded_attachment(field).await?,
            other => warn!(field = other, "send_request_unknown_field"),
        }
    }

    let raw = recipients_field
        .ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "No recipient emails provided"))?;
    let recipient_emails: Vec<String> = serde_json::from_str(&raw)
        .map_err(|_| api_error(StatusCode::BAD_REQUEST, "Invalid email list format"))?;

    send_batch(
        &state,
        SendRequest {
            recipient_emails,
            speed_mode,
        },
        upload,
    )
    .await
    .map(Json)
}

fn bad_form(error: MultipartError) -> ApiError {
    api_error(StatusCode::BAD_REQUEST, format!("Invalid form data: {}", error))
}

/// Read an uploaded CV; an empty file part counts as no upload.
async fn uploaded_attachment(field: Field<'_>) -> Result<Option<Attachment>, ApiError> {
    let filename = field
        .file_name()
        .filter(|name| !name.trim().is_empty())
        .unwrap_or("cv.pdf")
        .to_string();
    let declared = field
        .content_type()
        .filter(|ct| *ct != "application/octet-stream")
        .map(str::to_string);
    let bytes = field.bytes().await.map_err(bad_form)?;

    if bytes.is_empty() {
        return Ok(None);
    }

    info!(filename = %filename, bytes = bytes.len(), "cv_uploaded");
    let attachment = Attachment::new(filename, bytes.to_vec());
    Ok(Some(match declared {
        Some(content_type) => attachment.with_content_type(content_type),
        None => attachment,
    }))
}

/// Check every submitted entry, returning the distinct recipients and the
/// number of repeated entries. Each entry must be exactly one valid address.
pub fn parse_recipients(entries: &[String]) -> Result<(Vec<ValidatedAddress>, usize), Vec<String>> {
    let mut recipients = Vec::with_capacity(entries.len());
    let mut rejected = Vec::new();
    let mut seen = HashSet::new();
    let mut duplicates = 0;

    for entry in entries {
        match ValidatedAddress::parse(entry) {
            Some(address) => {
                if seen.insert(address.normalized().to_string()) {
                    recipients.push(address);
                } else {
                    duplicates += 1;
                }
            }
            None => rejected.push(entry.clone()),
        }
    }

    if rejected.is_empty() {
        Ok((recipients, duplicates))
    } else {
        Err(rejected)
    }
}

/// Validate, load the campaign and send. Shared by the form handler and tests.
pub async fn send_batch(
    state: &AppState,
    request: SendRequest,
    upload: Option<Attachment>,
) -> Result<SendResponse, ApiError> {
    if request.recipient_emails.iter().all(|r| r.trim().is_empty()) {
        return Err(api_error(StatusCode::BAD_REQUEST, "No recipient emails provided"));
    }

    let (recipients, duplicates) = parse_recipients(&request.recipient_emails).map_err(|rejected| {
        warn!(invalid = rejected.len(), "send_request_invalid_recipients");
        api_error(
            StatusCode::BAD_REQUEST,
            format!("Invalid recipient emails: {}", rejected.join(", ")),
        )
    })?;

    let mut campaign = Campaign::load(Arc::clone(&state.config))
        .await
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    if let Some(attachment) = upload {
        campaign = campaign.with_attachment(attachment);
    }

    let mode = campaign
        .mode(&request.speed_mode)
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string()))?;

    info!(
        recipients = recipients.len(),
        duplicates = duplicates,
        mode = mode.name(),
        "send_request_accepted"
    );

    let outcome = campaign
        .run(&recipients, mode, None, state.shutdown.child_token())
        .await
        .map_err(|e| match e {
            CampaignError::Connection(ref inner) => {
                error!(error = %inner, "send_request_no_session");
                api_error(StatusCode::BAD_GATEWAY, inner.summary())
            }
            other => api_error(StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
        })?;

    Ok(SendResponse {
        mode: outcome.mode.name(),
        attachment: campaign.attachment().map(|a| a.filename.clone()),
        summary: outcome.report.summary(),
        results: outcome.report.results,
        elapsed_time: outcome.elapsed.as_secs_f64(),
    })
}
