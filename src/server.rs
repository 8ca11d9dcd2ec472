//! HTTP surface: routing, request validation, authentication and response
//! streaming around the generation [`Pipeline`].

use actix_web::http::header::{self, ContentType};
use actix_web::web;
use actix_web::{HttpResponse, Responder};
use serde::Deserialize;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::Settings;
use crate::error::{ApiError, FieldPresence, PipelineError};
use crate::pdf::{ChunkWriter, PdfDocument, forward_chunks};
use crate::pipeline::{Pipeline, Stage};

pub const ATTACHMENT_DISPOSITION: &str = "attachment; filename=qr-instructions.pdf";

/// Body chunks queued between the serializer and the socket.
const CHANNEL_DEPTH: usize = 8;

/// Largest accepted `POST /generate-qr-pdf` body.
pub const MAX_BODY_BYTES: usize = 64 * 1024;

/// Shared, read-only handler state.
pub struct AppState {
    pub settings: Arc<Settings>,
    pub pipeline: Arc<Pipeline>,
}

/// Raw `POST /generate-qr-pdf` body.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateBody {
    pub url: Option<String>,
    pub auth_secret: Option<String>,
}

/// A validated generation request.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub url: String,
    pub secret: String,
}

impl GenerationRequest {
    /// Check that both fields are present. An empty `url` counts as missing;
    /// an empty secret is present and left for authentication to reject.
    pub fn from_body(body: GenerateBody) -> Result<Self, ApiError> {
        let url = body.url.filter(|u| !u.is_empty());
        match (url, body.auth_secret) {
            (Some(url), Some(secret)) => Ok(Self { url, secret }),
            (url, secret) => Err(ApiError::MissingParameters {
                url: FieldPresence::of(url.is_some()),
                auth_secret: FieldPresence::of(secret.is_some()),
            }),
        }
    }
}

/// Register the service routes.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/", web::get().to(liveness))
        .route("/generate-qr-pdf", web::post().to(generate_qr_pdf));
}

/// Fallback for unknown routes.
pub async fn not_found() -> HttpResponse {
    HttpResponse::NotFound()
        .content_type(ContentType::plaintext())
        .body("Not Found")
}

async fn liveness() -> impl Responder {
    tracing::info!("liveness probe");
    HttpResponse::Ok()
        .content_type(ContentType::plaintext())
        .body("QR PDF service is running")
}

/// Collect the request body, refusing anything over [`MAX_BODY_BYTES`].
async fn read_body(mut payload: web::Payload) -> Result<Vec<u8>, ApiError> {
    let mut body = Vec::new();
    while let Some(chunk) = payload.next().await {
        let chunk = chunk.map_err(|e| ApiError::Unhandled(e.to_string()))?;
        if body.len() + chunk.len() > MAX_BODY_BYTES {
            return Err(ApiError::Unhandled(format!(
                "request body exceeds {} bytes",
                MAX_BODY_BYTES
            )));
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}

fn parse_body(raw: &[u8]) -> Result<GenerateBody, ApiError> {
    if raw.iter().all(u8::is_ascii_whitespace) {
        return Ok(GenerateBody::default());
    }
    serde_json::from_slice(raw).map_err(|e| ApiError::Unhandled(e.to_string()))
}

async fn generate_qr_pdf(
    state: web::Data<AppState>,
    payload: web::Payload,
) -> Result<HttpResponse, ApiError> {
    let request_id = Uuid::new_v4();
    let span = tracing::info_span!("generate_qr_pdf", %request_id);
    handle_generate(state.into_inner(), payload, request_id)
        .instrument(span)
        .await
}

async fn handle_generate(
    state: Arc<AppState>,
    payload: web::Payload,
    request_id: Uuid,
) -> Result<HttpResponse, ApiError> {
    let raw = read_body(payload).await.inspect_err(|e| {
        tracing::warn!(error = %e, "unreadable request body");
    })?;
    tracing::debug!(stage = %Stage::Validating, bytes = raw.len(), "request received");
    let body = parse_body(&raw).inspect_err(|e| {
        tracing::warn!(error = %e, "unparseable request body");
    })?;
    let request = GenerationRequest::from_body(body).inspect_err(|e| {
        tracing::warn!(error = %e, "rejected request");
    })?;

    tracing::debug!(stage = %Stage::Authenticating);
    if !state.settings.secret_matches(&request.secret) {
        tracing::warn!("invalid authentication secret");
        return Err(ApiError::Unauthorized);
    }

    tracing::info!(url = %request.url, "generating document");
    let pipeline = state.pipeline.clone();
    let url = request.url;
    let job = web::block(move || pipeline.run(&url, request_id));

    let timeout = state.settings.request_timeout;
    let document = match tokio::time::timeout(timeout, job).await {
        Ok(Ok(Ok(document))) => document,
        Ok(Ok(Err(err))) => return Err(log_pipeline_failure(err)),
        Ok(Err(blocking)) => {
            tracing::error!(error = %blocking, "pipeline worker failed");
            return Err(ApiError::Unhandled(blocking.to_string()));
        }
        Err(_) => {
            tracing::error!(timeout_secs = timeout.as_secs_f64(), "pipeline timed out");
            return Err(ApiError::Processing(format!(
                "processing exceeded {}s",
                timeout.as_secs_f64()
            )));
        }
    };

    Ok(stream_document(document, timeout))
}

fn log_pipeline_failure(err: PipelineError) -> ApiError {
    if let PipelineError::Asset { path, .. } = &err {
        tracing::error!(
            stage = %err.stage(),
            path = %path.display(),
            error = %err,
            "template asset unusable; check TEMPLATE_PATH"
        );
    } else {
        tracing::error!(stage = %err.stage(), error = %err, "pipeline failed");
    }
    err.into()
}

/// Serialize `document` on a blocking thread while the response body drains it.
///
/// A client that stops reading for longer than `stall_timeout` has its
/// response cut off and the serializer released.
fn stream_document(document: PdfDocument, stall_timeout: Duration) -> HttpResponse {
    let (tx, writer_rx) = mpsc::channel(CHANNEL_DEPTH);
    let (body_tx, rx) = mpsc::channel(CHANNEL_DEPTH);
    let span = tracing::Span::current();

    tokio::spawn(
        async move {
            if let Err(e) = forward_chunks(writer_rx, body_tx, stall_timeout).await {
                tracing::warn!(error = %e, "response stream abandoned");
            }
        }
        .instrument(span.clone()),
    );

    tokio::task::spawn_blocking(move || {
        let _entered = span.enter();
        let (width, height) = document.page_size();
        tracing::debug!(stage = %Stage::Streaming, width, height);
        let mut writer = ChunkWriter::new(tx);
        let result = document
            .write_to(&mut writer)
            .and_then(|()| writer.flush());
        match result {
            Ok(()) => match writer.finish() {
                Ok(bytes) => tracing::info!(stage = %Stage::Done, bytes, "document streamed"),
                Err(e) => tracing::warn!(error = %e, "client went away before the end of the document"),
            },
            Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                tracing::warn!(error = %e, "client went away mid-stream");
            }
            Err(e) => {
                tracing::error!(error = %e, "document serialization failed");
                writer.abort(e);
            }
        }
    });

    HttpResponse::Ok()
        .content_type("application/pdf")
        .insert_header((header::CONTENT_DISPOSITION, ATTACHMENT_DISPOSITION))
        .streaming(ReceiverStream::new(rx))
}
