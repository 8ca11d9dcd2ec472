//! Error types for the generation pipeline and the HTTP surface.
//!
//! Pipeline stages fail with [`PipelineError`]. The request handler converts
//! every failure into an [`ApiError`], which owns the JSON envelope and status
//! code the client sees. Full detail only ever goes to the logs.

use std::path::PathBuf;

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;

use crate::pipeline::Stage;

/// Failure of one stage of the generation pipeline.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("QR encoding failed: {message}")]
    Encoding { message: String },

    /// `path` stays out of the message, which is shown to clients.
    #[error("Template asset unusable: {message}")]
    Asset { path: PathBuf, message: String },

    #[error(
        "Overlay {overlay_width}x{overlay_height} at ({left}, {top}) does not fit template {template_width}x{template_height}"
    )]
    Geometry {
        left: u32,
        top: u32,
        overlay_width: u32,
        overlay_height: u32,
        template_width: u32,
        template_height: u32,
    },

    #[error("Render error: {message}")]
    Render { message: String },
}

impl PipelineError {
    pub fn encoding(msg: impl Into<String>) -> Self {
        Self::Encoding {
            message: msg.into(),
        }
    }

    pub fn asset(path: impl Into<PathBuf>, msg: impl Into<String>) -> Self {
        Self::Asset {
            path: path.into(),
            message: msg.into(),
        }
    }

    pub fn render(msg: impl Into<String>) -> Self {
        Self::Render {
            message: msg.into(),
        }
    }

    /// Stage the failure belongs to.
    pub fn stage(&self) -> Stage {
        match self {
            Self::Encoding { .. } => Stage::Encoding,
            Self::Asset { .. } => Stage::Loading,
            Self::Geometry { .. } => Stage::Compositing,
            Self::Render { .. } => Stage::Assembling,
        }
    }

    /// A broken or missing template is an operator problem, not a bad request.
    pub fn is_configuration_fault(&self) -> bool {
        matches!(self, Self::Asset { .. })
    }
}

/// Whether a request field was present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldPresence {
    Provided,
    Missing,
}

impl FieldPresence {
    pub fn of(present: bool) -> Self {
        if present { Self::Provided } else { Self::Missing }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Provided => "provided",
            Self::Missing => "missing",
        }
    }
}

/// Error returned to HTTP clients.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Missing required parameters")]
    MissingParameters {
        url: FieldPresence,
        auth_secret: FieldPresence,
    },

    #[error("Invalid authentication secret")]
    Unauthorized,

    #[error("Failed to process image: {0}")]
    Processing(String),

    #[error("Something went wrong!: {0}")]
    Unhandled(String),
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        ApiError::Processing(err.to_string())
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::MissingParameters { .. } => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Processing(_) | ApiError::Unhandled(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let body = match self {
            ApiError::MissingParameters { url, auth_secret } => json!({
                "error": "Missing required parameters",
                "details": {
                    "url": url.as_str(),
                    "authSecret": auth_secret.as_str(),
                },
            }),
            ApiError::Unauthorized => json!({ "error": "Invalid authentication secret" }),
            ApiError::Processing(details) => json!({
                "error": "Failed to process image",
                "details": details,
            }),
            ApiError::Unhandled(details) => json!({
                "error": "Something went wrong!",
                "details": details,
            }),
        };
        HttpResponse::build(self.status_code()).json(body)
    }
}
