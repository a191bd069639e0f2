//! The user-facing HTTP front end: an upload form and one JSON endpoint
//! that validates an image and relays it to the inference provider

use crate::config::{Settings, INPUT_PROMPT};
use crate::error::ServiceError;
use crate::gemini::GeminiClient;
use crate::inference::{InferenceCapability, InferenceRequestor};
use actix_web::http::header::ContentType;
use actix_web::http::StatusCode;
use actix_web::HttpResponse;
use anyhow::Result;
use std::sync::Arc;
use tracing::{error, warn};

pub mod protocol;
pub mod routes;

/// Read-only state shared by every request
pub struct AppState {
    pub settings: Arc<Settings>,
    pub requestor: InferenceRequestor,
}

impl AppState {
    pub fn new(settings: Settings, capability: Arc<dyn InferenceCapability>) -> Self {
        AppState {
            settings: Arc::new(settings),
            requestor: InferenceRequestor::new(capability, INPUT_PROMPT),
        }
    }

    /// State backed by the real Gemini client
    pub fn with_gemini(settings: Settings) -> Result<Self> {
        let client = GeminiClient::new(&settings)?;
        Ok(AppState::new(settings, Arc::new(client)))
    }
}

impl actix_web::error::ResponseError for ServiceError {
    fn error_response(&self) -> HttpResponse {
        let detail = self.to_string();

        if self.is_client_error() {
            warn!("rejected request: {detail}");
        } else {
            error!("request failed: {detail}");
        }

        HttpResponse::build(self.status_code())
            .insert_header(ContentType::json())
            .json(protocol::ErrorDetail { detail })
    }

    fn status_code(&self) -> StatusCode {
        ServiceError::status_code(self)
    }
}
