//! Google Gemini as an inference provider, over the `generateContent` REST
//! call. One prompt part and one inline image part per request.

use crate::config::Settings;
use crate::inference::InferenceCapability;
use crate::validator::PackagedImageUnit;
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use tracing::debug;

/// Header carrying the API key, so it never ends up in a logged URL
const API_KEY_HEADER: &str = "x-goog-api-key";

/// An image embedded in the request body, encoded as base 64
#[derive(Serialize, PartialEq)]
pub struct InlineData {
    pub mime_type: String,
    pub data: String,
}

impl Debug for InlineData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "InlineData {{ mime_type: {:?}, data: <data> }}",
            self.mime_type
        )
    }
}

impl From<&PackagedImageUnit> for InlineData {
    fn from(unit: &PackagedImageUnit) -> Self {
        InlineData {
            mime_type: unit.mime_type.clone(),
            data: general_purpose::STANDARD.encode(&unit.data),
        }
    }
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum Part<'a> {
    Text(&'a str),
    InlineData(InlineData),
}

#[derive(Debug, Serialize)]
pub struct Content<'a> {
    pub parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
pub struct GenerateContentRequest<'a> {
    pub contents: Vec<Content<'a>>,
}

impl<'a> GenerateContentRequest<'a> {
    pub fn new(prompt: &'a str, image: &PackagedImageUnit) -> Self {
        GenerateContentRequest {
            contents: vec![Content {
                parts: vec![Part::Text(prompt), Part::InlineData(image.into())],
            }],
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

/// Pull the text out of a successful `generateContent` body: every text
/// part of the first candidate, concatenated
pub fn parse_response(body: &str) -> Result<String> {
    let response: GenerateContentResponse =
        serde_json::from_str(body).context("malformed response from Gemini")?;

    let Some(candidate) = response.candidates.into_iter().next() else {
        return Err(match response.prompt_feedback.and_then(|f| f.block_reason) {
            Some(reason) => anyhow!("prompt was blocked: {reason}"),
            None => anyhow!("response contained no candidates"),
        });
    };

    let text: String = candidate
        .content
        .map(|content| content.parts)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|part| part.text)
        .collect();

    if text.is_empty() {
        return Err(match candidate.finish_reason {
            Some(reason) => anyhow!("response contained no text (finish reason: {reason})"),
            None => anyhow!("response contained no text"),
        });
    }

    Ok(text)
}

/// Describe a non-2xx reply, preferring the provider's own message
pub fn error_message(status: StatusCode, body: &str) -> String {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => format!("{status}: {}", envelope.error.message),
        Err(_) => format!("HTTP {status}: {body}"),
    }
}

/// Client for one Gemini model. Built once at startup and shared by every
/// request; the underlying connection pool is reused.
pub struct GeminiClient {
    http: reqwest::Client,
    api_key: Option<String>,
    model: String,
    endpoint: String,
}

impl Debug for GeminiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiClient")
            .field("model", &self.model)
            .field("endpoint", &self.endpoint)
            .field("has_api_key", &self.api_key.is_some())
            .finish()
    }
}

impl GeminiClient {
    pub fn new(settings: &Settings) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(settings.request_timeout())
            .build()
            .context("failed to build HTTP client")?;

        Ok(GeminiClient {
            http,
            api_key: settings.google_api_key.clone(),
            model: settings.gemini_model.clone(),
            endpoint: settings.gemini_endpoint.clone(),
        })
    }

    /// The `generateContent` URL for the configured model
    pub fn url(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.endpoint.trim_end_matches('/'),
            self.model
        )
    }
}

#[async_trait]
impl InferenceCapability for GeminiClient {
    async fn generate(&self, prompt: &str, image: &PackagedImageUnit) -> Result<String> {
        let Some(api_key) = self.api_key.as_deref() else {
            bail!("GOOGLE_API_KEY is not configured");
        };

        let url = self.url();
        debug!("POST {url}");

        let response = self
            .http
            .post(&url)
            .header(API_KEY_HEADER, api_key)
            .json(&GenerateContentRequest::new(prompt, image))
            .send()
            .await
            .context("request to Gemini failed")?;

        let status = response.status();
        let body = response
            .text()
            .await
            .context("failed to read Gemini response")?;

        if !status.is_success() {
            bail!(error_message(status, &body));
        }

        parse_response(&body)
    }

    fn name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::web::{self, Bytes};
    use actix_web::{App, HttpRequest, HttpResponse, HttpServer};
    use serde_json::{json, Value};
    use std::net::SocketAddr;
    use std::sync::Mutex;
    use std::time::Duration;

    fn unit() -> PackagedImageUnit {
        PackagedImageUnit {
            mime_type: "image/jpeg".to_string(),
            data: Bytes::from_static(b"hello"),
        }
    }

    fn settings(api_key: Option<&str>) -> Settings {
        Settings {
            google_api_key: api_key.map(str::to_string),
            host: "127.0.0.1".to_string(),
            port: 0,
            gemini_model: "gemini-1.5-flash".to_string(),
            gemini_endpoint: "http://127.0.0.1:9/v1beta/".to_string(),
            request_timeout_secs: 1,
            max_upload_bytes: 1024,
        }
    }

    #[test]
    fn request_body_has_prompt_then_image() {
        let body = serde_json::to_value(GenerateContentRequest::new("count", &unit())).unwrap();
        assert_eq!(
            body,
            json!({
                "contents": [{
                    "parts": [
                        { "text": "count" },
                        { "inline_data": { "mime_type": "image/jpeg", "data": "aGVsbG8=" } }
                    ]
                }]
            })
        );
    }

    #[test]
    fn url_joins_endpoint_and_model() {
        let client = GeminiClient::new(&settings(Some("k"))).unwrap();
        assert_eq!(
            client.url(),
            "http://127.0.0.1:9/v1beta/models/gemini-1.5-flash:generateContent"
        );
        assert!(!format!("{client:?}").contains("\"k\""));
    }

    #[test]
    fn parses_text_from_first_candidate() {
        let body = json!({
            "candidates": [
                {
                    "content": { "role": "model", "parts": [{ "text": "```json\n{" }, { "text": "}\n```" }] },
                    "finishReason": "STOP"
                },
                { "content": { "parts": [{ "text": "ignored" }] } }
            ]
        })
        .to_string();
        assert_eq!(parse_response(&body).unwrap(), "```json\n{}\n```");
    }

    #[test]
    fn blocked_prompt_is_an_error() {
        let body = json!({ "promptFeedback": { "blockReason": "SAFETY" } }).to_string();
        let err = parse_response(&body).unwrap_err();
        assert_eq!(err.to_string(), "prompt was blocked: SAFETY");
    }

    #[test]
    fn candidate_without_text_is_an_error() {
        let body = json!({ "candidates": [{ "finishReason": "SAFETY" }] }).to_string();
        let err = parse_response(&body).unwrap_err();
        assert!(err.to_string().contains("SAFETY"));
    }

    #[test]
    fn garbage_body_is_an_error() {
        assert!(parse_response("<html>oops</html>").is_err());
    }

    #[test]
    fn error_message_prefers_provider_message() {
        let body = json!({
            "error": { "code": 400, "message": "API key not valid.", "status": "INVALID_ARGUMENT" }
        })
        .to_string();
        assert_eq!(
            error_message(StatusCode::BAD_REQUEST, &body),
            "400 Bad Request: API key not valid."
        );
        assert_eq!(
            error_message(StatusCode::BAD_GATEWAY, "upstream down"),
            "HTTP 502 Bad Gateway: upstream down"
        );
    }

    #[actix_web::test]
    async fn missing_api_key_fails_without_calling_out() {
        let client = GeminiClient::new(&settings(None)).unwrap();
        let err = client.generate("prompt", &unit()).await.unwrap_err();
        assert_eq!(err.to_string(), "GOOGLE_API_KEY is not configured");
    }

    /// What the fake provider saw of one request
    #[derive(Debug)]
    struct SeenRequest {
        api_key: Option<String>,
        query: String,
        body: Value,
    }

    type Seen = web::Data<Mutex<Vec<SeenRequest>>>;

    /// Stands in for `generateContent`. The model name picks the reply.
    async fn fake_generate(
        req: HttpRequest,
        call: web::Path<String>,
        body: web::Json<Value>,
        seen: Seen,
    ) -> HttpResponse {
        seen.lock().unwrap().push(SeenRequest {
            api_key: req
                .headers()
                .get(API_KEY_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
            query: req.query_string().to_string(),
            body: body.into_inner(),
        });

        match call.as_str() {
            "flash:generateContent" => HttpResponse::Ok().json(json!({
                "candidates": [{
                    "content": { "role": "model", "parts": [{ "text": "hi " }, { "text": "there" }] },
                    "finishReason": "STOP"
                }]
            })),
            "quota:generateContent" => HttpResponse::TooManyRequests().json(json!({
                "error": { "code": 429, "message": "quota exceeded", "status": "RESOURCE_EXHAUSTED" }
            })),
            "slow:generateContent" => {
                actix_web::rt::time::sleep(Duration::from_secs(3)).await;
                HttpResponse::Ok().finish()
            }
            _ => HttpResponse::NotFound().finish(),
        }
    }

    /// Serve `fake_generate` on an ephemeral local port
    fn start_fake_provider() -> (SocketAddr, Seen) {
        let seen: Seen = web::Data::new(Mutex::new(Vec::new()));
        let data = seen.clone();

        let server = HttpServer::new(move || {
            App::new()
                .app_data(data.clone())
                .route("/v1beta/models/{call}", web::post().to(fake_generate))
        })
        .workers(1)
        .bind(("127.0.0.1", 0))
        .unwrap();

        let addr = server.addrs()[0];
        actix_web::rt::spawn(server.run());
        (addr, seen)
    }

    fn client_for(addr: SocketAddr, model: &str) -> GeminiClient {
        let mut settings = settings(Some("test-key"));
        settings.gemini_endpoint = format!("http://{addr}/v1beta");
        settings.gemini_model = model.to_string();
        GeminiClient::new(&settings).unwrap()
    }

    #[actix_web::test]
    async fn generate_sends_key_header_and_inline_image() {
        let (addr, seen) = start_fake_provider();
        let client = client_for(addr, "flash");

        let text = client.generate("count the fruit", &unit()).await.unwrap();
        assert_eq!(text, "hi there");

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].api_key.as_deref(), Some("test-key"));
        // The key travels in the header, never in the URL
        assert_eq!(seen[0].query, "");
        assert_eq!(
            seen[0].body,
            json!({
                "contents": [{
                    "parts": [
                        { "text": "count the fruit" },
                        { "inline_data": { "mime_type": "image/jpeg", "data": "aGVsbG8=" } }
                    ]
                }]
            })
        );
    }

    #[actix_web::test]
    async fn generate_maps_provider_error_message() {
        let (addr, seen) = start_fake_provider();
        let client = client_for(addr, "quota");

        let err = client.generate("prompt", &unit()).await.unwrap_err();
        assert_eq!(err.to_string(), "429 Too Many Requests: quota exceeded");
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[actix_web::test]
    async fn generate_gives_up_after_timeout() {
        let (addr, _seen) = start_fake_provider();
        let client = client_for(addr, "slow");

        let err = client.generate("prompt", &unit()).await.unwrap_err();
        let timed_out = err
            .chain()
            .filter_map(|cause| cause.downcast_ref::<reqwest::Error>())
            .any(reqwest::Error::is_timeout);
        assert!(timed_out, "{err:#}");
    }
}
