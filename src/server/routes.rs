//! Route handlers. `configure` registers all of them on an `App`.

use super::protocol::{CountFruitsResponse, ErrorDetail, HealthResponse};
use super::AppState;
use crate::config;
use crate::error::{Result, ServiceError};
use crate::validator::{self, UploadedImage};
use actix_multipart::{Field, Multipart, MultipartError};
use actix_web::http::header::ContentType;
use actix_web::{get, post, web, HttpRequest, HttpResponse, Responder};
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

/// Name of the multipart field holding the image
pub const FILE_FIELD: &str = "file";

const INDEX_HTML: &str = r#"<html>
    <head>
        <title>Fruit Counter</title>
    </head>
    <body>
        <h1>Upload an Image of Fruits</h1>
        <form action="/count_fruits/" enctype="multipart/form-data" method="post">
            <input name="file" type="file" accept="image/*">
            <input type="submit">
        </form>
    </body>
</html>
"#;

/// Register every route, plus a JSON 404 for anything else
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(index)
        .service(count_fruits)
        .service(health)
        .default_service(web::route().to(not_found));
}

/// The upload form
#[get("/")]
pub async fn index() -> HttpResponse {
    HttpResponse::Ok()
        .content_type(ContentType::html())
        .body(INDEX_HTML)
}

/// Validate the uploaded image and ask the model about it
#[post("/count_fruits/")]
pub async fn count_fruits(
    mut payload: Multipart,
    state: web::Data<AppState>,
) -> Result<impl Responder> {
    let upload = read_upload(&mut payload, state.settings.max_upload_bytes).await?;

    // Decoding is CPU-bound; keep it off the worker thread
    let image = web::block(move || validator::validate(upload))
        .await
        .map_err(anyhow::Error::from)??;
    let text = state.requestor.request_inference(&image).await?;

    info!("finished serving count_fruits request");

    Ok(web::Json(CountFruitsResponse::new(text)))
}

/// Liveness probe
#[get("/health")]
pub async fn health() -> impl Responder {
    web::Json(HealthResponse {
        status: "ok".to_string(),
    })
}

async fn not_found(req: HttpRequest) -> HttpResponse {
    debug!("no route for {} {}", req.method(), req.path());
    HttpResponse::NotFound().json(ErrorDetail {
        detail: "Not Found".to_string(),
    })
}

fn malformed(err: MultipartError) -> ServiceError {
    ServiceError::MalformedUpload(err.to_string())
}

/// Find the `file` field and buffer its contents. The content type is
/// checked against the allow-list before any of the body is read.
async fn read_upload(payload: &mut Multipart, limit: usize) -> Result<UploadedImage> {
    while let Some(field) = payload.next().await {
        let mut field = field.map_err(malformed)?;

        if field.name() != FILE_FIELD {
            debug!("skipping form field {:?}", field.name());
            drain(&mut field).await?;
            continue;
        }

        let content_type = field
            .content_type()
            .map(|mime| mime.essence_str().to_string())
            .unwrap_or_default();

        if !config::is_allowed_mime(&content_type) {
            warn!("unsupported content type {content_type:?}");
            return Err(ServiceError::UnsupportedMediaType);
        }

        let mut data = web::BytesMut::new();
        while let Some(chunk) = field.next().await {
            let chunk = chunk.map_err(malformed)?;
            if data.len() + chunk.len() > limit {
                return Err(ServiceError::MalformedUpload(format!(
                    "file is larger than {limit} bytes"
                )));
            }
            data.extend_from_slice(&chunk);
        }

        debug!("received {} bytes of {content_type}", data.len());
        return Ok(UploadedImage::new(data.freeze(), content_type));
    }

    Err(ServiceError::MissingFile)
}

async fn drain(field: &mut Field) -> Result<()> {
    while let Some(chunk) = field.next().await {
        chunk.map_err(malformed)?;
    }
    Ok(())
}
