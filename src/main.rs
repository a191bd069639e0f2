use actix_web::{middleware, web, App, HttpServer};
use fruitcount::config::{Settings, RUST_LOG};
use fruitcount::server::{routes, AppState};
use std::io;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[actix_web::main]
async fn main() -> io::Result<()> {
    // A missing .env is fine; real environment variables still apply
    let dotenv = dotenvy::dotenv();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(RUST_LOG));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Ok(path) = dotenv {
        info!("loaded environment from {}", path.display());
    }

    let settings = Settings::load().map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    if settings.google_api_key.is_none() {
        warn!("GOOGLE_API_KEY is not set; every inference request will fail");
    }
    info!("starting fruitcount with {settings:?}");

    let bind = settings.bind_address();
    let state = AppState::with_gemini(settings).map_err(io::Error::other)?;
    let state = web::Data::new(state);

    // Start the HTTP server
    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .wrap(middleware::Logger::default())
            .configure(routes::configure)
    })
    .bind(bind)?
    .run()
    .await
}
