//! Fruitcount configuration. Constants are compiled in; everything else is
//! read once at startup from `fruitcount.toml` and the environment.

use anyhow::{anyhow, Result};
use ::config::builder::DefaultState;
use ::config::{Config, ConfigBuilder, ConfigError, Environment, File, FileFormat, Map};
use serde::Deserialize;
use std::ffi::OsString;
use std::fmt;
use std::time::Duration;

/// Default configuration file, looked up in the working directory
pub const CONFIG_FILE: &str = "fruitcount.toml";

/// Environment variable that overrides `CONFIG_FILE`
pub const CONFIG_FILE_VAR: &str = "FRUITCOUNT_CONFIG";

/// Environment variables read into `Settings`, one per field
pub const ENV_KEYS: [&str; 7] = [
    "GOOGLE_API_KEY",
    "HOST",
    "PORT",
    "GEMINI_MODEL",
    "GEMINI_ENDPOINT",
    "REQUEST_TIMEOUT_SECS",
    "MAX_UPLOAD_BYTES",
];

/// Log filter used when `RUST_LOG` is unset
pub const RUST_LOG: &str = "info,actix_web=info";

/// Content types accepted for the uploaded `file` field
pub const ALLOWED_MIME_TYPES: [&str; 3] = ["image/jpeg", "image/png", "image/jpg"];

/// The instruction sent to the model alongside every image
pub const INPUT_PROMPT: &str = r#"
You are an expert nutritionist. Analyze the food items visible in the image and calculate their total calories.
Respond with a JSON-like database format that includes the following fields:

- id: Unique identifier for the item.
- item_name: The name of the food item.
- quantity: The number of each item visible in the image.
- calories: The calorie count for the given quantity of the item.

Example response format:
{
"data":[
{
    "id": 1,
    "item_name": "Banana",
    "quantity": "5",
    "calories": "600",
    "short_description": "Approximately 120 calories per banana (medium size)"
  },
  {
    "id": 2,
    "item_name": "Green Grapes",
    "quantity": "1 bunch (approx. 30 grapes)",
    "calories": "150" ,
    "short_description": "Approximately 5 calories per grape"
  }
],
  "total_calories": "1600",
  "disclaimer": "Calorie counts are estimates and can vary based on the specific size and type of fruit. These values represent reasonable approximations for commonly available sizes of these fruits. The image doesn't provide exact weights, so these calculations have a margin of error."
}
"#;

/// Is `content_type` one of the accepted upload types? Parameters such as
/// `; charset=...` are ignored and the comparison is case-insensitive.
pub fn is_allowed_mime(content_type: &str) -> bool {
    let essence = content_type.split(';').next().unwrap_or_default().trim();
    ALLOWED_MIME_TYPES
        .iter()
        .any(|allowed| allowed.eq_ignore_ascii_case(essence))
}

/// Process-wide settings, built once in `main` and shared read-only
#[derive(Clone, Deserialize)]
pub struct Settings {
    /// Credential for the Gemini API. Optional so the server can still boot
    /// without it; inference requests fail until it is set.
    pub google_api_key: Option<String>,

    pub host: String,
    pub port: u16,

    /// Gemini model name, e.g. `gemini-1.5-flash`
    pub gemini_model: String,

    /// Base URL of the Gemini REST API, without a trailing slash
    pub gemini_endpoint: String,

    /// Upper bound on a single outbound inference call
    pub request_timeout_secs: u64,

    /// Largest accepted `file` field, in bytes
    pub max_upload_bytes: usize,
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field(
                "google_api_key",
                &self.google_api_key.as_ref().map(|_| "<redacted>"),
            )
            .field("host", &self.host)
            .field("port", &self.port)
            .field("gemini_model", &self.gemini_model)
            .field("gemini_endpoint", &self.gemini_endpoint)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("max_upload_bytes", &self.max_upload_bytes)
            .finish()
    }
}

impl Settings {
    /// Load settings from defaults, the optional config file, and the
    /// environment, in increasing order of precedence
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_FILE_VAR).unwrap_or_else(|_| CONFIG_FILE.to_string());

        let settings = Self::defaults()?
            .add_source(File::new(&path, FileFormat::Toml).required(false))
            .add_source(
                Environment::default()
                    .source(Some(env_overrides(std::env::vars_os())?))
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        Ok(settings)
    }

    /// Built-in defaults with no file or environment layered on top
    pub fn defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        Config::builder()
            .set_default("host", "0.0.0.0")?
            .set_default("port", 8000_i64)?
            .set_default("gemini_model", "gemini-1.5-flash")?
            .set_default(
                "gemini_endpoint",
                "https://generativelanguage.googleapis.com/v1beta",
            )?
            .set_default("request_timeout_secs", 60_i64)?
            .set_default("max_upload_bytes", 10 * 1024 * 1024_i64)
    }

    pub fn bind_address(&self) -> (String, u16) {
        (self.host.clone(), self.port)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Pick the `ENV_KEYS` out of a process environment. Other variables are
/// never looked at, so unrelated non-UTF-8 values are harmless.
pub fn env_overrides(
    vars: impl IntoIterator<Item = (OsString, OsString)>,
) -> Result<Map<String, String>> {
    let mut map = Map::new();
    for (key, value) in vars {
        let Some(key) = key.to_str().filter(|k| ENV_KEYS.contains(k)) else {
            continue;
        };
        let value = value
            .into_string()
            .map_err(|_| anyhow!("environment variable {key} is not valid UTF-8"))?;
        map.insert(key.to_string(), value);
    }
    Ok(map)
}
