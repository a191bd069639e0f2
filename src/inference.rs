//! Forwards a validated image and the fixed prompt to an inference provider

use crate::error::{Result, ServiceError};
use crate::validator::PackagedImageUnit;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

/// Something that can look at an image and answer a prompt about it. The
/// returned text is passed through to the caller untouched.
#[async_trait]
pub trait InferenceCapability: Send + Sync {
    async fn generate(&self, prompt: &str, image: &PackagedImageUnit) -> anyhow::Result<String>;

    /// Short provider name for logs
    fn name(&self) -> &str;
}

/// Runs exactly one inference call per request. No retries: a failed call is
/// a failed request.
#[derive(Clone)]
pub struct InferenceRequestor {
    capability: Arc<dyn InferenceCapability>,
    prompt: Arc<str>,
}

impl InferenceRequestor {
    pub fn new(capability: Arc<dyn InferenceCapability>, prompt: impl Into<Arc<str>>) -> Self {
        InferenceRequestor {
            capability,
            prompt: prompt.into(),
        }
    }

    /// Send the prompt and `image` to the provider and return its raw text
    pub async fn request_inference(&self, image: &PackagedImageUnit) -> Result<String> {
        let start = Instant::now();
        info!(
            "requesting inference from {} for {image:?}",
            self.capability.name()
        );

        match self.capability.generate(&self.prompt, image).await {
            Ok(text) => {
                info!(
                    "inference finished in {} ms ({} chars)",
                    start.elapsed().as_millis(),
                    text.len()
                );
                Ok(text)
            }
            Err(e) => {
                let cause = describe(&e);
                error!(
                    "inference failed after {} ms: {cause}",
                    start.elapsed().as_millis()
                );
                Err(ServiceError::InferenceFailure(cause))
            }
        }
    }
}

/// The outermost message plus the root cause. HTTP client errors already
/// embed their intermediate sources, so the full chain would repeat them.
fn describe(err: &anyhow::Error) -> String {
    let root = err.root_cause();
    if err.chain().count() > 1 {
        format!("{err}: {root}")
    } else {
        err.to_string()
    }
}
