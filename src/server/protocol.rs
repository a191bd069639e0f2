use serde::{Deserialize, Serialize};

/// Body of a successful `POST /count_fruits/`. `data` is the model's text,
/// passed through verbatim.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct CountFruitsResponse {
    pub success: bool,
    pub data: String,
}

impl CountFruitsResponse {
    pub fn new(data: String) -> Self {
        CountFruitsResponse {
            success: true,
            data,
        }
    }
}

/// Body of every error response
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct ErrorDetail {
    pub detail: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct HealthResponse {
    pub status: String,
}
