use std::collections::BTreeMap;

use garde::Validate;
use serde::{Deserialize, Serialize};

use crate::models::job::JobStatus;

/// Admission request body.
///
/// Accepts both the legacy shape (`url`, `pdf_url`, `image_url` or
/// `image_base64` at the top level) and the structured shape (an `input` object
/// plus `execution_id` and `callback_url`).
#[derive(Debug, Default, Clone, Deserialize, Validate)]
pub struct SubmitRequest {
    #[garde(length(min = 1, max = 4096))]
    pub url: Option<String>,

    #[garde(length(min = 1, max = 4096))]
    pub pdf_url: Option<String>,

    #[garde(length(min = 1, max = 4096))]
    pub image_url: Option<String>,

    #[garde(length(min = 1))]
    pub image_base64: Option<String>,

    #[garde(dive)]
    pub input: Option<StructuredInput>,

    #[garde(length(min = 1, max = 200))]
    pub model_id: Option<String>,

    #[garde(length(min = 1, max = 200))]
    pub execution_id: Option<String>,

    #[garde(length(min = 1, max = 4096))]
    pub callback_url: Option<String>,

    #[garde(length(min = 1, max = 4096))]
    pub callback_token: Option<String>,

    #[garde(skip)]
    #[serde(default)]
    pub callback_headers: BTreeMap<String, String>,

    #[garde(length(min = 1, max = 128))]
    pub idempotency_key: Option<String>,
}

/// The `input` object of the structured contract.
#[derive(Debug, Default, Clone, Deserialize, Validate)]
pub struct StructuredInput {
    #[garde(length(min = 1, max = 4096))]
    pub url: Option<String>,

    #[garde(length(min = 1))]
    pub image_data: Option<String>,

    #[garde(skip)]
    pub text: Option<String>,
}

/// Response after admitting a job.
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub job_id: String,
    pub status: JobStatus,
}

/// Response for status and result queries.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct JobView {
    pub job_id: String,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
