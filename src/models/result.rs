use std::collections::BTreeMap;
use std::io::Cursor;

use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::models::job::{Contract, JobInput, JobStatus};

/// One recognized text region.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TextBlock {
    pub text: String,
    pub confidence: f64,
    #[serde(default)]
    pub bbox: Vec<[f64; 2]>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageOutput {
    pub text: String,
    pub blocks: Vec<TextBlock>,
}

/// What the inference engine hands back for one document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InferenceOutput {
    pub pages: Vec<PageOutput>,
    /// Embedded images keyed by their markdown path, as encoded image bytes.
    pub images: BTreeMap<String, Vec<u8>>,
}

impl InferenceOutput {
    /// Single-page output with no layout blocks.
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            pages: vec![PageOutput {
                text: text.into(),
                blocks: Vec::new(),
            }],
            images: BTreeMap::new(),
        }
    }

    /// Page texts joined by a blank line.
    pub fn markdown(&self) -> String {
        self.pages
            .iter()
            .map(|p| p.text.as_str())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PageResult {
    pub page: usize,
    pub text: String,
    pub blocks: Vec<TextBlock>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Usage {
    pub total_tokens: usize,
}

/// Result stored on a finished job and delivered to callback receivers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ResultEnvelope {
    Structured {
        model_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        input_url: Option<String>,
        pages: Vec<PageResult>,
        markdown: String,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        images: BTreeMap<String, String>,
        usage: Usage,
    },
    Legacy {
        markdown: String,
        images: BTreeMap<String, String>,
    },
}

impl ResultEnvelope {
    /// Assemble the envelope for the contract the job was admitted under.
    pub fn build(input: &JobInput, output: InferenceOutput) -> Result<Self, EnvelopeError> {
        let markdown = output.markdown();
        let images = encode_images(&output.images)?;

        Ok(match &input.contract {
            Contract::Legacy => ResultEnvelope::Legacy { markdown, images },
            Contract::Structured { model_id, .. } => {
                let total_tokens = markdown.split_whitespace().count();
                let pages = output
                    .pages
                    .into_iter()
                    .enumerate()
                    .map(|(idx, p)| PageResult {
                        page: idx + 1,
                        text: p.text,
                        blocks: p.blocks,
                    })
                    .collect();
                ResultEnvelope::Structured {
                    model_id: model_id.clone(),
                    input_url: input.source.resource_url().map(str::to_string),
                    pages,
                    markdown,
                    images,
                    usage: Usage { total_tokens },
                }
            }
        })
    }
}

/// Base64-encode every image as PNG, re-encoding other formats.
fn encode_images(images: &BTreeMap<String, Vec<u8>>) -> Result<BTreeMap<String, String>, EnvelopeError> {
    let mut encoded = BTreeMap::new();
    for (path, bytes) in images {
        let png = match image::guess_format(bytes) {
            Ok(image::ImageFormat::Png) => bytes.clone(),
            _ => {
                let img = image::load_from_memory(bytes).map_err(|e| EnvelopeError::Image {
                    path: path.clone(),
                    source: e,
                })?;
                let mut out = Cursor::new(Vec::new());
                img.write_to(&mut out, image::ImageFormat::Png)
                    .map_err(|e| EnvelopeError::Image {
                        path: path.clone(),
                        source: e,
                    })?;
                out.into_inner()
            }
        };
        encoded.insert(path.clone(), base64::engine::general_purpose::STANDARD.encode(png));
    }
    Ok(encoded)
}

/// Body POSTed to a callback target.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CallbackPayload {
    pub job_id: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CallbackPayload {
    pub fn finished(job_id: &str, input: &JobInput, result: serde_json::Value) -> Self {
        Self::new(job_id, input, JobStatus::Finished.to_string(), Some(result), None)
    }

    pub fn failed(job_id: &str, input: &JobInput, error: impl Into<String>) -> Self {
        Self::new(job_id, input, JobStatus::Failed.to_string(), None, Some(error.into()))
    }

    /// Non-terminal progress notification.
    pub fn in_progress(job_id: &str, input: &JobInput) -> Self {
        Self::new(job_id, input, "in_progress".to_string(), None, None)
    }

    fn new(
        job_id: &str,
        input: &JobInput,
        status: String,
        result: Option<serde_json::Value>,
        error: Option<String>,
    ) -> Self {
        let execution_id = match &input.contract {
            Contract::Structured { execution_id, .. } => Some(execution_id.clone()),
            Contract::Legacy => None,
        };
        Self {
            job_id: job_id.to_string(),
            status,
            execution_id,
            result,
            error,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("Failed to encode embedded image {path} as PNG: {source}")]
    Image {
        path: String,
        #[source]
        source: image::ImageError,
    },
}
