use async_trait::async_trait;
use reqwest::{multipart, Client};
use serde::Deserialize;

use crate::models::result::{InferenceOutput, PageOutput, TextBlock};
use crate::services::fetch::LocalResource;

/// Black-box document/image understanding.
#[async_trait]
pub trait InferenceEngine: Send + Sync {
    async fn run(&self, resource: &LocalResource) -> Result<InferenceOutput, InferenceError>;
}

/// Client for a remote OCR service exposing `POST /infer/`.
pub struct OcrServiceClient {
    http: Client,
    base_url: String,
}

#[derive(Deserialize)]
struct OcrResponse {
    results: Vec<OcrLine>,
}

#[derive(Deserialize)]
struct OcrLine {
    text: String,
    confidence: f64,
    #[serde(default)]
    bbox: Vec<[f64; 2]>,
}

impl OcrServiceClient {
    pub fn new(base_url: &str) -> Result<Self, InferenceError> {
        let http = Client::builder().build().map_err(InferenceError::Http)?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl InferenceEngine for OcrServiceClient {
    async fn run(&self, resource: &LocalResource) -> Result<InferenceOutput, InferenceError> {
        let bytes = tokio::fs::read(resource.path())
            .await
            .map_err(InferenceError::Io)?;
        let (file_name, mime) = sniff_document(&bytes)?;

        let part = multipart::Part::bytes(bytes)
            .file_name(file_name)
            .mime_str(mime)
            .map_err(InferenceError::Http)?;
        let form = multipart::Form::new().part("file", part);

        let response = self
            .http
            .post(format!("{}/infer/", self.base_url))
            .multipart(form)
            .send()
            .await
            .map_err(InferenceError::Http)?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(InferenceError::Backend {
                status: status.as_u16(),
                detail,
            });
        }

        let ocr: OcrResponse = response.json().await.map_err(InferenceError::Http)?;
        Ok(page_from_lines(ocr.results))
    }
}

fn page_from_lines(lines: Vec<OcrLine>) -> InferenceOutput {
    let text = lines
        .iter()
        .map(|l| l.text.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    let blocks = lines
        .into_iter()
        .map(|l| TextBlock {
            text: l.text,
            confidence: l.confidence,
            bbox: l.bbox,
        })
        .collect();
    InferenceOutput {
        pages: vec![PageOutput { text, blocks }],
        images: Default::default(),
    }
}

/// Accept PDFs and any image format the `image` crate recognizes.
fn sniff_document(bytes: &[u8]) -> Result<(&'static str, &'static str), InferenceError> {
    if bytes.starts_with(b"%PDF") {
        return Ok(("document.pdf", "application/pdf"));
    }
    match image::guess_format(bytes) {
        Ok(image::ImageFormat::Png) => Ok(("image.png", "image/png")),
        Ok(image::ImageFormat::Jpeg) => Ok(("image.jpg", "image/jpeg")),
        Ok(image::ImageFormat::WebP) => Ok(("image.webp", "image/webp")),
        Ok(format) => Err(InferenceError::UnsupportedInput(format!("{format:?}"))),
        Err(_) => Err(InferenceError::UnsupportedInput("unrecognized file type".to_string())),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("OCR request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("OCR service returned {status}: {detail}")]
    Backend { status: u16, detail: String },

    #[error("Unsupported input kind: {0}")]
    UnsupportedInput(String),

    #[error("Inference timed out after {0}s")]
    Timeout(u64),

    #[error("Failed to read input file: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sniff_pdf() {
        assert_eq!(
            sniff_document(b"%PDF-1.7\n...").unwrap(),
            ("document.pdf", "application/pdf")
        );
    }

    #[test]
    fn test_sniff_png_magic() {
        let png_magic = b"\x89PNG\r\n\x1a\n\0\0\0\0";
        assert_eq!(sniff_document(png_magic).unwrap().1, "image/png");
    }

    #[test]
    fn test_sniff_rejects_text() {
        assert!(matches!(
            sniff_document(b"plain text"),
            Err(InferenceError::UnsupportedInput(_))
        ));
    }

    #[test]
    fn test_lines_become_one_page() {
        let output = page_from_lines(vec![
            OcrLine { text: "Invoice".to_string(), confidence: 0.99, bbox: vec![] },
            OcrLine { text: "Total: 10".to_string(), confidence: 0.87, bbox: vec![[0.0, 1.0]] },
        ]);
        assert_eq!(output.pages.len(), 1);
        assert_eq!(output.markdown(), "Invoice\nTotal: 10");
        assert_eq!(output.pages[0].blocks[1].bbox, vec![[0.0, 1.0]]);
    }
}
