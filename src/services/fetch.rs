use std::io::Write;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use tempfile::NamedTempFile;

use crate::models::job::NormalizedInput;

/// Downloaded or decoded input, stored in a temp file removed on drop.
#[derive(Debug)]
pub struct LocalResource {
    file: NamedTempFile,
    len: usize,
}

impl LocalResource {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FetchError> {
        let mut file = NamedTempFile::new().map_err(FetchError::Io)?;
        file.write_all(bytes).map_err(FetchError::Io)?;
        file.flush().map_err(FetchError::Io)?;
        Ok(Self {
            file,
            len: bytes.len(),
        })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Turns a normalized input into a local file the inference engine can read.
#[async_trait]
pub trait ResourceFetcher: Send + Sync {
    async fn fetch(&self, input: &NormalizedInput) -> Result<LocalResource, FetchError>;
}

/// Downloads `http(s)` URLs and decodes inline base64 images.
pub struct HttpResourceFetcher {
    http: Client,
    max_bytes: usize,
}

impl HttpResourceFetcher {
    pub fn new(timeout: Duration, max_bytes: usize) -> Result<Self, FetchError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(FetchError::Http)?;
        Ok(Self { http, max_bytes })
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(FetchError::UnsupportedScheme(url.to_string()));
        }

        let mut response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(FetchError::Http)?
            .error_for_status()
            .map_err(FetchError::Http)?;

        if let Some(len) = response.content_length() {
            if usize::try_from(len).map_or(true, |len| len > self.max_bytes) {
                return Err(FetchError::TooLarge { limit: self.max_bytes });
            }
        }

        // Chunked responses carry no length up front; stop as soon as the cap is crossed.
        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(FetchError::Http)? {
            if body.len() + chunk.len() > self.max_bytes {
                return Err(FetchError::TooLarge { limit: self.max_bytes });
            }
            body.extend_from_slice(&chunk);
        }
        Ok(body)
    }
}

#[async_trait]
impl ResourceFetcher for HttpResourceFetcher {
    async fn fetch(&self, input: &NormalizedInput) -> Result<LocalResource, FetchError> {
        let bytes = match input {
            NormalizedInput::ResourceUrl(url) => {
                tracing::debug!(url = %url, "Downloading resource");
                self.download(url).await?
            }
            NormalizedInput::InlineImage(data) => {
                let bytes = decode_inline_image(data)?;
                if bytes.len() > self.max_bytes {
                    return Err(FetchError::TooLarge { limit: self.max_bytes });
                }
                bytes
            }
        };
        LocalResource::from_bytes(&bytes)
    }
}

/// Decode a base64 payload, accepting an optional `data:...;base64,` prefix.
pub fn decode_inline_image(data: &str) -> Result<Vec<u8>, FetchError> {
    let payload = data.rsplit(',').next().unwrap_or(data).trim();
    base64::engine::general_purpose::STANDARD
        .decode(payload)
        .map_err(FetchError::Decode)
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Download failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unsupported resource locator: {0}")]
    UnsupportedScheme(String),

    #[error("Resource exceeds {limit} bytes")]
    TooLarge { limit: usize },

    #[error("Invalid base64 image payload: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
