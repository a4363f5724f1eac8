use crate::retry::{RetryPolicy, retry_with_backoff};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

const CONVERSION_TIMEOUT: Duration = Duration::from_secs(60);

/// Errors returned by the document conversion service.
#[derive(Debug, Error)]
pub enum ConversionError {
    /// The request failed before a response arrived.
    #[error("Conversion request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// The service answered with a non-success status.
    #[error("Conversion failed ({status}): {body}")]
    UnexpectedStatus {
        /// HTTP status returned by the service.
        status: StatusCode,
        /// Body returned with the failing status.
        body: String,
    },
    /// Reading the source or writing the PDF failed.
    #[error("Conversion file I/O failed: {0}")]
    Io(#[from] std::io::Error),
    /// Only PowerPoint files are accepted.
    #[error("Unsupported file type for conversion: {0}")]
    UnsupportedFile(PathBuf),
}

/// Client for an unoserver-compatible conversion endpoint.
#[derive(Clone)]
pub struct ConversionClient {
    http: Client,
    base_url: String,
    policy: RetryPolicy,
}

impl ConversionClient {
    /// Create a client for the service at `base_url`.
    pub fn new(base_url: &str, policy: RetryPolicy) -> Result<Self, ConversionError> {
        let http = Client::builder()
            .user_agent("deckindex/0.1")
            .timeout(CONVERSION_TIMEOUT)
            .build()?;
        let base_url = base_url.trim_end_matches('/').to_string();
        tracing::debug!(url = %base_url, "Initialized conversion client");
        Ok(Self {
            http,
            base_url,
            policy,
        })
    }

    /// Convert a `.ppt`/`.pptx` file to PDF and write it to `target`.
    ///
    /// Transport failures are retried with backoff; an error status from the service is
    /// returned immediately.
    pub async fn convert_to_pdf(&self, source: &Path, target: &Path) -> Result<(), ConversionError> {
        if !is_presentation(source) {
            return Err(ConversionError::UnsupportedFile(source.to_path_buf()));
        }

        let bytes = tokio::fs::read(source).await?;
        let file_name = source
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "presentation.pptx".to_string());
        let url = format!("{}/request", self.base_url);

        let pdf = retry_with_backoff(
            &self.policy,
            "convert_to_pdf",
            |error: &ConversionError| matches!(error, ConversionError::Http(_)),
            || self.request_conversion(&url, &file_name, bytes.clone()),
        )
        .await?;

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(target, &pdf).await?;
        tracing::info!(
            source = %source.display(),
            target = %target.display(),
            size = pdf.len(),
            "Converted presentation to PDF"
        );
        Ok(())
    }

    async fn request_conversion(
        &self,
        url: &str,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<Vec<u8>, ConversionError> {
        let form = Form::new()
            .text("convert-to", "pdf")
            .part("file", Part::bytes(bytes).file_name(file_name.to_string()));
        let response = self.http.post(url).multipart(form).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let error = ConversionError::UnexpectedStatus { status, body };
            tracing::error!(error = %error, "Conversion service rejected the document");
            return Err(error);
        }
        Ok(response.bytes().await?.to_vec())
    }
}

fn is_presentation(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("ppt") || ext.eq_ignore_ascii_case("pptx"))
        .unwrap_or(false)
}
