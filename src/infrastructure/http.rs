//! Multipart HTTP upload transport

use crate::core::session::TransportFailure;
use crate::core::traits::UploadTransport;
use crate::core::upload::{ProgressReporter, UploadRequest};
use crate::infrastructure::config::DEFAULT_CHUNK_SIZE;
use async_stream::stream;
use async_trait::async_trait;
use bytes::Bytes;
use log::{debug, warn};
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client};
use serde_json::Value;

/// Name of the multipart field carrying the file.
pub const FILE_FIELD: &str = "file";

pub struct HttpUploadTransport {
    client: Client,
    chunk_size: usize,
}

impl Default for HttpUploadTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpUploadTransport {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }
}

#[async_trait]
impl UploadTransport for HttpUploadTransport {
    async fn upload(
        &self,
        request: UploadRequest,
        progress: ProgressReporter,
    ) -> Result<Bytes, TransportFailure> {
        let file = request.file;
        let total = file.size();
        let data = file.data().clone();
        let chunk_size = self.chunk_size;

        // progress is counted as chunks are handed to the connection
        let body = stream! {
            progress.report(0, total);
            let mut offset = 0;
            while offset < data.len() {
                let end = (offset + chunk_size).min(data.len());
                yield Ok::<Bytes, std::io::Error>(data.slice(offset..end));
                offset = end;
                progress.report(offset as u64, total);
            }
        };

        let part = Part::stream_with_length(Body::wrap_stream(body), total)
            .file_name(file.name().to_owned())
            .mime_str(file.content_type())
            .map_err(|e| TransportFailure::generic(format!("invalid content type: {e}")))?;

        debug!(
            "[{}] POST {} ({total} bytes)",
            request.session, request.endpoint
        );
        let response = self
            .client
            .post(request.endpoint)
            .multipart(Form::new().part(FILE_FIELD, part))
            .send()
            .await
            .map_err(|e| TransportFailure::generic(format!("upload failed: {e}")))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| TransportFailure::generic(format!("failed to read response: {e}")))?;

        if !status.is_success() {
            warn!("[{}] server answered {status}", request.session);
            return Err(TransportFailure::from_status(
                status.as_u16(),
                error_detail(&body),
            ));
        }

        Ok(body)
    }
}

/// Pulls the server-provided cause out of an error body, `{"detail": ...}` style.
///
/// `detail` may be a plain string or a list of validation errors carrying `msg` fields.
pub fn error_detail(body: &[u8]) -> Option<String> {
    let value: Value = serde_json::from_slice(body).ok()?;

    match value.get("detail")? {
        Value::String(detail) if !detail.trim().is_empty() => Some(detail.clone()),
        Value::Array(errors) => {
            let messages: Vec<&str> = errors
                .iter()
                .filter_map(|error| error.get("msg").and_then(Value::as_str))
                .collect();
            (!messages.is_empty()).then(|| messages.join("; "))
        }
        _ => None,
    }
}
