//! Upload-and-process session.
//!

use crate::core::session::{SessionError, SessionId, SessionState, TransportFailure};
use bytes::Bytes;
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    Idle,
    Uploading,
    Succeeded,
    Cancelled,
    Failed,
}

impl SessionState for UploadStatus {
    fn is_terminal(&self) -> bool {
        matches!(
            self,
            UploadStatus::Succeeded | UploadStatus::Cancelled | UploadStatus::Failed
        )
    }
}

/// A file selected for processing. Cloning is cheap, the contents are shared.
#[derive(Debug, Clone)]
pub struct UploadFile {
    name: String,
    content_type: String,
    data: Bytes,
}

impl UploadFile {
    pub fn new(
        name: impl Into<String>,
        content_type: impl Into<String>,
        data: impl Into<Bytes>,
    ) -> Self {
        Self {
            name: name.into(),
            content_type: content_type.into(),
            data: data.into(),
        }
    }

    /// Reads a file from disk, guessing its content type from the extension.
    ///
    /// Unknown or missing extensions become `application/octet-stream`, which no demo accepts;
    /// use [`UploadFile::with_content_type`] to name the type explicitly.
    pub async fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        let data = tokio::fs::read(path).await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_owned());

        Ok(Self::new(name, guess_content_type(path), data))
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    /// Size in megabytes, rounded to two decimals.
    pub fn size_mb(&self) -> f64 {
        (self.size() as f64 / 1024.0 / 1024.0 * 100.0).round() / 100.0
    }
}

fn guess_content_type(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "tif" | "tiff" => "image/tiff",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mov" => "video/quicktime",
        "avi" => "video/x-msvideo",
        _ => "application/octet-stream",
    }
}

/// A demo that accepts uploads.
#[derive(Debug, Clone)]
pub struct DemoEndpoint {
    pub id: String,
    pub title: String,
    pub url: Url,
    /// Accepted content types, `image/*` style wildcards allowed. Empty accepts everything.
    pub accepted_types: Vec<String>,
}

impl DemoEndpoint {
    pub fn accepts(&self, content_type: &str) -> bool {
        if self.accepted_types.is_empty() {
            return true;
        }

        let content_type = content_type.to_ascii_lowercase();
        self.accepted_types.iter().any(|pattern| {
            match pattern.strip_suffix("/*") {
                Some(family) => content_type
                    .split_once('/')
                    .is_some_and(|(ty, _)| ty == family),
                None => *pattern == content_type,
            }
        })
    }
}

/// Static mapping from demo type to its processing endpoint.
#[derive(Debug, Clone, Default)]
pub struct Endpoints {
    demos: HashMap<String, DemoEndpoint>,
}

impl Endpoints {
    pub fn new(demos: impl IntoIterator<Item = DemoEndpoint>) -> Self {
        Self {
            demos: demos
                .into_iter()
                .map(|demo| (normalize_demo_key(&demo.id), demo))
                .collect(),
        }
    }

    /// Looks a demo up by id or title, ignoring case, spaces and underscores.
    pub fn resolve(&self, demo: &str) -> Option<&DemoEndpoint> {
        let key = normalize_demo_key(demo);
        self.demos.get(&key).or_else(|| {
            self.demos
                .values()
                .find(|endpoint| normalize_demo_key(&endpoint.title) == key)
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &DemoEndpoint> {
        self.demos.values()
    }
}

fn normalize_demo_key(key: &str) -> String {
    key.trim()
        .to_lowercase()
        .split(|c: char| c.is_whitespace() || c == '_' || c == '-')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

/// Work order handed to the upload transport.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub session: SessionId,
    pub endpoint: Url,
    pub file: UploadFile,
    pub cancel: CancellationToken,
}

/// Transport-side events for one upload.
#[derive(Debug, Clone)]
pub enum UploadEvent {
    Progress { loaded: u64, total: u64 },
    Completed(Bytes),
    Failed(TransportFailure),
}

/// Sink the transport reports transferred bytes into.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    sender: mpsc::UnboundedSender<(u64, u64)>,
}

impl ProgressReporter {
    pub fn channel() -> (ProgressReporter, mpsc::UnboundedReceiver<(u64, u64)>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (ProgressReporter { sender }, receiver)
    }

    pub fn report(&self, loaded: u64, total: u64) {
        // the session may already be gone, nobody left to tell
        let _ = self.sender.send((loaded, total));
    }
}

/// `round(loaded * 100 / max(total, 1))`, capped at 100.
pub fn progress_percent(loaded: u64, total: u64) -> u8 {
    let total = u128::from(total.max(1));
    let scaled = (u128::from(loaded) * 100 + total / 2) / total;
    scaled.min(100) as u8
}

#[derive(Debug, Clone)]
pub struct UploadSnapshot {
    pub session: SessionId,
    pub status: UploadStatus,
    pub progress: u8,
    pub file_name: Option<String>,
    pub result: Option<Bytes>,
    pub error: Option<SessionError>,
}

impl UploadSnapshot {
    /// Final outcome of a settled upload. `None` while idle or still uploading.
    pub fn outcome(&self) -> Option<Result<Bytes, SessionError>> {
        match self.status {
            UploadStatus::Idle | UploadStatus::Uploading => None,
            UploadStatus::Succeeded => Some(Ok(self.result.clone().unwrap_or_default())),
            UploadStatus::Cancelled => Some(Err(SessionError::Cancelled)),
            UploadStatus::Failed => Some(Err(self
                .error
                .clone()
                .unwrap_or_else(|| TransportFailure::generic("upload failed").into()))),
        }
    }
}

/// State machine of a single file submission.
///
/// All transitions are synchronous. Events are tagged with the [`SessionId`] they were produced
/// for, anything arriving for a superseded instance or after a terminal state is ignored.
#[derive(Debug)]
pub struct UploadSession {
    id: SessionId,
    file: Option<UploadFile>,
    endpoint: Option<Url>,
    progress: u8,
    status: UploadStatus,
    result: Option<Bytes>,
    error: Option<SessionError>,
    cancel: Option<CancellationToken>,
}

impl Default for UploadSession {
    fn default() -> Self {
        Self::new()
    }
}

impl UploadSession {
    pub fn new() -> Self {
        Self {
            id: SessionId::new(),
            file: None,
            endpoint: None,
            progress: 0,
            status: UploadStatus::Idle,
            result: None,
            error: None,
            cancel: None,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn status(&self) -> UploadStatus {
        self.status
    }

    pub fn progress(&self) -> u8 {
        self.progress
    }

    pub fn file(&self) -> Option<&UploadFile> {
        self.file.as_ref()
    }

    pub fn endpoint(&self) -> Option<&Url> {
        self.endpoint.as_ref()
    }

    pub fn result(&self) -> Option<&Bytes> {
        self.result.as_ref()
    }

    pub fn error(&self) -> Option<&SessionError> {
        self.error.as_ref()
    }

    /// Starts a new submission, cancelling the one in flight if any.
    ///
    /// Returns the request the transport should carry out, or `None` when the session failed
    /// right away (unknown demo, rejected file type) without touching the network.
    pub fn start(
        &mut self,
        file: UploadFile,
        demo: &str,
        endpoints: &Endpoints,
    ) -> Option<UploadRequest> {
        self.cancel();

        self.id = SessionId::new();
        self.progress = 0;
        self.result = None;
        self.error = None;
        self.endpoint = None;
        self.cancel = None;

        let Some(endpoint) = endpoints.resolve(demo) else {
            warn!("[{}] no endpoint for demo `{demo}`", self.id);
            self.file = Some(file);
            self.status = UploadStatus::Failed;
            self.error = Some(SessionError::UnsupportedDemo(demo.to_owned()));
            return None;
        };

        if !endpoint.accepts(file.content_type()) {
            warn!(
                "[{}] {} rejects `{}` ({})",
                self.id,
                endpoint.title,
                file.name(),
                file.content_type()
            );
            self.error = Some(SessionError::UnsupportedFileType {
                file: file.name().to_owned(),
                content_type: file.content_type().to_owned(),
                accepted: endpoint.accepted_types.join(", "),
            });
            self.file = Some(file);
            self.status = UploadStatus::Failed;
            return None;
        }

        let cancel = CancellationToken::new();
        info!(
            "[{}] uploading `{}` ({:.2} MB) to {}",
            self.id,
            file.name(),
            file.size_mb(),
            endpoint.url
        );

        self.file = Some(file.clone());
        self.endpoint = Some(endpoint.url.clone());
        self.cancel = Some(cancel.clone());
        self.status = UploadStatus::Uploading;

        Some(UploadRequest {
            session: self.id,
            endpoint: endpoint.url.clone(),
            file,
            cancel,
        })
    }

    pub fn on_progress(&mut self, session: SessionId, loaded: u64, total: u64) -> bool {
        if !self.accepts_events_for(session) {
            return false;
        }

        let progress = progress_percent(loaded, total);
        if progress <= self.progress {
            return false;
        }

        self.progress = progress;
        true
    }

    /// Aborts the transfer in flight. No-op unless uploading.
    pub fn cancel(&mut self) -> bool {
        if self.status != UploadStatus::Uploading {
            return false;
        }

        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
        self.status = UploadStatus::Cancelled;
        info!("[{}] upload cancelled at {}%", self.id, self.progress);
        true
    }

    pub fn complete(&mut self, session: SessionId, payload: Bytes) -> bool {
        if !self.accepts_events_for(session) {
            return false;
        }

        info!("[{}] upload succeeded, {} byte result", self.id, payload.len());
        self.cancel = None;
        self.progress = 100;
        self.result = Some(payload);
        self.status = UploadStatus::Succeeded;
        true
    }

    pub fn fail(&mut self, session: SessionId, cause: TransportFailure) -> bool {
        if !self.accepts_events_for(session) {
            return false;
        }

        warn!("[{}] upload failed: {cause}", self.id);
        self.cancel = None;
        self.error = Some(SessionError::TransportFailure(cause));
        self.status = UploadStatus::Failed;
        true
    }

    pub fn apply(&mut self, session: SessionId, event: UploadEvent) -> bool {
        match event {
            UploadEvent::Progress { loaded, total } => self.on_progress(session, loaded, total),
            UploadEvent::Completed(payload) => self.complete(session, payload),
            UploadEvent::Failed(cause) => self.fail(session, cause),
        }
    }

    pub fn snapshot(&self) -> UploadSnapshot {
        UploadSnapshot {
            session: self.id,
            status: self.status,
            progress: self.progress,
            file_name: self.file.as_ref().map(|f| f.name().to_owned()),
            result: self.result.clone(),
            error: self.error.clone(),
        }
    }

    fn accepts_events_for(&self, session: SessionId) -> bool {
        if session != self.id {
            debug!("[{}] discarding event for superseded session {session}", self.id);
            return false;
        }
        if self.status != UploadStatus::Uploading {
            debug!("[{}] discarding event in state {:?}", self.id, self.status);
            return false;
        }
        true
    }
}

impl Drop for UploadSession {
    fn drop(&mut self) {
        if let Some(cancel) = &self.cancel {
            cancel.cancel();
        }
    }
}
