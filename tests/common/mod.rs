//! In-memory transports and connectors shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use playground_client::core::chat::{ChannelHandle, Inbound, InboundFrame};
use playground_client::core::session::TransportFailure;
use playground_client::core::traits::{ChatConnector, UploadTransport};
use playground_client::core::upload::{
    DemoEndpoint, Endpoints, ProgressReporter, UploadFile, UploadRequest,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use url::Url;

pub fn endpoints() -> Endpoints {
    Endpoints::new([
        DemoEndpoint {
            id: "face-recognition".to_string(),
            title: "Face Recognition".to_string(),
            url: Url::parse("http://playground.test/face-recognition").unwrap(),
            accepted_types: vec!["image/*".to_string(), "video/*".to_string()],
        },
        DemoEndpoint {
            id: "ocr".to_string(),
            title: "Optical Character Recognition".to_string(),
            url: Url::parse("http://playground.test/ocr").unwrap(),
            accepted_types: vec!["image/*".to_string()],
        },
    ])
}

pub fn image(size: usize) -> UploadFile {
    UploadFile::new("face.png", "image/png", vec![0u8; size])
}

/// Reports a fixed list of progress readings, then settles with a fixed outcome.
pub struct ScriptedTransport {
    progress: Vec<(u64, u64)>,
    outcome: Result<Bytes, TransportFailure>,
    calls: AtomicUsize,
}

impl ScriptedTransport {
    pub fn new(progress: Vec<(u64, u64)>, outcome: Result<Bytes, TransportFailure>) -> Self {
        Self {
            progress,
            outcome,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UploadTransport for ScriptedTransport {
    async fn upload(
        &self,
        _request: UploadRequest,
        progress: ProgressReporter,
    ) -> Result<Bytes, TransportFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        for (loaded, total) in &self.progress {
            progress.report(*loaded, *total);
            tokio::task::yield_now().await;
        }
        self.outcome.clone()
    }
}

/// Flags the transfer as aborted if its future is dropped before finishing.
struct AbortProbe {
    aborted: Arc<AtomicUsize>,
    armed: bool,
}

impl Drop for AbortProbe {
    fn drop(&mut self) {
        if self.armed {
            self.aborted.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Reports 25% and then holds every transfer until [`GatedTransport::release`] is called.
pub struct GatedTransport {
    gate: watch::Sender<bool>,
    calls: AtomicUsize,
    aborted: Arc<AtomicUsize>,
    completed: AtomicBool,
}

impl GatedTransport {
    pub fn new() -> Self {
        Self {
            gate: watch::channel(false).0,
            calls: AtomicUsize::new(0),
            aborted: Arc::new(AtomicUsize::new(0)),
            completed: AtomicBool::new(false),
        }
    }

    pub fn release(&self) {
        self.gate.send_replace(true);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn aborted(&self) -> usize {
        self.aborted.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> bool {
        self.completed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UploadTransport for GatedTransport {
    async fn upload(
        &self,
        request: UploadRequest,
        progress: ProgressReporter,
    ) -> Result<Bytes, TransportFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut probe = AbortProbe {
            aborted: self.aborted.clone(),
            armed: true,
        };

        let total = request.file.size();
        progress.report(total / 4, total);

        let mut gate = self.gate.subscribe();
        let _ = gate.wait_for(|open| *open).await;

        probe.armed = false;
        self.completed.store(true, Ordering::SeqCst);
        Ok(Bytes::from_static(b"late result"))
    }
}

/// Remote side of an in-memory chat channel.
pub struct RemoteEnd {
    /// Frames the client sent.
    pub received: mpsc::UnboundedReceiver<String>,
    /// Feeds frames to the client.
    pub inbound: mpsc::UnboundedSender<InboundFrame>,
    pub shutdown: CancellationToken,
}

impl RemoteEnd {
    pub fn reply(&self, text: &str) {
        self.inbound
            .send(InboundFrame::Text(text.to_string()))
            .unwrap();
    }
}

/// Hands every connection's remote end to the test.
pub struct LoopbackConnector {
    remotes: mpsc::UnboundedSender<RemoteEnd>,
}

impl LoopbackConnector {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<RemoteEnd>) {
        let (remotes, receiver) = mpsc::unbounded_channel();
        (Self { remotes }, receiver)
    }
}

#[async_trait]
impl ChatConnector for LoopbackConnector {
    async fn connect(&self, _url: &Url) -> anyhow::Result<(ChannelHandle, Inbound)> {
        let (outbound, received) = mpsc::unbounded_channel();
        let (inbound, inbound_receiver) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        self.remotes.send(RemoteEnd {
            received,
            inbound,
            shutdown: shutdown.clone(),
        })
        .map_err(|_| anyhow::anyhow!("test dropped the remote end receiver"))?;

        Ok((ChannelHandle::new(outbound, shutdown), inbound_receiver))
    }
}

/// Holds every handshake until [`GatedConnector::release`], then connects like [`LoopbackConnector`].
pub struct GatedConnector {
    inner: LoopbackConnector,
    gate: watch::Sender<bool>,
}

impl GatedConnector {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<RemoteEnd>) {
        let (inner, remotes) = LoopbackConnector::new();
        let gate = watch::channel(false).0;
        (Self { inner, gate }, remotes)
    }

    pub fn release(&self) {
        self.gate.send_replace(true);
    }
}

#[async_trait]
impl ChatConnector for GatedConnector {
    async fn connect(&self, url: &Url) -> anyhow::Result<(ChannelHandle, Inbound)> {
        let mut gate = self.gate.subscribe();
        let _ = gate.wait_for(|open| *open).await;
        self.inner.connect(url).await
    }
}

pub struct RefusingConnector;

#[async_trait]
impl ChatConnector for RefusingConnector {
    async fn connect(&self, url: &Url) -> anyhow::Result<(ChannelHandle, Inbound)> {
        anyhow::bail!("connection refused by {url}")
    }
}

/// Never finishes the handshake.
pub struct StalledConnector;

#[async_trait]
impl ChatConnector for StalledConnector {
    async fn connect(&self, _url: &Url) -> anyhow::Result<(ChannelHandle, Inbound)> {
        std::future::pending().await
    }
}

pub fn chat_url() -> Url {
    Url::parse("ws://playground.test/chat").unwrap()
}
