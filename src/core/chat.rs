//! Chat session over a full-duplex text channel.

use crate::core::session::{SessionError, SessionId, SessionState};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::Serialize;
use std::fmt::{Display, Formatter};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub const READY_MESSAGE: &str = "Connection established. You may start chatting.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
}

impl SessionState for ConnectionState {
    fn is_terminal(&self) -> bool {
        *self == ConnectionState::Closed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    System,
    Local,
    Remote,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    pub origin: Origin,
    pub text: String,
    pub sequence: u64,
    pub at: DateTime<Utc>,
}

impl Display for Message {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.origin {
            Origin::Local => write!(f, "[YOU]: {}", self.text),
            Origin::System | Origin::Remote => write!(f, "[BOT]: {}", self.text),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SendRejected {
    #[error("message is empty")]
    Empty,
    #[error("chat is not connected yet")]
    NotOpen,
    #[error("chat is closed")]
    Closed,
}

/// Data delivered by the remote side of a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    Text(String),
    /// The remote side went away, with its reason if it gave one.
    Closed(Option<String>),
}

pub type Inbound = mpsc::UnboundedReceiver<InboundFrame>;

/// Write half of an established channel. Dropping it shuts the channel down.
#[derive(Debug)]
pub struct ChannelHandle {
    outbound: mpsc::UnboundedSender<String>,
    shutdown: CancellationToken,
}

impl ChannelHandle {
    pub fn new(outbound: mpsc::UnboundedSender<String>, shutdown: CancellationToken) -> Self {
        Self { outbound, shutdown }
    }

    /// Queues a text frame. Returns `false` if the channel is already gone.
    pub fn transmit(&self, text: String) -> bool {
        self.outbound.send(text).is_ok()
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for ChannelHandle {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[derive(Debug, Clone)]
pub struct ChatSnapshot {
    pub session: SessionId,
    pub state: ConnectionState,
    pub transcript: Vec<Message>,
    pub error: Option<SessionError>,
}

/// State machine of one chat connection: `connecting -> open -> closed`, or straight from
/// `connecting` to `closed`. There is no way back out of `closed`.
#[derive(Debug)]
pub struct ChatSession {
    id: SessionId,
    state: ConnectionState,
    transcript: Vec<Message>,
    channel: Option<ChannelHandle>,
    error: Option<SessionError>,
}

impl Default for ChatSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatSession {
    pub fn new() -> Self {
        Self {
            id: SessionId::new(),
            state: ConnectionState::Connecting,
            transcript: Vec::new(),
            channel: None,
            error: None,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn transcript(&self) -> &[Message] {
        &self.transcript
    }

    pub fn error(&self) -> Option<&SessionError> {
        self.error.as_ref()
    }

    /// Takes ownership of an established channel and announces readiness.
    ///
    /// A channel arriving after the session was closed is shut down immediately.
    pub fn open(&mut self, channel: ChannelHandle) -> bool {
        if self.state != ConnectionState::Connecting {
            debug!("[{}] channel opened after teardown, dropping it", self.id);
            channel.shutdown();
            return false;
        }

        info!("[{}] chat channel open", self.id);
        self.state = ConnectionState::Open;
        self.channel = Some(channel);
        self.error = None;
        self.append(Origin::System, READY_MESSAGE.to_owned());
        true
    }

    /// The channel could not be established. The session stays in `connecting`.
    pub fn open_failed(&mut self, reason: impl Into<String>) {
        if self.state != ConnectionState::Connecting {
            return;
        }

        let reason = reason.into();
        warn!("[{}] chat channel failed to open: {reason}", self.id);
        self.error = Some(SessionError::ChannelUnavailable(reason));
    }

    /// Echoes `text` into the transcript and forwards it over the channel without waiting for
    /// any acknowledgement.
    pub fn send(&mut self, text: &str) -> Result<&Message, SendRejected> {
        match self.state {
            ConnectionState::Connecting => return Err(SendRejected::NotOpen),
            ConnectionState::Closed => return Err(SendRejected::Closed),
            ConnectionState::Open => {}
        }
        if text.trim().is_empty() {
            return Err(SendRejected::Empty);
        }

        if let Some(channel) = &self.channel {
            if !channel.transmit(text.to_owned()) {
                warn!("[{}] channel dropped an outbound message", self.id);
            }
        }

        Ok(self.append(Origin::Local, text.to_owned()))
    }

    pub fn on_message(&mut self, text: String) -> bool {
        if self.state != ConnectionState::Open {
            debug!("[{}] ignoring inbound message in state {:?}", self.id, self.state);
            return false;
        }

        self.append(Origin::Remote, text);
        true
    }

    /// The remote side closed the channel, or the connection broke.
    pub fn on_channel_closed(&mut self, reason: Option<String>) {
        if self.state == ConnectionState::Closed {
            return;
        }

        let reason = reason.unwrap_or_else(|| "connection closed by remote".to_owned());
        warn!("[{}] chat channel closed unexpectedly: {reason}", self.id);
        self.state = ConnectionState::Closed;
        self.error = Some(SessionError::ChannelUnavailable(reason));
        self.channel = None;
    }

    /// Closes the session from any state. Idempotent.
    pub fn close(&mut self) -> bool {
        if self.state == ConnectionState::Closed {
            return false;
        }

        info!("[{}] closing chat session", self.id);
        if let Some(channel) = self.channel.take() {
            channel.shutdown();
        }
        self.state = ConnectionState::Closed;
        true
    }

    pub fn snapshot(&self) -> ChatSnapshot {
        ChatSnapshot {
            session: self.id,
            state: self.state,
            transcript: self.transcript.clone(),
            error: self.error.clone(),
        }
    }

    fn append(&mut self, origin: Origin, text: String) -> &Message {
        let sequence = self.transcript.len() as u64;
        self.transcript.push(Message {
            origin,
            text,
            sequence,
            at: Utc::now(),
        });
        &self.transcript[self.transcript.len() - 1]
    }
}
