//! Session registry, the surface the presentation layer talks to

use crate::core::chat::{ChatSnapshot, SendRejected};
use crate::core::services::{ChatHandle, UploadHandle, spawn_chat, spawn_upload};
use crate::core::traits::{ChatConnector, UploadTransport};
use crate::core::upload::{Endpoints, UploadFile, UploadSnapshot};
use crate::infrastructure::config::PlaygroundConfig;
use crate::infrastructure::http::HttpUploadTransport;
use crate::infrastructure::websocket::WebSocketConnector;
use log::info;
use std::sync::Arc;
use url::Url;

/// Holds at most one active upload and one active chat.
///
/// Installing a new session first cancels (uploads) or closes (chat) the previous one, so there
/// is never more than one transfer or channel in flight per kind.
pub struct SessionRegistry {
    endpoints: Endpoints,
    chat_url: Url,
    transport: Arc<dyn UploadTransport>,
    connector: Arc<dyn ChatConnector>,
    upload: Option<UploadHandle>,
    chat: Option<ChatHandle>,
}

impl SessionRegistry {
    pub fn new(
        endpoints: Endpoints,
        chat_url: Url,
        transport: Arc<dyn UploadTransport>,
        connector: Arc<dyn ChatConnector>,
    ) -> Self {
        Self {
            endpoints,
            chat_url,
            transport,
            connector,
            upload: None,
            chat: None,
        }
    }

    /// Registry backed by the HTTP upload transport and the WebSocket chat connector.
    pub fn from_config(config: &PlaygroundConfig) -> anyhow::Result<Self> {
        Ok(Self::new(
            config.endpoints()?,
            config.chat_url()?,
            Arc::new(HttpUploadTransport::new().with_chunk_size(config.chunk_size())),
            Arc::new(WebSocketConnector),
        ))
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    pub fn start_upload(&mut self, file: UploadFile, demo: &str) -> &UploadHandle {
        if let Some(previous) = self.upload.take() {
            info!("[{}] superseded by a new upload", previous.id());
            previous.cancel();
        }

        let handle = spawn_upload(self.transport.clone(), file, demo, &self.endpoints);
        self.upload.insert(handle)
    }

    pub fn cancel_upload(&self) {
        if let Some(upload) = &self.upload {
            upload.cancel();
        }
    }

    pub fn upload(&self) -> Option<&UploadHandle> {
        self.upload.as_ref()
    }

    pub fn upload_snapshot(&self) -> Option<UploadSnapshot> {
        self.upload.as_ref().map(UploadHandle::snapshot)
    }

    pub fn open_chat(&mut self) -> &ChatHandle {
        if let Some(previous) = self.chat.take() {
            info!("[{}] replaced by a new chat", previous.id());
            previous.close();
        }

        let handle = spawn_chat(self.connector.clone(), self.chat_url.clone());
        self.chat.insert(handle)
    }

    pub async fn send_chat(&self, text: &str) -> Result<(), SendRejected> {
        match &self.chat {
            Some(chat) => chat.send(text).await,
            None => Err(SendRejected::NotOpen),
        }
    }

    /// Closes the chat but keeps it around so its final transcript stays observable.
    pub fn close_chat(&self) {
        if let Some(chat) = &self.chat {
            chat.close();
        }
    }

    pub fn chat(&self) -> Option<&ChatHandle> {
        self.chat.as_ref()
    }

    pub fn chat_snapshot(&self) -> Option<ChatSnapshot> {
        self.chat.as_ref().map(ChatHandle::snapshot)
    }
}

pub mod schemas {
    use crate::core::chat::{ChatSnapshot, ConnectionState, Message};
    use crate::core::session::SessionError;
    use crate::core::upload::{UploadSnapshot, UploadStatus};
    use serde::Serialize;
    use uuid::Uuid;

    #[derive(Serialize, Debug, PartialEq, Eq)]
    pub struct Error {
        pub kind: &'static str,
        pub description: String,
    }

    impl From<&SessionError> for Error {
        fn from(error: &SessionError) -> Self {
            Error {
                kind: error.kind(),
                description: match error {
                    SessionError::TransportFailure(failure) => failure.description().to_owned(),
                    other => other.to_string(),
                },
            }
        }
    }

    #[derive(Serialize, Debug)]
    pub struct UploadState {
        pub session: Uuid,
        pub status: UploadStatus,
        pub progress: u8,
        pub file_name: Option<String>,
        pub result_size: Option<usize>,
        pub error: Option<Error>,
    }

    impl From<&UploadSnapshot> for UploadState {
        fn from(snapshot: &UploadSnapshot) -> Self {
            UploadState {
                session: snapshot.session.as_uuid(),
                status: snapshot.status,
                progress: snapshot.progress,
                file_name: snapshot.file_name.clone(),
                result_size: snapshot.result.as_ref().map(|result| result.len()),
                error: snapshot.error.as_ref().map(Error::from),
            }
        }
    }

    #[derive(Serialize, Debug)]
    pub struct ChatState {
        pub session: Uuid,
        pub connection_state: ConnectionState,
        pub transcript: Vec<Message>,
        pub error: Option<Error>,
    }

    impl From<&ChatSnapshot> for ChatState {
        fn from(snapshot: &ChatSnapshot) -> Self {
            ChatState {
                session: snapshot.session.as_uuid(),
                connection_state: snapshot.state,
                transcript: snapshot.transcript.clone(),
                error: snapshot.error.as_ref().map(Error::from),
            }
        }
    }
}
