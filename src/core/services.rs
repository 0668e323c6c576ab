//! Background tasks driving the session state machines.
//!
//! Every session runs in its own task that owns the state machine, so each check-then-set on
//! the session happens in one place without locking. Observers get snapshots through a
//! [`watch`] channel.

use crate::core::chat::{
    ChatSession, ChatSnapshot, ConnectionState, Inbound, InboundFrame, SendRejected,
};
use crate::core::session::{SessionId, SessionState};
use crate::core::traits::{ChatConnector, UploadTransport};
use crate::core::upload::{
    Endpoints, ProgressReporter, UploadFile, UploadRequest, UploadSession, UploadSnapshot,
};
use log::{debug, info};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Handle to one running upload.
///
/// Dropping the handle aborts the transfer.
pub struct UploadHandle {
    session: SessionId,
    cancel: CancellationToken,
    state: watch::Receiver<UploadSnapshot>,
    task: Option<JoinHandle<()>>,
}

impl UploadHandle {
    pub fn id(&self) -> SessionId {
        self.session
    }

    /// Requests the transfer to abort. No-op once the upload has settled.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn snapshot(&self) -> UploadSnapshot {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<UploadSnapshot> {
        self.state.clone()
    }

    /// Waits until the upload reaches a terminal state.
    pub async fn settled(&self) -> UploadSnapshot {
        let mut state = self.state.clone();
        let settled = state
            .wait_for(|snapshot| snapshot.status.is_terminal())
            .await
            .map(|snapshot| snapshot.clone());

        match settled {
            Ok(snapshot) => snapshot,
            // driver is gone, its last word is final
            Err(_) => state.borrow().clone(),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(|task| task.is_finished())
    }
}

impl Drop for UploadHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Starts an upload of `file` for `demo`.
///
/// Unknown demos and rejected files settle as failed right away and never reach the transport.
pub fn spawn_upload(
    transport: Arc<dyn UploadTransport>,
    file: UploadFile,
    demo: &str,
    endpoints: &Endpoints,
) -> UploadHandle {
    let mut session = UploadSession::new();
    let request = session.start(file, demo, endpoints);
    let (state_sender, state) = watch::channel(session.snapshot());
    let id = session.id();

    match request {
        Some(request) => {
            let cancel = request.cancel.clone();
            let task = tokio::spawn(upload_task(session, request, transport, state_sender));

            UploadHandle {
                session: id,
                cancel,
                state,
                task: Some(task),
            }
        }
        None => UploadHandle {
            session: id,
            cancel: CancellationToken::new(),
            state,
            task: None,
        },
    }
}

async fn upload_task(
    mut session: UploadSession,
    request: UploadRequest,
    transport: Arc<dyn UploadTransport>,
    state: watch::Sender<UploadSnapshot>,
) {
    let id = request.session;
    let cancel = request.cancel.clone();
    let (reporter, mut progress) = ProgressReporter::channel();

    let mut transfer = transport.upload(request, reporter);

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                session.cancel();
                break;
            }
            Some((loaded, total)) = progress.recv() => {
                if session.on_progress(id, loaded, total) {
                    state.send_replace(session.snapshot());
                }
            }
            outcome = &mut transfer => {
                while let Ok((loaded, total)) = progress.try_recv() {
                    session.on_progress(id, loaded, total);
                }
                match outcome {
                    Ok(payload) => session.complete(id, payload),
                    Err(cause) => session.fail(id, cause),
                };
                break;
            }
        }
    }

    // dropping the transfer tears the connection down
    drop(transfer);
    state.send_replace(session.snapshot());
    debug!("[{id}] upload task finished");
}

enum ChatCommand {
    Send {
        text: String,
        reply: oneshot::Sender<Result<(), SendRejected>>,
    },
}

/// Handle to one running chat session.
///
/// Dropping the handle closes the channel.
pub struct ChatHandle {
    session: SessionId,
    commands: mpsc::UnboundedSender<ChatCommand>,
    shutdown: CancellationToken,
    state: watch::Receiver<ChatSnapshot>,
}

impl ChatHandle {
    pub fn id(&self) -> SessionId {
        self.session
    }

    /// Sends `text`. Resolves once the message is in the transcript and queued on the channel.
    pub async fn send(&self, text: impl Into<String>) -> Result<(), SendRejected> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(ChatCommand::Send {
                text: text.into(),
                reply,
            })
            .map_err(|_| SendRejected::Closed)?;

        response.await.unwrap_or(Err(SendRejected::Closed))
    }

    /// Closes the session. Idempotent.
    pub fn close(&self) {
        self.shutdown.cancel();
    }

    pub fn snapshot(&self) -> ChatSnapshot {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ChatSnapshot> {
        self.state.clone()
    }

    /// Waits until the channel is open, failed to open, or the session is closed.
    pub async fn ready(&self) -> ChatSnapshot {
        let mut state = self.state.clone();
        let ready = state
            .wait_for(|snapshot| {
                snapshot.state != ConnectionState::Connecting || snapshot.error.is_some()
            })
            .await
            .map(|snapshot| snapshot.clone());

        match ready {
            Ok(snapshot) => snapshot,
            Err(_) => state.borrow().clone(),
        }
    }

    /// Waits until the session is closed.
    pub async fn closed(&self) -> ChatSnapshot {
        let mut state = self.state.clone();
        let closed = state
            .wait_for(|snapshot| snapshot.state.is_terminal())
            .await
            .map(|snapshot| snapshot.clone());

        match closed {
            Ok(snapshot) => snapshot,
            Err(_) => state.borrow().clone(),
        }
    }
}

impl Drop for ChatHandle {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Opens a chat session against `url`.
pub fn spawn_chat(connector: Arc<dyn ChatConnector>, url: Url) -> ChatHandle {
    let session = ChatSession::new();
    let id = session.id();
    let (state_sender, state) = watch::channel(session.snapshot());
    let (commands, command_queue) = mpsc::unbounded_channel();
    let shutdown = CancellationToken::new();

    tokio::spawn(chat_task(
        session,
        connector,
        url,
        command_queue,
        shutdown.clone(),
        state_sender,
    ));

    ChatHandle {
        session: id,
        commands,
        shutdown,
        state,
    }
}

async fn chat_task(
    mut session: ChatSession,
    connector: Arc<dyn ChatConnector>,
    url: Url,
    mut commands: mpsc::UnboundedReceiver<ChatCommand>,
    shutdown: CancellationToken,
    state: watch::Sender<ChatSnapshot>,
) {
    let id = session.id();
    info!("[{id}] connecting to {url}");

    // sends during the handshake are turned down, never queued for later
    let mut connect = connector.connect(&url);
    let connected = loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => break None,
            command = commands.recv() => match command {
                Some(command) => reject(&mut session, command),
                None => break None,
            },
            connected = &mut connect => break Some(connected),
        }
    };
    drop(connect);

    let inbound = match connected {
        Some(Ok((channel, inbound))) => {
            session.open(channel);
            state.send_replace(session.snapshot());
            Some(inbound)
        }
        Some(Err(e)) => {
            session.open_failed(format!("{e:#}"));
            state.send_replace(session.snapshot());
            None
        }
        None => None,
    };

    match inbound {
        Some(inbound) => run_open_chat(&mut session, inbound, &mut commands, &shutdown, &state).await,
        None => await_teardown(&mut session, &mut commands, &shutdown).await,
    }

    session.close();
    state.send_replace(session.snapshot());
    debug!("[{id}] chat task finished");
}

async fn run_open_chat(
    session: &mut ChatSession,
    mut inbound: Inbound,
    commands: &mut mpsc::UnboundedReceiver<ChatCommand>,
    shutdown: &CancellationToken,
    state: &watch::Sender<ChatSnapshot>,
) {
    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => return,
            command = commands.recv() => match command {
                Some(ChatCommand::Send { text, reply }) => {
                    let sent = session.send(&text).map(|_| ());
                    if sent.is_ok() {
                        state.send_replace(session.snapshot());
                    }
                    let _ = reply.send(sent);
                }
                None => return,
            },
            frame = inbound.recv() => match frame {
                Some(InboundFrame::Text(text)) => {
                    if session.on_message(text) {
                        state.send_replace(session.snapshot());
                    }
                }
                Some(InboundFrame::Closed(reason)) => {
                    session.on_channel_closed(reason);
                    return;
                }
                None => {
                    session.on_channel_closed(None);
                    return;
                }
            },
        }
    }
}

/// The channel never opened: keep rejecting sends until the session is torn down.
async fn await_teardown(
    session: &mut ChatSession,
    commands: &mut mpsc::UnboundedReceiver<ChatCommand>,
    shutdown: &CancellationToken,
) {
    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => return,
            command = commands.recv() => match command {
                Some(command) => reject(session, command),
                None => return,
            },
        }
    }
}

/// Answers a command while the session is still `connecting`, which turns sends down with
/// `NotOpen`.
fn reject(session: &mut ChatSession, command: ChatCommand) {
    let ChatCommand::Send { text, reply } = command;
    let _ = reply.send(session.send(&text).map(|_| ()));
}
