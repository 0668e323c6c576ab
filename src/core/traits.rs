//! DI "Interfaces"

use crate::core::chat::{ChannelHandle, Inbound};
use crate::core::session::TransportFailure;
use crate::core::upload::{ProgressReporter, UploadRequest};
use async_trait::async_trait;
use bytes::Bytes;
use url::Url;

#[async_trait]
pub trait UploadTransport: Send + Sync {
    /// Submits the file in `request` to its endpoint.
    ///
    /// Transferred bytes are reported to `progress` as they go out. Resolves with the response
    /// body on success. The caller aborts the transfer by dropping the returned future, so
    /// implementations must not spawn work that outlives it.
    async fn upload(
        &self,
        request: UploadRequest,
        progress: ProgressReporter,
    ) -> Result<Bytes, TransportFailure>;
}

#[async_trait]
pub trait ChatConnector: Send + Sync {
    /// Opens a text channel to `url`.
    ///
    /// Returns the write half and the stream of inbound frames. The stream ends with
    /// [`InboundFrame::Closed`](crate::core::chat::InboundFrame::Closed) when the remote side
    /// goes away.
    async fn connect(&self, url: &Url) -> anyhow::Result<(ChannelHandle, Inbound)>;
}
