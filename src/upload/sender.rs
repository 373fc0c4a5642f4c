use std::sync::Arc;
use std::time::Duration;

use futures_util::{Sink, SinkExt};
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;

use super::frame::{Action, ControlFrame};
use super::source::UploadSource;
use super::UploadProgress;
use crate::{FbxError, Result};

/// Writes the data frames of one upload, then the finalize frame.
///
/// At most `window` bytes are left unacknowledged on the wire, and
/// finalize only goes out once every byte has been acknowledged.
pub(crate) struct ChunkSender<S> {
    pub sink: S,
    pub source: UploadSource,
    pub request_id: u64,
    pub chunk_size: usize,
    pub window: u64,
    pub ack_timeout: Duration,
    pub acknowledged: watch::Receiver<u64>,
    pub progress: Arc<watch::Sender<UploadProgress>>,
    /// Stops the upload, whatever the reason.
    pub cancel: CancellationToken,
    /// Fired by the caller only.
    pub external: CancellationToken,
}

impl<S> ChunkSender<S>
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    /// Returns the number of bytes sent along with the sink.
    pub async fn run(mut self) -> Result<(u64, S)> {
        match self.transfer().await {
            Ok(sent) => Ok((sent, self.sink)),
            Err(err) => {
                if self.external.is_cancelled() {
                    self.send_cancel().await;
                }
                Err(err)
            }
        }
    }

    async fn transfer(&mut self) -> Result<u64> {
        let mut buffer = vec![0u8; self.chunk_size.max(1)];
        let mut sent = 0u64;
        loop {
            if self.cancel.is_cancelled() {
                return Err(FbxError::Cancelled);
            }
            let window = self.window;
            self.wait_for_ack(
                move |acknowledged| sent.saturating_sub(acknowledged) < window,
                "room in the upload window",
            )
            .await?;

            let filled = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(FbxError::Cancelled),
                filled = self.source.fill(&mut buffer) => filled?,
            };
            if filled == 0 {
                break;
            }
            let chunk = Message::binary(buffer[..filled].to_vec());
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(FbxError::Cancelled),
                written = self.sink.send(chunk) => written?,
            }
            sent += filled as u64;
            log::trace!("chunk of {} bytes sent ({} total)", filled, sent);
            self.progress.send_modify(|progress| progress.sent = sent);
        }
        if sent != self.source.size {
            log::warn!(
                "{} yielded {} bytes, {} were announced",
                self.source.name,
                sent,
                self.source.size
            );
        }

        self.wait_for_ack(
            move |acknowledged| acknowledged >= sent,
            "upload_data acknowledgement",
        )
        .await?;

        if self.cancel.is_cancelled() {
            return Err(FbxError::Cancelled);
        }
        let finalize = ControlFrame {
            request_id: self.request_id,
            action: Action::UploadFinalize,
        };
        self.sink
            .send(Message::text(serde_json::to_string(&finalize)?))
            .await?;
        Ok(sent)
    }

    async fn wait_for_ack(
        &mut self,
        mut ready: impl FnMut(u64) -> bool,
        what: &str,
    ) -> Result<()> {
        let acknowledged = &mut self.acknowledged;
        let wait = async move {
            acknowledged
                .wait_for(|total| ready(*total))
                .await
                .map(|_| ())
        };
        let waited = tokio::time::timeout(self.ack_timeout, wait);
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(FbxError::Cancelled),
            waited = waited => match waited {
                Ok(Ok(())) => Ok(()),
                Ok(Err(_)) => Err(FbxError::Closed(what.to_owned())),
                Err(_) => Err(FbxError::Timeout(what.to_owned())),
            },
        }
    }

    async fn send_cancel(&mut self) {
        notify_cancel(&mut self.sink, self.request_id).await;
    }
}

/// Tells the device to drop a started upload. Failures are only logged.
pub(crate) async fn notify_cancel<S>(sink: &mut S, request_id: u64)
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    let frame = ControlFrame {
        request_id,
        action: Action::UploadCancel,
    };
    let sent = match serde_json::to_string(&frame) {
        Ok(text) => sink.send(Message::text(text)).await,
        Err(_) => return,
    };
    if let Err(e) = sent {
        log::debug!("could not notify cancellation: {}", e);
    }
}
