//! Chunked uploads over the persistent channel.
//!
//! One upload owns one channel. After the `upload_start` exchange the
//! channel is split: a dispatcher task reads every reply and routes it to
//! the queue of its action, a sender task writes the binary chunks and the
//! final `upload_finalize` frame, and a watcher drains the data
//! acknowledgements. The first failed acknowledgement cancels the others.

mod dispatcher;
mod frame;
mod sender;
mod source;

use std::sync::Arc;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;

pub use frame::{Action, ChunkAck, Conflict, CorrelatedFrame};
pub use source::UploadSource;

use self::dispatcher::{dispatch, routes, watch_data_acks, Inboxes};
use self::frame::StartFrame;
use self::sender::{notify_cancel, ChunkSender};
use crate::config::UploadConfig;
use crate::fs::encode_path;
use crate::{FbxError, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UploadState {
    #[default]
    Idle,
    Starting,
    Transferring,
    Finalizing,
    Done,
    Failed,
    Cancelled,
}

impl UploadState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UploadState::Done | UploadState::Failed | UploadState::Cancelled
        )
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UploadProgress {
    pub state: UploadState,
    /// Bytes written to the channel.
    pub sent: u64,
    /// Bytes the device confirmed.
    pub acknowledged: u64,
    pub total: u64,
}

/// Outcome of a finished upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadJob {
    pub request_id: u64,
    pub destination: String,
    pub name: String,
    pub size: u64,
    pub sent: u64,
    pub state: UploadState,
}

#[derive(Debug)]
pub struct UploadRequest {
    pub request_id: u64,
    pub source: UploadSource,
    /// Directory on the device, not encoded.
    pub destination: String,
    pub conflict: Conflict,
}

/// Drives uploads with one set of settings.
///
/// Cancelling the token given to [`UploadCoordinator::with_cancellation`]
/// stops a running upload at the next chunk boundary. A cancelled
/// coordinator stays cancelled: later runs fail with
/// [`FbxError::Cancelled`] before touching the channel, so build a new
/// coordinator (or hand it a fresh token) for the next upload.
pub struct UploadCoordinator {
    config: UploadConfig,
    cancel: CancellationToken,
    progress: Arc<watch::Sender<UploadProgress>>,
}

impl UploadCoordinator {
    pub fn new(config: UploadConfig) -> Self {
        let (progress, _) = watch::channel(UploadProgress::default());
        Self {
            config,
            cancel: CancellationToken::new(),
            progress: Arc::new(progress),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<UploadProgress> {
        self.progress.subscribe()
    }

    /// Run one upload to completion over `channel`.
    pub async fn run<C>(
        &self,
        channel: C,
        request: UploadRequest,
    ) -> Result<UploadJob>
    where
        C: Sink<Message, Error = tungstenite::Error>
            + Stream<Item = std::result::Result<Message, tungstenite::Error>>
            + Unpin
            + Send
            + 'static,
    {
        let UploadRequest {
            request_id,
            source,
            destination,
            conflict,
        } = request;
        let mut job = UploadJob {
            request_id,
            destination,
            name: source.name.clone(),
            size: source.size,
            sent: 0,
            state: UploadState::Idle,
        };
        self.progress.send_replace(UploadProgress {
            total: source.size,
            ..Default::default()
        });
        if self.cancel.is_cancelled() {
            self.transition(&mut job, UploadState::Cancelled);
            return Err(FbxError::Cancelled);
        }

        let cancel = self.cancel.child_token();
        let (sink, stream) = channel.split();
        let (routes, inboxes) = routes();
        let dispatcher =
            tokio::spawn(dispatch(stream, routes, request_id, cancel.clone()));

        let outcome = self
            .drive(&mut job, sink, source, conflict, inboxes, &cancel)
            .await;
        cancel.cancel();
        let dispatched = dispatcher.await?;

        match outcome {
            Ok(sent) => {
                job.sent = sent;
                self.transition(&mut job, UploadState::Done);
                Ok(job)
            }
            Err(err) => {
                let err = match (err, dispatched) {
                    (FbxError::Closed(_), Err(transport)) => transport,
                    (err, _) => err,
                };
                let state = match err {
                    FbxError::Cancelled => UploadState::Cancelled,
                    _ => UploadState::Failed,
                };
                log::warn!("upload of {} ended: {}", job.name, err);
                self.transition(&mut job, state);
                Err(err)
            }
        }
    }

    async fn drive<S>(
        &self,
        job: &mut UploadJob,
        mut sink: S,
        source: UploadSource,
        conflict: Conflict,
        inboxes: Inboxes,
        cancel: &CancellationToken,
    ) -> Result<u64>
    where
        S: Sink<Message, Error = tungstenite::Error> + Unpin + Send + 'static,
    {
        let Inboxes {
            mut start,
            data,
            mut finalize,
        } = inboxes;

        self.transition(job, UploadState::Starting);
        let frame = StartFrame {
            request_id: job.request_id,
            action: Action::UploadStart,
            size: source.size,
            dirname: encode_path(&job.destination),
            filename: source.name.clone(),
            force: conflict.as_force(),
        };
        sink.send(Message::text(serde_json::to_string(&frame)?))
            .await?;
        let started =
            self.await_ack(&mut start, Action::UploadStart, cancel).await;
        if started.is_err() && self.cancel.is_cancelled() {
            notify_cancel(&mut sink, job.request_id).await;
        }
        started?.check()?;

        self.transition(job, UploadState::Transferring);
        let (acknowledged, acknowledged_rx) = watch::channel(0u64);
        let watcher = tokio::spawn(watch_data_acks(
            data,
            acknowledged,
            self.progress.clone(),
            cancel.clone(),
        ));
        let sender = ChunkSender {
            sink,
            source,
            request_id: job.request_id,
            chunk_size: self.config.chunk_size,
            window: (self.config.max_in_flight.max(1) * self.config.chunk_size)
                as u64,
            ack_timeout: self.config.ack_timeout,
            acknowledged: acknowledged_rx,
            progress: self.progress.clone(),
            cancel: cancel.clone(),
            external: self.cancel.clone(),
        };
        let sent = tokio::spawn(sender.run()).await;

        let finished = match sent {
            Ok(Ok((sent, sink))) => {
                job.sent = sent;
                self.transition(job, UploadState::Finalizing);
                let acked = self
                    .await_ack(&mut finalize, Action::UploadFinalize, cancel)
                    .await
                    .and_then(|frame| frame.check());
                close(sink).await;
                acked.map(|_| sent)
            }
            Ok(Err(err)) => Err(err),
            Err(join) => Err(join.into()),
        };

        cancel.cancel();
        let watched = watcher.await?;
        match finished {
            Ok(sent) => Ok(sent),
            Err(err) => Err(match watched {
                Err(failure) => failure,
                Ok(()) if self.cancel.is_cancelled() => FbxError::Cancelled,
                Ok(()) => err,
            }),
        }
    }

    async fn await_ack(
        &self,
        inbox: &mut UnboundedReceiver<CorrelatedFrame>,
        action: Action,
        cancel: &CancellationToken,
    ) -> Result<CorrelatedFrame> {
        let what = format!("{} acknowledgement", action);
        let timeout = self.config.ack_timeout;
        let received = tokio::time::timeout(timeout, inbox.recv());
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(FbxError::Cancelled),
            received = received => {
                match received {
                    Ok(Some(frame)) => Ok(frame),
                    Ok(None) => Err(FbxError::Closed(what)),
                    Err(_) => Err(FbxError::Timeout(what)),
                }
            }
        }
    }

    fn transition(&self, job: &mut UploadJob, state: UploadState) {
        log::debug!(
            "upload {} ({}): {:?} -> {:?}",
            job.request_id,
            job.name,
            job.state,
            state
        );
        job.state = state;
        self.progress.send_modify(|progress| progress.state = state);
    }
}

async fn close<S>(mut sink: S)
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    if let Err(e) = sink.close().await {
        log::debug!("upload channel did not close cleanly: {}", e);
    }
}
