use std::sync::Arc;

use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;

use super::frame::{Action, CorrelatedFrame};
use super::UploadProgress;
use crate::Result;

/// Per action delivery queues, fed by the dispatcher.
pub(crate) struct Routes {
    start: UnboundedSender<CorrelatedFrame>,
    data: UnboundedSender<CorrelatedFrame>,
    finalize: UnboundedSender<CorrelatedFrame>,
}

pub(crate) struct Inboxes {
    pub start: UnboundedReceiver<CorrelatedFrame>,
    pub data: UnboundedReceiver<CorrelatedFrame>,
    pub finalize: UnboundedReceiver<CorrelatedFrame>,
}

pub(crate) fn routes() -> (Routes, Inboxes) {
    let (start, start_rx) = unbounded_channel();
    let (data, data_rx) = unbounded_channel();
    let (finalize, finalize_rx) = unbounded_channel();
    (
        Routes {
            start,
            data,
            finalize,
        },
        Inboxes {
            start: start_rx,
            data: data_rx,
            finalize: finalize_rx,
        },
    )
}

impl Routes {
    fn deliver(&self, text: &str, request_id: u64) {
        let frame = match CorrelatedFrame::parse(text) {
            Ok(frame) => frame,
            Err(e) => {
                log::trace!("dropping unreadable frame: {}", e);
                return;
            }
        };
        if frame.request_id.is_some_and(|id| id != request_id) {
            log::trace!("dropping frame for request {:?}", frame.request_id);
            return;
        }
        let queue = match frame.action {
            Action::UploadStart => &self.start,
            Action::UploadData => &self.data,
            Action::UploadFinalize => &self.finalize,
            Action::UploadCancel | Action::Unknown => {
                log::trace!("dropping {} frame", frame.action);
                return;
            }
        };
        // the receiving side may already be gone, nothing to do then
        let _ = queue.send(frame);
    }
}

/// Read the channel until it closes or `cancel` fires, routing every
/// reply to the queue of its action.
///
/// Queues close when this returns.
pub(crate) async fn dispatch<R>(
    mut stream: R,
    routes: Routes,
    request_id: u64,
    cancel: CancellationToken,
) -> Result<()>
where
    R: Stream<Item = std::result::Result<Message, tungstenite::Error>> + Unpin,
{
    loop {
        let message = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            message = stream.next() => message,
        };
        match message {
            Some(Ok(Message::Text(text))) => {
                routes.deliver(text.as_str(), request_id)
            }
            Some(Ok(Message::Close(_))) | None => {
                log::debug!("upload channel closed by device");
                return Ok(());
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                log::warn!("upload channel failed: {}", e);
                return Err(e.into());
            }
        }
    }
}

/// Follow data acknowledgements, publishing the acknowledged byte count.
///
/// The first failed acknowledgement cancels the whole upload and is
/// returned.
pub(crate) async fn watch_data_acks(
    mut inbox: UnboundedReceiver<CorrelatedFrame>,
    acknowledged: watch::Sender<u64>,
    progress: Arc<watch::Sender<UploadProgress>>,
    cancel: CancellationToken,
) -> Result<()> {
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            frame = inbox.recv() => frame,
        };
        let Some(frame) = frame else {
            return Ok(());
        };
        match frame.chunk_ack() {
            Ok(ack) => {
                acknowledged
                    .send_modify(|total| *total = (*total).max(ack.total_len));
                let total = *acknowledged.borrow();
                progress.send_modify(|progress| progress.acknowledged = total);
            }
            Err(err) => {
                log::warn!("chunk rejected: {}", err);
                cancel.cancel();
                return Err(err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;
    use serde_json::json;

    type Frame = std::result::Result<Message, tungstenite::Error>;

    fn reply(request_id: u64, action: &str, total_len: Option<u64>) -> Frame {
        let mut value = json!({
            "request_id": request_id,
            "action": action,
            "success": true
        });
        if let Some(total_len) = total_len {
            value["result"] = json!({ "total_len": total_len });
        }
        Ok(Message::text(value.to_string()))
    }

    #[tokio::test]
    async fn routes_by_action_and_request() {
        let (routes, mut inboxes) = routes();
        let frames = stream::iter(vec![
            reply(9, "upload_start", None),
            reply(8, "upload_data", None),
            reply(9, "upload_data", Some(4)),
            Ok(Message::binary(vec![1, 2, 3])),
            reply(9, "upload_data", Some(8)),
            reply(9, "upload_finalize", None),
        ]);

        dispatch(frames, routes, 9, CancellationToken::new())
            .await
            .unwrap();

        let start = inboxes.start.recv().await.unwrap();
        assert_eq!(start.action, Action::UploadStart);
        let lens: Vec<u64> = [
            inboxes.data.recv().await.unwrap(),
            inboxes.data.recv().await.unwrap(),
        ]
        .into_iter()
        .map(|frame| frame.chunk_ack().unwrap().total_len)
        .collect();
        assert_eq!(lens, vec![4, 8]);
        assert!(inboxes.data.recv().await.is_none());
        assert!(inboxes.finalize.recv().await.is_some());
    }

    #[tokio::test]
    async fn delivery_survives_dropped_queue() {
        let (routes, inboxes) = routes();
        let Inboxes { mut finalize, .. } = inboxes;
        let frames = stream::iter(vec![
            reply(1, "upload_start", None),
            reply(1, "upload_finalize", None),
        ]);
        dispatch(frames, routes, 1, CancellationToken::new())
            .await
            .unwrap();
        assert!(finalize.recv().await.is_some());
    }

    #[tokio::test]
    async fn failed_ack_cancels() {
        let (tx, rx) = unbounded_channel();
        let (acknowledged, mut acked_rx) = watch::channel(0u64);
        let (progress, _) = watch::channel(UploadProgress::default());
        let cancel = CancellationToken::new();

        let ok: CorrelatedFrame = serde_json::from_value(json!({
            "request_id": 1, "action": "upload_data", "success": true,
            "result": {"total_len": 4}
        }))
        .unwrap();
        let failed: CorrelatedFrame = serde_json::from_value(json!({
            "request_id": 1, "action": "upload_data", "success": false,
            "error_code": "io_error", "msg": "write failed"
        }))
        .unwrap();
        tx.send(ok).unwrap();
        tx.send(failed).unwrap();

        let progress = Arc::new(progress);
        let err = watch_data_acks(rx, acknowledged, progress, cancel.clone())
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some("io_error"));
        assert!(cancel.is_cancelled());
        assert_eq!(*acked_rx.borrow_and_update(), 4);
    }
}
