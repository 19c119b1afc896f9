//! Asynchronous entry point for the capture layer.
//!
//! Capture callbacks must not block, so events are queued on an unbounded
//! channel and applied to the tree by a dedicated task, in arrival order.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::{
    event::{ClientId, Event},
    process_tree::ProcessTree,
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IngestError {
    #[error("event ingestor stopped")]
    Stopped,
}

enum IngestRequest {
    Event(ClientId, Event),
    Flush(oneshot::Sender<()>),
}

/// Spawn the task applying events to `tree`. It runs until every handle is
/// dropped.
pub fn start_event_ingestor(tree: Arc<ProcessTree>) -> IngestorHandle {
    let (tx, mut rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Some(request) = rx.recv().await {
            match request {
                IngestRequest::Event(client, event) => {
                    log::trace!("{client}: {event}");
                    tree.add_event(event, client);
                }
                IngestRequest::Flush(tx_reply) => {
                    let _ = tx_reply.send(());
                }
            }
        }
        log::debug!("Event ingestor stopped");
    });
    IngestorHandle { tx }
}

#[derive(Clone)]
pub struct IngestorHandle {
    tx: mpsc::UnboundedSender<IngestRequest>,
}

impl IngestorHandle {
    /// Queue an event observed by `client`.
    pub fn send(&self, client: ClientId, event: Event) -> Result<(), IngestError> {
        self.tx
            .send(IngestRequest::Event(client, event))
            .map_err(|_| IngestError::Stopped)
    }

    /// Wait until every event sent before this call has been applied.
    pub async fn flush(&self) -> Result<(), IngestError> {
        let (tx_reply, rx_reply) = oneshot::channel();
        self.tx
            .send(IngestRequest::Flush(tx_reply))
            .map_err(|_| IngestError::Stopped)?;
        rx_reply.await.map_err(|_| IngestError::Stopped)
    }
}
