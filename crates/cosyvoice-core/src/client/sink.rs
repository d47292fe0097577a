//! Consumer seam between the client and whatever plays the frames

use std::future::{self, Future};
use tokio::sync::mpsc;

use crate::audio::StreamEvent;
use crate::error::{Error, Result};

/// Receives the ordered events of one request.
///
/// Returning an error tells the client nobody is listening any more; it
/// stops reading the network.
pub trait FrameSink {
    fn accept(&mut self, event: StreamEvent) -> impl Future<Output = Result<()>> + Send;
}

/// Bounded channel: `accept` waits while the consumer is behind.
impl FrameSink for mpsc::Sender<StreamEvent> {
    fn accept(&mut self, event: StreamEvent) -> impl Future<Output = Result<()>> + Send {
        async move { self.send(event).await.map_err(|_| Error::Cancelled) }
    }
}

/// Collects events in memory.
impl FrameSink for Vec<StreamEvent> {
    fn accept(&mut self, event: StreamEvent) -> impl Future<Output = Result<()>> + Send {
        self.push(event);
        future::ready(Ok(()))
    }
}
