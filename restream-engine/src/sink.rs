use std::{
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use bytes::Bytes;
use futures::Stream;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::{
    error::SinkError,
    registry::{ChunkSink, ConsumerRegistry, SinkId},
};

/// Chunks buffered per listener before writes start failing with
/// [`SinkError::Backpressure`]. 256 x 512 bytes is about 8s of 128k mp3.
pub const DEFAULT_LISTENER_CAPACITY: usize = 256;

/// Channel-backed sink for one HTTP listener.
pub struct ListenerSink {
    writer: mpsc::Sender<Bytes>,
}

impl ListenerSink {
    pub fn new() -> (Self, mpsc::Receiver<Bytes>) {
        Self::with_capacity(DEFAULT_LISTENER_CAPACITY)
    }

    pub fn with_capacity(buffer_size: usize) -> (Self, mpsc::Receiver<Bytes>) {
        let (writer, receiver) = mpsc::channel(buffer_size);
        (Self { writer }, receiver)
    }
}

impl ChunkSink for ListenerSink {
    fn write(&self, chunk: &Bytes) -> Result<(), SinkError> {
        self.writer.try_send(chunk.clone()).map_err(|e| match e {
            TrySendError::Full(_) => SinkError::Backpressure,
            TrySendError::Closed(_) => SinkError::Closed,
        })
    }
}

/// Receiving half of a registered [`ListenerSink`].
///
/// Dropping the stream (client disconnect or abort) unregisters the sink.
pub struct ListenerStream {
    id: SinkId,
    registry: Arc<ConsumerRegistry>,
    inner: mpsc::Receiver<Bytes>,
}

impl ListenerStream {
    /// Register a new listener on `registry`. Only chunks relayed after this
    /// call are delivered.
    pub fn attach(registry: Arc<ConsumerRegistry>) -> Self {
        Self::attach_with_capacity(registry, DEFAULT_LISTENER_CAPACITY)
    }

    pub fn attach_with_capacity(registry: Arc<ConsumerRegistry>, buffer_size: usize) -> Self {
        let (sink, inner) = ListenerSink::with_capacity(buffer_size);
        let id = registry.register(Arc::new(sink));
        Self {
            id,
            registry,
            inner,
        }
    }

    pub fn id(&self) -> SinkId {
        self.id
    }
}

impl Stream for ListenerStream {
    type Item = Bytes;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().inner.poll_recv(cx)
    }
}

impl Drop for ListenerStream {
    fn drop(&mut self) {
        self.registry.unregister(self.id);
    }
}
