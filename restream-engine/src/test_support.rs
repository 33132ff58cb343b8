// ============================================================================
// Test doubles shared by the engine's unit tests
// ============================================================================

use std::{
    collections::{HashMap, HashSet, VecDeque},
    io,
    net::SocketAddr,
    pin::Pin,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    task::{Context, Poll},
    time::Duration,
};

use bytes::Bytes;
use futures::future::BoxFuture;
use tokio::{
    io::{AsyncRead, AsyncWriteExt, ReadBuf},
    net::TcpListener,
};
use tokio_util::sync::CancellationToken;

use crate::{
    error::{EngineError, SinkError},
    registry::ChunkSink,
    resolver::SourceResolver,
    state::Generation,
    transcoder::{Transcoder, TranscoderHandle},
};

// ------------------------------------------------------------------------
// Sinks
// ------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingSink {
    chunks: Mutex<Vec<Bytes>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn chunks(&self) -> Vec<Bytes> {
        self.chunks.lock().unwrap().clone()
    }

    pub fn joined(&self) -> Vec<u8> {
        self.chunks().concat()
    }
}

impl ChunkSink for RecordingSink {
    fn write(&self, chunk: &Bytes) -> Result<(), SinkError> {
        self.chunks.lock().unwrap().push(chunk.clone());
        Ok(())
    }
}

/// Fails every write with the same error.
pub struct FailingSink {
    error: SinkError,
    attempts: AtomicUsize,
}

impl FailingSink {
    pub fn new(error: SinkError) -> Self {
        Self {
            error,
            attempts: AtomicUsize::new(0),
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl ChunkSink for FailingSink {
    fn write(&self, _chunk: &Bytes) -> Result<(), SinkError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(self.error)
    }
}

// ------------------------------------------------------------------------
// Reader
// ------------------------------------------------------------------------

pub enum Step {
    Data(Vec<u8>),
    /// A zero-length read
    Empty,
    Error(io::ErrorKind),
}

/// Replays a fixed script of reads, then stays pending forever.
pub struct ScriptedReader {
    steps: VecDeque<Step>,
}

impl ScriptedReader {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: steps.into(),
        }
    }
}

impl AsyncRead for ScriptedReader {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut().steps.pop_front() {
            Some(Step::Data(data)) => {
                buf.put_slice(&data);
                Poll::Ready(Ok(()))
            }
            Some(Step::Empty) => Poll::Ready(Ok(())),
            Some(Step::Error(kind)) => Poll::Ready(Err(io::Error::new(kind, "scripted failure"))),
            None => Poll::Pending,
        }
    }
}

// ------------------------------------------------------------------------
// Resolver
// ------------------------------------------------------------------------

/// Resolves `url` to `url#resolved.m3u8` unless told otherwise.
#[derive(Default)]
pub struct FakeResolver {
    calls: Mutex<Vec<String>>,
    delays: Mutex<HashMap<String, Duration>>,
    failures: Mutex<HashMap<String, EngineError>>,
}

impl FakeResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn playable(url: &str) -> String {
        format!("{}#resolved.m3u8", url)
    }

    pub fn delay(&self, url: &str, delay: Duration) {
        self.delays.lock().unwrap().insert(url.to_string(), delay);
    }

    pub fn fail(&self, url: &str, error: EngineError) {
        self.failures.lock().unwrap().insert(url.to_string(), error);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl SourceResolver for FakeResolver {
    fn resolve<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<String, EngineError>> {
        self.calls.lock().unwrap().push(url.to_string());
        let delay = self.delays.lock().unwrap().get(url).copied();
        let failure = self.failures.lock().unwrap().get(url).cloned();
        Box::pin(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            match failure {
                Some(e) => Err(e),
                None => Ok(Self::playable(url)),
            }
        })
    }
}

// ------------------------------------------------------------------------
// Transcoder
// ------------------------------------------------------------------------

const SERVE_CHUNK: usize = 64;
const SERVE_INTERVAL: Duration = Duration::from_millis(5);

#[derive(Default)]
struct TranscoderLog {
    started: Mutex<Vec<(Generation, String)>>,
    stopped: Mutex<Vec<Generation>>,
}

/// Serves `[generation as u8; 64]` chunks on a loopback listener until the
/// handle is stopped. With a serve limit each process closes its connection
/// after that many chunks, which the relay sees as a stall.
#[derive(Default)]
pub struct FakeTranscoder {
    log: Arc<TranscoderLog>,
    failing: Mutex<HashSet<String>>,
    serve_limit: Mutex<Option<usize>>,
}

impl FakeTranscoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_on(&self, playable_url: &str) {
        self.failing.lock().unwrap().insert(playable_url.to_string());
    }

    pub fn set_serve_limit(&self, limit: Option<usize>) {
        *self.serve_limit.lock().unwrap() = limit;
    }

    /// Successful starts, in order.
    pub fn started(&self) -> Vec<(Generation, String)> {
        self.log.started.lock().unwrap().clone()
    }

    pub fn stopped(&self) -> Vec<Generation> {
        self.log.stopped.lock().unwrap().clone()
    }

    pub fn stop_count(&self, generation: Generation) -> usize {
        self.stopped().iter().filter(|g| **g == generation).count()
    }
}

impl Transcoder for FakeTranscoder {
    fn start<'a>(
        &'a self,
        generation: Generation,
        playable_url: &'a str,
        _listen: SocketAddr,
    ) -> BoxFuture<'a, Result<Box<dyn TranscoderHandle>, EngineError>> {
        let fails = self.failing.lock().unwrap().contains(playable_url);
        let limit = *self.serve_limit.lock().unwrap();
        Box::pin(async move {
            if fails {
                return Err(EngineError::StartFailed {
                    cause: format!("scripted start failure for {}", playable_url),
                });
            }
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            let token = CancellationToken::new();
            tokio::spawn(serve(listener, generation, token.clone(), limit));

            self.log
                .started
                .lock()
                .unwrap()
                .push((generation, playable_url.to_string()));
            Ok(Box::new(FakeProcess {
                generation,
                addr,
                token,
                log: Arc::clone(&self.log),
            }) as Box<dyn TranscoderHandle>)
        })
    }
}

async fn serve(
    listener: TcpListener,
    generation: Generation,
    token: CancellationToken,
    limit: Option<usize>,
) {
    let mut socket = tokio::select! {
        _ = token.cancelled() => return,
        accepted = listener.accept() => match accepted {
            Ok((socket, _)) => socket,
            Err(_) => return,
        },
    };
    let payload = vec![generation.0 as u8; SERVE_CHUNK];
    let mut sent = 0;
    loop {
        if limit.is_some_and(|limit| sent >= limit) {
            break;
        }
        tokio::select! {
            _ = token.cancelled() => break,
            written = socket.write_all(&payload) => if written.is_err() { break },
        }
        sent += 1;
        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(SERVE_INTERVAL) => {}
        }
    }
}

struct FakeProcess {
    generation: Generation,
    addr: SocketAddr,
    token: CancellationToken,
    log: Arc<TranscoderLog>,
}

impl TranscoderHandle for FakeProcess {
    fn pid(&self) -> Option<u32> {
        None
    }

    fn output_addr(&self) -> SocketAddr {
        self.addr
    }

    fn stop(self: Box<Self>) -> BoxFuture<'static, ()> {
        self.token.cancel();
        self.log.stopped.lock().unwrap().push(self.generation);
        Box::pin(async {})
    }
}
