//! Pipeline controller.
//!
//! Source changes and automatic recovery are serialized through one async
//! mutex around [`Control`]; only its holder mints generations, starts or
//! stops transcoders and writes the pipeline state.
//!
//! An explicit source change resolves and launches the next generation while
//! the current one keeps streaming, then swaps: the old relay loop is stopped
//! and awaited before its transcoder is stopped, and only then does the new
//! relay loop start reading. A rejected request therefore leaves the current
//! generation untouched. With a fixed listen port the old transcoder is
//! stopped before the new one is launched instead.
//!
//! Requests are last-writer-wins: a new request cancels the token of the one
//! in flight, which abandons it at its next suspension point.

use std::{
    future::Future,
    sync::{
        Arc, Mutex, MutexGuard, RwLock, Weak,
        atomic::{AtomicU64, Ordering},
    },
};

use serde::Serialize;
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::{
    config::EngineConfig,
    error::EngineError,
    registry::{ChunkSink, ConsumerRegistry, SinkId},
    relay::{self, RelayExit, RelayLoop, RelaySignal, RestartReason},
    resolver::{CommandResolver, SourceResolver, resolve_playable},
    sink::ListenerStream,
    source::Source,
    state::{Generation, PipelineState},
    transcoder::{FfmpegTranscoder, Transcoder, TranscoderHandle, allocate_output_addr},
};

/// Read-only view of the engine for the HTTP layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineStatus {
    pub state: PipelineState,
    /// Generation currently relaying, if any
    pub generation: Option<Generation>,
    pub source_url: Option<String>,
    pub listeners: usize,
    pub last_error: Option<String>,
}

pub struct Restreamer {
    inner: Arc<Inner>,
}

impl Restreamer {
    /// Must be called inside a tokio runtime.
    pub fn new(
        config: EngineConfig,
        resolver: Arc<dyn SourceResolver>,
        transcoder: Arc<dyn Transcoder>,
    ) -> Self {
        let (signals, signal_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        let inner = Arc::new(Inner {
            config,
            resolver,
            transcoder,
            registry: Arc::new(ConsumerRegistry::new()),
            control: tokio::sync::Mutex::new(Control { current: None }),
            pending: Mutex::new(None),
            status: RwLock::new(Status::default()),
            last_generation: AtomicU64::new(0),
            next_request: AtomicU64::new(0),
            signals,
            shutdown: shutdown.clone(),
        });

        tokio::spawn(watch_signals(Arc::downgrade(&inner), signal_rx, shutdown));
        Self { inner }
    }

    /// Engine backed by the configured extraction tool and ffmpeg.
    pub fn from_config(config: EngineConfig) -> Self {
        let resolver = Arc::new(CommandResolver::new(&config.resolver));
        let transcoder = Arc::new(FfmpegTranscoder::new(config.transcoder.clone()));
        Self::new(config, resolver, transcoder)
    }

    /// Switch the relay to `url`. Resolves once the new generation streams,
    /// or with the error that rejected the request.
    ///
    /// Re-applying the current URL starts a fresh generation.
    pub async fn set_source(&self, url: &str) -> Result<String, EngineError> {
        let inner = &self.inner;
        if inner.shutdown.is_cancelled() {
            return Err(EngineError::ShuttingDown);
        }

        let request = inner.begin_request();
        let mut control = tokio::select! {
            biased;
            _ = request.token.cancelled() => return Err(inner.cancel_reason()),
            control = inner.control.lock() => control,
        };
        inner.launch(&mut control, url, &request.token).await
    }

    /// Tear down the current generation and go back to `Idle`.
    pub async fn stop(&self) {
        let inner = &self.inner;
        let _request = inner.begin_request();
        let mut control = inner.control.lock().await;
        if let Some(active) = control.current.take() {
            inner.teardown(active).await;
        }

        let mut status = inner.status_mut();
        log::info!("engine stopped ({} -> idle)", status.state);
        *status = Status::default();
    }

    /// Stop streaming, end every listener stream and refuse further
    /// requests.
    pub async fn shutdown(&self) {
        self.stop().await;
        self.inner.shutdown.cancel();
        self.inner.registry.clear();
    }

    pub fn source_url(&self) -> Option<String> {
        self.inner.status().source_url.clone()
    }

    pub fn listener_count(&self) -> usize {
        self.inner.registry.len()
    }

    pub fn state(&self) -> PipelineState {
        self.inner.status().state
    }

    /// Highest generation number minted so far.
    pub fn latest_generation(&self) -> Generation {
        Generation(self.inner.last_generation.load(Ordering::SeqCst))
    }

    pub fn status(&self) -> EngineStatus {
        let status = self.inner.status();
        EngineStatus {
            state: status.state,
            generation: status.generation,
            source_url: status.source_url.clone(),
            listeners: self.inner.registry.len(),
            last_error: status.last_error.clone(),
        }
    }

    /// Attach a channel-backed listener; dropping the stream detaches it.
    pub fn subscribe(&self) -> ListenerStream {
        ListenerStream::attach(Arc::clone(&self.inner.registry))
    }

    pub fn register(&self, sink: Arc<dyn ChunkSink>) -> SinkId {
        self.inner.registry.register(sink)
    }

    pub fn unregister(&self, id: SinkId) -> bool {
        self.inner.registry.unregister(id)
    }
}

impl Drop for Restreamer {
    fn drop(&mut self) {
        self.inner.shutdown.cancel();
    }
}

struct Inner {
    config: EngineConfig,
    resolver: Arc<dyn SourceResolver>,
    transcoder: Arc<dyn Transcoder>,
    registry: Arc<ConsumerRegistry>,
    control: tokio::sync::Mutex<Control>,
    pending: Mutex<Option<PendingRequest>>,
    status: RwLock<Status>,
    last_generation: AtomicU64,
    next_request: AtomicU64,
    signals: mpsc::UnboundedSender<RelaySignal>,
    shutdown: CancellationToken,
}

struct Control {
    current: Option<ActiveGeneration>,
}

struct ActiveGeneration {
    generation: Generation,
    source_url: String,
    process: Box<dyn TranscoderHandle>,
    relay_cancel: CancellationToken,
    relay: JoinHandle<RelayExit>,
}

#[derive(Default)]
struct Status {
    state: PipelineState,
    generation: Option<Generation>,
    source_url: Option<String>,
    last_error: Option<String>,
}

struct PendingRequest {
    id: u64,
    automatic: bool,
    token: CancellationToken,
}

/// Clears the pending slot when the request finishes, unless a newer
/// request already replaced it.
struct RequestGuard<'a> {
    inner: &'a Inner,
    id: u64,
    token: CancellationToken,
}

impl Drop for RequestGuard<'_> {
    fn drop(&mut self) {
        let mut pending = self.inner.pending();
        if pending.as_ref().is_some_and(|p| p.id == self.id) {
            pending.take();
        }
    }
}

impl Inner {
    fn pending(&self) -> MutexGuard<'_, Option<PendingRequest>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn status(&self) -> std::sync::RwLockReadGuard<'_, Status> {
        self.status.read().unwrap_or_else(|e| e.into_inner())
    }

    fn status_mut(&self) -> std::sync::RwLockWriteGuard<'_, Status> {
        self.status.write().unwrap_or_else(|e| e.into_inner())
    }

    fn install_request(
        &self,
        pending: &mut Option<PendingRequest>,
        automatic: bool,
    ) -> RequestGuard<'_> {
        let id = self.next_request.fetch_add(1, Ordering::Relaxed);
        let token = self.shutdown.child_token();
        *pending = Some(PendingRequest {
            id,
            automatic,
            token: token.clone(),
        });
        RequestGuard {
            inner: self,
            id,
            token,
        }
    }

    /// Explicit requests abandon whatever is in flight.
    fn begin_request(&self) -> RequestGuard<'_> {
        let mut pending = self.pending();
        if let Some(previous) = pending.take() {
            log::debug!(
                "superseding {} request #{}",
                if previous.automatic { "restart" } else { "source" },
                previous.id
            );
            previous.token.cancel();
        }
        self.install_request(&mut pending, false)
    }

    /// Automatic restarts yield to an explicit request waiting for the lock.
    fn try_begin_restart(&self) -> Option<RequestGuard<'_>> {
        let mut pending = self.pending();
        if pending.as_ref().is_some_and(|p| !p.token.is_cancelled()) {
            return None;
        }
        Some(self.install_request(&mut pending, true))
    }

    fn cancel_reason(&self) -> EngineError {
        if self.shutdown.is_cancelled() {
            EngineError::ShuttingDown
        } else {
            EngineError::Superseded
        }
    }

    async fn cancellable<F: Future>(
        &self,
        token: &CancellationToken,
        fut: F,
    ) -> Result<F::Output, EngineError> {
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(self.cancel_reason()),
            output = fut => Ok(output),
        }
    }

    fn mint_generation(&self) -> Generation {
        Generation(self.last_generation.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn transition(&self, generation: Generation, next: PipelineState) {
        let mut status = self.status_mut();
        let previous = status.state;
        if previous.can_transition_to(next) {
            log::debug!("{}: {} -> {}", generation, previous, next);
        } else {
            log::warn!("{}: unexpected transition {} -> {}", generation, previous, next);
        }
        status.state = next;
    }

    /// One resolve → launch → swap attempt under the control lock.
    async fn launch(
        &self,
        control: &mut Control,
        url: &str,
        token: &CancellationToken,
    ) -> Result<String, EngineError> {
        let generation = self.mint_generation();
        self.transition(generation, PipelineState::Resolving);

        let result = self.try_launch(control, generation, url, token).await;
        match &result {
            Ok(_) => {}
            Err(e @ (EngineError::Superseded | EngineError::ShuttingDown)) => {
                log::info!("{} abandoned: {}", generation, e);
            }
            Err(e) => {
                log::error!("{} failed for {}: {}", generation, url, e);
                self.transition(generation, PipelineState::Failed);
                self.status_mut().last_error = Some(e.to_string());
            }
        }
        result
    }

    async fn try_launch(
        &self,
        control: &mut Control,
        generation: Generation,
        url: &str,
        token: &CancellationToken,
    ) -> Result<String, EngineError> {
        let source = Source::parse(url, &self.config.resolver.direct_suffixes)?;
        let playable = self
            .cancellable(token, resolve_playable(self.resolver.as_ref(), &source))
            .await??;

        self.transition(generation, PipelineState::Launching);
        if self.config.transcoder.uses_fixed_port() {
            if let Some(previous) = control.current.take() {
                log::info!(
                    "{} needs port {}, stopping {} first",
                    generation,
                    self.config.transcoder.listen_port,
                    previous.generation
                );
                self.teardown(previous).await;
                let mut status = self.status_mut();
                status.generation = None;
                status.source_url = None;
            }
        }

        let listen = allocate_output_addr(&self.config.transcoder).map_err(|e| {
            EngineError::StartFailed {
                cause: format!("{:#}", e),
            }
        })?;
        let process = self
            .cancellable(token, self.transcoder.start(generation, &playable, listen))
            .await??;

        let addr = process.output_addr();
        let connected = self
            .cancellable(
                token,
                relay::connect(addr, self.config.transcoder.connect_timeout()),
            )
            .await;
        let stream = match connected {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                process.stop().await;
                return Err(EngineError::StartFailed {
                    cause: format!("transcoder output {} unreachable: {}", addr, e),
                });
            }
            Err(e) => {
                process.stop().await;
                return Err(e);
            }
        };

        if let Some(previous) = control.current.take() {
            self.transition(generation, PipelineState::Restarting);
            self.teardown(previous).await;
        }

        let relay_cancel = self.shutdown.child_token();
        let relay = RelayLoop::new(
            generation,
            stream,
            Arc::clone(&self.registry),
            self.config.relay.clone(),
            relay_cancel.clone(),
            self.signals.clone(),
        )
        .spawn();

        control.current = Some(ActiveGeneration {
            generation,
            source_url: source.url().to_string(),
            process,
            relay_cancel,
            relay,
        });

        self.transition(generation, PipelineState::Streaming);
        {
            let mut status = self.status_mut();
            status.generation = Some(generation);
            status.source_url = Some(source.url().to_string());
            status.last_error = None;
        }
        log::info!("{} streaming {}", generation, source.url());
        Ok(source.url().to_string())
    }

    /// Stop the relay loop, wait until it no longer reads or writes, then
    /// stop the transcoder. Never the other way round.
    async fn teardown(&self, active: ActiveGeneration) {
        let ActiveGeneration {
            generation,
            process,
            relay_cancel,
            relay,
            ..
        } = active;

        relay_cancel.cancel();
        match relay.await {
            Ok(exit) => log::debug!("{} relay joined: {:?}", generation, exit),
            Err(e) => log::warn!("{} relay task failed: {}", generation, e),
        }
        process.stop().await;
        log::info!("{} torn down", generation);
    }

    /// Handle a read error or stall reported by a relay loop.
    async fn recover(&self, signal: RelaySignal) {
        let mut control = tokio::select! {
            _ = self.shutdown.cancelled() => return,
            control = self.control.lock() => control,
        };

        let is_current = control
            .current
            .as_ref()
            .is_some_and(|active| active.generation == signal.generation);
        if !is_current {
            log::debug!("ignoring signal from stale {}", signal.generation);
            return;
        }
        let Some(active) = control.current.take() else {
            return;
        };

        log::warn!("{} needs restart: {}", signal.generation, signal.reason);
        if let RestartReason::Stalled { .. } = signal.reason {
            self.transition(signal.generation, PipelineState::Stalled);
        }
        self.transition(signal.generation, PipelineState::Restarting);
        let source_url = active.source_url.clone();
        self.teardown(active).await;
        self.status_mut().generation = None;

        let Some(request) = self.try_begin_restart() else {
            log::info!("restart of {} left to a pending source change", signal.generation);
            return;
        };

        let policy = self.config.restart.clone();
        if policy.max_attempts == 0 {
            self.transition(signal.generation, PipelineState::Failed);
            let mut status = self.status_mut();
            status.source_url = None;
            status.last_error = Some(signal.reason.to_string());
            return;
        }

        for attempt in 1..=policy.max_attempts {
            match self.launch(&mut control, &source_url, &request.token).await {
                Ok(_) => {
                    log::info!("restarted {} (attempt {})", source_url, attempt);
                    return;
                }
                Err(EngineError::Superseded | EngineError::ShuttingDown) => return,
                Err(e) => {
                    log::error!(
                        "restart attempt {}/{} for {} failed: {}",
                        attempt,
                        policy.max_attempts,
                        source_url,
                        e
                    );
                }
            }

            if attempt < policy.max_attempts
                && self
                    .cancellable(&request.token, tokio::time::sleep(policy.backoff()))
                    .await
                    .is_err()
            {
                return;
            }
        }
        log::error!(
            "giving up on {} after {} restart attempts",
            source_url,
            policy.max_attempts
        );
        self.status_mut().source_url = None;
    }
}

async fn watch_signals(
    inner: Weak<Inner>,
    mut signals: mpsc::UnboundedReceiver<RelaySignal>,
    shutdown: CancellationToken,
) {
    loop {
        let signal = tokio::select! {
            _ = shutdown.cancelled() => break,
            signal = signals.recv() => match signal {
                Some(signal) => signal,
                None => break,
            },
        };
        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.recover(signal).await;
    }
    log::debug!("signal watcher finished");
}

#[cfg(test)]
#[path = "controller_test.rs"]
mod controller_test;
