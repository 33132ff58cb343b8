use std::{
    collections::HashMap,
    fmt::{Display, Formatter},
    net::SocketAddr,
    sync::Arc,
    time::Duration,
};

use bytes::Bytes;
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    net::TcpStream,
    sync::mpsc,
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

use crate::{
    config::RelayConfig,
    error::SinkError,
    registry::{ConsumerRegistry, SinkId},
    state::Generation,
};

const CONNECT_RETRY: Duration = Duration::from_millis(100);

/// Why a generation's relay loop gave up and needs the controller to restart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestartReason {
    ReadError(String),
    Stalled { empty_reads: u32 },
}

impl Display for RestartReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            RestartReason::ReadError(e) => write!(f, "read error: {}", e),
            RestartReason::Stalled { empty_reads } => {
                write!(f, "stalled after {} empty reads", empty_reads)
            }
        }
    }
}

/// Sent to the controller, at most once per relay loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelaySignal {
    pub generation: Generation,
    pub reason: RestartReason,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayExit {
    /// Superseded or shut down by the controller
    Cancelled,
    Restart(RestartReason),
}

/// Connect to the transcoder's listen socket, retrying until it is up.
pub async fn connect(addr: SocketAddr, timeout: Duration) -> std::io::Result<TcpStream> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                let _ = stream.set_nodelay(true);
                return Ok(stream);
            }
            Err(e) => {
                if tokio::time::Instant::now() >= deadline {
                    return Err(e);
                }
                tokio::time::sleep(CONNECT_RETRY).await;
            }
        }
    }
}

/// The single reader of one generation's transcoder output.
///
/// Reads chunks and writes each one to every sink of the registry snapshot
/// taken for that chunk. Never restarts itself: on a read error or a stall
/// it sends one [`RelaySignal`] and ends.
pub struct RelayLoop<R> {
    generation: Generation,
    reader: R,
    registry: Arc<ConsumerRegistry>,
    config: RelayConfig,
    cancel: CancellationToken,
    signals: mpsc::UnboundedSender<RelaySignal>,
    // consecutive backpressure failures per sink
    failures: HashMap<SinkId, u32>,
    chunks: u64,
    bytes: u64,
}

impl<R> RelayLoop<R>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    pub fn new(
        generation: Generation,
        reader: R,
        registry: Arc<ConsumerRegistry>,
        config: RelayConfig,
        cancel: CancellationToken,
        signals: mpsc::UnboundedSender<RelaySignal>,
    ) -> Self {
        Self {
            generation,
            reader,
            registry,
            config,
            cancel,
            signals,
            failures: HashMap::new(),
            chunks: 0,
            bytes: 0,
        }
    }

    pub fn spawn(self) -> JoinHandle<RelayExit> {
        tokio::spawn(self.run())
    }

    pub async fn run(mut self) -> RelayExit {
        let generation = self.generation;
        let mut buffer = vec![0u8; self.config.chunk_size.max(1)];
        let mut empty_reads = 0u32;
        log::info!("{} relay started", generation);

        let exit = loop {
            let read = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break RelayExit::Cancelled,
                read = self.reader.read(&mut buffer) => read,
            };

            match read {
                Err(e) => {
                    log::error!("{} relay read error: {}", generation, e);
                    break RelayExit::Restart(RestartReason::ReadError(e.to_string()));
                }
                Ok(0) => {
                    empty_reads += 1;
                    if empty_reads >= self.config.max_empty_reads {
                        log::error!(
                            "{} relay read nothing {} times, restart stream",
                            generation,
                            empty_reads
                        );
                        break RelayExit::Restart(RestartReason::Stalled { empty_reads });
                    }
                    log::warn!("{} relay read nothing, retry {}", generation, empty_reads);
                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => break RelayExit::Cancelled,
                        _ = tokio::time::sleep(self.config.empty_read_backoff()) => {}
                    }
                }
                Ok(n) => {
                    empty_reads = 0;
                    // superseded while the read was completing
                    if self.cancel.is_cancelled() {
                        break RelayExit::Cancelled;
                    }
                    self.fan_out(Bytes::copy_from_slice(&buffer[..n]));
                }
            }
        };

        if let RelayExit::Restart(reason) = &exit {
            let signal = RelaySignal {
                generation,
                reason: reason.clone(),
            };
            if self.signals.send(signal).is_err() {
                log::debug!("{} relay: controller is gone", generation);
            }
        }
        log::info!(
            "{} relay stopped ({:?}), {} chunks / {} bytes relayed",
            generation,
            exit,
            self.chunks,
            self.bytes
        );
        exit
    }

    fn fan_out(&mut self, chunk: Bytes) {
        let sinks = self.registry.snapshot();
        for (id, sink) in &sinks {
            match sink.write(&chunk) {
                Ok(()) => {
                    self.failures.remove(id);
                }
                Err(e) => self.on_write_failure(*id, e),
            }
        }
        if !self.failures.is_empty() {
            self.failures
                .retain(|id, _| sinks.iter().any(|(sink_id, _)| sink_id == id));
        }

        self.chunks += 1;
        self.bytes += chunk.len() as u64;
        log::trace!(
            "{} copy {} bytes to {} sinks",
            self.generation,
            chunk.len(),
            sinks.len()
        );
    }

    fn on_write_failure(&mut self, id: SinkId, error: SinkError) {
        if error.is_terminal() {
            log::warn!("{} relay write to {} failed: {}", self.generation, id, error);
            self.failures.remove(&id);
            self.registry.evict(id);
            return;
        }

        let count = {
            let count = self.failures.entry(id).or_insert(0);
            *count += 1;
            *count
        };
        if count >= self.config.max_sink_failures {
            log::warn!(
                "{} relay write to {} failed {} times in a row: {}",
                self.generation,
                id,
                count,
                error
            );
            self.failures.remove(&id);
            self.registry.evict(id);
        } else if count == 1 {
            log::warn!("{} relay write to {} failed: {}", self.generation, id, error);
        }
    }
}

#[cfg(test)]
#[path = "relay_test.rs"]
mod relay_test;
