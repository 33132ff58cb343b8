//! Supervision of the external transcoder process.
//!
//! The transcoder reads the playable URL and serves a fixed-format audio
//! stream on a loopback TCP socket in listen mode; the relay loop connects
//! to it as the only client. Stall detection is not done here.

use std::{
    net::{IpAddr, SocketAddr},
    process::Stdio,
    time::Duration,
};

use anyhow::Context;
use futures::future::BoxFuture;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    process::{Child, ChildStdin},
};

use crate::{config::TranscoderConfig, error::EngineError, state::Generation};

pub trait Transcoder: Send + Sync {
    /// Launch a transcoder for `playable_url` serving on `listen`.
    fn start<'a>(
        &'a self,
        generation: Generation,
        playable_url: &'a str,
        listen: SocketAddr,
    ) -> BoxFuture<'a, Result<Box<dyn TranscoderHandle>, EngineError>>;
}

/// One running transcoder, owned by exactly one generation.
pub trait TranscoderHandle: Send {
    fn pid(&self) -> Option<u32>;

    /// Where the relay loop connects to read the audio stream.
    fn output_addr(&self) -> SocketAddr;

    /// Ask the process to quit, force-kill it after the grace period, and
    /// reap it. Resolves once the process resources are released.
    fn stop(self: Box<Self>) -> BoxFuture<'static, ()>;
}

/// Pick the listen address for a new generation: the configured port, or a
/// fresh ephemeral one so that two generations never collide.
pub fn allocate_output_addr(config: &TranscoderConfig) -> anyhow::Result<SocketAddr> {
    let ip: IpAddr = config
        .listen_host
        .parse()
        .with_context(|| format!("invalid listen_host {:?}", config.listen_host))?;
    if config.uses_fixed_port() {
        return Ok(SocketAddr::new(ip, config.listen_port));
    }

    let probe = std::net::TcpListener::bind((ip, 0)).context("bind probe listener")?;
    let addr = probe.local_addr().context("probe listener address")?;
    Ok(addr)
}

pub struct FfmpegTranscoder {
    config: TranscoderConfig,
}

impl FfmpegTranscoder {
    pub fn new(config: TranscoderConfig) -> Self {
        Self { config }
    }

    /// Command line for one generation, without the program name.
    pub fn build_args(&self, playable_url: &str, listen: SocketAddr) -> Vec<String> {
        let mut args: Vec<String> = ["-hide_banner", "-nostats", "-loglevel", "warning"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        if self.config.realtime {
            args.push("-re".to_string());
        }
        if self.config.reconnect {
            for flag in [
                "-reconnect",
                "1",
                "-reconnect_at_eof",
                "1",
                "-reconnect_streamed",
                "1",
                "-reconnect_delay_max",
                "4",
            ] {
                args.push(flag.to_string());
            }
        }

        args.push("-i".to_string());
        args.push(playable_url.to_string());
        args.push("-vn".to_string());
        args.push("-c:a".to_string());
        args.push(self.config.codec.clone());
        args.push("-b:a".to_string());
        args.push(self.config.bitrate.clone());
        args.push("-f".to_string());
        args.push(self.config.format.clone());
        args.push("-listen".to_string());
        args.push("1".to_string());
        args.push(format!("tcp://{}", listen));
        args
    }

    fn spawn(
        &self,
        generation: Generation,
        playable_url: &str,
        listen: SocketAddr,
    ) -> anyhow::Result<FfmpegProcess> {
        let mut child = tokio::process::Command::new(&self.config.program)
            .args(self.build_args(playable_url, listen))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to launch {}", self.config.program))?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    log::debug!("{} ffmpeg: {}", generation, line);
                }
            });
        }

        let stdin = child.stdin.take();
        Ok(FfmpegProcess {
            generation,
            child,
            stdin,
            addr: listen,
            stop_timeout: self.config.stop_timeout(),
        })
    }
}

impl Transcoder for FfmpegTranscoder {
    fn start<'a>(
        &'a self,
        generation: Generation,
        playable_url: &'a str,
        listen: SocketAddr,
    ) -> BoxFuture<'a, Result<Box<dyn TranscoderHandle>, EngineError>> {
        Box::pin(async move {
            let process = self
                .spawn(generation, playable_url, listen)
                .map_err(|e| EngineError::StartFailed {
                    cause: format!("{:#}", e),
                })?;
            log::info!(
                "{} transcoder started (pid={:?}) on {}",
                generation,
                process.pid(),
                listen
            );
            Ok(Box::new(process) as Box<dyn TranscoderHandle>)
        })
    }
}

pub struct FfmpegProcess {
    generation: Generation,
    child: Child,
    stdin: Option<ChildStdin>,
    addr: SocketAddr,
    stop_timeout: Duration,
}

impl FfmpegProcess {
    async fn shutdown(mut self) {
        let generation = self.generation;
        match self.child.try_wait() {
            Ok(Some(status)) => {
                log::info!("{} transcoder already exited: {}", generation, status);
                return;
            }
            Ok(None) => {}
            Err(e) => log::warn!("{} transcoder try_wait error: {}", generation, e),
        }

        // ffmpeg quits cleanly on "q"; closing stdin right after also ends it
        if let Some(mut stdin) = self.stdin.take() {
            let _ = stdin.write_all(b"q").await;
        }

        match tokio::time::timeout(self.stop_timeout, self.child.wait()).await {
            Ok(Ok(status)) => {
                log::info!("{} transcoder exited: {}", generation, status);
            }
            Ok(Err(e)) => {
                log::warn!("{} transcoder wait error: {}, killing", generation, e);
                if let Err(e) = self.child.kill().await {
                    log::error!("{} transcoder kill error: {}", generation, e);
                }
            }
            Err(_) => {
                log::warn!(
                    "{} transcoder did not exit within {:?}, killing",
                    generation,
                    self.stop_timeout
                );
                if let Err(e) = self.child.kill().await {
                    log::error!("{} transcoder kill error: {}", generation, e);
                }
            }
        }
    }
}

impl TranscoderHandle for FfmpegProcess {
    fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    fn output_addr(&self) -> SocketAddr {
        self.addr
    }

    fn stop(self: Box<Self>) -> BoxFuture<'static, ()> {
        Box::pin((*self).shutdown())
    }
}

#[cfg(test)]
#[path = "transcoder_test.rs"]
mod transcoder_test;
