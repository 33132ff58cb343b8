use std::time::Duration;

use serde::Deserialize;

/// Engine settings. Every field has a default so a partial JSON block works.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub resolver: ResolverConfig,
    pub transcoder: TranscoderConfig,
    pub relay: RelayConfig,
    pub restart: RestartPolicy,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// URL extraction tool, e.g. "yt-dlp"
    pub program: String,
    /// Arguments placed before the source URL; must make the tool print a
    /// single playable url
    pub args: Vec<String>,
    /// URLs whose path ends with one of these are played directly
    pub direct_suffixes: Vec<String>,
    pub timeout_ms: u64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            program: "yt-dlp".to_string(),
            // one audio-bearing url instead of separate video and audio lines
            args: ["-f", "bestaudio/best", "-g"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            direct_suffixes: vec![".m3u8".to_string()],
            timeout_ms: 30_000,
        }
    }
}

impl ResolverConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct TranscoderConfig {
    pub program: String,
    // "libmp3lame"
    pub codec: String,
    // "mp3"
    pub format: String,
    // "128k"
    pub bitrate: String,
    pub listen_host: String,
    /// 0 = fresh ephemeral port per generation
    pub listen_port: u16,
    /// Read the input at its native rate (-re)
    pub realtime: bool,
    /// Pass ffmpeg's input reconnect flags
    pub reconnect: bool,
    pub stop_timeout_ms: u64,
    pub connect_timeout_ms: u64,
}

impl Default for TranscoderConfig {
    fn default() -> Self {
        Self {
            program: "ffmpeg".to_string(),
            codec: "libmp3lame".to_string(),
            format: "mp3".to_string(),
            bitrate: "128k".to_string(),
            listen_host: "127.0.0.1".to_string(),
            listen_port: 0,
            realtime: true,
            reconnect: true,
            stop_timeout_ms: 3_000,
            connect_timeout_ms: 10_000,
        }
    }
}

impl TranscoderConfig {
    /// A fixed port cannot be shared by two generations, so the previous
    /// transcoder has to be gone before the next one binds.
    pub fn uses_fixed_port(&self) -> bool {
        self.listen_port != 0
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Bytes per socket read
    pub chunk_size: usize,
    /// Consecutive empty reads treated as a stall
    pub max_empty_reads: u32,
    pub empty_read_backoff_ms: u64,
    /// Consecutive backpressure failures before a sink is evicted
    pub max_sink_failures: u32,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            chunk_size: 512,
            max_empty_reads: 5,
            empty_read_backoff_ms: 500,
            max_sink_failures: 64,
        }
    }
}

impl RelayConfig {
    pub fn empty_read_backoff(&self) -> Duration {
        Duration::from_millis(self.empty_read_backoff_ms)
    }
}

/// Automatic recovery after a read error or stall.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct RestartPolicy {
    pub max_attempts: u32,
    pub backoff_ms: u64,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: 2_000,
        }
    }
}

impl RestartPolicy {
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}
