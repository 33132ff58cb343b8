// ============================================================================
// Transcoder Tests
// ============================================================================

use std::{net::SocketAddr, process::Stdio, time::Duration};

use super::{FfmpegProcess, FfmpegTranscoder, Transcoder, TranscoderHandle, allocate_output_addr};
use crate::{config::TranscoderConfig, error::EngineError, state::Generation};

fn listen_addr() -> SocketAddr {
    "127.0.0.1:1049".parse().unwrap()
}

// ------------------------------------------------------------------------
// Command line
// ------------------------------------------------------------------------

#[test]
fn test_build_args_defaults() {
    let transcoder = FfmpegTranscoder::new(TranscoderConfig::default());
    let args = transcoder.build_args("https://cdn.example/live.m3u8", listen_addr());

    let input = args.iter().position(|a| a == "-i").unwrap();
    assert_eq!(args[input + 1], "https://cdn.example/live.m3u8");

    // input options come before -i
    let re = args.iter().position(|a| a == "-re").unwrap();
    let reconnect = args.iter().position(|a| a == "-reconnect").unwrap();
    assert!(re < input);
    assert!(reconnect < input);

    let codec = args.iter().position(|a| a == "-c:a").unwrap();
    assert_eq!(args[codec + 1], "libmp3lame");
    let bitrate = args.iter().position(|a| a == "-b:a").unwrap();
    assert_eq!(args[bitrate + 1], "128k");
    let format = args.iter().position(|a| a == "-f").unwrap();
    assert_eq!(args[format + 1], "mp3");

    assert_eq!(args[args.len() - 3], "-listen");
    assert_eq!(args[args.len() - 2], "1");
    assert_eq!(args.last().unwrap(), "tcp://127.0.0.1:1049");
}

#[test]
fn test_build_args_without_realtime_and_reconnect() {
    let transcoder = FfmpegTranscoder::new(TranscoderConfig {
        realtime: false,
        reconnect: false,
        codec: "aac".to_string(),
        format: "adts".to_string(),
        ..TranscoderConfig::default()
    });
    let args = transcoder.build_args("https://cdn.example/a.m3u8", listen_addr());

    assert!(!args.iter().any(|a| a == "-re"));
    assert!(!args.iter().any(|a| a.starts_with("-reconnect")));
    assert!(args.windows(2).any(|w| w[0] == "-c:a" && w[1] == "aac"));
    assert!(args.windows(2).any(|w| w[0] == "-f" && w[1] == "adts"));
}

// ------------------------------------------------------------------------
// Output address
// ------------------------------------------------------------------------

#[test]
fn test_fixed_port_is_used_as_is() {
    let config = TranscoderConfig {
        listen_port: 1049,
        ..TranscoderConfig::default()
    };
    assert!(config.uses_fixed_port());
    assert_eq!(allocate_output_addr(&config).unwrap(), listen_addr());
}

#[test]
fn test_ephemeral_port_is_allocated() {
    let config = TranscoderConfig::default();
    assert!(!config.uses_fixed_port());
    let addr = allocate_output_addr(&config).unwrap();
    assert!(addr.ip().is_loopback());
    assert_ne!(addr.port(), 0);
}

#[test]
fn test_invalid_listen_host() {
    let config = TranscoderConfig {
        listen_host: "not-an-ip".to_string(),
        ..TranscoderConfig::default()
    };
    let err = allocate_output_addr(&config).unwrap_err();
    assert!(format!("{:#}", err).contains("invalid listen_host"));
}

// ------------------------------------------------------------------------
// Start / stop
// ------------------------------------------------------------------------

#[tokio::test]
async fn test_missing_program_is_start_failed() {
    let transcoder = FfmpegTranscoder::new(TranscoderConfig {
        program: "/nonexistent/ffmpeg".to_string(),
        ..TranscoderConfig::default()
    });
    match transcoder
        .start(Generation(1), "https://cdn.example/a.m3u8", listen_addr())
        .await
    {
        Err(EngineError::StartFailed { cause }) => {
            assert!(cause.contains("failed to launch /nonexistent/ffmpeg"))
        }
        Err(other) => panic!("expected StartFailed, got {:?}", other),
        Ok(_) => panic!("expected StartFailed"),
    }
}

fn process_for(program: &str, args: &[&str], stop_timeout: Duration) -> FfmpegProcess {
    let mut child = tokio::process::Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .unwrap();
    let stdin = child.stdin.take();
    FfmpegProcess {
        generation: Generation(1),
        child,
        stdin,
        addr: listen_addr(),
        stop_timeout,
    }
}

#[cfg(target_os = "linux")]
fn is_running(pid: u32) -> bool {
    std::path::Path::new(&format!("/proc/{}", pid)).exists()
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_stop_graceful_exit() {
    // cat exits on stdin EOF, like ffmpeg does on "q"
    let process = Box::new(process_for("cat", &[], Duration::from_secs(5)));
    let pid = process.pid().unwrap();
    assert!(is_running(pid));

    let started = std::time::Instant::now();
    process.stop().await;
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(!is_running(pid));
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_stop_force_kills_after_timeout() {
    let process = Box::new(process_for("sleep", &["30"], Duration::from_millis(200)));
    let pid = process.pid().unwrap();

    let started = std::time::Instant::now();
    process.stop().await;
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(!is_running(pid));
}

#[cfg(unix)]
#[tokio::test]
async fn test_stop_already_exited() {
    let process = Box::new(process_for("true", &[], Duration::from_secs(5)));
    tokio::time::sleep(Duration::from_millis(200)).await;

    let started = std::time::Instant::now();
    process.stop().await;
    assert!(started.elapsed() < Duration::from_secs(5));
}
