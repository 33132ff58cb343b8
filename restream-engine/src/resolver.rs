use std::{process::Stdio, time::Duration};

use futures::future::BoxFuture;

use crate::{config::ResolverConfig, error::EngineError, source::Source};

/// Turns a page URL into a directly playable media URL.
///
/// Dropping the returned future cancels the resolution.
pub trait SourceResolver: Send + Sync {
    fn resolve<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<String, EngineError>>;
}

/// Direct manifests are returned unchanged without touching `resolver`;
/// everything else goes through it.
pub async fn resolve_playable(
    resolver: &dyn SourceResolver,
    source: &Source,
) -> Result<String, EngineError> {
    if source.is_direct() {
        log::debug!("resolver: {} is a direct manifest", source.url());
        return Ok(source.url().to_string());
    }

    log::info!("resolver: fetching playable url for {}", source.url());
    let playable = resolver.resolve(source.url()).await?;
    log::info!("resolver: playable url {}", playable);
    Ok(playable)
}

/// Runs an external extraction tool (yt-dlp by default) as
/// `<program> <args..> <url>` and takes the first non-empty stdout line.
pub struct CommandResolver {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandResolver {
    pub fn new(config: &ResolverConfig) -> Self {
        Self {
            program: config.program.clone(),
            args: config.args.clone(),
            timeout: config.timeout(),
        }
    }

    async fn run(&self, url: &str) -> Result<String, EngineError> {
        let child = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .arg(url)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| EngineError::ResolutionFailed {
                exit_code: None,
                diagnostic: format!("failed to launch {}: {}", self.program, e),
            })?;

        // on timeout or cancellation the child is dropped and killed
        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| EngineError::ResolutionFailed {
                exit_code: None,
                diagnostic: format!("{} timed out after {:?}", self.program, self.timeout),
            })?
            .map_err(|e| EngineError::ResolutionFailed {
                exit_code: None,
                diagnostic: format!("{} i/o error: {}", self.program, e),
            })?;

        let diagnostic = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if !output.status.success() {
            log::error!(
                "resolver: {} error (exit code {:?}): {}",
                self.program,
                output.status.code(),
                diagnostic
            );
            return Err(EngineError::ResolutionFailed {
                exit_code: output.status.code(),
                diagnostic,
            });
        }
        if !diagnostic.is_empty() {
            log::debug!("resolver: {} stderr: {}", self.program, diagnostic);
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        match stdout.lines().map(str::trim).find(|line| !line.is_empty()) {
            Some(line) => Ok(line.to_string()),
            None => {
                log::error!("resolver: {} returned no playback url", self.program);
                Err(EngineError::ResolutionEmpty)
            }
        }
    }
}

impl SourceResolver for CommandResolver {
    fn resolve<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<String, EngineError>> {
        Box::pin(self.run(url))
    }
}

#[cfg(test)]
#[path = "resolver_test.rs"]
mod resolver_test;
