use crate::error::EngineError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceKind {
    /// Already a playable manifest, handed to the transcoder as is
    DirectManifest,
    /// Needs the external extraction tool first
    RequiresResolution,
}

/// A requested source URL and how it has to be turned into a playable one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Source {
    url: String,
    kind: SourceKind,
}

impl Source {
    /// Classify `url` against the configured direct-manifest suffixes.
    ///
    /// Query string and fragment are ignored when matching the suffix, so
    /// `https://host/live.m3u8?token=1` is still a direct manifest.
    pub fn parse(url: &str, direct_suffixes: &[String]) -> Result<Self, EngineError> {
        let url = url.trim();
        if url.is_empty() {
            return Err(EngineError::UnsupportedSource {
                url: url.to_string(),
                reason: "empty url".to_string(),
            });
        }
        if url.chars().any(char::is_whitespace) {
            return Err(EngineError::UnsupportedSource {
                url: url.to_string(),
                reason: "url contains whitespace".to_string(),
            });
        }

        let scheme_ok = ["http://", "https://"].iter().any(|scheme| {
            url.len() > scheme.len()
                && url
                    .get(..scheme.len())
                    .is_some_and(|prefix| prefix.eq_ignore_ascii_case(scheme))
        });
        if !scheme_ok {
            return Err(EngineError::UnsupportedSource {
                url: url.to_string(),
                reason: "only http(s) sources are supported".to_string(),
            });
        }

        let path = url
            .split(['?', '#'])
            .next()
            .unwrap_or(url)
            .to_ascii_lowercase();
        let kind = if direct_suffixes
            .iter()
            .any(|suffix| path.ends_with(&suffix.to_ascii_lowercase()))
        {
            SourceKind::DirectManifest
        } else {
            SourceKind::RequiresResolution
        };

        Ok(Self {
            url: url.to_string(),
            kind,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    pub fn is_direct(&self) -> bool {
        self.kind == SourceKind::DirectManifest
    }
}
