use anyhow::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Output of [`AudioNormalizer::normalize`]: a file in the agent's playable
/// format plus its duration, used to pace `/ausrc` switching.
#[derive(Debug, Clone)]
pub struct NormalizedAudio {
    pub path: PathBuf,
    pub duration: Duration,
}

/// Converts arbitrary input media into the agent's canonical playable
/// format, padded to a minimum duration.
#[async_trait]
pub trait AudioNormalizer: Send + Sync {
    async fn normalize(&self, input: &Path) -> Result<NormalizedAudio>;
}

/// Renders text to a playable audio file.
#[async_trait]
pub trait SynthesisClient: Send + Sync {
    async fn synthesize(&self, text: &str) -> Result<PathBuf>;
}

/// Renders a DTMF digit sequence to a playable tone file.
#[async_trait]
pub trait ToneGenerator: Send + Sync {
    async fn tone_file(&self, digits: &str) -> Result<PathBuf>;
}
