use crate::config::Config;
use anyhow::Result;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Stock baresip `config` written on first run when the directory holds none.
const DEFAULT_CONFIG: &str = "\
#\n\
# baresip configuration\n\
#\n\
\n\
# Core\n\
poll_method\t\tepoll\n\
\n\
# SIP\n\
sip_trans_bsize\t\t128\n\
\n\
# Audio\n\
#audio_path\t\t/usr/share/baresip\n\
audio_player\t\talsa,default\n\
audio_source\t\talsa,default\n\
audio_alert\t\talsa,default\n\
ausrc_srate\t\t48000\n\
auplay_srate\t\t48000\n\
\n\
# Network\n\
rtp_tos\t\t\t184\n\
rtcp_enable\t\tyes\n\
rtcp_mux\t\tno\n\
jitter_buffer_delay\t5-10\n\
rtp_stats\t\tno\n\
\n\
# Modules\n\
module\t\t\tstdio.so\n\
module\t\t\talsa.so\n\
module\t\t\taufile.so\n\
module\t\t\tg711.so\n\
module\t\t\taccount.so\n\
module\t\t\tmenu.so\n\
";

const AUDIO_PATH_DIRECTIVE: &str = "#audio_path\t\t/usr/share/baresip";

/// On-disk baresip configuration directory.
///
/// Loads an existing `config` or materializes the default template. When the
/// content is rewritten (sounds directory, first run) the previous content is
/// backed up to `config.bak` and put back on clean shutdown.
pub struct Profile {
    dir: PathBuf,
    content: String,
    original: String,
    updated: bool,
}

impl Profile {
    pub fn new(config: &Config) -> Result<Self> {
        let dir = config.config_dir();
        if !dir.is_dir() {
            fs::create_dir_all(&dir)?;
        }

        let config_file = dir.join("config");
        let (content, mut updated) = if config_file.is_file() {
            let content = fs::read_to_string(&config_file)?;
            info!("config loaded from {}", config_file.display());
            (content, false)
        } else {
            (DEFAULT_CONFIG.to_string(), true)
        };
        let original = content.clone();

        let mut content = content;
        if content.contains(AUDIO_PATH_DIRECTIVE) {
            if config.disable_sounds {
                content = content.replace(AUDIO_PATH_DIRECTIVE, "audio_path\t\t/dont/load");
                updated = true;
            } else if let Some(sounds) = &config.sounds_path {
                if Path::new(sounds).is_dir() {
                    content = content
                        .replace(AUDIO_PATH_DIRECTIVE, &format!("audio_path\t\t{}", sounds));
                    updated = true;
                }
            }
        }

        Ok(Self {
            dir,
            content,
            original,
            updated,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write the effective `config` (and back up the prior content when it
    /// was modified). Idempotent.
    pub fn materialize(&self) -> Result<()> {
        if self.updated {
            fs::write(self.dir.join("config.bak"), &self.original)?;
            info!("saving config to {}", self.dir.display());
            fs::write(self.dir.join("config"), &self.content)?;
        }
        Ok(())
    }

    /// Put the pre-session `config` content back, if it was modified.
    pub fn restore(&self) -> Result<()> {
        if self.updated {
            info!("restoring original config");
            fs::write(self.dir.join("config"), &self.original)?;
        }
        Ok(())
    }
}
