use anyhow::Error;
use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(version)]
pub struct Cli {
    #[clap(long, default_value = "barectl.toml")]
    pub conf: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    pub account: AccountConfig,
    /// Executable launched with `-f <config_dir>`.
    pub baresip_bin: String,
    /// Directory holding the baresip `config` file. Defaults to `~/.barectl`.
    pub config_dir: Option<String>,
    /// Directory of ring/notification sounds written into the baresip config.
    pub sounds_path: Option<String>,
    /// Point the agent's audio_path at a non-existent directory so it loads
    /// no sounds at all.
    pub disable_sounds: bool,
    pub log_level: Option<String>,
    pub log_file: Option<String>,
    /// Bounded wait on each console read; liveness is re-checked between
    /// reads even when the agent is silent.
    pub read_timeout_ms: u64,
    /// Fixed sleep between respawn attempts after the process dies.
    pub respawn_backoff_ms: u64,
    /// Optional respawn ceiling. `None` retries forever.
    pub max_respawns: Option<u32>,
    /// Echo every raw console line at debug level.
    pub debug: bool,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AccountConfig {
    pub user: String,
    pub password: String,
    pub gateway: String,
    pub transport: String,
    /// Extra `;`-separated options appended to the account URI.
    pub extra_options: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            account: AccountConfig::default(),
            baresip_bin: "baresip".to_string(),
            config_dir: None,
            sounds_path: None,
            disable_sounds: false,
            log_level: Some("info".to_string()),
            log_file: None,
            read_timeout_ms: 500,
            respawn_backoff_ms: 500,
            max_respawns: None,
            debug: false,
        }
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self, Error> {
        let config = toml::from_str(
            &std::fs::read_to_string(path).map_err(|e| anyhow::anyhow!("{}: {}", e, path))?,
        )?;
        Ok(config)
    }

    pub fn config_dir(&self) -> PathBuf {
        match &self.config_dir {
            Some(dir) => PathBuf::from(dir),
            None => {
                let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
                PathBuf::from(home).join(".barectl")
            }
        }
    }
}

impl AccountConfig {
    /// `sip:<user>@<gateway>`
    pub fn sip_uri(&self) -> String {
        format!("sip:{}@{}", self.user, self.gateway)
    }

    /// Full account URI handed to `/uanew`. Empty option segments are
    /// collapsed and the trailing separator stripped.
    pub fn login_uri(&self) -> String {
        let transport = if self.transport.is_empty() {
            "udp"
        } else {
            self.transport.as_str()
        };
        let extra = self.extra_options.as_deref().unwrap_or("");
        let uri = format!(
            "{};transport={};auth_pass={};{};",
            self.sip_uri(),
            transport,
            self.password,
            extra
        );
        let mut uri = uri.replace(";;", ";");
        while uri.ends_with(';') {
            uri.pop();
        }
        uri
    }
}
