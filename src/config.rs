//! Deployment configuration.
//!
//! Loaded from a JSON file (`CONFIG_PATH`, default `config.json`) and
//! validated before the bot starts. `DISCORD_TOKEN` in the environment (or
//! a `.env` file) overrides the token in the file. Shape:
//!
//! ```json
//! {
//!     "discord": { "token": "..." },
//!     "media": { "url": "http://media.example:5050/", "key": "..." },
//!     "stations": { "lofi": "http://radio.example/lofi.m3u" }
//! }
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use url::Url;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub discord: DiscordConfig,
    pub media: MediaConfig,
    /// Station name (matched against voice-channel names) to the
    /// playlist source URL.
    #[serde(default)]
    pub stations: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiscordConfig {
    pub token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MediaConfig {
    pub url: Url,
    pub key: String,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        dotenvy::dotenv().ok();

        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let mut config = Self::parse(&raw)
            .with_context(|| format!("parsing config file {}", path.display()))?;

        if let Ok(token) = std::env::var("DISCORD_TOKEN") {
            if !token.trim().is_empty() {
                config.discord.token = token;
            }
        }

        config.validate()?;
        Ok(config)
    }

    fn parse(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    fn validate(&self) -> Result<()> {
        if self.discord.token.trim().is_empty() {
            bail!("discord token must not be empty");
        }
        if self.media.key.trim().is_empty() {
            bail!("media API key must not be empty");
        }
        for (name, source_url) in &self.stations {
            Url::parse(source_url)
                .with_context(|| format!("station '{name}' has an invalid source URL"))?;
        }
        Ok(())
    }
}
