use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use serenity::{model::gateway::GatewayIntents, Client};
use songbird::{SerenityInit, Songbird};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};

mod bot;
mod config;
mod error;
mod media;
mod radio;

use crate::bot::RadioBot;
use crate::config::Config;
use crate::media::MediaClient;
use crate::radio::voice::SongbirdBridge;
use crate::radio::{RadioTuner, StationSet};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("open_radio=debug".parse()?)
                .add_directive("serenity=info".parse()?)
                .add_directive("songbird=info".parse()?),
        )
        .init();

    info!(
        "📻 Starting {} v{}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    );

    let config_path =
        PathBuf::from(std::env::var("CONFIG_PATH").unwrap_or_else(|_| String::from("config.json")));
    let config = Config::load(&config_path)?;

    let http = reqwest::Client::new();
    let songbird = Songbird::serenity();

    let bridge = Arc::new(SongbirdBridge::new(Arc::clone(&songbird)));
    let tuner = Arc::new(RadioTuner::new(http.clone()));
    let stations = Arc::new(StationSet::new(&config.stations, tuner, bridge));
    info!("📻 {} radio stations configured", stations.len());

    let media = MediaClient::new(http, config.media.url.clone(), config.media.key.clone());
    let radio_bot = Arc::new(RadioBot::new(stations, media)?);

    // Local console: stdin lines go through the same message processor.
    tokio::spawn(console_loop(Arc::clone(&radio_bot)));

    let intents = GatewayIntents::GUILDS
        | GatewayIntents::GUILD_VOICE_STATES
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT;

    let mut client = Client::builder(&config.discord.token, intents)
        .event_handler_arc(radio_bot)
        .register_songbird_with(songbird)
        .await?;

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("⚠️ Shutdown signal received, closing");
            std::process::exit(0);
        }
    });

    if let Err(why) = client.start().await {
        error!("Client error: {why:?}");
    }

    Ok(())
}

async fn console_loop(radio_bot: Arc<RadioBot>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if let Some(reply) = radio_bot.process_message(line.trim()).await {
                    println!("{reply}");
                }
            }
            Ok(None) => break,
            Err(e) => {
                error!("Console read failed: {e}");
                break;
            }
        }
    }
}
